//! HTTP implementation of the ingest backend capability.
//!
//! Speaks the backend's REST interface:
//!
//! - `POST /documents/upload` - multipart upload, returns a tracking id
//! - `GET /documents` - all documents grouped by processing status
//! - `DELETE /documents/delete_document` - delete by id; a `busy` status in
//!   the response body is surfaced as [`BackendError::Busy`]
//!
//! [`BackendError::Busy`]: sync_traits::BackendError::Busy

mod client;
mod types;

pub use client::IngestHttpClient;
