//! # Capability Traits
//!
//! Contracts between the synchronization engine and its external
//! collaborators. Each trait represents a capability the engine requires but
//! that is implemented elsewhere:
//!
//! - [`FileSource`](source::FileSource) - Enumerates and downloads remote
//!   documents (local directory, SFTP, FTP, ...)
//! - [`IngestBackend`](backend::IngestBackend) - Uploads, lists, and deletes
//!   documents in the downstream RAG ingest service
//! - [`Preprocessor`](preprocess::Preprocessor) - Optional transform applied
//!   to a downloaded file before upload
//!
//! ## Error Handling
//!
//! Each capability has its own `thiserror` enum. The only error the engine
//! treats specially is [`BackendError::Busy`](backend::BackendError::Busy):
//! the backend rejected a delete because its pipeline is processing, and the
//! operation must be retried on a later poll cycle. Everything else is either
//! a per-file transient error (retried on the next tick) or a terminal
//! failure recorded in the failure log.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync` so implementations can be shared as
//! `Arc<dyn ...>` across the engine and the shutdown handler.

pub mod backend;
pub mod preprocess;
pub mod source;

pub use backend::{BackendError, DocumentInfo, IngestBackend};
pub use preprocess::{IdentityPreprocessor, PreprocessError, Preprocessor};
pub use source::{FileSource, RemoteFileInfo, SourceError};
