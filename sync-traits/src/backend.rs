//! Ingest backend abstraction.
//!
//! The downstream RAG service receives documents via multipart upload,
//! processes them asynchronously, and exposes its document set grouped by
//! processing status. Deletes can be rejected with a transient "busy"
//! condition while the ingestion pipeline is running; that condition is the
//! only retriable error and is modelled as a distinguished variant.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// Backend view of one document.
///
/// `status` is the lowercased status group the document was listed under.
/// Terminal values are `processed` and `failed`; anything else (typically
/// `processing`) is transient.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentInfo {
    /// Persistent document id assigned by the backend.
    pub id: String,
    /// Path the backend stored the upload under; ends with the presented
    /// file name.
    pub file_path: Option<String>,
    /// Creation timestamp as reported by the backend (ISO-8601 string).
    pub created_at: Option<String>,
    /// Submission id returned by the upload endpoint.
    pub track_id: Option<String>,
    pub status: Option<String>,
    pub error_msg: Option<String>,
}

/// Errors raised by the ingest backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend is processing and rejected the operation for now. The
    /// caller should defer and retry on a later poll cycle.
    #[error("ingest backend is busy: {0}")]
    Busy(String),

    /// Transport-level failure (connection, timeout, non-success status).
    #[error("backend request failed: {0}")]
    Request(String),

    /// The backend answered with a body the client could not interpret.
    #[error("unexpected backend response: {0}")]
    UnexpectedResponse(String),
}

impl BackendError {
    /// Whether this error is the retriable busy condition.
    pub fn is_busy(&self) -> bool {
        matches!(self, BackendError::Busy(_))
    }
}

/// Operations against the ingest backend.
///
/// The backend deduplicates by presented file name, so callers must never
/// upload a file whose prior version still resides under the same name.
#[async_trait]
pub trait IngestBackend: Send + Sync {
    /// Submit a file as multipart upload.
    ///
    /// Returns the backend's tracking id for the submission, or `None` if
    /// the backend accepted the request but assigned no id (treated by the
    /// caller as "do not track").
    async fn upload(&self, file: &Path) -> Result<Option<String>, BackendError>;

    /// List all documents grouped by lowercased status.
    async fn documents_by_status(
        &self,
    ) -> Result<HashMap<String, Vec<DocumentInfo>>, BackendError>;

    /// Flattened view across all status groups.
    async fn documents(&self) -> Result<Vec<DocumentInfo>, BackendError> {
        let by_status = self.documents_by_status().await?;
        Ok(by_status.into_values().flatten().collect())
    }

    /// Delete a document by id.
    ///
    /// Fails with [`BackendError::Busy`] when the backend is processing and
    /// cannot delete right now.
    async fn delete_document(&self, doc_id: &str) -> Result<(), BackendError>;
}
