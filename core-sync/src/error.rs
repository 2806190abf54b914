use sync_traits::{BackendError, PreprocessError, SourceError};
use thiserror::Error;

/// Engine-level error taxonomy.
///
/// `Busy` is the only variant with retry semantics: it is raised when the
/// backend defers a delete, and callers must leave state untouched so the
/// operation is retried on a later cycle. Everything else is a per-file
/// error; the tick catches it, logs it, and moves on to the next file.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("ingest backend is busy: {0}")]
    Busy(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn is_busy(&self) -> bool {
        matches!(self, SyncError::Busy(_))
    }
}

impl From<BackendError> for SyncError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Busy(message) => SyncError::Busy(message),
            other => SyncError::Backend(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
