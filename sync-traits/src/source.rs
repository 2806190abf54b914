//! Remote file source abstraction.
//!
//! A [`FileSource`] exposes a single remote directory of documents. The
//! engine only ever sees file names and last-modified timestamps; transports
//! (local directory, SFTP, FTP) live behind this trait.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

/// Snapshot of one remote entry at listing time.
///
/// `name` is unique within a single listing; `last_modified` is the source's
/// modification timestamp in milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileInfo {
    pub name: String,
    pub last_modified: i64,
}

/// Errors raised by a file source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The listing as a whole could not be produced. The engine treats this
    /// as "visibility lost" and will not delete known files based on it.
    #[error("source listing failed: {0}")]
    Listing(String),

    /// A single file could not be fetched.
    #[error("download of {name} failed: {source}")]
    Download {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read access to a remote directory of documents.
///
/// Implementations filter the listing down to non-directory entries whose
/// name matches one of the allowed extensions. Per-entry metadata errors
/// should be logged and the entry skipped; only a failure of the listing
/// itself is reported as `Err`, so the caller can distinguish "no files
/// currently visible" from "could not look".
#[async_trait]
pub trait FileSource: Send + Sync {
    /// List the currently visible files of supported extensions.
    async fn list_files(&self) -> Result<Vec<RemoteFileInfo>, SourceError>;

    /// Download one file to a local temporary path.
    ///
    /// The returned path is owned by the caller, which must delete it (or
    /// move it) on every exit path.
    async fn download(&self, name: &str) -> Result<PathBuf, SourceError>;

    /// The case-insensitive file suffixes this source is restricted to,
    /// including the leading dot (e.g. `.pdf`).
    fn allowed_extensions(&self) -> &[String];

    /// Whether `name` matches one of the allowed extensions.
    fn is_supported(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        self.allowed_extensions()
            .iter()
            .any(|ext| lower.ends_with(&ext.to_ascii_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ExtensionsOnly(Vec<String>);

    #[async_trait]
    impl FileSource for ExtensionsOnly {
        async fn list_files(&self) -> Result<Vec<RemoteFileInfo>, SourceError> {
            Ok(Vec::new())
        }

        async fn download(&self, name: &str) -> Result<PathBuf, SourceError> {
            Err(SourceError::Listing(format!("not backed by storage: {name}")))
        }

        fn allowed_extensions(&self) -> &[String] {
            &self.0
        }
    }

    #[test]
    fn is_supported_matches_case_insensitively() {
        let source = ExtensionsOnly(vec![".pdf".to_string(), ".docx".to_string()]);
        assert!(source.is_supported("report.pdf"));
        assert!(source.is_supported("REPORT.PDF"));
        assert!(source.is_supported("minutes.DocX"));
        assert!(!source.is_supported("notes.txt"));
        assert!(!source.is_supported("pdf"));
    }
}
