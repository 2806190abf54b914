//! Preprocessing abstraction.
//!
//! A [`Preprocessor`] transforms a downloaded file before it is uploaded.
//! The default is the identity transform; an external-command implementation
//! lives with the engine. Content hashing always happens on the INPUT file
//! so that content identity is stable against preprocessor changes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a preprocessor. All of them are treated as per-file
/// transient errors by the engine and retried on the next poll cycle.
#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("preprocessor timed out after {timeout_secs}s for {file}")]
    Timeout { file: String, timeout_secs: u64 },

    #[error("preprocessor failed for {file}: {detail}")]
    Failed { file: String, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transform from an input path to an output path.
///
/// The returned path may equal the input (in-place / no-op) or be a new
/// temporary file created by the implementation. The caller owns both the
/// input and, when distinct, the output, and cleans them up on every exit
/// path.
#[async_trait]
pub trait Preprocessor: Send + Sync {
    /// Process `input`, returning the path of the file to upload.
    ///
    /// `original_name` is the source file name, for logging and output
    /// naming only.
    async fn process(
        &self,
        input: &Path,
        original_name: &str,
    ) -> Result<PathBuf, PreprocessError>;
}

/// Default preprocessor: passes files through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityPreprocessor;

#[async_trait]
impl Preprocessor for IdentityPreprocessor {
    async fn process(
        &self,
        input: &Path,
        _original_name: &str,
    ) -> Result<PathBuf, PreprocessError> {
        Ok(input.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identity_returns_the_input_path() {
        let out = IdentityPreprocessor
            .process(Path::new("/tmp/in.pdf"), "in.pdf")
            .await
            .unwrap();
        assert_eq!(out, PathBuf::from("/tmp/in.pdf"));
    }
}
