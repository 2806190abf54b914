use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use sync_traits::{FileSource, RemoteFileInfo, SourceError};
use tracing::{debug, warn};

/// File source backed by a directory on the local filesystem.
///
/// `download` copies the file to a temporary path so the caller gets the
/// same ownership semantics as with a network transport: a private local
/// copy it must delete or move on every exit path.
pub struct LocalDirSource {
    directory: PathBuf,
    allowed_extensions: Vec<String>,
}

impl LocalDirSource {
    pub fn new(directory: impl Into<PathBuf>, allowed_extensions: Vec<String>) -> Self {
        Self {
            directory: directory.into(),
            allowed_extensions,
        }
    }
}

#[async_trait]
impl FileSource for LocalDirSource {
    async fn list_files(&self) -> Result<Vec<RemoteFileInfo>, SourceError> {
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| SourceError::Listing(format!("{}: {e}", self.directory.display())))?;

        let mut result = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SourceError::Listing(format!("{}: {e}", self.directory.display())))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.is_supported(&name) {
                continue;
            }
            // Per-entry metadata failures only cost this entry, not the listing.
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(file = %name, error = %e, "could not read metadata, skipping entry");
                    continue;
                }
            };
            if metadata.is_dir() {
                continue;
            }
            let last_modified = match metadata.modified() {
                Ok(modified) => modified
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0),
                Err(e) => {
                    warn!(file = %name, error = %e, "could not read last modified time, skipping entry");
                    continue;
                }
            };
            result.push(RemoteFileInfo {
                name,
                last_modified,
            });
        }

        debug!(
            count = result.len(),
            directory = %self.directory.display(),
            "listed local files"
        );
        Ok(result)
    }

    async fn download(&self, name: &str) -> Result<PathBuf, SourceError> {
        let source = self.directory.join(name);
        let temp = tempfile::Builder::new()
            .prefix("docsink-")
            .suffix(&format!("-{name}"))
            .tempfile()
            .map_err(SourceError::Io)?
            .into_temp_path()
            .keep()
            .map_err(|e| SourceError::Io(e.error))?;

        if let Err(e) = tokio::fs::copy(&source, &temp).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(SourceError::Download {
                name: name.to_string(),
                source: e,
            });
        }

        debug!(file = %name, temp = %temp.display(), "copied local file");
        Ok(temp)
    }

    fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pdf_source(dir: &std::path::Path) -> LocalDirSource {
        LocalDirSource::new(dir, vec![".pdf".to_string()])
    }

    #[tokio::test]
    async fn lists_only_supported_non_directory_entries() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"a").unwrap();
        std::fs::write(dir.path().join("B.PDF"), b"b").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"n").unwrap();
        std::fs::create_dir(dir.path().join("folder.pdf")).unwrap();

        let source = pdf_source(dir.path());
        let mut files = source.list_files().await.unwrap();
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["B.PDF", "a.pdf"]);
        assert!(files.iter().all(|f| f.last_modified > 0));
    }

    #[tokio::test]
    async fn listing_a_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let source = pdf_source(&dir.path().join("does-not-exist"));
        assert!(matches!(
            source.list_files().await,
            Err(SourceError::Listing(_))
        ));
    }

    #[tokio::test]
    async fn download_produces_an_independent_copy() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"content").unwrap();

        let source = pdf_source(dir.path());
        let temp = source.download("a.pdf").await.unwrap();

        assert_ne!(temp, dir.path().join("a.pdf"));
        assert_eq!(std::fs::read(&temp).unwrap(), b"content");
        std::fs::remove_file(temp).unwrap();
    }

    #[tokio::test]
    async fn download_of_a_missing_file_fails_and_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let source = pdf_source(dir.path());

        let result = source.download("ghost.pdf").await;
        assert!(matches!(
            result,
            Err(SourceError::Download { ref name, .. }) if name == "ghost.pdf"
        ));
    }
}
