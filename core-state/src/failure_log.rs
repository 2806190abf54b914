//! Terminal upload failure log.
//!
//! Append-only, newline-delimited, pipe-separated record of uploads the
//! backend terminally rejected. Exactly six fields per line, empty strings
//! for absent values:
//!
//! ```text
//! <timestamp> | file=<name> | reason=<text> | track_id=<id> | hash=<hex> | created_at=<iso>
//! ```
//!
//! The current file rotates to `.1` (shifting `.1..=.4` up, keeping five
//! archives) once it reaches the configured size threshold. Dedup queries
//! scan the current file plus all archives; matches older than the rotation
//! horizon become invisible.

use std::path::PathBuf;

use chrono::{Local, SecondsFormat};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

const MAX_ROTATED_FILES: usize = 5;

/// Rotated failure log. The file is opened per append; there is no shared
/// handle to guard.
pub struct FailureLog {
    path: PathBuf,
    max_size_bytes: u64,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>, max_size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            max_size_bytes,
        }
    }

    /// Appends one failure line, rotating first if the current file is at or
    /// above the size threshold.
    ///
    /// Logging failures must never fail the sync, so errors are reported via
    /// `tracing` and swallowed.
    pub async fn log_failure(
        &self,
        file_name: Option<&str>,
        reason: &str,
        track_id: Option<&str>,
        hash: Option<&str>,
        created_at: Option<&str>,
    ) {
        let timestamp = Local::now().to_rfc3339_opts(SecondsFormat::Millis, false);
        let line = format!(
            "{timestamp} | file={} | reason={reason} | track_id={} | hash={} | created_at={}\n",
            file_name.unwrap_or(""),
            track_id.unwrap_or(""),
            hash.unwrap_or(""),
            created_at.unwrap_or(""),
        );

        if let Err(e) = self.append(&line).await {
            error!(
                file = file_name.unwrap_or(""),
                error = %e,
                "failed to write failure log entry"
            );
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        self.rotate_if_needed().await?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Whether a failure for `track_id` has already been recorded.
    ///
    /// A match requires the same `track_id` and, when `created_at` is given,
    /// the same `created_at` value on the line. Used for idempotent startup
    /// failure reporting.
    pub async fn is_already_logged(
        &self,
        track_id: Option<&str>,
        created_at: Option<&str>,
    ) -> bool {
        let Some(track_id) = track_id else {
            return false;
        };
        let track_needle = format!("track_id={track_id}");
        let created_needle = created_at.map(|c| format!("created_at={c}"));

        self.any_line_matches(|line| {
            line.contains(&track_needle)
                && created_needle
                    .as_ref()
                    .map_or(true, |needle| line.contains(needle.as_str()))
        })
        .await
    }

    /// Whether this exact content of this file has already failed. Used to
    /// suppress re-uploads of content the backend terminally rejected.
    pub async fn is_file_hash_failed(&self, file_name: &str, hash: &str) -> bool {
        let file_needle = format!("file={file_name}");
        let hash_needle = format!("hash={hash}");
        self.any_line_matches(|line| {
            line.contains(&file_needle) && line.contains(&hash_needle)
        })
        .await
    }

    async fn any_line_matches(&self, predicate: impl Fn(&str) -> bool) -> bool {
        for index in 0..=MAX_ROTATED_FILES {
            let file = self.numbered_path(index);
            let content = match tokio::fs::read_to_string(&file).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "failed to read failure log");
                    continue;
                }
            };
            if content.lines().any(&predicate) {
                return true;
            }
        }
        false
    }

    /// `0` is the current file, `1..=5` the archives.
    fn numbered_path(&self, index: usize) -> PathBuf {
        if index == 0 {
            self.path.clone()
        } else {
            PathBuf::from(format!("{}.{index}", self.path.display()))
        }
    }

    async fn rotate_if_needed(&self) -> std::io::Result<()> {
        let size = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if size < self.max_size_bytes {
            return Ok(());
        }

        info!(
            threshold_kb = self.max_size_bytes / 1024,
            "rotating failure log"
        );
        // Shift archives upward: .4 -> .5, .3 -> .4, ..., then current -> .1.
        for index in (1..MAX_ROTATED_FILES).rev() {
            let source = self.numbered_path(index);
            if tokio::fs::try_exists(&source).await.unwrap_or(false) {
                tokio::fs::rename(&source, self.numbered_path(index + 1)).await?;
            }
        }
        tokio::fs::rename(&self.path, self.numbered_path(1)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn log_in(dir: &std::path::Path, max_size_bytes: u64) -> FailureLog {
        FailureLog::new(dir.join("failures.log"), max_size_bytes)
    }

    #[tokio::test]
    async fn writes_exactly_six_pipe_separated_fields() {
        let dir = tempdir().unwrap();
        let log = log_in(dir.path(), 1024 * 1024);

        log.log_failure(
            Some("a.pdf"),
            "backend status: failed",
            Some("track-1"),
            Some("abc123"),
            Some("2026-01-01T00:00:00Z"),
        )
        .await;

        let content = std::fs::read_to_string(dir.path().join("failures.log")).unwrap();
        let line = content.lines().next().unwrap();
        let fields: Vec<&str> = line.split(" | ").collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[1], "file=a.pdf");
        assert_eq!(fields[2], "reason=backend status: failed");
        assert_eq!(fields[3], "track_id=track-1");
        assert_eq!(fields[4], "hash=abc123");
        assert_eq!(fields[5], "created_at=2026-01-01T00:00:00Z");
        assert!(content.ends_with('\n'));
    }

    #[tokio::test]
    async fn absent_fields_are_written_as_empty_strings() {
        let dir = tempdir().unwrap();
        let log = log_in(dir.path(), 1024 * 1024);

        log.log_failure(None, "boom", None, None, None).await;

        let content = std::fs::read_to_string(dir.path().join("failures.log")).unwrap();
        assert!(content.contains("| file= |"));
        assert!(content.contains("| track_id= |"));
        assert!(content.contains("| hash= |"));
        assert!(content.trim_end().ends_with("created_at="));
    }

    #[tokio::test]
    async fn dedup_by_track_id_and_created_at() {
        let dir = tempdir().unwrap();
        let log = log_in(dir.path(), 1024 * 1024);

        log.log_failure(
            Some("a.pdf"),
            "bad",
            Some("track-1"),
            None,
            Some("2026-01-01T00:00:00Z"),
        )
        .await;

        assert!(log.is_already_logged(Some("track-1"), None).await);
        assert!(
            log.is_already_logged(Some("track-1"), Some("2026-01-01T00:00:00Z"))
                .await
        );
        assert!(
            !log.is_already_logged(Some("track-1"), Some("2027-05-05T00:00:00Z"))
                .await
        );
        assert!(!log.is_already_logged(Some("track-2"), None).await);
        assert!(!log.is_already_logged(None, None).await);
    }

    #[tokio::test]
    async fn file_hash_suppression_requires_both_fields() {
        let dir = tempdir().unwrap();
        let log = log_in(dir.path(), 1024 * 1024);

        log.log_failure(Some("a.pdf"), "bad", Some("t"), Some("abc123"), None)
            .await;

        assert!(log.is_file_hash_failed("a.pdf", "abc123").await);
        assert!(!log.is_file_hash_failed("a.pdf", "ffffff").await);
        assert!(!log.is_file_hash_failed("b.pdf", "abc123").await);
    }

    #[tokio::test]
    async fn rotates_once_threshold_is_reached_and_still_finds_old_lines() {
        let dir = tempdir().unwrap();
        // Tiny threshold: every append after the first triggers a rotation.
        let log = log_in(dir.path(), 1);

        log.log_failure(Some("first.pdf"), "bad", Some("track-1"), Some("h1"), None)
            .await;
        log.log_failure(Some("second.pdf"), "bad", Some("track-2"), Some("h2"), None)
            .await;

        assert!(dir.path().join("failures.log.1").exists());
        let current = std::fs::read_to_string(dir.path().join("failures.log")).unwrap();
        assert!(current.contains("file=second.pdf"));
        let rotated = std::fs::read_to_string(dir.path().join("failures.log.1")).unwrap();
        assert!(rotated.contains("file=first.pdf"));

        // Queries see rotated content too.
        assert!(log.is_already_logged(Some("track-1"), None).await);
        assert!(log.is_file_hash_failed("first.pdf", "h1").await);
    }

    #[tokio::test]
    async fn keeps_at_most_five_archives() {
        let dir = tempdir().unwrap();
        let log = log_in(dir.path(), 1);

        for i in 0..8 {
            log.log_failure(Some(&format!("f{i}.pdf")), "bad", None, None, None)
                .await;
        }

        for i in 1..=5usize {
            assert!(
                dir.path().join(format!("failures.log.{i}")).exists(),
                "archive .{i} missing"
            );
        }
        assert!(!dir.path().join("failures.log.6").exists());
    }
}
