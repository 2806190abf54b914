//! Persisted synchronization state.
//!
//! The store holds three maps. Two of them survive restarts in a single JSON
//! snapshot; pending uploads deliberately do not, because they can be
//! rebuilt from the backend's document listing at the next startup.
//!
//! Snapshot format:
//!
//! ```json
//! {
//!   "files":          { "<fileName>": { "hash": "...", "lastModified": 0, "docId": "..." } },
//!   "pendingDeletes": { "<docId>":    { "fileName": "...", "reuploadOnSuccess": false } }
//! }
//! ```
//!
//! The legacy format (a flat map of file entries at the document root) is
//! loaded transparently. Saving always writes the new format, atomically:
//! serialize to a sibling temp path, then rename into place.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::Result;

/// Per-file record.
///
/// If `hash` is `None` the file has been observed but its content has not
/// been uploaded (or the upload is not yet confirmed for this content). If
/// `hash` is set, it is the MD5 of the source content for which `doc_id`
/// (when set) holds in the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileState {
    pub hash: Option<String>,
    pub last_modified: i64,
    pub doc_id: Option<String>,
}

/// A backend document whose delete was deferred because the backend was
/// busy.
///
/// `file_name` is `None` for orphan/duplicate deletes issued during startup
/// reconciliation, where no follow-up action is needed once the delete goes
/// through. `reupload_on_success` marks a delete that was part of a stale
/// update: uploading the replacement immediately would collide with the
/// still-present name, so the fresh upload must follow a successful delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDelete {
    pub file_name: Option<String>,
    pub reupload_on_success: bool,
}

/// An upload awaiting a terminal status from the backend. In-memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpload {
    pub file_name: String,
    pub hash: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedState<'a> {
    files: BTreeMap<&'a str, &'a FileState>,
    pending_deletes: BTreeMap<&'a str, &'a PendingDelete>,
}

#[derive(Default)]
struct Inner {
    files: HashMap<String, FileState>,
    pending_deletes: HashMap<String, PendingDelete>,
    pending_uploads: HashMap<String, PendingUpload>,
}

/// Thread-safe state store persisted as a single snapshot document.
pub struct StateStore {
    state_file: PathBuf,
    inner: Mutex<Inner>,
}

impl StateStore {
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Loads the persisted snapshot from disk.
    ///
    /// Pending deletes are installed directly into the live store; the file
    /// entries are returned as an independent snapshot and NOT merged; the
    /// engine decides which entries to retain. A missing, corrupt, or
    /// unreadable state file yields an empty snapshot.
    pub async fn load_snapshot(&self) -> HashMap<String, FileState> {
        let bytes = match tokio::fs::read(&self.state_file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.state_file.display(), "no persisted state file found");
                return HashMap::new();
            }
            Err(e) => {
                warn!(path = %self.state_file.display(), error = %e, "failed to read state file");
                return HashMap::new();
            }
        };

        let root: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(root) => root,
            Err(e) => {
                warn!(path = %self.state_file.display(), error = %e, "failed to parse state file");
                return HashMap::new();
            }
        };

        if root.get("files").is_some() {
            self.load_wrapped_snapshot(root).await
        } else {
            // Legacy format: flat map of file entries at the document root.
            match serde_json::from_value::<HashMap<String, FileState>>(root) {
                Ok(files) => {
                    info!(entries = files.len(), "loaded persisted state (legacy format)");
                    files
                }
                Err(e) => {
                    warn!(error = %e, "failed to parse legacy state file");
                    HashMap::new()
                }
            }
        }
    }

    async fn load_wrapped_snapshot(
        &self,
        mut root: serde_json::Value,
    ) -> HashMap<String, FileState> {
        let files = match serde_json::from_value::<HashMap<String, FileState>>(
            root["files"].take(),
        ) {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "failed to parse file entries in state file");
                return HashMap::new();
            }
        };

        if let Some(raw) = root.get_mut("pendingDeletes") {
            match serde_json::from_value::<HashMap<String, PendingDelete>>(raw.take()) {
                Ok(pending) => {
                    if !pending.is_empty() {
                        info!(count = pending.len(), "loaded pending deletes from state file");
                    }
                    self.inner.lock().await.pending_deletes.extend(pending);
                }
                Err(e) => {
                    warn!(error = %e, "failed to parse pending deletes in state file");
                }
            }
        }

        info!(entries = files.len(), path = %self.state_file.display(), "loaded persisted state");
        files
    }

    /// Serializes the current file entries and pending deletes atomically:
    /// write to a sibling temp path, then rename into place.
    pub async fn save(&self) -> Result<()> {
        let json = {
            let inner = self.inner.lock().await;
            let state = PersistedState {
                files: inner
                    .files
                    .iter()
                    .map(|(name, entry)| (name.as_str(), entry))
                    .collect(),
                pending_deletes: inner
                    .pending_deletes
                    .iter()
                    .map(|(doc_id, entry)| (doc_id.as_str(), entry))
                    .collect(),
            };
            serde_json::to_vec_pretty(&state)?
        };

        if let Some(parent) = self.state_file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let temp_path = sibling_temp_path(&self.state_file);
        tokio::fs::write(&temp_path, &json).await?;
        tokio::fs::rename(&temp_path, &self.state_file).await?;
        Ok(())
    }

    // ── File entries ────────────────────────────────────────────────────

    pub async fn entry(&self, file_name: &str) -> Option<FileState> {
        self.inner.lock().await.files.get(file_name).cloned()
    }

    pub async fn put_entry(&self, file_name: &str, entry: FileState) {
        self.inner
            .lock()
            .await
            .files
            .insert(file_name.to_string(), entry);
    }

    pub async fn remove_entry(&self, file_name: &str) {
        self.inner.lock().await.files.remove(file_name);
    }

    pub async fn file_names(&self) -> Vec<String> {
        self.inner.lock().await.files.keys().cloned().collect()
    }

    pub async fn file_count(&self) -> usize {
        self.inner.lock().await.files.len()
    }

    // ── Pending deletes ─────────────────────────────────────────────────

    pub async fn pending_deletes(&self) -> HashMap<String, PendingDelete> {
        self.inner.lock().await.pending_deletes.clone()
    }

    pub async fn pending_delete_count(&self) -> usize {
        self.inner.lock().await.pending_deletes.len()
    }

    pub async fn add_pending_delete(&self, doc_id: &str, entry: PendingDelete) {
        self.inner
            .lock()
            .await
            .pending_deletes
            .insert(doc_id.to_string(), entry);
    }

    pub async fn remove_pending_delete(&self, doc_id: &str) {
        self.inner.lock().await.pending_deletes.remove(doc_id);
    }

    // ── Pending uploads (in-memory only) ────────────────────────────────

    pub async fn pending_uploads(&self) -> HashMap<String, PendingUpload> {
        self.inner.lock().await.pending_uploads.clone()
    }

    pub async fn add_pending_upload(&self, track_id: &str, upload: PendingUpload) {
        self.inner
            .lock()
            .await
            .pending_uploads
            .insert(track_id.to_string(), upload);
    }

    pub async fn remove_pending_upload(&self, track_id: &str) {
        self.inner.lock().await.pending_uploads.remove(track_id);
    }
}

fn sibling_temp_path(state_file: &Path) -> PathBuf {
    let mut name = state_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state.json".to_string());
    name.push_str(".tmp");
    state_file.with_file_name(name)
}
