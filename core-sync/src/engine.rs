//! # Synchronization Engine
//!
//! Orchestrates the one-way mirror from a [`FileSource`] into an
//! [`IngestBackend`].
//!
//! ## Overview
//!
//! The engine reconciles three authorities:
//! - the live source listing (`name -> lastModified`),
//! - the persisted local state (`name -> {hash, lastModified, docId}`),
//! - the backend's document set, grouped by processing status.
//!
//! Uploads are processed asynchronously by the backend, so every accepted
//! submission is tracked in an in-memory pending-upload map until the
//! backend reports a terminal status. Deletes rejected with the backend's
//! transient "busy" condition are queued in a persisted pending-delete map
//! and retried at the start of every cycle.
//!
//! ## Ordering
//!
//! The backend deduplicates by presented file name, so a stale document must
//! be deleted before its replacement is uploaded. Within a tick the engine
//! therefore resolves, in order: pending deletes, pending uploads, new and
//! updated files, deleted files. A delete deferred as busy during an update
//! leaves `lastModified` untouched so the whole update is retried; a delete
//! deferred during a stale replacement carries `reuploadOnSuccess` so the
//! fresh upload follows the successful retry.
//!
//! ## Scheduling
//!
//! Single logical worker: startup reconciliation runs to completion before
//! the first poll tick, and each tick schedules the next one as a fixed
//! delay after it returns. Ticks never overlap.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use core_state::{FailureLog, FileState, PendingDelete, PendingUpload, StateStore};
use sync_traits::{DocumentInfo, FileSource, IngestBackend, Preprocessor};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SyncError};

/// Fallback failure reason when the backend reports no error message.
const BACKEND_FAILED_REASON: &str = "backend status: failed";

/// How aggressively the engine reconciles against the backend at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartupSync {
    /// Pre-populate local state from the source listing only.
    #[default]
    None,
    /// Additionally upload files that are missing or stale in the backend.
    Upload,
    /// Like `Upload`, and also delete backend duplicates and orphans.
    Full,
}

impl FromStr for StartupSync {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Ok(StartupSync::None),
            "upload" => Ok(StartupSync::Upload),
            "full" => Ok(StartupSync::Full),
            other => Err(format!(
                "unknown startup-sync mode '{other}', expected one of: none, upload, full"
            )),
        }
    }
}

impl fmt::Display for StartupSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupSync::None => write!(f, "none"),
            StartupSync::Upload => write!(f, "upload"),
            StartupSync::Full => write!(f, "full"),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fixed delay between poll ticks.
    pub poll_interval: Duration,

    /// Startup reconciliation mode.
    pub startup_sync: StartupSync,

    /// Delete terminally-failed documents from the backend after recording
    /// them in the failure log.
    pub cleanup_failed_docs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(60_000),
            startup_sync: StartupSync::None,
            cleanup_failed_docs: false,
        }
    }
}

/// Outcome of a single upload attempt.
///
/// `doc_id` is `None` when the backend has not resolved the document yet
/// (still pending) or when the upload was suppressed due to a previously
/// recorded failure of the same content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub hash: String,
    pub doc_id: Option<String>,
}

/// Outcome of one delete attempt against the backend.
enum DeleteOutcome {
    Deleted,
    Deferred,
    Failed,
}

#[derive(Default)]
struct StartupStats {
    uploaded: u32,
    deleted: u32,
    stale: u32,
}

/// The synchronization engine. One instance per process.
pub struct SyncEngine {
    source: Arc<dyn FileSource>,
    backend: Arc<dyn IngestBackend>,
    preprocessor: Arc<dyn Preprocessor>,
    store: Arc<StateStore>,
    failures: Arc<FailureLog>,
    config: EngineConfig,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn FileSource>,
        backend: Arc<dyn IngestBackend>,
        preprocessor: Arc<dyn Preprocessor>,
        store: Arc<StateStore>,
        failures: Arc<FailureLog>,
        config: EngineConfig,
    ) -> Self {
        Self {
            source,
            backend,
            preprocessor,
            store,
            failures,
            config,
        }
    }

    /// Runs the daemon loop: startup reconciliation once, then fixed-delay
    /// poll ticks until `shutdown` fires. A tick in progress is finished
    /// before the final state save.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.sync_on_startup().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
            self.poll().await;
        }

        info!("shutting down, saving state");
        self.save_state().await;
    }

    // ── Startup reconciliation ──────────────────────────────────────────

    /// Executed exactly once at process start, before the first poll tick.
    pub async fn sync_on_startup(&self) {
        info!(mode = %self.config.startup_sync, "startup sync");

        self.report_unlogged_failures().await;

        let listing = self.source.list_files().await;
        let listing_ok = listing.is_ok();
        let current_files: HashMap<String, i64> = match listing {
            Ok(files) => files
                .into_iter()
                .map(|f| (f.name, f.last_modified))
                .collect(),
            Err(e) => {
                error!(error = %e, "source listing failed at startup");
                HashMap::new()
            }
        };

        let mut persisted = self.store.load_snapshot().await;

        // Deletes deferred by a previous run are retried regardless of mode.
        self.retry_pending_deletes(Some(&current_files), Some(&mut persisted))
            .await;

        // Pre-populate file state: reuse the persisted entry verbatim when
        // lastModified is unchanged and a hash is known, otherwise keep only
        // the doc id binding and force a fresh hash.
        for (name, &last_modified) in &current_files {
            if self.store.entry(name).await.is_some() {
                // Already rebuilt by a re-upload following a deferred delete.
                continue;
            }
            match persisted.get(name) {
                Some(p) if p.last_modified == last_modified && p.hash.is_some() => {
                    self.store.put_entry(name, p.clone()).await;
                }
                other => {
                    self.store
                        .put_entry(
                            name,
                            FileState {
                                hash: None,
                                last_modified,
                                doc_id: other.and_then(|p| p.doc_id.clone()),
                            },
                        )
                        .await;
                }
            }
        }

        if matches!(self.config.startup_sync, StartupSync::None) {
            info!(
                files = current_files.len(),
                "startup sync disabled, file state pre-populated"
            );
            self.save_state().await;
            return;
        }

        if !listing_ok {
            warn!("skipping startup reconciliation, source listing failed");
            self.save_state().await;
            return;
        }

        let documents = match self.backend.documents().await {
            Ok(docs) => docs,
            Err(e) => {
                error!(error = %e, "failed to list backend documents, skipping startup reconciliation");
                self.save_state().await;
                return;
            }
        };
        let docs_with_path: Vec<DocumentInfo> = documents
            .into_iter()
            .filter(|d| d.file_path.is_some())
            .collect();

        // Bind each backend document to at most one source name via suffix
        // match; first match wins.
        let mut docs_by_source: HashMap<String, Vec<DocumentInfo>> = HashMap::new();
        for doc in &docs_with_path {
            let path = doc.file_path.as_deref().unwrap_or_default();
            if let Some(name) = current_files.keys().find(|n| path.ends_with(n.as_str())) {
                docs_by_source.entry(name.clone()).or_default().push(doc.clone());
            }
        }

        let mut stats = StartupStats::default();
        for name in current_files.keys() {
            let matches = docs_by_source.get(name).map(Vec::as_slice).unwrap_or(&[]);
            if let Err(e) = self.reconcile_source_file(name, matches, &mut stats).await {
                error!(file = %name, error = %e, "startup reconciliation failed");
            }
        }

        if matches!(self.config.startup_sync, StartupSync::Full) {
            for doc in &docs_with_path {
                let path = doc.file_path.as_deref().unwrap_or_default();
                if !current_files.keys().any(|n| path.ends_with(n.as_str())) {
                    if matches!(self.sync_delete(doc, "orphan").await, DeleteOutcome::Deleted) {
                        stats.deleted += 1;
                    }
                }
            }
        }

        info!(
            uploaded = stats.uploaded,
            stale = stats.stale,
            deleted = stats.deleted,
            deferred = self.store.pending_delete_count().await,
            "startup sync completed"
        );
        self.save_state().await;
    }

    /// Records failure-log lines for backend documents that failed while the
    /// daemon was not watching. Idempotent via the track-id dedup query.
    async fn report_unlogged_failures(&self) {
        let by_status = match self.backend.documents_by_status().await {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "could not check for unreported failures");
                return;
            }
        };
        let failed = by_status
            .iter()
            .find(|(status, _)| status.eq_ignore_ascii_case("failed"))
            .map(|(_, docs)| docs.as_slice())
            .unwrap_or(&[]);
        if failed.is_empty() {
            return;
        }

        let mut logged = 0u32;
        for doc in failed {
            if !self
                .failures
                .is_already_logged(doc.track_id.as_deref(), doc.created_at.as_deref())
                .await
            {
                let reason = doc
                    .error_msg
                    .clone()
                    .unwrap_or_else(|| BACKEND_FAILED_REASON.to_string());
                self.failures
                    .log_failure(
                        doc.file_path.as_deref(),
                        &reason,
                        doc.track_id.as_deref(),
                        None,
                        doc.created_at.as_deref(),
                    )
                    .await;
                logged += 1;
            }
            self.cleanup_failed_document(&doc.id).await;
        }
        if logged > 0 {
            info!(logged, "reported previously unlogged failures");
        }
    }

    /// Startup per-file reconciliation against the backend documents bound
    /// to `name`.
    async fn reconcile_source_file(
        &self,
        name: &str,
        matches: &[DocumentInfo],
        stats: &mut StartupStats,
    ) -> Result<()> {
        let Some(state) = self.store.entry(name).await else {
            return Ok(());
        };

        if matches.is_empty() {
            info!(file = %name, "startup upload, missing in backend");
            let result = self.download_and_upload(name).await?;
            self.store
                .put_entry(
                    name,
                    FileState {
                        hash: Some(result.hash),
                        last_modified: state.last_modified,
                        doc_id: result.doc_id,
                    },
                )
                .await;
            stats.uploaded += 1;
            return Ok(());
        }

        let mut downloaded: Option<PathBuf> = None;
        let local_hash = match state.hash.clone() {
            Some(hash) => {
                debug!(file = %name, "reusing persisted hash, last modified unchanged");
                hash
            }
            None => {
                let path = self.source.download(name).await?;
                match compute_file_hash(&path).await {
                    Ok(hash) => {
                        debug!(file = %name, "computed hash, file changed or no persisted state");
                        downloaded = Some(path);
                        hash
                    }
                    Err(e) => {
                        let _ = tokio::fs::remove_file(&path).await;
                        return Err(e.into());
                    }
                }
            }
        };

        let outcome = self
            .reconcile_with_matches(name, &state, matches, &local_hash, &mut downloaded, stats)
            .await;
        if let Some(path) = downloaded {
            let _ = tokio::fs::remove_file(&path).await;
        }
        outcome
    }

    async fn reconcile_with_matches(
        &self,
        name: &str,
        state: &FileState,
        matches: &[DocumentInfo],
        local_hash: &str,
        downloaded: &mut Option<PathBuf>,
        stats: &mut StartupStats,
    ) -> Result<()> {
        // Newest document wins among duplicates; missing timestamps sort
        // below everything via the empty-string floor.
        let Some(newest) = matches
            .iter()
            .max_by_key(|d| d.created_at.clone().unwrap_or_default())
        else {
            return Ok(());
        };

        // Without a doc id binding there is nothing trustworthy to compare
        // against, so the file is treated as stale and re-bound freshly.
        let hash_match = state.doc_id.is_some() && state.hash.as_deref() == Some(local_hash);

        if hash_match {
            debug!(file = %name, "startup ok, hash match");
            if matches!(self.config.startup_sync, StartupSync::Full) {
                for dup in matches {
                    if dup.id != newest.id {
                        if matches!(
                            self.sync_delete(dup, "duplicate").await,
                            DeleteOutcome::Deleted
                        ) {
                            stats.deleted += 1;
                        }
                    }
                }
            }
            self.store
                .put_entry(
                    name,
                    FileState {
                        hash: Some(local_hash.to_string()),
                        last_modified: state.last_modified,
                        doc_id: state.doc_id.clone(),
                    },
                )
                .await;
            return Ok(());
        }

        info!(file = %name, "startup stale, replacing backend copy");
        stats.stale += 1;
        let mut deferred = false;
        for doc in matches {
            match self.sync_delete(doc, "stale").await {
                DeleteOutcome::Deleted => stats.deleted += 1,
                DeleteOutcome::Deferred => {
                    deferred = true;
                    // Upgrade the queue entry: the replacement upload must
                    // follow the successful delete, not precede it.
                    self.store
                        .add_pending_delete(
                            &doc.id,
                            PendingDelete {
                                file_name: Some(name.to_string()),
                                reupload_on_success: true,
                            },
                        )
                        .await;
                }
                DeleteOutcome::Failed => {}
            }
        }
        if deferred {
            warn!(file = %name, "upload deferred until busy delete succeeds");
            return Ok(());
        }

        let temp = match downloaded.take() {
            Some(path) => path,
            None => self.source.download(name).await?,
        };
        let result = self
            .upload_from_temp(name, temp, Some(local_hash.to_string()))
            .await?;
        self.store
            .put_entry(
                name,
                FileState {
                    hash: Some(result.hash),
                    last_modified: state.last_modified,
                    doc_id: result.doc_id,
                },
            )
            .await;
        stats.uploaded += 1;
        Ok(())
    }

    /// Startup-invoked delete of one backend document. Busy deletes are
    /// queued without a file-name binding; orphans and duplicates need no
    /// follow-up once the delete goes through.
    async fn sync_delete(&self, doc: &DocumentInfo, reason: &str) -> DeleteOutcome {
        info!(
            reason,
            file_path = doc.file_path.as_deref().unwrap_or(""),
            doc_id = %doc.id,
            "startup delete"
        );
        match self.backend.delete_document(&doc.id).await {
            Ok(()) => DeleteOutcome::Deleted,
            Err(e) if e.is_busy() => {
                warn!(doc_id = %doc.id, "delete deferred, backend busy");
                self.store
                    .add_pending_delete(
                        &doc.id,
                        PendingDelete {
                            file_name: None,
                            reupload_on_success: false,
                        },
                    )
                    .await;
                DeleteOutcome::Deferred
            }
            Err(e) => {
                error!(doc_id = %doc.id, error = %e, "failed to delete document");
                DeleteOutcome::Failed
            }
        }
    }

    // ── Poll tick ───────────────────────────────────────────────────────

    /// One poll cycle. Ordering is significant: pending deletes resolve
    /// before pending uploads, which resolve before new/updated files,
    /// which resolve before deleted files.
    pub async fn poll(&self) {
        debug!("polling source");

        let mut changed = self.retry_pending_deletes(None, None).await;
        changed |= self.check_pending_uploads().await;

        let current_files: HashMap<String, i64> = match self.source.list_files().await {
            Ok(files) => files
                .into_iter()
                .map(|f| (f.name, f.last_modified))
                .collect(),
            Err(e) => {
                // Visibility lost: known files are only deleted when a
                // listing actually succeeded.
                error!(error = %e, "source listing failed, keeping known files");
                if changed {
                    self.save_state().await;
                }
                return;
            }
        };

        changed |= self.handle_new_and_updated(&current_files).await;
        changed |= self.handle_deleted(&current_files).await;

        if changed {
            self.save_state().await;
        }
    }

    /// Retries every queued delete. On success the file-state entry is
    /// dropped, and a queue entry carrying `reupload_on_success` triggers
    /// the replacement upload immediately, in the same cycle.
    ///
    /// At startup the caller passes the current listing (a re-upload only
    /// makes sense for a file that still exists) and the persisted snapshot
    /// (so a resolved entry is not resurrected by pre-population).
    async fn retry_pending_deletes(
        &self,
        current_files: Option<&HashMap<String, i64>>,
        mut persisted: Option<&mut HashMap<String, FileState>>,
    ) -> bool {
        let pending = self.store.pending_deletes().await;
        if pending.is_empty() {
            return false;
        }
        info!(count = pending.len(), "retrying pending deletes");

        let mut changed = false;
        for (doc_id, entry) in pending {
            match self.backend.delete_document(&doc_id).await {
                Ok(()) => {
                    info!(doc_id = %doc_id, "deferred delete succeeded");
                    self.store.remove_pending_delete(&doc_id).await;
                    changed = true;

                    let Some(name) = entry.file_name else {
                        continue;
                    };
                    let prior = self.store.entry(&name).await;
                    self.store.remove_entry(&name).await;
                    let persisted_prior =
                        persisted.as_mut().and_then(|map| map.remove(&name));

                    if entry.reupload_on_success {
                        let in_listing =
                            current_files.map_or(true, |map| map.contains_key(&name));
                        if !in_listing {
                            debug!(file = %name, "skipping re-upload, file no longer in source");
                            continue;
                        }
                        let last_modified = prior
                            .map(|s| s.last_modified)
                            .or_else(|| {
                                current_files.and_then(|map| map.get(&name).copied())
                            })
                            .or(persisted_prior.map(|s| s.last_modified))
                            .unwrap_or(0);
                        if let Err(e) = self.reupload(&name, last_modified).await {
                            error!(file = %name, error = %e, "re-upload after deferred delete failed");
                        }
                    }
                }
                Err(e) if e.is_busy() => {
                    warn!(doc_id = %doc_id, "deferred delete still busy");
                }
                Err(e) => {
                    error!(doc_id = %doc_id, error = %e, "deferred delete failed, giving up");
                    self.store.remove_pending_delete(&doc_id).await;
                    if let Some(name) = &entry.file_name {
                        self.store.remove_entry(name).await;
                        if let Some(map) = persisted.as_mut() {
                            map.remove(name);
                        }
                    }
                    changed = true;
                }
            }
        }
        changed
    }

    /// Runs the upload subroutine for a file whose deferred delete just
    /// succeeded, and records a fresh file-state entry.
    async fn reupload(&self, name: &str, last_modified: i64) -> Result<()> {
        info!(file = %name, "re-uploading after deferred delete");
        let result = self.download_and_upload(name).await?;
        self.store
            .put_entry(
                name,
                FileState {
                    hash: Some(result.hash),
                    last_modified,
                    doc_id: result.doc_id,
                },
            )
            .await;
        Ok(())
    }

    /// Resolves pending uploads against one backend listing. Terminal
    /// statuses drop the queue entry; anything else is checked again on the
    /// next cycle.
    async fn check_pending_uploads(&self) -> bool {
        let pending = self.store.pending_uploads().await;
        if pending.is_empty() {
            return false;
        }
        info!(count = pending.len(), "checking pending uploads");

        let by_status = match self.backend.documents_by_status().await {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "failed to fetch document statuses for pending upload check");
                return false;
            }
        };

        let mut changed = false;
        for (track_id, upload) in pending {
            let found = by_status.iter().find_map(|(status, docs)| {
                docs.iter()
                    .find(|d| d.track_id.as_deref() == Some(track_id.as_str()))
                    .map(|d| (status.as_str(), d))
            });

            match found {
                Some((status, doc)) if status.eq_ignore_ascii_case("processed") => {
                    info!(file = %upload.file_name, doc_id = %doc.id, "pending upload processed");
                    if let Some(state) = self.store.entry(&upload.file_name).await {
                        self.store
                            .put_entry(
                                &upload.file_name,
                                FileState {
                                    hash: state.hash,
                                    last_modified: state.last_modified,
                                    doc_id: Some(doc.id.clone()),
                                },
                            )
                            .await;
                        changed = true;
                    }
                    self.store.remove_pending_upload(&track_id).await;
                }
                Some((status, doc)) if status.eq_ignore_ascii_case("failed") => {
                    let reason = doc
                        .error_msg
                        .clone()
                        .unwrap_or_else(|| BACKEND_FAILED_REASON.to_string());
                    error!(
                        file = %upload.file_name,
                        track_id = %track_id,
                        reason = %reason,
                        "upload failed in backend"
                    );
                    self.failures
                        .log_failure(
                            Some(upload.file_name.as_str()),
                            &reason,
                            Some(track_id.as_str()),
                            Some(upload.hash.as_str()),
                            doc.created_at.as_deref(),
                        )
                        .await;
                    self.cleanup_failed_document(&doc.id).await;
                    self.store.remove_pending_upload(&track_id).await;
                }
                None => {
                    warn!(
                        file = %upload.file_name,
                        track_id = %track_id,
                        "pending upload not found in backend"
                    );
                    self.failures
                        .log_failure(
                            Some(upload.file_name.as_str()),
                            "document not found in backend after upload",
                            Some(track_id.as_str()),
                            Some(upload.hash.as_str()),
                            None,
                        )
                        .await;
                    self.store.remove_pending_upload(&track_id).await;
                }
                Some(_) => {
                    // Still processing; resume on the next cycle.
                }
            }
        }
        changed
    }

    async fn handle_new_and_updated(&self, current_files: &HashMap<String, i64>) -> bool {
        let mut changed = false;
        for (name, &last_modified) in current_files {
            match self.process_source_file(name, last_modified).await {
                Ok(file_changed) => changed |= file_changed,
                Err(e) if e.is_busy() => {
                    // lastModified stays untouched so the next tick retries
                    // the whole update; the doc id is already queued.
                    warn!(file = %name, "update deferred, backend busy");
                }
                Err(e) => {
                    error!(file = %name, error = %e, "failed to process file");
                    let state_hash = self.store.entry(name).await.and_then(|s| s.hash);
                    self.failures
                        .log_failure(
                            Some(name.as_str()),
                            &e.to_string(),
                            None,
                            state_hash.as_deref(),
                            None,
                        )
                        .await;
                }
            }
        }
        changed
    }

    async fn process_source_file(&self, name: &str, last_modified: i64) -> Result<bool> {
        match self.store.entry(name).await {
            None => {
                info!(file = %name, "create");
                let result = self.download_and_upload(name).await?;
                self.store
                    .put_entry(
                        name,
                        FileState {
                            hash: Some(result.hash),
                            last_modified,
                            doc_id: result.doc_id,
                        },
                    )
                    .await;
                Ok(true)
            }
            Some(state) if state.last_modified != last_modified => {
                info!(file = %name, "update, replacing backend copy");
                self.delete_by_doc_id(name).await?;
                let result = self.download_and_upload(name).await?;
                self.store
                    .put_entry(
                        name,
                        FileState {
                            hash: Some(result.hash),
                            last_modified,
                            doc_id: result.doc_id,
                        },
                    )
                    .await;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    async fn handle_deleted(&self, current_files: &HashMap<String, i64>) -> bool {
        let removed: Vec<String> = self
            .store
            .file_names()
            .await
            .into_iter()
            .filter(|name| !current_files.contains_key(name))
            .collect();

        let mut changed = false;
        for name in removed {
            info!(file = %name, "delete");
            match self.delete_by_doc_id(&name).await {
                Ok(()) => {
                    self.store.remove_entry(&name).await;
                    changed = true;
                }
                Err(e) if e.is_busy() => {
                    // Keep the entry; the pending-delete queue follows up.
                    warn!(file = %name, "delete deferred, backend busy");
                }
                Err(e) => {
                    // Dropping the entry anyway avoids a permanently stuck name.
                    error!(file = %name, error = %e, "failed to delete");
                    self.store.remove_entry(&name).await;
                    changed = true;
                }
            }
        }
        changed
    }

    /// Deletes the backend document bound to `name`. Falls back to a
    /// file-path search for entries persisted before the doc id binding
    /// existed. A busy response queues the delete and re-raises so the
    /// caller does not advance `lastModified`.
    async fn delete_by_doc_id(&self, name: &str) -> Result<()> {
        let doc_id = self.store.entry(name).await.and_then(|s| s.doc_id);

        if let Some(doc_id) = doc_id {
            return match self.backend.delete_document(&doc_id).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_busy() => {
                    self.store
                        .add_pending_delete(
                            &doc_id,
                            PendingDelete {
                                file_name: Some(name.to_string()),
                                reupload_on_success: false,
                            },
                        )
                        .await;
                    Err(e.into())
                }
                Err(e) => Err(e.into()),
            };
        }

        debug!(file = %name, "no doc id in state, searching backend by file path");
        let documents = self.backend.documents().await.map_err(SyncError::from)?;
        let Some(doc) = documents
            .into_iter()
            .find(|d| d.file_path.as_deref().is_some_and(|p| p.ends_with(name)))
        else {
            warn!(file = %name, "document not found in backend");
            return Ok(());
        };
        match self.backend.delete_document(&doc.id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_busy() => {
                self.store
                    .add_pending_delete(
                        &doc.id,
                        PendingDelete {
                            file_name: Some(name.to_string()),
                            reupload_on_success: false,
                        },
                    )
                    .await;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    // ── Upload subroutine ───────────────────────────────────────────────

    /// Downloads `name` and runs the upload pipeline on it.
    async fn download_and_upload(&self, name: &str) -> Result<UploadResult> {
        let temp = self.source.download(name).await?;
        self.upload_from_temp(name, temp, None).await
    }

    /// Runs the upload pipeline on an already-downloaded temp file, taking
    /// ownership of it: the temp is deleted on every exit path (a rename
    /// into the upload path counts as deletion of the original).
    async fn upload_from_temp(
        &self,
        name: &str,
        temp: PathBuf,
        known_hash: Option<String>,
    ) -> Result<UploadResult> {
        let result = self.upload_pipeline(name, &temp, known_hash).await;
        let _ = tokio::fs::remove_file(&temp).await;
        result
    }

    async fn upload_pipeline(
        &self,
        name: &str,
        temp: &Path,
        known_hash: Option<String>,
    ) -> Result<UploadResult> {
        // Content identity is the hash of the ORIGINAL download, stable
        // against preprocessor changes.
        let hash = match known_hash {
            Some(hash) => hash,
            None => compute_file_hash(temp).await?,
        };

        if self.failures.is_file_hash_failed(name, &hash).await {
            warn!(file = %name, hash = %hash, "content previously failed, skipping upload");
            return Ok(UploadResult { hash, doc_id: None });
        }

        let processed = self.preprocessor.process(temp, name).await?;

        // Present the original file name to the backend. The rename
        // transfers ownership of the processed file to the upload path.
        let upload_path = processed.with_file_name(name);
        if let Err(e) = tokio::fs::rename(&processed, &upload_path).await {
            if processed != temp {
                let _ = tokio::fs::remove_file(&processed).await;
            }
            return Err(e.into());
        }

        let outcome = self.submit_upload(name, &hash, &upload_path).await;
        let _ = tokio::fs::remove_file(&upload_path).await;
        outcome.map(|doc_id| UploadResult { hash, doc_id })
    }

    async fn submit_upload(
        &self,
        name: &str,
        hash: &str,
        upload_path: &Path,
    ) -> Result<Option<String>> {
        let track_id = self
            .backend
            .upload(upload_path)
            .await
            .map_err(SyncError::from)?;
        match &track_id {
            Some(track_id) => {
                self.store
                    .add_pending_upload(
                        track_id,
                        PendingUpload {
                            file_name: name.to_string(),
                            hash: hash.to_string(),
                            uploaded_at: Utc::now(),
                        },
                    )
                    .await;
            }
            None => {
                warn!(file = %name, "backend accepted upload without a track id");
            }
        }

        let doc_id = self.resolve_doc_id(track_id.as_deref(), name, Some(hash)).await;
        if let (Some(_), Some(track_id)) = (&doc_id, &track_id) {
            // Resolved synchronously; nothing left to poll for.
            self.store.remove_pending_upload(track_id).await;
        }
        Ok(doc_id)
    }

    /// Resolves the backend doc id for a fresh upload: the failed bucket is
    /// checked first (recording the failure idempotently), then a track-id
    /// match across all buckets, then a file-path suffix match as fallback.
    async fn resolve_doc_id(
        &self,
        track_id: Option<&str>,
        name: &str,
        hash: Option<&str>,
    ) -> Option<String> {
        let by_status = match self.backend.documents_by_status().await {
            Ok(map) => map,
            Err(e) => {
                warn!(file = %name, error = %e, "failed to resolve document id");
                return None;
            }
        };

        if let Some(track_id) = track_id {
            let failed = by_status
                .iter()
                .find(|(status, _)| status.eq_ignore_ascii_case("failed"))
                .map(|(_, docs)| docs.as_slice())
                .unwrap_or(&[]);
            if let Some(doc) = failed
                .iter()
                .find(|d| d.track_id.as_deref() == Some(track_id))
            {
                let reason = doc
                    .error_msg
                    .clone()
                    .unwrap_or_else(|| BACKEND_FAILED_REASON.to_string());
                error!(
                    file = %name,
                    track_id = %track_id,
                    reason = %reason,
                    "upload immediately failed in backend"
                );
                self.failures
                    .log_failure(
                        Some(name),
                        &reason,
                        Some(track_id),
                        hash,
                        doc.created_at.as_deref(),
                    )
                    .await;
                self.cleanup_failed_document(&doc.id).await;
                self.store.remove_pending_upload(track_id).await;
                return None;
            }
        }

        let all: Vec<&DocumentInfo> = by_status.values().flatten().collect();
        if let Some(track_id) = track_id {
            if let Some(doc) = all
                .iter()
                .find(|d| d.track_id.as_deref() == Some(track_id))
            {
                debug!(file = %name, doc_id = %doc.id, "resolved document id by track id");
                return Some(doc.id.clone());
            }
        }
        if let Some(doc) = all
            .iter()
            .find(|d| d.file_path.as_deref().is_some_and(|p| p.ends_with(name)))
        {
            debug!(file = %name, doc_id = %doc.id, "resolved document id by file path");
            return Some(doc.id.clone());
        }
        debug!(file = %name, "could not resolve document id yet");
        None
    }

    async fn cleanup_failed_document(&self, doc_id: &str) {
        if !self.config.cleanup_failed_docs {
            return;
        }
        match self.backend.delete_document(doc_id).await {
            Ok(()) => debug!(doc_id = %doc_id, "removed failed document from backend"),
            Err(e) => warn!(doc_id = %doc_id, error = %e, "failed to remove failed document"),
        }
    }

    async fn save_state(&self) {
        if let Err(e) = self.store.save().await {
            warn!(error = %e, "failed to save state file");
        }
    }
}

/// Streams the file through MD5 and returns the lowercase hex digest.
pub async fn compute_file_hash(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }
    Ok(format!("{:x}", context.compute()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_sync_parses_case_insensitively() {
        assert_eq!("none".parse::<StartupSync>().unwrap(), StartupSync::None);
        assert_eq!("Upload".parse::<StartupSync>().unwrap(), StartupSync::Upload);
        assert_eq!("FULL".parse::<StartupSync>().unwrap(), StartupSync::Full);
        assert!("mirror".parse::<StartupSync>().is_err());
    }

    #[test]
    fn startup_sync_round_trips_through_display() {
        for mode in [StartupSync::None, StartupSync::Upload, StartupSync::Full] {
            assert_eq!(mode.to_string().parse::<StartupSync>().unwrap(), mode);
        }
    }

    #[tokio::test]
    async fn compute_file_hash_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();
        assert_eq!(
            compute_file_hash(&path).await.unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }
}
