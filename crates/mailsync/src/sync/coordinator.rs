//! Drives the request/response loop for one folder.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::SyncSettings;
use crate::error::ErrorClass;
use crate::model::{FolderRef, SyncBatch, SyncCursor};
use crate::store::LocalStore;
use crate::transport::{BatchRequest, ResponseStatus, SyncResponse, SyncTransport};

use super::error::SyncError;
use super::full_resync::FullResyncReconciler;
use super::gate::FolderKey;
use super::reconciler::{BatchReconciler, ReconcileContext};
use super::retry::{with_timeout, RetryPolicy};
use super::SyncCoordination;

/// Phase of a synchronize call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Following an existing cursor.
    #[default]
    Incremental,
    /// Re-deriving server state from the initial cursor.
    FullResyncCollecting,
    /// Full resync drained; removing orphans.
    FullResyncReconciling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSyncRequest {
    pub account: String,
    pub folder: FolderRef,
    pub force_full_resync: bool,
    /// Apply server state even over records edited moments ago.
    pub skip_guard: bool,
}

impl FolderSyncRequest {
    pub fn new(account: impl Into<String>, folder: FolderRef) -> Self {
        Self {
            account: account.into(),
            folder,
            force_full_resync: false,
            skip_guard: false,
        }
    }

    pub fn full_resync(mut self) -> Self {
        self.force_full_resync = true;
        self
    }

    pub fn skipping_guard(mut self) -> Self {
        self.skip_guard = true;
        self
    }
}

/// Result of a synchronize call that applied its work, fully or partly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub items_applied: usize,
    pub mode: SyncMode,
    /// The loop stopped before the server reported no more data.
    pub partial: bool,
    pub cursor: SyncCursor,
    /// Classified error that ended the call after some items were applied.
    pub failure: Option<String>,
    pub orphans_removed: usize,
    pub batches: u32,
    /// The cursor was found invalid and the call restarted from scratch.
    pub restarted: bool,
}

#[derive(Debug, Default)]
struct Progress {
    mode: SyncMode,
    /// Last cursor known to be persisted.
    cursor: Option<SyncCursor>,
    items_applied: usize,
    orphans_removed: usize,
    batches: u32,
    restarted: bool,
}

pub struct FolderSyncCoordinator {
    settings: SyncSettings,
    coordination: SyncCoordination,
    transport: Arc<dyn SyncTransport>,
    store: Arc<dyn LocalStore>,
    reconciler: BatchReconciler,
    orphans: FullResyncReconciler,
    retry: RetryPolicy,
}

impl FolderSyncCoordinator {
    pub fn new(
        settings: SyncSettings,
        coordination: SyncCoordination,
        transport: Arc<dyn SyncTransport>,
        store: Arc<dyn LocalStore>,
    ) -> Self {
        let reconciler = BatchReconciler::from_settings(&settings);
        Self {
            orphans: FullResyncReconciler::new(*reconciler.guard()),
            retry: RetryPolicy::from_settings(&settings.retry),
            reconciler,
            settings,
            coordination,
            transport,
            store,
        }
    }

    pub fn coordination(&self) -> &SyncCoordination {
        &self.coordination
    }

    /// Synchronizes one folder.
    ///
    /// Fails with [`SyncError::InProgress`] if the folder is already being
    /// synchronized anywhere in the process. A failure after some items
    /// were applied is reported as a partial outcome, not an error.
    pub async fn synchronize(&self, request: FolderSyncRequest) -> Result<SyncOutcome, SyncError> {
        let span = tracing::info_span!(
            "folder_sync",
            account = %request.account,
            folder = %request.folder.id
        );
        self.run(&request).instrument(span).await
    }

    async fn run(&self, request: &FolderSyncRequest) -> Result<SyncOutcome, SyncError> {
        let key = FolderKey::new(request.account.clone(), request.folder.id.clone());
        let gate = &self.settings.gate;
        let _lease = self
            .coordination
            .gate
            .acquire(key, gate.wait(), gate.poll_interval())
            .await
            .ok_or_else(|| {
                tracing::info!("Sync skipped: folder already being synchronized");
                SyncError::InProgress {
                    folder: request.folder.id.clone(),
                }
            })?;

        let mut progress = Progress::default();
        let mut force_full = request.force_full_resync;

        let error = loop {
            match self.pass(request, force_full, &mut progress).await {
                Ok(outcome) => {
                    tracing::info!(
                        items = outcome.items_applied,
                        batches = outcome.batches,
                        partial = outcome.partial,
                        orphans = outcome.orphans_removed,
                        cursor = %outcome.cursor,
                        "Folder sync finished"
                    );
                    return Ok(outcome);
                }
                Err(e) if e.class() == ErrorClass::InvalidCursor && !progress.restarted => {
                    tracing::warn!("Invalid cursor, restarting with a full resync");
                    progress.restarted = true;
                    force_full = true;
                    let reset = SyncCursor::initial();
                    if let Err(e) =
                        self.store
                            .save_cursor(&request.account, &request.folder.id, &reset)
                    {
                        break SyncError::from(e);
                    }
                    progress.cursor = Some(reset);
                }
                Err(e) if e.class() == ErrorClass::InvalidCursor => {
                    break SyncError::CursorResetExhausted {
                        folder: request.folder.id.clone(),
                    };
                }
                Err(e) => break e,
            }
        };

        if progress.items_applied == 0 {
            tracing::warn!(error = %error, "Folder sync failed");
            return Err(error);
        }

        tracing::warn!(
            error = %error,
            items = progress.items_applied,
            "Folder sync failed after applying items"
        );
        let cursor = progress.cursor.clone().unwrap_or_default();
        Ok(SyncOutcome {
            items_applied: progress.items_applied,
            mode: progress.mode,
            partial: true,
            cursor,
            failure: Some(error.classified()),
            orphans_removed: progress.orphans_removed,
            batches: progress.batches,
            restarted: progress.restarted,
        })
    }

    async fn pass(
        &self,
        request: &FolderSyncRequest,
        force_full: bool,
        progress: &mut Progress,
    ) -> Result<SyncOutcome, SyncError> {
        let account = request.account.as_str();
        let folder = &request.folder;

        let mut cursor = if force_full {
            SyncCursor::initial()
        } else {
            self.store.load_cursor(account, &folder.id)?
        };
        if !force_full {
            progress.cursor = Some(cursor.clone());
        }
        let full = cursor.is_initial();
        progress.mode = if full {
            SyncMode::FullResyncCollecting
        } else {
            SyncMode::Incremental
        };
        let budget = if full {
            self.settings.full_resync
        } else {
            self.settings.incremental
        };
        let started = Instant::now();
        let mut seen = HashSet::new();

        if full {
            let response = self.fetch(folder, &cursor).await?;
            if response.cursor.is_initial() {
                return Err(SyncError::MissingCursor {
                    folder: folder.id.clone(),
                });
            }
            self.apply_batch(request, &response.batch, &mut seen, progress)?;
            self.store.save_cursor(account, &folder.id, &response.cursor)?;
            cursor = response.cursor;
            progress.cursor = Some(cursor.clone());
            tracing::debug!(cursor = %cursor, "Cursor initialized");
            self.settle().await;
        }

        let mut iterations = 0;
        let mut unchanged = 0;
        let mut complete = false;
        loop {
            if iterations >= budget.max_iterations {
                tracing::info!(iterations, "Iteration budget exhausted");
                break;
            }
            if started.elapsed() >= budget.max_duration() {
                tracing::info!(iterations, "Time budget exhausted");
                break;
            }
            iterations += 1;

            let response = self.fetch(folder, &cursor).await?;
            self.apply_batch(request, &response.batch, &mut seen, progress)?;

            if response.cursor == cursor {
                unchanged += 1;
            } else {
                self.store.save_cursor(account, &folder.id, &response.cursor)?;
                cursor = response.cursor;
                progress.cursor = Some(cursor.clone());
                unchanged = 0;
            }

            if !response.more_available {
                complete = true;
                break;
            }
            if unchanged >= self.settings.stuck_cursor_threshold {
                tracing::warn!(cursor = %cursor, unchanged, "Cursor stuck, stopping");
                break;
            }
        }

        if full && complete {
            progress.mode = SyncMode::FullResyncReconciling;
            let items = self.store.items_in_folder(account, &folder.id)?;
            let (plan, report) = self.orphans.reconcile(items, &seen, Utc::now());
            if !plan.is_empty() {
                self.store.apply_plan(account, &plan)?;
                self.store.refresh_counters(account, &folder.id)?;
            }
            tracing::info!(
                orphans = report.orphans_removed,
                merged = report.payloads_merged,
                deferred = report.deferred,
                kept_local = report.kept_local,
                "Full resync reconciled"
            );
            progress.orphans_removed += report.orphans_removed;
        }

        Ok(SyncOutcome {
            items_applied: progress.items_applied,
            mode: progress.mode,
            partial: !complete,
            cursor,
            failure: None,
            orphans_removed: progress.orphans_removed,
            batches: progress.batches,
            restarted: progress.restarted,
        })
    }

    /// Reconciles one batch and applies it in a single store transaction.
    /// The caller persists the cursor only after this returns.
    fn apply_batch(
        &self,
        request: &FolderSyncRequest,
        batch: &SyncBatch,
        seen: &mut HashSet<String>,
        progress: &mut Progress,
    ) -> Result<(), SyncError> {
        progress.batches += 1;
        if batch.is_empty() {
            return Ok(());
        }

        let account = request.account.as_str();
        let ctx = ReconcileContext {
            account,
            folder: &request.folder,
            store: self.store.as_ref(),
            tombstones: &self.coordination.tombstones,
            pending: &self.coordination.pending,
            skip_guard: request.skip_guard,
            now: Utc::now(),
        };
        let plan = self.reconciler.reconcile(&ctx, batch)?;
        seen.extend(plan.seen.iter().cloned());

        if !plan.is_empty() {
            match self.store.apply_plan(account, &plan) {
                Ok(applied) => progress.items_applied += applied.total(),
                Err(e) => {
                    for (key, payload) in plan.claimed {
                        self.coordination.pending.stash(key, payload);
                    }
                    return Err(e.into());
                }
            }
        }

        let tombstones = &self.coordination.tombstones;
        tombstones.confirm(&plan.confirmed_tombstones);
        for (from, to) in &plan.retargeted_tombstones {
            tombstones.retarget(from, to.clone());
        }
        self.store.refresh_counters(account, &request.folder.id)?;
        Ok(())
    }

    /// One transport round trip, bounded by the request timeout and retried
    /// on transient failures. Non-success statuses become errors.
    async fn fetch(&self, folder: &FolderRef, cursor: &SyncCursor) -> Result<SyncResponse, SyncError> {
        let timeout = self.settings.request_timeout();
        self.retry
            .run("sync request", || {
                let call = self.transport.sync(BatchRequest {
                    folder_server_id: folder.server_id.clone(),
                    cursor: cursor.clone(),
                    window_size: self.settings.window_size,
                    include_full_content: self.settings.include_full_content,
                });
                let folder_id = folder.id.clone();
                async move {
                    let response = with_timeout(timeout, call).await?;
                    match response.status {
                        ResponseStatus::Success => Ok(response),
                        ResponseStatus::InvalidCursor => {
                            Err(SyncError::InvalidCursor { folder: folder_id })
                        }
                        ResponseStatus::TransientError => {
                            Err(SyncError::ServerBusy { folder: folder_id })
                        }
                        ResponseStatus::FatalError => {
                            Err(SyncError::ServerFatal { folder: folder_id })
                        }
                    }
                }
            })
            .await
    }

    async fn settle(&self) {
        let delay = self.settings.server_settle_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
