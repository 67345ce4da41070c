//! The synchronization engine.
//!
//! [`SyncCoordination`] is the state shared by every synchronization
//! trigger in the process: the folder gate, the tombstone registry and the
//! pending-restore cache. Build it once and hand it to each coordinator.

pub mod coordinator;
pub mod drafts;
pub mod error;
pub mod full_resync;
pub mod gate;
pub mod guard;
pub mod pending_restore;
pub mod reconciler;
pub mod retry;
pub mod tombstone;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::SyncSettings;
use crate::db::{Database, DatabaseError};

pub use coordinator::{FolderSyncCoordinator, FolderSyncRequest, SyncMode, SyncOutcome};
pub use drafts::{DraftMigrator, DraftState, IdResolver, ResolverChain};
pub use error::SyncError;
pub use full_resync::{FullResyncReconciler, FullResyncReport};
pub use gate::{FolderGate, FolderKey, FolderLease};
pub use guard::{ChangeVerdict, RecentEditGuard};
pub use pending_restore::{PendingRestoreCache, RestoreKey, RestorePayload};
pub use reconciler::{BatchReconciler, Migration, MigrationReason, ReconcilePlan};
pub use retry::RetryPolicy;
pub use tombstone::TombstoneRegistry;

/// Process-wide coordination state. Clones share everything.
#[derive(Clone)]
pub struct SyncCoordination {
    pub gate: FolderGate,
    pub tombstones: Arc<TombstoneRegistry>,
    pub pending: Arc<PendingRestoreCache>,
}

impl SyncCoordination {
    /// In-memory coordination; tombstones do not survive a restart.
    pub fn new(settings: &SyncSettings) -> Self {
        Self {
            gate: FolderGate::new(),
            tombstones: Arc::new(TombstoneRegistry::new(settings.tombstones.ceiling)),
            pending: Arc::new(pending_cache(settings)),
        }
    }

    /// Coordination whose tombstones are loaded from and mirrored to `db`.
    pub fn with_database(settings: &SyncSettings, db: Database) -> Result<Self, DatabaseError> {
        let tombstones = TombstoneRegistry::load(db, settings.tombstones.ceiling)?;
        tracing::info!(count = tombstones.len(), "Loaded persisted tombstones");
        Ok(Self {
            gate: FolderGate::new(),
            tombstones: Arc::new(tombstones),
            pending: Arc::new(pending_cache(settings)),
        })
    }

    /// Starts the periodic pending-restore sweep.
    pub fn spawn_maintenance(&self, interval: Duration) -> JoinHandle<()> {
        PendingRestoreCache::spawn_sweeper(&self.pending, interval)
    }
}

fn pending_cache(settings: &SyncSettings) -> PendingRestoreCache {
    PendingRestoreCache::new(
        settings.pending_restore.ttl(),
        settings.pending_restore.max_entries,
    )
}
