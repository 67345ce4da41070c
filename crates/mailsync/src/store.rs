//! Local store contract and its SQLite implementation.

use thiserror::Error;

use crate::db::{folder_repo, item_repo, Database, DatabaseError};
use crate::model::{FolderCounters, ItemDelta, ItemKey, MailboxItem, SyncCursor};
use crate::sync::reconciler::ReconcilePlan;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Store rejected write: {0}")]
    WriteRejected(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Row counts of an applied reconciliation plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedChanges {
    pub inserted: usize,
    pub migrated: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl AppliedChanges {
    pub fn total(&self) -> usize {
        self.inserted + self.migrated + self.updated + self.deleted
    }
}

/// Read/write contract of the local mirror.
///
/// Multi-row writes are atomic: an item and its attachments are written
/// together, and a plan is applied entirely or not at all.
pub trait LocalStore: Send + Sync {
    fn get_item(&self, account: &str, server_id: &str) -> Result<Option<MailboxItem>>;

    fn items_in_folder(&self, account: &str, folder_id: &str) -> Result<Vec<MailboxItem>>;

    fn insert_items(&self, items: &[MailboxItem]) -> Result<()>;

    fn delete_items(&self, account: &str, server_ids: &[String]) -> Result<usize>;

    /// Updates only the fields set on each delta, leaving attachments alone
    /// unless the delta carries them.
    fn update_fields(&self, account: &str, deltas: &[ItemDelta]) -> Result<usize>;

    fn apply_plan(&self, account: &str, plan: &ReconcilePlan) -> Result<AppliedChanges>;

    fn refresh_counters(&self, account: &str, folder_id: &str) -> Result<FolderCounters>;

    fn load_cursor(&self, account: &str, folder_id: &str) -> Result<SyncCursor>;

    fn save_cursor(&self, account: &str, folder_id: &str, cursor: &SyncCursor) -> Result<()>;
}

/// [`LocalStore`] backed by the crate's SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn load_counters(&self, account: &str, folder_id: &str) -> Result<FolderCounters> {
        Ok(self
            .db
            .with_conn(|c| folder_repo::load_counters(c, account, folder_id))?)
    }
}

impl LocalStore for SqliteStore {
    fn get_item(&self, account: &str, server_id: &str) -> Result<Option<MailboxItem>> {
        let key = ItemKey::new(account, server_id);
        Ok(self.db.with_conn(|c| item_repo::find(c, &key))?)
    }

    fn items_in_folder(&self, account: &str, folder_id: &str) -> Result<Vec<MailboxItem>> {
        Ok(self
            .db
            .with_conn(|c| item_repo::list_by_folder(c, account, folder_id))?)
    }

    fn insert_items(&self, items: &[MailboxItem]) -> Result<()> {
        self.db.with_transaction(|c| {
            for item in items {
                item_repo::upsert(c, item)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn delete_items(&self, account: &str, server_ids: &[String]) -> Result<usize> {
        Ok(self.db.with_transaction(|c| {
            let mut deleted = 0;
            for id in server_ids {
                if item_repo::delete(c, &ItemKey::new(account, id.as_str()))? {
                    deleted += 1;
                }
            }
            Ok(deleted)
        })?)
    }

    fn update_fields(&self, account: &str, deltas: &[ItemDelta]) -> Result<usize> {
        Ok(self.db.with_transaction(|c| {
            let mut updated = 0;
            for delta in deltas {
                if item_repo::update_fields(c, account, delta)? {
                    updated += 1;
                }
            }
            Ok(updated)
        })?)
    }

    fn apply_plan(&self, account: &str, plan: &ReconcilePlan) -> Result<AppliedChanges> {
        let applied = self.db.with_transaction(|c| {
            let mut applied = AppliedChanges::default();

            for id in &plan.deletes {
                if item_repo::delete(c, &ItemKey::new(account, id.as_str()))? {
                    applied.deleted += 1;
                }
            }

            for migration in &plan.migrations {
                item_repo::delete(c, &ItemKey::new(account, migration.from.as_str()))?;
                item_repo::upsert(c, &migration.item)?;
                applied.migrated += 1;
            }

            for item in &plan.inserts {
                item_repo::upsert(c, item)?;
                applied.inserted += 1;
            }

            for delta in &plan.updates {
                if item_repo::update_fields(c, account, delta)? {
                    applied.updated += 1;
                }
            }

            Ok(applied)
        })?;

        log::debug!(
            "Applied plan for {}: {} inserted, {} migrated, {} updated, {} deleted",
            account,
            applied.inserted,
            applied.migrated,
            applied.updated,
            applied.deleted
        );

        Ok(applied)
    }

    fn refresh_counters(&self, account: &str, folder_id: &str) -> Result<FolderCounters> {
        Ok(self.db.with_transaction(|c| {
            let counters = item_repo::count_folder(c, account, folder_id)?;
            folder_repo::save_counters(c, account, folder_id, counters)?;
            Ok(counters)
        })?)
    }

    fn load_cursor(&self, account: &str, folder_id: &str) -> Result<SyncCursor> {
        Ok(self
            .db
            .with_conn(|c| folder_repo::load_cursor(c, account, folder_id))?)
    }

    fn save_cursor(&self, account: &str, folder_id: &str, cursor: &SyncCursor) -> Result<()> {
        self.db
            .with_conn(|c| folder_repo::save_cursor(c, account, folder_id, cursor))?;
        Ok(())
    }
}
