//! Locally deleted items awaiting server confirmation.
//!
//! The in-memory map is authoritative during a run. When a database is
//! attached, every change is mirrored to the `tombstones` table so the
//! protection survives a restart; mirroring failures are logged, never
//! propagated.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};

use crate::db::{tombstone_repo, Database, DatabaseError};
use crate::model::{DraftTrace, ItemKey, MailboxItem};

#[derive(Debug, Clone)]
struct Entry {
    inserted_at: DateTime<Utc>,
    draft: Option<DraftTrace>,
}

type Entries = HashMap<ItemKey, Entry>;

pub struct TombstoneRegistry {
    entries: RwLock<Entries>,
    ceiling: usize,
    db: Option<Database>,
}

impl TombstoneRegistry {
    pub fn new(ceiling: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ceiling,
            db: None,
        }
    }

    /// Creates a registry mirrored to `db`, starting from the persisted set.
    pub fn load(db: Database, ceiling: usize) -> Result<Self, DatabaseError> {
        let persisted = db.with_conn(tombstone_repo::load_all)?;
        let mut entries: Entries = persisted
            .into_iter()
            .map(|row| {
                let entry = Entry {
                    inserted_at: row.inserted_at,
                    draft: row.draft,
                };
                (row.key, entry)
            })
            .collect();
        if entries.len() >= ceiling {
            tracing::info!(count = entries.len(), "Persisted tombstones over ceiling, clearing");
            entries.clear();
            db.with_conn(tombstone_repo::clear)?;
        }

        Ok(Self {
            entries: RwLock::new(entries),
            ceiling,
            db: Some(db),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Records a user-initiated deletion. Reaching the ceiling clears the
    /// whole registry before the new entry is added.
    pub fn register(&self, key: ItemKey) {
        self.insert(key, Utc::now(), None);
    }

    /// Records the deletion of a draft. Besides its own identifier, the
    /// tombstone covers the same draft reported under another identifier
    /// until [`retarget`](Self::retarget) moves it there.
    pub fn register_draft(&self, key: ItemKey, draft: &MailboxItem) {
        self.insert(key, Utc::now(), Some(DraftTrace::of(draft)));
    }

    fn insert(&self, key: ItemKey, inserted_at: DateTime<Utc>, draft: Option<DraftTrace>) {
        let cleared = {
            let mut entries = self.write();
            let cleared = entries.len() >= self.ceiling;
            if cleared {
                tracing::info!(
                    count = entries.len(),
                    ceiling = self.ceiling,
                    "Tombstone ceiling reached, clearing registry"
                );
                entries.clear();
            }
            entries.insert(
                key.clone(),
                Entry {
                    inserted_at,
                    draft: draft.clone(),
                },
            );
            cleared
        };

        self.persist(|conn| {
            if cleared {
                tombstone_repo::clear(conn)?;
            }
            tombstone_repo::insert(conn, &key, &inserted_at, draft.as_ref())
        });
    }

    pub fn is_tombstoned(&self, key: &ItemKey) -> bool {
        self.read().contains_key(key)
    }

    pub fn inserted_at(&self, key: &ItemKey) -> Option<DateTime<Utc>> {
        self.read().get(key).map(|entry| entry.inserted_at)
    }

    /// The tombstoned draft of `account` that `incoming` is a copy of:
    /// same folder and subject, saved within `window`. The closest in
    /// time wins.
    pub fn find_draft(
        &self,
        account: &str,
        incoming: &MailboxItem,
        window: Duration,
    ) -> Option<ItemKey> {
        self.read()
            .iter()
            .filter(|(key, _)| key.account == account && key.server_id != incoming.server_id)
            .filter_map(|(key, entry)| {
                let draft = entry.draft.as_ref()?;
                draft
                    .matches(incoming, window)
                    .then(|| (key, (draft.item_time - incoming.received_at).abs()))
            })
            .min_by_key(|(_, distance)| *distance)
            .map(|(key, _)| key.clone())
    }

    /// Moves a tombstone to the identifier the server uses for the same
    /// record, keeping its insertion time. The server's delete of `to`
    /// then confirms it.
    pub fn retarget(&self, from: &ItemKey, to: ItemKey) -> bool {
        let moved = {
            let mut entries = self.write();
            match entries.remove(from) {
                Some(entry) => {
                    let inserted_at = entry.inserted_at;
                    entries.insert(
                        to.clone(),
                        Entry {
                            inserted_at,
                            draft: None,
                        },
                    );
                    Some(inserted_at)
                }
                None => None,
            }
        };

        let Some(inserted_at) = moved else {
            return false;
        };
        tracing::debug!(from = %from, to = %to, "Tombstone follows draft to new identifier");
        self.persist(|conn| {
            tombstone_repo::remove(conn, from)?;
            tombstone_repo::insert(conn, &to, &inserted_at, None)
        });
        true
    }

    /// Removes entries the server confirmed as deleted. Returns how many
    /// were present.
    pub fn confirm<'a, I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a ItemKey>,
    {
        let removed: Vec<ItemKey> = {
            let mut entries = self.write();
            keys.into_iter()
                .filter(|key| entries.remove(*key).is_some())
                .cloned()
                .collect()
        };

        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "Tombstones confirmed by server");
            self.persist(|conn| {
                for key in &removed {
                    tombstone_repo::remove(conn, key)?;
                }
                Ok(())
            });
        }
        removed.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn persist<F>(&self, f: F)
    where
        F: FnOnce(&rusqlite::Connection) -> Result<(), DatabaseError>,
    {
        if let Some(db) = &self.db {
            if let Err(e) = db.with_transaction(f) {
                tracing::warn!(error = %e, "Failed to persist tombstones");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> ItemKey {
        ItemKey::new("acct", id)
    }

    #[test]
    fn test_register_and_confirm() {
        let registry = TombstoneRegistry::new(10);
        registry.register(key("5:1"));
        registry.register(key("5:2"));
        assert!(registry.is_tombstoned(&key("5:1")));
        assert!(!registry.is_tombstoned(&ItemKey::new("other", "5:1")));

        let confirmed = registry.confirm(&[key("5:1"), key("5:9")]);
        assert_eq!(confirmed, 1);
        assert!(!registry.is_tombstoned(&key("5:1")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ceiling_clears_everything() {
        let registry = TombstoneRegistry::new(3);
        for id in ["5:1", "5:2", "5:3"] {
            registry.register(key(id));
        }
        assert_eq!(registry.len(), 3);

        registry.register(key("5:4"));
        assert_eq!(registry.len(), 1);
        assert!(registry.is_tombstoned(&key("5:4")));
        assert!(!registry.is_tombstoned(&key("5:1")));
    }

    #[test]
    fn test_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailsync.db");

        {
            let db = Database::open(&path).unwrap();
            let registry = TombstoneRegistry::load(db, 10).unwrap();
            registry.register(key("5:1"));
            registry.register(key("5:2"));
            registry.confirm(&[key("5:2")]);
        }

        let db = Database::open(&path).unwrap();
        let registry = TombstoneRegistry::load(db, 10).unwrap();
        assert!(registry.is_tombstoned(&key("5:1")));
        assert!(!registry.is_tombstoned(&key("5:2")));
    }

    #[test]
    fn test_persisted_ceiling_mirrors_clear() {
        let db = Database::open_in_memory().unwrap();
        let registry = TombstoneRegistry::load(db.clone(), 2).unwrap();
        registry.register(key("5:1"));
        registry.register(key("5:2"));
        registry.register(key("5:3"));

        assert_eq!(db.with_conn(tombstone_repo::count).unwrap(), 1);
    }

    fn draft(id: &str, subject: &str, at: DateTime<Utc>) -> MailboxItem {
        MailboxItem::new("acct", id, "drafts", subject, at)
    }

    #[test]
    fn test_draft_tombstone_matches_other_identifier() {
        let registry = TombstoneRegistry::new(10);
        let now = Utc::now();
        registry.register_draft(key("AAMkDraft="), &draft("AAMkDraft=", "Quarterly", now));
        registry.register(key("5:7"));

        let window = Duration::minutes(5);
        let copy = draft("5:4", " quarterly", now + Duration::seconds(3));
        assert_eq!(registry.find_draft("acct", &copy, window), Some(key("AAMkDraft=")));
        assert!(registry.find_draft("other", &copy, window).is_none());

        let late = draft("5:4", "Quarterly", now + Duration::hours(1));
        assert!(registry.find_draft("acct", &late, window).is_none());

        let mut elsewhere = copy.clone();
        elsewhere.folder_id = "inbox".to_string();
        assert!(registry.find_draft("acct", &elsewhere, window).is_none());
    }

    #[test]
    fn test_retarget_moves_tombstone_until_confirmed() {
        let registry = TombstoneRegistry::new(10);
        let now = Utc::now();
        registry.register_draft(key("AAMkDraft="), &draft("AAMkDraft=", "Quarterly", now));
        let inserted = registry.inserted_at(&key("AAMkDraft="));

        assert!(registry.retarget(&key("AAMkDraft="), key("5:4")));
        assert!(!registry.retarget(&key("AAMkDraft="), key("5:5")));
        assert!(!registry.is_tombstoned(&key("AAMkDraft=")));
        assert_eq!(registry.inserted_at(&key("5:4")), inserted);
        assert!(registry
            .find_draft("acct", &draft("5:9", "Quarterly", now), Duration::minutes(5))
            .is_none());

        assert_eq!(registry.confirm(&[key("5:4")]), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_draft_trace_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailsync.db");
        let now = Utc::now();

        {
            let db = Database::open(&path).unwrap();
            let registry = TombstoneRegistry::load(db, 10).unwrap();
            registry.register_draft(key("AAMkDraft="), &draft("AAMkDraft=", "Quarterly", now));
        }

        let db = Database::open(&path).unwrap();
        let registry = TombstoneRegistry::load(db, 10).unwrap();
        let copy = draft("5:4", "Quarterly", now);
        assert_eq!(
            registry.find_draft("acct", &copy, Duration::minutes(5)),
            Some(key("AAMkDraft="))
        );
    }
}
