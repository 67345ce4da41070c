//! SQLite mirror of server folders.
//!
//! Items, attachments, folder cursors, counters and tombstones live in one
//! file. Repositories are free functions over a `&Connection`; callers
//! reach the connection through [`Database::with_conn`] or
//! [`Database::with_transaction`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::config::SyncSettings;

pub mod error;
pub mod folder_repo;
pub mod item_repo;
pub mod migrations;
pub mod tombstone_repo;

pub use error::DatabaseError;

/// Wait applied when another process holds the write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to the mirror. Clones share one connection; every access
/// is serialized through its mutex.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates the mirror at `path`, creating parent directories,
    /// and brings the schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| DatabaseError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Self::prepare(conn)?;
        log::info!("Mailbox mirror ready at {}", path.display());
        Ok(db)
    }

    /// Opens the mirror at `settings.database_path`, or at
    /// [`default_database_path`] when none is configured.
    pub fn open_from_settings(settings: &SyncSettings) -> Result<Self, DatabaseError> {
        let path = match &settings.database_path {
            Some(path) => path.clone(),
            None => default_database_path().ok_or(DatabaseError::NoHomeDirectory)?,
        };
        Self::open(&path)
    }

    /// Fresh in-memory mirror with the full schema.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DatabaseError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` atomically: committed when it returns `Ok`, rolled back
    /// otherwise.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }
}

/// Default location when the settings name no `database_path`:
/// `~/.mailsync/data/mailsync.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".mailsync").join("data").join("mailsync.db"))
}

pub(crate) fn encode_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339()
}

pub(crate) fn decode_time(column: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Corrupt {
            column,
            reason: format!("'{}': {}", value, e),
        })
}
