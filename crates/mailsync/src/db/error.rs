use std::path::PathBuf;
use thiserror::Error;

/// Failures of the local mailbox mirror.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot prepare database directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored timestamp or enum tag no longer parses.
    #[error("Unreadable value in column '{column}': {reason}")]
    Corrupt { column: &'static str, reason: String },

    #[error("No database_path configured and no home directory to default to")]
    NoHomeDirectory,

    #[error("Mailbox database lock poisoned by a panicked writer")]
    LockPoisoned,
}
