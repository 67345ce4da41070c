//! Folder state repository: per-folder cursor and counters.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{FolderCounters, SyncCursor};

use super::{encode_time, DatabaseError};

/// Loads the stored cursor; folders never synced yield the initial cursor.
pub fn load_cursor(
    conn: &Connection,
    account: &str,
    folder_id: &str,
) -> Result<SyncCursor, DatabaseError> {
    let token: Option<String> = conn
        .query_row(
            "SELECT cursor FROM folder_cursors WHERE account = ?1 AND folder_id = ?2",
            params![account, folder_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(token.map(SyncCursor::new).unwrap_or_default())
}

pub fn save_cursor(
    conn: &Connection,
    account: &str,
    folder_id: &str,
    cursor: &SyncCursor,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO folder_cursors (account, folder_id, cursor, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(account, folder_id) DO UPDATE SET
            cursor = excluded.cursor,
            updated_at = excluded.updated_at",
        params![account, folder_id, cursor.as_str(), encode_time(&Utc::now())],
    )?;
    Ok(())
}

pub fn save_counters(
    conn: &Connection,
    account: &str,
    folder_id: &str,
    counters: FolderCounters,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO folder_counters (account, folder_id, unread, total, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(account, folder_id) DO UPDATE SET
            unread = excluded.unread,
            total = excluded.total,
            updated_at = excluded.updated_at",
        params![
            account,
            folder_id,
            counters.unread,
            counters.total,
            encode_time(&Utc::now())
        ],
    )?;
    Ok(())
}

pub fn load_counters(
    conn: &Connection,
    account: &str,
    folder_id: &str,
) -> Result<FolderCounters, DatabaseError> {
    let counters = conn
        .query_row(
            "SELECT unread, total FROM folder_counters WHERE account = ?1 AND folder_id = ?2",
            params![account, folder_id],
            |r| {
                Ok(FolderCounters {
                    unread: r.get(0)?,
                    total: r.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(counters.unwrap_or_default())
}
