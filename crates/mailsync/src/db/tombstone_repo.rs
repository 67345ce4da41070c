//! Tombstone persistence: identifiers deleted locally and awaiting
//! server confirmation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::model::{DraftTrace, ItemKey};

use super::{decode_time, encode_time, DatabaseError};

/// One persisted tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TombstoneRow {
    pub key: ItemKey,
    pub inserted_at: DateTime<Utc>,
    pub draft: Option<DraftTrace>,
}

pub fn insert(
    conn: &Connection,
    key: &ItemKey,
    at: &DateTime<Utc>,
    draft: Option<&DraftTrace>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO tombstones
            (account, server_id, inserted_at, draft_folder_id, draft_subject_key, draft_item_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(account, server_id) DO UPDATE SET
            inserted_at = excluded.inserted_at,
            draft_folder_id = excluded.draft_folder_id,
            draft_subject_key = excluded.draft_subject_key,
            draft_item_time = excluded.draft_item_time",
        params![
            key.account,
            key.server_id,
            encode_time(at),
            draft.map(|d| d.folder_id.as_str()),
            draft.map(|d| d.subject_key.as_str()),
            draft.map(|d| encode_time(&d.item_time)),
        ],
    )?;
    Ok(())
}

/// Removes a tombstone. Returns whether one existed.
pub fn remove(conn: &Connection, key: &ItemKey) -> Result<bool, DatabaseError> {
    let count = conn.execute(
        "DELETE FROM tombstones WHERE account = ?1 AND server_id = ?2",
        params![key.account, key.server_id],
    )?;
    Ok(count > 0)
}

pub fn clear(conn: &Connection) -> Result<usize, DatabaseError> {
    Ok(conn.execute("DELETE FROM tombstones", [])?)
}

type RawRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

pub fn load_all(conn: &Connection) -> Result<Vec<TombstoneRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT account, server_id, inserted_at, draft_folder_id, draft_subject_key, draft_item_time
         FROM tombstones",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
            ))
        })?
        .collect::<Result<Vec<RawRow>, _>>()?;

    rows.into_iter()
        .map(|(account, server_id, at, folder_id, subject_key, item_time)| {
            let draft = match (folder_id, subject_key, item_time) {
                (Some(folder_id), Some(subject_key), Some(item_time)) => Some(DraftTrace {
                    folder_id,
                    subject_key,
                    item_time: decode_time("draft_item_time", &item_time)?,
                }),
                _ => None,
            };
            Ok(TombstoneRow {
                key: ItemKey::new(account, server_id),
                inserted_at: decode_time("inserted_at", &at)?,
                draft,
            })
        })
        .collect()
}

pub fn count(conn: &Connection) -> Result<usize, DatabaseError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM tombstones", [], |r| r.get(0))?;
    Ok(count as usize)
}
