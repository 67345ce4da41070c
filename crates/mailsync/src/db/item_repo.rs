//! Item repository: CRUD operations for the `items` and `attachments` tables.
//!
//! Functions take a `&Connection` so they compose inside a transaction
//! opened by [`Database::with_transaction`](super::Database::with_transaction).

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::model::{Attachment, EditKind, FolderCounters, ItemDelta, ItemKey, LocalEdit, MailboxItem};

use super::{decode_time, encode_time, DatabaseError};

const ITEM_COLUMNS: &str = "account, server_id, folder_id, subject, sender, body, preview,
     received_at, is_read, is_flagged, admin_id, edited_at, edit_kind";

/// Raw column values before timestamp decoding.
struct ItemRow {
    account: String,
    server_id: String,
    folder_id: String,
    subject: String,
    sender: String,
    body: String,
    preview: String,
    received_at: String,
    read: bool,
    flagged: bool,
    admin_id: Option<String>,
    edited_at: Option<String>,
    edit_kind: Option<String>,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            account: row.get(0)?,
            server_id: row.get(1)?,
            folder_id: row.get(2)?,
            subject: row.get(3)?,
            sender: row.get(4)?,
            body: row.get(5)?,
            preview: row.get(6)?,
            received_at: row.get(7)?,
            read: row.get(8)?,
            flagged: row.get(9)?,
            admin_id: row.get(10)?,
            edited_at: row.get(11)?,
            edit_kind: row.get(12)?,
        })
    }

    fn into_item(self, attachments: Vec<Attachment>) -> Result<MailboxItem, DatabaseError> {
        let local_edit = match (self.edited_at, self.edit_kind) {
            (Some(at), Some(kind)) => Some(LocalEdit {
                at: decode_time("edited_at", &at)?,
                kind: EditKind::parse(&kind).ok_or_else(|| DatabaseError::Corrupt {
                    column: "edit_kind",
                    reason: kind.clone(),
                })?,
            }),
            _ => None,
        };

        Ok(MailboxItem {
            received_at: decode_time("received_at", &self.received_at)?,
            account: self.account,
            server_id: self.server_id,
            folder_id: self.folder_id,
            subject: self.subject,
            sender: self.sender,
            body: self.body,
            preview: self.preview,
            read: self.read,
            flagged: self.flagged,
            attachments,
            admin_id: self.admin_id,
            local_edit,
        })
    }
}

/// Inserts an item or updates it in place, then replaces its attachments.
///
/// Uses `ON CONFLICT DO UPDATE` rather than `INSERT OR REPLACE`: a replace
/// deletes the row first, which would cascade to the attachments.
pub fn upsert(conn: &Connection, item: &MailboxItem) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO items (account, server_id, folder_id, subject, sender, body, preview,
                            received_at, is_read, is_flagged, admin_id, edited_at, edit_kind)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(account, server_id) DO UPDATE SET
            folder_id = excluded.folder_id,
            subject = excluded.subject,
            sender = excluded.sender,
            body = excluded.body,
            preview = excluded.preview,
            received_at = excluded.received_at,
            is_read = excluded.is_read,
            is_flagged = excluded.is_flagged,
            admin_id = excluded.admin_id,
            edited_at = excluded.edited_at,
            edit_kind = excluded.edit_kind",
        params![
            item.account,
            item.server_id,
            item.folder_id,
            item.subject,
            item.sender,
            item.body,
            item.preview,
            encode_time(&item.received_at),
            item.read,
            item.flagged,
            item.admin_id,
            item.local_edit.map(|e| encode_time(&e.at)),
            item.local_edit.map(|e| e.kind.as_str()),
        ],
    )?;

    replace_attachments(conn, &item.account, &item.server_id, &item.attachments)
}

/// Replaces every attachment of an item.
pub fn replace_attachments(
    conn: &Connection,
    account: &str,
    server_id: &str,
    attachments: &[Attachment],
) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM attachments WHERE account = ?1 AND server_id = ?2",
        params![account, server_id],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO attachments (account, server_id, position, file_reference, name, size, content_id, is_inline)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for (position, attachment) in attachments.iter().enumerate() {
        stmt.execute(params![
            account,
            server_id,
            position as i64,
            attachment.file_reference,
            attachment.name,
            attachment.size as i64,
            attachment.content_id,
            attachment.inline,
        ])?;
    }
    Ok(())
}

/// Loads the attachments of an item in their original order.
pub fn attachments_for(
    conn: &Connection,
    account: &str,
    server_id: &str,
) -> Result<Vec<Attachment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT file_reference, name, size, content_id, is_inline FROM attachments
         WHERE account = ?1 AND server_id = ?2 ORDER BY position",
    )?;
    let rows = stmt
        .query_map(params![account, server_id], |row| {
            Ok(Attachment {
                file_reference: row.get(0)?,
                name: row.get(1)?,
                size: row.get::<_, i64>(2)? as u64,
                content_id: row.get(3)?,
                inline: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Finds a single item by key.
pub fn find(conn: &Connection, key: &ItemKey) -> Result<Option<MailboxItem>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM items WHERE account = ?1 AND server_id = ?2",
        ITEM_COLUMNS
    );
    let row = conn
        .query_row(&sql, params![key.account, key.server_id], ItemRow::from_row)
        .optional()?;

    match row {
        Some(row) => {
            let attachments = attachments_for(conn, &row.account, &row.server_id)?;
            Ok(Some(row.into_item(attachments)?))
        }
        None => Ok(None),
    }
}

/// Lists every item of a folder, oldest first.
pub fn list_by_folder(
    conn: &Connection,
    account: &str,
    folder_id: &str,
) -> Result<Vec<MailboxItem>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM items WHERE account = ?1 AND folder_id = ?2 ORDER BY received_at, server_id",
        ITEM_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![account, folder_id], ItemRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|row| {
            let attachments = attachments_for(conn, &row.account, &row.server_id)?;
            row.into_item(attachments)
        })
        .collect()
}

/// Deletes an item (attachments cascade). Returns whether a row was removed.
pub fn delete(conn: &Connection, key: &ItemKey) -> Result<bool, DatabaseError> {
    let count = conn.execute(
        "DELETE FROM items WHERE account = ?1 AND server_id = ?2",
        params![key.account, key.server_id],
    )?;
    Ok(count > 0)
}

/// Updates only the fields set in `delta`. Attachments are touched only
/// when the delta carries them. Returns whether the item exists.
pub fn update_fields(
    conn: &Connection,
    account: &str,
    delta: &ItemDelta,
) -> Result<bool, DatabaseError> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM items WHERE account = ?1 AND server_id = ?2",
            params![account, delta.server_id],
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Ok(false);
    }

    if let Some(read) = delta.read {
        set_column(conn, account, &delta.server_id, "is_read", &read)?;
    }
    if let Some(flagged) = delta.flagged {
        set_column(conn, account, &delta.server_id, "is_flagged", &flagged)?;
    }
    if let Some(subject) = &delta.subject {
        set_column(conn, account, &delta.server_id, "subject", subject)?;
    }
    if let Some(body) = &delta.body {
        set_column(conn, account, &delta.server_id, "body", body)?;
    }
    if let Some(preview) = &delta.preview {
        set_column(conn, account, &delta.server_id, "preview", preview)?;
    }
    if let Some(attachments) = &delta.attachments {
        replace_attachments(conn, account, &delta.server_id, attachments)?;
    }
    Ok(true)
}

fn set_column(
    conn: &Connection,
    account: &str,
    server_id: &str,
    column: &'static str,
    value: &dyn rusqlite::types::ToSql,
) -> Result<(), DatabaseError> {
    let sql = format!(
        "UPDATE items SET {} = ?1 WHERE account = ?2 AND server_id = ?3",
        column
    );
    conn.execute(&sql, params![value, account, server_id])?;
    Ok(())
}

/// Recomputes unread/total counts for a folder from the item table.
pub fn count_folder(
    conn: &Connection,
    account: &str,
    folder_id: &str,
) -> Result<FolderCounters, DatabaseError> {
    let (total, unread): (u32, u32) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END), 0)
         FROM items WHERE account = ?1 AND folder_id = ?2",
        params![account, folder_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    Ok(FolderCounters { unread, total })
}
