//! Core data model: items, batches, cursors and folders.

pub mod batch;
pub mod cursor;
pub mod item;

use serde::{Deserialize, Serialize};

pub use batch::{ItemDelta, SyncBatch};
pub use cursor::{SyncCursor, INITIAL_CURSOR};
pub use item::{
    normalize_subject, placeholder_id, Attachment, DraftTrace, EditKind, IdScheme, ItemKey,
    LocalEdit, MailboxItem,
};

/// Folder type as reported by the server's folder hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderKind {
    Inbox,
    Drafts,
    Sent,
    Trash,
    Other,
}

impl FolderKind {
    /// Drafts may change identifier between sub-protocols and need migration
    /// instead of plain duplicate suppression.
    pub fn supports_draft_migration(&self) -> bool {
        matches!(self, FolderKind::Drafts)
    }
}

/// A folder as seen by the engine: local id plus the server's collection id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderRef {
    pub id: String,
    pub server_id: String,
    pub kind: FolderKind,
}

impl FolderRef {
    pub fn new(id: impl Into<String>, server_id: impl Into<String>, kind: FolderKind) -> Self {
        Self {
            id: id.into(),
            server_id: server_id.into(),
            kind,
        }
    }
}

/// Unread and total counts, recomputed from the item table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderCounters {
    pub unread: u32,
    pub total: u32,
}
