//! Errors of folder synchronization and draft operations.

use thiserror::Error;

use crate::error::ErrorClass;
use crate::store::StoreError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Folder '{folder}' is already being synchronized")]
    InProgress { folder: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Server reported an invalid cursor for folder '{folder}'")]
    InvalidCursor { folder: String },

    #[error("Server reported a transient error for folder '{folder}'")]
    ServerBusy { folder: String },

    #[error("Server reported a fatal status for folder '{folder}'")]
    ServerFatal { folder: String },

    #[error("Initialization call for folder '{folder}' returned no cursor")]
    MissingCursor { folder: String },

    #[error("Cursor for folder '{folder}' was still invalid after a full resync restart")]
    CursorResetExhausted { folder: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("No identifier usable for the administrative call could be resolved for '{server_id}'")]
    UnresolvedDraft { server_id: String },

    #[error("Draft '{server_id}' not found locally")]
    DraftNotFound { server_id: String },
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::InProgress { .. } | SyncError::ServerBusy { .. } => ErrorClass::Transient,
            SyncError::Transport(e) if e.is_transient() => ErrorClass::Transient,
            SyncError::InvalidCursor { .. } => ErrorClass::InvalidCursor,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Caller-facing form: `"<class>: <message>"`.
    pub fn classified(&self) -> String {
        format!("{}: {}", self.class(), self)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
