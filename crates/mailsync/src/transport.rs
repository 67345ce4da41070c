//! Seams to the remote mailbox server.
//!
//! Wire encoding is the implementor's concern; the engine only sees
//! decoded batches and classified failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Attachment, SyncBatch, SyncCursor};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out after {0} s")]
    Timeout(u64),

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Server unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout(_)
                | TransportError::ConnectionReset(_)
                | TransportError::Unavailable(_)
        )
    }
}

/// One page request against a folder's change stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub folder_server_id: String,
    pub cursor: SyncCursor,
    pub window_size: u32,
    pub include_full_content: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseStatus {
    Success,
    InvalidCursor,
    TransientError,
    FatalError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub cursor: SyncCursor,
    pub more_available: bool,
    pub batch: SyncBatch,
    pub status: ResponseStatus,
}

impl SyncResponse {
    pub fn success(cursor: impl Into<String>, batch: SyncBatch, more_available: bool) -> Self {
        Self {
            cursor: SyncCursor::new(cursor),
            more_available,
            batch,
            status: ResponseStatus::Success,
        }
    }

    pub fn with_status(cursor: impl Into<String>, status: ResponseStatus) -> Self {
        Self {
            cursor: SyncCursor::new(cursor),
            more_available: false,
            batch: SyncBatch::default(),
            status,
        }
    }
}

#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn sync(&self, request: BatchRequest) -> Result<SyncResponse, TransportError>;
}

/// Content of a draft sent through the administrative protocol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftContent {
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
    pub attachments: Vec<Attachment>,
}

/// A draft as listed by the administrative protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDraft {
    pub id: String,
    pub subject: String,
    pub saved_at: DateTime<Utc>,
}

/// Administrative operations, which address items by long-form identifier.
#[async_trait]
pub trait DraftService: Send + Sync {
    /// Creates a draft and returns its long-form identifier.
    async fn create_draft(&self, content: &DraftContent) -> Result<String, TransportError>;

    /// Updates a draft. The server may answer with a new identifier.
    async fn update_draft(&self, id: &str, content: &DraftContent)
        -> Result<String, TransportError>;

    async fn delete_item(&self, id: &str) -> Result<(), TransportError>;

    /// Converts a short-form synchronization id to its long-form id, if known.
    async fn convert_id(&self, short_id: &str) -> Result<Option<String>, TransportError>;

    async fn find_drafts_by_subject(&self, subject: &str)
        -> Result<Vec<RemoteDraft>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Timeout(60).is_transient());
        assert!(TransportError::ConnectionReset("eof".into()).is_transient());
        assert!(TransportError::Unavailable("503".into()).is_transient());
        assert!(!TransportError::Malformed("bad wbxml".into()).is_transient());
        assert!(!TransportError::Rejected("403".into()).is_transient());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&ResponseStatus::InvalidCursor).unwrap();
        assert_eq!(json, "\"invalid-cursor\"");
    }
}
