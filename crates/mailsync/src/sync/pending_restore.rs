//! Short-lived payloads salvaged from items the server is replacing.
//!
//! A Delete and its matching Add may arrive in different pages or even
//! different synchronize calls. The deleted item's body and attachments are
//! parked here, keyed by account and normalized subject, until an Add
//! claims them or the entry expires.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use tokio::task::JoinHandle;

use crate::model::{normalize_subject, Attachment, MailboxItem};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RestoreKey {
    pub account: String,
    pub subject: String,
}

impl RestoreKey {
    pub fn new(account: impl Into<String>, subject: &str) -> Self {
        Self {
            account: account.into(),
            subject: normalize_subject(subject),
        }
    }

    pub fn for_item(item: &MailboxItem) -> Self {
        Self::new(item.account.clone(), &item.subject)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestorePayload {
    pub body: String,
    pub attachments: Vec<Attachment>,
    pub source_id: String,
    /// Timestamp of the source item used for proximity matching.
    pub item_time: DateTime<Utc>,
    pub stashed_at: Instant,
}

impl RestorePayload {
    pub fn from_item(item: &MailboxItem) -> Self {
        Self {
            body: item.body.clone(),
            attachments: item.attachments.clone(),
            source_id: item.server_id.clone(),
            item_time: item.local_edit.map(|e| e.at).unwrap_or(item.received_at),
            stashed_at: Instant::now(),
        }
    }
}

pub struct PendingRestoreCache {
    entries: Cache<RestoreKey, RestorePayload>,
    ttl: Duration,
}

impl PendingRestoreCache {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { entries, ttl }
    }

    pub fn stash(&self, key: RestoreKey, payload: RestorePayload) {
        tracing::debug!(
            account = %key.account,
            source = %payload.source_id,
            "Stashing payload for pending restore"
        );
        self.entries.insert(key, payload);
    }

    /// Consuming read: the entry is removed whether or not it is still fresh.
    pub fn claim(&self, key: &RestoreKey) -> Option<RestorePayload> {
        self.entries
            .remove(key)
            .filter(|payload| payload.stashed_at.elapsed() < self.ttl)
    }

    pub fn peek(&self, key: &RestoreKey) -> Option<RestorePayload> {
        self.entries
            .get(key)
            .filter(|payload| payload.stashed_at.elapsed() < self.ttl)
    }

    /// Drops expired entries now instead of lazily.
    pub fn sweep(&self) {
        self.entries.run_pending_tasks();
    }

    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweeps periodically until the cache is dropped.
    pub fn spawn_sweeper(cache: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(cache) => cache.sweep(),
                    None => break,
                }
            }
        })
    }
}
