//! Builders for test data.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};

use mailsync::config::SyncSettings;
use mailsync::model::{Attachment, ItemDelta, LocalEdit, MailboxItem, SyncBatch};
use mailsync::transport::{ResponseStatus, SyncResponse};

pub const ACCOUNT: &str = "alice@example.com";

/// Settings with every delay removed so tests run instantly.
pub fn fast_settings() -> SyncSettings {
    let mut settings = SyncSettings::default();
    settings.retry.base_delay_ms = 0;
    settings.retry.max_delay_ms = 0;
    settings.server_settle_delay_ms = 0;
    settings.gate.wait_ms = 0;
    settings
}

/// Builder for `MailboxItem` instances.
pub struct ItemBuilder {
    item: MailboxItem,
}

impl ItemBuilder {
    pub fn new(id: &str, folder: &str, subject: &str) -> Self {
        Self {
            item: MailboxItem::new(ACCOUNT, id, folder, subject, Utc::now() - Duration::minutes(1)),
        }
    }

    pub fn received(mut self, at: DateTime<Utc>) -> Self {
        self.item.received_at = at;
        self
    }

    pub fn sender(mut self, sender: &str) -> Self {
        self.item.sender = sender.to_string();
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.item.body = body.to_string();
        self
    }

    pub fn attachment(mut self, name: &str) -> Self {
        let reference = format!("ref-{}", name);
        self.item
            .attachments
            .push(Attachment::new(reference, name, 1024));
        self
    }

    pub fn read(mut self, read: bool) -> Self {
        self.item.read = read;
        self
    }

    pub fn edited_secs_ago(mut self, seconds: i64) -> Self {
        self.item.local_edit = Some(LocalEdit::ordinary(Utc::now() - Duration::seconds(seconds)));
        self
    }

    pub fn build(self) -> MailboxItem {
        self.item
    }
}

/// Builder for `SyncBatch` instances.
#[derive(Default)]
pub struct BatchBuilder {
    batch: SyncBatch,
}

impl BatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, item: MailboxItem) -> Self {
        self.batch.added.push(item);
        self
    }

    pub fn change(mut self, delta: ItemDelta) -> Self {
        self.batch.changed.push(delta);
        self
    }

    pub fn delete(mut self, id: &str) -> Self {
        self.batch.deleted.push(id.to_string());
        self
    }

    pub fn build(self) -> SyncBatch {
        self.batch
    }
}

/// A successful page.
pub fn page(cursor: &str, batch: SyncBatch, more_available: bool) -> SyncResponse {
    SyncResponse::success(cursor, batch, more_available)
}

/// A successful page with no changes and nothing more to fetch.
pub fn done(cursor: &str) -> SyncResponse {
    SyncResponse::success(cursor, SyncBatch::default(), false)
}

pub fn status(cursor: &str, status: ResponseStatus) -> SyncResponse {
    SyncResponse::with_status(cursor, status)
}
