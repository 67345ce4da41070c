//! Protocol batches: additions, field deltas and deletions.

use serde::{Deserialize, Serialize};

use super::item::{Attachment, MailboxItem};

/// Field-level change for an existing item.
///
/// `None` means "leave unchanged". Attachments are only touched when
/// explicitly set, so a delta never disturbs the children of a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemDelta {
    pub server_id: String,
    pub read: Option<bool>,
    pub flagged: Option<bool>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub preview: Option<String>,
    pub attachments: Option<Vec<Attachment>>,
}

impl ItemDelta {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            ..Default::default()
        }
    }

    pub fn with_read(mut self, read: bool) -> Self {
        self.read = Some(read);
        self
    }

    pub fn with_flagged(mut self, flagged: bool) -> Self {
        self.flagged = Some(flagged);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Server-side state carried by a re-sent record. An empty body means
    /// "not fetched", so it is left out; attachments are never touched.
    pub fn from_item(item: &MailboxItem) -> Self {
        Self {
            server_id: item.server_id.clone(),
            read: Some(item.read),
            flagged: Some(item.flagged),
            subject: Some(item.subject.clone()),
            body: Some(item.body.clone()).filter(|b| !b.is_empty()),
            preview: Some(item.preview.clone()).filter(|p| !p.is_empty()),
            attachments: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_none()
            && self.flagged.is_none()
            && self.subject.is_none()
            && self.body.is_none()
            && self.preview.is_none()
            && self.attachments.is_none()
    }

    /// Drops every field that already matches `local`.
    pub fn changes_against(&self, local: &MailboxItem) -> ItemDelta {
        ItemDelta {
            server_id: self.server_id.clone(),
            read: self.read.filter(|v| *v != local.read),
            flagged: self.flagged.filter(|v| *v != local.flagged),
            subject: self.subject.clone().filter(|v| *v != local.subject),
            body: self.body.clone().filter(|v| *v != local.body),
            preview: self.preview.clone().filter(|v| *v != local.preview),
            attachments: self
                .attachments
                .clone()
                .filter(|v| *v != local.attachments),
        }
    }

    pub fn apply_to(&self, item: &mut MailboxItem) {
        if let Some(read) = self.read {
            item.read = read;
        }
        if let Some(flagged) = self.flagged {
            item.flagged = flagged;
        }
        if let Some(subject) = &self.subject {
            item.subject = subject.clone();
        }
        if let Some(body) = &self.body {
            item.body = body.clone();
        }
        if let Some(preview) = &self.preview {
            item.preview = preview.clone();
        }
        if let Some(attachments) = &self.attachments {
            item.attachments = attachments.clone();
        }
    }
}

/// One page of a synchronization response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncBatch {
    pub added: Vec<MailboxItem>,
    pub changed: Vec<ItemDelta>,
    pub deleted: Vec<String>,
}

impl SyncBatch {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.changed.len() + self.deleted.len()
    }
}
