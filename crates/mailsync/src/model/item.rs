//! Mailbox items and their identifiers.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of client-generated identifiers for records the server has never seen.
pub const PLACEHOLDER_PREFIX: &str = "local:";

/// Composite key of a mailbox item: `(account, server_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub account: String,
    pub server_id: String,
}

impl ItemKey {
    pub fn new(account: impl Into<String>, server_id: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            server_id: server_id.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.account, self.server_id)
    }
}

/// What a deleted draft looked like, so its tombstone also covers the copy
/// the server reports under an identifier from the other protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftTrace {
    pub folder_id: String,
    pub subject_key: String,
    pub item_time: DateTime<Utc>,
}

impl DraftTrace {
    pub fn of(item: &MailboxItem) -> Self {
        Self {
            folder_id: item.folder_id.clone(),
            subject_key: item.subject_key(),
            item_time: item.received_at,
        }
    }

    pub fn matches(&self, incoming: &MailboxItem, window: Duration) -> bool {
        self.folder_id == incoming.folder_id
            && self.subject_key == incoming.subject_key()
            && (self.item_time - incoming.received_at).abs() <= window
    }
}

/// Which sub-protocol issued an identifier.
///
/// The synchronization protocol hands out short-form `collection:item`
/// identifiers, while the administrative protocol used to create drafts
/// hands out opaque long-form ones. Records created offline carry a
/// placeholder until the server confirms them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdScheme {
    Placeholder,
    Sync,
    Admin,
}

impl IdScheme {
    /// Classifies an identifier by its shape.
    pub fn classify(id: &str) -> Self {
        if id.starts_with(PLACEHOLDER_PREFIX) {
            IdScheme::Placeholder
        } else if is_short_form(id) {
            IdScheme::Sync
        } else {
            IdScheme::Admin
        }
    }
}

fn is_short_form(id: &str) -> bool {
    match id.split_once(':') {
        Some((collection, item)) => {
            !collection.is_empty()
                && !item.is_empty()
                && collection.bytes().all(|b| b.is_ascii_digit())
                && item.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Generates a fresh placeholder identifier (`local:<uuid>`).
pub fn placeholder_id() -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, Uuid::new_v4())
}

/// Normalizes a subject for matching: trimmed and lowercased.
pub fn normalize_subject(subject: &str) -> String {
    subject.trim().to_lowercase()
}

/// Kind of local edit, which decides how long the record stays protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditKind {
    /// Ordinary UI edit (read state, flag, draft text).
    Ordinary,
    /// Explicit delete/update awaiting server confirmation.
    Confirmation,
}

impl EditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditKind::Ordinary => "ordinary",
            EditKind::Confirmation => "confirmation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ordinary" => Some(EditKind::Ordinary),
            "confirmation" => Some(EditKind::Confirmation),
            _ => None,
        }
    }
}

/// Timestamp and kind of the last local modification of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEdit {
    pub at: DateTime<Utc>,
    pub kind: EditKind,
}

impl LocalEdit {
    pub fn ordinary(at: DateTime<Utc>) -> Self {
        Self {
            at,
            kind: EditKind::Ordinary,
        }
    }

    pub fn confirmation(at: DateTime<Utc>) -> Self {
        Self {
            at,
            kind: EditKind::Confirmation,
        }
    }
}

/// Attachment metadata owned by a mailbox item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Server reference used to fetch the content.
    pub file_reference: String,
    pub name: String,
    pub size: u64,
    pub content_id: Option<String>,
    pub inline: bool,
}

impl Attachment {
    pub fn new(file_reference: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            file_reference: file_reference.into(),
            name: name.into(),
            size,
            content_id: None,
            inline: false,
        }
    }
}

/// A message, draft or other folder-scoped record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxItem {
    pub account: String,
    pub server_id: String,
    pub folder_id: String,
    pub subject: String,
    pub sender: String,
    /// Lazily populated; empty until explicitly fetched.
    pub body: String,
    pub preview: String,
    pub received_at: DateTime<Utc>,
    pub read: bool,
    pub flagged: bool,
    pub attachments: Vec<Attachment>,
    /// Long-form identifier the item was created with, kept across migrations.
    pub admin_id: Option<String>,
    pub local_edit: Option<LocalEdit>,
}

impl MailboxItem {
    pub fn new(
        account: impl Into<String>,
        server_id: impl Into<String>,
        folder_id: impl Into<String>,
        subject: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account: account.into(),
            server_id: server_id.into(),
            folder_id: folder_id.into(),
            subject: subject.into(),
            sender: String::new(),
            body: String::new(),
            preview: String::new(),
            received_at,
            read: false,
            flagged: false,
            attachments: Vec::new(),
            admin_id: None,
            local_edit: None,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_local_edit(mut self, edit: LocalEdit) -> Self {
        self.local_edit = Some(edit);
        self
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.account.clone(), self.server_id.clone())
    }

    pub fn id_scheme(&self) -> IdScheme {
        IdScheme::classify(&self.server_id)
    }

    pub fn subject_key(&self) -> String {
        normalize_subject(&self.subject)
    }

    /// Whether the record holds locally cached content worth salvaging.
    pub fn has_payload(&self) -> bool {
        !self.body.is_empty() || !self.attachments.is_empty()
    }

    /// Fills an empty body and an empty attachment list from another payload.
    /// Returns whether anything was merged.
    pub fn merge_payload(&mut self, body: &str, attachments: &[Attachment]) -> bool {
        let mut merged = false;
        if self.body.is_empty() && !body.is_empty() {
            self.body = body.to_string();
            merged = true;
        }
        if self.attachments.is_empty() && !attachments.is_empty() {
            self.attachments = attachments.to_vec();
            merged = true;
        }
        merged
    }

    /// Distance between `at` and the closest of this item's timestamps
    /// (received time, last local edit).
    pub fn time_distance(&self, at: DateTime<Utc>) -> Duration {
        let received = (self.received_at - at).abs();
        match self.local_edit {
            Some(edit) => received.min((edit.at - at).abs()),
            None => received,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MailboxItem {
        MailboxItem::new("acct", "5:1", "drafts", "Report", Utc::now())
    }

    #[test]
    fn test_classify_identifiers() {
        assert_eq!(IdScheme::classify("5:12"), IdScheme::Sync);
        assert_eq!(IdScheme::classify("local:abc"), IdScheme::Placeholder);
        assert_eq!(IdScheme::classify("AAMkAGI2TG93AAA="), IdScheme::Admin);
        assert_eq!(IdScheme::classify("5:"), IdScheme::Admin);
        assert_eq!(IdScheme::classify("x:1"), IdScheme::Admin);
    }

    #[test]
    fn test_placeholder_id_is_unique() {
        let a = placeholder_id();
        let b = placeholder_id();
        assert_ne!(a, b);
        assert_eq!(IdScheme::classify(&a), IdScheme::Placeholder);
    }

    #[test]
    fn test_item_key_display() {
        assert_eq!(ItemKey::new("acct", "5:1").to_string(), "acct:5:1");
    }

    #[test]
    fn test_merge_payload_only_fills_empty_fields() {
        let mut item = sample().with_body("kept");
        let merged = item.merge_payload("other", &[Attachment::new("ref", "a.pdf", 10)]);
        assert!(merged);
        assert_eq!(item.body, "kept");
        assert_eq!(item.attachments.len(), 1);

        assert!(!item.merge_payload("again", &[]));
    }

    #[test]
    fn test_time_distance_uses_closest_timestamp() {
        let now = Utc::now();
        let mut item = sample();
        item.received_at = now - Duration::hours(2);
        item.local_edit = Some(LocalEdit::ordinary(now - Duration::seconds(3)));
        assert_eq!(item.time_distance(now), Duration::seconds(3));
    }

    #[test]
    fn test_edit_kind_round_trip() {
        for kind in [EditKind::Ordinary, EditKind::Confirmation] {
            assert_eq!(EditKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EditKind::parse("unknown"), None);
    }
}
