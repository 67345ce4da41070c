//! Protection of records the user modified moments ago.

use chrono::{DateTime, Duration, Utc};

use crate::config::GuardSettings;
use crate::model::{EditKind, ItemDelta, MailboxItem};

/// Outcome of checking an incoming change against local state.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeVerdict {
    /// Apply these (differing) fields.
    Apply(ItemDelta),
    /// Nothing differs from local state.
    Unchanged,
    /// Local record is in flight; the change is discarded.
    Guarded,
}

#[derive(Debug, Clone, Copy)]
pub struct RecentEditGuard {
    ordinary: Duration,
    confirmation: Duration,
}

impl RecentEditGuard {
    pub fn new(ordinary: Duration, confirmation: Duration) -> Self {
        Self {
            ordinary,
            confirmation,
        }
    }

    pub fn from_settings(settings: &GuardSettings) -> Self {
        Self::new(settings.edit_window(), settings.confirmation_window())
    }

    fn window(&self, kind: EditKind) -> Duration {
        match kind {
            EditKind::Ordinary => self.ordinary,
            EditKind::Confirmation => self.confirmation,
        }
    }

    /// Whether `item` was edited locally within its guard window.
    pub fn is_protected(&self, item: &MailboxItem, now: DateTime<Utc>) -> bool {
        match item.local_edit {
            Some(edit) => now - edit.at < self.window(edit.kind),
            None => false,
        }
    }

    pub fn admits_change(
        &self,
        local: &MailboxItem,
        delta: &ItemDelta,
        now: DateTime<Utc>,
        skip_guard: bool,
    ) -> ChangeVerdict {
        let changes = delta.changes_against(local);
        if changes.is_empty() {
            ChangeVerdict::Unchanged
        } else if !skip_guard && self.is_protected(local, now) {
            ChangeVerdict::Guarded
        } else {
            ChangeVerdict::Apply(changes)
        }
    }

    /// An incoming record under a new identifier is always new data.
    pub fn admits_replacement(
        &self,
        local: &MailboxItem,
        incoming: &MailboxItem,
        now: DateTime<Utc>,
        skip_guard: bool,
    ) -> bool {
        skip_guard || local.server_id != incoming.server_id || !self.is_protected(local, now)
    }

    pub fn admits_delete(&self, local: &MailboxItem, now: DateTime<Utc>, skip_guard: bool) -> bool {
        skip_guard || !self.is_protected(local, now)
    }
}
