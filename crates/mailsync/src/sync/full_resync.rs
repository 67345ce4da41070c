//! Orphan cleanup after a completed full resync.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::model::{IdScheme, ItemDelta, MailboxItem};

use super::guard::RecentEditGuard;
use super::reconciler::ReconcilePlan;

/// What orphan reconciliation did with the unconfirmed records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FullResyncReport {
    /// Local-only records, never seen by the server.
    pub kept_local: usize,
    /// Recently edited records, left for the next cycle.
    pub deferred: usize,
    pub orphans_removed: usize,
    /// Orphans whose cached payload was merged into a confirmed record.
    pub payloads_merged: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct FullResyncReconciler {
    guard: RecentEditGuard,
}

impl FullResyncReconciler {
    pub fn new(guard: RecentEditGuard) -> Self {
        Self { guard }
    }

    /// Plans removal of every record in `items` that the server did not
    /// report during the resync.
    ///
    /// Must only be called once the resync loop drained completely; a
    /// partial `seen` set would delete live records.
    pub fn reconcile(
        &self,
        items: Vec<MailboxItem>,
        seen: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> (ReconcilePlan, FullResyncReport) {
        let mut plan = ReconcilePlan::default();
        let mut report = FullResyncReport::default();

        let (confirmed, unconfirmed): (Vec<MailboxItem>, Vec<MailboxItem>) = items
            .into_iter()
            .partition(|item| seen.contains(&item.server_id));

        // Confirmed records that still lack a payload, by normalized subject.
        let mut needs_payload: HashMap<String, MailboxItem> = HashMap::new();
        for item in confirmed {
            if item.body.is_empty() || item.attachments.is_empty() {
                needs_payload.entry(item.subject_key()).or_insert(item);
            }
        }

        for item in unconfirmed {
            if item.id_scheme() == IdScheme::Placeholder {
                report.kept_local += 1;
                continue;
            }
            if self.guard.is_protected(&item, now) {
                tracing::debug!(id = %item.server_id, "Deferring orphan check for recently edited item");
                report.deferred += 1;
                continue;
            }

            if item.has_payload() {
                if let Some(target) = needs_payload.get_mut(&item.subject_key()) {
                    if target.merge_payload(&item.body, &item.attachments) {
                        plan.updates.push(ItemDelta {
                            server_id: target.server_id.clone(),
                            body: Some(target.body.clone()),
                            attachments: Some(target.attachments.clone()),
                            ..Default::default()
                        });
                        report.payloads_merged += 1;
                    }
                }
            }

            tracing::debug!(id = %item.server_id, "Removing orphaned item");
            plan.deletes.push(item.server_id);
            report.orphans_removed += 1;
        }

        (plan, report)
    }
}
