//! Turns one protocol batch into a plan of local store mutations.
//!
//! Reconciliation reads the store but never writes it. The only side
//! effects are on the shared coordination state: payloads of deleted items
//! are stashed in the pending-restore cache and claimed ones are taken out
//! of it (the coordinator puts them back if the plan fails to apply).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::config::{MatchingSettings, SyncSettings};
use crate::model::{FolderRef, IdScheme, ItemDelta, ItemKey, MailboxItem, SyncBatch};
use crate::store::{LocalStore, StoreError};

use super::drafts::DraftState;
use super::guard::{ChangeVerdict, RecentEditGuard};
use super::pending_restore::{PendingRestoreCache, RestoreKey, RestorePayload};
use super::tombstone::TombstoneRegistry;

/// Why a local record is being moved to a new identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationReason {
    /// Delete of the old id paired with an Add of the same item.
    Replacement,
    /// Draft matched by subject, sender and near-identical time.
    DuplicateDraft,
    /// Draft created through the administrative protocol, now observed
    /// under a synchronization id.
    CrossGeneration,
}

/// Replace the local record `from` with `item` (which has a new id).
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    pub from: String,
    pub item: MailboxItem,
    pub reason: MigrationReason,
}

/// Incoming records that produced no mutation, by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipCounts {
    pub duplicates: usize,
    pub tombstoned: usize,
    pub guarded: usize,
    pub unknown: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    pub inserts: Vec<MailboxItem>,
    pub migrations: Vec<Migration>,
    pub updates: Vec<ItemDelta>,
    pub deletes: Vec<String>,
    /// Tombstones the server just confirmed; cleared once the plan is applied.
    pub confirmed_tombstones: Vec<ItemKey>,
    /// Draft tombstones to move to the identifier the server reported the
    /// deleted draft under, as `(from, to)`.
    pub retargeted_tombstones: Vec<(ItemKey, ItemKey)>,
    /// Pending-restore payloads consumed by this plan.
    pub claimed: Vec<(RestoreKey, RestorePayload)>,
    /// Local identifiers the server reported as present.
    pub seen: Vec<String>,
    pub skipped: SkipCounts,
}

impl ReconcilePlan {
    pub fn mutation_count(&self) -> usize {
        self.inserts.len() + self.migrations.len() + self.updates.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutation_count() == 0
    }
}

/// Time-proximity windows used for matching records across identifiers.
#[derive(Debug, Clone, Copy)]
pub struct MatchWindows {
    pub duplicate: Duration,
    pub replacement: Duration,
}

impl MatchWindows {
    pub fn from_settings(settings: &MatchingSettings) -> Self {
        Self {
            duplicate: settings.duplicate_window(),
            replacement: settings.replacement_window(),
        }
    }
}

/// Everything a single reconciliation reads from.
pub struct ReconcileContext<'a> {
    pub account: &'a str,
    pub folder: &'a FolderRef,
    pub store: &'a dyn LocalStore,
    pub tombstones: &'a TombstoneRegistry,
    pub pending: &'a PendingRestoreCache,
    pub skip_guard: bool,
    pub now: DateTime<Utc>,
}

impl ReconcileContext<'_> {
    fn key(&self, server_id: &str) -> ItemKey {
        ItemKey::new(self.account, server_id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchReconciler {
    guard: RecentEditGuard,
    windows: MatchWindows,
}

impl BatchReconciler {
    pub fn new(guard: RecentEditGuard, windows: MatchWindows) -> Self {
        Self { guard, windows }
    }

    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self::new(
            RecentEditGuard::from_settings(&settings.guard),
            MatchWindows::from_settings(&settings.matching),
        )
    }

    pub fn guard(&self) -> &RecentEditGuard {
        &self.guard
    }

    pub fn windows(&self) -> &MatchWindows {
        &self.windows
    }

    pub fn reconcile(
        &self,
        ctx: &ReconcileContext<'_>,
        batch: &SyncBatch,
    ) -> Result<ReconcilePlan, StoreError> {
        let mut local: HashMap<String, MailboxItem> = ctx
            .store
            .items_in_folder(ctx.account, &ctx.folder.id)?
            .into_iter()
            .map(|item| (item.server_id.clone(), item))
            .collect();

        let deleted: HashSet<&str> = batch.deleted.iter().map(String::as_str).collect();

        let mut plan = ReconcilePlan::default();
        let mut adds: Vec<&MailboxItem> = Vec::with_capacity(batch.added.len());
        let mut add_ids = HashSet::new();
        for item in &batch.added {
            if add_ids.insert(item.server_id.as_str()) {
                adds.push(item);
            } else {
                plan.skipped.duplicates += 1;
            }
        }
        let mut consumed = vec![false; adds.len()];

        self.reconcile_deletes(ctx, batch, &adds, &mut consumed, &deleted, &mut local, &mut plan);
        self.reconcile_changes(ctx, batch, &deleted, &mut local, &mut plan);

        for (idx, incoming) in adds.iter().enumerate() {
            if consumed[idx] || deleted.contains(incoming.server_id.as_str()) {
                continue;
            }
            self.reconcile_add(ctx, incoming, &mut local, &mut plan)?;
        }

        tracing::debug!(
            account = ctx.account,
            folder = %ctx.folder.id,
            inserts = plan.inserts.len(),
            migrations = plan.migrations.len(),
            updates = plan.updates.len(),
            deletes = plan.deletes.len(),
            duplicates = plan.skipped.duplicates,
            tombstoned = plan.skipped.tombstoned,
            guarded = plan.skipped.guarded,
            "Batch reconciled"
        );

        Ok(plan)
    }

    #[allow(clippy::too_many_arguments)]
    fn reconcile_deletes(
        &self,
        ctx: &ReconcileContext<'_>,
        batch: &SyncBatch,
        adds: &[&MailboxItem],
        consumed: &mut [bool],
        deleted: &HashSet<&str>,
        local: &mut HashMap<String, MailboxItem>,
        plan: &mut ReconcilePlan,
    ) {
        let mut handled = HashSet::new();
        for id in &batch.deleted {
            if !handled.insert(id.as_str()) {
                continue;
            }

            let key = ctx.key(id);
            if ctx.tombstones.is_tombstoned(&key) {
                plan.confirmed_tombstones.push(key);
            }

            let Some(existing) = local.get(id) else {
                continue;
            };

            let replacement = adds.iter().enumerate().find_map(|(idx, add)| {
                let matches = !consumed[idx]
                    && add.server_id != existing.server_id
                    && !deleted.contains(add.server_id.as_str())
                    && !local.contains_key(&add.server_id)
                    && add.subject_key() == existing.subject_key()
                    && existing.time_distance(add.received_at) <= self.windows.replacement
                    && self.guard.admits_replacement(existing, add, ctx.now, ctx.skip_guard);
                matches.then_some(idx)
            });

            if let Some(idx) = replacement {
                consumed[idx] = true;
                let item = carry_over(adds[idx], existing);
                tracing::debug!(from = %id, to = %item.server_id, "Delete paired with replacement");
                plan.seen.push(item.server_id.clone());
                plan.migrations.push(Migration {
                    from: id.clone(),
                    item: item.clone(),
                    reason: MigrationReason::Replacement,
                });
                local.remove(id);
                local.insert(item.server_id.clone(), item);
                continue;
            }

            if existing.has_payload() {
                ctx.pending
                    .stash(RestoreKey::for_item(existing), RestorePayload::from_item(existing));
            }

            if !self.guard.admits_delete(existing, ctx.now, ctx.skip_guard) {
                tracing::debug!(id = %id, "Delete of recently edited item held back");
                plan.skipped.guarded += 1;
                continue;
            }

            plan.deletes.push(id.clone());
            local.remove(id);
        }
    }

    fn reconcile_changes(
        &self,
        ctx: &ReconcileContext<'_>,
        batch: &SyncBatch,
        deleted: &HashSet<&str>,
        local: &mut HashMap<String, MailboxItem>,
        plan: &mut ReconcilePlan,
    ) {
        for delta in &batch.changed {
            if deleted.contains(delta.server_id.as_str()) {
                continue;
            }
            if ctx.tombstones.is_tombstoned(&ctx.key(&delta.server_id)) {
                plan.skipped.tombstoned += 1;
                continue;
            }
            let Some(existing) = local.get_mut(&delta.server_id) else {
                plan.skipped.unknown += 1;
                continue;
            };

            plan.seen.push(delta.server_id.clone());
            match self
                .guard
                .admits_change(existing, delta, ctx.now, ctx.skip_guard)
            {
                ChangeVerdict::Apply(changes) => {
                    changes.apply_to(existing);
                    plan.updates.push(changes);
                }
                ChangeVerdict::Unchanged => {}
                ChangeVerdict::Guarded => plan.skipped.guarded += 1,
            }
        }
    }

    fn reconcile_add(
        &self,
        ctx: &ReconcileContext<'_>,
        incoming: &MailboxItem,
        local: &mut HashMap<String, MailboxItem>,
        plan: &mut ReconcilePlan,
    ) -> Result<(), StoreError> {
        let id = incoming.server_id.as_str();
        let drafts = ctx.folder.kind.supports_draft_migration();

        // Identifier dedup: the record is already known for this account.
        if let Some(existing) = local.get_mut(id) {
            plan.seen.push(id.to_string());
            let resent = ItemDelta::from_item(incoming);
            match self
                .guard
                .admits_change(existing, &resent, ctx.now, ctx.skip_guard)
            {
                ChangeVerdict::Apply(changes) => {
                    changes.apply_to(existing);
                    plan.updates.push(changes);
                }
                ChangeVerdict::Unchanged => plan.skipped.duplicates += 1,
                ChangeVerdict::Guarded => plan.skipped.guarded += 1,
            }
            return Ok(());
        }
        if ctx.store.get_item(ctx.account, id)?.is_some() {
            plan.skipped.duplicates += 1;
            return Ok(());
        }

        // A local record whose payload is parked for this subject is being
        // replaced, so it is never a duplicate or migration candidate.
        let restore_key = RestoreKey::for_item(incoming);
        let replaced = ctx
            .pending
            .peek(&restore_key)
            .map(|payload| payload.source_id)
            .filter(|source| local.contains_key(source));
        let replaced = replaced.as_deref();

        // Content dedup: same subject and sender at nearly the same time.
        if let Some(dup_id) = self.find_duplicate(local, incoming, replaced) {
            if !drafts {
                plan.seen.push(dup_id);
                plan.skipped.duplicates += 1;
                return Ok(());
            }
            if ctx.tombstones.is_tombstoned(&ctx.key(id)) {
                plan.skipped.tombstoned += 1;
                return Ok(());
            }
            self.migrate(local, plan, &dup_id, incoming, MigrationReason::DuplicateDraft);
            return Ok(());
        }

        if ctx.tombstones.is_tombstoned(&ctx.key(id)) {
            tracing::debug!(id = %id, "Dropping add for tombstoned item");
            plan.skipped.tombstoned += 1;
            return Ok(());
        }

        if drafts {
            if let Some(origin) =
                ctx.tombstones
                    .find_draft(ctx.account, incoming, self.windows.replacement)
            {
                tracing::debug!(
                    id = %id,
                    deleted = %origin.server_id,
                    "Dropping add for draft deleted under another identifier"
                );
                plan.skipped.tombstoned += 1;
                plan.retargeted_tombstones.push((origin, ctx.key(id)));
                return Ok(());
            }
            if let Some(old_id) = self.find_cross_generation(local, incoming, replaced) {
                self.migrate(local, plan, &old_id, incoming, MigrationReason::CrossGeneration);
                return Ok(());
            }
        }

        let mut item = incoming.clone();
        if let Some(payload) = ctx.pending.claim(&restore_key) {
            let close = (payload.item_time - incoming.received_at).abs() <= self.windows.replacement;
            if close && payload.source_id != item.server_id {
                item.merge_payload(&payload.body, &payload.attachments);
                if local.remove(&payload.source_id).is_some() {
                    plan.deletes.push(payload.source_id.clone());
                }
                tracing::debug!(
                    from = %payload.source_id,
                    to = %item.server_id,
                    "Restored payload from pending cache"
                );
                plan.claimed.push((restore_key, payload));
            } else {
                ctx.pending.stash(restore_key, payload);
            }
        }

        plan.seen.push(item.server_id.clone());
        plan.inserts.push(item.clone());
        local.insert(item.server_id.clone(), item);
        Ok(())
    }

    fn migrate(
        &self,
        local: &mut HashMap<String, MailboxItem>,
        plan: &mut ReconcilePlan,
        from: &str,
        incoming: &MailboxItem,
        reason: MigrationReason,
    ) {
        let Some(old) = local.remove(from) else {
            return;
        };
        let item = carry_over(incoming, &old);
        tracing::debug!(from = %from, to = %item.server_id, ?reason, "Migrating local record");
        plan.seen.push(item.server_id.clone());
        plan.migrations.push(Migration {
            from: from.to_string(),
            item: item.clone(),
            reason,
        });
        local.insert(item.server_id.clone(), item);
    }

    fn find_duplicate(
        &self,
        local: &HashMap<String, MailboxItem>,
        incoming: &MailboxItem,
        exclude: Option<&str>,
    ) -> Option<String> {
        let subject = incoming.subject_key();
        local
            .values()
            .filter(|item| {
                item.server_id != incoming.server_id
                    && exclude != Some(item.server_id.as_str())
                    && item.subject_key() == subject
                    && item.sender.eq_ignore_ascii_case(&incoming.sender)
                    && item.time_distance(incoming.received_at) <= self.windows.duplicate
            })
            .min_by_key(|item| item.time_distance(incoming.received_at))
            .map(|item| item.server_id.clone())
    }

    fn find_cross_generation(
        &self,
        local: &HashMap<String, MailboxItem>,
        incoming: &MailboxItem,
        exclude: Option<&str>,
    ) -> Option<String> {
        let subject = incoming.subject_key();
        local
            .values()
            .filter(|item| {
                DraftState::observed(item, &incoming.server_id) == DraftState::CrossGeneration
                    && exclude != Some(item.server_id.as_str())
                    && item.subject_key() == subject
                    && item.time_distance(incoming.received_at) <= self.windows.replacement
            })
            .min_by_key(|item| item.time_distance(incoming.received_at))
            .map(|item| item.server_id.clone())
    }
}

/// Builds the record stored under the incoming id, keeping whatever the
/// server did not send (cached body, attachments, long-form id).
fn carry_over(incoming: &MailboxItem, old: &MailboxItem) -> MailboxItem {
    let mut item = incoming.clone();
    item.merge_payload(&old.body, &old.attachments);
    if item.admin_id.is_none() {
        item.admin_id = match old.id_scheme() {
            IdScheme::Admin => Some(old.server_id.clone()),
            _ => old.admin_id.clone(),
        };
    }
    item
}
