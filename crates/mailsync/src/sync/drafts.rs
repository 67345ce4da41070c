//! Draft lifecycle across the administrative and synchronization protocols.
//!
//! Drafts are created and edited through the administrative protocol, which
//! hands out long-form identifiers, but they come back through the
//! synchronization stream under short-form ones. Reconciling the two views
//! happens in the batch reconciler; this module covers the user-driven
//! operations and the identifier resolution they need.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::SyncSettings;
use crate::model::{
    normalize_subject, placeholder_id, FolderRef, IdScheme, ItemKey, LocalEdit, MailboxItem,
};
use crate::store::LocalStore;
use crate::transport::{DraftContent, DraftService, TransportError};

use super::error::SyncError;
use super::reconciler::{Migration, MigrationReason, ReconcilePlan};
use super::retry::{with_timeout, RetryPolicy};
use super::tombstone::TombstoneRegistry;
use super::SyncCoordination;

/// Observable lifecycle state of a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DraftState {
    /// Created offline; carries a placeholder identifier.
    LocalOnly,
    /// The server issued a real identifier.
    ServerConfirmed,
    /// Observed under an identifier from the other protocol.
    CrossGeneration,
    /// Local and server representations merged into one record.
    Reconciled,
}

impl DraftState {
    pub fn of(item: &MailboxItem) -> Self {
        match item.id_scheme() {
            IdScheme::Placeholder => DraftState::LocalOnly,
            IdScheme::Admin => DraftState::ServerConfirmed,
            IdScheme::Sync if item.admin_id.is_some() => DraftState::Reconciled,
            IdScheme::Sync => DraftState::ServerConfirmed,
        }
    }

    /// State of `local` once the synchronization stream reports it as
    /// `observed_id`. A confirmed draft seen under the other protocol's
    /// identifier scheme is cross-generation; the reconciler migrates it,
    /// which leaves it reconciled.
    pub fn observed(local: &MailboxItem, observed_id: &str) -> Self {
        let local_scheme = local.id_scheme();
        if local_scheme != IdScheme::Placeholder && local_scheme != IdScheme::classify(observed_id)
        {
            DraftState::CrossGeneration
        } else {
            Self::of(local)
        }
    }
}

/// One strategy for finding the long-form identifier of a draft.
#[async_trait]
pub trait IdResolver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(
        &self,
        item: &MailboxItem,
        service: &dyn DraftService,
    ) -> Result<Option<String>, TransportError>;
}

/// The record's own identifier, when it already is long-form.
pub struct LongFormId;

#[async_trait]
impl IdResolver for LongFormId {
    fn name(&self) -> &'static str {
        "long-form-id"
    }

    async fn resolve(
        &self,
        item: &MailboxItem,
        _service: &dyn DraftService,
    ) -> Result<Option<String>, TransportError> {
        Ok((item.id_scheme() == IdScheme::Admin).then(|| item.server_id.clone()))
    }
}

/// The long-form identifier remembered from creation.
pub struct RememberedAdminId;

#[async_trait]
impl IdResolver for RememberedAdminId {
    fn name(&self) -> &'static str {
        "remembered-admin-id"
    }

    async fn resolve(
        &self,
        item: &MailboxItem,
        _service: &dyn DraftService,
    ) -> Result<Option<String>, TransportError> {
        Ok(item.admin_id.clone())
    }
}

/// Asks the server to convert a short-form identifier.
pub struct ServerConversion;

#[async_trait]
impl IdResolver for ServerConversion {
    fn name(&self) -> &'static str {
        "server-conversion"
    }

    async fn resolve(
        &self,
        item: &MailboxItem,
        service: &dyn DraftService,
    ) -> Result<Option<String>, TransportError> {
        if item.id_scheme() != IdScheme::Sync {
            return Ok(None);
        }
        service.convert_id(&item.server_id).await
    }
}

/// Last resort: the server draft with the same subject saved closest in
/// time to the local record.
pub struct SubjectSearch {
    pub window: chrono::Duration,
}

#[async_trait]
impl IdResolver for SubjectSearch {
    fn name(&self) -> &'static str {
        "subject-search"
    }

    async fn resolve(
        &self,
        item: &MailboxItem,
        service: &dyn DraftService,
    ) -> Result<Option<String>, TransportError> {
        let subject = item.subject_key();
        let candidates = service.find_drafts_by_subject(&item.subject).await?;
        Ok(candidates
            .into_iter()
            .filter(|draft| normalize_subject(&draft.subject) == subject)
            .filter(|draft| item.time_distance(draft.saved_at) <= self.window)
            .min_by_key(|draft| item.time_distance(draft.saved_at))
            .map(|draft| draft.id))
    }
}

/// Resolvers tried in order until one finds an identifier.
pub struct ResolverChain {
    resolvers: Vec<Box<dyn IdResolver>>,
}

impl ResolverChain {
    pub fn new(resolvers: Vec<Box<dyn IdResolver>>) -> Self {
        Self { resolvers }
    }

    /// Long-form id as-is, then the remembered id, then server conversion,
    /// then subject search.
    pub fn standard(search_window: chrono::Duration) -> Self {
        Self::new(vec![
            Box::new(LongFormId),
            Box::new(RememberedAdminId),
            Box::new(ServerConversion),
            Box::new(SubjectSearch {
                window: search_window,
            }),
        ])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    /// A failing resolver does not stop the chain; its error is returned
    /// only when no later resolver succeeds.
    pub async fn resolve(
        &self,
        item: &MailboxItem,
        service: &dyn DraftService,
    ) -> Result<Option<String>, TransportError> {
        let mut last_error = None;
        for resolver in &self.resolvers {
            match resolver.resolve(item, service).await {
                Ok(Some(id)) => {
                    tracing::debug!(
                        resolver = resolver.name(),
                        from = %item.server_id,
                        to = %id,
                        "Resolved draft identifier"
                    );
                    return Ok(Some(id));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(resolver = resolver.name(), error = %e, "Identifier resolver failed");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

/// User-driven draft operations.
pub struct DraftMigrator {
    service: Arc<dyn DraftService>,
    store: Arc<dyn LocalStore>,
    tombstones: Arc<TombstoneRegistry>,
    resolvers: ResolverChain,
    retry: RetryPolicy,
    timeout: Duration,
    settle_delay: Duration,
}

impl DraftMigrator {
    pub fn new(
        settings: &SyncSettings,
        service: Arc<dyn DraftService>,
        store: Arc<dyn LocalStore>,
        coordination: &SyncCoordination,
    ) -> Self {
        Self {
            service,
            store,
            tombstones: Arc::clone(&coordination.tombstones),
            resolvers: ResolverChain::standard(settings.matching.replacement_window()),
            retry: RetryPolicy::from_settings(&settings.retry),
            timeout: settings.request_timeout(),
            settle_delay: settings.server_settle_delay(),
        }
    }

    pub fn with_resolvers(mut self, resolvers: ResolverChain) -> Self {
        self.resolvers = resolvers;
        self
    }

    async fn call<T, F, Fut>(&self, label: &str, op: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let timeout = self.timeout;
        self.retry
            .run(label, || {
                let call = op();
                async move { with_timeout(timeout, call).await.map_err(SyncError::from) }
            })
            .await
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
    }

    /// Stores the draft locally under a placeholder, then creates it on the
    /// server. A transient failure leaves the draft local-only.
    pub async fn save_draft(
        &self,
        account: &str,
        folder: &FolderRef,
        content: DraftContent,
    ) -> Result<MailboxItem, SyncError> {
        let now = Utc::now();
        let local = MailboxItem::new(account, placeholder_id(), &folder.id, &content.subject, now)
            .with_body(&content.body)
            .with_attachments(content.attachments.clone())
            .with_local_edit(LocalEdit::ordinary(now));
        self.store.insert_items(std::slice::from_ref(&local))?;

        match self
            .call("create_draft", || self.service.create_draft(&content))
            .await
        {
            Ok(admin_id) => {
                let confirmed = self.move_to(&local, &admin_id)?;
                tracing::info!(account, id = %admin_id, "Draft saved on server");
                self.settle().await;
                Ok(confirmed)
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(account, error = %e, "Draft kept local-only");
                Ok(local)
            }
            Err(e) => Err(e),
        }
    }

    /// Updates a draft locally and on the server.
    pub async fn update_draft(
        &self,
        account: &str,
        server_id: &str,
        content: DraftContent,
    ) -> Result<MailboxItem, SyncError> {
        let mut item = self.load(account, server_id)?;
        item.subject = content.subject.clone();
        item.body = content.body.clone();
        item.attachments = content.attachments.clone();
        item.local_edit = Some(LocalEdit::confirmation(Utc::now()));
        self.store.insert_items(std::slice::from_ref(&item))?;

        if DraftState::of(&item) == DraftState::LocalOnly {
            return match self
                .call("create_draft", || self.service.create_draft(&content))
                .await
            {
                Ok(admin_id) => {
                    let confirmed = self.move_to(&item, &admin_id)?;
                    self.settle().await;
                    Ok(confirmed)
                }
                Err(e) if e.is_retryable() => Ok(item),
                Err(e) => Err(e),
            };
        }

        let admin_id = self.resolve(&item).await?;
        let new_id = self
            .call("update_draft", || self.service.update_draft(&admin_id, &content))
            .await?;

        let updated = if new_id == admin_id {
            item
        } else {
            tracing::debug!(from = %admin_id, to = %new_id, "Server reassigned draft identifier");
            self.move_to(&item, &new_id)?
        };
        self.settle().await;
        Ok(updated)
    }

    /// Deletes a draft. The tombstone is registered before the local record
    /// is removed, so a concurrent sync cannot resurrect it, and it also
    /// covers the copy the synchronization stream reports under its own
    /// identifier.
    pub async fn delete_draft(&self, account: &str, server_id: &str) -> Result<(), SyncError> {
        let item = self.load(account, server_id)?;

        if DraftState::of(&item) == DraftState::LocalOnly {
            self.store.delete_items(account, &[item.server_id.clone()])?;
            tracing::debug!(account, id = %server_id, "Deleted local-only draft");
            return Ok(());
        }

        self.tombstones
            .register_draft(ItemKey::new(account, server_id), &item);
        self.store.delete_items(account, &[item.server_id.clone()])?;

        let admin_id = self.resolve(&item).await?;
        self.call("delete_item", || self.service.delete_item(&admin_id))
            .await?;
        tracing::info!(account, id = %server_id, "Draft deleted on server");
        self.settle().await;
        Ok(())
    }

    fn load(&self, account: &str, server_id: &str) -> Result<MailboxItem, SyncError> {
        self.store
            .get_item(account, server_id)?
            .ok_or_else(|| SyncError::DraftNotFound {
                server_id: server_id.to_string(),
            })
    }

    async fn resolve(&self, item: &MailboxItem) -> Result<String, SyncError> {
        self.resolvers
            .resolve(item, self.service.as_ref())
            .await?
            .ok_or_else(|| SyncError::UnresolvedDraft {
                server_id: item.server_id.clone(),
            })
    }

    /// Re-keys a local record under a long-form identifier issued by the
    /// administrative protocol.
    fn move_to(&self, local: &MailboxItem, admin_id: &str) -> Result<MailboxItem, SyncError> {
        let mut item = local.clone();
        item.admin_id = Some(admin_id.to_string());
        item.local_edit = Some(LocalEdit::confirmation(Utc::now()));
        if local.id_scheme() == IdScheme::Sync {
            self.store.insert_items(std::slice::from_ref(&item))?;
            return Ok(item);
        }

        item.server_id = admin_id.to_string();
        let plan = ReconcilePlan {
            migrations: vec![Migration {
                from: local.server_id.clone(),
                item: item.clone(),
                reason: MigrationReason::Replacement,
            }],
            ..Default::default()
        };
        self.store.apply_plan(&item.account, &plan)?;
        Ok(item)
    }
}
