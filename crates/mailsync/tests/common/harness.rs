//! Test doubles and a harness wiring them to a real in-memory store.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use mailsync::config::SyncSettings;
use mailsync::model::{
    FolderCounters, FolderKind, FolderRef, ItemDelta, MailboxItem, SyncBatch, SyncCursor,
};
use mailsync::store::{AppliedChanges, LocalStore, SqliteStore, StoreError};
use mailsync::sync::{FolderSyncCoordinator, FolderSyncRequest, ReconcilePlan, SyncCoordination};
use mailsync::transport::{
    BatchRequest, DraftContent, DraftService, RemoteDraft, SyncResponse, SyncTransport,
    TransportError,
};
use mailsync::Database;

use super::builders::{fast_settings, ACCOUNT};

pub fn inbox() -> FolderRef {
    FolderRef::new("inbox", "2", FolderKind::Inbox)
}

pub fn drafts() -> FolderRef {
    FolderRef::new("drafts", "5", FolderKind::Drafts)
}

/// Transport that replays a fixed script of responses.
///
/// Once the script runs out it answers with an empty final page at the
/// requested cursor.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<SyncResponse, TransportError>>>,
    requests: Mutex<Vec<BatchRequest>>,
    latency: Duration,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<SyncResponse, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn pages(pages: Vec<SyncResponse>) -> Self {
        Self::new(pages.into_iter().map(Ok).collect())
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push(&self, response: Result<SyncResponse, TransportError>) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<BatchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl SyncTransport for ScriptedTransport {
    async fn sync(&self, request: BatchRequest) -> Result<SyncResponse, TransportError> {
        let cursor = request.cursor.clone();
        self.requests.lock().unwrap().push(request);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(SyncResponse::success(
                cursor.as_str(),
                SyncBatch::default(),
                false,
            ))
        })
    }
}

/// Store wrapper whose plan application can be made to fail.
pub struct FlakyStore {
    inner: SqliteStore,
    reject_plans: AtomicBool,
    reject_cursor_resets: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            reject_plans: AtomicBool::new(false),
            reject_cursor_resets: AtomicBool::new(false),
        }
    }

    pub fn reject_plans(&self, reject: bool) {
        self.reject_plans.store(reject, Ordering::SeqCst);
    }

    /// Fails writes of the initial cursor.
    pub fn reject_cursor_resets(&self, reject: bool) {
        self.reject_cursor_resets.store(reject, Ordering::SeqCst);
    }
}

impl LocalStore for FlakyStore {
    fn get_item(&self, account: &str, server_id: &str) -> Result<Option<MailboxItem>, StoreError> {
        self.inner.get_item(account, server_id)
    }

    fn items_in_folder(&self, account: &str, folder_id: &str) -> Result<Vec<MailboxItem>, StoreError> {
        self.inner.items_in_folder(account, folder_id)
    }

    fn insert_items(&self, items: &[MailboxItem]) -> Result<(), StoreError> {
        self.inner.insert_items(items)
    }

    fn delete_items(&self, account: &str, server_ids: &[String]) -> Result<usize, StoreError> {
        self.inner.delete_items(account, server_ids)
    }

    fn update_fields(&self, account: &str, deltas: &[ItemDelta]) -> Result<usize, StoreError> {
        self.inner.update_fields(account, deltas)
    }

    fn apply_plan(&self, account: &str, plan: &ReconcilePlan) -> Result<AppliedChanges, StoreError> {
        if self.reject_plans.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected("disk full".to_string()));
        }
        self.inner.apply_plan(account, plan)
    }

    fn refresh_counters(&self, account: &str, folder_id: &str) -> Result<FolderCounters, StoreError> {
        self.inner.refresh_counters(account, folder_id)
    }

    fn load_cursor(&self, account: &str, folder_id: &str) -> Result<SyncCursor, StoreError> {
        self.inner.load_cursor(account, folder_id)
    }

    fn save_cursor(&self, account: &str, folder_id: &str, cursor: &SyncCursor) -> Result<(), StoreError> {
        if cursor.is_initial() && self.reject_cursor_resets.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected("read-only".to_string()));
        }
        self.inner.save_cursor(account, folder_id, cursor)
    }
}

/// Draft service double recording every call.
pub struct FakeDraftService {
    pub next_id: String,
    /// Identifier returned by `update_draft`; `None` echoes the request.
    pub reassign_to: Option<String>,
    pub create_error: Option<TransportError>,
    pub converted: Option<String>,
    pub remote: Vec<RemoteDraft>,
    pub calls: Mutex<Vec<String>>,
}

impl Default for FakeDraftService {
    fn default() -> Self {
        Self {
            next_id: "AAMkAGI2TG93AAA=".to_string(),
            reassign_to: None,
            create_error: None,
            converted: None,
            remote: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeDraftService {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DraftService for FakeDraftService {
    async fn create_draft(&self, content: &DraftContent) -> Result<String, TransportError> {
        self.record(format!("create {}", content.subject));
        match &self.create_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.next_id.clone()),
        }
    }

    async fn update_draft(&self, id: &str, _content: &DraftContent) -> Result<String, TransportError> {
        self.record(format!("update {}", id));
        Ok(self.reassign_to.clone().unwrap_or_else(|| id.to_string()))
    }

    async fn delete_item(&self, id: &str) -> Result<(), TransportError> {
        self.record(format!("delete {}", id));
        Ok(())
    }

    async fn convert_id(&self, short_id: &str) -> Result<Option<String>, TransportError> {
        self.record(format!("convert {}", short_id));
        Ok(self.converted.clone())
    }

    async fn find_drafts_by_subject(&self, subject: &str) -> Result<Vec<RemoteDraft>, TransportError> {
        self.record(format!("search {}", subject));
        Ok(self.remote.clone())
    }
}

/// In-memory store plus shared coordination state.
pub struct TestHarness {
    pub settings: SyncSettings,
    pub store: Arc<SqliteStore>,
    pub coordination: SyncCoordination,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(fast_settings())
    }

    pub fn with_settings(settings: SyncSettings) -> Self {
        let db = Database::open_in_memory().expect("open in-memory database");
        let coordination = SyncCoordination::new(&settings);
        Self {
            settings,
            store: Arc::new(SqliteStore::new(db)),
            coordination,
        }
    }

    pub fn coordinator(&self, transport: Arc<ScriptedTransport>) -> FolderSyncCoordinator {
        FolderSyncCoordinator::new(
            self.settings.clone(),
            self.coordination.clone(),
            transport,
            self.store.clone(),
        )
    }

    pub fn coordinator_over(
        &self,
        transport: Arc<ScriptedTransport>,
        store: Arc<dyn LocalStore>,
    ) -> FolderSyncCoordinator {
        FolderSyncCoordinator::new(
            self.settings.clone(),
            self.coordination.clone(),
            transport,
            store,
        )
    }

    pub fn seed(&self, items: Vec<MailboxItem>) {
        self.store.insert_items(&items).expect("seed items");
    }

    /// Puts the folder past its initial sync.
    pub fn set_cursor(&self, folder: &FolderRef, cursor: &str) {
        self.store
            .save_cursor(ACCOUNT, &folder.id, &SyncCursor::new(cursor))
            .expect("save cursor");
    }

    pub fn cursor(&self, folder: &FolderRef) -> SyncCursor {
        self.store.load_cursor(ACCOUNT, &folder.id).expect("load cursor")
    }

    pub fn item(&self, server_id: &str) -> Option<MailboxItem> {
        self.store.get_item(ACCOUNT, server_id).expect("get item")
    }

    /// Server ids in the folder, sorted.
    pub fn ids(&self, folder: &FolderRef) -> Vec<String> {
        let mut ids: Vec<String> = self
            .store
            .items_in_folder(ACCOUNT, &folder.id)
            .expect("list items")
            .into_iter()
            .map(|i| i.server_id)
            .collect();
        ids.sort();
        ids
    }

    pub fn request(&self, folder: FolderRef) -> FolderSyncRequest {
        FolderSyncRequest::new(ACCOUNT, folder)
    }
}
