//! In-memory transport and engine fixtures for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use super::engine::{SyncEngine, SyncOptions};
use super::error::SyncError;
use super::state::MemoryStateStore;
use super::transport::{PullPage, PushBatch, RemoteRow, SyncTransport};
use crate::db::init_db;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    name TEXT,
    updated_at INTEGER NOT NULL,
    sync_pp TEXT NOT NULL DEFAULT 'PUSH'
);
CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY,
    total REAL,
    updated_at INTEGER NOT NULL,
    sync_pp TEXT NOT NULL DEFAULT 'PUSH'
);
";

#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub table: String,
    pub limit: usize,
    pub after: Option<String>,
}

#[derive(Default)]
pub struct MockTransport {
    pub schema: Mutex<String>,
    pages: Mutex<HashMap<String, VecDeque<PullPage>>>,
    pub pull_requests: Mutex<Vec<PullRequest>>,
    pub pushed: Mutex<Vec<(String, PushBatch)>>,
    pub schema_fetches: AtomicUsize,
    pub fail_schema: AtomicBool,
    pub fail_pull: AtomicBool,
    pub fail_push: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let transport = Self::default();
        *transport.schema.lock().unwrap() = SCHEMA.to_string();
        Arc::new(transport)
    }

    /// Queues a page of positional rows for `table`.
    pub fn queue_page(&self, table: &str, rows: Vec<Vec<Value>>, more: bool) {
        let page = PullPage {
            data: rows.into_iter().map(RemoteRow::Values).collect(),
            more,
        };
        self.queue(table, page);
    }

    pub fn queue(&self, table: &str, page: PullPage) {
        self.pages
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push_back(page);
    }

    pub fn pushed_to(&self, table: &str) -> Vec<PushBatch> {
        self.pushed
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, b)| b.clone())
            .collect()
    }

    pub fn pulls_of(&self, table: &str) -> usize {
        self.pull_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.table == table)
            .count()
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn fetch_schema(&self) -> Result<String, SyncError> {
        self.schema_fetches.fetch_add(1, Ordering::SeqCst);
        // Leaves room for concurrent callers to pile up.
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.fail_schema.load(Ordering::SeqCst) {
            return Err(SyncError::RemoteFetch("schema unavailable".to_string()));
        }
        Ok(self.schema.lock().unwrap().clone())
    }

    async fn fetch_page(
        &self,
        table: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<PullPage, SyncError> {
        self.pull_requests.lock().unwrap().push(PullRequest {
            table: table.to_string(),
            limit,
            after: after.map(str::to_string),
        });
        if self.fail_pull.load(Ordering::SeqCst) {
            return Err(SyncError::RemoteFetch("pull refused".to_string()));
        }
        let page = self
            .pages
            .lock()
            .unwrap()
            .get_mut(table)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        Ok(page)
    }

    async fn push(&self, table: &str, batch: &PushBatch) -> Result<(), SyncError> {
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(SyncError::RemoteFetch("push refused".to_string()));
        }
        self.pushed
            .lock()
            .unwrap()
            .push((table.to_string(), batch.clone()));
        Ok(())
    }
}

pub struct TestContext {
    pub engine: SyncEngine,
    pub transport: Arc<MockTransport>,
    pub state: Arc<MemoryStateStore>,
    _temp_dir: TempDir,
}

/// Engine over a fresh database file, not yet bootstrapped.
pub async fn setup_with(page_size: usize) -> TestContext {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_db(&temp_dir.path().join("test.db")).await.unwrap();
    let transport = MockTransport::new();
    let state = Arc::new(MemoryStateStore::new());
    let engine = SyncEngine::new(
        pool,
        transport.clone(),
        state.clone(),
        SyncOptions { page_size },
    );
    TestContext {
        engine,
        transport,
        state,
        _temp_dir: temp_dir,
    }
}

/// Bootstrapped engine with a page size of 2.
pub async fn setup() -> TestContext {
    let ctx = setup_with(2).await;
    ctx.engine.ensure_ready().await.unwrap();
    ctx
}

/// Inserts a dirty row into `users`.
pub async fn insert_dirty_user(engine: &SyncEngine, id: i64, name: &str, updated_at: i64) {
    sqlx::query("INSERT INTO users (id, name, updated_at, sync_pp) VALUES (?, ?, ?, 'PUSH')")
        .bind(id)
        .bind(name)
        .bind(updated_at)
        .execute(engine.pool())
        .await
        .unwrap();
}

/// `(id, name, updated_at, sync_pp)` of every user, by id.
pub async fn users(engine: &SyncEngine) -> Vec<(i64, Option<String>, i64, String)> {
    sqlx::query_as("SELECT id, name, updated_at, sync_pp FROM users ORDER BY id")
        .fetch_all(engine.pool())
        .await
        .unwrap()
}
