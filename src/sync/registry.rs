//! Per-table sync bookkeeping: pending pull/push flags, the cached column
//! list and retry backoff.

use std::collections::HashMap;

use sqlx::SqlitePool;
use tokio::sync::RwLock;

use super::error::SyncError;
use super::events::SyncOp;
use crate::db;

/// Sync state of one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableConfig {
    /// More pages are waiting to be pulled.
    pub pull: bool,
    /// More local rows are waiting to be pushed.
    pub push: bool,
    /// Column names, discovered on first use.
    pub cols: Option<Vec<String>>,
    /// Consecutive scheduler failures.
    pub failures: u32,
    /// Scheduler tick before which the table is skipped.
    pub retry_at: u64,
}

impl TableConfig {
    pub fn is_dirty(&self) -> bool {
        self.pull || self.push
    }
}

/// Flags taken off a table for one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingWork {
    pub push: bool,
    pub pull: bool,
}

#[derive(Debug, Default)]
struct Tables {
    // First-reference order, used for round-robin.
    order: Vec<String>,
    configs: HashMap<String, TableConfig>,
}

impl Tables {
    fn entry(&mut self, table: &str) -> &mut TableConfig {
        if !self.configs.contains_key(table) {
            self.order.push(table.to_string());
        }
        self.configs.entry(table.to_string()).or_default()
    }
}

/// Exponential backoff in ticks, capped at `max_ticks`.
pub fn backoff_ticks(failures: u32, max_ticks: u64) -> u64 {
    const MAX_EXPONENT: u32 = 16;
    2u64.pow(failures.min(MAX_EXPONENT)).min(max_ticks.max(1))
}

/// Registry of every table the engine has touched.
#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: RwLock<Tables>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn flag(&self, table: &str, op: SyncOp) {
        let mut tables = self.tables.write().await;
        let config = tables.entry(table);
        match op {
            SyncOp::Pull => config.pull = true,
            SyncOp::Push => config.push = true,
        }
    }

    pub async fn flag_pull(&self, table: &str) {
        self.flag(table, SyncOp::Pull).await;
    }

    pub async fn flag_push(&self, table: &str) {
        self.flag(table, SyncOp::Push).await;
    }

    /// Clears and returns the table's pending flags.
    pub async fn take_flags(&self, table: &str) -> PendingWork {
        let mut tables = self.tables.write().await;
        let config = tables.entry(table);
        let work = PendingWork {
            push: config.push,
            pull: config.pull,
        };
        config.push = false;
        config.pull = false;
        work
    }

    /// Snapshot of the tables with pending work that are not backing off
    /// at `tick`, in first-reference order.
    pub async fn dirty(&self, tick: u64) -> Vec<String> {
        let tables = self.tables.read().await;
        tables
            .order
            .iter()
            .filter(|name| {
                tables
                    .configs
                    .get(*name)
                    .is_some_and(|c| c.is_dirty() && c.retry_at <= tick)
            })
            .cloned()
            .collect()
    }

    pub async fn get(&self, table: &str) -> Option<TableConfig> {
        self.tables.read().await.configs.get(table).cloned()
    }

    /// All known table names, in first-reference order.
    pub async fn names(&self) -> Vec<String> {
        self.tables.read().await.order.clone()
    }

    /// Column names of `table`, queried once and then cached.
    pub async fn columns(&self, pool: &SqlitePool, table: &str) -> Result<Vec<String>, SyncError> {
        if let Some(cols) = self
            .tables
            .read()
            .await
            .configs
            .get(table)
            .and_then(|c| c.cols.clone())
        {
            return Ok(cols);
        }

        let cols = db::table_columns(pool, table).await?;
        if cols.is_empty() {
            return Err(SyncError::SchemaLookup(table.to_string()));
        }

        tracing::debug!("Cached {} column(s) for '{}'", cols.len(), table);
        self.tables.write().await.entry(table).cols = Some(cols.clone());
        Ok(cols)
    }

    /// Forgets every cached column list. Used after the schema is rebuilt.
    pub async fn clear_columns(&self) {
        for config in self.tables.write().await.configs.values_mut() {
            config.cols = None;
        }
    }

    /// Re-flags `op` and pushes the table's next attempt back. Returns the
    /// tick at which it becomes eligible again.
    pub async fn record_failure(&self, table: &str, op: SyncOp, tick: u64, max_backoff: u64) -> u64 {
        let mut tables = self.tables.write().await;
        let config = tables.entry(table);
        match op {
            SyncOp::Pull => config.pull = true,
            SyncOp::Push => config.push = true,
        }
        config.failures = config.failures.saturating_add(1);
        config.retry_at = tick + backoff_ticks(config.failures, max_backoff);
        config.retry_at
    }

    pub async fn record_success(&self, table: &str) {
        let mut tables = self.tables.write().await;
        let config = tables.entry(table);
        config.failures = 0;
        config.retry_at = 0;
    }
}
