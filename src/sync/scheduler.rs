//! Round-robin servicing of tables with pending pull/push pages.
//!
//! Each tick services one table: its pending push first, then its pending
//! pull. Engine calls re-flag a table when more pages remain, so a large
//! table keeps getting turns without starving the others.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::engine::SyncEngine;
use super::error::SyncError;
use super::events::SyncOp;
use crate::config::SyncConfig;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_BACKOFF_TICKS: u64 = 32;

/// What the scheduler does with a table whose pull or push failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicy {
    /// Report the failure and forget it until something flags the table again.
    Drop,
    /// Re-flag the failed direction and back off exponentially.
    #[default]
    Reflag,
}

impl std::fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryPolicy::Drop => write!(f, "drop"),
            RetryPolicy::Reflag => write!(f, "reflag"),
        }
    }
}

impl std::str::FromStr for RetryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drop" => Ok(RetryPolicy::Drop),
            "reflag" => Ok(RetryPolicy::Reflag),
            other => Err(format!("Unknown retry policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub interval: Duration,
    pub retry: RetryPolicy,
    pub max_backoff_ticks: u64,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            retry: RetryPolicy::default(),
            max_backoff_ticks: DEFAULT_MAX_BACKOFF_TICKS,
        }
    }
}

impl SchedulerOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs.max(1)),
            retry: config.retry,
            max_backoff_ticks: config.max_backoff_ticks,
        }
    }
}

pub struct SyncScheduler {
    engine: SyncEngine,
    options: SchedulerOptions,
    cursor: Option<String>,
    ticks: u64,
}

impl SyncScheduler {
    pub fn new(engine: SyncEngine, options: SchedulerOptions) -> Self {
        Self {
            engine,
            options,
            cursor: None,
            ticks: 0,
        }
    }

    /// The table the next tick will service, if already chosen.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Runs one round. Returns the serviced table, if any.
    pub async fn tick(&mut self) -> Option<String> {
        self.ticks += 1;
        let tables = self.engine.tables();

        let dirty = tables.dirty(self.ticks).await;
        if dirty.is_empty() {
            self.cursor = None;
            return None;
        }

        let current = match self.cursor.take() {
            Some(cursor) if dirty.contains(&cursor) => cursor,
            Some(cursor) => next_in_ring(&tables.names().await, &cursor, &dirty),
            None => dirty[0].clone(),
        };

        let work = tables.take_flags(&current).await;
        let mut failed = false;
        if work.push {
            if let Err(e) = self.engine.push(&current).await {
                self.handle_failure(&current, SyncOp::Push, &e).await;
                failed = true;
            }
        }
        if work.pull {
            if let Err(e) = self.engine.pull(&current).await {
                self.handle_failure(&current, SyncOp::Pull, &e).await;
                failed = true;
            }
        }
        if !failed {
            tables.record_success(&current).await;
        }

        self.cursor = if dirty.len() < 2 {
            None
        } else {
            let index = dirty.iter().position(|t| *t == current).unwrap_or(0);
            Some(dirty[(index + 1) % dirty.len()].clone())
        };

        Some(current)
    }

    async fn handle_failure(&self, table: &str, op: SyncOp, error: &SyncError) {
        self.engine.events().failed(table, op, error);
        if self.options.retry == RetryPolicy::Reflag {
            let retry_at = self
                .engine
                .tables()
                .record_failure(table, op, self.ticks, self.options.max_backoff_ticks)
                .await;
            tracing::debug!("Retrying {} of '{}' at tick {}", op, table, retry_at);
        }
    }

    /// Runs [`tick`](Self::tick) every `interval` until the handle is stopped.
    pub fn spawn(mut self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let period = self.options.interval;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!("Sync scheduler started ({:?} interval)", period);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => {
                        if let Some(table) = self.tick().await {
                            tracing::trace!("Serviced '{}'", table);
                        }
                    }
                }
            }

            tracing::info!("Sync scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// First table after `cursor` in registry order that is dirty.
fn next_in_ring(order: &[String], cursor: &str, dirty: &[String]) -> String {
    let start = order.iter().position(|t| t == cursor).map_or(0, |i| i + 1);
    order
        .iter()
        .cycle()
        .skip(start)
        .take(order.len())
        .find(|t| dirty.contains(t))
        .cloned()
        .unwrap_or_else(|| dirty[0].clone())
}

/// Handle to a spawned scheduler.
pub struct SchedulerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops the scheduler after the tick in progress, if any, completes.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::warn!("Sync scheduler task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::events::SyncEvent;
    use crate::sync::testing::{insert_dirty_user, setup, users};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn scheduler(engine: &SyncEngine, retry: RetryPolicy) -> SyncScheduler {
        SyncScheduler::new(
            engine.clone(),
            SchedulerOptions {
                interval: Duration::from_millis(10),
                retry,
                max_backoff_ticks: 32,
            },
        )
    }

    #[test]
    fn test_next_in_ring_wraps() {
        let order: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let dirty = vec!["a".to_string(), "c".to_string()];

        assert_eq!(next_in_ring(&order, "b", &dirty), "c");
        assert_eq!(next_in_ring(&order, "d", &dirty), "a");
        assert_eq!(next_in_ring(&order, "c", &dirty), "a");
    }

    #[test]
    fn test_retry_policy_parse() {
        assert_eq!("drop".parse::<RetryPolicy>().unwrap(), RetryPolicy::Drop);
        assert_eq!("REFLAG".parse::<RetryPolicy>().unwrap(), RetryPolicy::Reflag);
        assert!("sometimes".parse::<RetryPolicy>().is_err());
        assert_eq!(RetryPolicy::default(), RetryPolicy::Reflag);
    }

    #[tokio::test]
    async fn test_idle_tick_does_nothing() {
        let ctx = setup().await;
        let mut scheduler = scheduler(&ctx.engine, RetryPolicy::Reflag);

        assert_eq!(scheduler.tick().await, None);
        assert!(ctx.transport.pull_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tables_are_serviced_in_turn() {
        let ctx = setup().await;
        insert_dirty_user(&ctx.engine, 1, "alice", 5).await;
        ctx.engine.tables().flag_push("users").await;
        ctx.engine.tables().flag_pull("orders").await;
        ctx.transport
            .queue_page("orders", vec![vec![json!(10), json!(9.5), json!(2)]], false);
        let mut scheduler = scheduler(&ctx.engine, RetryPolicy::Reflag);

        assert_eq!(scheduler.tick().await.as_deref(), Some("users"));
        assert_eq!(ctx.transport.pushed_to("users").len(), 1);
        assert_eq!(ctx.transport.pulls_of("orders"), 0);
        assert_eq!(scheduler.cursor(), Some("orders"));

        assert_eq!(scheduler.tick().await.as_deref(), Some("orders"));
        assert_eq!(ctx.transport.pulls_of("orders"), 1);
        assert_eq!(scheduler.cursor(), None);

        assert_eq!(scheduler.tick().await, None);
    }

    #[tokio::test]
    async fn test_push_runs_before_pull() {
        let ctx = setup().await;
        insert_dirty_user(&ctx.engine, 1, "local", 5).await;
        // Same row comes back newer from the server.
        ctx.transport
            .queue_page("users", vec![vec![json!(1), json!("remote"), json!(9)]], false);
        ctx.engine.tables().flag_push("users").await;
        ctx.engine.tables().flag_pull("users").await;
        let mut scheduler = scheduler(&ctx.engine, RetryPolicy::Reflag);

        scheduler.tick().await;

        assert_eq!(ctx.transport.pushed_to("users")[0].data[0][1], json!("local"));
        assert_eq!(users(&ctx.engine).await[0].1.as_deref(), Some("remote"));
    }

    #[tokio::test]
    async fn test_more_pages_are_serviced_next_tick() {
        let ctx = setup().await;
        ctx.transport
            .queue_page("users", vec![vec![json!(1), json!("a"), json!(1)]], true);
        ctx.transport
            .queue_page("users", vec![vec![json!(2), json!("b"), json!(2)]], false);
        ctx.engine.tables().flag_pull("users").await;
        let mut scheduler = scheduler(&ctx.engine, RetryPolicy::Reflag);

        assert_eq!(scheduler.tick().await.as_deref(), Some("users"));
        assert_eq!(scheduler.tick().await.as_deref(), Some("users"));
        assert_eq!(scheduler.tick().await, None);

        let requests = ctx.transport.pull_requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].after.as_deref(), Some("1"));
        assert_eq!(users(&ctx.engine).await.len(), 2);
    }

    #[tokio::test]
    async fn test_large_table_does_not_starve_others() {
        let ctx = setup().await;
        for _ in 0..3 {
            ctx.transport
                .queue_page("users", vec![vec![json!(1), json!("a"), json!(1)]], true);
        }
        ctx.engine.tables().flag_pull("users").await;
        ctx.engine.tables().flag_pull("orders").await;
        let mut scheduler = scheduler(&ctx.engine, RetryPolicy::Reflag);

        let serviced = vec![
            scheduler.tick().await,
            scheduler.tick().await,
            scheduler.tick().await,
        ];

        assert_eq!(
            serviced,
            vec![
                Some("users".to_string()),
                Some("orders".to_string()),
                Some("users".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_cursor_moves_on_when_its_table_is_no_longer_dirty() {
        let ctx = setup().await;
        let tables = ctx.engine.tables();
        tables.flag_pull("a").await;
        tables.flag_pull("b").await;
        tables.flag_pull("c").await;
        let mut scheduler = scheduler(&ctx.engine, RetryPolicy::Reflag);

        assert_eq!(scheduler.tick().await.as_deref(), Some("a"));
        assert_eq!(scheduler.cursor(), Some("b"));

        // "b" is cleaned up elsewhere before its turn.
        tables.take_flags("b").await;

        assert_eq!(scheduler.tick().await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_drop_policy_forgets_failed_pull() {
        let ctx = setup().await;
        ctx.transport.fail_pull.store(true, Ordering::SeqCst);
        ctx.engine.tables().flag_pull("users").await;
        let mut events = ctx.engine.subscribe();
        let mut scheduler = scheduler(&ctx.engine, RetryPolicy::Drop);

        scheduler.tick().await;

        assert!(matches!(
            events.recv().await.unwrap(),
            SyncEvent::Failed { op: SyncOp::Pull, .. }
        ));
        assert!(!ctx.engine.tables().get("users").await.unwrap().is_dirty());
        assert_eq!(scheduler.tick().await, None);
    }

    #[tokio::test]
    async fn test_reflag_policy_retries_after_backoff() {
        let ctx = setup().await;
        ctx.transport.fail_pull.store(true, Ordering::SeqCst);
        ctx.engine.tables().flag_pull("users").await;
        let mut scheduler = scheduler(&ctx.engine, RetryPolicy::Reflag);

        // Tick 1 fails; one failure backs off two ticks.
        assert_eq!(scheduler.tick().await.as_deref(), Some("users"));
        assert_eq!(scheduler.tick().await, None);

        ctx.transport.fail_pull.store(false, Ordering::SeqCst);
        assert_eq!(scheduler.tick().await.as_deref(), Some("users"));

        let config = ctx.engine.tables().get("users").await.unwrap();
        assert_eq!(config.failures, 0);
        assert!(!config.is_dirty());
        assert_eq!(ctx.transport.pulls_of("users"), 2);
    }

    #[tokio::test]
    async fn test_failed_push_is_retried_with_rows_intact() {
        let ctx = setup().await;
        insert_dirty_user(&ctx.engine, 1, "alice", 5).await;
        ctx.transport.fail_push.store(true, Ordering::SeqCst);
        ctx.engine.tables().flag_push("users").await;
        let mut scheduler = scheduler(&ctx.engine, RetryPolicy::Reflag);

        scheduler.tick().await;
        assert_eq!(users(&ctx.engine).await[0].3, "PUSH");

        ctx.transport.fail_push.store(false, Ordering::SeqCst);
        scheduler.tick().await;
        scheduler.tick().await;

        assert_eq!(users(&ctx.engine).await[0].3, "PULL");
        assert_eq!(ctx.transport.pushed_to("users").len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_scheduler_pages_until_stopped() {
        let ctx = setup().await;
        ctx.transport
            .queue_page("users", vec![vec![json!(1), json!("a"), json!(1)]], true);
        ctx.transport
            .queue_page("users", vec![vec![json!(2), json!("b"), json!(2)]], false);
        ctx.engine.tables().flag_pull("users").await;
        let mut events = ctx.engine.subscribe();

        let handle = scheduler(&ctx.engine, RetryPolicy::Reflag).spawn();
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(event, SyncEvent::Pulled { .. }));
        }
        handle.stop().await;

        assert_eq!(users(&ctx.engine).await.len(), 2);
    }
}
