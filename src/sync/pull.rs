//! Pull: remote -> local paging.
//!
//! Each call fetches one page of rows changed after the table's watermark,
//! upserts them under last-writer-wins and then advances the watermark to
//! the last row's `updated_at`. Pages arrive ordered by `updated_at`, which
//! makes the watermark a resumable cursor.

use serde_json::Value;

use super::engine::SyncEngine;
use super::error::SyncError;
use super::events::SyncEvent;
use super::state::SyncState;
use super::transport::{PullPage, RemoteRow};
use crate::db::{self, quote_ident, SyncPhase, PHASE_COLUMN};

/// Result of one pull round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullReport {
    /// Rows received (not all of them necessarily won the conflict check).
    pub received: usize,
    /// The server has more pages.
    pub more: bool,
    /// Watermark after the round.
    pub watermark: Option<String>,
}

/// SQLite's default cap on bound parameters per statement.
const MAX_BOUND_PARAMS: usize = 32766;

/// Rows per upsert statement so that `bound_columns` binds per row stay
/// under [`MAX_BOUND_PARAMS`].
fn rows_per_statement(bound_columns: usize) -> usize {
    (MAX_BOUND_PARAMS / bound_columns.max(1)).max(1)
}

/// Watermark value for a row's `updated_at`.
fn watermark_of(row: &RemoteRow, columns: &[&str]) -> Result<String, SyncError> {
    match row.get(columns, "updated_at") {
        Value::String(s) => Ok(s),
        Value::Null => Err(SyncError::InvalidPage(
            "last row has no updated_at".to_string(),
        )),
        other => Ok(other.to_string()),
    }
}

/// Builds the bulk upsert for `rows` rows over `columns`.
///
/// The phase column is written as a literal `'PULL'` and every other
/// column is a bound parameter. Conflicting rows only take the incoming
/// values when the local copy is strictly older.
fn upsert_sql(table: &str, columns: &[String], rows: usize) -> String {
    let quoted_table = quote_ident(table);

    let row_values = format!(
        "({})",
        columns
            .iter()
            .map(|c| {
                if c == PHASE_COLUMN {
                    format!("'{}'", SyncPhase::Pull.as_str())
                } else {
                    "?".to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    );

    let updates = columns
        .iter()
        .filter(|c| *c != "id")
        .map(|c| format!("{0} = excluded.{0}", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {table} ({cols}) VALUES {values} \
         ON CONFLICT (\"id\") DO UPDATE SET {updates} \
         WHERE {table}.\"updated_at\" < excluded.\"updated_at\"",
        table = quoted_table,
        cols = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "),
        values = vec![row_values; rows].join(", "),
        updates = updates,
    )
}

impl SyncEngine {
    /// Pulls one page of remote changes for `table`.
    ///
    /// When the server reports more pages, the table is flagged so the
    /// scheduler keeps paging.
    pub async fn pull(&self, table: &str) -> Result<PullReport, SyncError> {
        self.ensure_ready().await?;

        let after = self.state().watermark(table)?;
        let page: PullPage = self
            .transport()
            .fetch_page(table, self.options().page_size, after.as_deref())
            .await?;

        let Some(last) = page.data.last() else {
            tracing::debug!("Pull '{}': up to date", table);
            return Ok(PullReport {
                received: 0,
                more: false,
                watermark: after,
            });
        };

        let columns = self.tables().columns(self.pool(), table).await?;
        let synced: Vec<&str> = columns
            .iter()
            .map(String::as_str)
            .filter(|c| *c != PHASE_COLUMN)
            .collect();
        let watermark = watermark_of(last, &synced)?;

        let mut tx = self.pool().begin().await.map_err(SyncError::Transaction)?;
        for chunk in page.data.chunks(rows_per_statement(synced.len())) {
            let sql = upsert_sql(table, &columns, chunk.len());
            let mut query = sqlx::query(&sql);
            for row in chunk {
                for column in &synced {
                    query = db::bind_json(query, &row.get(&synced, column));
                }
            }
            query.execute(&mut *tx).await?;
        }
        tx.commit().await.map_err(SyncError::Transaction)?;

        self.state().set_watermark(table, &watermark)?;
        if page.more {
            self.tables().flag_pull(table).await;
        }

        tracing::debug!(
            "Pull '{}': applied {} row(s), watermark {}, more: {}",
            table,
            page.data.len(),
            watermark,
            page.more
        );
        self.events().emit(SyncEvent::Pulled {
            table: table.to_string(),
            rows: page.data.len(),
            more: page.more,
        });

        Ok(PullReport {
            received: page.data.len(),
            more: page.more,
            watermark: Some(watermark),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{insert_dirty_user, setup, users};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_upsert_sql_shape() {
        let columns = vec![
            "id".to_string(),
            "name".to_string(),
            "updated_at".to_string(),
            "sync_pp".to_string(),
        ];
        let sql = upsert_sql("users", &columns, 2);
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"id\", \"name\", \"updated_at\", \"sync_pp\") \
             VALUES (?, ?, ?, 'PULL'), (?, ?, ?, 'PULL') \
             ON CONFLICT (\"id\") DO UPDATE SET \"name\" = excluded.\"name\", \
             \"updated_at\" = excluded.\"updated_at\", \"sync_pp\" = excluded.\"sync_pp\" \
             WHERE \"users\".\"updated_at\" < excluded.\"updated_at\""
        );
    }

    #[test]
    fn test_rows_per_statement() {
        assert_eq!(rows_per_statement(3), 10922);
        assert_eq!(rows_per_statement(0), MAX_BOUND_PARAMS);
        assert_eq!(rows_per_statement(40_000), 1);
    }

    #[tokio::test]
    async fn test_large_page_is_split_across_statements() {
        let ctx = crate::sync::testing::setup_with(11_000).await;
        let rows: Vec<Vec<Value>> = (1..=11_000)
            .map(|id| vec![json!(id), json!("u"), json!(id)])
            .collect();
        ctx.transport.queue_page("users", rows, false);

        let report = ctx.engine.pull("users").await.unwrap();

        assert_eq!(report.received, 11_000);
        assert_eq!(report.watermark.as_deref(), Some("11000"));
        assert_eq!(users(&ctx.engine).await.len(), 11_000);
    }

    #[tokio::test]
    async fn test_pull_applies_page_and_advances_watermark() {
        let ctx = setup().await;
        ctx.transport.queue_page(
            "users",
            vec![
                vec![json!(1), json!("alice"), json!(3)],
                vec![json!(2), json!("bob"), json!(4)],
            ],
            false,
        );

        let report = ctx.engine.pull("users").await.unwrap();

        assert_eq!(report.received, 2);
        assert!(!report.more);
        assert_eq!(report.watermark.as_deref(), Some("4"));
        assert_eq!(ctx.state.watermark("users").unwrap().as_deref(), Some("4"));
        assert_eq!(
            users(&ctx.engine).await,
            vec![
                (1, Some("alice".to_string()), 3, "PULL".to_string()),
                (2, Some("bob".to_string()), 4, "PULL".to_string()),
            ]
        );
        assert!(!ctx.engine.tables().get("users").await.unwrap().pull);
    }

    #[tokio::test]
    async fn test_pull_sends_watermark_as_cursor() {
        let ctx = setup().await;
        ctx.state.set_watermark("users", "2025-01-01 00:00:00").unwrap();

        ctx.engine.pull("users").await.unwrap();

        let requests = ctx.transport.pull_requests.lock().unwrap().clone();
        assert_eq!(requests[0].after.as_deref(), Some("2025-01-01 00:00:00"));
        assert_eq!(requests[0].limit, 2);
    }

    #[tokio::test]
    async fn test_empty_page_changes_nothing() {
        let ctx = setup().await;
        ctx.state.set_watermark("users", "9").unwrap();

        let report = ctx.engine.pull("users").await.unwrap();

        assert_eq!(report.received, 0);
        assert_eq!(ctx.state.watermark("users").unwrap().as_deref(), Some("9"));
        assert!(users(&ctx.engine).await.is_empty());
    }

    #[tokio::test]
    async fn test_more_flags_table_for_pull() {
        let ctx = setup().await;
        ctx.transport
            .queue_page("users", vec![vec![json!(1), json!("a"), json!(1)]], true);

        let report = ctx.engine.pull("users").await.unwrap();

        assert!(report.more);
        assert!(ctx.engine.tables().get("users").await.unwrap().pull);
    }

    #[tokio::test]
    async fn test_older_incoming_row_loses() {
        let ctx = setup().await;
        insert_dirty_user(&ctx.engine, 1, "local", 5).await;
        ctx.transport
            .queue_page("users", vec![vec![json!(1), json!("remote"), json!(3)]], false);

        ctx.engine.pull("users").await.unwrap();

        assert_eq!(
            users(&ctx.engine).await,
            vec![(1, Some("local".to_string()), 5, "PUSH".to_string())]
        );
        // The cursor still moves past the rejected row.
        assert_eq!(ctx.state.watermark("users").unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_newer_incoming_row_wins() {
        let ctx = setup().await;
        insert_dirty_user(&ctx.engine, 1, "local", 5).await;
        ctx.transport
            .queue_page("users", vec![vec![json!(1), json!("remote"), json!(7)]], false);

        ctx.engine.pull("users").await.unwrap();

        assert_eq!(
            users(&ctx.engine).await,
            vec![(1, Some("remote".to_string()), 7, "PULL".to_string())]
        );
    }

    #[tokio::test]
    async fn test_equal_timestamp_keeps_local_row() {
        let ctx = setup().await;
        insert_dirty_user(&ctx.engine, 1, "local", 5).await;
        ctx.transport
            .queue_page("users", vec![vec![json!(1), json!("remote"), json!(5)]], false);

        ctx.engine.pull("users").await.unwrap();

        assert_eq!(users(&ctx.engine).await[0].1.as_deref(), Some("local"));
    }

    #[tokio::test]
    async fn test_keyed_rows_are_applied() {
        let ctx = setup().await;
        let page: PullPage = serde_json::from_value(json!({
            "data": [{"updated_at": 8, "id": 4, "name": "dana"}],
            "more": false
        }))
        .unwrap();
        ctx.transport.queue("users", page);

        ctx.engine.pull("users").await.unwrap();

        assert_eq!(
            users(&ctx.engine).await,
            vec![(4, Some("dana".to_string()), 8, "PULL".to_string())]
        );
        assert_eq!(ctx.state.watermark("users").unwrap().as_deref(), Some("8"));
    }

    #[tokio::test]
    async fn test_fetch_error_leaves_watermark() {
        let ctx = setup().await;
        ctx.state.set_watermark("users", "4").unwrap();
        ctx.transport.fail_pull.store(true, Ordering::SeqCst);

        let err = ctx.engine.pull("users").await.unwrap_err();

        assert!(matches!(err, SyncError::RemoteFetch(_)));
        assert_eq!(ctx.state.watermark("users").unwrap().as_deref(), Some("4"));
    }

    #[tokio::test]
    async fn test_row_without_timestamp_is_rejected() {
        let ctx = setup().await;
        ctx.transport
            .queue_page("users", vec![vec![json!(1), json!("no-ts")]], false);

        let err = ctx.engine.pull("users").await.unwrap_err();

        assert!(matches!(err, SyncError::InvalidPage(_)));
        assert!(users(&ctx.engine).await.is_empty());
        assert_eq!(ctx.state.watermark("users").unwrap(), None);
    }

    #[tokio::test]
    async fn test_pull_of_unknown_table() {
        let ctx = setup().await;
        ctx.transport
            .queue_page("ghosts", vec![vec![json!(1), json!(1)]], false);

        let err = ctx.engine.pull("ghosts").await.unwrap_err();
        assert!(matches!(err, SyncError::SchemaLookup(_)));
    }

    #[tokio::test]
    async fn test_pull_bootstraps_first() {
        let ctx = crate::sync::testing::setup_with(2).await;
        ctx.transport
            .queue_page("users", vec![vec![json!(1), json!("a"), json!(1)]], false);

        ctx.engine.pull("users").await.unwrap();

        assert_eq!(ctx.transport.schema_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(users(&ctx.engine).await.len(), 1);
    }
}
