//! Push: local -> remote paging.
//!
//! Dirty rows (`sync_pp = 'PUSH'`) move through
//! `Dirty -> Claimed -> (Synced | Dirty)`. Claiming flips them to `PULL`
//! inside an open transaction; the upload result decides whether that
//! transaction commits (synced) or rolls back (dirty again).

use serde_json::Value;
use sqlx::{Sqlite, SqlitePool, Transaction};

use super::engine::SyncEngine;
use super::error::SyncError;
use super::events::SyncEvent;
use super::transport::PushBatch;
use crate::db::{self, quote_ident, SyncPhase, PHASE_COLUMN};

/// Result of one push round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Rows uploaded.
    pub pushed: usize,
    /// More dirty rows remain.
    pub more: bool,
}

/// Rows flipped to `PULL` in a transaction that is still open.
pub struct ClaimedBatch<'a> {
    tx: Transaction<'a, Sqlite>,
    rows: usize,
}

impl<'a> ClaimedBatch<'a> {
    /// Marks the rows with the given ids as `PULL` inside a new transaction.
    pub async fn claim(pool: &'a SqlitePool, table: &str, ids: &[Value]) -> Result<Self, SyncError> {
        let mut tx = pool.begin().await.map_err(SyncError::Transaction)?;

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE {} SET {} = '{}' WHERE \"id\" IN ({})",
            quote_ident(table),
            quote_ident(PHASE_COLUMN),
            SyncPhase::Pull.as_str(),
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = db::bind_json(query, id);
        }
        query.execute(&mut *tx).await?;

        Ok(Self {
            tx,
            rows: ids.len(),
        })
    }

    /// The upload succeeded: the rows stay `PULL`.
    pub async fn confirm(self) -> Result<usize, SyncError> {
        self.tx.commit().await.map_err(SyncError::Transaction)?;
        Ok(self.rows)
    }

    /// The upload failed: the rows go back to `PUSH`.
    pub async fn release(self) -> Result<(), SyncError> {
        self.tx.rollback().await.map_err(SyncError::Transaction)
    }
}

impl SyncEngine {
    /// Pushes one page of dirty rows of `table`.
    ///
    /// On upload failure the rows are reverted to dirty, the table is
    /// flagged for another push and the error is returned.
    pub async fn push(&self, table: &str) -> Result<PushReport, SyncError> {
        self.ensure_ready().await?;

        let page_size = self.options().page_size;
        let columns = self.tables().columns(self.pool(), table).await?;
        let fields: Vec<String> = columns
            .into_iter()
            .filter(|c| c != PHASE_COLUMN)
            .collect();
        let id_index = fields
            .iter()
            .position(|c| c == "id")
            .ok_or_else(|| SyncError::SchemaLookup(format!("{}.id", table)))?;

        let sql = format!(
            "SELECT {} FROM {} WHERE {} = '{}' ORDER BY \"updated_at\" LIMIT {}",
            fields
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            quote_ident(table),
            quote_ident(PHASE_COLUMN),
            SyncPhase::Push.as_str(),
            page_size + 1
        );
        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;
        if rows.is_empty() {
            tracing::debug!("Push '{}': nothing to push", table);
            return Ok(PushReport::default());
        }

        let data = rows
            .iter()
            .map(db::row_to_values)
            .collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<Value> = data.iter().map(|row| row[id_index].clone()).collect();
        let more = data.len() > page_size;
        if more {
            self.tables().flag_push(table).await;
        }
        let batch = PushBatch { fields, data };

        let claimed = ClaimedBatch::claim(self.pool(), table, &ids).await?;
        let result = self.transport().push(table, &batch).await;

        match result {
            Ok(()) => {
                let pushed = claimed.confirm().await?;
                tracing::debug!("Push '{}': uploaded {} row(s), more: {}", table, pushed, more);
                self.events().emit(SyncEvent::Pushed {
                    table: table.to_string(),
                    rows: pushed,
                    more,
                });
                Ok(PushReport { pushed, more })
            }
            Err(e) => {
                claimed.release().await?;
                self.tables().flag_push(table).await;
                tracing::debug!("Push '{}': upload failed, {} row(s) reverted", table, ids.len());
                Err(e)
            }
        }
    }
}
