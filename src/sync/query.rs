//! Reads and writes wrapped with sync.
//!
//! A read starts pulls for its tables without waiting for them, runs the
//! SQL and, on success, fires pushes in the background. A failed read waits
//! for the pulls (the tables may simply not exist yet) and is retried once.
//! A write runs in one local transaction and awaits the pushes after the
//! commit. Both paths return an [`Outcome`] instead of a `Result`.

use futures::future::{join_all, BoxFuture};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::SqliteConnection;
use tokio::task::JoinHandle;

use super::engine::SyncEngine;
use super::error::SyncError;
use super::events::SyncOp;
use super::pull::PullReport;
use crate::db::{self, Param, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Result of a façade call.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Error(SyncError),
}

impl<T> Outcome<T> {
    pub fn status(&self) -> Status {
        match self {
            Outcome::Success(_) => Status::Success,
            Outcome::Error(_) => Status::Error,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn into_result(self) -> Result<T, SyncError> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Error(e) => Err(e),
        }
    }
}

impl<T> From<Result<T, SyncError>> for Outcome<T> {
    fn from(result: Result<T, SyncError>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(e) => Outcome::Error(e),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Drop all local data and re-bootstrap first.
    pub reset: bool,
}

type PullTask = (String, JoinHandle<Result<PullReport, SyncError>>);

impl SyncEngine {
    /// Runs a read query over `tables`, pulling them alongside.
    pub async fn query(
        &self,
        tables: &[&str],
        sql: &str,
        params: &[Param],
        options: RunOptions,
    ) -> Outcome<Vec<Row>> {
        self.run_query(tables, sql, params, options).await.into()
    }

    /// Like [`query`](Self::query), deserializing each row into `T`.
    pub async fn query_as<T: DeserializeOwned>(
        &self,
        tables: &[&str],
        sql: &str,
        params: &[Param],
        options: RunOptions,
    ) -> Outcome<Vec<T>> {
        self.run_query(tables, sql, params, options)
            .await
            .and_then(|rows| {
                rows.into_iter()
                    .map(|row| {
                        serde_json::from_value(Value::Object(row))
                            .map_err(|e| SyncError::Decode(e.to_string()))
                    })
                    .collect()
            })
            .into()
    }

    /// Runs `callback` in one local transaction, then pushes `tables`.
    ///
    /// Push failures after the commit are reported through the event sink
    /// and do not change the outcome.
    pub async fn transaction<T, F>(
        &self,
        tables: &[&str],
        options: RunOptions,
        callback: F,
    ) -> Outcome<T>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, SyncError>>,
    {
        let result = self.run_transaction(options, callback).await;

        if result.is_ok() {
            let pushes = tables
                .iter()
                .map(|table| async move { (*table, self.push(table).await) });
            for (table, pushed) in join_all(pushes).await {
                if let Err(e) = pushed {
                    self.events().failed(table, SyncOp::Push, &e);
                }
            }
        }

        result.into()
    }

    async fn run_query(
        &self,
        tables: &[&str],
        sql: &str,
        params: &[Param],
        options: RunOptions,
    ) -> Result<Vec<Row>, SyncError> {
        if options.reset {
            self.reset().await?;
        }

        let pulls: Vec<PullTask> = tables
            .iter()
            .map(|table| (table.to_string(), self.spawn_pull(table)))
            .collect();

        let rows = match self.fetch_rows(sql, params).await {
            Ok(rows) => {
                self.detach_pulls(pulls);
                rows
            }
            Err(e) => {
                tracing::debug!("Query failed, retrying after pulls: {}", e);
                self.await_pulls(pulls).await?;
                self.fetch_rows(sql, params).await?
            }
        };

        for table in tables {
            self.spawn_push(table);
        }
        Ok(rows)
    }

    async fn run_transaction<T, F>(&self, options: RunOptions, callback: F) -> Result<T, SyncError>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, SyncError>>,
    {
        if options.reset {
            self.reset().await?;
        }

        let mut tx = self.pool().begin().await.map_err(SyncError::Transaction)?;
        match callback(&mut *tx).await {
            Ok(value) => {
                tx.commit().await.map_err(SyncError::Transaction)?;
                Ok(value)
            }
            Err(e) => {
                tx.rollback().await.map_err(SyncError::Transaction)?;
                Err(e)
            }
        }
    }

    async fn fetch_rows(&self, sql: &str, params: &[Param]) -> Result<Vec<Row>, SyncError> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = db::bind_param(query, param);
        }
        let rows = query.fetch_all(self.pool()).await?;
        Ok(rows
            .iter()
            .map(db::row_to_map)
            .collect::<Result<Vec<_>, _>>()?)
    }

    fn spawn_pull(&self, table: &str) -> JoinHandle<Result<PullReport, SyncError>> {
        let engine = self.clone();
        let table = table.to_string();
        tokio::spawn(async move { engine.pull(&table).await })
    }

    fn spawn_push(&self, table: &str) {
        let engine = self.clone();
        let table = table.to_string();
        tokio::spawn(async move {
            if let Err(e) = engine.push(&table).await {
                engine.events().failed(&table, SyncOp::Push, &e);
            }
        });
    }

    /// Waits for every pull; the first failure wins.
    async fn await_pulls(&self, pulls: Vec<PullTask>) -> Result<(), SyncError> {
        let (tables, handles): (Vec<_>, Vec<_>) = pulls.into_iter().unzip();
        let mut first = None;
        for (table, joined) in tables.iter().zip(join_all(handles).await) {
            let result = joined.unwrap_or_else(|e| {
                Err(SyncError::RemoteFetch(format!(
                    "pull of '{}' aborted: {}",
                    table, e
                )))
            });
            if let Err(e) = result {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Lets still-running pulls finish on their own, reporting failures.
    fn detach_pulls(&self, pulls: Vec<PullTask>) {
        for (table, handle) in pulls {
            let events = self.events().clone();
            tokio::spawn(async move {
                match handle.await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => events.failed(&table, SyncOp::Pull, &e),
                    Err(e) => events.failed(&table, SyncOp::Pull, &e),
                }
            });
        }
    }
}
