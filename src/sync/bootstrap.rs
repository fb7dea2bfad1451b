//! Local schema bootstrap and reset.
//!
//! The schema comes from the server as a SQL script and is executed as-is.
//! Once installed, the `db_available` flag in the state store lets later
//! process starts skip the bootstrap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::engine::SyncEngine;
use super::error::SyncError;
use super::events::SyncEvent;
use super::state::SyncState;
use crate::db;

/// Serializes bootstrap attempts and remembers how the last one ended.
#[derive(Debug, Default)]
pub(crate) struct BootstrapGate {
    attempts: AtomicU64,
    last_failure: Mutex<Option<Arc<SyncError>>>,
}

impl BootstrapGate {
    fn settle(
        &self,
        last_failure: &mut Option<Arc<SyncError>>,
        result: Result<(), SyncError>,
    ) -> Result<(), SyncError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match result {
            Ok(()) => {
                *last_failure = None;
                Ok(())
            }
            Err(e) => {
                let e = Arc::new(e);
                *last_failure = Some(Arc::clone(&e));
                Err(SyncError::Bootstrap(e))
            }
        }
    }
}

impl SyncEngine {
    /// Bootstraps the local schema unless it is already available.
    ///
    /// Concurrent callers are coalesced: one runs the bootstrap and the
    /// others wait for it. If it fails, they all get its error; only a
    /// call made after it finished tries again.
    pub async fn ensure_ready(&self) -> Result<(), SyncError> {
        if self.state().is_available()? {
            return Ok(());
        }

        let gate = self.bootstrap_gate();
        let seen = gate.attempts.load(Ordering::SeqCst);
        let mut last_failure = gate.last_failure.lock().await;
        if self.state().is_available()? {
            return Ok(());
        }
        if gate.attempts.load(Ordering::SeqCst) != seen {
            if let Some(e) = last_failure.as_ref() {
                return Err(SyncError::Bootstrap(Arc::clone(e)));
            }
        }

        let result = self.install_schema(false).await;
        gate.settle(&mut last_failure, result)
    }

    /// Installs the remote schema, first wiping all local data when
    /// `force_reset` is set.
    pub async fn initialize(&self, force_reset: bool) -> Result<(), SyncError> {
        let gate = self.bootstrap_gate();
        let mut last_failure = gate.last_failure.lock().await;
        let result = self.install_schema(force_reset).await;
        gate.settle(&mut last_failure, result)
    }

    /// Drops all local data and re-bootstraps.
    pub async fn reset(&self) -> Result<(), SyncError> {
        self.initialize(true).await
    }

    // Caller holds the bootstrap gate.
    async fn install_schema(&self, reset: bool) -> Result<(), SyncError> {
        if reset {
            tracing::info!("Resetting local database");
            self.state().set_available(false)?;
            db::drop_all(self.pool()).await?;
            self.state().clear_watermarks()?;
            self.tables().clear_columns().await;
        }

        let script = self.transport().fetch_schema().await?;
        sqlx::raw_sql(&script).execute(self.pool()).await?;
        self.state().set_available(true)?;

        tracing::info!("Local schema installed (reset: {})", reset);
        self.events().emit(SyncEvent::Bootstrapped { reset });
        Ok(())
    }
}
