use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::broadcast;

use super::bootstrap::BootstrapGate;
use super::events::{EventSink, SyncEvent};
use super::registry::TableRegistry;
use super::state::StateStore;
use super::transport::SyncTransport;
use crate::config::SyncConfig;

/// Default number of rows exchanged per pull or push round trip.
pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub page_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            page_size: config.page_size.max(1),
        }
    }
}

struct EngineInner {
    pool: SqlitePool,
    transport: Arc<dyn SyncTransport>,
    state: Arc<dyn StateStore>,
    tables: TableRegistry,
    bootstrap: BootstrapGate,
    events: EventSink,
    options: SyncOptions,
}

/// Handle to the sync engine.
///
/// Cloning is cheap and every clone shares the same table registry,
/// bootstrap gate and event sink.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(
        pool: SqlitePool,
        transport: Arc<dyn SyncTransport>,
        state: Arc<dyn StateStore>,
        options: SyncOptions,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                pool,
                transport,
                state,
                tables: TableRegistry::new(),
                bootstrap: BootstrapGate::default(),
                events: EventSink::new(),
                options,
            }),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.inner.pool
    }

    pub fn tables(&self) -> &TableRegistry {
        &self.inner.tables
    }

    pub fn options(&self) -> SyncOptions {
        self.inner.options
    }

    pub fn events(&self) -> &EventSink {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn transport(&self) -> &dyn SyncTransport {
        self.inner.transport.as_ref()
    }

    pub(crate) fn state(&self) -> &dyn StateStore {
        self.inner.state.as_ref()
    }

    pub(crate) fn bootstrap_gate(&self) -> &BootstrapGate {
        &self.inner.bootstrap
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("options", &self.inner.options)
            .field("tables", &self.inner.tables)
            .finish_non_exhaustive()
    }
}
