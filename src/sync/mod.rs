//! Offline-first paging sync between the local SQLite store and a remote
//! HTTP endpoint.
//!
//! # Row phases
//!
//! Every synced table carries a `sync_pp` column:
//! - `PULL`: the row matches the server copy
//! - `PUSH`: the row was changed locally and awaits upload
//!
//! # Flow
//!
//! Reads go through [`SyncEngine::query`], which pulls the named tables
//! alongside the read and pushes them afterwards. Writes go through
//! [`SyncEngine::transaction`]. Tables that still have pages left are
//! flagged in the [`TableRegistry`] and serviced by the [`SyncScheduler`].
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use hubsync::db::init_db;
//! use hubsync::sync::{HttpTransport, MemoryStateStore, RunOptions, SyncEngine, SyncOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = init_db(std::path::Path::new("hub.db")).await?;
//! let engine = SyncEngine::new(
//!     pool,
//!     Arc::new(HttpTransport::new("http://localhost:8080", None)),
//!     Arc::new(MemoryStateStore::new()),
//!     SyncOptions::default(),
//! );
//! let rows = engine
//!     .query(&["users"], "SELECT * FROM users", &[], RunOptions::default())
//!     .await
//!     .into_result()?;
//! println!("{} user(s)", rows.len());
//! # Ok(())
//! # }
//! ```

mod bootstrap;
pub mod engine;
pub mod error;
pub mod events;
pub mod pull;
pub mod push;
pub mod query;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

pub use engine::{SyncEngine, SyncOptions, DEFAULT_PAGE_SIZE};
pub use error::SyncError;
pub use events::{EventSink, SyncEvent, SyncOp};
pub use pull::PullReport;
pub use push::{ClaimedBatch, PushReport};
pub use query::{Outcome, RunOptions, Status};
pub use registry::{PendingWork, TableConfig, TableRegistry};
pub use scheduler::{RetryPolicy, SchedulerHandle, SchedulerOptions, SyncScheduler};
pub use state::{FileStateStore, MemoryStateStore, StateStore, SyncState};
pub use transport::{HttpTransport, PullPage, PushBatch, RemoteRow, SyncTransport};
