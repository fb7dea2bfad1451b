//! hubsync library
//!
//! Offline-first sync of a local SQLite store with a remote HTTP endpoint.

pub mod config;
pub mod db;
pub mod sync;
pub mod timestamp;

pub use sync::{Outcome, RunOptions, SyncEngine, SyncError, SyncScheduler};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
