//! Notifications about sync work, including failures from detached tasks.

use serde::Serialize;
use tokio::sync::broadcast;

/// Direction of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOp {
    Pull,
    Push,
}

impl std::fmt::Display for SyncOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOp::Pull => write!(f, "pull"),
            SyncOp::Push => write!(f, "push"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A pull page was applied locally.
    Pulled {
        table: String,
        rows: usize,
        more: bool,
    },
    /// A push page was accepted by the server.
    Pushed {
        table: String,
        rows: usize,
        more: bool,
    },
    /// A pull or push failed.
    Failed {
        table: String,
        op: SyncOp,
        error: String,
    },
    /// The local schema was (re)installed.
    Bootstrapped { reset: bool },
}

const EVENT_CAPACITY: usize = 64;

/// Broadcast sink for [`SyncEvent`]s. Sending never blocks or fails the
/// sender; events without subscribers are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }

    /// Log and publish a failure.
    pub fn failed(&self, table: &str, op: SyncOp, error: &dyn std::error::Error) {
        tracing::warn!("Background {} of '{}' failed: {}", op, table, error);
        self.emit(SyncEvent::Failed {
            table: table.to_string(),
            op,
            error: error.to_string(),
        });
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
