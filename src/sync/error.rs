//! Sync error types.

use std::sync::Arc;

/// Errors that can occur during sync operations.
#[derive(Debug)]
pub enum SyncError {
    /// Sync server is not configured
    NotConfigured,
    /// Network or HTTP failure talking to the sync endpoint
    RemoteFetch(String),
    /// Local table introspection failed
    SchemaLookup(String),
    /// Local transaction could not begin, commit or roll back
    Transaction(sqlx::Error),
    /// Local statement failed
    Database(sqlx::Error),
    /// Watermark/flag storage failed
    State(String),
    /// Remote page could not be applied
    InvalidPage(String),
    /// Query row did not match the requested type
    Decode(String),
    /// Schema bootstrap failed; shared by every caller that awaited it
    Bootstrap(Arc<SyncError>),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::NotConfigured => write!(f, "Sync not configured. Add server_url to config."),
            SyncError::RemoteFetch(e) => write!(f, "Remote fetch error: {}", e),
            SyncError::SchemaLookup(table) => {
                write!(f, "Schema lookup failed: table '{}' not found locally", table)
            }
            SyncError::Transaction(e) => write!(f, "Transaction error: {}", e),
            SyncError::Database(e) => write!(f, "Database error: {}", e),
            SyncError::State(e) => write!(f, "State store error: {}", e),
            SyncError::InvalidPage(e) => write!(f, "Invalid sync page: {}", e),
            SyncError::Decode(e) => write!(f, "Decode error: {}", e),
            SyncError::Bootstrap(e) => write!(f, "Bootstrap failed: {}", e),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Transaction(e) | SyncError::Database(e) => Some(e),
            SyncError::Bootstrap(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Database(e)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::RemoteFetch(e.to_string())
    }
}
