//! Persistent key-value state: per-table pull watermarks and the
//! "database bootstrapped" flag.
//!
//! The file-backed store keeps everything in one JSON document:
//! ```text
//! <STATE_PATH>  {"db_available": "1", "last_pull_users": "2025-01-15 10:00:00"}
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::error::SyncError;

const AVAILABLE_KEY: &str = "db_available";
const WATERMARK_PREFIX: &str = "last_pull_";

/// Simple persistent string storage.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SyncError>;
    fn remove(&self, key: &str) -> Result<(), SyncError>;
    fn keys(&self) -> Result<Vec<String>, SyncError>;
}

fn watermark_key(table: &str) -> String {
    format!("{}{}", WATERMARK_PREFIX, table)
}

/// Typed accessors over a [`StateStore`].
pub trait SyncState {
    fn watermark(&self, table: &str) -> Result<Option<String>, SyncError>;
    fn set_watermark(&self, table: &str, value: &str) -> Result<(), SyncError>;
    fn clear_watermarks(&self) -> Result<(), SyncError>;
    fn is_available(&self) -> Result<bool, SyncError>;
    fn set_available(&self, available: bool) -> Result<(), SyncError>;
}

impl<S: StateStore + ?Sized> SyncState for S {
    fn watermark(&self, table: &str) -> Result<Option<String>, SyncError> {
        self.get(&watermark_key(table))
    }

    fn set_watermark(&self, table: &str, value: &str) -> Result<(), SyncError> {
        self.set(&watermark_key(table), value)
    }

    fn clear_watermarks(&self) -> Result<(), SyncError> {
        for key in self.keys()? {
            if key.starts_with(WATERMARK_PREFIX) {
                self.remove(&key)?;
            }
        }
        Ok(())
    }

    fn is_available(&self) -> Result<bool, SyncError> {
        Ok(self.get(AVAILABLE_KEY)?.is_some())
    }

    fn set_available(&self, available: bool) -> Result<(), SyncError> {
        if available {
            self.set(AVAILABLE_KEY, "1")
        } else {
            self.remove(AVAILABLE_KEY)
        }
    }
}

fn poisoned<T>(_: T) -> SyncError {
    SyncError::State("state lock poisoned".to_string())
}

/// In-memory state, lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        Ok(self.values.lock().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        self.values
            .lock()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.values.lock().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, SyncError> {
        Ok(self.values.lock().map_err(poisoned)?.keys().cloned().collect())
    }
}

/// JSON-file backed state. Every write rewrites the file.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStateStore {
    /// Opens the store, loading existing values if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let path = path.into();
        let values = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| {
                SyncError::State(format!("failed to read {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&contents).map_err(|e| {
                SyncError::State(format!("failed to parse {}: {}", path.display(), e))
            })?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SyncError::State(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        let contents = serde_json::to_string_pretty(values)
            .map_err(|e| SyncError::State(e.to_string()))?;

        // Readers never see a partially written file.
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, contents)
            .and_then(|_| fs::rename(&tmp_path, &self.path))
            .map_err(|e| {
                SyncError::State(format!("failed to write {}: {}", self.path.display(), e))
            })
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        Ok(self.values.lock().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        let mut values = self.values.lock().map_err(poisoned)?;
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        let mut values = self.values.lock().map_err(poisoned)?;
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, SyncError> {
        Ok(self.values.lock().map_err(poisoned)?.keys().cloned().collect())
    }
}
