//! File-based store: a single JSON object on disk.
//!
//! Each key of the store is a top-level member of the object. The CLI uses
//! this backend so cached answers survive between invocations until
//! `answerflow logout` tears them down.
//!
//! Storage location: `~/.answerflow/cache.json` unless configured otherwise.

use answerflow_core::error::CacheError;
use answerflow_core::store::KeyValueStore;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A file-backed key-value store.
///
/// Values are loaded into memory on creation and flushed to disk on every
/// mutation. This gives fast reads with durable writes.
pub struct FileStore {
    path: PathBuf,
    values: Arc<RwLock<Map<String, Value>>>,
}

impl FileStore {
    /// Open the store at the given path.
    ///
    /// If the file exists, values are loaded from it. If the file does not
    /// exist, starts empty (file created on first write).
    pub fn new(path: PathBuf) -> Self {
        let values = Self::load_from_disk(&path);
        debug!(path = %path.display(), keys = values.len(), "File store loaded");
        Self {
            path,
            values: Arc::new(RwLock::new(values)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Map<String, Value> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Map::new(), // Not written yet
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                warn!(path = %path.display(), "Store file is not a JSON object, starting empty");
                Map::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping corrupted store file");
                Map::new()
            }
        }
    }

    /// Write every value to disk.
    fn flush(&self, values: &Map<String, Value>) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::Storage(format!("Failed to create store directory: {e}"))
            })?;
        }

        let content = serde_json::to_string_pretty(values).map_err(|e| {
            CacheError::Storage(format!("Failed to serialize store: {e}"))
        })?;

        std::fs::write(&self.path, content).map_err(|e| {
            CacheError::Storage(format!("Failed to write store file: {e}"))
        })
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), CacheError> {
        let mut values = self.values.write().await;
        values.insert(key.to_string(), value);
        self.flush(&values)
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut values = self.values.write().await;
        if values.remove(key).is_none() {
            return Ok(());
        }
        if values.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(CacheError::Storage(format!(
                    "Failed to remove store file: {e}"
                ))),
            };
        }
        self.flush(&values)
    }
}
