//! KeyValueStore trait: the response cache's backing storage.
//!
//! The cache persists itself as a single JSON document under one string key.
//! Anything that can get, set and remove JSON values by key can back it: an
//! in-memory map in tests, a file for the CLI, or nothing at all.

use async_trait::async_trait;
use crate::error::CacheError;

/// The core KeyValueStore trait.
///
/// Implementations: in-memory, JSON file, none (no-op).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// The backend name (e.g., "memory", "file", "none").
    fn name(&self) -> &str;

    /// Read the value stored under `key`.
    async fn get(&self, key: &str) -> std::result::Result<Option<serde_json::Value>, CacheError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: serde_json::Value) -> std::result::Result<(), CacheError>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> std::result::Result<(), CacheError>;
}
