//! No-op store. Disables cache persistence entirely.

use answerflow_core::error::CacheError;
use answerflow_core::store::KeyValueStore;
use async_trait::async_trait;

/// A store that keeps nothing. The cache still works in memory for the
/// lifetime of the process; nothing survives a restart.
pub struct NoopStore;

#[async_trait]
impl KeyValueStore for NoopStore {
    fn name(&self) -> &str { "none" }

    async fn get(&self, _key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: serde_json::Value) -> Result<(), CacheError> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
}
