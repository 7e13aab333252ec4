use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::PersistenceAdapter;
use crate::error::EngineResult;

/// In-memory adapter. Used by backtests (nothing survives the run anyway)
/// and as the test substitute.
#[derive(Default)]
pub struct MemoryPersistence {
    entries: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryPersistence {
    async fn wait_for_init(&self, _initial: bool) -> EngineResult<()> {
        Ok(())
    }

    async fn read_value(&self, entity_id: &str) -> EngineResult<Option<serde_json::Value>> {
        Ok(self.entries.read().await.get(entity_id).cloned())
    }

    async fn has_value(&self, entity_id: &str) -> EngineResult<bool> {
        Ok(self.entries.read().await.contains_key(entity_id))
    }

    async fn write_value(&self, entity_id: &str, entity: serde_json::Value) -> EngineResult<()> {
        self.entries.write().await.insert(entity_id.to_string(), entity);
        Ok(())
    }

    async fn remove_value(&self, entity_id: &str) -> EngineResult<()> {
        self.entries.write().await.remove(entity_id);
        Ok(())
    }

    async fn keys(&self) -> EngineResult<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn values(&self) -> EngineResult<Vec<serde_json::Value>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }
}
