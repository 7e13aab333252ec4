use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::PersistenceAdapter;
use crate::error::{EngineError, EngineResult};
use crate::types::SignalRow;

/// Signal persistence helper: one record per (strategy, symbol), writes
/// serialized through a per-id lock so concurrent symbols never interleave
/// on the same record.
pub struct SignalStore {
    adapter: Arc<dyn PersistenceAdapter>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SignalStore {
    pub fn new(adapter: Arc<dyn PersistenceAdapter>) -> Self {
        Self {
            adapter,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn init(&self, initial: bool) -> EngineResult<()> {
        self.adapter.wait_for_init(initial).await
    }

    async fn lock_for(&self, entity_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(entity_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    pub async fn read(&self, entity_id: &str) -> EngineResult<Option<SignalRow>> {
        let lock = self.lock_for(entity_id).await;
        let _guard = lock.lock().await;
        match self.adapter.read_value(entity_id).await? {
            Some(value) => {
                let row = serde_json::from_value(value)
                    .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    pub async fn write(&self, row: &SignalRow) -> EngineResult<()> {
        let entity_id = row.entity_id();
        let lock = self.lock_for(&entity_id).await;
        let _guard = lock.lock().await;
        let value = serde_json::to_value(row)
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;
        self.adapter.write_value(&entity_id, value).await
    }

    pub async fn remove(&self, entity_id: &str) -> EngineResult<()> {
        let lock = self.lock_for(entity_id).await;
        let _guard = lock.lock().await;
        self.adapter.remove_value(entity_id).await
    }
}
