use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use super::PersistenceAdapter;
use crate::error::{EngineError, EngineResult};

/// Default adapter: one JSON file per entity under `<root>/<kind>/`.
/// Writes go to `<id>.json.tmp` and are renamed into place so a crash never
/// leaves a torn record.
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    pub fn new(root: impl Into<PathBuf>, kind: &str) -> Self {
        let mut dir = root.into();
        dir.push(kind);
        Self { dir }
    }

    fn path_for(&self, entity_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", entity_id))
    }

    fn tmp_path_for(&self, entity_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json.tmp", entity_id))
    }
}

fn io_err(err: std::io::Error) -> EngineError {
    EngineError::PersistenceFailure(err.to_string())
}

#[async_trait]
impl PersistenceAdapter for FilePersistence {
    async fn wait_for_init(&self, initial: bool) -> EngineResult<()> {
        if initial {
            debug!("initializing persistence dir {}", self.dir.display());
        }
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)
    }

    async fn read_value(&self, entity_id: &str) -> EngineResult<Option<serde_json::Value>> {
        let path = self.path_for(entity_id);
        match tokio::fs::read(&path).await {
            Ok(raw) => {
                let value = serde_json::from_slice(&raw)
                    .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn has_value(&self, entity_id: &str) -> EngineResult<bool> {
        Ok(tokio::fs::try_exists(self.path_for(entity_id))
            .await
            .map_err(io_err)?)
    }

    async fn write_value(&self, entity_id: &str, entity: serde_json::Value) -> EngineResult<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let raw = serde_json::to_vec_pretty(&entity)
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;
        let tmp = self.tmp_path_for(entity_id);
        tokio::fs::write(&tmp, raw).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, self.path_for(entity_id))
            .await
            .map_err(io_err)
    }

    async fn remove_value(&self, entity_id: &str) -> EngineResult<()> {
        match tokio::fs::remove_file(self.path_for(entity_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn keys(&self) -> EngineResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(io_err(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(".json") {
                keys.push(id.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn values(&self) -> EngineResult<Vec<serde_json::Value>> {
        let mut values = Vec::new();
        for key in self.keys().await? {
            if let Some(value) = self.read_value(&key).await? {
                values.push(value);
            }
        }
        Ok(values)
    }
}
