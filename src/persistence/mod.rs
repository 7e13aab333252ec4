pub mod file;
pub mod memory;
pub mod store;

pub use file::FilePersistence;
pub use memory::MemoryPersistence;
pub use store::SignalStore;

use async_trait::async_trait;

use crate::error::EngineResult;

/// Pluggable keyed entity store. Implementations must be safe for
/// concurrent calls on distinct entity ids; per-id serialization is handled
/// above the adapter by `SignalStore`.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Prepare the backing store. Idempotent; `initial` distinguishes the
    /// first call of a process from later re-checks.
    async fn wait_for_init(&self, initial: bool) -> EngineResult<()>;

    async fn read_value(&self, entity_id: &str) -> EngineResult<Option<serde_json::Value>>;

    async fn has_value(&self, entity_id: &str) -> EngineResult<bool>;

    /// Atomic write: readers observe either the previous or the new value.
    async fn write_value(&self, entity_id: &str, entity: serde_json::Value) -> EngineResult<()>;

    async fn remove_value(&self, entity_id: &str) -> EngineResult<()>;

    async fn keys(&self) -> EngineResult<Vec<String>>;

    async fn values(&self) -> EngineResult<Vec<serde_json::Value>>;
}
