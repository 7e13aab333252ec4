use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::Schema;
use crate::error::{EngineError, EngineResult};

/// Named, immutable schema storage. Registration is write-once per name;
/// `override_with` performs an explicit partial replace. Schemas are never
/// destroyed.
pub struct SchemaRegistry<T: Schema> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: Schema> SchemaRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, schema: T) -> EngineResult<()> {
        schema
            .validate_shallow()
            .map_err(|reason| EngineError::UserCallback {
                callback: "schema",
                reason,
            })?;

        let name = schema.name().to_string();
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if entries.contains_key(&name) {
            return Err(EngineError::DuplicateSchema {
                kind: T::KIND,
                name,
            });
        }
        debug!("registered {} schema '{}'", T::KIND, name);
        entries.insert(name, Arc::new(schema));
        Ok(())
    }

    /// Replace the stored schema with `f(current)`. Fails if absent.
    pub fn override_with(&self, name: &str, f: impl FnOnce(&T) -> T) -> EngineResult<()> {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        let current = entries.get(name).ok_or_else(|| EngineError::SchemaMissing {
            kind: T::KIND,
            name: name.to_string(),
        })?;
        let replacement = f(current);
        replacement
            .validate_shallow()
            .map_err(|reason| EngineError::UserCallback {
                callback: "schema",
                reason,
            })?;
        debug!("overrode {} schema '{}'", T::KIND, name);
        entries.insert(name.to_string(), Arc::new(replacement));
        Ok(())
    }

    pub fn get(&self, name: &str) -> EngineResult<Arc<T>> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::SchemaMissing {
                kind: T::KIND,
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .contains_key(name)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl<T: Schema> Default for SchemaRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
