use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::ChatEngine;

/// Owner of every engine handle that finished initialization, keyed by model
/// id. The single source of truth for "is this model usable".
///
/// No removal path exists: once a model is loaded its handle lives until
/// process exit. Eviction under memory pressure is an open extension and
/// would need coordination with the active selection.
pub struct EngineRegistry {
    engines: RwLock<HashMap<String, Arc<dyn ChatEngine>>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            engines: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handle for `id`. Idempotent per id: the first handle wins
    /// and later calls for the same id are ignored. Returns whether the
    /// handle was stored.
    pub async fn register(&self, id: &str, engine: Arc<dyn ChatEngine>) -> bool {
        let mut engines = self.engines.write().await;
        if engines.contains_key(id) {
            debug!(target: "hearth::engine", model = %id, "duplicate engine registration ignored");
            return false;
        }
        engines.insert(id.to_string(), engine);
        true
    }

    /// Shared handle for `id`, if the model finished loading.
    pub async fn get(&self, id: &str) -> Option<Arc<dyn ChatEngine>> {
        self.engines.read().await.get(id).cloned()
    }

    pub async fn has(&self, id: &str) -> bool {
        self.engines.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.engines.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.engines.read().await.is_empty()
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
