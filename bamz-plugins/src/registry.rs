//! Plugins known to the process, keyed by id.

use crate::{Plugin, PluginTask};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<BTreeMap<String, Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_plugin(self, plugin: impl Plugin + 'static) -> Self {
        self.register(Arc::new(plugin));
        self
    }

    /// Register `plugin`, replacing any previous plugin with the same id.
    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        self.plugins.write().insert(plugin.id().to_string(), plugin);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.plugins.read().contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        self.plugins.read().keys().cloned().collect()
    }

    /// Task handler `path` of plugin `id`.
    pub fn task(&self, id: &str, path: &str) -> Option<Arc<dyn PluginTask>> {
        self.get(id).and_then(|plugin| plugin.task(path))
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.ids())
            .finish()
    }
}
