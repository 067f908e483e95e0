use std::sync::Arc;

use dashmap::DashMap;

use crate::errors::{ErrorKind, RelataError, RelataResult};
use crate::model::{EntityHooks, EntityModel, NoHooks};

/// Name-keyed catalog of entity models.
///
/// Repositories and relation loaders resolve target models through the
/// registry, so every model reachable through a relation must be
/// registered before relations involving it are loaded. Lifecycle
/// hooks attach here as well, keyed by model name, and repositories
/// pick them up at construction time.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: Arc<DashMap<String, Arc<EntityModel>>>,
    hooks: Arc<DashMap<String, Arc<dyn EntityHooks>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        ModelRegistry {
            models: Arc::new(DashMap::new()),
            hooks: Arc::new(DashMap::new()),
        }
    }

    /// Registers `model` under its own name, replacing any previous
    /// registration, and returns the shared handle.
    pub fn register(&self, model: EntityModel) -> Arc<EntityModel> {
        let model = Arc::new(model);
        self.models.insert(model.name().to_string(), model.clone());
        model
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Attaches lifecycle hooks to the model with that name. Later
    /// registrations replace earlier ones.
    pub fn set_hooks(&self, name: &str, hooks: Arc<dyn EntityHooks>) {
        self.hooks.insert(name.to_string(), hooks);
    }

    /// Hooks registered for `name`, or the no-op set.
    pub fn hooks_for(&self, name: &str) -> Arc<dyn EntityHooks> {
        match self.hooks.get(name) {
            Some(entry) => entry.value().clone(),
            None => Arc::new(NoHooks),
        }
    }

    /// # Errors
    ///
    /// Returns an error if no model with that name has been
    /// registered.
    pub fn get(&self, name: &str) -> RelataResult<Arc<EntityModel>> {
        match self.models.get(name) {
            Some(entry) => Ok(entry.value().clone()),
            None => {
                log::error!("entity model '{}' is not registered", name);
                Err(RelataError::new(
                    &format!("entity model '{}' is not registered", name),
                    ErrorKind::InvalidEntityClass,
                ))
            }
        }
    }
}
