use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::document::{DocRepository, DocumentStore};
use crate::errors::{ErrorKind, RelataError, RelataResult};
use crate::model::ModelRegistry;

/// Settings of one named document-store connection.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DocumentSettings {
    pub name: String,
    pub uri: String,
    pub database: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Opens a store from connection settings.
pub type DocumentStoreFactory =
    Arc<dyn Fn(&DocumentSettings) -> RelataResult<Arc<dyn DocumentStore>> + Send + Sync>;

/// Named pool of lazily opened document stores, the document-side
/// counterpart of the relational connection pool.
#[derive(Clone)]
pub struct DocumentConnections {
    settings: Arc<DashMap<String, DocumentSettings>>,
    stores: Arc<DashMap<String, Arc<dyn DocumentStore>>>,
    factory: DocumentStoreFactory,
    registry: ModelRegistry,
}

impl DocumentConnections {
    pub fn new(factory: DocumentStoreFactory, registry: ModelRegistry) -> Self {
        DocumentConnections {
            settings: Arc::new(DashMap::new()),
            stores: Arc::new(DashMap::new()),
            factory,
            registry,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn add_settings(&self, settings: DocumentSettings) {
        self.settings.insert(settings.name.clone(), settings);
    }

    /// Returns the store for a named connection, opening it on first
    /// use.
    pub fn connection(&self, name: &str) -> RelataResult<Arc<dyn DocumentStore>> {
        if let Some(existing) = self.stores.get(name) {
            return Ok(existing.value().clone());
        }
        let settings = match self.settings.get(name) {
            Some(entry) => entry.value().clone(),
            None => {
                log::error!("unknown connection '{}'", name);
                return Err(RelataError::new(
                    &format!("unknown connection '{}'", name),
                    ErrorKind::UnknownConnection,
                ));
            }
        };
        let store = (self.factory)(&settings)?;
        self.stores.insert(name.to_string(), store.clone());
        Ok(store)
    }

    /// The store registered under the name `default`.
    pub fn default_connection(&self) -> RelataResult<Arc<dyn DocumentStore>> {
        self.connection("default")
    }

    /// A repository for the named entity on the named connection.
    pub fn repository(&self, connection: &str, entity: &str) -> RelataResult<DocRepository> {
        let store = self.connection(connection)?;
        let model = self.registry.get(entity)?;
        DocRepository::new(model, self.registry.clone(), store)
    }
}
