use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, RelataError, RelataResult};
use crate::model::ModelRegistry;
use crate::relational::{SqlDriver, SqlRepository};

/// Settings of one named relational connection.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SqlSettings {
    pub name: String,
    pub dsn: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Driver-specific options passed through verbatim.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Opens a driver from connection settings.
pub type SqlDriverFactory =
    Arc<dyn Fn(&SqlSettings) -> RelataResult<Arc<dyn SqlDriver>> + Send + Sync>;

/// Named pool of lazily opened relational connections.
///
/// Settings are registered up front, a driver is opened through the
/// factory on first use and cached for the life of the provider.
/// Repositories are handed out bound to a connection and the shared
/// model registry.
#[derive(Clone)]
pub struct SqlConnections {
    settings: Arc<DashMap<String, SqlSettings>>,
    connections: Arc<DashMap<String, Arc<dyn SqlDriver>>>,
    factory: SqlDriverFactory,
    registry: ModelRegistry,
}

impl SqlConnections {
    pub fn new(factory: SqlDriverFactory, registry: ModelRegistry) -> Self {
        SqlConnections {
            settings: Arc::new(DashMap::new()),
            connections: Arc::new(DashMap::new()),
            factory,
            registry,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn add_settings(&self, settings: SqlSettings) {
        self.settings.insert(settings.name.clone(), settings);
    }

    /// Returns the driver for a named connection, opening it on first
    /// use.
    ///
    /// # Errors
    ///
    /// Returns an error when no settings were registered under that
    /// name, or when the factory fails to open the connection.
    pub fn connection(&self, name: &str) -> RelataResult<Arc<dyn SqlDriver>> {
        if let Some(existing) = self.connections.get(name) {
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
        let driver = (self.factory)(&settings)?;
        self.connections.insert(name.to_string(), driver.clone());
        Ok(driver)
    }

    /// The connection registered under the name `default`.
    pub fn default_connection(&self) -> RelataResult<Arc<dyn SqlDriver>> {
        self.connection("default")
    }

    /// A repository for the named entity on the named connection.
    pub fn repository(&self, connection: &str, entity: &str) -> RelataResult<SqlRepository> {
        let driver = self.connection(connection)?;
        let model = self.registry.get(entity)?;
        Ok(SqlRepository::new(model, self.registry.clone(), driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityModel, PropertyMeta, PropertyType};
    use crate::relational::MockSqlDriver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn provider() -> (SqlConnections, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = opened.clone();
        let factory: SqlDriverFactory = Arc::new(move |_settings| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockSqlDriver::new()) as Arc<dyn SqlDriver>)
        });
        let registry = ModelRegistry::new();
        registry.register(
            EntityModel::builder("user")
                .table("users")
                .property(PropertyMeta::new("name", PropertyType::Str))
                .build()
                .unwrap(),
        );
        (SqlConnections::new(factory, registry), opened)
    }

    #[test]
    fn connection_is_opened_once_and_cached() {
        let (connections, opened) = provider();
        connections.add_settings(SqlSettings {
            name: "main".into(),
            dsn: "mock:main".into(),
            ..Default::default()
        });
        connections.connection("main").unwrap();
        connections.connection("main").unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_connection_is_an_error() {
        let (connections, _) = provider();
        let err = connections.connection("nope").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UnknownConnection);
    }

    #[test]
    fn repository_binds_model_and_connection() {
        let (connections, _) = provider();
        connections.add_settings(SqlSettings {
            name: "main".into(),
            dsn: "mock:main".into(),
            ..Default::default()
        });
        let repository = connections.repository("main", "user").unwrap();
        assert_eq!(repository.model().name(), "user");
        assert!(connections.repository("main", "ghost").is_err());
    }

    #[test]
    fn settings_round_trip_through_serde() {
        let settings = SqlSettings {
            name: "main".into(),
            dsn: "mysql://localhost/app".into(),
            username: Some("app".into()),
            password: None,
            options: BTreeMap::new(),
        };
        let json = serde_json::to_string(&settings).unwrap();
        let back: SqlSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.dsn, settings.dsn);
        assert_eq!(back.username.as_deref(), Some("app"));
    }
}
