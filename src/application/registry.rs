// Registry of named data sources and the factories that build them
use crate::application::data_source::{DataSource, DataSourceFactory};
use crate::domain::query::{DataSourceConfig, DataSourceType, QueryError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("data source already registered: {0}")]
    AlreadyRegistered(String),

    #[error("data source not found: {0}")]
    NotFound(String),

    #[error("no factory registered for data source type {0}")]
    UnsupportedType(DataSourceType),

    #[error("failed to create data source {id}: {source}")]
    Factory {
        id: String,
        #[source]
        source: QueryError,
    },

    #[error("failed to close {} data source(s): {}", .0.len(), format_close_errors(.0))]
    Close(Vec<(String, QueryError)>),
}

fn format_close_errors(errors: &[(String, QueryError)]) -> String {
    errors
        .iter()
        .map(|(id, err)| format!("{id}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Concurrency-safe map of data source id to live instance. Lookups share a
/// read lock; registration and removal take the write lock.
#[derive(Default)]
pub struct Registry {
    sources: RwLock<HashMap<String, Arc<dyn DataSource>>>,
    factories: RwLock<HashMap<DataSourceType, Arc<dyn DataSourceFactory>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: impl Into<String>, source: Arc<dyn DataSource>) -> Result<(), RegistryError> {
        let id = id.into();
        let mut sources = write(&self.sources);
        if sources.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }

        tracing::info!(
            data_source = %id,
            kind = %source.metadata().kind,
            "Registered data source"
        );
        sources.insert(id, source);
        Ok(())
    }

    pub fn unregister(&self, id: &str) -> Result<Arc<dyn DataSource>, RegistryError> {
        write(&self.sources)
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn DataSource>, RegistryError> {
        read(&self.sources)
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        read(&self.sources).contains_key(id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = read(&self.sources).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn register_factory(&self, factory: Arc<dyn DataSourceFactory>) {
        let kind = factory.supported_type();
        write(&self.factories).insert(kind, factory);
    }

    /// Build a data source with the factory for `config.kind` without registering it.
    pub async fn create_from_config(&self, config: &DataSourceConfig) -> Result<Arc<dyn DataSource>, RegistryError> {
        let factory = read(&self.factories)
            .get(&config.kind)
            .cloned()
            .ok_or(RegistryError::UnsupportedType(config.kind))?;

        let factory_err = |source| RegistryError::Factory {
            id: config.id.clone(),
            source,
        };
        factory.validate_config(config).map_err(factory_err)?;
        factory.create(config).await.map_err(factory_err)
    }

    /// Build and register a data source under `config.id`.
    pub async fn register_from_config(&self, config: &DataSourceConfig) -> Result<(), RegistryError> {
        if self.contains(&config.id) {
            return Err(RegistryError::AlreadyRegistered(config.id.clone()));
        }
        let source = self.create_from_config(config).await?;
        self.register(config.id.clone(), source)
    }

    /// Close and remove every registered data source. All sources are closed
    /// even when some fail; the failures are reported together.
    pub async fn close_all(&self) -> Result<(), RegistryError> {
        let drained: Vec<(String, Arc<dyn DataSource>)> = write(&self.sources).drain().collect();

        let mut failures = Vec::new();
        for (id, source) in drained {
            if let Err(err) = source.close().await {
                tracing::warn!(data_source = %id, error = %err, "Failed to close data source");
                failures.push((id, err));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Close(failures))
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

static DEFAULT_REGISTRY: RwLock<Option<Arc<Registry>>> = RwLock::new(None);

/// Install the process-wide registry. Fails, returning the argument, when one
/// is already installed.
pub fn install_default(registry: Arc<Registry>) -> Result<(), Arc<Registry>> {
    let mut slot = write(&DEFAULT_REGISTRY);
    if slot.is_some() {
        return Err(registry);
    }
    *slot = Some(registry);
    Ok(())
}

pub fn default_registry() -> Option<Arc<Registry>> {
    read(&DEFAULT_REGISTRY).clone()
}

/// Remove the process-wide registry, handing it back for shutdown.
pub fn take_default() -> Option<Arc<Registry>> {
    write(&DEFAULT_REGISTRY).take()
}
