//! Named remote config instances.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::remote_config::api::RemoteConfig;
use crate::remote_config::error::{invalid_argument, RemoteConfigResult};
use crate::remote_config::logger::LOGGER;

type InstanceFactory = Arc<dyn Fn(&str) -> RemoteConfig + Send + Sync>;

/// Owns one [`RemoteConfig`] per instance name.
///
/// The factory decides how instances created on first use are wired (storage backend, fetch
/// client); the default factory yields in-memory instances with the no-op fetch client.
pub struct RemoteConfigRegistry {
    instances: Mutex<HashMap<String, RemoteConfig>>,
    factory: InstanceFactory,
}

impl RemoteConfigRegistry {
    pub fn new() -> Self {
        Self::with_factory(|name: &str| RemoteConfig::new(name))
    }

    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn(&str) -> RemoteConfig + Send + Sync + 'static,
    {
        Self {
            instances: Mutex::new(HashMap::new()),
            factory: Arc::new(factory),
        }
    }

    fn instances(&self) -> MutexGuard<'_, HashMap<String, RemoteConfig>> {
        self.instances
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Creates a new instance through the factory. Fails if `name` is empty or already taken.
    pub fn create(&self, name: &str) -> RemoteConfigResult<RemoteConfig> {
        validate_name(name)?;
        let mut instances = self.instances();
        if instances.contains_key(name) {
            return Err(invalid_argument(format!(
                "remote config instance '{name}' already exists"
            )));
        }
        let instance = (self.factory)(name);
        instances.insert(name.to_owned(), instance.clone());
        Ok(instance)
    }

    /// Registers an externally built instance under its own name, replacing any previous one.
    pub fn insert(&self, instance: RemoteConfig) -> RemoteConfigResult<Option<RemoteConfig>> {
        validate_name(instance.name())?;
        Ok(self
            .instances()
            .insert(instance.name().to_owned(), instance))
    }

    pub fn get(&self, name: &str) -> Option<RemoteConfig> {
        self.instances().get(name).cloned()
    }

    pub fn get_or_create(&self, name: &str) -> RemoteConfigResult<RemoteConfig> {
        validate_name(name)?;
        let mut instances = self.instances();
        if let Some(instance) = instances.get(name) {
            return Ok(instance.clone());
        }
        let instance = (self.factory)(name);
        instances.insert(name.to_owned(), instance.clone());
        LOGGER.debug(format!("created remote config instance '{name}'"));
        Ok(instance)
    }

    /// Drops the registry's handle; clones held elsewhere stay usable.
    pub fn remove(&self, name: &str) -> Option<RemoteConfig> {
        self.instances().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for RemoteConfigRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RemoteConfigRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfigRegistry")
            .field("instances", &self.names())
            .finish()
    }
}

fn validate_name(name: &str) -> RemoteConfigResult<()> {
    if name.is_empty() {
        return Err(invalid_argument("remote config instance name must not be empty"));
    }
    Ok(())
}
