//! Plugin-based adapter registry
//!
//! Provider crates register an [`AdapterFactory`] per connector name;
//! the daemon then builds adapters from configuration without knowing
//! any provider type.
//!
//! ## Registration
//!
//! ```rust,ignore
//! // In a provider crate
//! pub fn register(registry: &AdapterRegistry) {
//!     registry.register_adapter("fitbit", Box::new(FitbitFactory));
//! }
//! ```

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::config::{ConnectorConfig, SyncConfig};
use crate::error::{Error, Result};
use crate::traits::{AdapterFactory, ProviderAdapter};

/// Registry of adapter factories keyed by connector name
///
/// ## Thread Safety
///
/// Registration takes a write lock; creation and listing share a read lock.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, Box<dyn AdapterFactory>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any earlier one with the same name
    pub fn register_adapter(&self, name: impl Into<String>, factory: Box<dyn AdapterFactory>) {
        let mut adapters = self.adapters.write().unwrap_or_else(PoisonError::into_inner);
        adapters.insert(name.into(), factory);
    }

    /// Create the adapter for one connector
    ///
    /// # Returns
    ///
    /// - `Err(Error::UnknownConnector)`: no factory registered under `config.name`
    /// - `Err(Error::Config)`: the factory rejected the configuration
    pub fn create_adapter(&self, config: &ConnectorConfig) -> Result<Box<dyn ProviderAdapter>> {
        let adapters = self.adapters.read().unwrap_or_else(PoisonError::into_inner);
        let factory = adapters
            .get(&config.name)
            .ok_or_else(|| Error::UnknownConnector(config.name.clone()))?;
        factory.create(config)
    }

    /// Create the adapters of every configured connector
    pub fn create_all(&self, config: &SyncConfig) -> Result<Vec<Box<dyn ProviderAdapter>>> {
        config
            .connectors
            .iter()
            .map(|connector| self.create_adapter(connector))
            .collect()
    }

    /// Registered connector names, sorted
    pub fn list_adapters(&self) -> Vec<String> {
        let adapters = self.adapters.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_adapter(&self, name: &str) -> bool {
        let adapters = self.adapters.read().unwrap_or_else(PoisonError::into_inner);
        adapters.contains_key(name)
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.list_adapters())
            .finish()
    }
}
