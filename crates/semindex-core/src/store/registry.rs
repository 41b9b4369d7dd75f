//! Provider name → adapter constructor map.
//!
//! A registry is a plain value: every [`AdapterRegistry::new`] call builds
//! a fresh map, and registering a provider mutates only that instance.
//! There is no process-wide registry, so a custom provider registered by
//! one caller can never leak into another's.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use semindex_core::store::memory::MemoryAdapter;
//! use semindex_core::store::registry::AdapterRegistry;
//! use semindex_core::store::StorageAdapter;
//!
//! let mut registry = AdapterRegistry::new();
//! registry.register("scratch", || Arc::new(MemoryAdapter::new()) as Arc<dyn StorageAdapter>);
//! assert!(registry.contains("scratch"));
//! assert!(!AdapterRegistry::new().contains("scratch"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{IndexError, Result};

use super::memory::{MemoryAdapter, PROVIDER as MEMORY_PROVIDER};
use super::{AdapterConfig, StorageAdapter, DEFAULT_PROVIDER};

/// Builds an uninitialized adapter.
pub type AdapterConstructor = Arc<dyn Fn() -> Arc<dyn StorageAdapter> + Send + Sync>;

#[derive(Clone)]
pub struct AdapterRegistry {
    constructors: HashMap<String, AdapterConstructor>,
}

impl AdapterRegistry {
    /// A registry holding only the built-in `memory` provider.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(MEMORY_PROVIDER, || {
            Arc::new(MemoryAdapter::new()) as Arc<dyn StorageAdapter>
        });
        registry
    }

    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Add a provider, replacing any existing one with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn StorageAdapter> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve `config.provider` (empty means `memory`), construct the
    /// adapter and initialize it.
    pub async fn create(&self, config: &AdapterConfig) -> Result<Arc<dyn StorageAdapter>> {
        let name = if config.provider.trim().is_empty() {
            DEFAULT_PROVIDER
        } else {
            config.provider.as_str()
        };
        let constructor = self.constructors.get(name).ok_or_else(|| {
            IndexError::Configuration(format!(
                "unknown storage provider '{}' (registered: {})",
                name,
                self.providers().join(", ")
            ))
        })?;
        let adapter = constructor();
        adapter.initialize(config).await?;
        debug!(
            provider = name,
            dimension = config.options.dimension,
            "storage adapter initialized"
        );
        Ok(adapter)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}
