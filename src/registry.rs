//! Plugin registry
//!
//! An explicit registry value passed into controller construction.
//! Nothing here is process-global: embedders build a registry at
//! startup, register their plugins, and hand it to [`crate::Controller`];
//! tests construct a fresh registry per case.
//!
//! Look-ups come in two flavors, matching the two ways a config entry
//! can identify its implementation: an explicit `$plugin` reference
//! (exact match, falling back to an optional [`PluginLoader`]) and a
//! `$name` display name (case-insensitive match against registered
//! default names).

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::error::ConductorError;
use crate::service::ServicePlugin;

/// Why a plugin reference failed to load.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Nothing is registered (or loadable) under the reference.
    #[error("no plugin is registered under this reference")]
    NotFound,

    /// The reference resolved to something that does not satisfy the
    /// plugin contract.
    #[error("the reference resolved to something that is not a service plugin: {detail}")]
    WrongShape { detail: String },

    /// The loader itself failed.
    #[error("loader failed: {0}")]
    Failed(anyhow::Error),
}

/// Seam for string-based plugin loading. The registry consults its
/// loader only for references it has no direct registration for, so
/// deployments that need dynamic loading isolate it behind this one
/// trait.
pub trait PluginLoader: Send + Sync {
    fn load(&self, reference: &str) -> Result<Arc<dyn ServicePlugin>, LoadError>;
}

/// Registry of available plugins.
#[derive(Default)]
pub struct PluginRegistry {
    by_reference: HashMap<String, Arc<dyn ServicePlugin>>,
    // Keyed by lowercased default name.
    by_name: HashMap<String, Arc<dyn ServicePlugin>>,
    loader: Option<Box<dyn PluginLoader>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that falls back to `loader` for unknown references.
    pub fn with_loader(loader: Box<dyn PluginLoader>) -> Self {
        Self {
            loader: Some(loader),
            ..Self::default()
        }
    }

    /// Register a plugin under an explicit reference. The plugin's
    /// default name, when present, is also indexed for `$name`-only
    /// config entries. Registering over an existing reference or
    /// default name is an error.
    pub fn register(
        &mut self,
        reference: impl Into<String>,
        plugin: Arc<dyn ServicePlugin>,
    ) -> Result<(), ConductorError> {
        let reference = reference.into();
        if self.by_reference.contains_key(&reference) {
            return Err(ConductorError::DuplicateRegistration { key: reference });
        }
        if let Some(name) = plugin.default_name() {
            let key = name.to_lowercase();
            if self.by_name.contains_key(&key) {
                return Err(ConductorError::DuplicateRegistration {
                    key: name.to_string(),
                });
            }
            self.by_name.insert(key, plugin.clone());
        }
        debug!(reference = %reference, "registered plugin");
        self.by_reference.insert(reference, plugin);
        Ok(())
    }

    /// Register a plugin under a display name only, for configs that
    /// identify services by `$name`. Lookup is case-insensitive, so
    /// names colliding after lowercasing are rejected.
    pub fn register_named(
        &mut self,
        name: impl Into<String>,
        plugin: Arc<dyn ServicePlugin>,
    ) -> Result<(), ConductorError> {
        let name = name.into();
        let key = name.to_lowercase();
        if self.by_name.contains_key(&key) {
            return Err(ConductorError::DuplicateRegistration { key: name });
        }
        debug!(name = %name, "registered named plugin");
        self.by_name.insert(key, plugin);
        Ok(())
    }

    /// Resolve an explicit `$plugin` reference, consulting the loader
    /// for references with no direct registration.
    pub fn load(&self, reference: &str) -> Result<Arc<dyn ServicePlugin>, LoadError> {
        if let Some(plugin) = self.by_reference.get(reference) {
            return Ok(plugin.clone());
        }
        match &self.loader {
            Some(loader) => loader.load(reference),
            None => Err(LoadError::NotFound),
        }
    }

    /// Resolve a display name, case-insensitive.
    pub fn find_named(&self, name: &str) -> Option<Arc<dyn ServicePlugin>> {
        self.by_name.get(&name.to_lowercase()).cloned()
    }

    /// Registered references, sorted.
    pub fn references(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = self.by_reference.keys().map(String::as_str).collect();
        refs.sort_unstable();
        refs
    }

    pub fn len(&self) -> usize {
        self.by_reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_reference.is_empty()
    }
}
