//! Service contracts
//!
//! The two traits every pluggable unit implements: [`ServicePlugin`],
//! the factory side that declares dependency and export names and a
//! config schema, and [`Service`], the live instance side with the
//! install/start/stop lifecycle. Both are deliberately synchronous;
//! the controller drives them stage by stage.
//!
//! Exported values are opaque shared handles. A service exports
//! whatever it likes under its declared names; dependents receive the
//! same handles under their own declared names and downcast them to
//! the concrete type they expect.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use serde_json::{Map, Value};

/// An opaque value exported by one service and consumed by others.
pub type Export = Arc<dyn Any + Send + Sync>;

/// Dependencies resolved for construction, keyed by the plugin's
/// declared dependency names (overrides are already mapped back).
pub struct Dependencies {
    values: HashMap<String, Export>,
}

impl Dependencies {
    pub(crate) fn new(values: HashMap<String, Export>) -> Self {
        Self { values }
    }

    /// The raw exported handle for a declared dependency name.
    pub fn raw(&self, name: &str) -> Option<&Export> {
        self.values.get(name)
    }

    /// Downcast the dependency under `name` to a concrete type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| anyhow!("no dependency named \"{name}\" was resolved"))?;
        value
            .clone()
            .downcast::<T>()
            .map_err(|_| anyhow!("dependency \"{name}\" has an unexpected type"))
    }

    /// Declared names of all resolved dependencies.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Factory contract for a pluggable service unit.
///
/// Dependency and export names are declared explicitly; nothing is
/// inferred from constructor shapes. Declared names are the ones
/// config overrides are checked against.
pub trait ServicePlugin: Send + Sync {
    /// Default display name, when the plugin has one. Entries that
    /// omit `$name` fail to resolve against a plugin without one.
    fn default_name(&self) -> Option<&str> {
        None
    }

    /// Declared dependency names (pre-override).
    fn dependency_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Declared export names (pre-override).
    fn export_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// JSON Schema the residual (control-key-stripped) config entry
    /// must satisfy. Permissive by default.
    fn config_schema(&self) -> Value {
        Value::Object(Map::new())
    }

    /// Construct a service instance from the residual config and the
    /// resolved dependencies.
    fn construct(&self, config: &Map<String, Value>, deps: &Dependencies)
        -> Result<Box<dyn Service>>;
}

/// Lifecycle contract for a constructed service.
///
/// Every operation defaults to a no-op so plugins only override what
/// they need. `job` is the exception: a service without jobs reports
/// that itself.
pub trait Service: Send {
    /// Whether one-time installation has already happened. Services
    /// that need installation override this; the controller calls
    /// `install` only when this returns false.
    fn installed(&self) -> bool {
        true
    }

    /// One-time environment setup (files, folders, schemas).
    fn install(&mut self) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Delete any persistent data this service created.
    fn purge(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run an ad-hoc job with positional string arguments.
    fn job(&mut self, _args: &[String]) -> Result<()> {
        bail!("no jobs implemented for this service")
    }

    /// Values this service makes available to dependents, keyed by
    /// declared export name.
    fn exports(&self) -> HashMap<String, Export> {
        HashMap::new()
    }
}

/// A constructed service bound to its resolved instance name.
pub struct ServiceInstance {
    name: String,
    service: Box<dyn Service>,
}

impl std::fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ServiceInstance {
    pub(crate) fn new(name: String, service: Box<dyn Service>) -> Self {
        Self { name, service }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> &dyn Service {
        self.service.as_ref()
    }

    pub fn service_mut(&mut self) -> &mut dyn Service {
        self.service.as_mut()
    }
}

/// Shared registry of exported values, keyed by effective (override-
/// applied) export name. Each key is written exactly once, by exactly
/// one service's stage, and is read-only thereafter.
#[derive(Default)]
pub struct ExportRegistry {
    values: HashMap<String, Export>,
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Export> {
        self.values.get(name)
    }

    /// Downcast the export under `name` to a concrete type.
    pub fn get_as<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| anyhow!("no export named \"{name}\""))?;
        value
            .clone()
            .downcast::<T>()
            .map_err(|_| anyhow!("export \"{name}\" has an unexpected type"))
    }

    pub fn insert(&mut self, name: String, value: Export) {
        self.values.insert(name, value);
    }

    /// Merge a fully staged batch of exports. The controller calls
    /// this only after an entire stage has come up.
    pub fn merge(&mut self, staged: ExportRegistry) {
        self.values.extend(staged.values);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
