//! Service descriptors.
//!
//! A descriptor is one resolved entry from the controller config's
//! `services` list: the plugin that will construct the service, the
//! name the running instance will go by, the plugin-specific residual
//! config, and any dependency/export renames. Resolution is a pure
//! parse: the input entry is read, never mutated, so a failed resolve
//! leaves the caller's config exactly as it was.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config;
use crate::error::ConductorError;
use crate::registry::{LoadError, PluginRegistry};
use crate::service::{Dependencies, Export, ExportRegistry, ServiceInstance, ServicePlugin};

/// Control key naming the plugin reference.
pub const PLUGIN_KEY: &str = "$plugin";
/// Control key naming the service instance.
pub const NAME_KEY: &str = "$name";
/// Control key renaming consumed dependencies.
pub const DEP_OVERRIDES_KEY: &str = "$dep-overrides";
/// Control key renaming published exports.
pub const EXPORT_OVERRIDES_KEY: &str = "$export-overrides";

const CONTROL_KEYS: [&str; 4] = [PLUGIN_KEY, NAME_KEY, DEP_OVERRIDES_KEY, EXPORT_OVERRIDES_KEY];

/// One resolved `services` entry, ready to be staged and invoked.
#[derive(Clone)]
pub struct ServiceDescriptor {
    plugin: Arc<dyn ServicePlugin>,
    reference: String,
    name: String,
    config: Map<String, Value>,
    dep_overrides: BTreeMap<String, String>,
    export_overrides: BTreeMap<String, String>,
}

impl std::fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("reference", &self.reference)
            .field("name", &self.name)
            .field("config", &self.config)
            .field("dep_overrides", &self.dep_overrides)
            .field("export_overrides", &self.export_overrides)
            .finish_non_exhaustive()
    }
}

impl ServiceDescriptor {
    /// Resolve a config entry against the registry.
    ///
    /// The plugin comes from `$plugin` (exact reference, loader
    /// fallback) or, failing that, from a case-insensitive `$name`
    /// look-up. Control keys are stripped from a copy of the entry and
    /// the residue is validated against the plugin's config schema.
    pub fn resolve(
        entry: &Map<String, Value>,
        registry: &PluginRegistry,
    ) -> Result<Self, ConductorError> {
        let reference = string_key(entry, PLUGIN_KEY)?;
        let explicit_name = string_key(entry, NAME_KEY)?;

        let (plugin, reference) = match (&reference, &explicit_name) {
            (Some(reference), _) => {
                let plugin = registry.load(reference).map_err(|e| match e {
                    LoadError::WrongShape { detail } => ConductorError::NotAPlugin {
                        reference: reference.clone(),
                        detail,
                    },
                    cause => ConductorError::ConfigImport {
                        reference: reference.clone(),
                        cause,
                    },
                })?;
                (plugin, reference.clone())
            }
            (None, Some(name)) => {
                let plugin =
                    registry
                        .find_named(name)
                        .ok_or_else(|| ConductorError::UnknownServiceName {
                            name: name.clone(),
                        })?;
                (plugin, name.clone())
            }
            (None, None) => return Err(ConductorError::MissingPluginOrName),
        };

        let name = match explicit_name {
            Some(name) => name,
            None => plugin
                .default_name()
                .map(str::to_string)
                .ok_or_else(|| ConductorError::MissingDefaultName {
                    reference: reference.clone(),
                })?,
        };

        let dep_overrides = override_map(entry, DEP_OVERRIDES_KEY, &reference)?;
        let export_overrides = override_map(entry, EXPORT_OVERRIDES_KEY, &reference)?;
        check_overrides(
            &dep_overrides,
            &plugin.dependency_names(),
            &reference,
            true,
        )?;
        check_overrides(
            &export_overrides,
            &plugin.export_names(),
            &reference,
            false,
        )?;

        let mut config = entry.clone();
        for key in CONTROL_KEYS {
            config.remove(key);
        }
        config::check_schema(
            &plugin.config_schema(),
            &Value::Object(config.clone()),
            &reference,
        )?;

        debug!(service = %name, plugin = %reference, "resolved service descriptor");
        Ok(Self {
            plugin,
            reference,
            name,
            config,
            dep_overrides,
            export_overrides,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn plugin(&self) -> &Arc<dyn ServicePlugin> {
        &self.plugin
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    /// Effective dependency names, with overrides applied.
    pub fn dependency_names(&self) -> BTreeSet<String> {
        self.plugin
            .dependency_names()
            .iter()
            .map(|declared| self.effective_dependency(declared))
            .collect()
    }

    /// Effective export names, with overrides applied.
    pub fn export_names(&self) -> BTreeSet<String> {
        self.plugin
            .export_names()
            .iter()
            .map(|declared| self.effective_export(declared))
            .collect()
    }

    fn effective_dependency(&self, declared: &str) -> String {
        self.dep_overrides
            .get(declared)
            .cloned()
            .unwrap_or_else(|| declared.to_string())
    }

    fn effective_export(&self, declared: &str) -> String {
        self.export_overrides
            .get(declared)
            .cloned()
            .unwrap_or_else(|| declared.to_string())
    }

    /// Construct the service instance. Dependencies are looked up in
    /// `exports` under their effective names but handed to the plugin
    /// under the names it declared; exports the service publishes land
    /// in `staged` under their effective names.
    pub(crate) fn invoke(
        &self,
        exports: &ExportRegistry,
        staged: &mut ExportRegistry,
    ) -> anyhow::Result<ServiceInstance> {
        let mut values = std::collections::HashMap::new();
        for declared in self.plugin.dependency_names() {
            let effective = self.effective_dependency(&declared);
            let value = exports.get(&effective).cloned().ok_or_else(|| {
                anyhow!(
                    "dependency \"{effective}\" is not available to service \"{}\"",
                    self.name
                )
            })?;
            values.insert(declared, value);
        }

        let deps = Dependencies::new(values);
        let service = self
            .plugin
            .construct(&self.config, &deps)
            .with_context(|| format!("constructing service \"{}\"", self.name))?;

        let mut produced = service.exports();
        for declared in self.plugin.export_names() {
            let value: Export = produced.remove(&declared).ok_or_else(|| {
                anyhow!(
                    "service \"{}\" did not produce its declared export \"{declared}\"",
                    self.name
                )
            })?;
            staged.insert(self.effective_export(&declared), value);
        }

        Ok(ServiceInstance::new(self.name.clone(), service))
    }
}

fn string_key(entry: &Map<String, Value>, key: &str) -> Result<Option<String>, ConductorError> {
    match entry.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ConductorError::SchemaValidation {
            scope: key.to_string(),
            violations: vec![format!("expected a string, got {other}")],
        }),
    }
}

fn override_map(
    entry: &Map<String, Value>,
    key: &str,
    scope: &str,
) -> Result<BTreeMap<String, String>, ConductorError> {
    let Some(value) = entry.get(key) else {
        return Ok(BTreeMap::new());
    };
    let Some(object) = value.as_object() else {
        return Err(ConductorError::SchemaValidation {
            scope: scope.to_string(),
            violations: vec![format!("{key}: expected an object, got {value}")],
        });
    };
    let mut overrides = BTreeMap::new();
    let mut violations = Vec::new();
    for (name, target) in object {
        match target {
            Value::String(target) => {
                overrides.insert(name.clone(), target.clone());
            }
            other => violations.push(format!("{key}.{name}: expected a string, got {other}")),
        }
    }
    if violations.is_empty() {
        Ok(overrides)
    } else {
        Err(ConductorError::SchemaValidation {
            scope: scope.to_string(),
            violations,
        })
    }
}

/// Every override key must match a name the plugin actually declares.
/// All unrecognized keys are reported at once.
fn check_overrides(
    overrides: &BTreeMap<String, String>,
    declared: &[String],
    plugin: &str,
    deps: bool,
) -> Result<(), ConductorError> {
    let unrecognized: Vec<String> = overrides
        .keys()
        .filter(|key| !declared.iter().any(|d| d == *key))
        .cloned()
        .collect();
    if unrecognized.is_empty() {
        return Ok(());
    }
    let plugin = plugin.to_string();
    if deps {
        Err(ConductorError::UnrecognizedDependencyOverrides {
            plugin,
            names: unrecognized,
        })
    } else {
        Err(ConductorError::UnrecognizedExportOverrides {
            plugin,
            names: unrecognized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Service;
    use serde_json::json;

    struct CachePlugin;

    struct CacheService;

    impl Service for CacheService {
        fn exports(&self) -> std::collections::HashMap<String, Export> {
            let mut exports = std::collections::HashMap::new();
            exports.insert("cache".to_string(), Arc::new("cache-handle".to_string()) as Export);
            exports
        }
    }

    impl ServicePlugin for CachePlugin {
        fn default_name(&self) -> Option<&str> {
            Some("Cache")
        }

        fn dependency_names(&self) -> Vec<String> {
            vec!["store".to_string()]
        }

        fn export_names(&self) -> Vec<String> {
            vec!["cache".to_string()]
        }

        fn config_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"size": {"type": "integer"}},
                "additionalProperties": false,
            })
        }

        fn construct(
            &self,
            _config: &Map<String, Value>,
            deps: &Dependencies,
        ) -> anyhow::Result<Box<dyn Service>> {
            deps.get::<String>("store")?;
            Ok(Box::new(CacheService))
        }
    }

    fn registry() -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry
            .register("acme.cache", Arc::new(CachePlugin))
            .unwrap();
        registry
    }

    fn entry(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn test_resolve_by_plugin_reference() {
        let input = entry(json!({"$plugin": "acme.cache", "size": 64}));
        let descriptor = ServiceDescriptor::resolve(&input, &registry()).unwrap();
        assert_eq!(descriptor.name(), "Cache");
        assert_eq!(descriptor.reference(), "acme.cache");
        assert_eq!(descriptor.config(), &entry(json!({"size": 64})));
    }

    #[test]
    fn test_resolve_by_name_only() {
        let entry = entry(json!({"$name": "cache"}));
        let descriptor = ServiceDescriptor::resolve(&entry, &registry()).unwrap();
        assert_eq!(descriptor.name(), "cache");
    }

    #[test]
    fn test_unknown_name() {
        let entry = entry(json!({"$name": "bogus"}));
        let err = ServiceDescriptor::resolve(&entry, &registry()).unwrap_err();
        assert!(matches!(
            err,
            ConductorError::UnknownServiceName { name } if name == "bogus"
        ));
    }

    #[test]
    fn test_missing_plugin_and_name() {
        let entry = entry(json!({"size": 64}));
        let err = ServiceDescriptor::resolve(&entry, &registry()).unwrap_err();
        assert!(matches!(err, ConductorError::MissingPluginOrName));
    }

    #[test]
    fn test_unknown_reference() {
        let entry = entry(json!({"$plugin": "acme.bogus"}));
        let err = ServiceDescriptor::resolve(&entry, &registry()).unwrap_err();
        assert!(matches!(err, ConductorError::ConfigImport { .. }));
    }

    #[test]
    fn test_overrides_rename_dependencies_and_exports() {
        let entry = entry(json!({
            "$plugin": "acme.cache",
            "$dep-overrides": {"store": "primary_store"},
            "$export-overrides": {"cache": "shared_cache"},
        }));
        let descriptor = ServiceDescriptor::resolve(&entry, &registry()).unwrap();
        assert_eq!(
            descriptor.dependency_names(),
            BTreeSet::from(["primary_store".to_string()])
        );
        assert_eq!(
            descriptor.export_names(),
            BTreeSet::from(["shared_cache".to_string()])
        );
    }

    #[test]
    fn test_unrecognized_override_keys_all_reported() {
        let entry = entry(json!({
            "$plugin": "acme.cache",
            "$dep-overrides": {"bogus": "x", "wat": "y"},
        }));
        let err = ServiceDescriptor::resolve(&entry, &registry()).unwrap_err();
        match err {
            ConductorError::UnrecognizedDependencyOverrides { plugin, names } => {
                assert_eq!(plugin, "acme.cache");
                assert_eq!(names, vec!["bogus".to_string(), "wat".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_residual_config_validated_against_plugin_schema() {
        let entry = entry(json!({"$plugin": "acme.cache", "size": "huge"}));
        let err = ServiceDescriptor::resolve(&entry, &registry()).unwrap_err();
        assert!(matches!(
            err,
            ConductorError::SchemaValidation { scope, .. } if scope == "acme.cache"
        ));
    }

    #[test]
    fn test_resolve_never_mutates_the_entry() {
        let original = entry(json!({"$plugin": "acme.cache", "size": "huge"}));
        let probe = original.clone();
        let _ = ServiceDescriptor::resolve(&probe, &registry());
        assert_eq!(probe, original);
    }

    #[test]
    fn test_invoke_wires_and_publishes_under_effective_names() {
        let entry = entry(json!({
            "$plugin": "acme.cache",
            "$dep-overrides": {"store": "primary_store"},
            "$export-overrides": {"cache": "shared_cache"},
        }));
        let descriptor = ServiceDescriptor::resolve(&entry, &registry()).unwrap();

        let mut exports = ExportRegistry::new();
        exports.insert(
            "primary_store".to_string(),
            Arc::new("store-handle".to_string()) as Export,
        );
        let mut staged = ExportRegistry::new();
        let instance = descriptor.invoke(&exports, &mut staged).unwrap();
        assert_eq!(instance.name(), "Cache");
        assert!(staged.contains("shared_cache"));
        assert!(!staged.contains("cache"));
    }

    #[test]
    fn test_invoke_missing_dependency() {
        let entry = entry(json!({"$plugin": "acme.cache"}));
        let descriptor = ServiceDescriptor::resolve(&entry, &registry()).unwrap();
        let exports = ExportRegistry::new();
        let mut staged = ExportRegistry::new();
        let err = descriptor.invoke(&exports, &mut staged).unwrap_err();
        assert!(err.to_string().contains("store"));
    }
}
