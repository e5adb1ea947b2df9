//! Service controller.
//!
//! Owns the full lifecycle: resolve the config into descriptors, plan
//! stages, bring services up stage by stage, and tear them down in
//! reverse. Exports published by one stage only become visible to
//! later stages once every service in the publishing stage has
//! started, so a half-failed stage never leaks exports.

use std::collections::{BTreeMap, HashMap};

use anyhow::Context;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config;
use crate::descriptor::{ServiceDescriptor, NAME_KEY, PLUGIN_KEY};
use crate::error::ConductorError;
use crate::registry::PluginRegistry;
use crate::resolver;
use crate::service::{ExportRegistry, ServiceInstance};

pub struct Controller {
    stages: Vec<Vec<ServiceDescriptor>>,
    services: HashMap<String, ServiceInstance>,
    exports: ExportRegistry,
    // Names of services started so far, grouped by stage, in start order.
    started: Vec<Vec<String>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stages: Vec<Vec<&str>> = self
            .stages
            .iter()
            .map(|stage| stage.iter().map(ServiceDescriptor::name).collect())
            .collect();
        f.debug_struct("Controller")
            .field("stages", &stages)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Resolve `config` against `registry` and compute the start plan.
    ///
    /// Every `services` entry is resolved even after one fails, so a
    /// bad config reports all of its problems in one pass.
    pub fn new(config: &Value, registry: &PluginRegistry) -> Result<Self, ConductorError> {
        config::check_schema(config::controller_schema(), config, "controller")?;

        let entries = config
            .get("services")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut descriptors = Vec::with_capacity(entries.len());
        let mut failures: BTreeMap<String, ConductorError> = BTreeMap::new();
        for (i, entry) in entries.iter().enumerate() {
            let Some(entry) = entry.as_object() else {
                continue;
            };
            match ServiceDescriptor::resolve(entry, registry) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => {
                    failures.insert(entry_label(entry, i), e);
                }
            }
        }
        if !failures.is_empty() {
            return Err(ConductorError::DescriptorBatch { failures });
        }

        let stages = resolver::plan(descriptors)?;
        info!(
            stages = stages.len(),
            services = stages.iter().map(Vec::len).sum::<usize>(),
            "controller ready"
        );
        Ok(Self {
            stages,
            services: HashMap::new(),
            exports: ExportRegistry::new(),
            started: Vec::new(),
        })
    }

    /// The planned start order, as stage-grouped service names.
    pub fn planned_stages(&self) -> Vec<Vec<&str>> {
        self.stages
            .iter()
            .map(|stage| stage.iter().map(ServiceDescriptor::name).collect())
            .collect()
    }

    /// Start every service, stage by stage.
    ///
    /// On failure, everything started so far (including earlier
    /// services of the failing stage) is stopped in reverse order and
    /// the returned error carries the offending service plus any
    /// failures that rollback itself hit.
    pub fn start(&mut self) -> Result<(), ConductorError> {
        let stages = self.stages.clone();
        for stage in stages {
            let mut achieved = Vec::with_capacity(stage.len());
            let mut staged = ExportRegistry::new();
            for descriptor in &stage {
                match bring_up(descriptor, &self.exports, &mut staged) {
                    Ok(instance) => {
                        info!(service = %instance.name(), "service started");
                        achieved.push(instance.name().to_string());
                        self.services.insert(instance.name().to_string(), instance);
                    }
                    Err(cause) => {
                        warn!(service = %descriptor.name(), "service failed to start, rolling back");
                        self.started.push(achieved);
                        let rollback = self.stop().err().map(Box::new);
                        return Err(ConductorError::StartFailure {
                            descriptor: descriptor.name().to_string(),
                            cause,
                            rollback,
                        });
                    }
                }
            }
            self.started.push(achieved);
            self.exports.merge(staged);
        }
        Ok(())
    }

    /// Stop every started service, newest first. All failures are
    /// collected; the controller's state is cleared regardless, so a
    /// failed stop never wedges a later start.
    pub fn stop(&mut self) -> Result<(), ConductorError> {
        let mut failures: BTreeMap<String, anyhow::Error> = BTreeMap::new();
        for stage in self.started.iter().rev() {
            for name in stage.iter().rev() {
                let Some(mut instance) = self.services.remove(name) else {
                    continue;
                };
                match instance.service_mut().stop() {
                    Ok(()) => info!(service = %name, "service stopped"),
                    Err(e) => {
                        warn!(service = %name, "service failed to stop");
                        failures.insert(name.clone(), e);
                    }
                }
            }
        }
        self.services.clear();
        self.started.clear();
        self.exports = ExportRegistry::new();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ConductorError::StopFailure { failures })
        }
    }

    /// Run a named job on a started service.
    pub fn job(&mut self, name: &str, args: &[String]) -> Result<(), ConductorError> {
        let instance = self
            .services
            .get_mut(name)
            .ok_or_else(|| ConductorError::ServiceNotFound {
                name: name.to_string(),
            })?;
        instance
            .service_mut()
            .job(args)
            .map_err(|cause| ConductorError::JobFailure {
                service: name.to_string(),
                args: args.to_vec(),
                cause,
            })
    }

    /// Purge a started service's persistent state.
    pub fn purge(&mut self, name: &str) -> Result<(), ConductorError> {
        let instance = self
            .services
            .get_mut(name)
            .ok_or_else(|| ConductorError::ServiceNotFound {
                name: name.to_string(),
            })?;
        instance
            .service_mut()
            .purge()
            .map_err(|cause| ConductorError::PurgeFailure {
                service: name.to_string(),
                cause,
            })
    }

    /// Look up a started service by name.
    pub fn service(&self, name: &str) -> Result<&ServiceInstance, ConductorError> {
        self.services
            .get(name)
            .ok_or_else(|| ConductorError::ServiceNotFound {
                name: name.to_string(),
            })
    }

    /// Exports published by started services.
    pub fn exports(&self) -> &ExportRegistry {
        &self.exports
    }
}

fn bring_up(
    descriptor: &ServiceDescriptor,
    exports: &ExportRegistry,
    staged: &mut ExportRegistry,
) -> anyhow::Result<ServiceInstance> {
    let mut instance = descriptor.invoke(exports, staged)?;
    if !instance.service().installed() {
        instance
            .service_mut()
            .install()
            .with_context(|| format!("installing service \"{}\"", descriptor.name()))?;
    }
    instance
        .service_mut()
        .start()
        .with_context(|| format!("starting service \"{}\"", descriptor.name()))?;
    Ok(instance)
}

/// Label a failing entry for batch diagnostics: the instance name when
/// given, otherwise the plugin reference, otherwise the list position.
fn entry_label(entry: &Map<String, Value>, index: usize) -> String {
    entry
        .get(NAME_KEY)
        .or_else(|| entry.get(PLUGIN_KEY))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("services[{index}]"))
}
