//! Conductor error model
//!
//! One tagged variant per failure kind, each with typed fields and an
//! ordinary formatting function. Validation-phase checks that can have
//! multiple independent offenders (bad overrides, collisions,
//! unsatisfied dependencies, bad entries, stop failures) collect every
//! offender and surface exactly one aggregate variant; messages render
//! the full name-to-cause table, never a single example.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::registry::LoadError;

#[derive(Debug, Error)]
pub enum ConductorError {
    /// An explicit `$plugin` reference could not be loaded.
    #[error("failed to load plugin \"{reference}\": {cause}")]
    ConfigImport { reference: String, cause: LoadError },

    /// A reference resolved to something that does not satisfy the
    /// plugin contract.
    #[error("\"{reference}\" is not a service plugin: {detail}")]
    NotAPlugin { reference: String, detail: String },

    #[error("a service entry must specify at least one of \"$plugin\" or \"$name\"")]
    MissingPluginOrName,

    /// `$name` was given without `$plugin` and nothing is registered
    /// under that name.
    #[error("no plugin is registered under the name \"{name}\"")]
    UnknownServiceName { name: String },

    #[error("no configured or default name for plugin \"{reference}\"")]
    MissingDefaultName { reference: String },

    #[error(
        "these keys were given as dependency overrides but are not declared \
         by plugin \"{plugin}\": {}",
        .names.join(", ")
    )]
    UnrecognizedDependencyOverrides { plugin: String, names: Vec<String> },

    #[error(
        "these keys were given as export overrides but are not declared \
         by plugin \"{plugin}\": {}",
        .names.join(", ")
    )]
    UnrecognizedExportOverrides { plugin: String, names: Vec<String> },

    /// A config failed JSON Schema validation. `scope` names the
    /// config owner ("controller" or a plugin reference); every
    /// violation is listed.
    #[error("config for \"{scope}\" failed schema validation:\n{}", fmt_lines(.violations))]
    SchemaValidation { scope: String, violations: Vec<String> },

    /// One or more service entries failed to resolve, keyed by the
    /// entry's name, plugin reference, or list position.
    #[error("failed to resolve these service entries:\n{}", fmt_cause_table(.failures))]
    DescriptorBatch { failures: BTreeMap<String, ConductorError> },

    /// An effective export name is claimed by two or more services;
    /// every claimant is listed per name.
    #[error(
        "these export names are claimed by more than one service:\n{}\n\
         note: \"$export-overrides\" in a service entry renames exports to \
         avoid collisions",
        fmt_list_table(.collisions)
    )]
    ExportCollision { collisions: BTreeMap<String, Vec<String>> },

    /// A resolved instance name refers to two or more services.
    #[error("these service names refer to more than one service:\n{}", fmt_list_table(.collisions))]
    NameCollision { collisions: BTreeMap<String, Vec<String>> },

    /// Effective dependency names satisfied by no export, grouped by
    /// the requiring service.
    #[error("these services have unsatisfied dependencies:\n{}", fmt_list_table(.missing))]
    UnsatisfiedDependencies { missing: BTreeMap<String, Vec<String>> },

    /// Literal cyclic path in dependency order; the first and last
    /// entries are the same service.
    #[error("circular dependency between services: {}", .path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    /// A service failed during `start()`. Everything already started
    /// was rolled back; a failed rollback is attached, never
    /// substituted for the original cause.
    #[error("failed to start service \"{descriptor}\": {cause}{}", rollback_note(.rollback))]
    StartFailure {
        descriptor: String,
        cause: anyhow::Error,
        rollback: Option<Box<ConductorError>>,
    },

    /// One or more services failed to stop; every instance was still
    /// attempted and controller state was reset.
    #[error("failed to stop these services:\n{}", fmt_cause_table(.failures))]
    StopFailure { failures: BTreeMap<String, anyhow::Error> },

    #[error("failed to purge service \"{service}\": {cause}")]
    PurgeFailure { service: String, cause: anyhow::Error },

    #[error("job failed for service \"{service}\" (args: {:?}): {cause}", .args)]
    JobFailure {
        service: String,
        args: Vec<String>,
        cause: anyhow::Error,
    },

    #[error("no service named \"{name}\"")]
    ServiceNotFound { name: String },

    /// A plugin is already registered under this reference or default
    /// name.
    #[error("a plugin is already registered under \"{key}\"")]
    DuplicateRegistration { key: String },
}

fn fmt_lines(lines: &[String]) -> String {
    lines
        .iter()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn fmt_list_table(table: &BTreeMap<String, Vec<String>>) -> String {
    table
        .iter()
        .map(|(key, values)| format!("  {key}: {}", values.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn fmt_cause_table<E: std::fmt::Display>(table: &BTreeMap<String, E>) -> String {
    table
        .iter()
        .map(|(key, cause)| format!("  {key}: {cause}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn rollback_note(rollback: &Option<Box<ConductorError>>) -> String {
    match rollback {
        None => "\npreviously started services were stopped in reverse order".to_string(),
        Some(stop_failure) => {
            format!("\nrollback reported additional failures: {stop_failure}")
        }
    }
}
