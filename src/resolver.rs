//! Dependency resolution.
//!
//! Turns a flat list of resolved descriptors into an ordered start
//! plan. Diagnostics run in a fixed order so the first reported
//! problem is always the most fundamental one: duplicate instance
//! names, then contested export names, then dependencies nobody
//! publishes, and only then cycles found while staging.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::descriptor::ServiceDescriptor;
use crate::error::ConductorError;
use crate::stager;

/// Partition descriptors into start stages.
///
/// Within each stage, descriptors keep their config order; stages are
/// ordered so every dependency is published by an earlier stage.
pub fn plan(
    descriptors: Vec<ServiceDescriptor>,
) -> Result<Vec<Vec<ServiceDescriptor>>, ConductorError> {
    check_name_collisions(&descriptors)?;
    let owners = export_owners(&descriptors)?;
    let edges = dependency_edges(&descriptors, &owners)?;

    let stages = stager::partition(&edges).map_err(|cycle| ConductorError::DependencyCycle {
        path: cycle
            .path
            .iter()
            .map(|&i| descriptors[i].name().to_string())
            .collect(),
    })?;
    debug!(stages = stages.len(), services = descriptors.len(), "start plan computed");

    let mut slots: Vec<Option<ServiceDescriptor>> = descriptors.into_iter().map(Some).collect();
    Ok(stages
        .into_iter()
        .map(|stage| {
            stage
                .into_iter()
                .filter_map(|i| slots[i].take())
                .collect()
        })
        .collect())
}

fn check_name_collisions(descriptors: &[ServiceDescriptor]) -> Result<(), ConductorError> {
    let mut claimants: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for descriptor in descriptors {
        claimants
            .entry(descriptor.name())
            .or_default()
            .push(descriptor.reference().to_string());
    }
    let collisions: BTreeMap<String, Vec<String>> = claimants
        .into_iter()
        .filter(|(_, refs)| refs.len() > 1)
        .map(|(name, refs)| (name.to_string(), refs))
        .collect();
    if collisions.is_empty() {
        Ok(())
    } else {
        Err(ConductorError::NameCollision { collisions })
    }
}

/// Map each effective export name to the index of the descriptor that
/// publishes it. Contested names are reported with every claimant.
fn export_owners(
    descriptors: &[ServiceDescriptor],
) -> Result<HashMap<String, usize>, ConductorError> {
    let mut owners: HashMap<String, usize> = HashMap::new();
    let mut collisions: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (i, descriptor) in descriptors.iter().enumerate() {
        for export in descriptor.export_names() {
            if let Some(&owner) = owners.get(&export) {
                collisions
                    .entry(export)
                    .or_insert_with(|| vec![descriptors[owner].name().to_string()])
                    .push(descriptor.name().to_string());
            } else {
                owners.insert(export, i);
            }
        }
    }
    if collisions.is_empty() {
        Ok(owners)
    } else {
        Err(ConductorError::ExportCollision { collisions })
    }
}

/// Dependency edges between descriptor indices, in config order.
/// Dependencies nobody publishes are aggregated across all descriptors
/// and reported before any staging happens.
fn dependency_edges(
    descriptors: &[ServiceDescriptor],
    owners: &HashMap<String, usize>,
) -> Result<Vec<(usize, Vec<usize>)>, ConductorError> {
    let mut edges = Vec::with_capacity(descriptors.len());
    let mut missing: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (i, descriptor) in descriptors.iter().enumerate() {
        let mut deps = Vec::new();
        for dependency in descriptor.dependency_names() {
            match owners.get(&dependency) {
                Some(&owner) => deps.push(owner),
                None => missing
                    .entry(descriptor.name().to_string())
                    .or_default()
                    .push(dependency),
            }
        }
        edges.push((i, deps));
    }
    if missing.is_empty() {
        Ok(edges)
    } else {
        Err(ConductorError::UnsatisfiedDependencies { missing })
    }
}
