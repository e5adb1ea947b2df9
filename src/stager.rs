//! Dependency staging
//!
//! Generic topological partition of a node/dependency map into ordered
//! stages. A node's stage is 0 when it has no dependencies, otherwise
//! 1 + the maximum stage of its dependencies, which yields the unique
//! minimal valid partition. The stager knows nothing about services;
//! the resolver feeds it descriptor indices.
//!
//! Nodes that appear only as dependencies (never as keys) are treated
//! as having no dependencies and land in stage 0. Output order is
//! driven by input order, so repeated runs over the same input produce
//! identical stages.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

/// A dependency cycle discovered while partitioning.
///
/// `path` is the literal cyclic walk in dependency order: each node
/// depends on the next, and the first and last entries are the same
/// node. A self-dependency yields the two-entry path `[n, n]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle<N> {
    pub path: Vec<N>,
}

impl<N: fmt::Display> fmt::Display for Cycle<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.path.iter().map(|n| n.to_string()).collect();
        write!(f, "circular dependency: {}", rendered.join(" -> "))
    }
}

impl<N: fmt::Debug + fmt::Display> std::error::Error for Cycle<N> {}

// Outcome of a DFS descent that ran into a node already on the current
// descent path.
enum Unwind<N> {
    /// The cyclic path is complete (first == last).
    Closed(Vec<N>),
    /// Still unwinding toward `pivot`, the node that was reached twice.
    Open { path: Vec<N>, pivot: N },
}

/// Partition `dependencies` into ordered stages.
///
/// Each `(node, deps)` pair declares the nodes that must be staged
/// before `node`. Dependencies that never appear as keys are valid and
/// default to stage 0. Every key and every dependency appears in
/// exactly one stage of the result.
pub fn partition<N>(dependencies: &[(N, Vec<N>)]) -> Result<Vec<Vec<N>>, Cycle<N>>
where
    N: Clone + Eq + Hash,
{
    // First-seen order across keys and dependency values drives the
    // order of nodes within each output stage.
    let mut order: Vec<&N> = Vec::new();
    let mut seen: HashSet<&N> = HashSet::new();
    let mut dep_map: HashMap<&N, &[N]> = HashMap::new();
    for (node, deps) in dependencies {
        dep_map.entry(node).or_insert_with(|| deps.as_slice());
        if seen.insert(node) {
            order.push(node);
        }
        for dep in deps {
            if seen.insert(dep) {
                order.push(dep);
            }
        }
    }

    let mut stage_of: HashMap<&N, usize> = HashMap::new();
    let mut visiting: HashSet<&N> = HashSet::new();
    for node in &order {
        if stage_of.contains_key(node) {
            continue;
        }
        if let Err(unwind) = visit(*node, &dep_map, &mut visiting, &mut stage_of) {
            let path = match unwind {
                Unwind::Closed(path) => path,
                // A descent can only start at a node nothing else has
                // visited, so an open unwind always closes before it
                // reaches the top. Surface whatever we collected.
                Unwind::Open { path, .. } => path,
            };
            return Err(Cycle { path });
        }
    }

    let stage_count = stage_of.values().copied().max().map_or(0, |max| max + 1);
    let mut stages: Vec<Vec<N>> = vec![Vec::new(); stage_count];
    for node in &order {
        stages[stage_of[node]].push((*node).clone());
    }
    Ok(stages)
}

// Memoized depth-first visit. Returns the node's stage, finalizing it
// exactly once, or unwinds with the cyclic path under construction.
fn visit<'a, N>(
    node: &'a N,
    dep_map: &HashMap<&'a N, &'a [N]>,
    visiting: &mut HashSet<&'a N>,
    stage_of: &mut HashMap<&'a N, usize>,
) -> Result<usize, Unwind<N>>
where
    N: Clone + Eq + Hash,
{
    visiting.insert(node);
    let mut stage = 0;
    for dep in dep_map.get(node).copied().unwrap_or(&[]) {
        if let Some(&dep_stage) = stage_of.get(dep) {
            stage = stage.max(dep_stage + 1);
            continue;
        }
        if visiting.contains(dep) {
            // Reached a node already on the current descent: cycle.
            if dep == node {
                return Err(Unwind::Closed(vec![node.clone(), node.clone()]));
            }
            return Err(Unwind::Open {
                path: vec![node.clone(), dep.clone()],
                pivot: dep.clone(),
            });
        }
        match visit(dep, dep_map, visiting, stage_of) {
            Ok(dep_stage) => stage = stage.max(dep_stage + 1),
            Err(Unwind::Closed(path)) => return Err(Unwind::Closed(path)),
            Err(Unwind::Open { mut path, pivot }) => {
                path.insert(0, node.clone());
                if *node == pivot {
                    return Err(Unwind::Closed(path));
                }
                return Err(Unwind::Open { path, pivot });
            }
        }
    }
    visiting.remove(node);
    stage_of.insert(node, stage);
    Ok(stage)
}
