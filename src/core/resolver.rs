//! PM-005: Dependency resolution — producer index, DAG, execution order.
//!
//! Builds a module graph from declarations alone: an edge `A -> B` exists when
//! an output of `A` is a required input of `B`. Computes the order with Kahn's
//! algorithm; ties break by registration order, roots first. Every graph
//! defect is collected before failing so one pass reports all of them.

use super::contract::ModuleCatalog;
use super::error::{GraphError, ResolveFailure};
use super::registry::Registry;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, warn};

/// A resolved execution order over a catalog's modules.
///
/// Indices refer to registration positions in the catalog the plan was
/// resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Module ids in registration order
    pub ids: Vec<String>,
    /// Topological order
    pub order: Vec<usize>,
    /// Groups with no dependencies between members, by longest-path depth
    pub levels: Vec<Vec<usize>>,
    pub predecessors: Vec<Vec<usize>>,
    pub successors: Vec<Vec<usize>>,
}

impl ExecutionPlan {
    pub fn order_ids(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.ids[i].as_str()).collect()
    }

    pub fn level_ids(&self) -> Vec<Vec<&str>> {
        self.levels
            .iter()
            .map(|level| level.iter().map(|&i| self.ids[i].as_str()).collect())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Resolve a catalog against the seeded registry.
///
/// Paths present in `bootstrap` count as available without a producer.
pub fn resolve(
    catalog: &ModuleCatalog,
    bootstrap: &Registry,
) -> Result<ExecutionPlan, ResolveFailure> {
    let modules = catalog.modules();
    let n = modules.len();
    let ids: Vec<String> = modules.iter().map(|m| m.id().to_string()).collect();
    let mut errors = Vec::new();

    // Producer index, in order of first declaration
    let mut producers: IndexMap<&str, Vec<usize>> = IndexMap::new();
    for (i, module) in modules.iter().enumerate() {
        for path in &module.declaration().output_params {
            let owners = producers.entry(path.as_str()).or_default();
            if owners.last() != Some(&i) {
                owners.push(i);
            }
        }
    }
    for (path, owners) in &producers {
        if owners.len() > 1 {
            errors.push(GraphError::ProducerConflict {
                path: path.to_string(),
                modules: owners.iter().map(|&i| ids[i].clone()).collect(),
            });
        }
    }

    // Inputs with neither a producer nor a bootstrap value
    let mut unresolved: IndexMap<&str, Vec<usize>> = IndexMap::new();
    for (i, module) in modules.iter().enumerate() {
        for path in &module.declaration().required_inputs {
            if producers.contains_key(path.as_str()) || bootstrap.has_param(path) {
                continue;
            }
            let consumers = unresolved.entry(path.as_str()).or_default();
            if consumers.last() != Some(&i) {
                consumers.push(i);
            }
        }
    }
    for (path, consumers) in &unresolved {
        errors.push(GraphError::UnresolvedInput {
            path: path.to_string(),
            required_by: consumers.iter().map(|&i| ids[i].clone()).collect(),
        });
    }

    // Producer -> consumer edges
    let mut preds: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    let mut succs: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    for (i, module) in modules.iter().enumerate() {
        for path in &module.declaration().required_inputs {
            if let Some(owners) = producers.get(path.as_str()) {
                for &owner in owners {
                    preds[i].insert(owner);
                    succs[owner].insert(i);
                }
            }
        }
    }

    // Kahn's algorithm with registration-order tie-breaking
    let mut in_degree: Vec<usize> = preds.iter().map(BTreeSet::len).collect();
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(current) = queue.pop_front() {
        order.push(current);

        let mut next_ready: Vec<usize> = Vec::new();
        for &next in &succs[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                next_ready.push(next);
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if order.len() != n {
        let ordered: FxHashSet<usize> = order.iter().copied().collect();
        let remaining: BTreeSet<usize> = (0..n).filter(|i| !ordered.contains(i)).collect();
        for cycle in find_cycles(&remaining, &succs) {
            errors.push(GraphError::Cycle {
                modules: cycle.iter().map(|&i| ids[i].clone()).collect(),
            });
        }
    }

    if !errors.is_empty() {
        for e in &errors {
            warn!(error = %e, "graph error");
        }
        return Err(ResolveFailure(errors));
    }

    let levels = compute_levels(&order, &preds);
    debug!(modules = n, levels = levels.len(), "resolved execution order");

    Ok(ExecutionPlan {
        ids,
        order,
        levels,
        predecessors: preds.into_iter().map(|s| s.into_iter().collect()).collect(),
        successors: succs.into_iter().map(|s| s.into_iter().collect()).collect(),
    })
}

/// Enumerate every elementary cycle among nodes Kahn's algorithm could not
/// order.
///
/// Each cycle is found once, from its lowest index, by a depth-first walk that
/// only enters higher-indexed nodes. Cycles sharing nodes are all reported.
fn find_cycles(remaining: &BTreeSet<usize>, succs: &[BTreeSet<usize>]) -> Vec<Vec<usize>> {
    let mut search = CycleSearch {
        remaining,
        succs,
        path: Vec::new(),
        cycles: Vec::new(),
    };
    for &start in remaining {
        search.path.push(start);
        search.walk(start, start);
        search.path.clear();
    }
    let mut cycles = search.cycles;
    cycles.sort();
    cycles
}

struct CycleSearch<'a> {
    remaining: &'a BTreeSet<usize>,
    succs: &'a [BTreeSet<usize>],
    path: Vec<usize>,
    cycles: Vec<Vec<usize>>,
}

impl<'a> CycleSearch<'a> {
    fn walk(&mut self, start: usize, current: usize) {
        let succs: &'a [BTreeSet<usize>] = self.succs;
        for &next in &succs[current] {
            if next == start {
                self.cycles.push(self.path.clone());
                continue;
            }
            if next < start || !self.remaining.contains(&next) || self.path.contains(&next) {
                continue;
            }
            self.path.push(next);
            self.walk(start, next);
            self.path.pop();
        }
    }
}

/// Group ordered modules by longest distance from a root.
fn compute_levels(order: &[usize], preds: &[BTreeSet<usize>]) -> Vec<Vec<usize>> {
    let mut depth = vec![0usize; preds.len()];
    let mut levels: Vec<Vec<usize>> = Vec::new();
    for &i in order {
        let d = preds[i].iter().map(|&p| depth[p] + 1).max().unwrap_or(0);
        depth[i] = d;
        if levels.len() <= d {
            levels.resize_with(d + 1, Vec::new);
        }
        levels[d].push(i);
    }
    for level in &mut levels {
        level.sort_unstable();
    }
    levels
}
