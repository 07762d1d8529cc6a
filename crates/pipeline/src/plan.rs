//! Dependency graph resolution and execution planning.
//!
//! The graph is built from *enabled* descriptors only. Depending on a
//! disabled or unknown unit is a configuration error at build time: a
//! dependency must be satisfiable, so silently dropping the edge would only
//! defer the failure to execution.
//!
//! Ordering uses Kahn's algorithm with an ordered ready set, so the plan is
//! deterministic across runs: whenever several units are simultaneously
//! ready, the one with the smallest id goes first.

use std::collections::{BTreeMap, BTreeSet};

use crate::{PipelineError, UnitDescriptor, UnitId};

// ---------------------------------------------------------------------------
// Dependency graph
// ---------------------------------------------------------------------------

/// The "depends on" graph over enabled unit ids.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// unit -> its dependencies.
    dependencies: BTreeMap<UnitId, BTreeSet<UnitId>>,
    /// unit -> units that depend on it (reverse edges).
    dependents: BTreeMap<UnitId, BTreeSet<UnitId>>,
}

impl DependencyGraph {
    /// Builds the graph from a registry snapshot.
    ///
    /// Disabled units are excluded entirely. An enabled unit declaring a
    /// dependency on a disabled unit fails with
    /// [`PipelineError::DisabledDependency`]; a dependency no descriptor
    /// declares fails with [`PipelineError::UnknownDependency`]. A duplicate
    /// id in the slice fails with [`PipelineError::DuplicateUnitId`] naming
    /// both descriptors.
    pub fn from_descriptors(descriptors: &[UnitDescriptor]) -> Result<Self, PipelineError> {
        let mut seen: BTreeMap<UnitId, &UnitDescriptor> = BTreeMap::new();
        for desc in descriptors {
            if let Some(first) = seen.insert(desc.id, desc) {
                return Err(PipelineError::DuplicateUnitId {
                    id: desc.id,
                    first_source: first.name.clone(),
                    second_source: desc.name.clone(),
                });
            }
        }

        let mut dependencies: BTreeMap<UnitId, BTreeSet<UnitId>> = BTreeMap::new();
        let mut dependents: BTreeMap<UnitId, BTreeSet<UnitId>> = BTreeMap::new();
        for desc in descriptors.iter().filter(|d| d.enabled) {
            dependencies.entry(desc.id).or_default();
            dependents.entry(desc.id).or_default();
            for &dep in &desc.dependencies {
                match seen.get(&dep) {
                    None => {
                        return Err(PipelineError::UnknownDependency {
                            unit: desc.id,
                            dependency: dep,
                        })
                    }
                    Some(d) if !d.enabled => {
                        return Err(PipelineError::DisabledDependency {
                            unit: desc.id,
                            dependency: dep,
                        })
                    }
                    Some(_) => {}
                }
                dependencies.entry(desc.id).or_default().insert(dep);
                dependents.entry(dep).or_default().insert(desc.id);
            }
        }

        Ok(Self {
            dependencies,
            dependents,
        })
    }

    /// Returns the declared dependencies of `unit`, ascending.
    pub fn dependencies_of(&self, unit: UnitId) -> impl Iterator<Item = UnitId> + '_ {
        self.dependencies.get(&unit).into_iter().flatten().copied()
    }

    /// Computes the deterministic execution order via Kahn's algorithm.
    ///
    /// Ready units are visited in ascending id order. If any node is left
    /// with nonzero in-degree, resolution fails with the *complete* set of
    /// unordered units as the cycle report, and no partial plan is emitted.
    pub fn resolve(&self) -> Result<ExecutionPlan, PipelineError> {
        let mut in_degree: BTreeMap<UnitId, usize> = self
            .dependencies
            .iter()
            .map(|(&id, deps)| (id, deps.len()))
            .collect();

        // BTreeSet keeps the ready frontier ordered by ascending id.
        let mut ready: BTreeSet<UnitId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(&next) = ready.iter().next() {
            ready.remove(&next);
            order.push(next);
            for dependent in self.dependents.get(&next).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() < in_degree.len() {
            let members = in_degree
                .into_iter()
                .filter(|&(_, deg)| deg > 0)
                .map(|(id, _)| id)
                .collect();
            return Err(PipelineError::DependencyCycle { members });
        }

        Ok(ExecutionPlan { order })
    }

    /// Groups units into independent branches: weakly-connected components
    /// with no path between them.
    ///
    /// The sequential scheduler does not use this; it exists so a concurrent
    /// extension can fan branches out to a bounded worker pool. Components
    /// are returned ascending by their smallest member, members ascending.
    pub fn independent_branches(&self) -> Vec<Vec<UnitId>> {
        let mut unvisited: BTreeSet<UnitId> = self.dependencies.keys().copied().collect();
        let mut branches = Vec::new();
        while let Some(&start) = unvisited.iter().next() {
            let mut component = BTreeSet::new();
            let mut stack = vec![start];
            while let Some(id) = stack.pop() {
                if !unvisited.remove(&id) {
                    continue;
                }
                component.insert(id);
                stack.extend(self.dependencies.get(&id).into_iter().flatten());
                stack.extend(self.dependents.get(&id).into_iter().flatten());
            }
            branches.push(component.into_iter().collect());
        }
        branches
    }
}

// ---------------------------------------------------------------------------
// Execution plan
// ---------------------------------------------------------------------------

/// The resolved, ordered sequence of units for one run.
///
/// Invariant: for every dependency edge u→v, u precedes v.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    order: Vec<UnitId>,
}

impl ExecutionPlan {
    /// Iterates the plan in execution order.
    pub fn iter(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.order.iter().copied()
    }

    /// Returns the position of `unit` in the plan, if present.
    pub fn position(&self, unit: UnitId) -> Option<usize> {
        self.order.iter().position(|&id| id == unit)
    }

    /// Number of units in the plan.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the ordered ids as a slice.
    pub fn as_slice(&self) -> &[UnitId] {
        &self.order
    }
}
