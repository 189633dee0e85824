//! Dependency graph builder, cycle detection, and readiness queries.
//!
//! Uses `petgraph` to validate step dependencies when a template is authored
//! or customized. The scheduler works from the lighter `DependencyGraph`
//! (step ID -> direct dependency IDs) and asks it for the ready frontier and
//! for blocked steps between batches.

use std::collections::{HashMap, HashSet};

use insightflow_types::error::WorkflowError;
use insightflow_types::workflow::{BlockedStep, StepDefinition};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::DiGraph;

// ---------------------------------------------------------------------------
// DependencyGraph
// ---------------------------------------------------------------------------

/// Step ID -> direct dependency IDs, in template order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    order: Vec<String>,
    deps: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build the mapping without validating it.
    ///
    /// Use [`build_dependency_graph`] to reject unknown references and cycles
    /// up front.
    pub fn new(steps: &[StepDefinition]) -> Self {
        Self {
            order: steps.iter().map(|s| s.id.clone()).collect(),
            deps: steps
                .iter()
                .map(|s| (s.id.clone(), s.depends_on.clone()))
                .collect(),
        }
    }

    /// Step IDs in template order.
    pub fn step_ids(&self) -> &[String] {
        &self.order
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    /// Direct dependencies of a step (empty for unknown IDs).
    pub fn dependencies_of(&self, step_id: &str) -> &[String] {
        self.deps.get(step_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First dependency that does not name a step in this graph.
    pub fn check_references(&self) -> Result<(), WorkflowError> {
        for step_id in &self.order {
            for dep in self.dependencies_of(step_id) {
                if !self.deps.contains_key(dep) {
                    return Err(WorkflowError::UnknownDependency {
                        step: step_id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Transitive closure of a step's dependencies, in template order.
    ///
    /// Terminates on cyclic input. Unknown step IDs yield an empty vec.
    pub fn ancestors_of(&self, step_id: &str) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack = vec![step_id];

        while let Some(current) = stack.pop() {
            for dep in self.dependencies_of(current) {
                if visited.insert(dep.as_str()) {
                    stack.push(dep.as_str());
                }
            }
        }

        self.order
            .iter()
            .filter(|id| id.as_str() != step_id && visited.contains(id.as_str()))
            .cloned()
            .collect()
    }

    /// Steps that are neither completed nor failed and whose dependencies are
    /// all completed, in template order.
    pub fn ready_frontier(
        &self,
        completed: &HashSet<String>,
        failed: &HashSet<String>,
    ) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| !completed.contains(*id) && !failed.contains(*id))
            .filter(|id| {
                self.dependencies_of(id)
                    .iter()
                    .all(|dep| completed.contains(dep))
            })
            .cloned()
            .collect()
    }

    /// Non-terminal steps with at least one failed ancestor.
    ///
    /// A completed step implies all of its dependencies completed, so any
    /// failed ancestor is reached through non-completed steps and the step
    /// can never become ready.
    pub fn blocked_steps(
        &self,
        completed: &HashSet<String>,
        failed: &HashSet<String>,
    ) -> Vec<BlockedStep> {
        self.order
            .iter()
            .filter(|id| !completed.contains(*id) && !failed.contains(*id))
            .filter_map(|id| {
                let failed_dependencies: Vec<String> = self
                    .ancestors_of(id)
                    .into_iter()
                    .filter(|a| failed.contains(a))
                    .collect();
                (!failed_dependencies.is_empty()).then(|| BlockedStep {
                    step_id: id.clone(),
                    failed_dependencies,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Build and validate the dependency graph for a template's steps.
///
/// Rejects duplicate step IDs, dependencies on unknown steps, and cycles.
/// Cycle errors name every step that sits on a cycle.
pub fn build_dependency_graph(steps: &[StepDefinition]) -> Result<DependencyGraph, WorkflowError> {
    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.id.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
    }

    let graph = DependencyGraph::new(steps);
    graph.check_references()?;

    let (digraph, _) = to_digraph(steps);
    if toposort(&digraph, None).is_err() {
        let on_cycle: HashSet<&str> = tarjan_scc(&digraph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || scc.iter().any(|&n| digraph.contains_edge(n, n))
            })
            .flatten()
            .map(|n| digraph[n])
            .collect();
        let steps_on_cycle = steps
            .iter()
            .filter(|s| on_cycle.contains(s.id.as_str()))
            .map(|s| s.id.clone())
            .collect();
        return Err(WorkflowError::CircularDependency {
            steps: steps_on_cycle,
        });
    }

    Ok(graph)
}

/// Directed graph with an edge from each dependency to its dependent.
/// Callers must have checked references first.
fn to_digraph(steps: &[StepDefinition]) -> (DiGraph<&str, ()>, HashMap<&str, usize>) {
    let id_to_idx: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: Vec<_> = steps.iter().map(|s| graph.add_node(s.id.as_str())).collect();

    for step in steps {
        let to_idx = id_to_idx[step.id.as_str()];
        for dep in &step.depends_on {
            if let Some(&from_idx) = id_to_idx.get(dep.as_str()) {
                graph.add_edge(nodes[from_idx], nodes[to_idx], ());
            }
        }
    }

    (graph, id_to_idx)
}

// ---------------------------------------------------------------------------
// Execution plan (wave preview)
// ---------------------------------------------------------------------------

/// Group steps into depth waves for display.
///
/// Wave N holds the steps whose longest dependency chain has length N. When
/// every step succeeds, the scheduler's batches coincide with these waves.
pub fn build_execution_plan(
    steps: &[StepDefinition],
) -> Result<Vec<Vec<&StepDefinition>>, WorkflowError> {
    if steps.is_empty() {
        return Ok(vec![]);
    }
    build_dependency_graph(steps)?;

    let (graph, id_to_idx) = to_digraph(steps);
    let sorted = toposort(&graph, None).map_err(|cycle| WorkflowError::CircularDependency {
        steps: vec![graph[cycle.node_id()].to_string()],
    })?;

    let mut depths: HashMap<&str, usize> = HashMap::new();
    for node in sorted {
        let step = &steps[id_to_idx[graph[node]]];
        let depth = step
            .depends_on
            .iter()
            .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(step.id.as_str(), depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<&StepDefinition>> = vec![vec![]; max_depth + 1];
    for step in steps {
        waves[depths[step.id.as_str()]].push(step);
    }

    Ok(waves)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
