// src/dag/registry.rs

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::config::PipelineConfig;
use crate::dag::descriptor::{TaskDescriptor, TaskName};
use crate::dag::graph::DagGraph;
use crate::errors::{PipetickError, Result};

/// Validated, immutable set of task descriptors.
///
/// Construction fails with a configuration error when the descriptors do not
/// form a DAG, so holding a `TaskRegistry` means scheduling is safe.
///
/// Descriptors are stored in topological order. The order is stable: among
/// tasks whose dependencies are all placed, the one declared first comes
/// first.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    ordered: Vec<TaskDescriptor>,
    positions: HashMap<TaskName, usize>,
    graph: DagGraph,
}

impl TaskRegistry {
    /// Validate `declared` (in declaration order) and build the registry.
    pub fn new(declared: Vec<TaskDescriptor>) -> Result<Self> {
        ensure_has_tasks(&declared)?;
        ensure_unique_names(&declared)?;
        validate_task_dependencies(&declared)?;

        let graph = DagGraph::from_descriptors(&declared);
        if let Some(node) = graph.find_cycle() {
            return Err(PipetickError::DagCycle(format!(
                "cycle detected in task DAG involving task '{}'",
                node
            )));
        }

        let order = stable_topological_order(&declared, &graph);
        let mut slots: Vec<Option<TaskDescriptor>> = declared.into_iter().map(Some).collect();
        let ordered: Vec<TaskDescriptor> = order
            .into_iter()
            .filter_map(|idx| slots[idx].take())
            .collect();

        let positions = ordered
            .iter()
            .enumerate()
            .map(|(pos, task)| (task.name.clone(), pos))
            .collect();

        debug!(
            order = ?ordered.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "task registry built"
        );

        Ok(Self {
            ordered,
            positions,
            graph,
        })
    }

    /// Build the registry for a validated configuration.
    pub fn from_config(cfg: &PipelineConfig) -> Result<Self> {
        Self::new(cfg.tasks.clone())
    }

    /// Every task exactly once, each after all of its dependencies.
    pub fn topological_order(&self) -> &[TaskDescriptor] {
        &self.ordered
    }

    pub fn get(&self, name: &str) -> Option<&TaskDescriptor> {
        self.position(name).map(|pos| &self.ordered[pos])
    }

    /// Index of `name` in [`topological_order`](Self::topological_order).
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn dependencies_of(&self, name: &str) -> &[TaskName] {
        self.graph.dependencies_of(name)
    }

    pub fn dependents_of(&self, name: &str) -> &[TaskName] {
        self.graph.dependents_of(name)
    }

    /// Tasks without dependencies, in topological order.
    pub fn roots(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.ordered
            .iter()
            .filter(|task| self.graph.dependencies_of(&task.name).is_empty())
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

fn ensure_has_tasks(tasks: &[TaskDescriptor]) -> Result<()> {
    if tasks.is_empty() {
        return Err(PipetickError::ConfigError(
            "task registry needs at least one task".to_string(),
        ));
    }
    Ok(())
}

fn ensure_unique_names(tasks: &[TaskDescriptor]) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for task in tasks {
        if !seen.insert(task.name.as_str()) {
            return Err(PipetickError::ConfigError(format!(
                "task '{}' is declared more than once",
                task.name
            )));
        }
    }
    Ok(())
}

fn validate_task_dependencies(tasks: &[TaskDescriptor]) -> Result<()> {
    let names: HashSet<&str> = tasks.iter().map(|t| t.name.as_str()).collect();

    for task in tasks {
        for dep in &task.depends_on {
            if dep == &task.name {
                return Err(PipetickError::ConfigError(format!(
                    "task '{}' cannot depend on itself in `after`",
                    task.name
                )));
            }
            if !names.contains(dep.as_str()) {
                return Err(PipetickError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    task.name, dep
                )));
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm with the ready set ordered by declaration index.
///
/// Returns declaration indices. Assumes `graph` is acyclic.
fn stable_topological_order(declared: &[TaskDescriptor], graph: &DagGraph) -> Vec<usize> {
    let index: HashMap<&str, usize> = declared
        .iter()
        .enumerate()
        .map(|(idx, task)| (task.name.as_str(), idx))
        .collect();

    let mut indegree: Vec<usize> = declared
        .iter()
        .map(|task| graph.dependencies_of(&task.name).len())
        .collect();

    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, deg)| **deg == 0)
        .map(|(idx, _)| idx)
        .collect();

    let mut order = Vec::with_capacity(declared.len());

    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for dependent in graph.dependents_of(&declared[idx].name) {
            if let Some(&dep_idx) = index.get(dependent.as_str()) {
                indegree[dep_idx] -= 1;
                if indegree[dep_idx] == 0 {
                    ready.insert(dep_idx);
                }
            }
        }
    }

    order
}
