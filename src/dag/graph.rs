// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::descriptor::{TaskDescriptor, TaskName};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    /// Direct dependencies: tasks that must succeed before this one can run.
    deps: Vec<TaskName>,
    /// Direct dependents: tasks that depend on this one.
    dependents: Vec<TaskName>,
}

/// In-memory DAG adjacency keyed by task name.
///
/// Both adjacency lists follow declaration order and contain no duplicates,
/// so traversals over them are deterministic.
#[derive(Debug, Clone)]
pub struct DagGraph {
    nodes: HashMap<TaskName, DagNode>,
}

impl DagGraph {
    /// Build a graph from task descriptors.
    ///
    /// Dependencies on names that are not declared are kept in `deps` but get
    /// no node of their own; the registry rejects such configurations before
    /// building a graph.
    pub fn from_descriptors(tasks: &[TaskDescriptor]) -> Self {
        let mut nodes: HashMap<TaskName, DagNode> = HashMap::new();

        for task in tasks {
            let mut deps: Vec<TaskName> = Vec::with_capacity(task.depends_on.len());
            for dep in &task.depends_on {
                if !deps.contains(dep) {
                    deps.push(dep.clone());
                }
            }
            nodes.insert(
                task.name.clone(),
                DagNode {
                    deps,
                    dependents: Vec::new(),
                },
            );
        }

        // Second pass in declaration order so dependents are ordered too.
        for task in tasks {
            let deps = nodes
                .get(&task.name)
                .map(|n| n.deps.clone())
                .unwrap_or_default();

            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(task.name.clone());
                }
            }
        }

        Self { nodes }
    }

    /// Immediate dependencies of a task (the tasks listed in its `after`).
    pub fn dependencies_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task (tasks that list this one in their `after`).
    pub fn dependents_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Return a task that lies on a cycle, if any.
    ///
    /// Edge direction is dep -> task, so for `B.after = ["A"]` we add A -> B.
    pub fn find_cycle(&self) -> Option<TaskName> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        for name in self.nodes.keys() {
            graph.add_node(name.as_str());
        }

        for (name, node) in self.nodes.iter() {
            for dep in node.deps.iter().filter(|d| self.nodes.contains_key(*d)) {
                graph.add_edge(dep.as_str(), name.as_str(), ());
            }
        }

        match toposort(&graph, None) {
            Ok(_order) => None,
            Err(cycle) => Some(cycle.node_id().to_string()),
        }
    }
}
