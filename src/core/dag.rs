//! Dependency graph over a validated batch.
//!
//! Nodes are task identities, edges are "must complete before" relations
//! derived from declared dependencies. The graph is built once at
//! submission; a cycle rejects the whole batch, never a single task.

use crate::core::task::{Batch, TaskId};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while deriving the graph from declared dependencies.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A descriptor names a dependency that is not in the batch.
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    /// The declared dependencies form a cycle; every member is named.
    #[error("dependency cycle: {}", .members.join(" -> "))]
    Cycle { members: Vec<String> },
}

/// DFS colors for cycle detection.
#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// The dependency graph for one batch.
///
/// Wraps a petgraph `DiGraph` with an id index for fast `TaskId`
/// lookups. Edges point from a predecessor to the task that waits on
/// it.
pub struct DepGraph {
    graph: DiGraph<TaskId, ()>,
    index: HashMap<TaskId, NodeIndex>,
    names: HashMap<TaskId, String>,
}

impl DepGraph {
    /// Build the graph from a batch whose names and references have
    /// already passed validation.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::UnknownDependency` for a dangling reference
    /// and `GraphError::Cycle` naming every task on the first cycle
    /// found.
    pub fn build(batch: &Batch) -> std::result::Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut names = HashMap::new();
        let mut by_name: HashMap<&str, TaskId> = HashMap::new();

        for task in &batch.tasks {
            let node = graph.add_node(task.id);
            index.insert(task.id, node);
            names.insert(task.id, task.name.clone());
            by_name.insert(task.name.as_str(), task.id);
        }

        for task in &batch.tasks {
            for dep in &task.depends_on {
                let dep_id = by_name.get(dep.as_str()).copied().ok_or_else(|| {
                    GraphError::UnknownDependency {
                        task: task.name.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                graph.add_edge(index[&dep_id], index[&task.id], ());
            }
        }

        let dag = Self {
            graph,
            index,
            names,
        };
        if let Some(members) = dag.find_cycle() {
            return Err(GraphError::Cycle { members });
        }
        Ok(dag)
    }

    /// Number of tasks in the graph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of declared dependency edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All task ids in the graph.
    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.index.keys().copied()
    }

    /// Name of a task, for diagnostics.
    pub fn name_of(&self, id: &TaskId) -> Option<&str> {
        self.names.get(id).map(|s| s.as_str())
    }

    /// Tasks that must succeed before `id` becomes eligible.
    pub fn predecessors(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Tasks that wait on `id`.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Number of unresolved predecessors at admission time.
    pub fn in_degree(&self, id: &TaskId) -> usize {
        self.index
            .get(id)
            .map(|&node| {
                self.graph
                    .neighbors_directed(node, Direction::Incoming)
                    .count()
            })
            .unwrap_or(0)
    }

    fn neighbors(&self, id: &TaskId, dir: Direction) -> Vec<TaskId> {
        if let Some(&node) = self.index.get(id) {
            self.graph
                .neighbors_directed(node, dir)
                .filter_map(|n| self.graph.node_weight(n))
                .copied()
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Standard coloring DFS over the dependency edges.
    ///
    /// petgraph's toposort error names only one node, but the rejection
    /// contract requires every task on the cycle, so the walk keeps the
    /// gray path and slices it at the back edge.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut colors: HashMap<NodeIndex, Color> =
            self.graph.node_indices().map(|n| (n, Color::White)).collect();
        let mut path = Vec::new();

        for start in self.graph.node_indices() {
            if colors[&start] == Color::White {
                if let Some(members) = self.visit(start, &mut colors, &mut path) {
                    return Some(members);
                }
            }
        }
        None
    }

    fn visit(
        &self,
        node: NodeIndex,
        colors: &mut HashMap<NodeIndex, Color>,
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<String>> {
        colors.insert(node, Color::Gray);
        path.push(node);

        for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
            match colors[&next] {
                Color::Gray => {
                    // Back edge: the cycle is the path from `next` onward.
                    let pos = path.iter().position(|&n| n == next).unwrap_or(0);
                    let members = path[pos..]
                        .iter()
                        .filter_map(|n| self.graph.node_weight(*n))
                        .filter_map(|id| self.names.get(id).cloned())
                        .collect();
                    return Some(members);
                }
                Color::White => {
                    if let Some(members) = self.visit(next, colors, path) {
                        return Some(members);
                    }
                }
                Color::Black => {}
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
        None
    }
}

impl std::fmt::Debug for DepGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepGraph")
            .field("tasks", &self.len())
            .field("edges", &self.edge_count())
            .finish()
    }
}
