//! Batch validation ahead of admission.
//!
//! Validation is a pure check and is never partial: one bad descriptor
//! rejects the whole batch, because a partially valid graph cannot be
//! safely ordered. Every violation is collected so a caller can fix all
//! of them in one pass.

use thiserror::Error;

use crate::capability::CapabilityRegistry;
use crate::core::dag::{DepGraph, GraphError};
use crate::core::task::Batch;
use std::collections::HashSet;

/// A single reason a batch cannot be admitted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Violation {
    #[error("batch contains no tasks")]
    EmptyBatch,

    #[error("duplicate task name '{name}'")]
    DuplicateTask { name: String },

    #[error("task '{task}' declares unknown capability '{capability}'")]
    UnknownCapability { task: String, capability: String },

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("dependency cycle: {}", .members.join(" -> "))]
    DependencyCycle { members: Vec<String> },

    #[error("queue depth exceeded: {requested} requested, {admitted} admitted, capacity {capacity}")]
    QueueFull {
        requested: usize,
        admitted: usize,
        capacity: usize,
    },

    #[error("recursion limit exceeded: depth {depth}, max {max}")]
    RecursionLimit { depth: usize, max: usize },
}

/// Synchronous rejection of a whole batch. Returned to the submitter
/// before any task is scheduled; no `TaskResult` is ever produced for a
/// rejected batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("batch rejected: {}", .violations.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; "))]
pub struct BatchRejection {
    pub violations: Vec<Violation>,
}

impl BatchRejection {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    pub fn single(violation: Violation) -> Self {
        Self {
            violations: vec![violation],
        }
    }

    /// Whether any violation matches a predicate; convenient in tests
    /// and caller triage.
    pub fn any<F: Fn(&Violation) -> bool>(&self, pred: F) -> bool {
        self.violations.iter().any(pred)
    }
}

/// Validate a batch against the capability registry and build its
/// dependency graph.
///
/// Checks, in order: non-empty batch, name uniqueness, capability
/// membership, dependency references, acyclicity. All violations found
/// are reported together. The graph is only built once the name-level
/// checks pass, since a malformed name set cannot be resolved to edges.
pub fn validate(
    batch: &Batch,
    registry: &CapabilityRegistry,
) -> std::result::Result<DepGraph, BatchRejection> {
    let mut violations = Vec::new();

    if batch.is_empty() {
        return Err(BatchRejection::single(Violation::EmptyBatch));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut duplicated: HashSet<&str> = HashSet::new();
    for task in &batch.tasks {
        if !seen.insert(task.name.as_str()) && duplicated.insert(task.name.as_str()) {
            violations.push(Violation::DuplicateTask {
                name: task.name.clone(),
            });
        }
    }

    for task in &batch.tasks {
        for capability in &task.capabilities {
            if !registry.contains(capability) {
                violations.push(Violation::UnknownCapability {
                    task: task.name.clone(),
                    capability: capability.clone(),
                });
            }
        }
        for dependency in &task.depends_on {
            if !seen.contains(dependency.as_str()) {
                violations.push(Violation::UnknownDependency {
                    task: task.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }

    if !violations.is_empty() {
        return Err(BatchRejection::new(violations));
    }

    DepGraph::build(batch).map_err(|err| {
        let violation = match err {
            GraphError::Cycle { members } => Violation::DependencyCycle { members },
            GraphError::UnknownDependency { task, dependency } => {
                Violation::UnknownDependency { task, dependency }
            }
        };
        BatchRejection::single(violation)
    })
}
