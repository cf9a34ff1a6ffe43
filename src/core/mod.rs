//! Core domain models for convoy orchestration.
//!
//! This module contains the fundamental data structures used throughout
//! the engine: task and batch descriptors, terminal results, and the
//! dependency graph.

pub mod dag;
pub mod task;

pub use dag::{DepGraph, GraphError};
pub use task::{
    Batch, BatchId, BatchReport, BatchStatus, CancelReason, FailureKind, TaskDescriptor, TaskId,
    TaskOutcome, TaskResult, TaskState,
};
