//! convoy - bounded-concurrency batch orchestration
//!
//! convoy accepts batches of interdependent tasks, validates them against
//! a capability registry, resolves their dependency graph, and executes
//! them on isolated workers under a global concurrency ceiling. Each
//! admitted task settles with exactly one terminal result; a batch
//! completes when all of its tasks have settled.
//!
//! The worker side is pluggable: implement [`WorkerExecutor`] and hand it
//! to [`Orchestrator::new`].

pub mod aggregate;
pub mod capability;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestrator;
pub mod scheduler;
pub mod validate;
pub mod worker;

pub use aggregate::ResultAggregator;
pub use capability::{CapabilityPolicy, CapabilityRegistry, Denied, TaskPermit};
pub use config::Config;
pub use crate::core::{
    Batch, BatchId, BatchReport, BatchStatus, CancelReason, DepGraph, FailureKind, TaskDescriptor,
    TaskId, TaskOutcome, TaskResult, TaskState,
};
pub use error::{Error, Result};
pub use orchestrator::{BatchHandle, Orchestrator};
pub use validate::{validate, BatchRejection, Violation};
pub use worker::{WorkerContext, WorkerError, WorkerExecutor};
