//! Worker execution boundary.
//!
//! A worker runs one task in isolation: its body is spawned on its own
//! tokio task, shares no mutable state with other workers, and talks
//! back only through its terminal outcome. The supervisor wrapping each
//! body captures panics as worker faults, observes the batch
//! cancellation token, and enforces the per-task timeout.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::capability::{Denied, TaskPermit};
use crate::core::task::{CancelReason, FailureKind, TaskDescriptor, TaskOutcome};

/// Errors a worker may return from `execute`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    /// The worker requested an operation outside its permit.
    #[error("operation '{operation}' denied")]
    Denied { operation: String },

    /// The work itself failed.
    #[error("{0}")]
    Failed(String),
}

impl From<Denied> for WorkerError {
    fn from(denied: Denied) -> Self {
        WorkerError::Denied {
            operation: denied.operation,
        }
    }
}

/// Per-task execution context handed to the worker.
///
/// Carries the capability permit resolved at dispatch and a child
/// cancellation token. Long-running workers are expected to observe the
/// token at their own yield points; the supervisor additionally aborts
/// the body at its next await once the token fires.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    permit: TaskPermit,
    cancel: CancellationToken,
}

impl WorkerContext {
    pub fn new(permit: TaskPermit, cancel: CancellationToken) -> Self {
        Self { permit, cancel }
    }

    /// Check a capability-gated operation before performing it.
    ///
    /// A denial here must be propagated, not swallowed: it surfaces as
    /// a `CapabilityDenied` task failure.
    pub fn authorize(&self, operation: &str) -> std::result::Result<(), WorkerError> {
        self.permit.authorize(operation).map_err(WorkerError::from)
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Future that resolves when cancellation is requested, for use in
    /// the worker's own `tokio::select!`.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// The pluggable external capability that actually performs work.
///
/// What "work" means is entirely up to the implementation; the engine
/// treats the payload and output as opaque.
#[async_trait]
pub trait WorkerExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        task: TaskDescriptor,
        ctx: WorkerContext,
    ) -> std::result::Result<serde_json::Value, WorkerError>;
}

/// Run a spawned worker body to its terminal outcome.
///
/// Resolves when the body finishes, the token fires, or the timeout
/// elapses, whichever comes first. On cancellation or timeout the body
/// is aborted at its next yield point and the outcome is Cancelled even
/// if the body raced to completion.
pub(crate) async fn supervise(
    mut body: JoinHandle<std::result::Result<serde_json::Value, WorkerError>>,
    cancel: CancellationToken,
    timeout: Option<Duration>,
) -> TaskOutcome {
    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => futures::future::pending::<()>().await,
        }
    };

    // Biased so that a fired token or an elapsed deadline wins over a
    // body that raced to completion in the same tick.
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            body.abort();
            let _ = body.await;
            TaskOutcome::Cancelled {
                reason: CancelReason::BatchCancelled,
            }
        }
        _ = deadline => {
            body.abort();
            let _ = body.await;
            TaskOutcome::Cancelled {
                reason: CancelReason::Timeout,
            }
        }
        joined = &mut body => outcome_from_join(joined),
    }
}

fn outcome_from_join(
    joined: std::result::Result<std::result::Result<serde_json::Value, WorkerError>, JoinError>,
) -> TaskOutcome {
    match joined {
        Ok(Ok(output)) => TaskOutcome::Succeeded { output },
        Ok(Err(WorkerError::Denied { operation })) => TaskOutcome::Failed {
            kind: FailureKind::CapabilityDenied,
            error: format!("operation '{}' denied", operation),
        },
        Ok(Err(WorkerError::Failed(error))) => TaskOutcome::Failed {
            kind: FailureKind::Execution,
            error,
        },
        Err(join) if join.is_panic() => {
            let payload = join.into_panic();
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            TaskOutcome::Failed {
                kind: FailureKind::WorkerFault,
                error: format!("worker panicked: {}", msg),
            }
        }
        Err(_) => TaskOutcome::Failed {
            kind: FailureKind::WorkerFault,
            error: "worker aborted".to_string(),
        },
    }
}
