//! Task and batch data model.
//!
//! Tasks are the atomic units of isolated work dispatched to workers. A
//! batch is the unit of submission and aggregation: the orchestrator
//! reports completion only once every task in the batch holds exactly one
//! terminal result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique identifier for a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single unit of work submitted for orchestration.
///
/// The payload is opaque to the engine; `name` is the task's identity
/// within its batch and the key other descriptors use in `depends_on`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Unique identifier assigned at construction.
    pub id: TaskId,
    /// Identity within the batch; must be unique per batch.
    pub name: String,
    /// Named permissions this task is allowed to exercise.
    pub capabilities: BTreeSet<String>,
    /// Opaque work definition handed to the worker executor.
    pub payload: serde_json::Value,
    /// Names of tasks in the same batch that must succeed first.
    pub depends_on: Vec<String>,
    /// Scheduling hint; higher values dispatch first within a tier.
    pub priority: i32,
    /// Optional maximum execution duration. Exceeding it cancels the
    /// task with reason `Timeout`.
    pub timeout: Option<Duration>,
    /// When the descriptor was created.
    pub created_at: DateTime<Utc>,
}

impl TaskDescriptor {
    /// Create a descriptor with the given name and opaque payload.
    pub fn new(name: &str, payload: serde_json::Value) -> Self {
        Self {
            id: TaskId::new(),
            name: name.to_string(),
            capabilities: BTreeSet::new(),
            payload,
            depends_on: Vec::new(),
            priority: 0,
            timeout: None,
            created_at: Utc::now(),
        }
    }

    /// Declare a capability this task may exercise.
    pub fn with_capability(mut self, capability: &str) -> Self {
        self.capabilities.insert(capability.to_string());
        self
    }

    /// Declare a dependency on another task in the same batch, by name.
    pub fn depends_on(mut self, name: &str) -> Self {
        self.depends_on.push(name.to_string());
        self
    }

    /// Set the priority hint.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the maximum execution duration.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Scheduling state of an admitted task.
///
/// `Queued -> Eligible -> Running -> {Succeeded, Failed} | Cancelled`.
/// Cancellation can strike from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting on unresolved dependencies.
    Queued,
    /// Dependencies satisfied, waiting for a worker slot.
    Eligible,
    /// Executing on a worker.
    Running,
    /// Terminal: completed successfully.
    Succeeded,
    /// Terminal: worker reported or suffered a failure.
    Failed,
    /// Terminal: cancelled before or during execution.
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Queued => "queued",
            TaskState::Eligible => "eligible",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Why a failed task failed.
///
/// Distinct kinds let callers tell "the work itself failed" apart from
/// "the work was not permitted" and from defects in the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The worker returned an error while executing the payload.
    Execution,
    /// The worker attempted an operation outside its capability set.
    CapabilityDenied,
    /// The worker crashed (panic or abnormal termination).
    WorkerFault,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Execution => "execution",
            FailureKind::CapabilityDenied => "capability denied",
            FailureKind::WorkerFault => "worker fault",
        };
        write!(f, "{}", s)
    }
}

/// Why a cancelled task was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The owning batch was cancelled.
    BatchCancelled,
    /// A (possibly transitive) dependency failed or was cancelled.
    DependencyFailed,
    /// The task exceeded its maximum execution duration.
    Timeout,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CancelReason::BatchCancelled => "batch cancelled",
            CancelReason::DependencyFailed => "dependency failed",
            CancelReason::Timeout => "timeout",
        };
        write!(f, "{}", s)
    }
}

/// Terminal outcome of one admitted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskOutcome {
    /// The worker completed and produced an output payload.
    Succeeded {
        /// Opaque output payload.
        output: serde_json::Value,
    },
    /// The worker failed, was denied, or crashed.
    Failed {
        /// Classification of the failure.
        kind: FailureKind,
        /// Error detail from the worker or supervisor.
        error: String,
    },
    /// The task was cancelled before or during execution.
    Cancelled {
        /// Why the task was cancelled.
        reason: CancelReason,
    },
}

impl TaskOutcome {
    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Succeeded { .. } => TaskState::Succeeded,
            TaskOutcome::Failed { .. } => TaskState::Failed,
            TaskOutcome::Cancelled { .. } => TaskState::Cancelled,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded { .. })
    }
}

/// Terminal record for one admitted task.
///
/// Exactly one is produced per admitted task. Tasks rejected at
/// validation never produce a result; the whole batch is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// The task this result belongs to.
    pub task_id: TaskId,
    /// The task's name within its batch.
    pub name: String,
    /// Terminal outcome.
    pub outcome: TaskOutcome,
    /// When execution started. None for tasks cancelled before running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the terminal state was reached.
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn new(task_id: TaskId, name: &str, outcome: TaskOutcome) -> Self {
        Self {
            task_id,
            name: name.to_string(),
            outcome,
            started_at: None,
            finished_at: Utc::now(),
        }
    }

    pub fn with_start(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self
    }
}

/// An immutable set of task descriptors submitted together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Unique identifier for this batch.
    pub id: BatchId,
    /// The descriptors submitted together.
    pub tasks: Vec<TaskDescriptor>,
    /// Nesting depth; 0 for top-level submissions.
    pub depth: usize,
    /// When the batch was submitted.
    pub created_at: DateTime<Utc>,
}

impl Batch {
    /// Create a top-level batch from a set of descriptors.
    pub fn new(tasks: Vec<TaskDescriptor>) -> Self {
        Self {
            id: BatchId::new(),
            tasks,
            depth: 0,
            created_at: Utc::now(),
        }
    }

    /// Create a nested batch at the given depth.
    pub fn nested(tasks: Vec<TaskDescriptor>, depth: usize) -> Self {
        Self {
            depth,
            ..Self::new(tasks)
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up a descriptor by name.
    pub fn task_by_name(&self, name: &str) -> Option<&TaskDescriptor> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// Overall status of a finished batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every task succeeded.
    Succeeded,
    /// At least one task failed.
    Failed,
    /// No failures, but at least one task was cancelled.
    PartiallyCancelled,
}

impl BatchStatus {
    /// Derive the batch status from its terminal results.
    ///
    /// Precedence: any failure makes the batch Failed; otherwise any
    /// cancellation makes it PartiallyCancelled.
    pub fn from_results<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a TaskResult>,
    {
        let mut cancelled = false;
        for result in results {
            match result.outcome {
                TaskOutcome::Failed { .. } => return BatchStatus::Failed,
                TaskOutcome::Cancelled { .. } => cancelled = true,
                TaskOutcome::Succeeded { .. } => {}
            }
        }
        if cancelled {
            BatchStatus::PartiallyCancelled
        } else {
            BatchStatus::Succeeded
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BatchStatus::Succeeded => "succeeded",
            BatchStatus::Failed => "failed",
            BatchStatus::PartiallyCancelled => "partially cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Consolidated view of a finished batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// The batch this report covers.
    pub batch_id: BatchId,
    /// Overall status derived from the individual outcomes.
    pub status: BatchStatus,
    /// One terminal result per admitted task.
    pub results: Vec<TaskResult>,
    /// When the last task reached a terminal state.
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    /// Look up a result by task name.
    pub fn result_for(&self, name: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.name == name)
    }
}
