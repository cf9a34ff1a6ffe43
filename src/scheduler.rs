//! Bounded-concurrency scheduler.
//!
//! All scheduling state lives inside a single coordinator task; admission,
//! cancellation, and worker completions arrive as messages on its
//! channels, so task state transitions are serialized by construction and
//! need no locks. Workers run on their own tokio tasks and report back
//! through the completion channel.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::aggregate::ResultAggregator;
use crate::capability::CapabilityPolicy;
use crate::config::Config;
use crate::core::dag::DepGraph;
use crate::core::task::{
    Batch, BatchId, CancelReason, TaskDescriptor, TaskId, TaskOutcome, TaskResult, TaskState,
};
use crate::validate::{BatchRejection, Violation};
use crate::worker::{supervise, WorkerContext, WorkerExecutor};
use crate::{clog, clog_debug, clog_warn, Error, Result};

/// Control messages accepted by the coordinator.
pub(crate) enum CoordMsg {
    /// Admit a validated batch into the queue.
    Admit {
        batch: Batch,
        graph: DepGraph,
        reply: oneshot::Sender<std::result::Result<(), BatchRejection>>,
    },
    /// Cancel every non-terminal task of a batch.
    Cancel {
        batch_id: BatchId,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Current scheduling state of a batch's tasks, by name.
    Snapshot {
        batch_id: BatchId,
        reply: oneshot::Sender<Option<HashMap<String, TaskState>>>,
    },
}

/// Completion report from a worker supervisor.
struct Finished {
    batch_id: BatchId,
    task_id: TaskId,
    name: String,
    outcome: TaskOutcome,
    started_at: DateTime<Utc>,
}

/// Heap entry for a dispatchable task. Higher priority pops first;
/// within a priority tier, earlier admission wins.
#[derive(PartialEq, Eq)]
struct ReadyEntry {
    priority: i32,
    seq: u64,
    batch_id: BatchId,
    task_id: TaskId,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-batch scheduling state while any of its tasks are non-terminal.
struct BatchRuntime {
    graph: DepGraph,
    tasks: HashMap<TaskId, TaskDescriptor>,
    states: HashMap<TaskId, TaskState>,
    remaining: HashMap<TaskId, usize>,
    token: CancellationToken,
    cancelled: bool,
}

impl BatchRuntime {
    fn is_settled(&self) -> bool {
        self.states.values().all(TaskState::is_terminal)
    }
}

/// Spawn the coordinator task and return its control channel.
pub(crate) fn spawn(
    executor: Arc<dyn WorkerExecutor>,
    policy: CapabilityPolicy,
    aggregator: ResultAggregator,
    config: &Config,
) -> mpsc::Sender<CoordMsg> {
    let (control_tx, control_rx) = mpsc::channel(64);
    let (finished_tx, finished_rx) = mpsc::channel(64);

    let coordinator = Coordinator {
        executor,
        policy,
        aggregator,
        max_concurrent: config.max_concurrent.max(1),
        max_queued: config.max_queued,
        default_timeout: config.default_timeout_secs.map(Duration::from_secs),
        control_rx,
        finished_tx,
        finished_rx,
        batches: HashMap::new(),
        ready: BinaryHeap::new(),
        running: 0,
        active: 0,
        seq: 0,
    };
    tokio::spawn(coordinator.run());
    control_tx
}

struct Coordinator {
    executor: Arc<dyn WorkerExecutor>,
    policy: CapabilityPolicy,
    aggregator: ResultAggregator,
    max_concurrent: usize,
    max_queued: usize,
    default_timeout: Option<Duration>,
    control_rx: mpsc::Receiver<CoordMsg>,
    finished_tx: mpsc::Sender<Finished>,
    finished_rx: mpsc::Receiver<Finished>,
    batches: HashMap<BatchId, BatchRuntime>,
    ready: BinaryHeap<ReadyEntry>,
    running: usize,
    /// Non-terminal admitted tasks across all batches; bounds the queue.
    active: usize,
    seq: u64,
}

impl Coordinator {
    async fn run(mut self) {
        clog_debug!(
            "coordinator: started, max_concurrent={} max_queued={}",
            self.max_concurrent,
            self.max_queued
        );
        loop {
            tokio::select! {
                msg = self.control_rx.recv() => match msg {
                    Some(msg) => self.handle_msg(msg).await,
                    // Owner dropped; nothing can observe results anymore.
                    None => break,
                },
                Some(fin) = self.finished_rx.recv() => {
                    self.handle_finished(fin).await;
                }
            }
        }
        clog_debug!("coordinator: stopped");
    }

    async fn handle_msg(&mut self, msg: CoordMsg) {
        match msg {
            CoordMsg::Admit {
                batch,
                graph,
                reply,
            } => {
                let result = self.admit(batch, graph).await;
                let _ = reply.send(result);
                self.dispatch();
            }
            CoordMsg::Cancel { batch_id, reply } => {
                let result = self.cancel(batch_id).await;
                let _ = reply.send(result);
                self.dispatch();
            }
            CoordMsg::Snapshot { batch_id, reply } => {
                let snapshot = self.batches.get(&batch_id).map(|runtime| {
                    runtime
                        .states
                        .iter()
                        .filter_map(|(id, state)| {
                            runtime.graph.name_of(id).map(|n| (n.to_string(), *state))
                        })
                        .collect()
                });
                let _ = reply.send(snapshot);
            }
        }
    }

    /// Admit a batch or reject it atomically on queue pressure.
    ///
    /// Rejection happens before any state is touched: no task from a
    /// rejected batch is registered, queued, or reported.
    async fn admit(
        &mut self,
        batch: Batch,
        graph: DepGraph,
    ) -> std::result::Result<(), BatchRejection> {
        let requested = batch.len();
        if self.active + requested > self.max_queued {
            clog_warn!(
                "coordinator: rejecting batch {} ({} tasks, {} active, capacity {})",
                batch.id.short(),
                requested,
                self.active,
                self.max_queued
            );
            return Err(BatchRejection::single(Violation::QueueFull {
                requested,
                admitted: self.active,
                capacity: self.max_queued,
            }));
        }

        let batch_id = batch.id;
        self.aggregator.register_batch(batch_id, requested).await;

        let mut tasks = HashMap::new();
        let mut states = HashMap::new();
        let mut remaining = HashMap::new();
        for task in &batch.tasks {
            let in_degree = graph.in_degree(&task.id);
            states.insert(
                task.id,
                if in_degree == 0 {
                    TaskState::Eligible
                } else {
                    TaskState::Queued
                },
            );
            remaining.insert(task.id, in_degree);
            if in_degree == 0 {
                self.push_ready(batch_id, task.id, task.priority);
            }
            tasks.insert(task.id, task.clone());
        }

        self.batches.insert(
            batch_id,
            BatchRuntime {
                graph,
                tasks,
                states,
                remaining,
                token: CancellationToken::new(),
                cancelled: false,
            },
        );
        self.active += requested;
        clog!(
            "coordinator: admitted batch {} with {} tasks",
            batch_id.short(),
            requested
        );
        Ok(())
    }

    fn push_ready(&mut self, batch_id: BatchId, task_id: TaskId, priority: i32) {
        self.seq += 1;
        self.ready.push(ReadyEntry {
            priority,
            seq: self.seq,
            batch_id,
            task_id,
        });
    }

    /// Start eligible tasks until the concurrency ceiling is reached.
    ///
    /// Heap entries are invalidated lazily: an entry whose task is no
    /// longer Eligible (cancelled, or already started) is skipped.
    fn dispatch(&mut self) {
        while self.running < self.max_concurrent {
            let Some(entry) = self.ready.pop() else {
                break;
            };
            let Some(runtime) = self.batches.get_mut(&entry.batch_id) else {
                continue;
            };
            if runtime.states.get(&entry.task_id) != Some(&TaskState::Eligible) {
                continue;
            }

            runtime.states.insert(entry.task_id, TaskState::Running);
            self.running += 1;

            let task = runtime.tasks[&entry.task_id].clone();
            let token = runtime.token.child_token();
            let permit = self.policy.permit_for(&task.capabilities);
            let timeout = task.timeout.or(self.default_timeout);
            let executor = Arc::clone(&self.executor);
            let finished_tx = self.finished_tx.clone();
            let batch_id = entry.batch_id;

            clog_debug!(
                "coordinator: dispatching task '{}' ({}) of batch {}",
                task.name,
                task.id.short(),
                batch_id.short()
            );

            tokio::spawn(async move {
                let started_at = Utc::now();
                let task_id = task.id;
                let name = task.name.clone();
                let ctx = WorkerContext::new(permit, token.clone());
                let body = tokio::spawn(async move { executor.execute(task, ctx).await });
                let outcome = supervise(body, token, timeout).await;
                let _ = finished_tx
                    .send(Finished {
                        batch_id,
                        task_id,
                        name,
                        outcome,
                        started_at,
                    })
                    .await;
            });
        }
    }

    async fn handle_finished(&mut self, fin: Finished) {
        self.running -= 1;

        let Some(runtime) = self.batches.get_mut(&fin.batch_id) else {
            clog_warn!(
                "coordinator: completion for unknown batch {}",
                fin.batch_id.short()
            );
            return;
        };

        let state = fin.outcome.state();
        runtime.states.insert(fin.task_id, state);
        self.active -= 1;
        clog_debug!(
            "coordinator: task '{}' of batch {} finished: {}",
            fin.name,
            fin.batch_id.short(),
            state
        );

        let succeeded = fin.outcome.is_succeeded();
        self.aggregator
            .record(
                fin.batch_id,
                TaskResult::new(fin.task_id, &fin.name, fin.outcome).with_start(fin.started_at),
            )
            .await;

        if succeeded {
            self.unblock_dependents(fin.batch_id, fin.task_id);
        } else {
            self.cascade_cancel(fin.batch_id, fin.task_id).await;
        }

        self.retire_if_settled(fin.batch_id);
        self.dispatch();
    }

    /// A predecessor succeeded; move fully satisfied dependents to the
    /// ready queue.
    fn unblock_dependents(&mut self, batch_id: BatchId, task_id: TaskId) {
        let Some(runtime) = self.batches.get_mut(&batch_id) else {
            return;
        };

        let mut newly_ready = Vec::new();
        for dependent in runtime.graph.dependents(&task_id) {
            if runtime.states.get(&dependent) != Some(&TaskState::Queued) {
                continue;
            }
            let left = runtime.remaining.entry(dependent).or_insert(0);
            *left = left.saturating_sub(1);
            if *left == 0 {
                runtime.states.insert(dependent, TaskState::Eligible);
                let priority = runtime.tasks[&dependent].priority;
                newly_ready.push((dependent, priority));
            }
        }
        for (task_id, priority) in newly_ready {
            self.push_ready(batch_id, task_id, priority);
        }
    }

    /// A task failed or was cancelled; cancel its transitive dependents
    /// that have not started. Running tasks are unaffected, since a task
    /// only starts after every predecessor succeeded.
    async fn cascade_cancel(&mut self, batch_id: BatchId, task_id: TaskId) {
        let Some(runtime) = self.batches.get_mut(&batch_id) else {
            return;
        };

        let mut cancelled = Vec::new();
        let mut frontier = VecDeque::from(runtime.graph.dependents(&task_id));
        while let Some(dependent) = frontier.pop_front() {
            match runtime.states.get(&dependent) {
                Some(TaskState::Queued) | Some(TaskState::Eligible) => {}
                _ => continue,
            }
            runtime.states.insert(dependent, TaskState::Cancelled);
            let name = runtime.tasks[&dependent].name.clone();
            cancelled.push((dependent, name));
            frontier.extend(runtime.graph.dependents(&dependent));
        }

        self.active -= cancelled.len();
        for (task_id, name) in cancelled {
            clog!(
                "coordinator: cancelling task '{}' of batch {}: dependency failed",
                name,
                batch_id.short()
            );
            self.aggregator
                .record(
                    batch_id,
                    TaskResult::new(
                        task_id,
                        &name,
                        TaskOutcome::Cancelled {
                            reason: CancelReason::DependencyFailed,
                        },
                    ),
                )
                .await;
        }
    }

    /// Cancel a batch: queued and eligible tasks settle immediately,
    /// running workers are signalled through the batch token and settle
    /// when their supervisor reports back.
    ///
    /// Once the reply is sent, no task of this batch will start.
    async fn cancel(&mut self, batch_id: BatchId) -> Result<()> {
        let Some(runtime) = self.batches.get_mut(&batch_id) else {
            return Err(Error::BatchNotFound(batch_id));
        };
        if runtime.cancelled {
            return Ok(());
        }
        runtime.cancelled = true;
        runtime.token.cancel();

        let mut cancelled = Vec::new();
        for (&task_id, state) in runtime.states.iter_mut() {
            if matches!(*state, TaskState::Queued | TaskState::Eligible) {
                *state = TaskState::Cancelled;
                cancelled.push((task_id, runtime.tasks[&task_id].name.clone()));
            }
        }

        clog!(
            "coordinator: cancelling batch {} ({} pending tasks)",
            batch_id.short(),
            cancelled.len()
        );
        self.active -= cancelled.len();
        for (task_id, name) in cancelled {
            self.aggregator
                .record(
                    batch_id,
                    TaskResult::new(
                        task_id,
                        &name,
                        TaskOutcome::Cancelled {
                            reason: CancelReason::BatchCancelled,
                        },
                    ),
                )
                .await;
        }

        self.retire_if_settled(batch_id);
        Ok(())
    }

    fn retire_if_settled(&mut self, batch_id: BatchId) {
        if self
            .batches
            .get(&batch_id)
            .is_some_and(BatchRuntime::is_settled)
        {
            self.batches.remove(&batch_id);
            clog_debug!("coordinator: batch {} settled", batch_id.short());
        }
    }
}
