//! Public orchestration facade.
//!
//! Ties validation, capability policy, the coordinator, and the result
//! aggregator together behind a small surface: submit a batch, await or
//! snapshot it, cancel it. Workers may submit child batches through the
//! same facade, bounded by the recursion depth limit.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::aggregate::ResultAggregator;
use crate::capability::{CapabilityPolicy, CapabilityRegistry};
use crate::config::Config;
use crate::core::task::{Batch, BatchId, BatchReport, TaskDescriptor, TaskState};
use crate::scheduler::{self, CoordMsg};
use crate::validate::{validate, BatchRejection, Violation};
use crate::worker::WorkerExecutor;
use crate::{clog, Error, Result};

/// Caller-side handle for one admitted batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchHandle {
    batch_id: BatchId,
    depth: usize,
}

impl BatchHandle {
    pub fn id(&self) -> BatchId {
        self.batch_id
    }

    /// Nesting depth; 0 for top-level submissions.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// The orchestration engine.
///
/// Cloning is cheap and all clones drive the same coordinator, so a
/// worker can hold a clone to submit child batches.
#[derive(Clone)]
pub struct Orchestrator {
    control: mpsc::Sender<CoordMsg>,
    aggregator: ResultAggregator,
    registry: CapabilityRegistry,
    config: Config,
}

impl Orchestrator {
    /// Start the engine with the given worker executor, capability
    /// registry, and limits. Spawns the coordinator task; requires a
    /// running tokio runtime.
    pub fn new(
        executor: Arc<dyn WorkerExecutor>,
        registry: CapabilityRegistry,
        config: Config,
    ) -> Self {
        let aggregator = ResultAggregator::new();
        let policy = CapabilityPolicy::new(registry.clone());
        let control = scheduler::spawn(executor, policy, aggregator.clone(), &config);
        Self {
            control,
            aggregator,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Submit a top-level batch.
    ///
    /// Validation and admission are synchronous with the call: on `Ok`
    /// the whole batch is queued, on `Err` none of it is.
    pub async fn submit(&self, tasks: Vec<TaskDescriptor>) -> Result<BatchHandle> {
        self.submit_at_depth(Batch::new(tasks)).await
    }

    /// Submit a child batch on behalf of a running worker.
    ///
    /// The child is an independent batch one level deeper than its
    /// parent; its depth is capped by `max_recursion_depth` so worker
    /// fan-out cannot recurse unboundedly.
    pub async fn submit_child(
        &self,
        parent: &BatchHandle,
        tasks: Vec<TaskDescriptor>,
    ) -> Result<BatchHandle> {
        let depth = parent.depth + 1;
        if depth > self.config.max_recursion_depth {
            return Err(BatchRejection::single(Violation::RecursionLimit {
                depth,
                max: self.config.max_recursion_depth,
            })
            .into());
        }
        self.submit_at_depth(Batch::nested(tasks, depth)).await
    }

    async fn submit_at_depth(&self, batch: Batch) -> Result<BatchHandle> {
        let graph = validate(&batch, &self.registry)?;
        let handle = BatchHandle {
            batch_id: batch.id,
            depth: batch.depth,
        };

        let (reply, rx) = oneshot::channel();
        self.control
            .send(CoordMsg::Admit {
                batch,
                graph,
                reply,
            })
            .await
            .map_err(|_| Error::Coordinator("coordinator stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::Coordinator("coordinator stopped".to_string()))??;

        clog!("orchestrator: batch {} submitted", handle.batch_id.short());
        Ok(handle)
    }

    /// Wait until every task of the batch holds a terminal result, then
    /// return the consolidated report. Idempotent; results stay
    /// available until `forget` is called.
    pub async fn await_batch(&self, handle: &BatchHandle) -> Result<BatchReport> {
        self.aggregator.wait(handle.batch_id).await?;
        self.aggregator.report(handle.batch_id).await
    }

    /// Current scheduling state of each task in the batch, by name.
    ///
    /// Served by the coordinator while the batch is in flight and from
    /// recorded results once it settles.
    pub async fn snapshot(&self, handle: &BatchHandle) -> Result<HashMap<String, TaskState>> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(CoordMsg::Snapshot {
                batch_id: handle.batch_id,
                reply,
            })
            .await
            .map_err(|_| Error::Coordinator("coordinator stopped".to_string()))?;
        if let Some(states) = rx
            .await
            .map_err(|_| Error::Coordinator("coordinator stopped".to_string()))?
        {
            return Ok(states);
        }

        let results = self
            .aggregator
            .snapshot(handle.batch_id)
            .await
            .ok_or(Error::BatchNotFound(handle.batch_id))?;
        Ok(results
            .into_iter()
            .map(|r| (r.name.clone(), r.outcome.state()))
            .collect())
    }

    /// Cancel every non-terminal task of the batch.
    ///
    /// When this returns, no further task of the batch will start;
    /// running workers settle shortly after through their supervisors.
    /// Cancelling an already settled batch is a no-op.
    pub async fn cancel(&self, handle: &BatchHandle) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(CoordMsg::Cancel {
                batch_id: handle.batch_id,
                reply,
            })
            .await
            .map_err(|_| Error::Coordinator("coordinator stopped".to_string()))?;
        match rx
            .await
            .map_err(|_| Error::Coordinator("coordinator stopped".to_string()))?
        {
            Ok(()) => Ok(()),
            // Already settled batches are no longer tracked by the
            // coordinator but their results are; treat that as done.
            Err(Error::BatchNotFound(id)) => {
                if self.aggregator.snapshot(id).await.is_some() {
                    Ok(())
                } else {
                    Err(Error::BatchNotFound(id))
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Drop a settled batch's results.
    pub async fn forget(&self, handle: &BatchHandle) {
        self.aggregator.remove(handle.batch_id).await;
    }
}
