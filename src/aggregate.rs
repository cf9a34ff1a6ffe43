//! Result aggregation per batch.
//!
//! The aggregator owns the terminal record for every admitted task. A
//! batch completes only when each of its tasks holds exactly one result;
//! completion is broadcast on a per-batch watch channel so any number of
//! callers can await it without polling.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

use crate::core::task::{BatchId, BatchReport, BatchStatus, TaskResult};
use crate::{clog_warn, Error, Result};

struct BatchEntry {
    results: Vec<TaskResult>,
    total: usize,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl BatchEntry {
    fn new(total: usize) -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            results: Vec::with_capacity(total),
            total,
            done_tx,
            done_rx,
        }
    }

    fn is_complete(&self) -> bool {
        self.results.len() == self.total
    }
}

/// Collects terminal results and reports batch completion.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct ResultAggregator {
    batches: Arc<RwLock<HashMap<BatchId, BatchEntry>>>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self {
            batches: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Open a batch expecting `total` terminal results.
    pub async fn register_batch(&self, batch_id: BatchId, total: usize) {
        let mut batches = self.batches.write().await;
        batches.insert(batch_id, BatchEntry::new(total));
    }

    /// Record one terminal result.
    ///
    /// The first result per task wins; a duplicate is dropped with a
    /// warning since a task must hold exactly one terminal record.
    /// Returns true when this result completed the batch.
    pub async fn record(&self, batch_id: BatchId, result: TaskResult) -> bool {
        let mut batches = self.batches.write().await;
        let Some(entry) = batches.get_mut(&batch_id) else {
            clog_warn!(
                "aggregator: result for unknown batch {} task {}",
                batch_id.short(),
                result.name
            );
            return false;
        };

        if entry.results.iter().any(|r| r.task_id == result.task_id) {
            clog_warn!(
                "aggregator: duplicate result for task {} in batch {}, keeping first",
                result.name,
                batch_id.short()
            );
            return false;
        }

        entry.results.push(result);
        if entry.is_complete() {
            let _ = entry.done_tx.send(true);
            true
        } else {
            false
        }
    }

    /// Current results for a batch, complete or not.
    pub async fn snapshot(&self, batch_id: BatchId) -> Option<Vec<TaskResult>> {
        let batches = self.batches.read().await;
        batches.get(&batch_id).map(|e| e.results.clone())
    }

    /// Whether every admitted task has reported.
    pub async fn is_complete(&self, batch_id: BatchId) -> bool {
        let batches = self.batches.read().await;
        batches.get(&batch_id).is_some_and(BatchEntry::is_complete)
    }

    /// Wait until the batch has one result per task.
    ///
    /// Returns immediately if the batch already completed.
    pub async fn wait(&self, batch_id: BatchId) -> Result<()> {
        let mut done_rx = {
            let batches = self.batches.read().await;
            let entry = batches
                .get(&batch_id)
                .ok_or(Error::BatchNotFound(batch_id))?;
            entry.done_rx.clone()
        };

        while !*done_rx.borrow_and_update() {
            done_rx
                .changed()
                .await
                .map_err(|_| Error::BatchNotFound(batch_id))?;
        }
        Ok(())
    }

    /// Consolidated report for a completed batch.
    ///
    /// Returns an error if the batch is unknown or still has tasks in
    /// flight.
    pub async fn report(&self, batch_id: BatchId) -> Result<BatchReport> {
        let batches = self.batches.read().await;
        let entry = batches
            .get(&batch_id)
            .ok_or(Error::BatchNotFound(batch_id))?;
        if !entry.is_complete() {
            return Err(Error::Coordinator(format!(
                "batch {} still has tasks in flight",
                batch_id.short()
            )));
        }

        let finished_at = entry
            .results
            .iter()
            .map(|r| r.finished_at)
            .max()
            .unwrap_or_else(chrono::Utc::now);

        Ok(BatchReport {
            batch_id,
            status: BatchStatus::from_results(&entry.results),
            results: entry.results.clone(),
            finished_at,
        })
    }

    /// Drop a batch's results once the caller has consumed its report.
    pub async fn remove(&self, batch_id: BatchId) {
        let mut batches = self.batches.write().await;
        batches.remove(&batch_id);
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}
