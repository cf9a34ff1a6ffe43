//! Test fixtures for integration tests.
//!
//! Provides mock worker executors and helpers for building engines with
//! explicit limits. The standard executor is driven by task names so
//! scenarios read as data: "fail-*" errors, "panic-*" panics, "slow-*"
//! blocks until cancelled, everything else succeeds quickly.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use convoy::{
    CapabilityRegistry, Config, Orchestrator, TaskDescriptor, WorkerContext, WorkerError,
    WorkerExecutor,
};

/// Execution trace shared between a mock executor and its test.
#[derive(Clone, Default)]
pub struct Trace {
    order: Arc<Mutex<Vec<String>>>,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Task names in completion order.
    pub fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    /// Highest number of workers observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Name-driven mock worker.
///
/// Checks the operation named in the payload's "op" field against the
/// task's permit before doing anything else, mirroring how a real
/// worker would gate its side effects.
pub struct MockWorker {
    trace: Trace,
    base_delay: Duration,
}

impl MockWorker {
    pub fn new(trace: Trace) -> Self {
        Self {
            trace,
            base_delay: Duration::from_millis(10),
        }
    }
}

#[async_trait]
impl WorkerExecutor for MockWorker {
    async fn execute(
        &self,
        task: TaskDescriptor,
        ctx: WorkerContext,
    ) -> std::result::Result<serde_json::Value, WorkerError> {
        if let Some(op) = task.payload.get("op").and_then(|v| v.as_str()) {
            ctx.authorize(op)?;
        }

        let now = self.trace.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.trace.peak.fetch_max(now, Ordering::SeqCst);

        let result = if task.name.starts_with("fail") {
            Err(WorkerError::Failed(format!("{} failed", task.name)))
        } else if task.name.starts_with("panic") {
            self.trace.current.fetch_sub(1, Ordering::SeqCst);
            panic!("{} panicked", task.name);
        } else if task.name.starts_with("slow") {
            ctx.cancelled().await;
            Err(WorkerError::Failed("interrupted".to_string()))
        } else {
            tokio::time::sleep(self.base_delay).await;
            self.trace.order.lock().unwrap().push(task.name.clone());
            Ok(json!({ "done": task.name }))
        };

        self.trace.current.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Registry with the capabilities the scenarios declare.
pub fn test_registry() -> CapabilityRegistry {
    CapabilityRegistry::new()
        .register("fs_read", &["read_file", "list_dir"])
        .register("fs_write", &["write_file"])
        .register("network", &["http_get"])
}

/// Engine with default limits and a fresh trace.
pub fn engine() -> (Orchestrator, Trace) {
    engine_with_limits(Config::default())
}

/// Engine with explicit limits and a fresh trace.
pub fn engine_with_limits(config: Config) -> (Orchestrator, Trace) {
    let trace = Trace::new();
    let executor = Arc::new(MockWorker::new(trace.clone()));
    (
        Orchestrator::new(executor, test_registry(), config),
        trace,
    )
}

/// Shorthand for a descriptor with an empty payload.
pub fn task(name: &str) -> TaskDescriptor {
    TaskDescriptor::new(name, json!({}))
}
