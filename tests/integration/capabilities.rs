//! Capability policy: submission-time validation against the registry
//! and dispatch-time denial inside the worker.

use convoy::{BatchStatus, Error, FailureKind, TaskDescriptor, TaskOutcome, Violation};
use serde_json::json;

use crate::fixtures::engine;

fn task_with_op(name: &str, op: &str) -> TaskDescriptor {
    TaskDescriptor::new(name, json!({ "op": op }))
}

/// Test: Unknown capability rejected at submission
/// Given a task declaring a capability the registry does not know
/// When submitted
/// Then the batch is rejected naming the task and the capability
#[tokio::test]
async fn test_unknown_capability_rejected() {
    let (engine, trace) = engine();

    let err = engine
        .submit(vec![
            TaskDescriptor::new("a", json!({})).with_capability("shell")
        ])
        .await
        .unwrap_err();

    match err {
        Error::Rejected(rejection) => {
            assert!(rejection.any(|v| matches!(
                v,
                Violation::UnknownCapability { task, capability }
                    if task == "a" && capability == "shell"
            )));
        }
        other => panic!("Expected Rejected, got {:?}", other),
    }
    assert!(trace.order().is_empty());
}

/// Test: Declared capability authorizes its operations
/// Given a task declaring fs_read and performing read_file
/// When the batch runs
/// Then the task succeeds
#[tokio::test]
async fn test_declared_capability_authorizes() {
    let (engine, _trace) = engine();

    let handle = engine
        .submit(vec![task_with_op("reader", "read_file").with_capability("fs_read")])
        .await
        .unwrap();
    let report = engine.await_batch(&handle).await.unwrap();

    assert_eq!(report.status, BatchStatus::Succeeded);
}

/// Test: Runtime denial is a distinct failure
/// Given a task performing write_file without declaring fs_write
/// When the batch runs
/// Then the task fails with CapabilityDenied naming the operation
#[tokio::test]
async fn test_undeclared_operation_denied_at_dispatch() {
    let (engine, _trace) = engine();

    let handle = engine
        .submit(vec![task_with_op("writer", "write_file").with_capability("fs_read")])
        .await
        .unwrap();
    let report = engine.await_batch(&handle).await.unwrap();

    match &report.result_for("writer").unwrap().outcome {
        TaskOutcome::Failed {
            kind: FailureKind::CapabilityDenied,
            error,
        } => assert!(error.contains("write_file")),
        other => panic!("Expected CapabilityDenied, got {:?}", other),
    }
    assert_eq!(report.status, BatchStatus::Failed);
}

/// Test: Permit is the union of declared capabilities
/// Given a task declaring fs_read and network
/// When it performs operations from both grants
/// Then both are authorized
#[tokio::test]
async fn test_permit_unions_declared_capabilities() {
    let (engine, _trace) = engine();

    let handle = engine
        .submit(vec![
            task_with_op("fetch", "http_get")
                .with_capability("network")
                .with_capability("fs_read"),
            task_with_op("list", "list_dir").with_capability("fs_read"),
        ])
        .await
        .unwrap();
    let report = engine.await_batch(&handle).await.unwrap();

    assert_eq!(report.status, BatchStatus::Succeeded);
}

/// Test: Empty capability set denies everything
/// Given a task performing an operation with no declared capabilities
/// When the batch runs
/// Then the task fails with CapabilityDenied
#[tokio::test]
async fn test_no_capabilities_denies_all_operations() {
    let (engine, _trace) = engine();

    let handle = engine
        .submit(vec![task_with_op("bare", "read_file")])
        .await
        .unwrap();
    let report = engine.await_batch(&handle).await.unwrap();

    assert!(matches!(
        report.result_for("bare").unwrap().outcome,
        TaskOutcome::Failed {
            kind: FailureKind::CapabilityDenied,
            ..
        }
    ));
}

/// Test: Denial does not disturb siblings
/// Given one denied task and one permitted task in the same batch
/// When the batch settles
/// Then the permitted task still succeeds
#[tokio::test]
async fn test_denial_is_isolated_to_the_task() {
    let (engine, _trace) = engine();

    let handle = engine
        .submit(vec![
            task_with_op("denied", "http_get"),
            task_with_op("granted", "read_file").with_capability("fs_read"),
        ])
        .await
        .unwrap();
    let report = engine.await_batch(&handle).await.unwrap();

    assert!(report.result_for("granted").unwrap().outcome.is_succeeded());
    assert!(matches!(
        report.result_for("denied").unwrap().outcome,
        TaskOutcome::Failed {
            kind: FailureKind::CapabilityDenied,
            ..
        }
    ));
}
