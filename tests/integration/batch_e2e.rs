//! End-to-end batch lifecycle tests.
//!
//! Submission through consolidated report, including the rejection
//! paths that must leave no trace behind.

use convoy::{BatchStatus, Error, TaskDescriptor, TaskOutcome, Violation};
use serde_json::json;

use crate::fixtures::{engine, task};

/// Test: E2E Happy Path
/// Given a batch of 3 independent tasks
/// When the batch is submitted and awaited
/// Then every task succeeds and the report holds one result per task
#[tokio::test]
async fn test_e2e_happy_path_three_tasks() {
    let (engine, trace) = engine();

    let handle = engine
        .submit(vec![task("a"), task("b"), task("c")])
        .await
        .unwrap();
    let report = engine.await_batch(&handle).await.unwrap();

    assert_eq!(report.status, BatchStatus::Succeeded);
    assert_eq!(report.results.len(), 3);
    for name in ["a", "b", "c"] {
        let result = report.result_for(name).unwrap();
        assert_eq!(
            result.outcome,
            TaskOutcome::Succeeded {
                output: json!({ "done": name }),
            }
        );
        assert!(result.started_at.is_some());
        assert!(result.started_at.unwrap() <= result.finished_at);
    }
    assert_eq!(trace.order().len(), 3);
}

/// Test: E2E Pipeline
/// Given a 3-stage chain research -> analyze -> summarize
/// When the batch runs
/// Then stages complete in dependency order
#[tokio::test]
async fn test_e2e_pipeline_runs_in_order() {
    let (engine, trace) = engine();

    let handle = engine
        .submit(vec![
            task("summarize").depends_on("analyze"),
            task("research"),
            task("analyze").depends_on("research"),
        ])
        .await
        .unwrap();
    let report = engine.await_batch(&handle).await.unwrap();

    assert_eq!(report.status, BatchStatus::Succeeded);
    assert_eq!(
        trace.order(),
        vec![
            "research".to_string(),
            "analyze".to_string(),
            "summarize".to_string()
        ]
    );
}

/// Test: Exactly one result per admitted task
/// Given a mixed batch where some tasks fail
/// When the batch settles
/// Then the report has exactly one result per task, no more, no fewer
#[tokio::test]
async fn test_exactly_one_result_per_task() {
    let (engine, _trace) = engine();

    let names = ["a", "fail-b", "c", "d"];
    let handle = engine
        .submit(names.iter().map(|n| task(n)).collect())
        .await
        .unwrap();
    let report = engine.await_batch(&handle).await.unwrap();

    assert_eq!(report.results.len(), names.len());
    let mut seen: Vec<&str> = report.results.iter().map(|r| r.name.as_str()).collect();
    seen.sort_unstable();
    let mut expected = names.to_vec();
    expected.sort_unstable();
    assert_eq!(seen, expected);
}

/// Test: Empty batch rejection
/// Given an empty task list
/// When submitted
/// Then the batch is rejected synchronously
#[tokio::test]
async fn test_empty_batch_rejected() {
    let (engine, _trace) = engine();

    let err = engine.submit(vec![]).await.unwrap_err();
    match err {
        Error::Rejected(rejection) => {
            assert!(rejection.any(|v| matches!(v, Violation::EmptyBatch)));
        }
        other => panic!("Expected Rejected, got {:?}", other),
    }
}

/// Test: Cycle rejection names every member
/// Given tasks a -> b -> c -> a plus an unrelated task
/// When submitted
/// Then the rejection names exactly the tasks on the cycle
#[tokio::test]
async fn test_cycle_rejection_names_all_members() {
    let (engine, trace) = engine();

    let err = engine
        .submit(vec![
            task("a").depends_on("c"),
            task("b").depends_on("a"),
            task("c").depends_on("b"),
            task("unrelated"),
        ])
        .await
        .unwrap_err();

    match err {
        Error::Rejected(rejection) => {
            let members = rejection
                .violations
                .iter()
                .find_map(|v| match v {
                    Violation::DependencyCycle { members } => Some(members.clone()),
                    _ => None,
                })
                .expect("Expected a DependencyCycle violation");
            assert_eq!(members.len(), 3);
            for name in ["a", "b", "c"] {
                assert!(members.contains(&name.to_string()));
            }
            assert!(!members.contains(&"unrelated".to_string()));
        }
        other => panic!("Expected Rejected, got {:?}", other),
    }

    // Rejection is atomic: nothing from the batch ever ran.
    assert!(trace.order().is_empty());
}

/// Test: Duplicate names rejected
/// Given two tasks sharing a name
/// When submitted
/// Then the batch is rejected and no task runs
#[tokio::test]
async fn test_duplicate_names_rejected() {
    let (engine, trace) = engine();

    let err = engine
        .submit(vec![task("twin"), task("twin")])
        .await
        .unwrap_err();
    match err {
        Error::Rejected(rejection) => {
            assert!(rejection.any(|v| matches!(v, Violation::DuplicateTask { .. })));
        }
        other => panic!("Expected Rejected, got {:?}", other),
    }
    assert!(trace.order().is_empty());
}

/// Test: Opaque payloads pass through untouched
/// Given a task with a structured payload
/// When the worker echoes completion
/// Then the engine never interpreted or altered the payload
#[tokio::test]
async fn test_payload_is_opaque() {
    let (engine, _trace) = engine();

    let payload = json!({ "nested": { "values": [1, 2, 3] }, "flag": true });
    let handle = engine
        .submit(vec![TaskDescriptor::new("opaque", payload)])
        .await
        .unwrap();
    let report = engine.await_batch(&handle).await.unwrap();

    assert!(report.result_for("opaque").unwrap().outcome.is_succeeded());
}

/// Test: Child batches run independently of their parent
/// Given a parent batch and a child submitted one level deeper
/// When both are awaited
/// Then both complete with their own reports
#[tokio::test]
async fn test_child_batch_completes_independently() {
    let (engine, _trace) = engine();

    let parent = engine.submit(vec![task("parent-work")]).await.unwrap();
    let child = engine
        .submit_child(&parent, vec![task("child-work")])
        .await
        .unwrap();
    assert_eq!(child.depth(), 1);

    let child_report = engine.await_batch(&child).await.unwrap();
    let parent_report = engine.await_batch(&parent).await.unwrap();
    assert_eq!(child_report.status, BatchStatus::Succeeded);
    assert_eq!(parent_report.status, BatchStatus::Succeeded);
}

/// Test: Recursion limit
/// Given nested submissions at the maximum depth
/// When one more level is submitted
/// Then it is rejected with a recursion violation
#[tokio::test]
async fn test_recursion_limit_enforced() {
    let (engine, _trace) = engine();

    let mut handle = engine.submit(vec![task("d0")]).await.unwrap();
    for i in 1..=engine.config().max_recursion_depth {
        handle = engine
            .submit_child(&handle, vec![task(&format!("d{}", i))])
            .await
            .unwrap();
    }

    let err = engine
        .submit_child(&handle, vec![task("too-deep")])
        .await
        .unwrap_err();
    match err {
        Error::Rejected(rejection) => {
            assert!(rejection.any(|v| matches!(v, Violation::RecursionLimit { .. })));
        }
        other => panic!("Expected Rejected, got {:?}", other),
    }
}
