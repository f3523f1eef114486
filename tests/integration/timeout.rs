//! Timeout tests.
//!
//! These tests verify that the orchestration timeout lets in-flight work
//! settle, skips everything not yet started, and that per-task timeouts
//! fail only the slow attempt.

use std::time::Duration;

use conductor::orchestration::{ExecutionEvent, SkipReason, Strategy};
use conductor::{Config, OrchestrationStatus, TaskId, TaskOutcome};

use crate::fixtures::{independent_tasks, no_tags, test_task, OrchestratorHarness, ScriptedRunner};

fn timeout_config(ms: u64) -> Config {
    Config {
        orchestration_timeout: Duration::from_millis(ms),
        ..Config::default()
    }
}

/// Test: Timeout mid-phase
/// Given a 60ms orchestration timeout and a 150ms task in phase 1
/// When the orchestration runs
/// Then phase 1 settles, phase 2 is skipped and the status is timeout
#[tokio::test]
async fn test_timeout_skips_later_phases() {
    let runner = ScriptedRunner::new().delay("slow", Duration::from_millis(150));
    let mut harness = OrchestratorHarness::with_config(runner, timeout_config(60));
    let tasks = vec![
        test_task("slow", 150),
        test_task("next", 10).depends_on(["slow"]),
        test_task("last", 10).depends_on(["next"]),
    ];

    let report = harness.orchestrator.start(tasks, no_tags()).await.unwrap();

    assert_eq!(report.status, OrchestrationStatus::Timeout);
    assert!(report.outcome(&TaskId::from("slow")).unwrap().is_completed());
    for id in ["next", "last"] {
        assert_eq!(
            report.outcome(&TaskId::from(id)),
            Some(&TaskOutcome::Skipped {
                reason: SkipReason::Timeout
            })
        );
        assert!(!harness.runner.was_called(id));
    }

    // Validation still runs on the partial result.
    let validation = report.validation.as_ref().unwrap();
    assert!((validation.completion_rate - 1.0 / 3.0).abs() < 1e-9);
    assert!(report.ended_at.is_some());
    assert_eq!(harness.orchestrator.stats().timed_out, 1);

    let saw_timeout = harness
        .events()
        .iter()
        .any(|e| matches!(e, ExecutionEvent::TimeoutReached { .. }));
    assert!(saw_timeout);
}

/// Test: Waiting siblings are cancelled
/// Given max_concurrency = 1, three 50ms tasks in one parallel phase and a 70ms timeout
/// When the orchestration runs
/// Then the first task completes and the last never starts
#[tokio::test]
async fn test_timeout_cancels_unstarted_siblings() {
    let config = Config {
        max_concurrency: 1,
        ..timeout_config(70)
    };
    let runner = ScriptedRunner::new().default_delay(Duration::from_millis(50));
    let harness = OrchestratorHarness::with_config(runner, config);

    let report = harness
        .orchestrator
        .start_with_strategy(independent_tasks(3), no_tags(), Some(Strategy::Parallel))
        .await
        .unwrap();

    assert_eq!(report.status, OrchestrationStatus::Timeout);
    assert!(report.metrics.completed >= 1);
    assert!(report.metrics.skipped >= 1);
    assert!(harness.runner.calls().len() < 3);
    assert!(report.outcomes.values().any(|o| matches!(
        o,
        TaskOutcome::Skipped {
            reason: SkipReason::Timeout
        }
    )));
}

/// Test: Fast runs are unaffected by the timeout
/// Given a generous timeout
/// When a short plan runs
/// Then the status is completed
#[tokio::test]
async fn test_no_timeout_when_fast() {
    let harness = OrchestratorHarness::with_config(ScriptedRunner::new(), timeout_config(5_000));

    let report = harness
        .orchestrator
        .start(independent_tasks(3), no_tags())
        .await
        .unwrap();

    assert_eq!(report.status, OrchestrationStatus::Completed);
    assert_eq!(report.metrics.skipped, 0);
}

/// Test: Per-task timeout fails only the slow task
/// Given a 30ms task timeout, one 300ms task and one fast task
/// When the orchestration runs
/// Then the slow task fails with a timeout error and the fast one completes
#[tokio::test]
async fn test_task_timeout_fails_attempt() {
    let config = Config {
        task_timeout: Some(Duration::from_millis(30)),
        ..Config::default()
    };
    let runner = ScriptedRunner::new().delay("slow", Duration::from_millis(300));
    let harness = OrchestratorHarness::with_config(runner, config);
    let tasks = vec![test_task("slow", 300), test_task("fast", 10)];

    let report = harness.orchestrator.start(tasks, no_tags()).await.unwrap();

    assert_eq!(report.status, OrchestrationStatus::Completed);
    match report.outcome(&TaskId::from("slow")).unwrap() {
        TaskOutcome::Failed { error, duration, .. } => {
            assert!(error.contains("timed out"), "error was {}", error);
            assert!(*duration < Duration::from_millis(300));
        }
        other => panic!("Expected slow to fail, got {:?}", other),
    }
    assert!(report.outcome(&TaskId::from("fast")).unwrap().is_completed());
}
