//! Failure isolation and retry tests.
//!
//! These tests verify that a failed task never cancels its siblings, that
//! its dependents are skipped rather than run, and that retries move to
//! alternate workers.

use std::time::Duration;

use conductor::orchestration::{ExecutionEvent, SkipReason};
use conductor::{Config, OrchestrationStatus, TaskId, TaskOutcome};

use crate::fixtures::{
    chain_tasks, diamond_tasks, fan_out_tasks, independent_tasks, no_tags, test_task,
    OrchestratorHarness, ScriptedRunner,
};

/// Test: A failing sibling does not cancel the others
/// Given 4 independent tasks where t1 fails quickly and the rest are slow
/// When they run in one parallel phase
/// Then t1 fails and the other three complete
#[tokio::test]
async fn test_sibling_failure_is_isolated() {
    let runner = ScriptedRunner::new()
        .fail("t1")
        .delay("t1", Duration::from_millis(1))
        .default_delay(Duration::from_millis(30));
    let harness = OrchestratorHarness::new(runner);

    let report = harness
        .orchestrator
        .start(independent_tasks(4), no_tags())
        .await
        .unwrap();

    assert_eq!(report.status, OrchestrationStatus::Completed);
    assert_eq!(report.metrics.failed, 1);
    assert_eq!(report.metrics.completed, 3);
    assert!(report.outcome(&TaskId::from("t1")).unwrap().is_failed());
    for id in ["t0", "t2", "t3"] {
        assert!(report.outcome(&TaskId::from(id)).unwrap().is_completed());
    }
}

/// Test: Transitive dependents are skipped
/// Given a -> b -> c where a fails
/// When the orchestration runs
/// Then b and c are skipped with a as the failed ancestor and never run
#[tokio::test]
async fn test_transitive_dependents_skipped() {
    let harness = OrchestratorHarness::new(ScriptedRunner::new().fail("a"));

    let report = harness
        .orchestrator
        .start(chain_tasks(), no_tags())
        .await
        .unwrap();

    assert_eq!(report.status, OrchestrationStatus::Completed);
    for id in ["b", "c"] {
        match report.outcome(&TaskId::from(id)).unwrap() {
            TaskOutcome::Skipped {
                reason: SkipReason::DependencyFailed { ancestor },
            } => assert_eq!(ancestor.as_str(), "a"),
            other => panic!("Expected {} skipped, got {:?}", id, other),
        }
        assert!(!harness.runner.was_called(id));
    }
    assert_eq!(harness.runner.call_order(), vec!["a"]);
}

/// Test: Only the failed branch of a diamond is cut
/// Given a -> {b, c} -> d where c fails
/// When the orchestration runs
/// Then b completes, d is skipped and nothing skipped is completed
#[tokio::test]
async fn test_diamond_branch_failure() {
    let harness = OrchestratorHarness::new(ScriptedRunner::new().fail("c"));

    let report = harness
        .orchestrator
        .start(diamond_tasks(), no_tags())
        .await
        .unwrap();

    assert!(report.outcome(&TaskId::from("a")).unwrap().is_completed());
    assert!(report.outcome(&TaskId::from("b")).unwrap().is_completed());
    assert!(report.outcome(&TaskId::from("c")).unwrap().is_failed());
    assert!(report.outcome(&TaskId::from("d")).unwrap().is_skipped());

    let validation = report.validation.unwrap();
    assert_eq!(validation.completion_rate, 0.5);
    assert!(validation
        .warnings
        .contains(&"Not all tasks completed".to_string()));
}

/// Test: Unrelated tasks keep running after a failure
/// Given a failing root with dependents plus an independent task
/// When the orchestration runs
/// Then the independent task completes and every leaf is skipped
#[tokio::test]
async fn test_unrelated_tasks_unaffected() {
    let mut tasks = fan_out_tasks(3);
    tasks.push(test_task("solo", 5));
    tasks.push(test_task("after_solo", 5).depends_on(["solo"]));
    let harness = OrchestratorHarness::new(ScriptedRunner::new().fail("root"));

    let report = harness.orchestrator.start(tasks, no_tags()).await.unwrap();

    assert_eq!(report.metrics.failed, 1);
    assert_eq!(report.metrics.skipped, 3);
    assert_eq!(report.metrics.completed, 2);
    assert!(report
        .outcome(&TaskId::from("after_solo"))
        .unwrap()
        .is_completed());
}

/// Test: Retries move to an alternate worker
/// Given max_attempts = 2 and every call on w1 failing
/// When a task assigned to w1 runs
/// Then the second attempt runs on w2 and succeeds
#[tokio::test]
async fn test_retry_on_alternate_worker() {
    let config = Config {
        max_attempts: 2,
        ..Config::default()
    };
    let mut harness =
        OrchestratorHarness::with_config(ScriptedRunner::new().fail_on_worker("w1"), config);

    let report = harness
        .orchestrator
        .start(vec![test_task("job", 5)], no_tags())
        .await
        .unwrap();

    let assignment = &report.assignments[&TaskId::from("job")];
    assert_eq!(assignment.primary.as_str(), "w1");

    match report.outcome(&TaskId::from("job")).unwrap() {
        TaskOutcome::Completed {
            worker, attempts, ..
        } => {
            assert_eq!(worker.as_str(), "w2");
            assert_eq!(*attempts, 2);
        }
        other => panic!("Expected completed after retry, got {:?}", other),
    }

    let calls = harness.runner.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].worker.as_str(), "w1");
    assert_eq!(calls[1].worker.as_str(), "w2");

    let retried = harness.events().into_iter().any(|e| {
        matches!(
            e,
            ExecutionEvent::TaskFailed {
                attempt: 1,
                will_retry: true,
                ..
            }
        )
    });
    assert!(retried);

    let w1 = harness
        .orchestrator
        .registry()
        .snapshot(&"w1".into())
        .unwrap();
    assert_eq!(w1.stats.failed, 1);
    assert!(w1.stats.success_rate < 1.0);
}

/// Test: Attempts are bounded
/// Given max_attempts = 3 and a task that always fails
/// When the orchestration runs
/// Then the runner is called exactly three times and the task fails
#[tokio::test]
async fn test_attempts_exhausted() {
    let config = Config {
        max_attempts: 3,
        ..Config::default()
    };
    let harness = OrchestratorHarness::with_config(ScriptedRunner::new().fail("job"), config);

    let report = harness
        .orchestrator
        .start(vec![test_task("job", 5)], no_tags())
        .await
        .unwrap();

    match report.outcome(&TaskId::from("job")).unwrap() {
        TaskOutcome::Failed { attempts, error, .. } => {
            assert_eq!(*attempts, 3);
            assert!(error.contains("job failed"));
        }
        other => panic!("Expected failed, got {:?}", other),
    }
    assert_eq!(harness.runner.calls().len(), 3);
}
