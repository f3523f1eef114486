//! Parallel execution correctness tests.
//!
//! These tests verify that phases run with bounded concurrency and that
//! phases never overlap.

use std::time::Duration;

use conductor::orchestration::{ExecutionEvent, Strategy};
use conductor::{Config, OrchestrationStatus};

use crate::fixtures::{
    chain_tasks, fan_out_tasks, independent_tasks, no_tags, OrchestratorHarness, ScriptedRunner,
};

/// Test: Concurrency is bounded
/// Given max_concurrency = 2 and a parallel phase of 5 tasks
/// When the orchestration runs
/// Then no more than 2 runner calls are in flight at once
#[tokio::test]
async fn test_max_concurrency_bounds_in_flight() {
    let config = Config {
        max_concurrency: 2,
        ..Config::default()
    };
    let harness = OrchestratorHarness::with_config(
        ScriptedRunner::new().default_delay(Duration::from_millis(40)),
        config,
    );

    let report = harness
        .orchestrator
        .start_with_strategy(independent_tasks(5), no_tags(), Some(Strategy::Parallel))
        .await
        .unwrap();

    assert_eq!(report.status, OrchestrationStatus::Completed);
    assert_eq!(report.plan.phases.len(), 1);
    assert!(report.plan.phases[0].parallel);
    assert_eq!(report.metrics.completed, 5);
    assert!(harness.runner.peak() <= 2, "peak was {}", harness.runner.peak());
    assert!(report.metrics.peak_concurrency <= 2);
}

/// Test: Parallel phases actually overlap
/// Given 4 independent tasks of 50ms and room for all of them
/// When they run in one parallel phase
/// Then more than one call is in flight and the run beats sequential time
#[tokio::test]
async fn test_parallel_phase_runs_concurrently() {
    let harness = OrchestratorHarness::new(
        ScriptedRunner::new().default_delay(Duration::from_millis(50)),
    );

    let report = harness
        .orchestrator
        .start_with_strategy(independent_tasks(4), no_tags(), Some(Strategy::Parallel))
        .await
        .unwrap();

    assert_eq!(report.metrics.completed, 4);
    assert!(harness.runner.peak() > 1);
    assert!(report.metrics.total_duration < Duration::from_millis(200));
}

/// Test: Sequential strategy runs one task at a time
/// Given 3 independent tasks
/// When forced onto the sequential strategy
/// Then one task is in flight at a time, in declared order
#[tokio::test]
async fn test_sequential_strategy_serializes() {
    let harness = OrchestratorHarness::new(ScriptedRunner::new());

    let report = harness
        .orchestrator
        .start_with_strategy(independent_tasks(3), no_tags(), Some(Strategy::Sequential))
        .await
        .unwrap();

    assert_eq!(report.plan.phases.len(), 3);
    assert_eq!(harness.runner.peak(), 1);
    assert_eq!(harness.runner.call_order(), vec!["t0", "t1", "t2"]);
}

/// Test: Chain runs strictly in order
/// Given a -> b -> c
/// When the orchestration runs
/// Then calls happen in dependency order with no overlap
#[tokio::test]
async fn test_chain_runs_in_order() {
    let harness = OrchestratorHarness::new(ScriptedRunner::new());

    let report = harness
        .orchestrator
        .start(chain_tasks(), no_tags())
        .await
        .unwrap();

    assert_eq!(report.metrics.completed, 3);
    assert_eq!(harness.runner.call_order(), vec!["a", "b", "c"]);
    assert_eq!(harness.runner.peak(), 1);
}

/// Test: Phase events bracket task events
/// Given a root with three dependents
/// When the orchestration runs
/// Then every phase's tasks start after its PhaseStarted and finish before its PhaseCompleted
#[tokio::test]
async fn test_phase_events_are_ordered() {
    let mut harness = OrchestratorHarness::new(ScriptedRunner::new());

    harness
        .orchestrator
        .start(fan_out_tasks(3), no_tags())
        .await
        .unwrap();

    let events = harness.events();
    let mut current_phase: Option<usize> = None;
    let mut phases_seen = Vec::new();
    let mut completed_tasks = 0;

    for event in &events {
        match event {
            ExecutionEvent::PhaseStarted { phase, .. } => {
                assert!(current_phase.is_none(), "phases must not overlap");
                current_phase = Some(*phase);
                phases_seen.push(*phase);
            }
            ExecutionEvent::PhaseCompleted { phase, completed, .. } => {
                assert_eq!(current_phase, Some(*phase));
                completed_tasks += completed;
                current_phase = None;
            }
            ExecutionEvent::TaskStarted { .. } | ExecutionEvent::TaskCompleted { .. } => {
                assert!(current_phase.is_some(), "task event outside a phase");
            }
            _ => {}
        }
    }

    assert_eq!(phases_seen, vec![0, 1]);
    assert_eq!(completed_tasks, 4);
}

/// Test: Worker load is released after a run
/// Given a completed orchestration
/// When the registry is inspected
/// Then no worker has tasks assigned and stats recorded every attempt
#[tokio::test]
async fn test_worker_stats_after_run() {
    let harness = OrchestratorHarness::new(ScriptedRunner::new());

    harness
        .orchestrator
        .start(independent_tasks(4), no_tags())
        .await
        .unwrap();

    let registry = harness.orchestrator.registry();
    let mut attempts = 0;
    for id in registry.worker_ids() {
        let snapshot = registry.snapshot(&id).unwrap();
        assert_eq!(snapshot.assigned, 0);
        assert_eq!(snapshot.stats.failed, 0);
        attempts += snapshot.stats.attempts;
    }
    assert_eq!(attempts, 4);
}
