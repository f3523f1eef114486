//! End-to-end orchestration tests.
//!
//! These tests verify that planning, assignment, execution and validation
//! work together and that the report reflects the run.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use conductor::core::GraphAnalyzer;
use conductor::orchestration::{AssignmentEngine, PhasePlanner, Strategy};
use conductor::{
    CapabilityRegistry, Config, Error, OrchestrationReport, OrchestrationStatus, Task, TaskGraph,
    TaskId, WorkerProfile,
};

use crate::fixtures::{diamond_tasks, no_tags, test_task, OrchestratorHarness, ScriptedRunner};

fn ids(list: &[&str]) -> Vec<TaskId> {
    list.iter().map(|s| TaskId::from(*s)).collect()
}

/// Test: Dependency-aware plan for a small fork
/// Given A(1ms), B(2ms, dep A), C(1ms, dep A)
/// When planned with the dependency-aware strategy
/// Then phases are [A], [B, C] with phase 2 parallel and critical path A, B
#[test]
fn test_fork_plan_and_critical_path() {
    let graph = Arc::new(
        TaskGraph::build(vec![
            test_task("A", 1),
            test_task("B", 2).depends_on(["A"]),
            test_task("C", 1).depends_on(["A"]),
        ])
        .unwrap(),
    );

    let plan = PhasePlanner::build_plan(Arc::clone(&graph), Some(Strategy::DependencyAware), 3)
        .unwrap();

    assert_eq!(plan.phases.len(), 2);
    assert_eq!(plan.phases[0].tasks, ids(&["A"]));
    assert_eq!(plan.phases[1].tasks, ids(&["B", "C"]));
    assert!(plan.phases[1].parallel);
    assert_eq!(plan.critical_path.tasks, ids(&["A", "B"]));
    assert_eq!(plan.critical_path.total_duration, Duration::from_millis(3));

    let analyzer = GraphAnalyzer::new(&graph);
    assert!(analyzer.bottlenecks(3).is_empty());
}

/// Test: Every strategy respects dependencies
/// Given the diamond task set
/// When planned with each strategy
/// Then every dependency lands in an earlier phase and every task appears once
#[test]
fn test_all_strategies_respect_dependencies() {
    let graph = Arc::new(TaskGraph::build(diamond_tasks()).unwrap());

    for strategy in [
        Strategy::DependencyAware,
        Strategy::PriorityBased,
        Strategy::Parallel,
        Strategy::Adaptive,
        Strategy::Sequential,
    ] {
        let plan = PhasePlanner::build_plan(Arc::clone(&graph), Some(strategy), 3).unwrap();
        assert_eq!(plan.task_count(), graph.len(), "{} placed every task once", strategy);

        for task in graph.tasks() {
            let phase = plan.phase_of(&task.id).unwrap();
            for dep in &task.dependencies {
                assert!(
                    plan.phase_of(dep).unwrap() < phase,
                    "{}: {} must precede {}",
                    strategy,
                    dep,
                    task.id
                );
            }
        }

        let again = PhasePlanner::build_plan(Arc::clone(&graph), Some(strategy), 3).unwrap();
        assert_eq!(plan.phases, again.phases, "{} is deterministic", strategy);
    }
}

/// Test: Primary capability drives assignment
/// Given W1 with primary "auth" and complexity range 3..9
/// When task T of type "auth" and complexity 6 is assigned
/// Then W1 scores at least 0.4 and confidence exceeds 0.4
#[test]
fn test_primary_capability_assignment() {
    let w1 = WorkerProfile::new("W1")
        .with_primary(["auth"])
        .with_complexity(3, 9, 6);
    let task = Task::new("T", "Login flow")
        .with_type("auth")
        .with_complexity(6);

    assert!(CapabilityRegistry::score(&w1, &task, &BTreeSet::new()) >= 0.4);

    let registry = Arc::new(CapabilityRegistry::with_profiles([w1]).unwrap());
    let graph = Arc::new(TaskGraph::build(vec![task]).unwrap());
    let plan = PhasePlanner::build_plan(graph, None, 3).unwrap();
    let assignments = AssignmentEngine::new(registry).assign(&plan, &BTreeSet::new()).unwrap();

    let assignment = assignments.get(&TaskId::from("T")).unwrap();
    assert_eq!(assignment.primary.as_str(), "W1");
    assert!(assignment.confidence > 0.4);
    assert!(!assignment.fallback);
}

/// Test: Full diamond run
/// Given the diamond task set and three workers
/// When the orchestration runs
/// Then it completes with every task completed and a clean report
#[tokio::test]
async fn test_diamond_orchestration_completes() {
    let mut harness = OrchestratorHarness::new(ScriptedRunner::new());

    let report = harness
        .orchestrator
        .start(diamond_tasks(), no_tags())
        .await
        .unwrap();

    assert_eq!(report.status, OrchestrationStatus::Completed);
    assert_eq!(report.metrics.completed, 4);
    assert_eq!(report.metrics.failed, 0);
    assert_eq!(report.metrics.skipped, 0);
    assert_eq!(report.plan.phases.len(), 3);
    assert_eq!(report.plan.critical_path.tasks, ids(&["a", "b", "d"]));
    assert_eq!(report.outcomes.len(), 4);
    assert!(report.outcomes.values().all(|o| o.is_completed()));
    assert!(report.assignment_confidence > 0.0);

    let validation = report.validation.as_ref().unwrap();
    assert_eq!(validation.completion_rate, 1.0);

    // d runs only after both b and c
    let order = harness.runner.call_order();
    let pos = |id: &str| order.iter().position(|t| t == id).unwrap();
    assert!(pos("a") < pos("b"));
    assert!(pos("a") < pos("c"));
    assert!(pos("b") < pos("d"));
    assert!(pos("c") < pos("d"));

    assert!(!harness.events().is_empty());
}

/// Test: Structural errors return synchronously
/// Given task sets with a cycle, a dangling dependency and a self-dependency
/// When the orchestration starts
/// Then an error is returned and the runner is never called
#[tokio::test]
async fn test_structural_errors_abort_before_execution() {
    let harness = OrchestratorHarness::new(ScriptedRunner::new());

    let cycle = vec![
        test_task("a", 1).depends_on(["c"]),
        test_task("b", 1).depends_on(["a"]),
        test_task("c", 1).depends_on(["b"]),
    ];
    match harness.orchestrator.start(cycle, no_tags()).await {
        Err(Error::CycleDetected { cycle, .. }) => {
            assert_eq!(cycle.first(), cycle.last());
            assert_eq!(cycle.len(), 4);
        }
        other => panic!("Expected CycleDetected, got {:?}", other),
    }

    let dangling = vec![test_task("a", 1).depends_on(["ghost"])];
    assert!(matches!(
        harness.orchestrator.start(dangling, no_tags()).await,
        Err(Error::DanglingDependency { .. })
    ));

    let selfish = vec![test_task("a", 1).depends_on(["a"])];
    assert!(matches!(
        harness.orchestrator.start(selfish, no_tags()).await,
        Err(Error::SelfDependency(_))
    ));

    assert!(harness.runner.calls().is_empty());
    assert_eq!(harness.orchestrator.stats().failed, 3);
}

/// Test: Empty task set
/// Given no tasks
/// When the orchestration runs
/// Then it completes with an empty plan and perfect rates
#[tokio::test]
async fn test_empty_orchestration() {
    let harness = OrchestratorHarness::new(ScriptedRunner::new());

    let report = harness
        .orchestrator
        .start(Vec::new(), no_tags())
        .await
        .unwrap();

    assert_eq!(report.status, OrchestrationStatus::Completed);
    assert!(report.plan.phases.is_empty());
    assert_eq!(report.assignment_confidence, 1.0);
    assert_eq!(report.metrics.parallelization_efficiency, 1.0);
}

/// Test: Bottlenecks and recommendations reach the report
/// Given a root with five dependents and a threshold of 3
/// When the orchestration runs
/// Then the root is reported as a bottleneck with a recommendation
#[tokio::test]
async fn test_bottleneck_reported() {
    let config = Config {
        bottleneck_threshold: 3,
        ..Config::default()
    };
    let harness = OrchestratorHarness::with_config(ScriptedRunner::new(), config);

    let report = harness
        .orchestrator
        .start(crate::fixtures::fan_out_tasks(5), no_tags())
        .await
        .unwrap();

    assert_eq!(report.plan.bottlenecks.len(), 1);
    assert_eq!(report.plan.bottlenecks[0].task_id, TaskId::from("root"));
    assert_eq!(report.plan.bottlenecks[0].dependent_count, 5);
    assert_eq!(
        report.plan.recommendations[0].description,
        "Reduce dependencies on task root"
    );
}

/// Test: Report round-trips through JSON
/// Given a completed orchestration
/// When the report is serialized and parsed back
/// Then identity, plan, assignments and outcome kinds survive
#[tokio::test]
async fn test_report_json_is_stable() {
    let harness = OrchestratorHarness::new(ScriptedRunner::new());
    let report = harness
        .orchestrator
        .start(diamond_tasks(), no_tags())
        .await
        .unwrap();

    let json = report.to_json().unwrap();
    assert!(json.contains("\"status\": \"completed\""));
    assert!(json.contains("\"strategy\""));

    let back = OrchestrationReport::from_json(&json).unwrap();
    assert_eq!(back.id, report.id);
    assert_eq!(back.status, report.status);
    assert_eq!(back.plan, report.plan);
    assert_eq!(back.assignments, report.assignments);
    assert_eq!(back.history, report.history);
    assert_eq!(
        back.outcomes.keys().collect::<Vec<_>>(),
        report.outcomes.keys().collect::<Vec<_>>()
    );
    assert!(back.outcomes.values().all(|o| o.is_completed()));
}

/// Test: Context tags steer assignment
/// Given a web-only worker with secondary "ui" and a designated generalist
/// When a UI task runs with and without the "web" context tag
/// Then the web worker wins only when the tag is present
#[tokio::test]
async fn test_context_tags_affect_assignment() {
    use conductor::orchestration::DomainSupport;

    let config = Config {
        generalist: Some("generalist".into()),
        workers: vec![
            WorkerProfile::new("frontend")
                .with_secondary(["ui"])
                .with_domains(DomainSupport::from_tags(["web"]))
                .with_complexity(8, 10, 9),
            WorkerProfile::new("generalist")
                .with_domains(DomainSupport::from_tags(["mainframe"]))
                .with_complexity(9, 10, 10)
                .as_generalist(),
        ],
        ..Config::default()
    };
    let harness = OrchestratorHarness::with_config(ScriptedRunner::new(), config);
    let task = || vec![Task::new("page", "Page").with_type("ui").with_complexity(2)];

    let web: BTreeSet<String> = ["web".to_string()].into_iter().collect();
    let with_tag = harness.orchestrator.start(task(), web).await.unwrap();
    let assignment = &with_tag.assignments[&TaskId::from("page")];
    assert_eq!(assignment.primary.as_str(), "frontend");
    assert!(!assignment.fallback);

    let without = harness.orchestrator.start(task(), no_tags()).await.unwrap();
    let assignment = &without.assignments[&TaskId::from("page")];
    assert_eq!(assignment.primary.as_str(), "generalist");
    assert!(assignment.fallback);
    assert_eq!(assignment.confidence, 0.5);
}
