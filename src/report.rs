//! Serializable results of one orchestration.
//!
//! An [`OrchestrationReport`] is what callers get back from
//! `Orchestrator::start` once a run gets past planning and assignment:
//! the plan summary, every task outcome, the assignments, aggregate
//! metrics and the validation pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::{Bottleneck, CriticalPath, Recommendation, TaskGraph, TaskId};
use crate::error::Result;
use crate::orchestration::{
    Assignment, AssignmentSet, OrchestrationPlan, Phase, PhaseResult, PlanResult, Strategy,
    TaskOutcome,
};
use crate::workflow::{
    OrchestrationId, OrchestrationState, OrchestrationStatus, StatusHistoryEntry,
};

/// Complexity at or above which a task is listed as high complexity.
pub const HIGH_COMPLEXITY: u8 = 8;

/// Warning emitted when some task did not complete.
pub const INCOMPLETE_WARNING: &str = "Not all tasks completed";
/// Warning emitted when efficiency falls below the quality threshold.
pub const LOW_EFFICIENCY_WARNING: &str = "Low parallelization efficiency";

/// The planner's output, without the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub strategy: Strategy,
    pub phases: Vec<Phase>,
    pub critical_path: CriticalPath,
    pub bottlenecks: Vec<Bottleneck>,
    pub recommendations: Vec<Recommendation>,
    #[serde(rename = "estimated_duration_ms", with = "crate::util::duration_ms")]
    pub estimated_duration: Duration,
    pub parallel_phase_count: usize,
}

impl From<&OrchestrationPlan> for PlanSummary {
    fn from(plan: &OrchestrationPlan) -> Self {
        Self {
            strategy: plan.strategy,
            phases: plan.phases.clone(),
            critical_path: plan.critical_path.clone(),
            bottlenecks: plan.bottlenecks.clone(),
            recommendations: plan.recommendations.clone(),
            estimated_duration: plan.estimated_duration,
            parallel_phase_count: plan.parallel_phase_count,
        }
    }
}

/// Aggregate counts and timings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Wall-clock time spent executing phases.
    #[serde(rename = "total_duration_ms", with = "crate::util::duration_ms")]
    pub total_duration: Duration,
    /// Sum of measured durations of attempted tasks.
    #[serde(rename = "attempted_duration_ms", with = "crate::util::duration_ms")]
    pub attempted_duration: Duration,
    pub parallelization_efficiency: f64,
    pub peak_concurrency: usize,
}

impl Metrics {
    pub fn from_result(result: &PlanResult) -> Self {
        Self {
            completed: result.completed_count(),
            failed: result.failed_count(),
            skipped: result.skipped_count(),
            total_duration: result.elapsed,
            attempted_duration: result.attempted_duration(),
            parallelization_efficiency: result.parallelization_efficiency(),
            peak_concurrency: result.peak_concurrency,
        }
    }
}

/// Quality check run after execution.
///
/// Never fails a run; shortfalls become `warnings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Completed tasks over all tasks; 1.0 for an empty graph.
    pub completion_rate: f64,
    pub parallelization_efficiency: f64,
    /// Mean task complexity; 0.0 for an empty graph.
    pub average_complexity: f64,
    /// Tasks at or above [`HIGH_COMPLEXITY`], in declared order.
    pub high_complexity_tasks: Vec<TaskId>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Grade `result` against the graph it ran.
    ///
    /// # Arguments
    ///
    /// * `graph` - The validated task graph
    /// * `result` - Outcome of the plan, possibly partial after a timeout
    /// * `quality_threshold` - Efficiency below which a warning is added
    pub fn evaluate(graph: &TaskGraph, result: &PlanResult, quality_threshold: f64) -> Self {
        let total = graph.len();
        let completion_rate = if total == 0 {
            1.0
        } else {
            result.completed_count() as f64 / total as f64
        };
        let average_complexity = if total == 0 {
            0.0
        } else {
            graph.tasks().map(|t| f64::from(t.complexity)).sum::<f64>() / total as f64
        };
        let high_complexity_tasks = graph
            .tasks()
            .filter(|t| t.complexity >= HIGH_COMPLEXITY)
            .map(|t| t.id.clone())
            .collect();
        let parallelization_efficiency = result.parallelization_efficiency();

        let mut warnings = Vec::new();
        if completion_rate < 1.0 {
            warnings.push(INCOMPLETE_WARNING.to_string());
        }
        if parallelization_efficiency < quality_threshold {
            warnings.push(LOW_EFFICIENCY_WARNING.to_string());
        }

        Self {
            completion_rate,
            parallelization_efficiency,
            average_complexity,
            high_complexity_tasks,
            warnings,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Everything known about one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationReport {
    pub id: OrchestrationId,
    pub status: OrchestrationStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Why the run failed, when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub plan: PlanSummary,
    pub phases: Vec<PhaseResult>,
    pub outcomes: BTreeMap<TaskId, TaskOutcome>,
    pub assignments: BTreeMap<TaskId, Assignment>,
    /// Mean assignment confidence.
    pub assignment_confidence: f64,
    pub metrics: Metrics,
    /// Absent when the run never reached execution results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    pub history: Vec<StatusHistoryEntry>,
}

impl OrchestrationReport {
    pub(crate) fn new(
        id: OrchestrationId,
        plan: &OrchestrationPlan,
        assignments: &AssignmentSet,
    ) -> Self {
        Self {
            id,
            status: OrchestrationStatus::Initializing,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
            plan: PlanSummary::from(plan),
            phases: Vec::new(),
            outcomes: BTreeMap::new(),
            assignments: assignments.assignments.clone(),
            assignment_confidence: assignments.confidence,
            metrics: Metrics::default(),
            validation: None,
            history: Vec::new(),
        }
    }

    /// Copy the lifecycle of `state` into the report.
    pub(crate) fn close(&mut self, state: &OrchestrationState) {
        self.status = state.status();
        self.started_at = state.started_at();
        self.ended_at = state.ended_at();
        self.history = state.history().to_vec();
    }

    /// Fold a plan result into the report.
    pub(crate) fn record_result(&mut self, result: PlanResult) {
        self.metrics = Metrics::from_result(&result);
        self.phases = result.phases;
        self.outcomes = result.outcomes;
    }

    pub fn is_completed(&self) -> bool {
        self.status == OrchestrationStatus::Completed
    }

    pub fn outcome(&self, id: &TaskId) -> Option<&TaskOutcome> {
        self.outcomes.get(id)
    }

    /// Wall-clock time from start to terminal status.
    pub fn duration(&self) -> Option<Duration> {
        self.ended_at
            .and_then(|end| (end - self.started_at).to_std().ok())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}
