//! Worker assignment for every task in a plan.

use super::planner::OrchestrationPlan;
use super::registry::{BestMatch, CapabilityRegistry, WorkerId, MATCH_THRESHOLD};
use crate::core::{Task, TaskId};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// The worker chosen for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub task_id: TaskId,
    pub primary: WorkerId,
    /// Ranked fallbacks for retries, best first.
    pub alternates: Vec<WorkerId>,
    /// Match score clamped to [0, 1].
    pub confidence: f64,
    pub justification: String,
    /// True when the generalist was used because nothing matched.
    #[serde(default)]
    pub fallback: bool,
}

impl Assignment {
    /// Worker for a given attempt number, starting at 1.
    ///
    /// Attempt 1 uses the primary; attempt `n` uses alternate `n - 1`
    /// while alternates last, then the primary again.
    pub fn worker_for_attempt(&self, attempt: u32) -> &WorkerId {
        if attempt <= 1 {
            return &self.primary;
        }
        self.alternates
            .get(attempt as usize - 2)
            .unwrap_or(&self.primary)
    }
}

/// Assignments for a whole plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentSet {
    pub assignments: BTreeMap<TaskId, Assignment>,
    /// Mean of per-task confidences; 1.0 for an empty plan.
    pub confidence: f64,
}

impl AssignmentSet {
    fn from_assignments(assignments: BTreeMap<TaskId, Assignment>) -> Self {
        let confidence = if assignments.is_empty() {
            1.0
        } else {
            assignments.values().map(|a| a.confidence).sum::<f64>() / assignments.len() as f64
        };
        Self {
            assignments,
            confidence,
        }
    }

    pub fn get(&self, id: &TaskId) -> Option<&Assignment> {
        self.assignments.get(id)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Number of tasks that fell back to the generalist.
    pub fn fallback_count(&self) -> usize {
        self.assignments.values().filter(|a| a.fallback).count()
    }
}

/// Assigns workers to planned tasks from a shared registry.
pub struct AssignmentEngine {
    registry: Arc<CapabilityRegistry>,
}

impl AssignmentEngine {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    /// Pick a primary worker and alternates for every task in `plan`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoEligibleWorker` for the first task nothing can
    /// take.
    pub fn assign(
        &self,
        plan: &OrchestrationPlan,
        context_tags: &BTreeSet<String>,
    ) -> Result<AssignmentSet> {
        let mut assignments = BTreeMap::new();

        for task in plan.task_ids().filter_map(|id| plan.graph.get(id)) {
            let best = self.registry.best_match(task, context_tags)?;
            let assignment = Self::to_assignment(task, best);
            debug!(
                task = %assignment.task_id,
                worker = %assignment.primary,
                confidence = assignment.confidence,
                alternates = assignment.alternates.len(),
                fallback = assignment.fallback,
                "task assigned"
            );
            assignments.insert(assignment.task_id.clone(), assignment);
        }

        let set = AssignmentSet::from_assignments(assignments);
        info!(
            tasks = set.len(),
            confidence = set.confidence,
            fallbacks = set.fallback_count(),
            "assignment complete"
        );
        Ok(set)
    }

    fn to_assignment(task: &Task, best: BestMatch) -> Assignment {
        let confidence = best.score.clamp(0.0, 1.0);
        let justification = if best.fallback {
            format!(
                "No worker scored above {} for {} task; assigned generalist {}",
                MATCH_THRESHOLD, task.task_type, best.primary
            )
        } else if best.matched.is_empty() {
            format!(
                "{} fits {} task by domain and complexity (score {:.2})",
                best.primary, task.task_type, best.score
            )
        } else {
            format!(
                "{} matched {} task on [{}] (score {:.2})",
                best.primary,
                task.task_type,
                best.matched.join(", "),
                best.score
            )
        };

        Assignment {
            task_id: task.id.clone(),
            primary: best.primary,
            alternates: best.alternates,
            confidence,
            justification,
            fallback: best.fallback,
        }
    }
}
