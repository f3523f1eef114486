//! Phase planner for partitioning a task graph into execution phases.
//!
//! The planner picks a [`Strategy`] from the shape of the graph (or takes
//! one forced by the caller) and cuts the graph into ordered [`Phase`]s.
//! Every strategy keeps the same guarantee: a task's dependencies always
//! sit in strictly earlier phases.

use crate::core::{
    Bottleneck, CriticalPath, GraphAnalyzer, Recommendation, Task, TaskGraph, TaskId,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Dependency edges per task above which planning is dependency-driven.
const DEPENDENCY_DENSITY_THRESHOLD: f64 = 0.7;
/// Average complexity at or above which planning is priority-driven.
const HIGH_AVERAGE_COMPLEXITY: f64 = 7.0;
/// Task count at or above which planning favours wide parallel phases.
const LARGE_TASK_COUNT: usize = 10;

/// Rule set used to form phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Layer by dependency depth, each layer parallel.
    DependencyAware,
    /// Priority-ordered, run sequentially.
    PriorityBased,
    /// As wide as the dependencies allow, each phase parallel.
    Parallel,
    /// Dependency layering with the parallel flag recomputed per phase.
    Adaptive,
    /// One task per phase. Never selected automatically.
    Sequential,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Strategy::DependencyAware => "dependency-aware",
            Strategy::PriorityBased => "priority-based",
            Strategy::Parallel => "parallel",
            Strategy::Adaptive => "adaptive",
            Strategy::Sequential => "sequential",
        };
        write!(f, "{}", name)
    }
}

/// A batch of tasks whose dependencies all settle in earlier phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// Zero-based position in the plan.
    pub index: usize,
    /// Member tasks, in execution order when not parallel.
    pub tasks: Vec<TaskId>,
    /// Whether members may run concurrently.
    pub parallel: bool,
    /// Max of member durations if parallel, sum otherwise.
    #[serde(rename = "estimated_duration_ms", with = "crate::util::duration_ms")]
    pub estimated_duration: Duration,
}

impl Phase {
    fn new(index: usize, tasks: Vec<TaskId>, parallel: bool, graph: &TaskGraph) -> Self {
        let durations = tasks
            .iter()
            .filter_map(|id| graph.get(id))
            .map(|t| t.estimated_duration);
        let estimated_duration = if parallel {
            durations.max().unwrap_or_default()
        } else {
            durations.sum()
        };
        Self {
            index,
            tasks,
            parallel,
            estimated_duration,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// The planner's full output for one orchestration.
#[derive(Debug, Clone)]
pub struct OrchestrationPlan {
    pub strategy: Strategy,
    pub phases: Vec<Phase>,
    /// Source graph, shared read-only with the executor.
    pub graph: Arc<TaskGraph>,
    pub critical_path: CriticalPath,
    pub bottlenecks: Vec<Bottleneck>,
    pub recommendations: Vec<Recommendation>,
    /// Sum of phase estimates.
    pub estimated_duration: Duration,
    /// Number of phases flagged parallel.
    pub parallel_phase_count: usize,
}

impl OrchestrationPlan {
    /// Index of the phase holding `id`.
    pub fn phase_of(&self, id: &TaskId) -> Option<usize> {
        self.phases
            .iter()
            .find(|phase| phase.tasks.contains(id))
            .map(|phase| phase.index)
    }

    /// Number of tasks placed across all phases.
    pub fn task_count(&self) -> usize {
        self.phases.iter().map(Phase::len).sum()
    }

    /// Every placed task id, phase by phase.
    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.phases.iter().flat_map(|phase| phase.tasks.iter())
    }
}

/// Partitions a [`TaskGraph`] into phases.
pub struct PhasePlanner<'a> {
    graph: &'a TaskGraph,
}

impl<'a> PhasePlanner<'a> {
    pub fn new(graph: &'a TaskGraph) -> Self {
        Self { graph }
    }

    /// Pick a strategy from the graph's shape.
    ///
    /// Rules are checked in order: dependency density above 0.7 edges per
    /// task, then average complexity of at least 7, then at least 10 tasks.
    /// Anything else, including an empty graph, is adaptive.
    pub fn select_strategy(&self) -> Strategy {
        let count = self.graph.len();
        if count == 0 {
            return Strategy::Adaptive;
        }

        let density = self.graph.dependency_count() as f64 / count as f64;
        let average_complexity = self
            .graph
            .tasks()
            .map(|t| f64::from(t.complexity))
            .sum::<f64>()
            / count as f64;

        let strategy = if density > DEPENDENCY_DENSITY_THRESHOLD {
            Strategy::DependencyAware
        } else if average_complexity >= HIGH_AVERAGE_COMPLEXITY {
            Strategy::PriorityBased
        } else if count >= LARGE_TASK_COUNT {
            Strategy::Parallel
        } else {
            Strategy::Adaptive
        };

        debug!(
            tasks = count,
            density,
            average_complexity,
            %strategy,
            "strategy selected"
        );
        strategy
    }

    /// Cut the graph into phases using `strategy`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Planning` naming the tasks that could not be placed
    /// if the graph is structurally inconsistent.
    pub fn plan(&self, strategy: Strategy) -> Result<Vec<Phase>> {
        if self.graph.is_empty() {
            return Ok(Vec::new());
        }

        let unlayered = self.graph.dependency_count() == 0;
        let phases = match strategy {
            Strategy::Sequential => self
                .graph
                .topological_order()
                .into_iter()
                .enumerate()
                .map(|(index, id)| Phase::new(index, vec![id.clone()], false, self.graph))
                .collect(),
            Strategy::PriorityBased if unlayered => {
                let all: Vec<TaskId> = self.graph.tasks().map(|t| t.id.clone()).collect();
                vec![Phase::new(0, self.by_priority(all), false, self.graph)]
            }
            Strategy::Parallel if unlayered => {
                let all = self.graph.tasks().map(|t| t.id.clone()).collect();
                vec![Phase::new(0, all, true, self.graph)]
            }
            Strategy::PriorityBased => self
                .layers()?
                .into_iter()
                .enumerate()
                .map(|(index, layer)| Phase::new(index, self.by_priority(layer), false, self.graph))
                .collect(),
            Strategy::DependencyAware | Strategy::Parallel => self
                .layers()?
                .into_iter()
                .enumerate()
                .map(|(index, layer)| Phase::new(index, layer, true, self.graph))
                .collect(),
            Strategy::Adaptive => self
                .layers()?
                .into_iter()
                .enumerate()
                .map(|(index, layer)| {
                    let parallel = adaptive_parallel(self.graph, &layer);
                    Phase::new(index, layer, parallel, self.graph)
                })
                .collect::<Vec<_>>(),
        };

        for phase in &phases {
            debug!(
                phase = phase.index,
                tasks = phase.len(),
                parallel = phase.parallel,
                "phase created"
            );
        }
        Ok(phases)
    }

    /// Plan the graph and attach the structural analysis.
    ///
    /// Uses `forced` when given, otherwise [`select_strategy`](Self::select_strategy).
    pub fn build_plan(
        graph: Arc<TaskGraph>,
        forced: Option<Strategy>,
        bottleneck_threshold: usize,
    ) -> Result<OrchestrationPlan> {
        let planner = PhasePlanner::new(&graph);
        let strategy = forced.unwrap_or_else(|| planner.select_strategy());
        let phases = planner.plan(strategy)?;

        let analyzer = GraphAnalyzer::new(&graph);
        let critical_path = analyzer.critical_path(|t| t.estimated_duration);
        let bottlenecks = analyzer.bottlenecks(bottleneck_threshold);
        let recommendations = GraphAnalyzer::recommendations(&bottlenecks);

        let estimated_duration = phases.iter().map(|p| p.estimated_duration).sum();
        let parallel_phase_count = phases.iter().filter(|p| p.parallel).count();

        info!(
            %strategy,
            phases = phases.len(),
            critical_path_ms = critical_path.total_duration.as_millis() as u64,
            bottlenecks = bottlenecks.len(),
            "orchestration plan built"
        );

        Ok(OrchestrationPlan {
            strategy,
            phases,
            graph: Arc::clone(&graph),
            critical_path,
            bottlenecks,
            recommendations,
            estimated_duration,
            parallel_phase_count,
        })
    }

    /// Group tasks by dependency depth.
    ///
    /// Each pass collects every unplaced task whose dependencies were all
    /// placed by earlier passes, in declared order.
    fn layers(&self) -> Result<Vec<Vec<TaskId>>> {
        let mut placed: HashSet<TaskId> = HashSet::with_capacity(self.graph.len());
        let mut remaining: Vec<&Task> = self.graph.tasks().collect();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&Task>, Vec<&Task>) = remaining
                .into_iter()
                .partition(|t| self.graph.is_ready(&t.id, &placed));

            if ready.is_empty() {
                let mut stuck: Vec<TaskId> = blocked.iter().map(|t| t.id.clone()).collect();
                stuck.sort();
                return Err(Error::Planning { stuck });
            }

            let layer: Vec<TaskId> = ready.iter().map(|t| t.id.clone()).collect();
            placed.extend(layer.iter().cloned());
            layers.push(layer);
            remaining = blocked;
        }

        Ok(layers)
    }

    /// Highest priority first; equal priorities keep declared order.
    fn by_priority(&self, mut ids: Vec<TaskId>) -> Vec<TaskId> {
        let rank: HashMap<&TaskId, (std::cmp::Reverse<_>, usize)> = self
            .graph
            .tasks()
            .enumerate()
            .map(|(position, t)| (&t.id, (std::cmp::Reverse(t.priority), position)))
            .collect();
        ids.sort_by_key(|id| rank.get(id).copied());
        ids
    }
}

/// Parallel flag for an adaptive phase.
///
/// Demoted only when the phase has several members and every one of them
/// depends on another member.
fn adaptive_parallel(graph: &TaskGraph, members: &[TaskId]) -> bool {
    if members.len() < 2 {
        return true;
    }
    let in_phase: HashSet<&TaskId> = members.iter().collect();
    let all_chained = members.iter().all(|id| {
        graph
            .dependencies_of(id)
            .into_iter()
            .any(|dep| in_phase.contains(dep))
    });
    !all_chained
}
