//! Structural analysis over a validated [`TaskGraph`].
//!
//! Computes the duration-weighted critical path and flags tasks that too
//! many others depend on.

use crate::core::graph::TaskGraph;
use crate::core::task::{Priority, Task, TaskId};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Default dependent count above which a task is reported as a bottleneck.
pub const DEFAULT_BOTTLENECK_THRESHOLD: usize = 3;

/// Dependent count above which a bottleneck is graded `high`.
const HIGH_BOTTLENECK_DEPENDENTS: usize = 5;

/// The longest duration-weighted chain of dependent tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalPath {
    /// Task ids from the first task of the chain to the last.
    pub tasks: Vec<TaskId>,
    #[serde(rename = "total_duration_ms", with = "crate::util::duration_ms")]
    pub total_duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BottleneckSeverity {
    Medium,
    High,
}

/// A task with more dependents than the configured threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub task_id: TaskId,
    pub dependent_count: usize,
    pub severity: BottleneckSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendationKind {
    BottleneckResolution,
}

/// An actionable suggestion derived from graph analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub priority: Priority,
    pub task_id: TaskId,
    pub description: String,
}

/// Ranking key for the best path ending at a node.
///
/// Longer duration wins, then more tasks, then the smaller starting id.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PathKey {
    duration: Duration,
    length: usize,
    start: Reverse<TaskId>,
}

impl Ord for PathKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.duration
            .cmp(&other.duration)
            .then(self.length.cmp(&other.length))
            .then_with(|| self.start.cmp(&other.start))
    }
}

impl PartialOrd for PathKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Read-only analyzer borrowing a task graph.
pub struct GraphAnalyzer<'a> {
    graph: &'a TaskGraph,
}

impl<'a> GraphAnalyzer<'a> {
    pub fn new(graph: &'a TaskGraph) -> Self {
        Self { graph }
    }

    /// Longest duration-weighted path through the graph.
    ///
    /// Walks tasks in topological order keeping, for each task, the best
    /// path that ends there and the predecessor it extends. The longest
    /// path always ends at a sink, so only sinks compete for the result.
    /// The memo table replaces recursion so very deep graphs are safe. An
    /// empty graph yields an empty path.
    pub fn critical_path<F>(&self, duration_of: F) -> CriticalPath
    where
        F: Fn(&Task) -> Duration,
    {
        let mut best: HashMap<&TaskId, (PathKey, Option<&TaskId>)> =
            HashMap::with_capacity(self.graph.len());
        let sinks: HashSet<&TaskId> = self.graph.sinks().into_iter().collect();
        let mut winner: Option<(&TaskId, PathKey)> = None;

        for id in self.graph.topological_order() {
            let Some(task) = self.graph.get(id) else {
                continue;
            };
            let own = duration_of(task);

            let mut chosen: Option<(&TaskId, &PathKey)> = None;
            for dep in &task.dependencies {
                if let Some((key, _)) = best.get(dep) {
                    if chosen.map_or(true, |(_, current)| key > current) {
                        chosen = Some((dep, key));
                    }
                }
            }

            let entry = match chosen {
                Some((dep, key)) => (
                    PathKey {
                        duration: key.duration + own,
                        length: key.length + 1,
                        start: key.start.clone(),
                    },
                    Some(dep),
                ),
                None => (
                    PathKey {
                        duration: own,
                        length: 1,
                        start: Reverse(id.clone()),
                    },
                    None,
                ),
            };

            let is_sink = sinks.contains(id);
            if is_sink && winner.as_ref().map_or(true, |(_, key)| entry.0 > *key) {
                winner = Some((id, entry.0.clone()));
            }
            best.insert(id, entry);
        }

        let Some((end, key)) = winner else {
            return CriticalPath::default();
        };

        let mut tasks = vec![end.clone()];
        let mut cursor = best.get(end).and_then(|(_, pred)| *pred);
        while let Some(id) = cursor {
            tasks.push(id.clone());
            cursor = best.get(id).and_then(|(_, pred)| *pred);
        }
        tasks.reverse();

        CriticalPath {
            tasks,
            total_duration: key.duration,
        }
    }

    /// Tasks whose dependent count exceeds `threshold`.
    ///
    /// Sorted by dependent count descending, ties by id ascending.
    pub fn bottlenecks(&self, threshold: usize) -> Vec<Bottleneck> {
        let mut found: Vec<Bottleneck> = self
            .graph
            .tasks()
            .filter_map(|task| {
                let dependent_count = self.graph.dependent_count(&task.id);
                (dependent_count > threshold).then(|| Bottleneck {
                    task_id: task.id.clone(),
                    dependent_count,
                    severity: if dependent_count > HIGH_BOTTLENECK_DEPENDENTS {
                        BottleneckSeverity::High
                    } else {
                        BottleneckSeverity::Medium
                    },
                })
            })
            .collect();

        found.sort_by(|a, b| {
            b.dependent_count
                .cmp(&a.dependent_count)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        found
    }

    /// One recommendation per bottleneck, in bottleneck order.
    pub fn recommendations(bottlenecks: &[Bottleneck]) -> Vec<Recommendation> {
        bottlenecks
            .iter()
            .map(|b| Recommendation {
                kind: RecommendationKind::BottleneckResolution,
                priority: match b.severity {
                    BottleneckSeverity::High => Priority::High,
                    BottleneckSeverity::Medium => Priority::Medium,
                },
                task_id: b.task_id.clone(),
                description: format!("Reduce dependencies on task {}", b.task_id),
            })
            .collect()
    }
}
