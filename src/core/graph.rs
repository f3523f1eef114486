//! Task dependency graph.
//!
//! `TaskGraph` owns the tasks of one orchestration and the dependency edges
//! between them. It is built once from a flat task list, validated, and
//! treated as immutable afterwards, so concurrent phase workers can read it
//! without locking.

use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use tracing::{debug, warn};

/// How serious a detected dependency cycle is.
///
/// Derived from the number of distinct tasks in the cycle and their summed
/// complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleSeverity {
    Low,
    Medium,
    High,
}

impl CycleSeverity {
    /// Grade a cycle from its distinct task count and summed complexity.
    pub fn assess(task_count: usize, total_complexity: u32) -> Self {
        if total_complexity > 30 || task_count > 5 {
            CycleSeverity::High
        } else if total_complexity > 15 || task_count > 3 {
            CycleSeverity::Medium
        } else {
            CycleSeverity::Low
        }
    }
}

impl std::fmt::Display for CycleSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleSeverity::Low => write!(f, "low"),
            CycleSeverity::Medium => write!(f, "medium"),
            CycleSeverity::High => write!(f, "high"),
        }
    }
}

/// The validated task dependency graph.
///
/// Edges point from a dependency to its dependent: an edge `a -> b` means
/// `a` must settle before `b` starts. Node indices follow the declared task
/// order.
pub struct TaskGraph {
    graph: DiGraph<Task, ()>,
    task_index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    /// Build and validate a graph from a flat task list.
    ///
    /// # Errors
    /// - `InvalidTask` if a task breaks a per-task invariant
    /// - `DuplicateTask` if two tasks share an id
    /// - `SelfDependency` if a task lists itself as a dependency
    /// - `DanglingDependency` if a dependency id is not in the list
    /// - `CycleDetected` with the closed cycle if the dependencies loop
    pub fn build(tasks: Vec<Task>) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(tasks.len(), 0);
        let mut task_index = HashMap::with_capacity(tasks.len());

        for task in tasks {
            task.validate().map_err(|reason| Error::InvalidTask {
                task: task.id.clone(),
                reason,
            })?;
            if task.dependencies.contains(&task.id) {
                return Err(Error::SelfDependency(task.id.clone()));
            }
            if task_index.contains_key(&task.id) {
                return Err(Error::DuplicateTask(task.id.clone()));
            }
            let id = task.id.clone();
            let index = graph.add_node(task);
            task_index.insert(id, index);
        }

        let mut edges = Vec::new();
        for index in graph.node_indices() {
            let task = &graph[index];
            for dep in &task.dependencies {
                let dep_index =
                    task_index
                        .get(dep)
                        .copied()
                        .ok_or_else(|| Error::DanglingDependency {
                            task: task.id.clone(),
                            dependency: dep.clone(),
                        })?;
                edges.push((dep_index, index));
            }
        }
        for (from, to) in edges {
            graph.add_edge(from, to, ());
        }

        let built = Self { graph, task_index };

        if let Some(cycle) = built.find_cycle() {
            let distinct: HashSet<&TaskId> = cycle.iter().collect();
            let total_complexity = distinct
                .iter()
                .filter_map(|id| built.get(id))
                .map(|t| u32::from(t.complexity))
                .sum();
            let severity = CycleSeverity::assess(distinct.len(), total_complexity);
            warn!(?cycle, %severity, "dependency cycle detected");
            return Err(Error::CycleDetected { cycle, severity });
        }

        debug!(
            tasks = built.len(),
            dependencies = built.dependency_count(),
            "task graph built"
        );
        Ok(built)
    }

    /// Depth-first search for a back-edge along dependency edges.
    ///
    /// Uses an explicit stack so deep graphs cannot overflow the call stack.
    /// The returned cycle is closed: its first and last ids are equal and
    /// each id depends on the id that follows it.
    fn find_cycle(&self) -> Option<Vec<TaskId>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let deps: Vec<Vec<NodeIndex>> = self
            .graph
            .node_indices()
            .map(|index| self.dependency_indices(index))
            .collect();
        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];

        for root in self.graph.node_indices() {
            if marks[root.index()] != Mark::Unvisited {
                continue;
            }
            marks[root.index()] = Mark::OnStack;
            let mut stack: Vec<(NodeIndex, usize)> = vec![(root, 0)];

            while let Some(frame) = stack.last_mut() {
                let (node, cursor) = *frame;
                match deps[node.index()].get(cursor) {
                    Some(&next) => {
                        frame.1 += 1;
                        match marks[next.index()] {
                            Mark::Unvisited => {
                                marks[next.index()] = Mark::OnStack;
                                stack.push((next, 0));
                            }
                            Mark::OnStack => {
                                let start = stack.iter().position(|(n, _)| *n == next)?;
                                let mut cycle: Vec<TaskId> = stack[start..]
                                    .iter()
                                    .map(|(n, _)| self.graph[*n].id.clone())
                                    .collect();
                                cycle.push(self.graph[next].id.clone());
                                return Some(cycle);
                            }
                            Mark::Done => {}
                        }
                    }
                    None => {
                        marks[node.index()] = Mark::Done;
                        stack.pop();
                    }
                }
            }
        }

        None
    }

    /// Dependency node indices in ascending task-id order.
    fn dependency_indices(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.graph[index]
            .dependencies
            .iter()
            .filter_map(|dep| self.task_index.get(dep).copied())
            .collect()
    }

    /// Get a task by id.
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.task_index.get(id).map(|&index| &self.graph[index])
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of dependency edges.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All tasks in declared order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.graph.node_weights()
    }

    /// Ids this task depends on, ascending.
    pub fn dependencies_of(&self, id: &TaskId) -> Vec<&TaskId> {
        self.get(id)
            .map(|task| task.dependencies.iter().collect())
            .unwrap_or_default()
    }

    /// Ids that depend on this task, ascending.
    pub fn dependents_of(&self, id: &TaskId) -> Vec<&TaskId> {
        let Some(&index) = self.task_index.get(id) else {
            return Vec::new();
        };
        let mut dependents: Vec<&TaskId> = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .map(|n| &self.graph[n].id)
            .collect();
        dependents.sort();
        dependents
    }

    pub fn dependent_count(&self, id: &TaskId) -> usize {
        self.task_index
            .get(id)
            .map(|&index| {
                self.graph
                    .neighbors_directed(index, Direction::Outgoing)
                    .count()
            })
            .unwrap_or(0)
    }

    /// True iff every dependency of `id` is in `completed`.
    ///
    /// Unknown ids are never ready.
    pub fn is_ready(&self, id: &TaskId, completed: &HashSet<TaskId>) -> bool {
        self.get(id)
            .map(|task| task.dependencies.iter().all(|dep| completed.contains(dep)))
            .unwrap_or(false)
    }

    /// Every task reachable through dependent edges, excluding `id` itself.
    pub fn transitive_dependents(&self, id: &TaskId) -> BTreeSet<TaskId> {
        let Some(&start) = self.task_index.get(id) else {
            return BTreeSet::new();
        };
        let mut reached = BTreeSet::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(index) = dfs.next(&self.graph) {
            if index != start {
                reached.insert(self.graph[index].id.clone());
            }
        }
        reached
    }

    /// Tasks in dependency order.
    ///
    /// Among tasks whose dependencies are satisfied, the one declared first
    /// comes first, so the order is stable across runs.
    pub fn topological_order(&self) -> Vec<&TaskId> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|index| {
                self.graph
                    .neighbors_directed(index, Direction::Incoming)
                    .count()
            })
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(i)) = ready.pop() {
            let index = NodeIndex::new(i);
            order.push(&self.graph[index].id);
            for next in self.graph.neighbors_directed(index, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse(next.index()));
                }
            }
        }
        order
    }

    /// Tasks nothing depends on.
    pub fn sinks(&self) -> Vec<&TaskId> {
        self.tasks()
            .filter(|t| self.dependent_count(&t.id) == 0)
            .map(|t| &t.id)
            .collect()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.len())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
