//! Task data model for the orchestration graph.
//!
//! Tasks are the atomic units of work scheduled into phases and assigned
//! to workers. A task declares its dependencies by id; the graph resolves
//! them when it is built.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Lowest accepted task complexity.
pub const MIN_COMPLEXITY: u8 = 1;
/// Highest accepted task complexity.
pub const MAX_COMPLEXITY: u8 = 10;

/// Unique identifier for a task within one orchestration.
///
/// Ids are caller-supplied strings, ordered lexicographically so that
/// every tie-break in planning and analysis is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task priority, ordered from least to most urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// A single unit of work in the orchestration graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Human-readable title.
    pub title: String,
    /// Free-form category used for capability matching.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Complexity on a 1-10 scale.
    pub complexity: u8,
    #[serde(default)]
    pub priority: Priority,
    /// Requirement tags matched against worker capabilities.
    #[serde(default)]
    pub requirements: BTreeSet<String>,
    /// Expected run time, used for critical-path and phase estimates.
    #[serde(rename = "estimated_duration_ms", with = "crate::util::duration_ms")]
    pub estimated_duration: Duration,
    /// Ids of tasks that must settle before this one starts.
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
}

impl Task {
    /// Create a task with default attributes.
    ///
    /// Defaults: type `general`, complexity 5, medium priority,
    /// one second estimated duration and no dependencies.
    pub fn new(id: impl Into<TaskId>, title: &str) -> Self {
        Self {
            id: id.into(),
            title: title.to_string(),
            task_type: "general".to_string(),
            complexity: 5,
            priority: Priority::Medium,
            requirements: BTreeSet::new(),
            estimated_duration: Duration::from_secs(1),
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_type(mut self, task_type: &str) -> Self {
        self.task_type = task_type.to_string();
        self
    }

    pub fn with_complexity(mut self, complexity: u8) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_requirements<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requirements.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration = duration;
        self
    }

    /// Add dependencies on the given task ids.
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.dependencies.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Check the per-task invariants that do not need the rest of the graph.
    ///
    /// Returns a description of the first violated invariant.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.as_str().trim().is_empty() {
            return Err("task id must not be empty".to_string());
        }
        if !(MIN_COMPLEXITY..=MAX_COMPLEXITY).contains(&self.complexity) {
            return Err(format!(
                "complexity {} outside {}..={}",
                self.complexity, MIN_COMPLEXITY, MAX_COMPLEXITY
            ));
        }
        if self.estimated_duration.is_zero() {
            return Err("estimated duration must be positive".to_string());
        }
        Ok(())
    }
}
