use std::time::Duration;

use thiserror::Error;

use crate::core::graph::CycleSeverity;
use crate::core::task::TaskId;
use crate::orchestration::registry::WorkerId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dependency cycle detected ({severity}): {}", format_cycle(.cycle))]
    CycleDetected {
        cycle: Vec<TaskId>,
        severity: CycleSeverity,
    },

    #[error("Task {task} depends on unknown task {dependency}")]
    DanglingDependency { task: TaskId, dependency: TaskId },

    #[error("Task {0} depends on itself")]
    SelfDependency(TaskId),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(TaskId),

    #[error("Invalid task {task}: {reason}")]
    InvalidTask { task: TaskId, reason: String },

    #[error("Planning failed, could not place tasks: {}", format_ids(.stuck))]
    Planning { stuck: Vec<TaskId> },

    #[error("Worker already registered: {0}")]
    DuplicateWorker(WorkerId),

    #[error("Invalid worker {worker}: {reason}")]
    InvalidWorker { worker: WorkerId, reason: String },

    #[error("Worker not found: {0}")]
    WorkerNotFound(WorkerId),

    #[error("No eligible worker for task {task} and no generalist configured")]
    NoEligibleWorker { task: TaskId },

    #[error("No runner configured")]
    NoRunner,

    #[error("Runner error: {0}")]
    Runner(String),

    #[error("Invalid orchestration transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Errors that abort an orchestration before any task runs, including
    /// a task that no worker can take.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::CycleDetected { .. }
                | Error::DanglingDependency { .. }
                | Error::SelfDependency(_)
                | Error::DuplicateTask(_)
                | Error::InvalidTask { .. }
                | Error::Planning { .. }
                | Error::NoEligibleWorker { .. }
        )
    }
}

fn format_cycle(cycle: &[TaskId]) -> String {
    cycle
        .iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_ids(ids: &[TaskId]) -> String {
    ids.iter().map(TaskId::as_str).collect::<Vec<_>>().join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;
