//! Task-graph orchestration engine.
//!
//! `conductor` takes a flat set of tasks with declared dependencies,
//! validates them into a [`TaskGraph`], partitions the graph into phases,
//! assigns every task to the best-fit worker from a [`CapabilityRegistry`],
//! and runs the phases through a caller-supplied [`Runner`] with bounded
//! concurrency and per-task failure isolation. Each run ends in a
//! serializable [`OrchestrationReport`].

pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod report;
pub mod util;
pub mod workflow;

pub use config::Config;
pub use crate::core::{Task, TaskGraph, TaskId};
pub use error::{Error, Result};
pub use orchestration::{
    Assignment, CapabilityRegistry, ExecutionEvent, Orchestrator, RunContext, RunReport, Runner,
    Strategy, TaskOutcome, WorkerId, WorkerProfile,
};
pub use report::OrchestrationReport;
pub use workflow::{OrchestrationId, OrchestrationStatus};
