//! Core domain models for conductor.
//!
//! This module contains the task model, the validated dependency graph,
//! and the structural analysis run over it before planning.

pub mod analysis;
pub mod graph;
pub mod task;

pub use analysis::{
    Bottleneck, BottleneckSeverity, CriticalPath, GraphAnalyzer, Recommendation,
    RecommendationKind, DEFAULT_BOTTLENECK_THRESHOLD,
};
pub use graph::{CycleSeverity, TaskGraph};
pub use task::{Priority, Task, TaskId, MAX_COMPLEXITY, MIN_COMPLEXITY};
