//! Orchestration engines.
//!
//! This module turns a validated task graph into phases, matches every
//! task to a worker from the capability registry, and runs the phases
//! through a pluggable [`Runner`] with bounded concurrency.

pub mod assignment;
pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod pool;
pub mod registry;
pub mod runner;

pub use assignment::{Assignment, AssignmentEngine, AssignmentSet};
pub use executor::{
    ExecutionEvent, ExecutorConfig, PhaseExecutor, PhaseResult, PhaseRun, PlanResult, PlanStatus,
    RunScope, SkipReason, TaskOutcome, DEFAULT_MAX_CONCURRENCY, DEFAULT_ORCHESTRATION_TIMEOUT,
};
pub use orchestrator::{Orchestrator, OrchestratorStats};
pub use planner::{OrchestrationPlan, Phase, PhasePlanner, Strategy};
pub use pool::{PoolPermit, WorkerPool};
pub use registry::{
    BestMatch, CapabilityRegistry, ComplexityRange, DomainSupport, PerformanceStats,
    ScoreBreakdown, WorkerId, WorkerProfile, WorkerSnapshot,
};
pub use runner::{RunContext, RunReport, Runner};
