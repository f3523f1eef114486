//! Top-level orchestration: plan, assign, execute, validate.
//!
//! `Orchestrator::start` drives one run through the lifecycle state
//! machine. Structural problems (bad graph, unplaceable tasks, no eligible
//! worker) come back as `Err` before anything executes. Once execution
//! begins the caller always gets an [`OrchestrationReport`], whatever
//! happens to individual tasks.

use super::assignment::{AssignmentEngine, AssignmentSet};
use super::executor::{ExecutionEvent, PhaseExecutor, PlanStatus, RunScope};
use super::planner::{OrchestrationPlan, PhasePlanner, Strategy};
use super::registry::CapabilityRegistry;
use super::runner::Runner;
use crate::config::Config;
use crate::core::{Task, TaskGraph};
use crate::error::Result;
use crate::report::{OrchestrationReport, ValidationReport};
use crate::util;
use crate::workflow::{OrchestrationId, OrchestrationState, OrchestrationStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Cumulative results across every run of one orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Running mean of run wall-clock time.
    #[serde(rename = "average_duration_ms", with = "crate::util::duration_ms")]
    pub average_duration: Duration,
}

impl OrchestratorStats {
    pub fn total(&self) -> u64 {
        self.completed + self.failed + self.timed_out
    }

    fn record(&mut self, status: OrchestrationStatus, duration: Duration) {
        match status {
            OrchestrationStatus::Completed => self.completed += 1,
            OrchestrationStatus::Timeout => self.timed_out += 1,
            _ => self.failed += 1,
        }
        let n = self.total() as u32;
        self.average_duration = (self.average_duration * (n - 1) + duration) / n;
    }
}

/// Runs task sets end to end against a shared worker registry.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use conductor::{Config, Orchestrator};
///
/// let orchestrator = Orchestrator::from_config(Config::load()?)?
///     .with_runner(Arc::new(MyRunner));
/// let report = orchestrator.start(tasks, context_tags).await?;
/// println!("{}", report.to_json()?);
/// ```
pub struct Orchestrator {
    config: Config,
    registry: Arc<CapabilityRegistry>,
    runner: Option<Arc<dyn Runner>>,
    events: Option<mpsc::Sender<ExecutionEvent>>,
    stats: Mutex<OrchestratorStats>,
}

impl Orchestrator {
    /// Create an orchestrator over an existing registry.
    pub fn new(config: Config, registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            config,
            registry,
            runner: None,
            events: None,
            stats: Mutex::new(OrchestratorStats::default()),
        }
    }

    /// Validate `config` and seed a registry from its `workers`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for invalid settings, or a registry error
    /// if the worker list cannot be registered.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(config.build_registry()?);
        Ok(Self::new(config, registry))
    }

    pub fn with_runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Forward execution events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<ExecutionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> OrchestratorStats {
        util::lock(&self.stats).clone()
    }

    /// Run `tasks` with an automatically selected strategy.
    ///
    /// # Errors
    ///
    /// Returns structural errors (`CycleDetected`, `DanglingDependency`,
    /// `Planning`, `NoEligibleWorker`, ...) before any task runs. Task
    /// failures, a missing runner and timeouts are reported in the
    /// returned report instead.
    pub async fn start(
        &self,
        tasks: Vec<Task>,
        context_tags: BTreeSet<String>,
    ) -> Result<OrchestrationReport> {
        self.start_with_strategy(tasks, context_tags, None).await
    }

    /// Run `tasks`, forcing `strategy` when given.
    pub async fn start_with_strategy(
        &self,
        tasks: Vec<Task>,
        context_tags: BTreeSet<String>,
        strategy: Option<Strategy>,
    ) -> Result<OrchestrationReport> {
        let started = Instant::now();
        let id = OrchestrationId::new();
        let mut state = OrchestrationState::new(id);
        info!(orchestration = %id.short(), tasks = tasks.len(), "orchestration started");

        state.transition(OrchestrationStatus::Planning)?;
        let (plan, assignments) = match self.prepare(tasks, &context_tags, strategy) {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(
                    orchestration = %id.short(),
                    structural = e.is_structural(),
                    error = %e,
                    "orchestration rejected"
                );
                state.transition(OrchestrationStatus::Failed)?;
                self.record(OrchestrationStatus::Failed, started.elapsed());
                return Err(e);
            }
        };

        let mut report = OrchestrationReport::new(id, &plan, &assignments);
        state.transition(OrchestrationStatus::Executing)?;

        let executor = self.executor();
        let scope = RunScope::new(id, context_tags);
        match executor.run_plan(&plan, &assignments, &scope).await {
            Ok(result) => {
                let timed_out = result.status == PlanStatus::TimedOut;
                let validation =
                    ValidationReport::evaluate(&plan.graph, &result, self.config.quality_threshold);
                report.record_result(result);

                if timed_out {
                    state.transition(OrchestrationStatus::Timeout)?;
                } else {
                    state.transition(OrchestrationStatus::Validating)?;
                    state.transition(OrchestrationStatus::Completed)?;
                }
                for warning in &validation.warnings {
                    warn!(orchestration = %id.short(), warning = %warning, "validation warning");
                }
                report.validation = Some(validation);
            }
            Err(e) => {
                error!(orchestration = %id.short(), error = %e, "execution failed");
                report.error = Some(e.to_string());
                state.transition(OrchestrationStatus::Failed)?;
            }
        }

        report.close(&state);
        self.record(report.status, started.elapsed());
        info!(
            orchestration = %id.short(),
            status = %report.status,
            completed = report.metrics.completed,
            failed = report.metrics.failed,
            skipped = report.metrics.skipped,
            "orchestration finished"
        );
        Ok(report)
    }

    fn prepare(
        &self,
        tasks: Vec<Task>,
        context_tags: &BTreeSet<String>,
        strategy: Option<Strategy>,
    ) -> Result<(OrchestrationPlan, AssignmentSet)> {
        let graph = Arc::new(TaskGraph::build(tasks)?);
        let plan = PhasePlanner::build_plan(graph, strategy, self.config.bottleneck_threshold)?;
        let assignments =
            AssignmentEngine::new(Arc::clone(&self.registry)).assign(&plan, context_tags)?;
        Ok((plan, assignments))
    }

    fn executor(&self) -> PhaseExecutor {
        let mut executor =
            PhaseExecutor::new(Arc::clone(&self.registry), self.config.executor_config());
        if let Some(runner) = &self.runner {
            executor = executor.with_runner(Arc::clone(runner));
        }
        if let Some(tx) = &self.events {
            executor = executor.with_events(tx.clone());
        }
        executor
    }

    fn record(&self, status: OrchestrationStatus, duration: Duration) {
        util::lock(&self.stats).record(status, duration);
    }
}
