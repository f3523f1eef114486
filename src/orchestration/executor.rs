//! Phase executor for running a plan through a [`Runner`].
//!
//! The `PhaseExecutor` drives an [`OrchestrationPlan`] phase by phase.
//! Inside a parallel phase every task is spawned at once and a bounded
//! [`WorkerPool`] limits how many actually run; the phase settles only when
//! every member has an outcome. A failed task never cancels its siblings,
//! but its dependents in later phases are skipped rather than run.
//!
//! The orchestration timeout cancels work that has not started yet. Tasks
//! already in flight finish, the current phase settles, and every later
//! phase is skipped.

use super::assignment::{Assignment, AssignmentSet};
use super::planner::{OrchestrationPlan, Phase};
use super::pool::WorkerPool;
use super::registry::{CapabilityRegistry, WorkerId};
use super::runner::{RunContext, Runner};
use crate::core::{Task, TaskGraph, TaskId};
use crate::error::{Error, Result};
use crate::util;
use crate::workflow::OrchestrationId;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default upper bound on tasks running at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;
/// Default orchestration timeout.
pub const DEFAULT_ORCHESTRATION_TIMEOUT: Duration = Duration::from_millis(300_000);

/// Events emitted while a plan runs.
///
/// Delivery is best effort: a full or closed channel drops the event.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    PhaseStarted {
        phase: usize,
        tasks: usize,
        parallel: bool,
    },
    TaskStarted {
        task_id: TaskId,
        worker: WorkerId,
        attempt: u32,
    },
    TaskCompleted {
        task_id: TaskId,
        worker: WorkerId,
        duration: Duration,
    },
    TaskFailed {
        task_id: TaskId,
        worker: WorkerId,
        attempt: u32,
        error: String,
        /// Whether another attempt follows.
        will_retry: bool,
    },
    TaskSkipped {
        task_id: TaskId,
        reason: SkipReason,
    },
    PhaseCompleted {
        phase: usize,
        completed: usize,
        failed: usize,
        skipped: usize,
    },
    TimeoutReached {
        elapsed: Duration,
    },
}

/// Why a task was never attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// An ancestor failed, so a dependency can never be met.
    DependencyFailed { ancestor: TaskId },
    /// The orchestration timed out before the task started.
    Timeout,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::DependencyFailed { ancestor } => {
                write!(f, "dependency {} failed", ancestor)
            }
            SkipReason::Timeout => write!(f, "orchestration timed out"),
        }
    }
}

/// Final outcome of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed {
        #[serde(rename = "duration_ms", with = "crate::util::duration_ms")]
        duration: Duration,
        worker: WorkerId,
        attempts: u32,
    },
    Failed {
        error: String,
        #[serde(rename = "duration_ms", with = "crate::util::duration_ms")]
        duration: Duration,
        worker: WorkerId,
        attempts: u32,
    },
    Skipped {
        reason: SkipReason,
    },
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskOutcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, TaskOutcome::Skipped { .. })
    }

    /// Measured run time across attempts; `None` if never attempted.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            TaskOutcome::Completed { duration, .. } | TaskOutcome::Failed { duration, .. } => {
                Some(*duration)
            }
            TaskOutcome::Skipped { .. } => None,
        }
    }

    fn failure(error: impl Into<String>, worker: WorkerId) -> Self {
        TaskOutcome::Failed {
            error: error.into(),
            duration: Duration::ZERO,
            worker,
            attempts: 0,
        }
    }
}

/// Summary of one settled phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub index: usize,
    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    pub skipped: Vec<TaskId>,
    #[serde(rename = "elapsed_ms", with = "crate::util::duration_ms")]
    pub elapsed: Duration,
    /// Most tasks in flight at once during this phase.
    pub peak_concurrency: usize,
}

impl PhaseResult {
    fn empty(index: usize) -> Self {
        Self {
            index,
            completed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            elapsed: Duration::ZERO,
            peak_concurrency: 0,
        }
    }

    fn record(&mut self, id: &TaskId, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Completed { .. } => self.completed.push(id.clone()),
            TaskOutcome::Failed { .. } => self.failed.push(id.clone()),
            TaskOutcome::Skipped { .. } => self.skipped.push(id.clone()),
        }
    }
}

/// A settled phase with the outcome of each member.
#[derive(Debug, Clone)]
pub struct PhaseRun {
    pub result: PhaseResult,
    pub outcomes: BTreeMap<TaskId, TaskOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Every phase ran.
    Completed,
    /// The orchestration timeout fired; later phases were skipped.
    TimedOut,
}

/// Outcome of a whole plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    pub status: PlanStatus,
    pub phases: Vec<PhaseResult>,
    pub outcomes: BTreeMap<TaskId, TaskOutcome>,
    #[serde(rename = "elapsed_ms", with = "crate::util::duration_ms")]
    pub elapsed: Duration,
    pub peak_concurrency: usize,
}

impl PlanResult {
    pub fn completed_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_completed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_failed()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_skipped()).count()
    }

    /// Sum of measured durations of every attempted task.
    pub fn attempted_duration(&self) -> Duration {
        self.outcomes.values().filter_map(TaskOutcome::duration).sum()
    }

    /// Sequential cost over wall-clock elapsed, capped at 1.0.
    ///
    /// 1.0 when nothing was attempted.
    pub fn parallelization_efficiency(&self) -> f64 {
        if !self.outcomes.values().any(|o| !o.is_skipped()) {
            return 1.0;
        }
        util::capped_ratio(self.attempted_duration(), self.elapsed)
    }
}

/// Tunables for plan execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Global cap on tasks in flight.
    pub max_concurrency: usize,
    pub orchestration_timeout: Duration,
    /// Attempts per task, at least 1.
    pub max_attempts: u32,
    /// Limit on a single runner call.
    pub task_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            orchestration_timeout: DEFAULT_ORCHESTRATION_TIMEOUT,
            max_attempts: 1,
            task_timeout: None,
        }
    }
}

/// Identity and cancellation shared by every task of one run.
#[derive(Debug, Clone)]
pub struct RunScope {
    pub orchestration_id: OrchestrationId,
    pub context_tags: Arc<BTreeSet<String>>,
    pub cancel: CancellationToken,
}

impl RunScope {
    pub fn new(orchestration_id: OrchestrationId, context_tags: BTreeSet<String>) -> Self {
        Self {
            orchestration_id,
            context_tags: Arc::new(context_tags),
            cancel: CancellationToken::new(),
        }
    }
}

/// Executes plans phase by phase.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use conductor::orchestration::{ExecutorConfig, PhaseExecutor, RunScope};
///
/// let executor = PhaseExecutor::new(registry, ExecutorConfig::default())
///     .with_runner(Arc::new(MyRunner));
/// let scope = RunScope::new(OrchestrationId::new(), tags);
/// let result = executor.run_plan(&plan, &assignments, &scope).await?;
/// ```
pub struct PhaseExecutor {
    registry: Arc<CapabilityRegistry>,
    runner: Option<Arc<dyn Runner>>,
    config: ExecutorConfig,
    events: Option<mpsc::Sender<ExecutionEvent>>,
}

impl PhaseExecutor {
    /// Create an executor without a runner.
    ///
    /// # Arguments
    ///
    /// * `registry` - Registry whose load and stats are updated per attempt
    /// * `config` - Concurrency, timeout and retry settings
    pub fn new(registry: Arc<CapabilityRegistry>, config: ExecutorConfig) -> Self {
        Self {
            registry,
            runner: None,
            config,
            events: None,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Emit [`ExecutionEvent`]s on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<ExecutionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run every phase of `plan` in order.
    ///
    /// A timer cancels `scope.cancel` once the orchestration timeout
    /// elapses; the run then stops after the current phase settles.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoRunner` if no runner is configured. Task failures
    /// are never errors; they are recorded in the result.
    pub async fn run_plan(
        &self,
        plan: &OrchestrationPlan,
        assignments: &AssignmentSet,
        scope: &RunScope,
    ) -> Result<PlanResult> {
        if self.runner.is_none() {
            return Err(Error::NoRunner);
        }

        let started = Instant::now();
        let timer = {
            let cancel = scope.cancel.clone();
            let timeout = self.config.orchestration_timeout;
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        warn!(
                            timeout_ms = timeout.as_millis() as u64,
                            "orchestration timeout reached"
                        );
                        cancel.cancel();
                    }
                    _ = cancel.cancelled() => {}
                }
            })
        };

        let mut outcomes: BTreeMap<TaskId, TaskOutcome> = BTreeMap::new();
        let mut phases = Vec::with_capacity(plan.phases.len());
        let mut peak_concurrency = 0;
        let mut timed_out = false;

        for phase in &plan.phases {
            if timed_out {
                let mut result = PhaseResult::empty(phase.index);
                for id in &phase.tasks {
                    let outcome = TaskOutcome::Skipped {
                        reason: SkipReason::Timeout,
                    };
                    self.emit(ExecutionEvent::TaskSkipped {
                        task_id: id.clone(),
                        reason: SkipReason::Timeout,
                    });
                    result.record(id, &outcome);
                    outcomes.insert(id.clone(), outcome);
                }
                phases.push(result);
                continue;
            }

            // Drop tasks whose dependencies can no longer be met.
            let mut skipped = Vec::new();
            let mut runnable = Vec::with_capacity(phase.tasks.len());
            for id in &phase.tasks {
                match failed_ancestor(&plan.graph, id, &outcomes) {
                    Some(ancestor) => {
                        info!(task = %id, ancestor = %ancestor, "skipping task, dependency failed");
                        skipped.push((id.clone(), SkipReason::DependencyFailed { ancestor }));
                    }
                    None => runnable.push(id.clone()),
                }
            }

            let to_run = Phase {
                tasks: runnable,
                ..phase.clone()
            };
            let mut run = self.run_phase(&to_run, &plan.graph, assignments, scope).await?;

            for (id, reason) in skipped {
                self.emit(ExecutionEvent::TaskSkipped {
                    task_id: id.clone(),
                    reason: reason.clone(),
                });
                let outcome = TaskOutcome::Skipped { reason };
                run.result.record(&id, &outcome);
                run.outcomes.insert(id, outcome);
            }

            peak_concurrency = peak_concurrency.max(run.result.peak_concurrency);
            outcomes.extend(run.outcomes);
            phases.push(run.result);

            if scope.cancel.is_cancelled() {
                timed_out = true;
                let elapsed = started.elapsed();
                warn!(
                    phase = phase.index,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "stopping after current phase, timeout reached"
                );
                self.emit(ExecutionEvent::TimeoutReached { elapsed });
            }
        }

        timer.abort();

        let result = PlanResult {
            status: if timed_out {
                PlanStatus::TimedOut
            } else {
                PlanStatus::Completed
            },
            phases,
            outcomes,
            elapsed: started.elapsed(),
            peak_concurrency,
        };
        info!(
            status = ?result.status,
            completed = result.completed_count(),
            failed = result.failed_count(),
            skipped = result.skipped_count(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "plan execution finished"
        );
        Ok(result)
    }

    /// Run every task of one phase and wait for all of them to settle.
    ///
    /// Parallel phases run members concurrently, bounded by the smaller
    /// of the phase size and the configured max concurrency. Other phases
    /// run members one at a time in list order. Tasks that have not
    /// started when `scope.cancel` fires are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoRunner` if no runner is configured.
    pub async fn run_phase(
        &self,
        phase: &Phase,
        graph: &TaskGraph,
        assignments: &AssignmentSet,
        scope: &RunScope,
    ) -> Result<PhaseRun> {
        let runner = self.runner.clone().ok_or(Error::NoRunner)?;
        let started = Instant::now();

        info!(
            phase = phase.index,
            tasks = phase.len(),
            parallel = phase.parallel,
            "phase started"
        );
        self.emit(ExecutionEvent::PhaseStarted {
            phase: phase.index,
            tasks: phase.len(),
            parallel: phase.parallel,
        });

        let pool = if phase.parallel {
            WorkerPool::for_phase(phase.len(), self.config.max_concurrency)
        } else {
            WorkerPool::new(1)
        };

        let mut jobs = Vec::with_capacity(phase.len());
        let mut settled: Vec<(TaskId, TaskOutcome)> = Vec::with_capacity(phase.len());
        for id in &phase.tasks {
            match (graph.get(id), assignments.get(id)) {
                (Some(task), Some(assignment)) => jobs.push(TaskJob {
                    task: task.clone(),
                    assignment: assignment.clone(),
                    runner: Arc::clone(&runner),
                    registry: Arc::clone(&self.registry),
                    events: self.events.clone(),
                    pool: pool.clone(),
                    scope: scope.clone(),
                    phase_index: phase.index,
                    max_attempts: self.config.max_attempts.max(1),
                    task_timeout: self.config.task_timeout,
                }),
                (None, _) => settled.push((
                    id.clone(),
                    TaskOutcome::failure(format!("unknown task {}", id), WorkerId::from("")),
                )),
                (Some(_), None) => settled.push((
                    id.clone(),
                    TaskOutcome::failure(
                        format!("no assignment for task {}", id),
                        WorkerId::from(""),
                    ),
                )),
            }
        }

        if phase.parallel {
            let (spawned, handles): (Vec<(TaskId, WorkerId)>, Vec<_>) = jobs
                .into_iter()
                .map(|job| {
                    let key = (job.task.id.clone(), job.assignment.primary.clone());
                    (key, tokio::spawn(job.run()))
                })
                .unzip();

            // Settle all, then inspect.
            for ((id, worker), joined) in spawned.into_iter().zip(join_all(handles).await) {
                let outcome = joined.unwrap_or_else(|e| {
                    TaskOutcome::failure(Error::TaskJoin(e.to_string()).to_string(), worker)
                });
                settled.push((id, outcome));
            }
        } else {
            for job in jobs {
                let id = job.task.id.clone();
                let worker = job.assignment.primary.clone();
                let outcome = match tokio::spawn(job.run()).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        TaskOutcome::failure(Error::TaskJoin(e.to_string()).to_string(), worker)
                    }
                };
                settled.push((id, outcome));
            }
        }

        let mut result = PhaseResult::empty(phase.index);
        let mut outcomes = BTreeMap::new();
        // Report in phase order regardless of completion order.
        for id in &phase.tasks {
            if let Some(pos) = settled.iter().position(|(sid, _)| sid == id) {
                let (id, outcome) = settled.swap_remove(pos);
                result.record(&id, &outcome);
                outcomes.insert(id, outcome);
            }
        }
        result.elapsed = started.elapsed();
        result.peak_concurrency = pool.peak();

        info!(
            phase = phase.index,
            completed = result.completed.len(),
            failed = result.failed.len(),
            skipped = result.skipped.len(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "phase settled"
        );
        self.emit(ExecutionEvent::PhaseCompleted {
            phase: phase.index,
            completed: result.completed.len(),
            failed: result.failed.len(),
            skipped: result.skipped.len(),
        });

        Ok(PhaseRun { result, outcomes })
    }

    fn emit(&self, event: ExecutionEvent) {
        emit(&self.events, event);
    }
}

fn emit(events: &Option<mpsc::Sender<ExecutionEvent>>, event: ExecutionEvent) {
    if let Some(tx) = events {
        let _ = tx.try_send(event);
    }
}

/// First failed ancestor reachable through `id`'s dependencies.
fn failed_ancestor(
    graph: &TaskGraph,
    id: &TaskId,
    outcomes: &BTreeMap<TaskId, TaskOutcome>,
) -> Option<TaskId> {
    graph
        .dependencies_of(id)
        .into_iter()
        .find_map(|dep| match outcomes.get(dep)? {
            TaskOutcome::Failed { .. } => Some(dep.clone()),
            TaskOutcome::Skipped {
                reason: SkipReason::DependencyFailed { ancestor },
            } => Some(ancestor.clone()),
            TaskOutcome::Skipped {
                reason: SkipReason::Timeout,
            } => Some(dep.clone()),
            TaskOutcome::Completed { .. } => None,
        })
}

/// Everything one spawned task needs, owned so it can cross `tokio::spawn`.
struct TaskJob {
    task: Task,
    assignment: Assignment,
    runner: Arc<dyn Runner>,
    registry: Arc<CapabilityRegistry>,
    events: Option<mpsc::Sender<ExecutionEvent>>,
    pool: WorkerPool,
    scope: RunScope,
    phase_index: usize,
    max_attempts: u32,
    task_timeout: Option<Duration>,
}

impl TaskJob {
    async fn run(self) -> TaskOutcome {
        let task_id = self.task.id.clone();

        let _permit = tokio::select! {
            biased;
            _ = self.scope.cancel.cancelled() => {
                return self.skip_for_timeout();
            }
            permit = self.pool.acquire() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    return TaskOutcome::failure(e.to_string(), self.assignment.primary.clone())
                }
            },
        };

        let mut total = Duration::ZERO;
        let mut last_error = String::new();
        let mut worker = self.assignment.primary.clone();
        let mut attempts = 0;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 && self.scope.cancel.is_cancelled() {
                debug!(task = %task_id, "not retrying, orchestration timed out");
                break;
            }
            attempts = attempt;
            worker = self.assignment.worker_for_attempt(attempt).clone();

            let tracked = match self.registry.begin_task(&worker, &task_id) {
                Ok(()) => true,
                Err(e) => {
                    warn!(task = %task_id, worker = %worker, error = %e, "worker load not tracked");
                    false
                }
            };
            debug!(task = %task_id, worker = %worker, attempt, "task started");
            emit(
                &self.events,
                ExecutionEvent::TaskStarted {
                    task_id: task_id.clone(),
                    worker: worker.clone(),
                    attempt,
                },
            );

            let ctx = RunContext {
                orchestration_id: self.scope.orchestration_id,
                phase_index: self.phase_index,
                attempt,
                worker: worker.clone(),
                context_tags: (*self.scope.context_tags).clone(),
                cancel: self.scope.cancel.clone(),
            };

            let attempt_started = Instant::now();
            let call = self.runner.execute(&self.task, &self.assignment, &ctx);
            let result = match self.task_timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(limit)),
                },
                None => call.await,
            };
            let measured = attempt_started.elapsed();
            total += measured;

            let (success, reported, error) = match result {
                Ok(report) if report.success => (true, report.duration, None),
                Ok(report) => (
                    false,
                    report.duration,
                    Some(
                        report
                            .output
                            .unwrap_or_else(|| "runner reported failure".to_string()),
                    ),
                ),
                Err(e) => (false, measured, Some(e.to_string())),
            };

            if tracked {
                if let Err(e) = self.registry.finish_task(&worker, reported, success) {
                    warn!(
                        task = %task_id,
                        worker = %worker,
                        error = %e,
                        "worker stats not recorded"
                    );
                }
            }

            match error {
                None => {
                    debug!(task = %task_id, worker = %worker, attempt, "task completed");
                    emit(
                        &self.events,
                        ExecutionEvent::TaskCompleted {
                            task_id: task_id.clone(),
                            worker: worker.clone(),
                            duration: total,
                        },
                    );
                    return TaskOutcome::Completed {
                        duration: total,
                        worker,
                        attempts: attempt,
                    };
                }
                Some(error) => {
                    let will_retry =
                        attempt < self.max_attempts && !self.scope.cancel.is_cancelled();
                    warn!(
                        task = %task_id,
                        worker = %worker,
                        attempt,
                        will_retry,
                        error = %error,
                        "task attempt failed"
                    );
                    emit(
                        &self.events,
                        ExecutionEvent::TaskFailed {
                            task_id: task_id.clone(),
                            worker: worker.clone(),
                            attempt,
                            error: error.clone(),
                            will_retry,
                        },
                    );
                    last_error = error;
                }
            }
        }

        TaskOutcome::Failed {
            error: last_error,
            duration: total,
            worker,
            attempts,
        }
    }

    fn skip_for_timeout(&self) -> TaskOutcome {
        info!(task = %self.task.id, "skipping task, orchestration timed out");
        emit(
            &self.events,
            ExecutionEvent::TaskSkipped {
                task_id: self.task.id.clone(),
                reason: SkipReason::Timeout,
            },
        );
        TaskOutcome::Skipped {
            reason: SkipReason::Timeout,
        }
    }
}
