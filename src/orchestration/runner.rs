//! The pluggable capability that actually performs a task.
//!
//! The engine never does work itself. Every task attempt is handed to a
//! [`Runner`] together with its assignment and a [`RunContext`]; whatever
//! the runner does (call a remote worker, run local code) is opaque.

use super::assignment::Assignment;
use super::registry::WorkerId;
use crate::core::Task;
use crate::error::Result;
use crate::workflow::OrchestrationId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a runner reports for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub success: bool,
    /// Time the runner spent, as it measured it.
    #[serde(rename = "duration_ms", with = "crate::util::duration_ms")]
    pub duration: Duration,
    /// Free-form output or failure detail.
    #[serde(default)]
    pub output: Option<String>,
}

impl RunReport {
    pub fn success(duration: Duration) -> Self {
        Self {
            success: true,
            duration,
            output: None,
        }
    }

    pub fn failure(duration: Duration, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            duration,
            output: Some(detail.into()),
        }
    }
}

/// Per-attempt context passed to the runner.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub orchestration_id: OrchestrationId,
    pub phase_index: usize,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Worker this attempt runs on; may differ from the primary on retries.
    pub worker: WorkerId,
    pub context_tags: BTreeSet<String>,
    /// Fired when the orchestration times out. Runners may watch it to
    /// stop early; the engine never aborts an attempt already in flight.
    pub cancel: CancellationToken,
}

/// Executes tasks on behalf of the orchestrator.
///
/// Returning `Err` and returning a `RunReport` with `success == false` are
/// both recorded as a failed attempt.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn execute(
        &self,
        task: &Task,
        assignment: &Assignment,
        ctx: &RunContext,
    ) -> Result<RunReport>;
}
