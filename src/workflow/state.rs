//! Orchestration state management with transition validation.
//!
//! `OrchestrationState` tracks the status of one run and enforces the
//! lifecycle ordering, recording every status it enters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

use super::{OrchestrationId, OrchestrationStatus};

/// A record of a status transition with timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    /// The status that was entered.
    pub status: OrchestrationStatus,
    /// When this status was entered.
    pub entered_at: DateTime<Utc>,
}

/// Manages orchestration status and enforces valid transitions.
///
/// Valid transitions:
/// - Initializing -> Planning
/// - Planning -> Executing | Failed
/// - Executing -> Validating | Failed | Timeout
/// - Validating -> Completed | Failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationState {
    id: OrchestrationId,
    status: OrchestrationStatus,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    history: Vec<StatusHistoryEntry>,
}

impl OrchestrationState {
    /// Create a new state in `Initializing`.
    pub fn new(id: OrchestrationId) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: OrchestrationStatus::Initializing,
            started_at: now,
            ended_at: None,
            history: vec![StatusHistoryEntry {
                status: OrchestrationStatus::Initializing,
                entered_at: now,
            }],
        }
    }

    /// Check if a transition to `target` is valid from the current status.
    pub fn can_transition(&self, target: OrchestrationStatus) -> bool {
        use OrchestrationStatus::*;
        matches!(
            (self.status, target),
            (Initializing, Planning)
                | (Planning, Executing)
                | (Planning, Failed)
                | (Executing, Validating)
                | (Executing, Failed)
                | (Executing, Timeout)
                | (Validating, Completed)
                | (Validating, Failed)
        )
    }

    /// Move to `target`.
    ///
    /// Entering a terminal status stamps the end time.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` if the move is not allowed.
    pub fn transition(&mut self, target: OrchestrationStatus) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }

        info!(
            orchestration = %self.id.short(),
            from = %self.status,
            to = %target,
            "orchestration status changed"
        );

        let now = Utc::now();
        self.status = target;
        self.history.push(StatusHistoryEntry {
            status: target,
            entered_at: now,
        });
        if target.is_terminal() {
            self.ended_at = Some(now);
        }
        Ok(())
    }

    pub fn id(&self) -> OrchestrationId {
        self.id
    }

    /// Get the current status.
    pub fn status(&self) -> OrchestrationStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Set once a terminal status is reached.
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Get the history of all statuses entered, in order.
    pub fn history(&self) -> &[StatusHistoryEntry] {
        &self.history
    }
}
