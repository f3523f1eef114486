//! Core orchestration lifecycle type definitions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an orchestration run.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrchestrationId(pub Uuid);

impl OrchestrationId {
    /// Create a new unique orchestration identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for OrchestrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrchestrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for OrchestrationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle status of an orchestration.
///
/// Runs move `initializing -> planning -> executing -> validating ->
/// completed`. `planning`, `executing` and `validating` may end in
/// `failed`; only `executing` may end in `timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    #[default]
    Initializing,
    Planning,
    Executing,
    Validating,
    Completed,
    Failed,
    Timeout,
}

impl OrchestrationStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestrationStatus::Completed
                | OrchestrationStatus::Failed
                | OrchestrationStatus::Timeout
        )
    }
}

impl std::fmt::Display for OrchestrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestrationStatus::Initializing => write!(f, "initializing"),
            OrchestrationStatus::Planning => write!(f, "planning"),
            OrchestrationStatus::Executing => write!(f, "executing"),
            OrchestrationStatus::Validating => write!(f, "validating"),
            OrchestrationStatus::Completed => write!(f, "completed"),
            OrchestrationStatus::Failed => write!(f, "failed"),
            OrchestrationStatus::Timeout => write!(f, "timeout"),
        }
    }
}
