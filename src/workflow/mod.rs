//! Orchestration lifecycle management.
//!
//! This module provides the run identifier, the status enum and the
//! state machine that validates status transitions.

mod state;
mod types;

pub use state::{OrchestrationState, StatusHistoryEntry};
pub use types::{OrchestrationId, OrchestrationStatus};
