//! Integration test suite for conductor.
//!
//! These tests drive whole orchestrations through the public API, from a
//! task list to a final report, using a scripted runner.
//!
//! # Test Categories
//!
//! - `orchestration_e2e`: Full runs, planning scenarios and reports
//! - `parallel_execution`: Concurrency bounds and phase ordering
//! - `failure_isolation`: Failed tasks, skipped dependents and retries
//! - `timeout`: Orchestration and per-task timeouts
//!
//! # CI Compatibility
//!
//! No test touches the network or the home directory; runner calls are
//! short sleeps.


mod failure_isolation;
mod orchestration_e2e;
mod parallel_execution;
mod timeout;
