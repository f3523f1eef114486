//! Structured logging for conductor.
//!
//! Log levels:
//! - ERROR: Failures that abort an orchestration
//! - WARN: Recoverable surprises (cycles rejected, tasks failing, timeouts)
//! - INFO: Lifecycle transitions and phase boundaries
//! - DEBUG: Planning decisions, assignments, per-task attempts
//! - TRACE: Permit and scoring internals
//!
//! Debug mode can be enabled with `init_with_debug(true)` or `CONDUCTOR_DEBUG=1`.
//! `RUST_LOG`, when set, replaces the computed filter entirely.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use tracing::Subscriber;
use tracing_subscriber::EnvFilter;

use crate::Result;

const DEBUG_ENV: &str = "CONDUCTOR_DEBUG";

/// Install a stderr subscriber at INFO.
pub fn init() -> bool {
    init_with_debug(false)
}

/// Install a stderr subscriber, at DEBUG when `debug` or `CONDUCTOR_DEBUG` says so.
///
/// Returns `false` if a global subscriber was already installed. Calling
/// this more than once is harmless.
pub fn init_with_debug(debug: bool) -> bool {
    let enabled = resolve_debug(debug);
    tracing_subscriber::fmt()
        .with_env_filter(filter_for(enabled))
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Install a subscriber writing to `path`, truncating it first.
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be created.
pub fn init_to_file(path: &Path, debug: bool) -> Result<bool> {
    let subscriber = file_subscriber(path, resolve_debug(debug))?;
    Ok(tracing::subscriber::set_global_default(subscriber).is_ok())
}

/// The filter used when `RUST_LOG` is unset.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "conductor=debug"
    } else {
        "conductor=info"
    }
}

fn resolve_debug(debug: bool) -> bool {
    let env_debug = std::env::var(DEBUG_ENV)
        .map(|v| parse_debug_flag(&v))
        .unwrap_or(false);
    debug || env_debug
}

fn parse_debug_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn filter_for(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(debug)))
}

fn file_subscriber(path: &Path, debug: bool) -> Result<impl Subscriber + Send + Sync + 'static> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter_for(debug))
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .finish())
}
