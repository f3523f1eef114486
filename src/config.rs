use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::core::DEFAULT_BOTTLENECK_THRESHOLD;
use crate::orchestration::executor::{
    ExecutorConfig, DEFAULT_MAX_CONCURRENCY, DEFAULT_ORCHESTRATION_TIMEOUT,
};
use crate::orchestration::registry::{CapabilityRegistry, WorkerId, WorkerProfile};
use crate::{Error, Result};

/// Efficiency below which validation emits a warning.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Global cap on tasks running at once.
    pub max_concurrency: usize,
    #[serde(rename = "orchestration_timeout_ms", with = "crate::util::duration_ms")]
    pub orchestration_timeout: Duration,
    /// Dependent count above which a task is a bottleneck.
    pub bottleneck_threshold: usize,
    /// Attempts per task, including the first.
    pub max_attempts: u32,
    #[serde(
        rename = "task_timeout_ms",
        with = "crate::util::option_duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub task_timeout: Option<Duration>,
    pub quality_threshold: f64,
    /// Fallback worker id; must name one of `workers`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generalist: Option<WorkerId>,
    pub workers: Vec<WorkerProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            orchestration_timeout: DEFAULT_ORCHESTRATION_TIMEOUT,
            bottleneck_threshold: DEFAULT_BOTTLENECK_THRESHOLD,
            max_attempts: 1,
            task_timeout: None,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            generalist: None,
            workers: Vec::new(),
        }
    }
}

impl Config {
    pub fn conductor_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".conductor"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::conductor_dir()?.join("conductor.toml"))
    }

    /// Load `~/.conductor/conductor.toml`, or defaults if it does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load and validate a config file, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config = Self::from_toml_str(&fs::read_to_string(path)?)?;
        debug!(
            max_concurrency = config.max_concurrency,
            timeout_ms = config.orchestration_timeout.as_millis() as u64,
            workers = config.workers.len(),
            "config loaded"
        );
        Ok(config)
    }

    /// Parse and validate TOML.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Write the config as TOML, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!(dir = %parent.display(), "creating config directory");
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::Config("max_concurrency must be at least 1".into()));
        }
        if self.orchestration_timeout.is_zero() {
            return Err(Error::Config("orchestration_timeout_ms must be positive".into()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        if matches!(self.task_timeout, Some(t) if t.is_zero()) {
            return Err(Error::Config("task_timeout_ms must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(Error::Config(format!(
                "quality_threshold {} outside 0.0..=1.0",
                self.quality_threshold
            )));
        }

        let mut seen = HashSet::new();
        for worker in &self.workers {
            if !seen.insert(&worker.id) {
                return Err(Error::Config(format!("duplicate worker id {}", worker.id)));
            }
            worker
                .complexity
                .validate()
                .map_err(|reason| Error::Config(format!("worker {}: {}", worker.id, reason)))?;
        }
        if let Some(generalist) = &self.generalist {
            if !seen.contains(generalist) {
                return Err(Error::Config(format!(
                    "generalist {} is not a configured worker",
                    generalist
                )));
            }
        }
        Ok(())
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_concurrency: self.max_concurrency,
            orchestration_timeout: self.orchestration_timeout,
            max_attempts: self.max_attempts,
            task_timeout: self.task_timeout,
        }
    }

    /// Registry seeded with `workers`, with `generalist` designated.
    pub fn build_registry(&self) -> Result<CapabilityRegistry> {
        let registry = CapabilityRegistry::with_profiles(self.workers.iter().cloned())?;
        if let Some(generalist) = &self.generalist {
            registry.set_generalist(generalist)?;
        }
        Ok(registry)
    }
}
