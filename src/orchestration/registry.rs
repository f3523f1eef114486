//! Capability registry for worker profiles.
//!
//! The `CapabilityRegistry` holds every worker that can take tasks, scores
//! how well each one fits a given task, and tracks per-worker load and
//! rolling performance. Profiles are immutable once registered; the mutable
//! load and stats live behind a per-worker lock so concurrent completions
//! in one phase never contend on the whole registry.

use crate::core::{Task, TaskId, MAX_COMPLEXITY, MIN_COMPLEXITY};
use crate::error::{Error, Result};
use crate::util;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Weight of a primary capability match.
pub const PRIMARY_WEIGHT: f64 = 0.40;
/// Weight of a secondary capability match.
pub const SECONDARY_WEIGHT: f64 = 0.20;
/// Weight of a domain match.
pub const DOMAIN_WEIGHT: f64 = 0.25;
/// Weight of the task complexity falling inside the worker's range.
pub const COMPLEXITY_WEIGHT: f64 = 0.15;
/// Bonus when task complexity is within one of the worker's optimum.
pub const OPTIMAL_BONUS: f64 = 0.10;
/// Scores at or below this are not eligible.
pub const MATCH_THRESHOLD: f64 = 0.3;
/// Confidence reported when falling back to the generalist.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;
/// Maximum number of alternates returned with a match.
pub const MAX_ALTERNATES: usize = 3;

/// Unique identifier for a registered worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Domains a worker supports.
///
/// Serialized as the string `"any"` or as a list of domain tags.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "DomainRepr", into = "DomainRepr")]
pub enum DomainSupport {
    /// Matches every context.
    #[default]
    Any,
    /// Matches when any context tag is one of these domains.
    Only(BTreeSet<String>),
}

impl DomainSupport {
    /// Build from tags, collapsing to `Any` when the wildcard is present.
    pub fn from_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: BTreeSet<String> = tags.into_iter().map(Into::into).collect();
        if tags.iter().any(|t| t.eq_ignore_ascii_case("any")) {
            DomainSupport::Any
        } else {
            DomainSupport::Only(tags)
        }
    }

    fn matches(&self, context_tags: &BTreeSet<String>) -> bool {
        match self {
            DomainSupport::Any => true,
            DomainSupport::Only(domains) => domains
                .iter()
                .any(|d| context_tags.iter().any(|tag| tag_matches(d, tag))),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum DomainRepr {
    Keyword(String),
    Tags(Vec<String>),
}

impl From<DomainRepr> for DomainSupport {
    fn from(repr: DomainRepr) -> Self {
        match repr {
            DomainRepr::Keyword(tag) => DomainSupport::from_tags([tag]),
            DomainRepr::Tags(tags) => DomainSupport::from_tags(tags),
        }
    }
}

impl From<DomainSupport> for DomainRepr {
    fn from(support: DomainSupport) -> Self {
        match support {
            DomainSupport::Any => DomainRepr::Keyword("any".to_string()),
            DomainSupport::Only(tags) => DomainRepr::Tags(tags.into_iter().collect()),
        }
    }
}

/// Complexity band a worker handles well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityRange {
    pub min: u8,
    pub max: u8,
    pub optimal: u8,
}

impl Default for ComplexityRange {
    fn default() -> Self {
        Self {
            min: MIN_COMPLEXITY,
            max: MAX_COMPLEXITY,
            optimal: 5,
        }
    }
}

impl ComplexityRange {
    pub fn new(min: u8, max: u8, optimal: u8) -> Self {
        Self { min, max, optimal }
    }

    pub fn contains(&self, complexity: u8) -> bool {
        (self.min..=self.max).contains(&complexity)
    }

    pub fn near_optimal(&self, complexity: u8) -> bool {
        complexity.abs_diff(self.optimal) <= 1
    }

    /// Check `min <= optimal <= max`.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.min > self.max {
            return Err(format!("min {} exceeds max {}", self.min, self.max));
        }
        if !self.contains(self.optimal) {
            return Err(format!(
                "optimal {} outside {}..={}",
                self.optimal, self.min, self.max
            ));
        }
        Ok(())
    }
}

/// Static description of a worker's capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerProfile {
    pub id: WorkerId,
    /// Capabilities matched against task type, requirements and context.
    #[serde(default)]
    pub primary: BTreeSet<String>,
    /// Capabilities matched against task requirements and type.
    #[serde(default)]
    pub secondary: BTreeSet<String>,
    #[serde(default)]
    pub domains: DomainSupport,
    /// Eligible as the fallback when nothing else matches.
    #[serde(default)]
    pub generalist: bool,
    #[serde(default)]
    pub complexity: ComplexityRange,
}

impl WorkerProfile {
    /// Create a profile with no capabilities, any domain and the full
    /// complexity range.
    pub fn new(id: impl Into<WorkerId>) -> Self {
        Self {
            id: id.into(),
            primary: BTreeSet::new(),
            secondary: BTreeSet::new(),
            domains: DomainSupport::Any,
            generalist: false,
            complexity: ComplexityRange::default(),
        }
    }

    pub fn with_primary<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_secondary<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.secondary.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_domains(mut self, domains: DomainSupport) -> Self {
        self.domains = domains;
        self
    }

    pub fn with_complexity(mut self, min: u8, max: u8, optimal: u8) -> Self {
        self.complexity = ComplexityRange::new(min, max, optimal);
        self
    }

    pub fn as_generalist(mut self) -> Self {
        self.generalist = true;
        self
    }
}

/// Rolling performance of one worker across attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub attempts: u64,
    pub completed: u64,
    pub failed: u64,
    #[serde(rename = "average_duration_ms", with = "crate::util::duration_ms")]
    pub average_duration: Duration,
    pub success_rate: f64,
}

impl Default for PerformanceStats {
    fn default() -> Self {
        Self {
            attempts: 0,
            completed: 0,
            failed: 0,
            average_duration: Duration::ZERO,
            success_rate: 1.0,
        }
    }
}

impl PerformanceStats {
    /// Fold one attempt into the running averages.
    pub fn record(&mut self, duration: Duration, success: bool) {
        let previous = self.attempts as f64;
        self.attempts += 1;
        if success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        let total = self.attempts as f64;
        let mean =
            (self.average_duration.as_secs_f64() * previous + duration.as_secs_f64()) / total;
        self.average_duration = Duration::try_from_secs_f64(mean).unwrap_or(Duration::MAX);
        self.success_rate = self.completed as f64 / total;
    }
}

/// Point-in-time view of a registered worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub profile: WorkerProfile,
    /// Tasks currently running on this worker.
    pub assigned: usize,
    pub stats: PerformanceStats,
}

/// Per-factor contributions to a score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub primary: f64,
    pub secondary: f64,
    pub domain: f64,
    pub complexity: f64,
    pub optimal_bonus: f64,
    /// Capability tags that matched, primary first.
    pub matched: Vec<String>,
}

impl ScoreBreakdown {
    /// Sum of all factors, clamped to 1.0.
    pub fn total(&self) -> f64 {
        let sum = self.primary + self.secondary + self.domain + self.complexity;
        (sum + self.optimal_bonus).min(1.0)
    }
}

/// Result of [`CapabilityRegistry::best_match`].
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    pub primary: WorkerId,
    /// Runner-up workers, best first, at most [`MAX_ALTERNATES`].
    pub alternates: Vec<WorkerId>,
    pub score: f64,
    /// Tags that drove the match; empty for a fallback.
    pub matched: Vec<String>,
    /// True when no worker passed the threshold and the generalist was used.
    pub fallback: bool,
}

#[derive(Debug, Default)]
struct WorkerState {
    assigned: usize,
    stats: PerformanceStats,
}

#[derive(Debug)]
struct WorkerEntry {
    profile: WorkerProfile,
    state: Mutex<WorkerState>,
}

/// Registry of worker profiles.
///
/// Shared by reference (usually in an `Arc`) between the assignment engine
/// and the executor; there is no process-wide instance.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    workers: RwLock<BTreeMap<WorkerId, Arc<WorkerEntry>>>,
    generalist: RwLock<Option<WorkerId>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with `profiles`.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateWorker` if two profiles share an id.
    pub fn with_profiles(profiles: impl IntoIterator<Item = WorkerProfile>) -> Result<Self> {
        let registry = Self::new();
        for profile in profiles {
            registry.register(profile)?;
        }
        Ok(registry)
    }

    /// Add a worker.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidWorker` if the complexity range is malformed,
    /// or `Error::DuplicateWorker` if the id is already registered.
    pub fn register(&self, profile: WorkerProfile) -> Result<()> {
        profile
            .complexity
            .validate()
            .map_err(|reason| Error::InvalidWorker {
                worker: profile.id.clone(),
                reason,
            })?;
        let mut workers = util::write(&self.workers);
        if workers.contains_key(&profile.id) {
            return Err(Error::DuplicateWorker(profile.id));
        }
        debug!(worker = %profile.id, generalist = profile.generalist, "worker registered");
        workers.insert(
            profile.id.clone(),
            Arc::new(WorkerEntry {
                profile,
                state: Mutex::new(WorkerState::default()),
            }),
        );
        Ok(())
    }

    /// Remove a worker, returning its profile.
    pub fn deregister(&self, id: &WorkerId) -> Result<WorkerProfile> {
        let entry = util::write(&self.workers)
            .remove(id)
            .ok_or_else(|| Error::WorkerNotFound(id.clone()))?;
        let mut generalist = util::write(&self.generalist);
        if generalist.as_ref() == Some(id) {
            *generalist = None;
        }
        debug!(worker = %id, "worker deregistered");
        Ok(entry.profile.clone())
    }

    /// Designate the fallback worker.
    ///
    /// Overrides any profile flagged `generalist`.
    pub fn set_generalist(&self, id: &WorkerId) -> Result<()> {
        if !util::read(&self.workers).contains_key(id) {
            return Err(Error::WorkerNotFound(id.clone()));
        }
        *util::write(&self.generalist) = Some(id.clone());
        Ok(())
    }

    /// The fallback worker: the designated one, else the first flagged
    /// profile by id.
    pub fn generalist(&self) -> Option<WorkerId> {
        if let Some(id) = util::read(&self.generalist).clone() {
            return Some(id);
        }
        util::read(&self.workers)
            .values()
            .find(|entry| entry.profile.generalist)
            .map(|entry| entry.profile.id.clone())
    }

    pub fn len(&self) -> usize {
        util::read(&self.workers).len()
    }

    pub fn is_empty(&self) -> bool {
        util::read(&self.workers).is_empty()
    }

    pub fn contains(&self, id: &WorkerId) -> bool {
        util::read(&self.workers).contains_key(id)
    }

    /// Registered worker ids in ascending order.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        util::read(&self.workers).keys().cloned().collect()
    }

    /// Fit of `profile` for `task` in [0, 1].
    pub fn score(profile: &WorkerProfile, task: &Task, context_tags: &BTreeSet<String>) -> f64 {
        Self::score_breakdown(profile, task, context_tags).total()
    }

    /// Per-factor scoring of `profile` against `task`.
    ///
    /// Each factor is all-or-nothing: a primary capability matching the
    /// task type, a requirement or a context tag; a secondary capability
    /// matching a requirement or the task type; a supported domain among
    /// the context tags; the task complexity inside the worker's range;
    /// and the bonus for being within one of the optimum.
    pub fn score_breakdown(
        profile: &WorkerProfile,
        task: &Task,
        context_tags: &BTreeSet<String>,
    ) -> ScoreBreakdown {
        let mut breakdown = ScoreBreakdown::default();

        let primary_targets = std::iter::once(&task.task_type)
            .chain(task.requirements.iter())
            .chain(context_tags.iter());
        let primary_hits: Vec<String> = profile
            .primary
            .iter()
            .filter(|cap| primary_targets.clone().any(|target| tag_matches(cap, target)))
            .cloned()
            .collect();
        if !primary_hits.is_empty() {
            breakdown.primary = PRIMARY_WEIGHT;
        }

        let secondary_hits: Vec<String> = profile
            .secondary
            .iter()
            .filter(|cap| {
                task.requirements.iter().any(|req| tag_matches(cap, req))
                    || tag_matches(cap, &task.task_type)
            })
            .cloned()
            .collect();
        if !secondary_hits.is_empty() {
            breakdown.secondary = SECONDARY_WEIGHT;
        }

        if profile.domains.matches(context_tags) {
            breakdown.domain = DOMAIN_WEIGHT;
        }
        if profile.complexity.contains(task.complexity) {
            breakdown.complexity = COMPLEXITY_WEIGHT;
        }
        if profile.complexity.near_optimal(task.complexity) {
            breakdown.optimal_bonus = OPTIMAL_BONUS;
        }

        breakdown.matched = primary_hits;
        breakdown.matched.extend(secondary_hits);
        breakdown
    }

    /// Best worker for `task` plus up to three alternates.
    ///
    /// Candidates scoring above [`MATCH_THRESHOLD`] are ranked by score,
    /// then by fewest running tasks, then by id. With no candidate the
    /// generalist is returned at [`FALLBACK_CONFIDENCE`].
    ///
    /// # Errors
    ///
    /// Returns `Error::NoEligibleWorker` when nothing passes the threshold
    /// and no generalist exists.
    pub fn best_match(&self, task: &Task, context_tags: &BTreeSet<String>) -> Result<BestMatch> {
        {
            let workers = util::read(&self.workers);

            let mut candidates: Vec<(f64, usize, &WorkerId, ScoreBreakdown)> = workers
                .values()
                .filter_map(|entry| {
                    let breakdown = Self::score_breakdown(&entry.profile, task, context_tags);
                    let score = breakdown.total();
                    (score > MATCH_THRESHOLD).then(|| {
                        let assigned = util::lock(&entry.state).assigned;
                        (score, assigned, &entry.profile.id, breakdown)
                    })
                })
                .collect();

            candidates.sort_by(|a, b| {
                b.0.total_cmp(&a.0)
                    .then(a.1.cmp(&b.1))
                    .then_with(|| a.2.cmp(b.2))
            });

            let mut ranked = candidates.into_iter();
            if let Some((score, _, id, breakdown)) = ranked.next() {
                let alternates = ranked
                    .take(MAX_ALTERNATES)
                    .map(|(_, _, alt, _)| alt.clone())
                    .collect();
                return Ok(BestMatch {
                    primary: id.clone(),
                    alternates,
                    score,
                    matched: breakdown.matched,
                    fallback: false,
                });
            }
        }

        match self.generalist() {
            Some(primary) => {
                debug!(task = %task.id, worker = %primary, "falling back to generalist");
                Ok(BestMatch {
                    primary,
                    alternates: Vec::new(),
                    score: FALLBACK_CONFIDENCE,
                    matched: Vec::new(),
                    fallback: true,
                })
            }
            None => Err(Error::NoEligibleWorker {
                task: task.id.clone(),
            }),
        }
    }

    /// Mark a task as started on `worker`.
    pub fn begin_task(&self, worker: &WorkerId, task: &TaskId) -> Result<()> {
        let entry = self.entry(worker)?;
        let mut state = util::lock(&entry.state);
        state.assigned += 1;
        debug!(worker = %worker, task = %task, assigned = state.assigned, "worker load increased");
        Ok(())
    }

    /// Mark a task attempt as settled on `worker` and record its outcome.
    pub fn finish_task(&self, worker: &WorkerId, duration: Duration, success: bool) -> Result<()> {
        let entry = self.entry(worker)?;
        let mut state = util::lock(&entry.state);
        if state.assigned == 0 {
            warn!(worker = %worker, "finish_task without matching begin_task");
        }
        state.assigned = state.assigned.saturating_sub(1);
        state.stats.record(duration, success);
        Ok(())
    }

    /// Profile, load and stats of one worker.
    pub fn snapshot(&self, id: &WorkerId) -> Option<WorkerSnapshot> {
        let entry = self.entry(id).ok()?;
        let state = util::lock(&entry.state);
        Some(WorkerSnapshot {
            profile: entry.profile.clone(),
            assigned: state.assigned,
            stats: state.stats.clone(),
        })
    }

    fn entry(&self, id: &WorkerId) -> Result<Arc<WorkerEntry>> {
        util::read(&self.workers)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::WorkerNotFound(id.clone()))
    }
}

/// Case-insensitive capability match against a tag.
///
/// A capability matches when it equals the whole tag or one of the tag's
/// tokens split on `-`, `_`, `.` or whitespace.
pub fn tag_matches(capability: &str, tag: &str) -> bool {
    if capability.eq_ignore_ascii_case(tag) {
        return true;
    }
    tag.split(|c: char| c == '-' || c == '_' || c == '.' || c.is_whitespace())
        .any(|token| !token.is_empty() && token.eq_ignore_ascii_case(capability))
}
