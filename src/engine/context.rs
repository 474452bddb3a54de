//! Build-scoped execution settings and counters

use std::path::{Path, PathBuf};

use crate::domain::FailurePolicy;

/// Settings for one `execute` call
///
/// Created per build and passed by reference; nothing here outlives the run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    out_dir: PathBuf,
    jobs: usize,
    cache_enabled: bool,
    force_regenerate: bool,
    failure_policy: FailurePolicy,
    executed: usize,
    skipped: usize,
}

impl ExecutionContext {
    /// `jobs` is clamped to at least one worker
    pub fn new(out_dir: impl Into<PathBuf>, jobs: usize) -> Self {
        Self {
            out_dir: out_dir.into(),
            jobs: jobs.max(1),
            cache_enabled: true,
            force_regenerate: false,
            failure_policy: FailurePolicy::default(),
            executed: 0,
            skipped: 0,
        }
    }

    /// When off, the cache is neither consulted nor updated
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Re-run every non-media task regardless of cache state
    pub fn with_force_regenerate(mut self, force: bool) -> Self {
        self.force_regenerate = force;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    pub fn force_regenerate(&self) -> bool {
        self.force_regenerate
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn executed(&self) -> usize {
        self.executed
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub(crate) fn record_executed(&mut self) {
        self.executed += 1;
    }

    pub(crate) fn record_skipped(&mut self) {
        self.skipped += 1;
    }
}

/// Worker count when neither `--jobs` nor `build.jobs` is set
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
