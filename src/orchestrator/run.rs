use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::types::PhaseResult;

/// Files the current run's agent has created or edited.
///
/// Cloning shares the set: the orchestrator, the process driver and the
/// permission gateway all see the same paths. Only absolute paths are
/// accepted and nothing is ever removed.
#[derive(Debug, Clone, Default)]
pub struct TrackedFiles {
    inner: Arc<RwLock<BTreeSet<PathBuf>>>,
}

impl TrackedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path. Relative paths are rejected; returns whether it was new.
    pub fn insert(&self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if !path.is_absolute() {
            tracing::debug!(path = %path.display(), "Ignoring relative tracked path");
            return false;
        }
        let mut set = self.inner.write().unwrap_or_else(|e| e.into_inner());
        set.insert(path)
    }

    pub fn extend<I>(&self, paths: I)
    where
        I: IntoIterator,
        I::Item: Into<PathBuf>,
    {
        for path in paths {
            self.insert(path);
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        let set = self.inner.read().unwrap_or_else(|e| e.into_inner());
        set.contains(path)
    }

    /// True when `paths` is non-empty and every entry is tracked.
    pub fn contains_all(&self, paths: &[PathBuf]) -> bool {
        if paths.is_empty() {
            return false;
        }
        let set = self.inner.read().unwrap_or_else(|e| e.into_inner());
        paths.iter().all(|p| set.contains(p))
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State owned by one `execute()` call.
#[derive(Debug, Default)]
pub struct OrchestrationRun {
    pub tracked: TrackedFiles,
    pub fix_iterations: u32,
    pub planning_retries: u32,
    results: Vec<PhaseResult>,
}

impl OrchestrationRun {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a phase result. Nothing may follow a failed phase.
    pub fn record(&mut self, result: PhaseResult) {
        debug_assert!(
            !self.has_failed(),
            "phase recorded after a failed phase"
        );
        if self.has_failed() {
            tracing::error!(role = %result.role, "Dropping phase result recorded after a failure");
            return;
        }
        self.results.push(result);
    }

    pub fn results(&self) -> &[PhaseResult] {
        &self.results
    }

    pub fn has_failed(&self) -> bool {
        self.results.iter().any(|r| r.failed)
    }

    pub fn into_results(self) -> Vec<PhaseResult> {
        self.results
    }
}
