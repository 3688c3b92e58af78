//! Registry of in-flight runs.
//!
//! Every run registers itself when it starts and is removed when it ends,
//! whether it succeeds, fails, or its request future is dropped. While it is
//! registered it can be listed and cancelled.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use super::types::{RunInfo, Stage};

/// One in-flight run.
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub info: RunInfo,
    pub cancel: CancellationToken,
}

/// Trait for run registry operations.
///
/// Implementations must be thread-safe (`Send + Sync`). The default
/// implementation uses `DashMap` for lock-free concurrent access.
pub trait RunStorage: Send + Sync {
    fn register(&self, run: ActiveRun);

    fn unregister(&self, run_id: &str) -> Option<ActiveRun>;

    fn get(&self, run_id: &str) -> Option<RunInfo>;

    /// All in-flight runs, oldest first.
    fn list(&self) -> Vec<RunInfo>;

    fn set_stage(&self, run_id: &str, stage: Stage);

    /// Signal cancellation. Returns `false` for unknown runs.
    fn cancel(&self, run_id: &str) -> bool;

    fn count(&self) -> usize;
}

/// DashMap-based implementation of [`RunStorage`].
#[derive(Debug, Default)]
pub struct DashMapRunStorage {
    runs: DashMap<String, ActiveRun>,
}

impl DashMapRunStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStorage for DashMapRunStorage {
    fn register(&self, run: ActiveRun) {
        self.runs.insert(run.info.run_id.clone(), run);
    }

    fn unregister(&self, run_id: &str) -> Option<ActiveRun> {
        self.runs.remove(run_id).map(|(_, run)| run)
    }

    fn get(&self, run_id: &str) -> Option<RunInfo> {
        self.runs.get(run_id).map(|entry| entry.info.clone())
    }

    fn list(&self) -> Vec<RunInfo> {
        let mut runs: Vec<RunInfo> = self.runs.iter().map(|entry| entry.info.clone()).collect();
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        runs
    }

    fn set_stage(&self, run_id: &str, stage: Stage) {
        if let Some(mut entry) = self.runs.get_mut(run_id) {
            entry.info.stage = stage;
        }
    }

    fn cancel(&self, run_id: &str) -> bool {
        match self.runs.get(run_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn count(&self) -> usize {
        self.runs.len()
    }
}

/// Tracks one run's stage in the registry and removes the run when dropped.
pub struct RunGuard {
    storage: Arc<dyn RunStorage>,
    run_id: String,
    stage: Stage,
}

impl RunGuard {
    pub fn register(storage: Arc<dyn RunStorage>, run: ActiveRun) -> Self {
        let run_id = run.info.run_id.clone();
        let stage = run.info.stage;
        storage.register(run);
        Self {
            storage,
            run_id,
            stage,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to the next stage after a successful transition.
    pub fn advance(&mut self) -> Stage {
        self.stage = self.stage.next();
        self.storage.set_stage(&self.run_id, self.stage);
        self.stage
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.storage.unregister(&self.run_id);
    }
}
