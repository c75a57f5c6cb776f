//! Progress reporting for load runs.

use crate::metrics::CloneResult;
use std::sync::Arc;

/// Callback type for per-session progress updates.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Callback type for finished clones, invoked once per result.
pub type ResultCallback = Arc<dyn Fn(&CloneResult) + Send + Sync>;

/// Progress of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// 1-based clone number.
    pub index: usize,

    /// Where the session is.
    pub phase: ClonePhase,

    /// Pack bytes received so far.
    pub bytes: u64,
}

/// Coarse session phases shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClonePhase {
    /// Connecting and reading the advertisement.
    Starting,
    /// Receiving the pack.
    Downloading,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Failed,
}

impl std::fmt::Display for ClonePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "Starting"),
            Self::Downloading => write!(f, "Downloading"),
            Self::Complete => write!(f, "Complete"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Bundles the optional callbacks a run reports through.
#[derive(Clone, Default)]
pub struct Observers {
    pub(crate) progress: Option<ProgressCallback>,
    pub(crate) result: Option<ResultCallback>,
}

impl Observers {
    /// No callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the progress callback.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Sets the result callback.
    pub fn with_result(mut self, callback: ResultCallback) -> Self {
        self.result = Some(callback);
        self
    }

    pub(crate) fn progress(&self, index: usize, phase: ClonePhase, bytes: u64) {
        if let Some(callback) = &self.progress {
            callback(ProgressUpdate { index, phase, bytes });
        }
    }

    pub(crate) fn result(&self, result: &CloneResult) {
        if let Some(callback) = &self.result {
            callback(result);
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("progress", &self.progress.is_some())
            .field("result", &self.result.is_some())
            .finish()
    }
}
