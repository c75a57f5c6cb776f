//! Per-clone results and run-wide aggregates.

use crate::error::{ErrorKind, LoadError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Why a clone failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloneFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of one clone. Produced once, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct CloneResult {
    /// 1-based clone number.
    pub index: usize,
    /// Pack bytes received (partial for failures).
    pub bytes_received: u64,
    /// Time from connect to completion or failure.
    pub duration: Duration,
    /// Set when the clone failed.
    pub error: Option<CloneFailure>,
}

impl CloneResult {
    /// A successful clone.
    pub fn success(index: usize, bytes_received: u64, duration: Duration) -> Self {
        Self {
            index,
            bytes_received,
            duration,
            error: None,
        }
    }

    /// A failed clone.
    pub fn failure(index: usize, bytes_received: u64, duration: Duration, err: &LoadError) -> Self {
        Self {
            index,
            bytes_received,
            duration,
            error: Some(CloneFailure {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }

    /// Returns true if the clone completed.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Failure kind, if any.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Totals over every merged result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateMetrics {
    /// Pack bytes over successful clones.
    pub total_bytes: u64,
    pub success_count: usize,
    /// Failed clones, cancellations excluded.
    pub fail_count: usize,
    /// Clones interrupted by run cancellation.
    pub cancelled_count: usize,
    /// Sum of per-clone durations.
    pub total_clone_duration: Duration,
    /// Failures (and cancellations) by kind.
    pub failures_by_kind: BTreeMap<ErrorKind, usize>,
}

impl AggregateMetrics {
    /// Folds one result into the totals.
    pub fn merge(&mut self, result: &CloneResult) {
        self.total_clone_duration += result.duration;
        match result.error_kind() {
            None => {
                self.success_count += 1;
                self.total_bytes += result.bytes_received;
            }
            Some(kind) => {
                if kind == ErrorKind::Cancelled {
                    self.cancelled_count += 1;
                } else {
                    self.fail_count += 1;
                }
                *self.failures_by_kind.entry(kind).or_default() += 1;
            }
        }
    }

    /// Number of merged results.
    pub fn completed(&self) -> usize {
        self.success_count + self.fail_count + self.cancelled_count
    }
}

/// Counts sessions currently streaming a pack and remembers the peak.
#[derive(Debug, Default)]
pub struct ActivityGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ActivityGauge {
    /// Creates a gauge at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks one session as streaming until the guard is dropped.
    pub fn enter(&self) -> ActivityGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActivityGuard { gauge: self }
    }

    /// Sessions streaming right now.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest concurrent streaming count seen.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Decrements the gauge on drop.
pub struct ActivityGuard<'a> {
    gauge: &'a ActivityGauge,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Final report for a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Clones requested.
    pub count: usize,
    /// Merged totals.
    #[serde(flatten)]
    pub metrics: AggregateMetrics,
    /// Wall-clock duration of the whole run.
    pub wall_clock: Duration,
    /// Most sessions seen streaming at once.
    pub peak_streaming: usize,
    /// True if the run was cancelled before all clones finished.
    pub cancelled: bool,
}

impl RunReport {
    /// Pack bytes per second of wall-clock time.
    pub fn throughput_bytes_per_sec(&self) -> f64 {
        let secs = self.wall_clock.as_secs_f64();
        if secs > 0.0 {
            self.metrics.total_bytes as f64 / secs
        } else {
            0.0
        }
    }

    /// Mean per-clone duration over completed clones.
    pub fn mean_clone_duration(&self) -> Duration {
        match u32::try_from(self.metrics.completed()) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.metrics.total_clone_duration / n,
        }
    }

    /// True if every requested clone succeeded.
    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.metrics.success_count == self.count
    }
}
