//! Orchestrator tests over scripted transports.
//!
//! - Exact totals under randomized completion order
//! - Concurrency bound on streaming sessions and open connections
//! - Cancellation

mod common;

use common::{Script, ScriptedFactory};
use gitload_core::{
    ClonePhase, CloneResult, ErrorKind, LoadOrchestrator, Observers, ProgressUpdate, RunConfig,
    Timeouts,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn pack_len(index: usize) -> usize {
    1_000 + index * 37
}

/// Every fifth clone fails; the rest succeed with a size derived from the
/// index.
fn mixed_script(index: usize) -> Script {
    if index % 5 == 0 {
        Script::RefuseConnection
    } else {
        Script::Clone {
            pack_len: pack_len(index),
        }
    }
}

fn config(count: usize, concurrency: usize) -> RunConfig {
    RunConfig {
        count,
        concurrency,
        ..RunConfig::default()
    }
}

// ============================================================================
// Exactness
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_totals_are_exact_under_random_interleaving() {
    let expected_bytes: u64 = (1..=50)
        .filter(|i| i % 5 != 0)
        .map(|i| pack_len(i) as u64)
        .sum();

    for _ in 0..100 {
        let factory = Arc::new(ScriptedFactory::new(mixed_script, true));
        let counter = Arc::clone(&factory.counter);
        let orchestrator = LoadOrchestrator::new(config(50, 5), factory).unwrap();

        let report = orchestrator.run().await;

        assert_eq!(report.metrics.success_count, 40);
        assert_eq!(report.metrics.fail_count, 10);
        assert_eq!(report.metrics.cancelled_count, 0);
        assert_eq!(report.metrics.total_bytes, expected_bytes);
        assert_eq!(report.metrics.failures_by_kind[&ErrorKind::Transport], 10);
        assert!(report.peak_streaming <= 5, "peak {}", report.peak_streaming);
        assert!(counter.peak() <= 5, "peak connections {}", counter.peak());
        assert_eq!(counter.open(), 0);
        assert!(!report.all_succeeded());
        assert!(!report.cancelled);
    }
}

#[tokio::test]
async fn test_all_successful_run() {
    let factory = Arc::new(ScriptedFactory::new(
        |_| Script::Clone { pack_len: 100_000 },
        false,
    ));
    let orchestrator = LoadOrchestrator::new(config(12, 3), factory).unwrap();

    let report = orchestrator.run().await;

    assert!(report.all_succeeded());
    assert_eq!(report.metrics.total_bytes, 1_200_000);
    assert_eq!(report.metrics.completed(), 12);
    assert!(report.metrics.failures_by_kind.is_empty());
}

#[tokio::test]
async fn test_concurrency_larger_than_count() {
    let factory = Arc::new(ScriptedFactory::new(
        |_| Script::Clone { pack_len: 10 },
        false,
    ));
    let orchestrator = LoadOrchestrator::new(config(2, 64), factory).unwrap();

    let report = orchestrator.run().await;

    assert_eq!(report.metrics.success_count, 2);
    assert!(report.peak_streaming <= 2);
}

// ============================================================================
// Callbacks
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_result_callback_sees_every_clone_once() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let progress = Arc::new(Mutex::new(Vec::new()));
    let results = Arc::clone(&seen);
    let updates = Arc::clone(&progress);
    let observers = Observers::new()
        .with_result(Arc::new(move |result: &CloneResult| results.lock().push(result.index)))
        .with_progress(Arc::new(move |update: ProgressUpdate| updates.lock().push(update)));

    let factory = Arc::new(ScriptedFactory::new(mixed_script, true));
    let orchestrator = LoadOrchestrator::new(config(20, 4), factory)
        .unwrap()
        .with_observers(observers);
    orchestrator.run().await;

    let seen = seen.lock();
    let unique: HashSet<usize> = seen.iter().copied().collect();
    assert_eq!(seen.len(), 20);
    assert_eq!(unique, (1..=20).collect());

    let progress = progress.lock();
    let complete = progress
        .iter()
        .filter(|u| u.phase == ClonePhase::Complete)
        .count();
    let failed = progress
        .iter()
        .filter(|u| u.phase == ClonePhase::Failed)
        .count();
    assert_eq!(complete, 16);
    assert_eq!(failed, 4);
    assert!(progress
        .iter()
        .filter(|u| u.phase == ClonePhase::Complete)
        .all(|u| u.bytes == pack_len(u.index) as u64));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_stops_admission_and_closes_connections() {
    let factory = Arc::new(ScriptedFactory::new(|_| Script::Stall, false));
    let counter = Arc::clone(&factory.counter);
    let orchestrator = LoadOrchestrator::new(config(20, 4), factory).unwrap();
    let token = orchestrator.cancellation_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });
    let report = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
        .await
        .expect("run should end promptly after cancellation");

    assert!(report.cancelled);
    assert_eq!(report.metrics.cancelled_count, 4);
    assert_eq!(report.metrics.success_count, 0);
    assert_eq!(report.metrics.fail_count, 0);
    assert_eq!(counter.total_opened(), 4);
    assert_eq!(counter.total_closed(), 4);
    assert_eq!(counter.open(), 0);
}

#[tokio::test]
async fn test_idle_timeout_fails_stalled_sessions() {
    let factory = Arc::new(ScriptedFactory::new(
        |index| {
            if index == 2 {
                Script::Stall
            } else {
                Script::Clone { pack_len: 64 }
            }
        },
        false,
    ));
    let config = RunConfig {
        timeouts: Timeouts {
            connect: Duration::from_secs(1),
            idle: Duration::from_millis(50),
        },
        ..config(3, 3)
    };
    let orchestrator = LoadOrchestrator::new(config, factory).unwrap();

    let report = orchestrator.run().await;

    assert_eq!(report.metrics.success_count, 2);
    assert_eq!(report.metrics.fail_count, 1);
    assert_eq!(report.metrics.failures_by_kind[&ErrorKind::Timeout], 1);
}
