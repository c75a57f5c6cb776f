//! Runs N clone sessions with at most C in flight.
//!
//! Admission is gated by a semaphore: a session is spawned only after it
//! holds a permit, and the permit is released when the session's task ends.
//! Results are merged into one [`AggregateMetrics`] behind a mutex, so totals
//! are exact under any completion order.

use crate::config::RunConfig;
use crate::credentials::CredentialProvider;
use crate::error::{LoadError, Result};
use crate::metrics::{ActivityGauge, AggregateMetrics, CloneResult, RunReport};
use crate::progress::Observers;
use crate::remote::RemoteUrl;
use crate::session::CloneSession;
use crate::transport::{RemoteTransportFactory, TransportFactory};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Schedules clone sessions and aggregates their results.
pub struct LoadOrchestrator {
    config: RunConfig,
    factory: Arc<dyn TransportFactory>,
    observers: Observers,
    cancel: CancellationToken,
}

impl LoadOrchestrator {
    /// Creates an orchestrator, rejecting invalid configuration.
    pub fn new(config: RunConfig, factory: Arc<dyn TransportFactory>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            factory,
            observers: Observers::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// Creates an orchestrator that clones `remote` over HTTPS or SSH.
    pub fn for_remote(
        config: RunConfig,
        remote: RemoteUrl,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let factory = RemoteTransportFactory::new(
            remote,
            config.timeouts,
            config.user_agent.clone(),
            credentials,
        );
        Self::new(config, Arc::new(factory))
    }

    /// Reports progress and results through `observers`.
    pub fn with_observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    /// Token that cancels the run when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs every session and returns the final report.
    ///
    /// Session failures are counted, never propagated. After cancellation no
    /// further sessions are admitted and in-flight ones end as `Cancelled`.
    pub async fn run(&self) -> RunReport {
        let count = self.config.count;
        let concurrency = self.config.concurrency;
        info!(count, concurrency, "starting load run");

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let metrics = Arc::new(Mutex::new(AggregateMetrics::default()));
        let gauge = Arc::new(ActivityGauge::new());
        let mut tasks = JoinSet::new();
        let mut indices = HashMap::with_capacity(count);
        let started = Instant::now();

        for index in 1..=count {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let transport = self.factory.create(index);
            let session = CloneSession::new(index, transport, self.config.timeouts)
                .with_observers(self.observers.clone())
                .with_gauge(Arc::clone(&gauge));
            let cancel = self.cancel.clone();
            let metrics = Arc::clone(&metrics);
            let observers = self.observers.clone();
            let verbose = self.config.verbose;

            let handle = tasks.spawn(async move {
                let _permit = permit;
                let result = session.run(&cancel).await;
                record(&metrics, &observers, &result, verbose);
            });
            indices.insert(handle.id(), index);
        }

        if self.cancel.is_cancelled() {
            info!(admitted = indices.len(), "run cancelled, draining sessions");
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                let index = indices.get(&err.id()).copied().unwrap_or_default();
                let failure = LoadError::Internal(format!("session task failed: {err}"));
                let result = CloneResult::failure(index, 0, Duration::ZERO, &failure);
                record(&metrics, &self.observers, &result, true);
            }
        }

        let wall_clock = started.elapsed();
        let metrics = metrics.lock().clone();
        let report = RunReport {
            count,
            cancelled: metrics.cancelled_count > 0 || metrics.completed() < count,
            metrics,
            wall_clock,
            peak_streaming: gauge.peak(),
        };
        info!(
            succeeded = report.metrics.success_count,
            failed = report.metrics.fail_count,
            cancelled = report.metrics.cancelled_count,
            bytes = report.metrics.total_bytes,
            elapsed = ?wall_clock,
            "load run finished"
        );
        report
    }
}

fn record(
    metrics: &Mutex<AggregateMetrics>,
    observers: &Observers,
    result: &CloneResult,
    verbose: bool,
) {
    metrics.lock().merge(result);

    match &result.error {
        None => debug!(
            index = result.index,
            bytes = result.bytes_received,
            elapsed = ?result.duration,
            "clone complete"
        ),
        Some(failure) if verbose => warn!(
            index = result.index,
            kind = %failure.kind,
            error = %failure.message,
            "clone failed"
        ),
        Some(failure) => debug!(
            index = result.index,
            kind = %failure.kind,
            error = %failure.message,
            "clone failed"
        ),
    }

    observers.result(result);
}
