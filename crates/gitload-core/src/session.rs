//! One clone, driven as an explicit state machine.
//!
//! ```text
//! Connecting -> AdvertisementReceived -> NegotiationSent -> Streaming -> Done
//!      \               \                      \               \
//!       +---------------+----------------------+---------------+--> Failed
//! ```
//!
//! Each [`CloneSession::step`] consumes the current state and returns the
//! next one or the error that ended the session. The driver folds errors into
//! [`SessionState::Failed`], so nothing escapes a session except its
//! [`CloneResult`].

use crate::config::Timeouts;
use crate::error::{LoadError, Result};
use crate::metrics::{ActivityGauge, CloneResult};
use crate::progress::{ClonePhase, Observers};
use crate::transport::Transport;
use gitload_protocol::{NegotiationRequest, PackSink, PackStreamStats, RefAdvertisement, SideBand};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Where a session is.
#[derive(Debug)]
pub enum SessionState {
    /// Opening the transport.
    Connecting,
    /// The ref advertisement has been parsed.
    AdvertisementReceived(RefAdvertisement),
    /// The want request has been sent.
    NegotiationSent(SideBand),
    /// Receiving the pack response.
    Streaming(PackSink),
    /// The pack was received completely.
    Done(PackStreamStats),
    /// The session failed.
    Failed(LoadError),
}

impl SessionState {
    /// Short state name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::AdvertisementReceived(_) => "advertisement-received",
            Self::NegotiationSent(_) => "negotiation-sent",
            Self::Streaming(_) => "streaming",
            Self::Done(_) => "done",
            Self::Failed(_) => "failed",
        }
    }

    /// Returns true for `Done` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed(_))
    }
}

/// A single clone over an exclusively owned transport.
pub struct CloneSession {
    index: usize,
    transport: Box<dyn Transport>,
    timeouts: Timeouts,
    observers: Observers,
    gauge: Arc<ActivityGauge>,
    bytes: u64,
}

impl CloneSession {
    /// Creates a session for clone `index` over `transport`.
    pub fn new(index: usize, transport: Box<dyn Transport>, timeouts: Timeouts) -> Self {
        Self {
            index,
            transport,
            timeouts,
            observers: Observers::default(),
            gauge: Arc::new(ActivityGauge::new()),
            bytes: 0,
        }
    }

    /// Reports progress and results through `observers`.
    pub fn with_observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    /// Counts this session in `gauge` while it streams.
    pub fn with_gauge(mut self, gauge: Arc<ActivityGauge>) -> Self {
        self.gauge = gauge;
        self
    }

    /// Runs the clone to a terminal state and returns its result.
    ///
    /// The transport is closed afterwards whatever the outcome. If `cancel`
    /// fires first, the in-flight step is dropped and the result is a
    /// `Cancelled` failure.
    pub async fn run(mut self, cancel: &CancellationToken) -> CloneResult {
        let started = Instant::now();
        self.observers.progress(self.index, ClonePhase::Starting, 0);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => SessionState::Failed(LoadError::Cancelled),
            state = self.drive() => state,
        };

        self.close().await;
        let duration = started.elapsed();

        let result = match outcome {
            SessionState::Done(stats) => {
                CloneResult::success(self.index, stats.bytes_received, duration)
            }
            SessionState::Failed(err) => {
                CloneResult::failure(self.index, self.bytes, duration, &err)
            }
            other => CloneResult::failure(
                self.index,
                self.bytes,
                duration,
                &LoadError::Internal(format!("session stopped in state {}", other.name())),
            ),
        };

        let phase = if result.is_success() {
            ClonePhase::Complete
        } else {
            ClonePhase::Failed
        };
        self.observers.progress(self.index, phase, result.bytes_received);
        result
    }

    async fn drive(&mut self) -> SessionState {
        let mut state = SessionState::Connecting;
        while !state.is_terminal() {
            let from = state.name();
            state = match self.step(state).await {
                Ok(next) => next,
                Err(err) => SessionState::Failed(err),
            };
            debug!(index = self.index, from, to = state.name(), "session transition");
        }
        state
    }

    /// Performs the transition out of `state`.
    pub async fn step(&mut self, state: SessionState) -> Result<SessionState> {
        let idle = self.timeouts.idle;
        match state {
            SessionState::Connecting => {
                self.transport.open().await?;
                let adv = self.transport.read_advertisement(idle).await?;
                debug!(
                    index = self.index,
                    refs = adv.len(),
                    head = adv.head_target().unwrap_or("-"),
                    "ref advertisement received"
                );
                Ok(SessionState::AdvertisementReceived(adv))
            }
            SessionState::AdvertisementReceived(adv) => {
                let (name, id) = adv.default_ref()?;
                let request = NegotiationRequest::for_clone(&adv)?;
                debug!(
                    index = self.index,
                    refname = name,
                    want = %id,
                    capabilities = %request.capabilities().join(" "),
                    "sending want request"
                );
                tokio::time::timeout(idle, self.transport.send_request(&request))
                    .await
                    .map_err(|_| LoadError::Timeout(format!("request not sent within {idle:?}")))??;
                Ok(SessionState::NegotiationSent(request.side_band()))
            }
            SessionState::NegotiationSent(side_band) => {
                self.observers.progress(self.index, ClonePhase::Downloading, 0);
                Ok(SessionState::Streaming(PackSink::new(side_band)))
            }
            SessionState::Streaming(mut sink) => {
                let _active = self.gauge.enter();
                let index = self.index;
                let observers = &self.observers;
                let bytes = &mut self.bytes;
                let mut on_progress = |received: u64| {
                    *bytes = received;
                    observers.progress(index, ClonePhase::Downloading, received);
                };
                let stats = self
                    .transport
                    .stream_response(&mut sink, idle, &mut on_progress)
                    .await?;
                trace!(
                    index,
                    progress_bytes = stats.progress_bytes,
                    "side-band progress total"
                );
                Ok(SessionState::Done(stats))
            }
            terminal @ (SessionState::Done(_) | SessionState::Failed(_)) => Ok(terminal),
        }
    }

    async fn close(&mut self) {
        match tokio::time::timeout(self.timeouts.connect, self.transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(index = self.index, error = %e, "error closing transport"),
            Err(_) => debug!(index = self.index, "transport close timed out"),
        }
    }
}
