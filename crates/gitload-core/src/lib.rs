//! Load generation engine for git-load-tester.
//!
//! A run clones one repository N times with at most C clones in flight,
//! over smart HTTP or SSH, and reports exact aggregate metrics. Pack data is
//! counted and discarded; nothing is written to disk.
//!
//! # Example
//!
//! ```no_run
//! use gitload_core::{LoadOrchestrator, RemoteUrl, RunConfig, StandardCredentials};
//! use std::sync::Arc;
//!
//! # async fn example() -> gitload_core::Result<()> {
//! let remote = RemoteUrl::parse("https://github.com/rust-lang/log")?;
//! let config = RunConfig { count: 20, concurrency: 4, ..RunConfig::default() };
//! let orchestrator =
//!     LoadOrchestrator::for_remote(config, remote, Arc::new(StandardCredentials::new()))?;
//! let report = orchestrator.run().await;
//! println!("{} of {} clones succeeded", report.metrics.success_count, report.count);
//! # Ok(())
//! # }
//! ```

mod config;
mod credentials;
mod error;
mod metrics;
mod orchestrator;
mod progress;
mod remote;
mod session;
mod transport;

pub use config::{RunConfig, Timeouts, USER_AGENT};
pub use credentials::{CredentialProvider, Identity, StandardCredentials, StaticCredentials};
pub use error::{ErrorKind, LoadError, Result};
pub use metrics::{ActivityGauge, AggregateMetrics, CloneFailure, CloneResult, RunReport};
pub use orchestrator::LoadOrchestrator;
pub use progress::{ClonePhase, Observers, ProgressCallback, ProgressUpdate, ResultCallback};
pub use remote::{RemoteUrl, SshTarget, TransportKind};
pub use session::{CloneSession, SessionState};
pub use transport::{
    HttpsTransport, RemoteTransportFactory, SshTransport, Transport, TransportFactory,
};
