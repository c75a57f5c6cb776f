//! The load run command.

use crate::display::ConsoleReporter;
use crate::summary;
use anyhow::Context;
use gitload_core::{
    LoadOrchestrator, RemoteUrl, RunConfig, RunReport, StandardCredentials, Timeouts,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Exit code for a run interrupted with Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

/// Parsed command-line options.
#[derive(Debug, Clone)]
pub struct Options {
    pub url: String,
    pub count: usize,
    pub concurrency: usize,
    pub verbose: bool,
    pub progress: bool,
    pub json: bool,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every clone succeeded.
    Success,
    /// At least one clone failed.
    Failures,
    /// The user interrupted the run.
    Interrupted,
}

impl Outcome {
    pub fn from_report(report: &RunReport, interrupted: bool) -> Self {
        if interrupted {
            Self::Interrupted
        } else if report.all_succeeded() {
            Self::Success
        } else {
            Self::Failures
        }
    }

    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Success => ExitCode::SUCCESS,
            Self::Failures => ExitCode::FAILURE,
            Self::Interrupted => ExitCode::from(EXIT_INTERRUPTED),
        }
    }
}

/// Runs the load test described by `options` and prints its summary.
pub async fn execute(options: Options) -> anyhow::Result<Outcome> {
    let remote = RemoteUrl::parse(&options.url).context("invalid repository URL")?;

    let config = RunConfig {
        count: options.count,
        concurrency: options.concurrency,
        verbose: options.verbose,
        timeouts: Timeouts {
            connect: options.connect_timeout,
            idle: options.idle_timeout,
        },
        ..RunConfig::default()
    };

    if !options.json {
        println!("Git Load Tester starting...");
        println!("URL: {remote}");
        println!("Concurrency: {}", config.concurrency);
        println!("Count: {}", config.count);
        println!();
        println!("Detected protocol: {}", remote.kind());
        println!();
    }

    let reporter = Arc::new(ConsoleReporter::new(
        config.count,
        options.verbose,
        options.progress,
        options.json,
    ));
    let orchestrator =
        LoadOrchestrator::for_remote(config, remote, Arc::new(StandardCredentials::new()))?
            .with_observers(reporter.observers());

    let token = orchestrator.cancellation_token();
    let interrupt = tokio::spawn({
        let token = token.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => token.cancel(),
                Err(e) => tracing::warn!(error = %e, "unable to listen for Ctrl-C"),
            }
        }
    });

    let report = orchestrator.run().await;
    interrupt.abort();
    reporter.finish();

    let interrupted = token.is_cancelled();
    if interrupted {
        eprintln!("\nInterrupted by user.");
    }

    if options.json {
        println!("{}", summary::to_json(&report)?);
    } else {
        println!();
        print!("{}", summary::render(&report));
    }

    Ok(Outcome::from_report(&report, interrupted))
}
