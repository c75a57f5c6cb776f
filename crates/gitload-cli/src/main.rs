//! git-load-tester - clone a repository many times to load-test a Git server.

use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod display;
mod run;
mod summary;

/// Clone a Git repository N times with bounded concurrency over HTTPS or SSH.
#[derive(Parser, Debug)]
#[command(name = "git-load-tester")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Repository URL (https://host/repo, ssh://user@host/repo or user@host:repo)
    url: String,

    /// Maximum number of concurrent clones
    #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    concurrency: u32,

    /// Total number of clones to perform
    #[arg(short = 'n', long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..))]
    count: u32,

    /// Print every clone result and enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Show live per-clone progress
    #[arg(long)]
    progress: bool,

    /// Connection timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    connect_timeout: u64,

    /// Timeout in seconds for any read or write without progress
    #[arg(long, value_name = "SECS", default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    idle_timeout: u64,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn options(&self) -> run::Options {
        run::Options {
            url: self.url.clone(),
            count: self.count as usize,
            concurrency: self.concurrency as usize,
            verbose: self.verbose,
            progress: self.progress,
            json: self.json,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            idle_timeout: Duration::from_secs(self.idle_timeout),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "warn,gitload_core=debug,gitload_protocol=debug,git_load_tester=debug"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run::execute(cli.options()).await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
