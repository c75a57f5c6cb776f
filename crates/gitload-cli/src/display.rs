//! Console output while a run is in progress.

use gitload_core::{ClonePhase, CloneResult, Observers, ProgressUpdate};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Bytes per MiB.
const MIB: f64 = 1_048_576.0;

/// Prints per-clone lines and, with `--progress`, one live bar per active
/// clone plus an overall bar.
pub struct ConsoleReporter {
    verbose: bool,
    json: bool,
    live: Option<LiveProgress>,
}

struct LiveProgress {
    multi: MultiProgress,
    overall: ProgressBar,
    clones: Mutex<HashMap<usize, ProgressBar>>,
}

impl ConsoleReporter {
    pub fn new(count: usize, verbose: bool, progress: bool, json: bool) -> Self {
        let live = progress.then(|| LiveProgress::new(count as u64));
        Self {
            verbose,
            json,
            live,
        }
    }

    /// Callbacks to hand to the orchestrator.
    pub fn observers(self: &Arc<Self>) -> Observers {
        let progress = Arc::clone(self);
        let results = Arc::clone(self);
        Observers::new()
            .with_progress(Arc::new(move |update: ProgressUpdate| {
                progress.on_progress(update);
            }))
            .with_result(Arc::new(move |result: &CloneResult| {
                results.on_result(result);
            }))
    }

    /// Removes any live bars.
    pub fn finish(&self) {
        if let Some(live) = &self.live {
            for (_, bar) in live.clones.lock().drain() {
                bar.finish_and_clear();
            }
            live.overall.finish_and_clear();
        }
    }

    fn on_progress(&self, update: ProgressUpdate) {
        if let Some(live) = &self.live {
            live.update(update);
        }
    }

    fn on_result(&self, result: &CloneResult) {
        if let Some(live) = &self.live {
            live.overall.inc(1);
        }
        let Some(line) = result_line(result, self.verbose) else {
            return;
        };
        match &self.live {
            Some(live) => {
                if live.multi.println(&line).is_err() {
                    eprintln!("{line}");
                }
            }
            None if self.json => eprintln!("{line}"),
            None => println!("{line}"),
        }
    }
}

impl LiveProgress {
    fn new(count: u64) -> Self {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
        let overall = multi.add(ProgressBar::new(count));
        overall.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} clones")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self {
            multi,
            overall,
            clones: Mutex::new(HashMap::new()),
        }
    }

    fn clone_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {prefix} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn update(&self, update: ProgressUpdate) {
        let mut clones = self.clones.lock();
        match update.phase {
            ClonePhase::Starting => {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(Self::clone_style());
                bar.set_prefix(format!("Clone #{}", update.index));
                bar.set_message(status_text(update));
                bar.enable_steady_tick(Duration::from_millis(200));
                clones.insert(update.index, bar);
            }
            ClonePhase::Downloading => {
                if let Some(bar) = clones.get(&update.index) {
                    bar.set_message(status_text(update));
                }
            }
            ClonePhase::Complete | ClonePhase::Failed => {
                if let Some(bar) = clones.remove(&update.index) {
                    bar.finish_and_clear();
                    self.multi.remove(&bar);
                }
            }
        }
    }
}

/// `   1.25 MiB [downloading]`
fn status_text(update: ProgressUpdate) -> String {
    format!(
        "{:>8.2} MiB [{}]",
        update.bytes as f64 / MIB,
        update.phase.to_string().to_lowercase()
    )
}

/// The line printed for a finished clone: always for failures, for
/// successes only when verbose.
pub fn result_line(result: &CloneResult, verbose: bool) -> Option<String> {
    match &result.error {
        Some(failure) => Some(format!("Clone #{} failed: {}", result.index, failure.message)),
        None if verbose => Some(format!(
            "Clone #{} completed: {} bytes",
            result.index,
            group_thousands(result.bytes_received)
        )),
        None => None,
    }
}

/// Formats `1234567` as `1,234,567`.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
