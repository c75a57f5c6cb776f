//! End-of-run summary.

use crate::display::group_thousands;
use gitload_core::RunReport;
use serde::Serialize;
use std::fmt::Write;

/// Bytes per MB as reported in the summary.
const MB: f64 = 1_048_576.0;

/// Human-readable summary block.
pub fn render(report: &RunReport) -> String {
    let metrics = &report.metrics;
    let total_mb = metrics.total_bytes as f64 / MB;
    let mut out = String::new();

    // Writing to a String cannot fail.
    let _ = writeln!(out, "====== Summary ======");
    let _ = writeln!(out, "Total clones: {}", report.count);
    let _ = writeln!(out, "Successful: {}", metrics.success_count);
    let _ = writeln!(out, "Failed: {}", metrics.fail_count);
    if metrics.cancelled_count > 0 {
        let _ = writeln!(out, "Cancelled: {}", metrics.cancelled_count);
    }
    let _ = writeln!(
        out,
        "Total bytes: {} ({total_mb:.2} MB)",
        group_thousands(metrics.total_bytes)
    );
    let _ = writeln!(out, "Duration: {:.2}s", report.wall_clock.as_secs_f64());
    let _ = writeln!(
        out,
        "Throughput: {:.2} MB/s",
        report.throughput_bytes_per_sec() / MB
    );
    let _ = writeln!(
        out,
        "Avg time per clone: {:.2}s",
        report.mean_clone_duration().as_secs_f64()
    );
    let _ = writeln!(out, "Peak concurrent transfers: {}", report.peak_streaming);

    if !metrics.failures_by_kind.is_empty() {
        let _ = writeln!(out, "Failures by kind:");
        for (kind, n) in &metrics.failures_by_kind {
            let _ = writeln!(out, "  {kind}: {n}");
        }
    }
    out
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    #[serde(flatten)]
    report: &'a RunReport,
    wall_clock_secs: f64,
    throughput_bytes_per_sec: f64,
    mean_clone_duration_secs: f64,
}

/// Summary as a JSON document.
pub fn to_json(report: &RunReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonSummary {
        report,
        wall_clock_secs: report.wall_clock.as_secs_f64(),
        throughput_bytes_per_sec: report.throughput_bytes_per_sec(),
        mean_clone_duration_secs: report.mean_clone_duration().as_secs_f64(),
    })
}
