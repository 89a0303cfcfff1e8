//! End-of-run output: summary, failed-id list and JSON report.

use std::path::{Path, PathBuf};

use contracts::{BatchResult, RecordView, StageKind};
use controller::RunReport;
use observability::RunMetricsAggregator;
use serde::Serialize;

use crate::error::{CliError, Result};

/// File written into the output directory when some ids failed
pub const FAILED_IDS_FILE: &str = "failed_ids.txt";

/// Pool counters as written to the JSON report
#[derive(Debug, Serialize)]
struct StageLine {
    stage: StageKind,
    peak_in_flight: usize,
    invocations: u64,
    retries: u64,
    failures: u64,
    forwarded: u64,
}

#[derive(Debug, Serialize)]
struct PollLine {
    jobs: u64,
    polls: u64,
    errors: u64,
    timed_out: u64,
    peak_in_flight: usize,
}

#[derive(Debug, Serialize)]
struct ReportFile<'a> {
    batch: &'a BatchResult,
    stages: Vec<StageLine>,
    poll: PollLine,
}

fn report_file(report: &RunReport) -> ReportFile<'_> {
    ReportFile {
        batch: &report.batch,
        stages: report
            .stages
            .iter()
            .map(|s| StageLine {
                stage: s.kind,
                peak_in_flight: s.peak_in_flight,
                invocations: s.invocations,
                retries: s.retries,
                failures: s.failures,
                forwarded: s.forwarded,
            })
            .collect(),
        poll: PollLine {
            jobs: report.poll.jobs,
            polls: report.poll.polls,
            errors: report.poll.errors,
            timed_out: report.poll.timed_out,
            peak_in_flight: report.poll.peak_in_flight,
        },
    }
}

/// Write the run as pretty JSON
pub fn write_json_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(&report_file(report))
        .map_err(|e| CliError::write_output(path, std::io::Error::other(e)))?;
    std::fs::write(path, json).map_err(|e| CliError::write_output(path, e))
}

/// Write failed ids, one per line, in input order
///
/// Returns the file path, or `None` when nothing failed.
pub fn write_failed_ids(output_dir: &Path, records: &[RecordView]) -> Result<Option<PathBuf>> {
    let failed: Vec<&str> = records
        .iter()
        .filter(|r| r.stage == contracts::Stage::Failed)
        .map(|r| r.id.as_str())
        .collect();
    if failed.is_empty() {
        return Ok(None);
    }

    std::fs::create_dir_all(output_dir).map_err(|e| CliError::write_output(output_dir, e))?;
    let path = output_dir.join(FAILED_IDS_FILE);
    let mut content = failed.join("\n");
    content.push('\n');
    std::fs::write(&path, content).map_err(|e| CliError::write_output(&path, e))?;
    Ok(Some(path))
}

/// Command that re-runs only the failed ids
pub fn rerun_hint(failed_ids: &Path) -> String {
    format!("media-relay run --id-file {}", failed_ids.display())
}

/// Print the final summary to stdout
pub fn print_summary(report: &RunReport, records: &[RecordView]) {
    let batch = &report.batch;
    let mut aggregator = RunMetricsAggregator::new();
    aggregator.extend(records);

    println!("\n=== Batch Summary ===\n");
    println!("Elapsed: {:.2}s", batch.elapsed_ms as f64 / 1000.0);
    println!(
        "Total: {}  Succeeded: {}  Failed: {}{}",
        batch.total,
        batch.succeeded_count(),
        batch.failed_count(),
        if batch.cancelled { "  (cancelled)" } else { "" }
    );

    if !report.stages.is_empty() {
        println!("\nStages:");
        for stage in &report.stages {
            println!(
                "  {:<9} calls={} retries={} failures={} forwarded={} peak={}",
                stage.kind.as_str(),
                stage.invocations,
                stage.retries,
                stage.failures,
                stage.forwarded,
                stage.peak_in_flight
            );
        }
        println!(
            "  {:<9} jobs={} polls={} errors={} timed_out={}",
            "poll", report.poll.jobs, report.poll.polls, report.poll.errors, report.poll.timed_out
        );
    }

    println!("\n{}", aggregator.summary());

    if !batch.failed.is_empty() {
        println!("Failed:");
        for record in records.iter().filter(|r| batch.failed.contains_key(&r.id)) {
            if let Some(cause) = batch.failed.get(&record.id) {
                println!("  {}  {}", record.id, cause);
            }
        }
    }
}
