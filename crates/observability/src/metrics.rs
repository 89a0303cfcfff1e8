//! Pipeline metrics
//!
//! Thin wrappers over the `metrics` facade so every crate emits the same
//! names and labels, plus an in-memory aggregator for the end-of-run
//! summary.

use std::collections::BTreeMap;

use contracts::{ErrorKind, RecordView, Stage, StageKind};
use metrics::{counter, gauge, histogram};

/// Record one adapter invocation and how long it took
///
/// `outcome` is `"ok"`, `"retry"` or `"fail"`.
pub fn record_stage_invocation(stage: StageKind, outcome: &'static str, latency_ms: f64) {
    counter!(
        "media_relay_stage_invocations_total",
        "stage" => stage.as_str(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!("media_relay_stage_latency_ms", "stage" => stage.as_str()).record(latency_ms);
}

/// Record a scheduled retry
pub fn record_retry(stage: StageKind, attempt: u32) {
    counter!("media_relay_stage_retries_total", "stage" => stage.as_str()).increment(1);
    histogram!("media_relay_retry_attempt", "stage" => stage.as_str()).record(attempt as f64);
}

/// Current adapter calls in progress for a pool
pub fn record_in_flight(stage: StageKind, in_flight: usize) {
    gauge!("media_relay_stage_in_flight", "stage" => stage.as_str()).set(in_flight as f64);
}

/// Items waiting in a pool's input queue
pub fn record_queue_depth(stage: StageKind, depth: usize) {
    gauge!("media_relay_queue_depth", "stage" => stage.as_str()).set(depth as f64);
}

/// Record one analysis status query
///
/// `status` is `"in_progress"`, `"succeeded"`, `"failed"` or `"error"`.
pub fn record_poll(status: &'static str) {
    counter!("media_relay_polls_total", "status" => status).increment(1);
}

/// Jobs currently tracked by the poll scheduler
pub fn record_jobs_tracked(count: usize) {
    gauge!("media_relay_poll_jobs_tracked").set(count as f64);
}

/// Record a task reaching a terminal state
pub fn record_task_finished(record: &RecordView) {
    let elapsed_ms = record.elapsed().as_secs_f64() * 1000.0;
    match (&record.stage, &record.error) {
        (Stage::Succeeded, _) => {
            counter!("media_relay_tasks_succeeded_total").increment(1);
            histogram!("media_relay_task_duration_ms", "outcome" => "succeeded")
                .record(elapsed_ms);
        }
        (Stage::Failed, error) => {
            let kind = error.as_ref().map_or("unknown", |e| e.kind.as_str());
            counter!("media_relay_tasks_failed_total", "kind" => kind).increment(1);
            histogram!("media_relay_task_duration_ms", "outcome" => "failed").record(elapsed_ms);
        }
        _ => {}
    }
}

/// Progress of the current batch
pub fn record_batch_progress(total: usize, done: usize) {
    gauge!("media_relay_batch_tasks").set(total as f64);
    gauge!("media_relay_batch_tasks_done").set(done as f64);
}

/// In-memory aggregation of finished tasks
///
/// Fed with the final registry snapshot to build the run summary.
#[derive(Debug, Clone, Default)]
pub struct RunMetricsAggregator {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,

    /// Failures per error class
    pub failures_by_kind: BTreeMap<ErrorKind, u64>,

    /// Wall time of succeeded tasks (seconds)
    pub duration_stats: RunningStats,

    /// Attempts per pool across all tasks
    pub attempts: [u64; 3],

    /// Status queries per succeeded task
    pub poll_stats: RunningStats,
}

impl RunMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, record: &RecordView) {
        self.total += 1;
        for kind in StageKind::ALL {
            self.attempts[kind.index()] += record.attempts(kind) as u64;
        }

        match record.stage {
            Stage::Succeeded => {
                self.succeeded += 1;
                self.duration_stats.push(record.elapsed().as_secs_f64());
                self.poll_stats.push(record.polls as f64);
            }
            Stage::Failed => {
                self.failed += 1;
                let kind = record
                    .error
                    .as_ref()
                    .map_or(ErrorKind::SchedulingConflict, |e| e.kind);
                *self.failures_by_kind.entry(kind).or_insert(0) += 1;
            }
            _ => {}
        }
    }

    pub fn extend<'a>(&mut self, records: impl IntoIterator<Item = &'a RecordView>) {
        for record in records {
            self.update(record);
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total: self.total,
            succeeded: self.succeeded,
            failed: self.failed,
            success_rate: if self.total > 0 {
                self.succeeded as f64 / self.total as f64 * 100.0
            } else {
                0.0
            },
            failures_by_kind: self.failures_by_kind.clone(),
            duration_secs: StatsSummary::from(&self.duration_stats),
            polls: StatsSummary::from(&self.poll_stats),
            attempts: self.attempts,
        }
    }
}

/// Run summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub failures_by_kind: BTreeMap<ErrorKind, u64>,
    pub duration_secs: StatsSummary,
    pub polls: StatsSummary,
    pub attempts: [u64; 3],
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Task Metrics ===")?;
        writeln!(
            f,
            "Tasks: {} total, {} succeeded ({:.1}%), {} failed",
            self.total, self.succeeded, self.success_rate, self.failed
        )?;
        writeln!(f, "Task duration (s): {}", self.duration_secs)?;
        writeln!(f, "Polls per job: {}", self.polls)?;
        writeln!(
            f,
            "Attempts: fetch={} transfer={} analyze={}",
            self.attempts[0], self.attempts[1], self.attempts[2]
        )?;

        if !self.failures_by_kind.is_empty() {
            writeln!(f, "Failures by kind:")?;
            for (kind, count) in &self.failures_by_kind {
                writeln!(f, "  {}: {}", kind, count)?;
            }
        }

        Ok(())
    }
}

/// Summary of a `RunningStats`
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.2}, max={:.2}, mean={:.2}, std={:.2} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean/variance (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.mean }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
