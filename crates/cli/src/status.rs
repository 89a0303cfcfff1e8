//! Live status display.
//!
//! Redraws a snapshot of the registry every refresh period: overall
//! progress, per-stage counts and one line per task.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use contracts::{RecordView, Stage, StageKind};
use task_registry::{SnapshotSource, StatusSummary};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Background task printing the status block to stdout
pub struct StatusReporter {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl StatusReporter {
    pub fn spawn(source: Arc<dyn SnapshotSource>, refresh: Duration) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh.max(Duration::from_millis(100)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => println!("{}", render(&source.snapshot())),
                }
            }
            debug!("Status reporter stopped");
        });
        Self { stop, handle }
    }

    /// Stop redrawing and wait for the task to exit
    pub async fn stop(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}

/// Render one status block
pub fn render(records: &[RecordView]) -> String {
    let summary = StatusSummary::from_records(records);
    let mut out = String::new();

    let _ = writeln!(
        out,
        "[status] {}/{} done ({:.1}%) | ok {} failed {} | in flight {}",
        summary.done(),
        summary.total,
        summary.progress() * 100.0,
        summary.succeeded,
        summary.failed,
        summary.in_flight,
    );
    let _ = writeln!(
        out,
        "         pending {} fetching {} transferring {} submitting {} polling {}",
        summary.pending,
        summary.fetching,
        summary.transferring,
        summary.submitting,
        summary.polling,
    );

    let width = records.iter().map(|r| r.id.len()).max().unwrap_or(0);
    for record in records {
        let _ = write!(
            out,
            "  {:<width$}  {:<12} {:>8.1}s",
            record.id.as_str(),
            record.stage.as_str(),
            record.elapsed().as_secs_f64(),
        );
        if matches!(record.stage, Stage::Polling | Stage::Succeeded) {
            let _ = write!(out, "  polls={}", record.polls);
        }
        let retries: u32 = StageKind::ALL
            .iter()
            .map(|kind| record.attempts(*kind).saturating_sub(1))
            .sum();
        if retries > 0 && !record.is_terminal() {
            let _ = write!(out, "  retries={retries}");
        }
        if let Some(error) = &record.error {
            let _ = write!(out, "  {error}");
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{TaskError, TaskRecord};

    fn record(id: &str, index: usize, stage: Stage) -> RecordView {
        let mut record = TaskRecord::new(id.into(), index);
        record.stage = stage;
        Arc::new(record)
    }

    #[test]
    fn test_render_counts_and_lines() {
        let mut polling = TaskRecord::new("clip-2".into(), 1);
        polling.stage = Stage::Polling;
        polling.polls = 3;

        let mut failed = TaskRecord::new("c".into(), 2);
        failed.stage = Stage::Failed;
        failed.error = Some(TaskError::cancelled("batch cancelled"));

        let records = vec![
            record("a", 0, Stage::Succeeded),
            Arc::new(polling),
            Arc::new(failed),
            record("d", 3, Stage::Pending),
        ];
        let text = render(&records);

        assert!(text.starts_with("[status] 2/4 done (50.0%) | ok 1 failed 1"));
        assert!(text.contains("pending 1 fetching 0 transferring 0 submitting 0 polling 1"));
        assert!(text.contains("clip-2  polling"));
        assert!(text.contains("polls=3"));
        assert!(text.contains("cancelled: batch cancelled"));
        assert_eq!(text.lines().count(), 2 + 4);
    }

    #[test]
    fn test_render_empty() {
        let text = render(&[]);
        assert!(text.contains("0/0 done (100.0%)"));
    }

    #[tokio::test]
    async fn test_reporter_stops() {
        let registry = Arc::new(task_registry::TaskRegistry::new());
        registry.create("a".into()).unwrap();
        let reporter = StatusReporter::spawn(registry, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(20)).await;
        reporter.stop().await;
    }
}
