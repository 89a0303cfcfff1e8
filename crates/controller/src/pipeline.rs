//! PipelineController - wires the pools together and drives one batch

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{
    AnalyzeAdapter, BatchResult, FetchAdapter, PipelineBlueprint, Stage, StageKind, TaskError,
    TaskId, TransferAdapter,
};
use stage_runner::{
    terminal_sink, BoundedStageRunner, Downstream, FetchStage, PollScheduler, PollStats,
    RetryPolicy, RunnerContext, StageMetrics, StageMetricsSnapshot, StageQueue, SubmitStage,
    TerminalReceiver, TransferStage, WorkItem,
};
use task_registry::TaskRegistry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{ControllerError, Result};

/// Batch result plus runtime counters of the pools
#[derive(Debug, Clone)]
pub struct RunReport {
    pub batch: BatchResult,
    /// One snapshot per pool, in stage order (empty for an empty batch)
    pub stages: Vec<StageMetricsSnapshot>,
    pub poll: PollStats,
}

/// How the drain loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainEnd {
    Complete,
    Cancelled,
    TimedOut,
    SinkClosed,
}

/// Runs one batch of ids through fetch, transfer and analysis
///
/// The registry is created with the controller so a status display can
/// read it while `run` is in progress. Cancelling the token returned by
/// `cancel_token` stops the batch: queued work is dropped, in-flight calls
/// finish on their own, and every record not yet terminal fails with a
/// cancellation cause.
pub struct PipelineController<F, T, A> {
    blueprint: PipelineBlueprint,
    fetch: F,
    transfer: T,
    analyze: Arc<A>,
    registry: Arc<TaskRegistry>,
    cancel: CancellationToken,
}

impl<F, T, A> PipelineController<F, T, A>
where
    F: FetchAdapter + Sync + 'static,
    T: TransferAdapter + Sync + 'static,
    A: AnalyzeAdapter + Send + Sync + 'static,
{
    pub fn new(blueprint: PipelineBlueprint, fetch: F, transfer: T, analyze: A) -> Self {
        Self {
            blueprint,
            fetch,
            transfer,
            analyze: Arc::new(analyze),
            registry: Arc::new(TaskRegistry::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Override the worker count of one pool
    pub fn with_concurrency(mut self, kind: StageKind, workers: usize) -> Self {
        self.blueprint.stages.get_mut(kind).workers = workers.max(1);
        self
    }

    /// Worker counts in stage order
    pub fn concurrency(&self) -> [usize; 3] {
        StageKind::ALL.map(|kind| self.blueprint.stages.get(kind).workers.max(1))
    }

    /// Registry of this batch, for status displays
    pub fn registry(&self) -> Arc<TaskRegistry> {
        Arc::clone(&self.registry)
    }

    /// Token that cancels the batch
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the batch to completion and return every id's outcome
    pub async fn run(self, ids: Vec<TaskId>) -> Result<BatchResult> {
        Ok(self.run_with_report(ids).await?.batch)
    }

    /// Like `run`, also returning pool and poll counters
    #[instrument(name = "pipeline_controller_run", skip_all, fields(batch = ids.len()))]
    pub async fn run_with_report(self, ids: Vec<TaskId>) -> Result<RunReport> {
        let started = Instant::now();

        {
            let mut seen = HashSet::with_capacity(ids.len());
            if let Some(dup) = ids.iter().find(|id| !seen.insert(*id)) {
                return Err(ControllerError::DuplicateId(dup.clone()));
            }
        }
        for id in &ids {
            self.registry.create(id.clone())?;
        }

        if ids.is_empty() {
            info!("Empty batch, nothing to do");
            return Ok(RunReport {
                batch: BatchResult::default(),
                stages: Vec::new(),
                poll: PollStats::default(),
            });
        }

        let total = ids.len();
        let settings = self.blueprint.pipeline.clone();
        let capacity = settings.queue_capacity.max(1);
        let [fetch_workers, transfer_workers, analyze_workers] = self.concurrency();

        info!(
            total,
            queue_capacity = capacity,
            fetch_workers,
            transfer_workers,
            analyze_workers,
            "Starting batch"
        );

        // stop signal for pools, feeder and scheduler; also fired by an
        // outer cancel
        let shutdown = self.cancel.child_token();

        let fetch_queue = StageQueue::new(StageKind::Fetch, capacity);
        let transfer_queue = StageQueue::new(StageKind::Transfer, capacity);
        let analyze_queue = StageQueue::new(StageKind::Analyze, capacity);
        let (sink, mut finished_rx) = terminal_sink();

        let (poll_tx, poller) = PollScheduler::new(
            Arc::clone(&self.analyze),
            Arc::clone(&self.registry),
            sink.clone(),
            self.blueprint.poll.clone(),
            shutdown.clone(),
        )
        .spawn();

        let context = |kind: StageKind, inbound: &StageQueue, downstream: Downstream| {
            RunnerContext {
                registry: Arc::clone(&self.registry),
                inbound: inbound.clone(),
                downstream,
                sink: sink.clone(),
                retry: RetryPolicy::from(&self.blueprint.stages.get(kind).retry),
                shutdown: shutdown.clone(),
            }
        };

        let runners = vec![
            BoundedStageRunner::spawn(
                FetchStage::new(self.fetch),
                fetch_workers,
                context(
                    StageKind::Fetch,
                    &fetch_queue,
                    Downstream::Queue(transfer_queue.clone()),
                ),
            ),
            BoundedStageRunner::spawn(
                TransferStage::new(self.transfer),
                transfer_workers,
                context(
                    StageKind::Transfer,
                    &transfer_queue,
                    Downstream::Queue(analyze_queue.clone()),
                ),
            ),
            BoundedStageRunner::spawn(
                SubmitStage::new(Arc::clone(&self.analyze)),
                analyze_workers,
                context(StageKind::Analyze, &analyze_queue, Downstream::Poller(poll_tx)),
            ),
        ];
        drop(sink);

        let feeder = spawn_feeder(ids, fetch_queue.clone(), shutdown.clone());

        let end = drain(
            &mut finished_rx,
            total,
            settings.timeout(),
            &self.cancel,
        )
        .await;

        match end {
            DrainEnd::Complete => debug!("All tasks finished"),
            DrainEnd::Cancelled | DrainEnd::TimedOut => {
                shutdown.cancel();
                let reason = match end {
                    DrainEnd::TimedOut => format!(
                        "batch timed out after {}s",
                        settings.timeout().unwrap_or_default().as_secs()
                    ),
                    _ => "batch cancelled".to_string(),
                };
                let swept = self.registry.fail_all_pending(TaskError::cancelled(&reason));
                for record in &swept {
                    observability::record_task_finished(record);
                }
                warn!(swept = swept.len(), %reason, "Batch stopped early");
            }
            DrainEnd::SinkClosed => {
                warn!("Terminal sink closed before every task finished");
            }
        }

        let metrics: Vec<Arc<StageMetrics>> =
            runners.iter().map(|r| Arc::clone(r.metrics())).collect();
        let poll = shutdown_pools(
            shutdown,
            [fetch_queue, transfer_queue, analyze_queue],
            runners,
            poller,
            feeder,
            settings.shutdown_grace(),
        )
        .await;

        let mut batch = BatchResult::from_records(&self.registry.snapshot());
        batch.cancelled = matches!(end, DrainEnd::Cancelled | DrainEnd::TimedOut);
        batch.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            total = batch.total,
            succeeded = batch.succeeded_count(),
            failed = batch.failed_count(),
            cancelled = batch.cancelled,
            elapsed_ms = batch.elapsed_ms,
            "Batch finished"
        );

        Ok(RunReport {
            batch,
            stages: metrics.iter().map(|m| m.snapshot()).collect(),
            poll,
        })
    }
}

/// Seed the fetch queue in input order; blocks while the queue is full
fn spawn_feeder(
    ids: Vec<TaskId>,
    queue: StageQueue,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        for id in ids {
            let item = WorkItem::new(id, Stage::Pending);
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                pushed = queue.push(item) => {
                    if pushed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Feeder done");
    })
}

/// Count terminal records until the batch is done, cancelled or timed out
async fn drain(
    finished_rx: &mut TerminalReceiver,
    total: usize,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> DrainEnd {
    // a deadline past what `Instant` can represent means no deadline
    let deadline = timeout.and_then(|t| tokio::time::Instant::now().checked_add(t));
    let expired = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(expired);

    let mut done = 0usize;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return DrainEnd::Cancelled,
            _ = &mut expired => return DrainEnd::TimedOut,
            record = finished_rx.recv() => {
                let Some(record) = record else {
                    return DrainEnd::SinkClosed;
                };
                done += 1;
                observability::record_batch_progress(total, done);
                debug!(task_id = %record.id, stage = %record.stage, done, total, "Task finished");
                if done >= total {
                    return DrainEnd::Complete;
                }
            }
        }
    }
}

/// Stop every pool and the scheduler, waiting at most `grace` for them
async fn shutdown_pools(
    shutdown: CancellationToken,
    queues: [StageQueue; 3],
    runners: Vec<BoundedStageRunner>,
    poller: JoinHandle<PollStats>,
    feeder: JoinHandle<()>,
    grace: Duration,
) -> PollStats {
    shutdown.cancel();
    feeder.abort();
    for queue in &queues {
        queue.close();
    }

    let joined = tokio::time::timeout(grace, async {
        for runner in runners {
            runner.join().await;
        }
    })
    .await;
    if joined.is_err() {
        warn!(grace_ms = grace.as_millis() as u64, "Workers still busy after shutdown grace, detaching");
    }

    match tokio::time::timeout(grace, poller).await {
        Ok(Ok(stats)) => stats,
        Ok(Err(e)) => {
            warn!(error = %e, "Poll scheduler task failed");
            PollStats::default()
        }
        Err(_) => {
            warn!("Poll scheduler did not stop within shutdown grace");
            PollStats::default()
        }
    }
}
