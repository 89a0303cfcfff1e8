//! BoundedStageRunner - fixed worker pool over one inbound queue

use std::sync::Arc;
use std::time::Instant;

use contracts::{Payload, RecordView, Stage, StageError, StageKind, TaskError, TaskId};
use task_registry::{RegistryError, TaskRegistry, Update};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::handler::StageHandler;
use crate::metrics::StageMetrics;
use crate::poller::PollSender;
use crate::queue::{StageQueue, WorkItem};
use crate::retry::{sleep_or_cancel, RetryPolicy};
use crate::sink::TerminalSink;

/// Where a pool sends records it moved forward
#[derive(Debug, Clone)]
pub enum Downstream {
    /// Inbound queue of the next pool
    Queue(StageQueue),
    /// Poll scheduler (after submission)
    Poller(PollSender),
}

/// Everything a pool's workers share
pub struct RunnerContext {
    pub registry: Arc<TaskRegistry>,
    pub inbound: StageQueue,
    pub downstream: Downstream,
    pub sink: TerminalSink,
    pub retry: RetryPolicy,
    /// Stops workers from taking new items
    pub shutdown: CancellationToken,
}

/// Handle to a running pool
pub struct BoundedStageRunner {
    kind: StageKind,
    workers: Vec<JoinHandle<()>>,
    metrics: Arc<StageMetrics>,
}

impl BoundedStageRunner {
    /// Spawn `workers` workers draining `ctx.inbound`
    ///
    /// At most `workers` adapter calls of this pool are in progress at any
    /// instant, since each worker makes one call at a time.
    pub fn spawn<H>(handler: H, workers: usize, ctx: RunnerContext) -> Self
    where
        H: StageHandler + Send + Sync + 'static,
    {
        let kind = handler.kind();
        let count = workers.max(1);
        let handler = Arc::new(handler);
        let ctx = Arc::new(ctx);
        let metrics = Arc::new(StageMetrics::new(kind));

        let workers = (0..count)
            .map(|worker_id| {
                tokio::spawn(stage_worker(
                    worker_id,
                    Arc::clone(&handler),
                    Arc::clone(&ctx),
                    Arc::clone(&metrics),
                ))
            })
            .collect();

        info!(
            stage = %kind,
            workers = count,
            adapter = handler.adapter_name(),
            max_attempts = ctx.retry.max_attempts(),
            "Stage runner started"
        );

        Self {
            kind,
            workers,
            metrics,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn metrics(&self) -> &Arc<StageMetrics> {
        &self.metrics
    }

    /// Wait for every worker to stop
    #[instrument(name = "stage_runner_join", skip(self), fields(stage = %self.kind))]
    pub async fn join(self) {
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!(stage = %self.kind, error = ?e, "Worker task panicked");
            }
        }
        debug!(stage = %self.kind, "Stage runner stopped");
    }
}

#[instrument(
    name = "stage_worker",
    skip(handler, ctx, metrics),
    fields(stage = %ctx.inbound.kind())
)]
async fn stage_worker<H>(
    worker_id: usize,
    handler: Arc<H>,
    ctx: Arc<RunnerContext>,
    metrics: Arc<StageMetrics>,
) where
    H: StageHandler + Send + Sync + 'static,
{
    debug!("Worker started");

    loop {
        let item = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => break,
            item = ctx.inbound.pop() => match item {
                Some(item) => item,
                None => break,
            },
        };
        observability::record_queue_depth(ctx.inbound.kind(), ctx.inbound.len());

        process(item, &handler, &ctx, &metrics).await;
    }

    debug!("Worker stopped");
}

/// Claim one record, call the adapter once, route the outcome
async fn process<H>(item: WorkItem, handler: &Arc<H>, ctx: &RunnerContext, metrics: &StageMetrics)
where
    H: StageHandler + Send + Sync + 'static,
{
    let kind = handler.kind();
    let entry = kind.entry();

    let record = match ctx
        .registry
        .transition(&item.id, item.from, entry, Update::Attempt)
    {
        Ok(record) => record,
        Err(RegistryError::Terminal { .. }) => {
            debug!(task_id = %item.id, "Task already finished, skipping");
            return;
        }
        Err(e) => {
            conflict(ctx, kind, &item.id, &e);
            return;
        }
    };
    let attempts = record.attempts(kind);

    let started = Instant::now();
    let outcome = {
        let _in_flight = metrics.enter();
        invoke(handler, &record).await
    };
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    match outcome {
        Ok(payload) => {
            observability::record_stage_invocation(kind, "ok", latency_ms);
            debug!(task_id = %record.id, attempt = attempts, latency_ms, "Stage succeeded");
            advance(ctx, kind, &record.id, payload, metrics).await;
        }
        Err(err) if err.is_retryable() && ctx.retry.allows_retry(attempts) => {
            observability::record_stage_invocation(kind, "retry", latency_ms);
            retry(ctx, kind, &record.id, attempts, &err, metrics);
        }
        Err(err) => {
            observability::record_stage_invocation(kind, "fail", latency_ms);
            let cause = TaskError::from_stage(kind, &err, attempts);
            warn!(task_id = %record.id, error = %cause, "Task failed");
            match ctx
                .registry
                .transition(&record.id, entry, Stage::Failed, Update::Fail(cause))
            {
                Ok(done) => {
                    metrics.inc_failures();
                    ctx.sink.send(done);
                }
                Err(RegistryError::Terminal { .. }) => {
                    debug!(task_id = %record.id, "Task finished while in flight, failure discarded");
                }
                Err(e) => conflict(ctx, kind, &record.id, &e),
            }
        }
    }
}

/// Run the adapter call on its own task so a panic fails only this record
async fn invoke<H>(handler: &Arc<H>, record: &RecordView) -> Result<Payload, StageError>
where
    H: StageHandler + Send + Sync + 'static,
{
    let handler = Arc::clone(handler);
    let record = Arc::clone(record);
    match tokio::spawn(async move { handler.handle(&record).await }).await {
        Ok(outcome) => outcome,
        Err(e) => Err(StageError::external(format!("adapter call aborted: {e}"))),
    }
}

/// Publish the new payload and hand the record downstream
async fn advance(
    ctx: &RunnerContext,
    kind: StageKind,
    id: &TaskId,
    payload: Payload,
    metrics: &StageMetrics,
) {
    let next = match ctx
        .registry
        .transition(id, kind.entry(), kind.exit(), Update::Payload(payload))
    {
        Ok(next) => next,
        Err(RegistryError::Terminal { .. }) => {
            debug!(task_id = %id, "Task finished while in flight, result discarded");
            return;
        }
        Err(e) => {
            conflict(ctx, kind, id, &e);
            return;
        }
    };

    match &ctx.downstream {
        Downstream::Queue(queue) => {
            let item = WorkItem::new(next.id.clone(), next.stage);
            // a full queue blocks this worker until the next pool catches up
            tokio::select! {
                biased;
                _ = ctx.shutdown.cancelled() => {
                    debug!(task_id = %id, "Shutdown while forwarding");
                    return;
                }
                sent = queue.push(item) => {
                    if let Err(item) = sent {
                        warn!(task_id = %item.id, "Downstream queue closed");
                        return;
                    }
                }
            }
        }
        Downstream::Poller(poller) => {
            let Some(job) = next.payload.as_ref().and_then(Payload::as_job) else {
                conflict_msg(ctx, kind, id, format!("{} has no job handle", next.stage));
                return;
            };
            if !poller.submit(next.id.clone(), job.clone()) {
                warn!(task_id = %id, "Poll scheduler stopped, job not tracked");
                return;
            }
        }
    }
    metrics.inc_forwarded();
}

/// Hand the record back and re-enqueue it after a backoff delay
fn retry(
    ctx: &RunnerContext,
    kind: StageKind,
    id: &TaskId,
    attempts: u32,
    err: &StageError,
    metrics: &StageMetrics,
) {
    let entry = kind.entry();
    match ctx.registry.transition(id, entry, entry, Update::Release) {
        Ok(_) => {}
        Err(RegistryError::Terminal { .. }) => {
            debug!(task_id = %id, "Task finished while in flight, retry dropped");
            return;
        }
        Err(e) => {
            conflict(ctx, kind, id, &e);
            return;
        }
    }

    metrics.inc_retries();
    observability::record_retry(kind, attempts);
    let delay = ctx.retry.delay(attempts);
    warn!(
        task_id = %id,
        attempt = attempts,
        max_attempts = ctx.retry.max_attempts(),
        delay_ms = delay.as_millis() as u64,
        error = %err,
        "Retryable failure, re-enqueueing"
    );

    let queue = ctx.inbound.clone();
    let shutdown = ctx.shutdown.clone();
    let item = WorkItem::new(id.clone(), entry);
    tokio::spawn(async move {
        if !sleep_or_cancel(delay, &shutdown).await {
            return;
        }
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {}
            sent = queue.push(item) => {
                if let Err(item) = sent {
                    debug!(task_id = %item.id, "Queue closed, retry dropped");
                }
            }
        }
    });
}

fn conflict(ctx: &RunnerContext, kind: StageKind, id: &TaskId, err: &RegistryError) {
    conflict_msg(ctx, kind, id, err.to_string());
}

/// Force the task to `Failed` after a registry mismatch
fn conflict_msg(ctx: &RunnerContext, kind: StageKind, id: &TaskId, message: String) {
    error!(task_id = %id, stage = %kind, error = %message, "Registry conflict, failing task");
    if let Some(done) = ctx
        .registry
        .force_fail(id, TaskError::conflict(Some(kind), message))
    {
        ctx.sink.send(done);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::terminal_sink;
    use contracts::{ErrorKind, LocalAsset, RetryConfig};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fetch-like handler with per-id scripted failures
    struct ScriptedHandler {
        failures: Mutex<HashMap<String, Vec<StageError>>>,
        delay: Duration,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedHandler {
        fn new(delay: Duration) -> Self {
            Self {
                failures: Mutex::new(HashMap::new()),
                delay,
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn failing(self, id: &str, errors: Vec<StageError>) -> Self {
            self.failures.lock().unwrap().insert(id.to_string(), errors);
            self
        }
    }

    impl StageHandler for Arc<ScriptedHandler> {
        fn kind(&self) -> StageKind {
            StageKind::Fetch
        }

        fn adapter_name(&self) -> &str {
            "scripted"
        }

        async fn handle(&self, record: &RecordView) -> Result<Payload, StageError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            let next_failure = {
                let mut failures = self.failures.lock().unwrap();
                failures
                    .get_mut(record.id.as_str())
                    .filter(|f| !f.is_empty())
                    .map(|f| f.remove(0))
            };
            match next_failure {
                Some(err) => Err(err),
                None => Ok(LocalAsset::new(format!("/w/{}", record.id)).into()),
            }
        }
    }

    struct Harness {
        registry: Arc<TaskRegistry>,
        fetch: StageQueue,
        transfer: StageQueue,
        completions: crate::sink::TerminalReceiver,
        shutdown: CancellationToken,
        runner: BoundedStageRunner,
    }

    fn harness(
        handler: Arc<ScriptedHandler>,
        workers: usize,
        retry: RetryConfig,
        transfer_capacity: usize,
        ids: &[&str],
    ) -> Harness {
        let registry = Arc::new(TaskRegistry::new());
        for id in ids {
            registry.create((*id).into()).unwrap();
        }
        let fetch = StageQueue::new(StageKind::Fetch, 64);
        let transfer = StageQueue::new(StageKind::Transfer, transfer_capacity);
        let (sink, completions) = terminal_sink();
        let shutdown = CancellationToken::new();

        let runner = BoundedStageRunner::spawn(
            handler,
            workers,
            RunnerContext {
                registry: Arc::clone(&registry),
                inbound: fetch.clone(),
                downstream: Downstream::Queue(transfer.clone()),
                sink,
                retry: RetryPolicy::from(&retry),
                shutdown: shutdown.clone(),
            },
        );

        Harness {
            registry,
            fetch,
            transfer,
            completions,
            shutdown,
            runner,
        }
    }

    async fn seed(h: &Harness, ids: &[&str]) {
        for id in ids {
            h.fetch
                .push(WorkItem::new((*id).into(), Stage::Pending))
                .await
                .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_is_forwarded() {
        let ids = ["a", "b", "c"];
        let h = harness(
            Arc::new(ScriptedHandler::new(Duration::ZERO)),
            2,
            RetryConfig::immediate(1),
            8,
            &ids,
        );
        seed(&h, &ids).await;

        let mut forwarded = Vec::new();
        for _ in 0..ids.len() {
            let item = h.transfer.pop().await.unwrap();
            assert_eq!(item.from, Stage::Transferring);
            forwarded.push(item.id);
        }
        forwarded.sort();
        assert_eq!(forwarded, vec![TaskId::from("a"), "b".into(), "c".into()]);

        let record = h.registry.get("b").unwrap();
        assert_eq!(record.stage, Stage::Transferring);
        assert!(!record.in_flight);
        assert!(record.payload.as_ref().unwrap().as_local().is_some());

        h.shutdown.cancel();
        let metrics = Arc::clone(h.runner.metrics());
        h.runner.join().await;
        assert_eq!(metrics.snapshot().forwarded, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_limit_is_respected() {
        let ids = ["x", "y"];
        let handler = ScriptedHandler::new(Duration::ZERO).failing(
            "x",
            vec![StageError::transient("reset"); 10],
        );
        let mut h = harness(Arc::new(handler), 1, RetryConfig::immediate(2), 8, &ids);
        seed(&h, &ids).await;

        let failed = h.completions.recv().await.unwrap();
        assert_eq!(failed.id, "x");
        assert_eq!(failed.stage, Stage::Failed);
        assert_eq!(failed.attempts(StageKind::Fetch), 2);
        let cause = failed.error.as_ref().unwrap();
        assert_eq!(cause.kind, ErrorKind::TransientIo);
        assert_eq!(cause.attempts, 2);

        let y = h.transfer.pop().await.unwrap();
        assert_eq!(y.id, "y");
        assert_eq!(h.runner.metrics().snapshot().retries, 1);
        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let ids = ["x"];
        let handler = ScriptedHandler::new(Duration::ZERO)
            .failing("x", vec![StageError::transient("rate limited")]);
        let retry = RetryConfig {
            max_attempts: 3,
            backoff_ms: 500,
            max_backoff_ms: 500,
            jitter: false,
        };
        let h = harness(Arc::new(handler), 1, retry, 8, &ids);
        seed(&h, &ids).await;

        let item = h.transfer.pop().await.unwrap();
        assert_eq!(item.id, "x");
        assert_eq!(h.registry.get("x").unwrap().attempts(StageKind::Fetch), 2);
        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_input_is_not_retried() {
        let ids = ["bad"];
        let handler = ScriptedHandler::new(Duration::ZERO)
            .failing("bad", vec![StageError::invalid_input("malformed id")]);
        let mut h = harness(Arc::new(handler), 1, RetryConfig::immediate(5), 8, &ids);
        seed(&h, &ids).await;

        let failed = h.completions.recv().await.unwrap();
        assert_eq!(failed.attempts(StageKind::Fetch), 1);
        assert_eq!(failed.error.as_ref().unwrap().kind, ErrorKind::InvalidInput);
        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_bound() {
        let ids: Vec<String> = (0..20).map(|i| format!("t{i}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let handler = Arc::new(ScriptedHandler::new(Duration::from_millis(30)));
        let h = harness(Arc::clone(&handler), 3, RetryConfig::immediate(1), 64, &id_refs);
        seed(&h, &id_refs).await;

        for _ in 0..ids.len() {
            h.transfer.pop().await.unwrap();
        }
        assert_eq!(handler.peak.load(Ordering::SeqCst), 3);
        assert!(h.runner.metrics().peak_in_flight() <= 3);
        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_downstream_blocks_workers() {
        let ids = ["a", "b", "c", "d", "e"];
        let h = harness(
            Arc::new(ScriptedHandler::new(Duration::ZERO)),
            2,
            RetryConfig::immediate(1),
            1,
            &ids,
        );
        seed(&h, &ids).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // one item in the queue, one blocked push per worker
        assert!(h.transfer.is_full());
        let moved = h
            .registry
            .snapshot()
            .iter()
            .filter(|r| r.stage == Stage::Transferring)
            .count();
        assert_eq!(moved, 3);
        assert_eq!(h.fetch.len(), 2);

        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_item_forces_conflict() {
        let ids = ["a"];
        let mut h = harness(
            Arc::new(ScriptedHandler::new(Duration::ZERO)),
            1,
            RetryConfig::immediate(1),
            8,
            &ids,
        );
        // the record is Pending, the item claims it is Transferring
        h.fetch
            .push(WorkItem::new("a".into(), Stage::Transferring))
            .await
            .unwrap();

        let failed = h.completions.recv().await.unwrap();
        assert_eq!(
            failed.error.as_ref().unwrap().kind,
            ErrorKind::SchedulingConflict
        );
        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_records_are_skipped() {
        let ids = ["a"];
        let mut h = harness(
            Arc::new(ScriptedHandler::new(Duration::ZERO)),
            1,
            RetryConfig::immediate(1),
            8,
            &ids,
        );
        h.registry.fail_all_pending(TaskError::cancelled("stop"));
        seed(&h, &ids).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(h.completions.try_recv().is_none());
        assert!(h.transfer.is_empty());
        assert_eq!(h.runner.metrics().snapshot().invocations, 0);
        h.shutdown.cancel();
    }
}
