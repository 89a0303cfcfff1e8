//! Poll scheduler for submitted analysis jobs
//!
//! Jobs wait in a min-heap keyed by their next due time. One scheduler loop
//! launches due status queries (at most `max_in_flight` at once), folds
//! each answer into the registry and puts unfinished jobs back on the heap.
//! No worker slot is held while a job is merely waiting.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use contracts::{
    AnalyzeAdapter, JobHandle, PollConfig, PollStatus, Stage, StageError, StageKind, TaskError,
    TaskId,
};
use task_registry::{TaskRegistry, Update};
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::sink::TerminalSink;

/// Stand-in due time for intervals `Instant` cannot represent
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A job being tracked
#[derive(Debug, Clone)]
struct PollJob {
    id: TaskId,
    handle: JobHandle,
    /// When the scheduler took the job over
    since: Instant,
    /// Consecutive failed queries
    errors: u32,
}

/// Heap entry ordered by due time, then arrival
struct Scheduled {
    due: Instant,
    seq: u64,
    job: PollJob,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Handle used by the analysis pool to hand over submitted jobs
#[derive(Debug, Clone)]
pub struct PollSender {
    tx: mpsc::UnboundedSender<(TaskId, JobHandle)>,
}

impl PollSender {
    /// Returns `false` when the scheduler has stopped
    pub fn submit(&self, id: TaskId, handle: JobHandle) -> bool {
        self.tx.send((id, handle)).is_ok()
    }
}

/// Counters reported when the scheduler exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub jobs: u64,
    pub polls: u64,
    pub errors: u64,
    pub timed_out: u64,
    /// Most status queries running at the same time
    pub peak_in_flight: usize,
}

pub struct PollScheduler<A> {
    adapter: Arc<A>,
    registry: Arc<TaskRegistry>,
    sink: TerminalSink,
    config: PollConfig,
    shutdown: CancellationToken,
}

impl<A> PollScheduler<A>
where
    A: AnalyzeAdapter + Send + Sync + 'static,
{
    pub fn new(
        adapter: Arc<A>,
        registry: Arc<TaskRegistry>,
        sink: TerminalSink,
        config: PollConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            adapter,
            registry,
            sink,
            config,
            shutdown,
        }
    }

    /// Start the scheduler loop
    ///
    /// The loop ends when `shutdown` fires, or once every sender is dropped
    /// and no job is left.
    pub fn spawn(self) -> (PollSender, JoinHandle<PollStats>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(rx));
        (PollSender { tx }, handle)
    }

    #[instrument(name = "poll_scheduler", skip_all)]
    async fn run(self, mut rx: mpsc::UnboundedReceiver<(TaskId, JobHandle)>) -> PollStats {
        let max_in_flight = self.config.max_in_flight.max(1);
        let mut heap: BinaryHeap<Reverse<Scheduled>> = BinaryHeap::new();
        let mut running: JoinSet<Result<PollStatus, StageError>> = JoinSet::new();
        let mut polling: HashMap<task::Id, PollJob> = HashMap::new();
        let mut inbox_open = true;
        let mut seq = 0u64;
        let mut stats = PollStats::default();

        debug!(
            interval_ms = self.config.interval_ms,
            max_in_flight,
            "poll scheduler started"
        );

        loop {
            let now = Instant::now();
            while running.len() < max_in_flight {
                let due = matches!(heap.peek(), Some(Reverse(next)) if next.due <= now);
                if !due {
                    break;
                }
                let Some(Reverse(next)) = heap.pop() else {
                    break;
                };

                let adapter = Arc::clone(&self.adapter);
                let handle = next.job.handle.clone();
                let abort = running.spawn(async move { adapter.poll(&handle).await });
                polling.insert(abort.id(), next.job);
                stats.polls += 1;
                stats.peak_in_flight = stats.peak_in_flight.max(running.len());
            }
            observability::record_jobs_tracked(heap.len() + running.len());

            if !inbox_open && heap.is_empty() && running.is_empty() {
                break;
            }

            let next_due = heap.peek().map(|Reverse(next)| next.due);
            let can_launch = running.len() < max_in_flight && next_due.is_some();

            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                Some(joined) = running.join_next_with_id(), if !running.is_empty() => {
                    let (task_id, answer) = match joined {
                        Ok((task_id, answer)) => (task_id, answer),
                        Err(e) => (
                            e.id(),
                            Err(StageError::external(format!("status query aborted: {e}"))),
                        ),
                    };
                    let Some(job) = polling.remove(&task_id) else {
                        continue;
                    };
                    if let Some((due, job)) = self.on_answer(job, answer, &mut stats) {
                        seq += 1;
                        heap.push(Reverse(Scheduled { due, seq, job }));
                    }
                }

                msg = rx.recv(), if inbox_open => match msg {
                    Some((id, handle)) => {
                        debug!(task_id = %id, job = %handle, "tracking job");
                        stats.jobs += 1;
                        seq += 1;
                        let job = PollJob { id, handle, since: Instant::now(), errors: 0 };
                        // first status query goes out right away
                        heap.push(Reverse(Scheduled { due: Instant::now(), seq, job }));
                    }
                    None => inbox_open = false,
                },

                _ = sleep_until(next_due.unwrap_or(now)), if can_launch => {}
            }
        }

        if !running.is_empty() {
            debug!(in_flight = running.len(), "leaving status queries to finish on their own");
            running.detach_all();
        }
        debug!(?stats, pending = heap.len(), "poll scheduler stopped");
        stats
    }

    /// Fold one answer into the registry
    ///
    /// Returns the next due time when the job must be polled again.
    fn on_answer(
        &self,
        mut job: PollJob,
        answer: Result<PollStatus, StageError>,
        stats: &mut PollStats,
    ) -> Option<(Instant, PollJob)> {
        match answer {
            Ok(PollStatus::InProgress) => {
                observability::record_poll("in_progress");
                job.errors = 0;
                if self.deadline_passed(&job) {
                    stats.timed_out += 1;
                    let error = TaskError::job_timeout(format!(
                        "job {} still running after {}s",
                        job.handle, self.config.timeout_secs
                    ));
                    self.finish(&job, Stage::Failed, Update::Fail(error));
                    return None;
                }
                self.note_poll(&job).then(|| (self.next_due(), job))
            }
            Ok(PollStatus::Succeeded { result }) => {
                observability::record_poll("succeeded");
                info!(task_id = %job.id, result = %result.reference, "analysis finished");
                self.finish(&job, Stage::Succeeded, Update::Payload(result.into()));
                None
            }
            Ok(PollStatus::Failed { cause }) => {
                observability::record_poll("failed");
                warn!(task_id = %job.id, job = %job.handle, %cause, "analysis job failed");
                let attempts = self
                    .registry
                    .get(&job.id)
                    .map_or(0, |record| record.attempts(StageKind::Analyze));
                let error =
                    TaskError::from_stage(StageKind::Analyze, &StageError::external(cause), attempts);
                self.finish(&job, Stage::Failed, Update::Fail(error));
                None
            }
            Err(e) => {
                observability::record_poll("error");
                stats.errors += 1;
                job.errors += 1;

                let retry = e.is_retryable()
                    && job.errors < self.config.max_errors
                    && !self.deadline_passed(&job);
                if !retry {
                    warn!(task_id = %job.id, error = %e, errors = job.errors, "status query failed");
                    let error = TaskError::from_stage(StageKind::Analyze, &e, job.errors);
                    self.finish(&job, Stage::Failed, Update::Fail(error));
                    return None;
                }

                debug!(task_id = %job.id, error = %e, errors = job.errors, "status query failed, will retry");
                self.note_poll(&job).then(|| (self.next_due(), job))
            }
        }
    }

    /// When the next query of a job still in progress is due
    fn next_due(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.config.interval())
            .unwrap_or_else(|| now + FAR_FUTURE)
    }

    fn deadline_passed(&self, job: &PollJob) -> bool {
        self.config
            .timeout()
            .is_some_and(|timeout| job.since.elapsed() >= timeout)
    }

    /// Count an answered query that leaves the job in `Polling`
    fn note_poll(&self, job: &PollJob) -> bool {
        match self
            .registry
            .transition(&job.id, Stage::Polling, Stage::Polling, Update::Poll)
        {
            Ok(_) => true,
            Err(e) if e.is_terminal() => {
                debug!(task_id = %job.id, "task finished elsewhere, dropping job");
                false
            }
            Err(e) => {
                self.conflict(job, e.to_string());
                false
            }
        }
    }

    fn finish(&self, job: &PollJob, to: Stage, update: Update) {
        match self.registry.transition(&job.id, Stage::Polling, to, update) {
            Ok(done) => self.sink.send(done),
            Err(e) if e.is_terminal() => {
                debug!(task_id = %job.id, "task finished elsewhere, answer discarded");
            }
            Err(e) => self.conflict(job, e.to_string()),
        }
    }

    fn conflict(&self, job: &PollJob, message: String) {
        error!(task_id = %job.id, error = %message, "registry conflict in poll scheduler");
        let error = TaskError::conflict(Some(StageKind::Analyze), message);
        if let Some(done) = self.registry.force_fail(&job.id, error) {
            self.sink.send(done);
        }
    }
}
