//! Scriptable mock adapters
//!
//! Used by tests to inject failures per identifier, slow stages down and
//! count concurrent calls. Assets carry the id in their path/URL
//! (`/mock/<id>`, `mock://<id>`, job `job-<id>`) so every stage can tell
//! which task it is working on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use contracts::{
    AnalysisResult, AnalyzeAdapter, FetchAdapter, JobHandle, LocalAsset, PollStatus, RemoteAsset,
    StageError, TaskId, TransferAdapter,
};

/// Counts concurrent calls
///
/// Clones share the same counters, so a test can keep one and hand the
/// other to an adapter.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    inner: Arc<ProbeCounters>,
}

#[derive(Debug, Default)]
struct ProbeCounters {
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicU32,
}

impl ConcurrencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a call as started; the guard ends it on drop
    pub fn enter(&self) -> ProbeGuard {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.inner.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);
        ProbeGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn current(&self) -> usize {
        self.inner.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls seen
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> u32 {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

pub struct ProbeGuard {
    inner: Arc<ProbeCounters>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.inner.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
enum Failure {
    Times(u32, StageError),
    Always(StageError),
}

/// Per-id failure plan shared by the mocks
#[derive(Debug, Default)]
struct FailureScript {
    plan: Mutex<HashMap<String, Failure>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl FailureScript {
    fn insert(&self, key: &str, failure: Failure) {
        self.plan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), failure);
    }

    /// Count a call for `key` and return the scripted error, if any
    fn next(&self, key: &str) -> Option<StageError> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_insert(0) += 1;

        let mut plan = self.plan.lock().unwrap_or_else(PoisonError::into_inner);
        match plan.get_mut(key)? {
            Failure::Always(err) => Some(err.clone()),
            Failure::Times(0, _) => None,
            Failure::Times(left, err) => {
                *left -= 1;
                Some(err.clone())
            }
        }
    }

    fn calls(&self, key: &str) -> u32 {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Last path segment, with a `job-` prefix stripped
fn key_of(location: &str) -> &str {
    let last = location.rsplit('/').next().unwrap_or(location);
    last.strip_prefix("job-").unwrap_or(last)
}

macro_rules! scripted_builders {
    () => {
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn with_probe(mut self, probe: ConcurrencyProbe) -> Self {
            self.probe = probe;
            self
        }

        /// Fail every call for `id`
        pub fn fail_always(self, id: &str, err: StageError) -> Self {
            self.script.insert(id, Failure::Always(err));
            self
        }

        /// Fail the first `times` calls for `id`
        pub fn fail_times(self, id: &str, times: u32, err: StageError) -> Self {
            self.script.insert(id, Failure::Times(times, err));
            self
        }

        pub fn probe(&self) -> &ConcurrencyProbe {
            &self.probe
        }

        /// Calls made for `id`
        pub fn calls_for(&self, id: &str) -> u32 {
            self.script.calls(id)
        }
    };
}

#[derive(Debug, Default)]
pub struct MockFetch {
    delay: Duration,
    probe: ConcurrencyProbe,
    script: FailureScript,
}

impl MockFetch {
    pub fn new() -> Self {
        Self::default()
    }

    scripted_builders!();
}

impl FetchAdapter for MockFetch {
    fn name(&self) -> &str {
        "mock_fetch"
    }

    async fn fetch(&self, id: &TaskId) -> Result<LocalAsset, StageError> {
        let _guard = self.probe.enter();
        pause(self.delay).await;
        if let Some(err) = self.script.next(id) {
            return Err(err);
        }
        Ok(LocalAsset::new(format!("/mock/{id}")))
    }
}

#[derive(Debug, Default)]
pub struct MockTransfer {
    delay: Duration,
    probe: ConcurrencyProbe,
    script: FailureScript,
}

impl MockTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    scripted_builders!();
}

impl TransferAdapter for MockTransfer {
    fn name(&self) -> &str {
        "mock_transfer"
    }

    async fn transfer(&self, asset: &LocalAsset) -> Result<RemoteAsset, StageError> {
        let _guard = self.probe.enter();
        pause(self.delay).await;
        let path = asset.path.to_string_lossy();
        let id = key_of(&path);
        if let Some(err) = self.script.next(id) {
            return Err(err);
        }
        Ok(RemoteAsset::new(format!("mock://{id}")))
    }
}

/// Mock analysis service
///
/// `submit` is scripted like the other mocks. Each job answers
/// `InProgress` `polls_until_done` times, then succeeds, unless the id was
/// marked with `fail_job`. Poll errors can be scripted with
/// `fail_polls`.
#[derive(Debug, Default)]
pub struct MockAnalyze {
    delay: Duration,
    probe: ConcurrencyProbe,
    script: FailureScript,
    poll_delay: Duration,
    polls_until_done: u32,
    poll_script: FailureScript,
    failed_jobs: Mutex<HashMap<String, String>>,
    polls: Mutex<HashMap<String, u32>>,
}

impl MockAnalyze {
    pub fn new() -> Self {
        Self::default()
    }

    scripted_builders!();

    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    pub fn with_polls_until_done(mut self, polls: u32) -> Self {
        self.polls_until_done = polls;
        self
    }

    /// The job for `id` ends with `PollStatus::Failed`
    pub fn fail_job(self, id: &str, cause: &str) -> Self {
        self.failed_jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), cause.to_string());
        self
    }

    /// The first `times` status queries for `id` return `err`
    pub fn fail_polls(self, id: &str, times: u32, err: StageError) -> Self {
        self.poll_script.insert(id, Failure::Times(times, err));
        self
    }

    /// Status queries answered for `id` so far
    pub fn polls_for(&self, id: &str) -> u32 {
        self.polls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
            .unwrap_or(0)
    }
}

impl AnalyzeAdapter for MockAnalyze {
    fn name(&self) -> &str {
        "mock_analyze"
    }

    async fn submit(&self, asset: &RemoteAsset) -> Result<JobHandle, StageError> {
        let _guard = self.probe.enter();
        pause(self.delay).await;
        let id = key_of(&asset.url);
        if let Some(err) = self.script.next(id) {
            return Err(err);
        }
        Ok(JobHandle::new(format!("job-{id}")))
    }

    async fn poll(&self, job: &JobHandle) -> Result<PollStatus, StageError> {
        pause(self.poll_delay).await;
        let id = key_of(job.as_str());
        if let Some(err) = self.poll_script.next(id) {
            return Err(err);
        }

        let answered = {
            let mut polls = self.polls.lock().unwrap_or_else(PoisonError::into_inner);
            let count = polls.entry(id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if answered <= self.polls_until_done {
            return Ok(PollStatus::InProgress);
        }

        let failed = self
            .failed_jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();
        Ok(match failed {
            Some(cause) => PollStatus::Failed { cause },
            None => PollStatus::Succeeded {
                result: AnalysisResult::new(format!("result-{id}")),
            },
        })
    }
}
