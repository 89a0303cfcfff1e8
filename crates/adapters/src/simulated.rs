//! In-memory adapters driven by `SimulatedConfig`
//!
//! Every call sleeps for the configured latency. The analysis service keeps
//! a table of submitted jobs, answers `InProgress` a fixed number of times
//! and then reports the job finished, or failed for ids listed in
//! `fail_ids`.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use contracts::{
    AnalysisResult, AnalyzeAdapter, FetchAdapter, JobHandle, LocalAsset, PollStatus, RemoteAsset,
    SimulatedConfig, StageError, TaskId, TransferAdapter,
};
use tracing::debug;

use crate::local::check_id;

/// Extract the id back out of a simulated path or URL (`.../<id>.media`)
fn asset_id(location: &str) -> &str {
    let name = location.rsplit('/').next().unwrap_or(location);
    name.strip_suffix(".media").unwrap_or(name)
}

async fn pause(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedFetch {
    latency: Duration,
    work_dir: PathBuf,
}

impl SimulatedFetch {
    pub fn new(config: &SimulatedConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            latency: Duration::from_millis(config.latency_ms),
            work_dir: work_dir.into(),
        }
    }
}

impl FetchAdapter for SimulatedFetch {
    fn name(&self) -> &str {
        "simulated_fetch"
    }

    async fn fetch(&self, id: &TaskId) -> Result<LocalAsset, StageError> {
        check_id(id)?;
        pause(self.latency).await;
        Ok(LocalAsset::new(self.work_dir.join(format!("{id}.media"))))
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedTransfer {
    latency: Duration,
}

impl SimulatedTransfer {
    pub fn new(config: &SimulatedConfig) -> Self {
        Self {
            latency: Duration::from_millis(config.latency_ms),
        }
    }
}

impl TransferAdapter for SimulatedTransfer {
    fn name(&self) -> &str {
        "simulated_transfer"
    }

    async fn transfer(&self, asset: &LocalAsset) -> Result<RemoteAsset, StageError> {
        pause(self.latency).await;
        let name = asset
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StageError::invalid_input("asset path has no file name"))?;
        Ok(RemoteAsset::new(format!("sim://store/{name}")))
    }
}

#[derive(Debug)]
struct SimulatedJob {
    id: String,
    polls: u32,
    doomed: bool,
}

/// Simulated long-running analysis service
#[derive(Debug)]
pub struct SimulatedAnalyze {
    latency: Duration,
    polls_until_done: u32,
    fail_ids: HashSet<String>,
    next_job: AtomicU64,
    jobs: Mutex<HashMap<String, SimulatedJob>>,
}

impl SimulatedAnalyze {
    pub fn new(config: &SimulatedConfig) -> Self {
        Self {
            latency: Duration::from_millis(config.latency_ms),
            polls_until_done: config.polls_until_done,
            fail_ids: config.fail_ids.iter().cloned().collect(),
            next_job: AtomicU64::new(1),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Jobs submitted so far
    pub fn submitted(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl AnalyzeAdapter for SimulatedAnalyze {
    fn name(&self) -> &str {
        "simulated_analyze"
    }

    async fn submit(&self, asset: &RemoteAsset) -> Result<JobHandle, StageError> {
        pause(self.latency).await;
        let id = asset_id(&asset.url).to_string();
        let handle = format!("sim-job-{}", self.next_job.fetch_add(1, Ordering::Relaxed));
        let job = SimulatedJob {
            doomed: self.fail_ids.contains(&id),
            id,
            polls: 0,
        };
        debug!(job = %handle, id = %job.id, "job submitted");

        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.clone(), job);
        Ok(JobHandle::new(handle))
    }

    async fn poll(&self, job: &JobHandle) -> Result<PollStatus, StageError> {
        pause(self.latency).await;
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let state = jobs
            .get_mut(job.as_str())
            .ok_or_else(|| StageError::external(format!("unknown job {job}")))?;

        state.polls += 1;
        if state.polls <= self.polls_until_done {
            return Ok(PollStatus::InProgress);
        }
        if state.doomed {
            return Ok(PollStatus::Failed {
                cause: format!("analysis rejected for {}", state.id),
            });
        }
        Ok(PollStatus::Succeeded {
            result: AnalysisResult::new(format!("sim://results/{}.json", state.id)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(fail: &[&str]) -> SimulatedConfig {
        SimulatedConfig {
            latency_ms: 0,
            polls_until_done: 2,
            fail_ids: fail.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_asset_id() {
        assert_eq!(asset_id("sim://store/abc.media"), "abc");
        assert_eq!(asset_id("/work/xyz.media"), "xyz");
        assert_eq!(asset_id("plain"), "plain");
    }

    #[tokio::test]
    async fn test_round_trip_through_all_stages() {
        let cfg = config(&[]);
        let fetch = SimulatedFetch::new(&cfg, "/work");
        let transfer = SimulatedTransfer::new(&cfg);
        let analyze = SimulatedAnalyze::new(&cfg);

        let local = fetch.fetch(&"abc".into()).await.unwrap();
        let remote = transfer.transfer(&local).await.unwrap();
        assert_eq!(remote.url, "sim://store/abc.media");

        let job = analyze.submit(&remote).await.unwrap();
        assert_eq!(analyze.poll(&job).await.unwrap(), PollStatus::InProgress);
        assert_eq!(analyze.poll(&job).await.unwrap(), PollStatus::InProgress);
        match analyze.poll(&job).await.unwrap() {
            PollStatus::Succeeded { result } => assert_eq!(result.reference, "sim://results/abc.json"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(analyze.submitted(), 1);
    }

    #[tokio::test]
    async fn test_fail_ids_fail_at_analysis() {
        let analyze = SimulatedAnalyze::new(&config(&["bad"]));
        let job = analyze
            .submit(&RemoteAsset::new("sim://store/bad.media"))
            .await
            .unwrap();
        analyze.poll(&job).await.unwrap();
        analyze.poll(&job).await.unwrap();
        assert!(matches!(
            analyze.poll(&job).await.unwrap(),
            PollStatus::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_job_and_bad_id() {
        let cfg = config(&[]);
        let analyze = SimulatedAnalyze::new(&cfg);
        assert!(analyze.poll(&JobHandle::new("nope")).await.is_err());

        let fetch = SimulatedFetch::new(&cfg, "/work");
        assert!(fetch.fetch(&"".into()).await.is_err());
    }
}
