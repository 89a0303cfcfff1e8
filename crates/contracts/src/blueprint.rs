//! PipelineBlueprint - Config Loader output
//!
//! Everything a batch run needs besides the ids: queue sizing, per-stage
//! worker counts and retry policy, poll cadence, adapter selection and
//! status display.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::StageKind;

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineBlueprint {
    #[serde(default)]
    pub version: ConfigVersion,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub stages: StagesConfig,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub adapters: AdapterConfig,

    #[serde(default)]
    pub status: StatusConfig,
}

/// Queue sizing and batch-level limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Capacity of each inter-stage queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Whole-batch timeout in seconds (0 = none)
    #[serde(default)]
    pub timeout_secs: u64,

    /// How long shutdown waits for in-flight workers (milliseconds)
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_queue_capacity() -> usize {
    8
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            timeout_secs: 0,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl PipelineSettings {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Per-pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    #[serde(default = "StageConfig::fetch_default")]
    pub fetch: StageConfig,

    #[serde(default = "StageConfig::transfer_default")]
    pub transfer: StageConfig,

    #[serde(default = "StageConfig::analyze_default")]
    pub analyze: StageConfig,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            fetch: StageConfig::fetch_default(),
            transfer: StageConfig::transfer_default(),
            analyze: StageConfig::analyze_default(),
        }
    }
}

impl StagesConfig {
    pub fn get(&self, kind: StageKind) -> &StageConfig {
        match kind {
            StageKind::Fetch => &self.fetch,
            StageKind::Transfer => &self.transfer,
            StageKind::Analyze => &self.analyze,
        }
    }

    pub fn get_mut(&mut self, kind: StageKind) -> &mut StageConfig {
        match kind {
            StageKind::Fetch => &mut self.fetch,
            StageKind::Transfer => &mut self.transfer,
            StageKind::Analyze => &mut self.analyze,
        }
    }
}

/// Worker count and retry policy of one pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Concurrent adapter invocations
    pub workers: usize,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl StageConfig {
    /// Fetch defaults to one worker to respect provider rate limits
    pub fn fetch_default() -> Self {
        Self {
            workers: 1,
            retry: RetryConfig::default(),
        }
    }

    pub fn transfer_default() -> Self {
        Self {
            workers: 1,
            retry: RetryConfig::default(),
        }
    }

    /// Submissions are short; the long wait lives in the poll scheduler
    pub fn analyze_default() -> Self {
        Self {
            workers: 4,
            retry: RetryConfig::default(),
        }
    }
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds), doubled per retry
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Upper bound on a single delay (milliseconds)
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Randomize each delay within [delay/2, delay]
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retry immediately, at most `max_attempts` attempts in total
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_ms: 0,
            max_backoff_ms: 0,
            jitter: false,
        }
    }
}

/// Poll cadence for analysis jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between two status queries of one job (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// Give up on a job still in progress after this long (seconds, 0 = never)
    #[serde(default = "default_poll_timeout_secs")]
    pub timeout_secs: u64,

    /// Status queries allowed in flight at once across all jobs
    #[serde(default = "default_poll_max_in_flight")]
    pub max_in_flight: usize,

    /// Consecutive failed queries tolerated before the task fails
    #[serde(default = "default_poll_max_errors")]
    pub max_errors: u32,
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_poll_timeout_secs() -> u64 {
    10_800
}

fn default_poll_max_in_flight() -> usize {
    16
}

fn default_poll_max_errors() -> u32 {
    3
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            timeout_secs: default_poll_timeout_secs(),
            max_in_flight: default_poll_max_in_flight(),
            max_errors: default_poll_max_errors(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Which adapter family to plug in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// Directory-backed fetch/transfer plus simulated analysis
    #[default]
    Local,
    /// Everything simulated in memory
    Simulated,
}

/// Adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub kind: AdapterKind,

    /// Where source assets are looked up (`<source_dir>/<id>.*`)
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// Where fetched assets are written
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Directory acting as the remote store
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Keep the fetched copy after a successful transfer
    #[serde(default)]
    pub keep_local: bool,

    /// Public URL prefix of the store (defaults to a file:// URL)
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub simulated: SimulatedConfig,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("media")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("store")
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            kind: AdapterKind::default(),
            source_dir: default_source_dir(),
            work_dir: default_work_dir(),
            store_dir: default_store_dir(),
            keep_local: false,
            base_url: None,
            simulated: SimulatedConfig::default(),
        }
    }
}

/// Behavior of the simulated adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    /// Latency of every simulated call (milliseconds)
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,

    /// Polls answered `InProgress` before a job succeeds
    #[serde(default = "default_polls_until_done")]
    pub polls_until_done: u32,

    /// Ids whose analysis job is reported as failed
    #[serde(default)]
    pub fail_ids: Vec<String>,
}

fn default_latency_ms() -> u64 {
    200
}

fn default_polls_until_done() -> u32 {
    3
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            latency_ms: default_latency_ms(),
            polls_until_done: default_polls_until_done(),
            fail_ids: Vec::new(),
        }
    }
}

/// Live status display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redraw period (milliseconds)
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,
}

fn default_refresh_ms() -> u64 {
    2000
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_ms: default_refresh_ms(),
        }
    }
}

impl StatusConfig {
    pub fn refresh(&self) -> Duration {
        Duration::from_millis(self.refresh_ms)
    }
}
