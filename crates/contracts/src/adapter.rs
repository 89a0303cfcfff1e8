//! Stage adapter traits
//!
//! Each adapter wraps exactly one external operation. Adapters own their I/O
//! timeouts; the pipeline never aborts a call in progress.

use serde::{Deserialize, Serialize};

use crate::{AnalysisResult, JobHandle, LocalAsset, RemoteAsset, StageError, TaskId};

/// Fetches the source asset for an identifier onto local disk
#[trait_variant::make(FetchAdapter: Send)]
pub trait LocalFetchAdapter {
    /// Adapter name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Materialize the asset for `id`
    ///
    /// # Errors
    /// `InvalidInput` for identifiers the provider cannot resolve,
    /// `TransientIo` for anything worth retrying.
    async fn fetch(&self, id: &TaskId) -> Result<LocalAsset, StageError>;
}

/// Moves a local asset into the remote store
#[trait_variant::make(TransferAdapter: Send)]
pub trait LocalTransferAdapter {
    fn name(&self) -> &str;

    async fn transfer(&self, asset: &LocalAsset) -> Result<RemoteAsset, StageError>;
}

/// Long-running asynchronous analysis service
#[trait_variant::make(AnalyzeAdapter: Send)]
pub trait LocalAnalyzeAdapter {
    fn name(&self) -> &str;

    /// Start a job for a stored asset
    async fn submit(&self, asset: &RemoteAsset) -> Result<JobHandle, StageError>;

    /// Query job state once
    ///
    /// `Err` means the query itself failed; a job the service reports as
    /// failed is `Ok(PollStatus::Failed { .. })`.
    async fn poll(&self, job: &JobHandle) -> Result<PollStatus, StageError>;
}

/// Job state as reported by the analysis service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollStatus {
    InProgress,
    Succeeded { result: AnalysisResult },
    Failed { cause: String },
}

impl PollStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, PollStatus::InProgress)
    }
}
