//! Stage handlers: glue between a pool and its adapter
//!
//! A handler takes the record a worker just claimed, pulls the input it
//! needs out of the current payload and calls the adapter once.

use contracts::{
    AnalyzeAdapter, FetchAdapter, Payload, RecordView, StageError, StageKind, TransferAdapter,
};

/// One adapter call for a claimed record
#[trait_variant::make(StageHandler: Send)]
pub trait LocalStageHandler {
    fn kind(&self) -> StageKind;

    /// Adapter name for logs
    fn adapter_name(&self) -> &str;

    /// Produce the payload carried into the next stage
    async fn handle(&self, record: &RecordView) -> Result<Payload, StageError>;
}

/// Fetch: identifier -> local asset
pub struct FetchStage<A> {
    adapter: A,
}

impl<A> FetchStage<A> {
    pub fn new(adapter: A) -> Self {
        Self { adapter }
    }
}

impl<A: FetchAdapter + Sync> StageHandler for FetchStage<A> {
    fn kind(&self) -> StageKind {
        StageKind::Fetch
    }

    fn adapter_name(&self) -> &str {
        self.adapter.name()
    }

    async fn handle(&self, record: &RecordView) -> Result<Payload, StageError> {
        let asset = self.adapter.fetch(&record.id).await?;
        Ok(asset.into())
    }
}

/// Transfer: local asset -> remote asset
pub struct TransferStage<A> {
    adapter: A,
}

impl<A> TransferStage<A> {
    pub fn new(adapter: A) -> Self {
        Self { adapter }
    }
}

impl<A: TransferAdapter + Sync> StageHandler for TransferStage<A> {
    fn kind(&self) -> StageKind {
        StageKind::Transfer
    }

    fn adapter_name(&self) -> &str {
        self.adapter.name()
    }

    async fn handle(&self, record: &RecordView) -> Result<Payload, StageError> {
        let asset = record
            .payload
            .as_ref()
            .and_then(Payload::as_local)
            .ok_or_else(|| missing_input(record, "local asset"))?;
        let remote = self.adapter.transfer(asset).await?;
        Ok(remote.into())
    }
}

/// Submit half of analysis: remote asset -> job handle
///
/// Polling is not done here; the job goes to the poll scheduler so the
/// worker slot frees up right after submission.
pub struct SubmitStage<A> {
    adapter: std::sync::Arc<A>,
}

impl<A> SubmitStage<A> {
    pub fn new(adapter: std::sync::Arc<A>) -> Self {
        Self { adapter }
    }
}

impl<A: AnalyzeAdapter + Send + Sync> StageHandler for SubmitStage<A> {
    fn kind(&self) -> StageKind {
        StageKind::Analyze
    }

    fn adapter_name(&self) -> &str {
        self.adapter.name()
    }

    async fn handle(&self, record: &RecordView) -> Result<Payload, StageError> {
        let asset = record
            .payload
            .as_ref()
            .and_then(Payload::as_remote)
            .ok_or_else(|| missing_input(record, "remote asset"))?;
        let job = self.adapter.submit(asset).await?;
        Ok(job.into())
    }
}

fn missing_input(record: &RecordView, expected: &str) -> StageError {
    let found = record
        .payload
        .as_ref()
        .map_or_else(|| "nothing".to_string(), |p| p.to_string());
    StageError::invalid_input(format!(
        "task {} reached {} without a {expected} (found {found})",
        record.id, record.stage
    ))
}

#[cfg(test)]
mod tests {
    use super::{FetchStage, StageHandler, SubmitStage, TransferStage};
    use contracts::{
        AnalyzeAdapter, FetchAdapter, JobHandle, LocalAsset, Payload, PollStatus, RecordView,
        RemoteAsset, Stage, StageError, StageKind, TaskId, TaskRecord, TransferAdapter,
    };
    use std::sync::Arc;

    struct StaticTransfer;

    impl TransferAdapter for StaticTransfer {
        fn name(&self) -> &str {
            "static"
        }

        async fn transfer(&self, asset: &LocalAsset) -> Result<RemoteAsset, StageError> {
            Ok(RemoteAsset::new(format!("mem://{}", asset.path.display())))
        }
    }

    struct StaticAnalyze;

    impl AnalyzeAdapter for StaticAnalyze {
        fn name(&self) -> &str {
            "static"
        }

        async fn submit(&self, asset: &RemoteAsset) -> Result<JobHandle, StageError> {
            Ok(JobHandle::new(format!("job:{}", asset.url)))
        }

        async fn poll(&self, _job: &JobHandle) -> Result<PollStatus, StageError> {
            Ok(PollStatus::InProgress)
        }
    }

    struct EchoFetch;

    impl FetchAdapter for EchoFetch {
        fn name(&self) -> &str {
            "echo"
        }

        async fn fetch(&self, id: &TaskId) -> Result<LocalAsset, StageError> {
            Ok(LocalAsset::new(format!("/tmp/{id}")))
        }
    }

    fn record(stage: Stage, payload: Option<Payload>) -> RecordView {
        let mut r = TaskRecord::new("a".into(), 0);
        r.stage = stage;
        r.payload = payload;
        Arc::new(r)
    }

    #[tokio::test]
    async fn test_fetch_produces_local_asset() {
        let stage = FetchStage::new(EchoFetch);
        let payload = stage.handle(&record(Stage::Fetching, None)).await.unwrap();
        assert_eq!(payload.as_local().unwrap().path, std::path::PathBuf::from("/tmp/a"));
        assert_eq!(stage.kind(), StageKind::Fetch);
    }

    #[tokio::test]
    async fn test_transfer_requires_local_asset() {
        let stage = TransferStage::new(StaticTransfer);

        let ok = record(Stage::Transferring, Some(LocalAsset::new("/w/a").into()));
        let payload = stage.handle(&ok).await.unwrap();
        assert_eq!(payload.as_remote().unwrap().url, "mem:///w/a");

        let wrong = record(Stage::Transferring, Some(RemoteAsset::new("x").into()));
        let err = stage.handle(&wrong).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_submit_produces_job_handle() {
        let stage = SubmitStage::new(Arc::new(StaticAnalyze));
        let rec = record(Stage::Submitting, Some(RemoteAsset::new("s://a").into()));
        let payload = stage.handle(&rec).await.unwrap();
        assert_eq!(payload.as_job().unwrap().as_str(), "job:s://a");

        let empty = record(Stage::Submitting, None);
        assert!(stage.handle(&empty).await.is_err());
    }
}
