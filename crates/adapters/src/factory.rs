//! Build the adapter set selected by `AdapterConfig`

use contracts::{
    AdapterConfig, AdapterKind, AnalyzeAdapter, FetchAdapter, JobHandle, LocalAsset, PollStatus,
    RemoteAsset, StageError, TaskId, TransferAdapter,
};
use tracing::{info, instrument};

use crate::error::Result;
use crate::local::{DirectoryFetch, DirectoryStore};
use crate::simulated::{SimulatedAnalyze, SimulatedFetch, SimulatedTransfer};

/// Fetch adapter chosen at runtime
#[derive(Debug)]
pub enum FetchBackend {
    Directory(DirectoryFetch),
    Simulated(SimulatedFetch),
}

impl FetchAdapter for FetchBackend {
    fn name(&self) -> &str {
        match self {
            Self::Directory(a) => a.name(),
            Self::Simulated(a) => a.name(),
        }
    }

    async fn fetch(&self, id: &TaskId) -> std::result::Result<LocalAsset, StageError> {
        match self {
            Self::Directory(a) => a.fetch(id).await,
            Self::Simulated(a) => a.fetch(id).await,
        }
    }
}

/// Transfer adapter chosen at runtime
#[derive(Debug)]
pub enum TransferBackend {
    Directory(DirectoryStore),
    Simulated(SimulatedTransfer),
}

impl TransferAdapter for TransferBackend {
    fn name(&self) -> &str {
        match self {
            Self::Directory(a) => a.name(),
            Self::Simulated(a) => a.name(),
        }
    }

    async fn transfer(&self, asset: &LocalAsset) -> std::result::Result<RemoteAsset, StageError> {
        match self {
            Self::Directory(a) => a.transfer(asset).await,
            Self::Simulated(a) => a.transfer(asset).await,
        }
    }
}

/// Analysis adapter chosen at runtime
///
/// Only the simulated service exists today; the enum keeps the seam open
/// for a real client.
#[derive(Debug)]
pub enum AnalyzeBackend {
    Simulated(SimulatedAnalyze),
}

impl AnalyzeAdapter for AnalyzeBackend {
    fn name(&self) -> &str {
        match self {
            Self::Simulated(a) => a.name(),
        }
    }

    async fn submit(&self, asset: &RemoteAsset) -> std::result::Result<JobHandle, StageError> {
        match self {
            Self::Simulated(a) => a.submit(asset).await,
        }
    }

    async fn poll(&self, job: &JobHandle) -> std::result::Result<PollStatus, StageError> {
        match self {
            Self::Simulated(a) => a.poll(job).await,
        }
    }
}

/// The three adapters of one run
#[derive(Debug)]
pub struct AdapterSet {
    pub fetch: FetchBackend,
    pub transfer: TransferBackend,
    pub analyze: AnalyzeBackend,
}

impl AdapterSet {
    /// Names for logs, in stage order
    pub fn names(&self) -> [&str; 3] {
        [self.fetch.name(), self.transfer.name(), self.analyze.name()]
    }
}

/// Build adapters from configuration
///
/// `Local` prepares the work and store directories and fails early when
/// the source directory is missing.
#[instrument(name = "adapter_factory_build", skip(config), fields(kind = ?config.kind))]
pub async fn build_adapters(config: &AdapterConfig) -> Result<AdapterSet> {
    let set = match config.kind {
        AdapterKind::Local => AdapterSet {
            fetch: FetchBackend::Directory(
                DirectoryFetch::open(&config.source_dir, &config.work_dir).await?,
            ),
            transfer: TransferBackend::Directory(
                DirectoryStore::open(&config.store_dir, config.base_url.clone(), config.keep_local)
                    .await?,
            ),
            analyze: AnalyzeBackend::Simulated(SimulatedAnalyze::new(&config.simulated)),
        },
        AdapterKind::Simulated => AdapterSet {
            fetch: FetchBackend::Simulated(SimulatedFetch::new(&config.simulated, &config.work_dir)),
            transfer: TransferBackend::Simulated(SimulatedTransfer::new(&config.simulated)),
            analyze: AnalyzeBackend::Simulated(SimulatedAnalyze::new(&config.simulated)),
        },
    };

    let [fetch, transfer, analyze] = set.names();
    info!(fetch, transfer, analyze, "adapters ready");
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::SimulatedConfig;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_build_simulated() {
        let config = AdapterConfig {
            kind: AdapterKind::Simulated,
            simulated: SimulatedConfig {
                latency_ms: 0,
                polls_until_done: 0,
                fail_ids: vec![],
            },
            ..Default::default()
        };
        let set = build_adapters(&config).await.unwrap();
        assert_eq!(
            set.names(),
            ["simulated_fetch", "simulated_transfer", "simulated_analyze"]
        );

        let local = set.fetch.fetch(&"x".into()).await.unwrap();
        let remote = set.transfer.transfer(&local).await.unwrap();
        let job = set.analyze.submit(&remote).await.unwrap();
        assert!(set.analyze.poll(&job).await.unwrap().is_finished());
    }

    #[tokio::test]
    async fn test_build_local() {
        let root = tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("media")).unwrap();
        let config = AdapterConfig {
            kind: AdapterKind::Local,
            source_dir: root.path().join("media"),
            work_dir: root.path().join("work"),
            store_dir: root.path().join("store"),
            ..Default::default()
        };

        let set = build_adapters(&config).await.unwrap();
        assert_eq!(set.names()[0], "directory");
        assert!(root.path().join("work").is_dir());
        assert!(root.path().join("store").is_dir());
    }

    #[tokio::test]
    async fn test_build_local_without_source_fails() {
        let root = tempdir().unwrap();
        let config = AdapterConfig {
            source_dir: root.path().join("missing"),
            work_dir: root.path().join("work"),
            store_dir: root.path().join("store"),
            ..Default::default()
        };
        assert!(build_adapters(&config).await.is_err());
    }
}
