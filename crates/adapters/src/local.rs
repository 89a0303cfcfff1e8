//! Directory-backed fetch and transfer
//!
//! `DirectoryFetch` resolves `<source_dir>/<id>.*` and copies it into the
//! work directory. `DirectoryStore` plays the remote store: it copies the
//! work copy into the store directory and hands back its URL.

use std::path::{Path, PathBuf};

use contracts::{FetchAdapter, LocalAsset, RemoteAsset, StageError, TaskId, TransferAdapter};
use tokio::fs;
use tracing::{debug, instrument, warn};

use crate::error::{AdapterError, Result};

/// Reject ids that could escape the source directory
pub fn check_id(id: &str) -> std::result::Result<(), StageError> {
    if id.trim().is_empty() {
        return Err(StageError::invalid_input("empty identifier"));
    }
    if id == "." || id == ".." || id.contains(['/', '\\']) || id.chars().any(char::is_control) {
        return Err(StageError::invalid_input(format!(
            "malformed identifier {id:?}"
        )));
    }
    Ok(())
}

async fn ensure_dir(role: &'static str, path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| AdapterError::directory(role, path, e))
}

/// Fetch from a local media directory
#[derive(Debug, Clone)]
pub struct DirectoryFetch {
    source_dir: PathBuf,
    work_dir: PathBuf,
}

impl DirectoryFetch {
    /// Check the source directory and create the work directory
    pub async fn open(source_dir: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Result<Self> {
        let source_dir = source_dir.into();
        let work_dir = work_dir.into();

        if !fs::try_exists(&source_dir).await.unwrap_or(false) {
            return Err(AdapterError::MissingSource { path: source_dir });
        }
        ensure_dir("work", &work_dir).await?;

        Ok(Self {
            source_dir,
            work_dir,
        })
    }

    /// First file in the source directory named `<id>` or `<id>.<ext>`
    async fn locate(&self, id: &str) -> std::result::Result<PathBuf, StageError> {
        let mut entries = fs::read_dir(&self.source_dir).await?;
        let mut matches = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name_matches = path.file_name().is_some_and(|n| n == id)
                || path.file_stem().is_some_and(|s| s == id);
            if name_matches && entry.file_type().await?.is_file() {
                matches.push(path);
            }
        }

        matches.sort();
        matches
            .into_iter()
            .next()
            .ok_or_else(|| StageError::invalid_input(format!("no source asset for {id}")))
    }
}

impl FetchAdapter for DirectoryFetch {
    fn name(&self) -> &str {
        "directory"
    }

    #[instrument(name = "directory_fetch", skip(self, id), fields(id = %id))]
    async fn fetch(&self, id: &TaskId) -> std::result::Result<LocalAsset, StageError> {
        check_id(id)?;
        let source = self.locate(id).await?;
        let target = self.work_dir.join(work_name(id, &source));

        let size = fs::copy(&source, &target).await?;
        debug!(source = %source.display(), target = %target.display(), size, "asset fetched");

        Ok(LocalAsset {
            path: target,
            size: Some(size),
        })
    }
}

/// Name of the work copy: `<id>.<source extension>`
///
/// Keyed by the id so two ids resolving to the same source file, such as
/// `a` and `a.mp4`, never share a work copy.
fn work_name(id: &str, source: &Path) -> String {
    match source.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{id}.{ext}"),
        None => id.to_string(),
    }
}

/// Remote store backed by a directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    store_dir: PathBuf,
    base_url: Option<String>,
    keep_local: bool,
}

impl DirectoryStore {
    pub async fn open(
        store_dir: impl Into<PathBuf>,
        base_url: Option<String>,
        keep_local: bool,
    ) -> Result<Self> {
        let store_dir = store_dir.into();
        ensure_dir("store", &store_dir).await?;
        // canonical form makes file:// URLs absolute
        let store_dir = fs::canonicalize(&store_dir)
            .await
            .map_err(|e| AdapterError::directory("store", &store_dir, e))?;

        Ok(Self {
            store_dir,
            base_url,
            keep_local,
        })
    }

    fn url_for(&self, file_name: &str, stored: &Path) -> String {
        match &self.base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), file_name),
            None => format!("file://{}", stored.display()),
        }
    }
}

impl TransferAdapter for DirectoryStore {
    fn name(&self) -> &str {
        "directory_store"
    }

    #[instrument(name = "directory_store_transfer", skip(self, asset), fields(path = %asset.path.display()))]
    async fn transfer(&self, asset: &LocalAsset) -> std::result::Result<RemoteAsset, StageError> {
        let file_name = asset
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                StageError::invalid_input(format!("unusable asset path {}", asset.path.display()))
            })?;
        let stored = self.store_dir.join(file_name);

        fs::copy(&asset.path, &stored).await?;
        let url = self.url_for(file_name, &stored);

        if !self.keep_local {
            if let Err(e) = fs::remove_file(&asset.path).await {
                warn!(path = %asset.path.display(), error = %e, "failed to remove local copy");
            }
        }
        debug!(%url, "asset stored");

        Ok(RemoteAsset::new(url))
    }
}
