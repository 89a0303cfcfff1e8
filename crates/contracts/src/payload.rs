//! Stage artifacts
//!
//! Opaque references produced by one stage and consumed by the next. The
//! core never looks inside them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Source asset materialized on local disk by the fetch stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAsset {
    pub path: PathBuf,
    /// Size in bytes, if the adapter knows it
    #[serde(default)]
    pub size: Option<u64>,
}

impl LocalAsset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            size: None,
        }
    }
}

/// Asset reference in the remote store, reachable by the analysis service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAsset {
    pub url: String,
}

impl RemoteAsset {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Handle of a submitted analysis job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub String);

impl JobHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to the finished analysis output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub reference: String,
}

impl AnalysisResult {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
        }
    }
}

/// Current artifact of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Local(LocalAsset),
    Remote(RemoteAsset),
    Job(JobHandle),
    Result(AnalysisResult),
}

impl Payload {
    pub fn as_local(&self) -> Option<&LocalAsset> {
        match self {
            Payload::Local(asset) => Some(asset),
            _ => None,
        }
    }

    pub fn as_remote(&self) -> Option<&RemoteAsset> {
        match self {
            Payload::Remote(asset) => Some(asset),
            _ => None,
        }
    }

    pub fn as_job(&self) -> Option<&JobHandle> {
        match self {
            Payload::Job(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn as_result(&self) -> Option<&AnalysisResult> {
        match self {
            Payload::Result(result) => Some(result),
            _ => None,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Local(asset) => write!(f, "local:{}", asset.path.display()),
            Payload::Remote(asset) => write!(f, "remote:{}", asset.url),
            Payload::Job(handle) => write!(f, "job:{handle}"),
            Payload::Result(result) => write!(f, "result:{}", result.reference),
        }
    }
}

impl From<LocalAsset> for Payload {
    fn from(asset: LocalAsset) -> Self {
        Payload::Local(asset)
    }
}

impl From<RemoteAsset> for Payload {
    fn from(asset: RemoteAsset) -> Self {
        Payload::Remote(asset)
    }
}

impl From<JobHandle> for Payload {
    fn from(handle: JobHandle) -> Self {
        Payload::Job(handle)
    }
}

impl From<AnalysisResult> for Payload {
    fn from(result: AnalysisResult) -> Self {
        Payload::Result(result)
    }
}
