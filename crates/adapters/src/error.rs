//! Adapter setup errors

use std::path::PathBuf;

use thiserror::Error;

/// Failure to build an adapter from configuration
///
/// Errors raised while a stage runs are `StageError`s; this type only covers
/// construction.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Directory could not be prepared
    #[error("failed to prepare {role} directory {path}: {source}")]
    Directory {
        role: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Source directory does not exist
    #[error("source directory {path} does not exist")]
    MissingSource { path: PathBuf },
}

impl AdapterError {
    pub fn directory(role: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Directory {
            role,
            path: path.into(),
            source,
        }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, AdapterError>;
