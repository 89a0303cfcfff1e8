//! Controller errors

use contracts::TaskId;
use task_registry::RegistryError;
use thiserror::Error;

/// Why a batch could not be started
///
/// Failures of individual tasks never surface here; they end up in the
/// `BatchResult`.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("duplicate task id in batch: {0}")]
    DuplicateId(TaskId),

    #[error("registry rejected the batch: {0}")]
    Registry(#[from] RegistryError),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
