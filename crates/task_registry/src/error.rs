//! Registry error types

use contracts::{Stage, TaskId};
use thiserror::Error;

/// Rejected registry operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Current stage differs from the caller's expectation
    #[error("conflict on task {id}: expected {expected}, found {actual}")]
    Conflict {
        id: TaskId,
        expected: Stage,
        actual: Stage,
    },

    /// Another worker already holds the record
    #[error("task {id} is already in flight in {stage}")]
    InFlight { id: TaskId, stage: Stage },

    /// Record already finished; terminal records never change
    #[error("task {id} is already {stage}")]
    Terminal { id: TaskId, stage: Stage },

    /// Transition not on the lifecycle path
    #[error("invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition { id: TaskId, from: Stage, to: Stage },

    #[error("unknown task {id}")]
    UnknownTask { id: TaskId },

    #[error("duplicate task {id}")]
    Duplicate { id: TaskId },
}

impl RegistryError {
    /// Signals a scheduling bug rather than a normal race with cancellation
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::InFlight { .. } | Self::InvalidTransition { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

/// Registry Result type alias
pub type Result<T> = std::result::Result<T, RegistryError>;
