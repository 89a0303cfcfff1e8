//! Layered error definitions
//!
//! - `ContractError`: configuration and I/O outside the task lifecycle
//! - `StageError`: what an adapter reports for one invocation
//! - `TaskError`: the cause stored on a failed record and in the batch result

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::StageKind;

/// Unified configuration/infrastructure error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failure reported by a stage adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// Network blip, rate limit, temporary unavailability
    #[error("transient io error: {message}")]
    TransientIo { message: String },

    /// Malformed identifier or unusable input artifact
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// The external service rejected or failed the work
    #[error("external service error: {message}")]
    ExternalService { message: String },
}

impl StageError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientIo {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::ExternalService {
            message: message.into(),
        }
    }

    /// Only transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransientIo { .. } => ErrorKind::TransientIo,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::ExternalService { .. } => ErrorKind::ExternalService,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::TransientIo { message }
            | Self::InvalidInput { message }
            | Self::ExternalService { message } => message,
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::NotFound | Io::InvalidInput | Io::InvalidData | Io::PermissionDenied => {
                Self::invalid_input(err.to_string())
            }
            _ => Self::transient(err.to_string()),
        }
    }
}

/// Classification of a terminal failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientIo,
    InvalidInput,
    ExternalService,
    /// Job still running when the poll deadline passed
    JobTimeout,
    /// Registry transition mismatch; signals a scheduling bug
    SchedulingConflict,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::ExternalService => "external_service",
            ErrorKind::JobTimeout => "job_timeout",
            ErrorKind::SchedulingConflict => "scheduling_conflict",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured cause of a failed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    /// Pool that was working on the task when it failed
    pub stage: Option<StageKind>,
    pub message: String,
    /// Attempts spent in `stage` before giving up
    #[serde(default)]
    pub attempts: u32,
}

impl TaskError {
    pub fn new(kind: ErrorKind, stage: Option<StageKind>, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
            attempts: 0,
        }
    }

    /// Wrap an adapter failure
    pub fn from_stage(stage: StageKind, err: &StageError, attempts: u32) -> Self {
        Self {
            kind: err.kind(),
            stage: Some(stage),
            message: err.message().to_string(),
            attempts,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, None, message)
    }

    pub fn conflict(stage: Option<StageKind>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SchedulingConflict, stage, message)
    }

    pub fn job_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::JobTimeout, Some(StageKind::Analyze), message)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(stage) = self.stage {
            write!(f, "[{stage}] ")?;
        }
        write!(f, "{}: {}", self.kind, self.message)?;
        if self.attempts > 1 {
            write!(f, " (after {} attempts)", self.attempts)?;
        }
        Ok(())
    }
}

impl std::error::Error for TaskError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(StageError::transient("reset").is_retryable());
        assert!(!StageError::invalid_input("bad id").is_retryable());
        assert!(!StageError::external("job failed").is_retryable());
    }

    #[test]
    fn test_io_error_classification() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(StageError::from(missing).kind(), ErrorKind::InvalidInput);

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(StageError::from(reset).is_retryable());
    }

    #[test]
    fn test_task_error_display() {
        let err = TaskError::from_stage(StageKind::Fetch, &StageError::transient("timeout"), 3);
        assert_eq!(
            err.to_string(),
            "[fetch] transient_io: timeout (after 3 attempts)"
        );
        assert_eq!(
            TaskError::cancelled("batch cancelled").to_string(),
            "cancelled: batch cancelled"
        );
    }
}
