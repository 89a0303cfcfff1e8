//! Task lifecycle stages
//!
//! `Stage` is the lifecycle state stored on a record; `StageKind` names one
//! of the three worker pools that move records between states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a task record
///
/// Ordered along the only legal path:
/// `Pending -> Fetching -> Transferring -> Submitting -> Polling -> {Succeeded | Failed}`.
/// `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Fetching,
    Transferring,
    Submitting,
    Polling,
    Succeeded,
    Failed,
}

impl Stage {
    /// All stages in lifecycle order
    pub const ALL: [Stage; 7] = [
        Stage::Pending,
        Stage::Fetching,
        Stage::Transferring,
        Stage::Submitting,
        Stage::Polling,
        Stage::Succeeded,
        Stage::Failed,
    ];

    /// Whether the stage is final (record immutable from here on)
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Succeeded | Stage::Failed)
    }

    /// Worker pool responsible for records in this stage
    pub fn kind(self) -> Option<StageKind> {
        match self {
            Stage::Pending | Stage::Fetching => Some(StageKind::Fetch),
            Stage::Transferring => Some(StageKind::Transfer),
            Stage::Submitting | Stage::Polling => Some(StageKind::Analyze),
            Stage::Succeeded | Stage::Failed => None,
        }
    }

    /// Position along the lifecycle path
    pub fn rank(self) -> u8 {
        match self {
            Stage::Pending => 0,
            Stage::Fetching => 1,
            Stage::Transferring => 2,
            Stage::Submitting => 3,
            Stage::Polling => 4,
            Stage::Succeeded | Stage::Failed => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Fetching => "fetching",
            Stage::Transferring => "transferring",
            Stage::Submitting => "submitting",
            Stage::Polling => "polling",
            Stage::Succeeded => "succeeded",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three worker pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Fetch,
    Transfer,
    Analyze,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::Fetch, StageKind::Transfer, StageKind::Analyze];

    /// State a record holds while this pool owns it
    pub fn entry(self) -> Stage {
        match self {
            StageKind::Fetch => Stage::Fetching,
            StageKind::Transfer => Stage::Transferring,
            StageKind::Analyze => Stage::Submitting,
        }
    }

    /// State a record moves to when this pool's adapter succeeds
    pub fn exit(self) -> Stage {
        match self {
            StageKind::Fetch => Stage::Transferring,
            StageKind::Transfer => Stage::Submitting,
            StageKind::Analyze => Stage::Polling,
        }
    }

    pub fn index(self) -> usize {
        match self {
            StageKind::Fetch => 0,
            StageKind::Transfer => 1,
            StageKind::Analyze => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Fetch => "fetch",
            StageKind::Transfer => "transfer",
            StageKind::Analyze => "analyze",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
