//! TaskRecord - the unit of work tracked by the registry

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{Payload, Stage, StageKind, TaskError, TaskId};

/// Read-only view handed out by registry snapshots
///
/// Records are immutable once published; a transition publishes a new one.
pub type RecordView = Arc<TaskRecord>;

/// State of one task
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// External identifier
    pub id: TaskId,

    /// Position in the input batch (0-based)
    pub index: usize,

    /// Current lifecycle state
    pub stage: Stage,

    /// Attempts started per pool, indexed by `StageKind::index`
    pub attempts: [u32; 3],

    /// Status queries issued against the analysis job
    pub polls: u32,

    /// A worker currently holds this record
    pub in_flight: bool,

    /// Current artifact
    pub payload: Option<Payload>,

    /// Superseded artifacts, oldest first
    pub history: Vec<Payload>,

    /// Set only when `stage == Failed`
    pub error: Option<TaskError>,

    pub created_at: Instant,
    pub updated_at: Instant,
}

impl TaskRecord {
    pub fn new(id: TaskId, index: usize) -> Self {
        let now = Instant::now();
        Self {
            id,
            index,
            stage: Stage::Pending,
            attempts: [0; 3],
            polls: 0,
            in_flight: false,
            payload: None,
            history: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn attempts(&self, kind: StageKind) -> u32 {
        self.attempts[kind.index()]
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Time since the record was created, frozen once terminal
    pub fn elapsed(&self) -> Duration {
        if self.is_terminal() {
            self.updated_at.duration_since(self.created_at)
        } else {
            self.created_at.elapsed()
        }
    }

    /// Move `payload` forward, keeping the old one for diagnostics
    pub fn replace_payload(&mut self, payload: Payload) {
        if let Some(previous) = self.payload.replace(payload) {
            self.history.push(previous);
        }
    }
}
