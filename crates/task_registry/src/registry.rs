//! TaskRegistry - single source of truth for task state

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use contracts::{Payload, RecordView, Stage, TaskError, TaskId, TaskRecord};
use tracing::{debug, trace};

use crate::error::{RegistryError, Result};
use crate::summary::StatusSummary;

/// Change applied together with a stage transition
#[derive(Debug, Clone)]
pub enum Update {
    /// Take the record for one more attempt in `to`'s pool.
    /// Allowed as `Pending -> Fetching` or as a same-stage re-entry.
    Attempt,
    /// Hand the record back after a retryable failure (same stage)
    Release,
    /// Move forward with a new current artifact
    Payload(Payload),
    /// One status query answered `InProgress` (`Polling -> Polling`).
    /// Only counts the query; the stage and `updated_at` stay as they are.
    Poll,
    /// Terminal failure (`to` must be `Failed`)
    Fail(TaskError),
}

impl Update {
    fn label(&self) -> &'static str {
        match self {
            Update::Attempt => "attempt",
            Update::Release => "release",
            Update::Payload(_) => "payload",
            Update::Poll => "poll",
            Update::Fail(_) => "fail",
        }
    }
}

/// Read-only access for status displays
pub trait SnapshotSource: Send + Sync {
    /// Point-in-time copy of every record, in input order
    fn snapshot(&self) -> Vec<RecordView>;
}

#[derive(Default)]
struct Inner {
    /// Published records in input order
    records: Vec<RecordView>,
    /// Task id -> position in `records`
    index: HashMap<TaskId, usize>,
    terminal: usize,
}

/// Concurrency-safe store of all task records of one batch
///
/// Every mutation runs under one write lock and publishes a fresh immutable
/// record, so readers never observe a half-applied transition and a
/// snapshot is consistent across all records.
#[derive(Default)]
pub struct TaskRegistry {
    inner: RwLock<Inner>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new task in `Pending`
    pub fn create(&self, id: TaskId) -> Result<RecordView> {
        let mut inner = self.write();
        if inner.index.contains_key(&id) {
            return Err(RegistryError::Duplicate { id });
        }

        let position = inner.records.len();
        let record = RecordView::new(TaskRecord::new(id.clone(), position));
        inner.index.insert(id, position);
        inner.records.push(record.clone());
        Ok(record)
    }

    /// Latest published record for `id`
    pub fn get(&self, id: &str) -> Option<RecordView> {
        let inner = self.read();
        inner.index.get(id).map(|&pos| inner.records[pos].clone())
    }

    /// Atomically move a record from `from` to `to`
    ///
    /// # Errors
    /// - `Conflict` when the record is not in `from`
    /// - `InFlight` when an attempt is requested on a held record
    /// - `Terminal` when the record already finished
    /// - `InvalidTransition` for moves off the lifecycle path
    pub fn transition(
        &self,
        id: &TaskId,
        from: Stage,
        to: Stage,
        update: Update,
    ) -> Result<RecordView> {
        let mut inner = self.write();
        let pos = *inner
            .index
            .get(id)
            .ok_or_else(|| RegistryError::UnknownTask { id: id.clone() })?;

        let current = &inner.records[pos];
        if current.stage.is_terminal() {
            return Err(RegistryError::Terminal {
                id: id.clone(),
                stage: current.stage,
            });
        }
        if current.stage != from {
            return Err(RegistryError::Conflict {
                id: id.clone(),
                expected: from,
                actual: current.stage,
            });
        }

        let label = update.label();
        let next = apply(current, to, update)?;
        trace!(task_id = %id, %from, %to, update = label, "transition");
        if next.stage.is_terminal() {
            inner.terminal += 1;
            debug!(task_id = %id, stage = %next.stage, "task finished");
        }

        let view = RecordView::new(next);
        inner.records[pos] = view.clone();
        Ok(view)
    }

    /// Fail a record regardless of its stage
    ///
    /// Returns the new record, or `None` when the task is unknown or already
    /// terminal (in which case nothing changes).
    pub fn force_fail(&self, id: &str, error: TaskError) -> Option<RecordView> {
        let mut inner = self.write();
        let pos = *inner.index.get(id)?;
        if inner.records[pos].stage.is_terminal() {
            return None;
        }

        let view = RecordView::new(failed(&inner.records[pos], error));
        inner.records[pos] = view.clone();
        inner.terminal += 1;
        debug!(task_id = %id, "task force-failed");
        Some(view)
    }

    /// Fail every non-terminal record with the same cause
    ///
    /// Returns the records changed by this call.
    pub fn fail_all_pending(&self, error: TaskError) -> Vec<RecordView> {
        let mut inner = self.write();
        let mut changed = Vec::new();

        for pos in 0..inner.records.len() {
            if inner.records[pos].stage.is_terminal() {
                continue;
            }
            let view = RecordView::new(failed(&inner.records[pos], error.clone()));
            inner.records[pos] = view.clone();
            changed.push(view);
        }

        inner.terminal += changed.len();
        changed
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    /// Records that reached `Succeeded` or `Failed`
    pub fn terminal_count(&self) -> usize {
        self.read().terminal
    }

    /// Every record is terminal
    pub fn is_drained(&self) -> bool {
        let inner = self.read();
        inner.terminal == inner.records.len()
    }

    pub fn snapshot(&self) -> Vec<RecordView> {
        self.read().records.clone()
    }

    /// Per-stage counts of the current snapshot
    pub fn summary(&self) -> StatusSummary {
        StatusSummary::from_records(&self.snapshot())
    }
}

impl SnapshotSource for TaskRegistry {
    fn snapshot(&self) -> Vec<RecordView> {
        TaskRegistry::snapshot(self)
    }
}

/// Compute the successor of `current` or reject the move
fn apply(current: &TaskRecord, to: Stage, update: Update) -> Result<TaskRecord> {
    let from = current.stage;
    let invalid = || RegistryError::InvalidTransition {
        id: current.id.clone(),
        from,
        to,
    };

    let stage_change = !matches!(update, Update::Poll);
    let mut next = current.clone();
    match update {
        Update::Attempt => {
            let entering = to == from || (from == Stage::Pending && to == Stage::Fetching);
            let kind = to.kind().filter(|_| entering && to != Stage::Pending && to != Stage::Polling);
            let Some(kind) = kind else {
                return Err(invalid());
            };
            if current.in_flight {
                return Err(RegistryError::InFlight {
                    id: current.id.clone(),
                    stage: from,
                });
            }
            next.in_flight = true;
            next.attempts[kind.index()] += 1;
        }
        Update::Release => {
            if to != from || !current.in_flight {
                return Err(invalid());
            }
            next.in_flight = false;
        }
        Update::Payload(payload) => {
            let forward = match to {
                Stage::Succeeded => from == Stage::Polling,
                Stage::Failed | Stage::Pending => false,
                _ => to.rank() == from.rank() + 1 && from != Stage::Pending,
            };
            if !forward {
                return Err(invalid());
            }
            if from == Stage::Polling {
                next.polls += 1;
            }
            next.replace_payload(payload);
            next.in_flight = false;
        }
        Update::Poll => {
            if from != Stage::Polling || to != Stage::Polling {
                return Err(invalid());
            }
            next.polls += 1;
        }
        Update::Fail(error) => {
            if to != Stage::Failed {
                return Err(invalid());
            }
            if from == Stage::Polling {
                next.polls += 1;
            }
            next.error = Some(error);
            next.in_flight = false;
        }
    }

    next.stage = to;
    if stage_change {
        next.updated_at = Instant::now();
    }
    Ok(next)
}

fn failed(current: &TaskRecord, error: TaskError) -> TaskRecord {
    let mut next = current.clone();
    next.stage = Stage::Failed;
    next.error = Some(error);
    next.in_flight = false;
    next.updated_at = Instant::now();
    next
}
