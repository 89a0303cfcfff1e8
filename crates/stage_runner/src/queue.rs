//! Bounded MPMC queue between two pools

use async_channel::{bounded, Receiver, Sender};
use contracts::{Stage, StageKind, TaskId};

/// One queued unit of work
///
/// `from` is the stage the record is expected to be in when a worker picks
/// it up; a stale item fails the registry's compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: TaskId,
    pub from: Stage,
}

impl WorkItem {
    pub fn new(id: TaskId, from: Stage) -> Self {
        Self { id, from }
    }
}

/// Inbound queue of one pool
///
/// Cloning shares the same channel. Pushing onto a full queue waits, which
/// is what throttles a fast upstream pool behind a slow one.
#[derive(Debug, Clone)]
pub struct StageQueue {
    kind: StageKind,
    tx: Sender<WorkItem>,
    rx: Receiver<WorkItem>,
}

impl StageQueue {
    pub fn new(kind: StageKind, capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { kind, tx, rx }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Wait for room and enqueue; fails once the queue is closed
    pub async fn push(&self, item: WorkItem) -> Result<(), WorkItem> {
        self.tx.send(item).await.map_err(|e| e.into_inner())
    }

    /// Enqueue without waiting
    pub fn try_push(&self, item: WorkItem) -> Result<(), WorkItem> {
        self.tx.try_send(item).map_err(|e| e.into_inner())
    }

    /// Next item, or `None` once closed and empty
    pub async fn pop(&self) -> Option<WorkItem> {
        self.rx.recv().await.ok()
    }

    /// Stop accepting items; queued items can still be popped
    pub fn close(&self) -> bool {
        self.tx.close()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }
}
