//! Per-pool counters

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use contracts::StageKind;

/// Metrics for one stage pool
#[derive(Debug)]
pub struct StageMetrics {
    kind: StageKind,
    /// Adapter calls in progress
    in_flight: AtomicUsize,
    /// Highest `in_flight` seen
    peak_in_flight: AtomicUsize,
    /// Adapter calls started
    invocations: AtomicU64,
    /// Retries scheduled
    retries: AtomicU64,
    /// Records failed by this pool
    failures: AtomicU64,
    /// Records handed downstream
    forwarded: AtomicU64,
}

impl StageMetrics {
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            invocations: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Mark an adapter call as started; the guard ends it on drop
    pub fn enter(&self) -> InFlightGuard<'_> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        observability::record_in_flight(self.kind, now);
        InFlightGuard { metrics: self }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StageMetricsSnapshot {
        StageMetricsSnapshot {
            kind: self.kind,
            in_flight: self.in_flight(),
            peak_in_flight: self.peak_in_flight(),
            invocations: self.invocations.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
        }
    }
}

/// Decrements `in_flight` when dropped
pub struct InFlightGuard<'a> {
    metrics: &'a StageMetrics,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let now = self.metrics.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        observability::record_in_flight(self.metrics.kind, now);
    }
}

/// Point-in-time copy of `StageMetrics`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageMetricsSnapshot {
    pub kind: StageKind,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub invocations: u64,
    pub retries: u64,
    pub failures: u64,
    pub forwarded: u64,
}
