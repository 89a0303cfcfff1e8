//! Aggregated view of a registry snapshot

use contracts::{RecordView, Stage};
use serde::Serialize;

/// Per-stage counts at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub pending: usize,
    pub fetching: usize,
    pub transferring: usize,
    pub submitting: usize,
    pub polling: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Records currently held by a worker
    pub in_flight: usize,
}

impl StatusSummary {
    pub fn from_records(records: &[RecordView]) -> Self {
        let mut summary = Self {
            total: records.len(),
            ..Default::default()
        };
        for record in records {
            *summary.slot(record.stage) += 1;
            if record.in_flight {
                summary.in_flight += 1;
            }
        }
        summary
    }

    fn slot(&mut self, stage: Stage) -> &mut usize {
        match stage {
            Stage::Pending => &mut self.pending,
            Stage::Fetching => &mut self.fetching,
            Stage::Transferring => &mut self.transferring,
            Stage::Submitting => &mut self.submitting,
            Stage::Polling => &mut self.polling,
            Stage::Succeeded => &mut self.succeeded,
            Stage::Failed => &mut self.failed,
        }
    }

    pub fn count(&self, stage: Stage) -> usize {
        match stage {
            Stage::Pending => self.pending,
            Stage::Fetching => self.fetching,
            Stage::Transferring => self.transferring,
            Stage::Submitting => self.submitting,
            Stage::Polling => self.polling,
            Stage::Succeeded => self.succeeded,
            Stage::Failed => self.failed,
        }
    }

    /// Records in `Succeeded` or `Failed`
    pub fn done(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Fraction of finished records in `[0, 1]`
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.done() as f64 / self.total as f64
    }

    pub fn is_complete(&self) -> bool {
        self.done() == self.total
    }
}
