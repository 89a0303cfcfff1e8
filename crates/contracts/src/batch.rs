//! BatchResult - Pipeline Controller output

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ErrorKind, RecordView, Stage, TaskError, TaskId};

/// Final outcome of a batch
///
/// Every input id appears exactly once, either in `succeeded` or in `failed`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResult {
    /// Number of input ids
    pub total: usize,

    /// Succeeded ids in input order
    pub succeeded: Vec<TaskId>,

    /// Failed ids with their cause
    pub failed: BTreeMap<TaskId, TaskError>,

    /// The batch ended through cancellation or timeout
    #[serde(default)]
    pub cancelled: bool,

    /// Wall time of the run (milliseconds)
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl BatchResult {
    /// Build the result from a final registry snapshot
    ///
    /// A record that is somehow not terminal is reported as a scheduling
    /// conflict rather than dropped.
    pub fn from_records(records: &[RecordView]) -> Self {
        let mut ordered: Vec<&RecordView> = records.iter().collect();
        ordered.sort_by_key(|r| r.index);

        let mut result = Self {
            total: records.len(),
            ..Default::default()
        };

        for record in ordered {
            match record.stage {
                Stage::Succeeded => result.succeeded.push(record.id.clone()),
                Stage::Failed => {
                    let cause = record.error.clone().unwrap_or_else(|| {
                        TaskError::conflict(None, "failed without a recorded cause")
                    });
                    result.failed.insert(record.id.clone(), cause);
                }
                stage => {
                    result.failed.insert(
                        record.id.clone(),
                        TaskError::conflict(
                            stage.kind(),
                            format!("record still {stage} at batch end"),
                        ),
                    );
                }
            }
        }

        result
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.succeeded.len() == self.total
    }

    /// Failed ids of one error class
    pub fn failed_with(&self, kind: ErrorKind) -> Vec<&TaskId> {
        self.failed
            .iter()
            .filter(|(_, err)| err.kind == kind)
            .map(|(id, _)| id)
            .collect()
    }

    /// Tasks that hit a registry conflict; these point at scheduling bugs
    pub fn conflicts(&self) -> Vec<&TaskId> {
        self.failed_with(ErrorKind::SchedulingConflict)
    }

    pub fn is_succeeded(&self, id: &str) -> bool {
        self.succeeded.iter().any(|s| s == id)
    }

    pub fn error_for(&self, id: &str) -> Option<&TaskError> {
        self.failed.get(id)
    }
}
