//! # Contracts
//!
//! Frozen interface contracts shared by every crate in the workspace.
//! Business crates depend only on this crate, never on each other in reverse.
//!
//! ## Task Model
//! - One `TaskRecord` per input id, moving along
//!   `Pending -> Fetching -> Transferring -> Submitting -> Polling -> {Succeeded | Failed}`
//! - Adapters (`FetchAdapter`, `TransferAdapter`, `AnalyzeAdapter`) produce
//!   opaque `Payload`s and report failures as `StageError`
//! - Terminal failures carry a `TaskError`; the run ends with a `BatchResult`

mod adapter;
mod batch;
mod blueprint;
mod error;
mod payload;
mod record;
mod stage;
mod task_id;

pub use adapter::{
    AnalyzeAdapter, FetchAdapter, LocalAnalyzeAdapter, LocalFetchAdapter, LocalTransferAdapter,
    PollStatus, TransferAdapter,
};
pub use batch::BatchResult;
pub use blueprint::*;
pub use error::*;
pub use payload::*;
pub use record::{RecordView, TaskRecord};
pub use stage::{Stage, StageKind};
pub use task_id::TaskId;
