//! # Task Registry
//!
//! Single source of truth for the state of every task in a batch.
//!
//! Transitions are compare-and-set: callers name the stage they expect the
//! record to be in, and the registry rejects the move when it is not. Only
//! one of several racing transitions on the same record can win.

mod error;
mod registry;
mod summary;

pub use error::{RegistryError, Result};
pub use registry::{SnapshotSource, TaskRegistry, Update};
pub use summary::StatusSummary;
