//! # Controller
//!
//! Drives one batch: registers the ids, connects
//! `fetch -> transfer -> analyze -> poll scheduler` through bounded queues,
//! seeds the fetch queue and waits until every record is terminal.
//! Cancellation and the batch timeout fail whatever is left with a
//! cancellation cause.

mod error;
mod pipeline;

pub use error::{ControllerError, Result};
pub use pipeline::{PipelineController, RunReport};
