//! # Stage Runner
//!
//! Worker pools that move task records through the pipeline.
//!
//! - `StageQueue`: bounded MPMC queue in front of each pool; a full queue
//!   blocks the upstream pool
//! - `BoundedStageRunner`: N workers, one adapter call each at a time, with
//!   retry/backoff for transient failures
//! - `PollScheduler`: due-time heap that polls submitted analysis jobs
//!   without holding a worker slot
//! - `TerminalSink`: every record that reaches `Succeeded` or `Failed`

mod handler;
mod metrics;
mod poller;
mod queue;
mod retry;
mod runner;
mod sink;

pub use handler::{FetchStage, LocalStageHandler, StageHandler, SubmitStage, TransferStage};
pub use metrics::{InFlightGuard, StageMetrics, StageMetricsSnapshot};
pub use poller::{PollScheduler, PollSender, PollStats};
pub use queue::{StageQueue, WorkItem};
pub use retry::{sleep_or_cancel, RetryPolicy};
pub use runner::{BoundedStageRunner, Downstream, RunnerContext};
pub use sink::{terminal_sink, TerminalReceiver, TerminalSink};
