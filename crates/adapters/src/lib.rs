//! # Adapters
//!
//! Concrete stage adapters.
//!
//! - `local`: directory-backed fetch and store
//! - `simulated`: in-memory fetch/transfer/analysis with configurable latency
//! - `mock`: scriptable adapters for tests (failure injection, call probes)
//! - `factory`: build the set selected by `AdapterConfig`

pub mod error;
pub mod factory;
pub mod local;
pub mod mock;
pub mod simulated;

pub use error::{AdapterError, Result};
pub use factory::{build_adapters, AdapterSet, AnalyzeBackend, FetchBackend, TransferBackend};
pub use local::{DirectoryFetch, DirectoryStore};
pub use mock::{ConcurrencyProbe, MockAnalyze, MockFetch, MockTransfer, ProbeGuard};
pub use simulated::{SimulatedAnalyze, SimulatedFetch, SimulatedTransfer};
