//! Batch orchestration: fan a set of document ids out to classifier workers
//! under a concurrency bound, and collect one outcome per id.

mod error;
pub use error::BatchError;

mod orchestrator;
pub use orchestrator::{Orchestrator, stale_in_flight};

pub mod report;
pub use report::{BatchReport, BatchSummary, DocumentOutcome};
