//! Retrieval pipeline for ccfetch.
//!
//! Plans records into fetches, runs them under bounded concurrency with
//! shared politeness, and extracts one payload per record from the fetched
//! windows.

pub mod cancel;
pub mod pipeline;
pub mod report;
pub mod state;

pub use cancel::CancelToken;
pub use pipeline::RetrievalPipeline;
pub use report::{FileSummary, PlanOutcome, RetrievalReport, Retrieved};
pub use state::{PlanState, PlanTracker};
