//! Core domain types for ccfetch: index records, fetch plans and the range planner.

pub mod config;
pub mod error;
pub mod plan;
pub mod planner;
pub mod record;

pub use config::{
    CcfetchConfig, PipelineConfig, PlannerConfig, RetryConfig, StoreBackend, StoreConfig,
};
pub use error::{CoreError, CoreResult, FailureKind};
pub use plan::{ByteRange, DownloadPlan, FetchMode, FetchPlan, FileDecision, MergedRange};
pub use planner::{FileSizes, RangePlanner};
pub use record::{parse_cdx_line, read_records_csv, CdxEntry, Record};
