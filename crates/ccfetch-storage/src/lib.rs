//! Remote archive access for ccfetch: object store backends, retry policy,
//! shared rate limiting and the segment fetcher.

pub mod fetcher;
pub mod object_store;
pub mod rate_limit;
pub mod retry;

pub use fetcher::{FetchResult, SegmentFetcher};
pub use object_store::{open_store, ArchiveStore, StoreResponse};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
