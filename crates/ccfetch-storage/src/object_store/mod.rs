//! Archive store abstraction
//!
//! Provides ranged reads against the object store holding the crawl archive:
//! - HTTPS (data.commoncrawl.org)
//! - AWS S3 (the `commoncrawl` bucket)
//! - Local filesystem (mirrors, testing)
//! - In-memory mock with failure injection (testing)

mod http;
mod local;
mod mock;
mod s3;

pub use http::HttpArchiveStore;
pub use local::LocalArchiveStore;
pub use mock::{CallHistoryEntry, MockFailure, MockStore, MockStoreConfig};
pub use s3::S3ArchiveStore;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use ccfetch_core::{ByteRange, CoreError, CoreResult, StoreBackend, StoreConfig};

/// Body returned by [`ArchiveStore::get`].
#[derive(Debug, Clone)]
pub struct StoreResponse {
    /// Response body.
    pub body: Bytes,
    /// True when the store honoured the requested range (HTTP 206). False
    /// means `body` is the whole object, even if a range was requested.
    pub partial: bool,
    /// Range the store says it served (`Content-Range` for HTTP). Only set
    /// for partial responses; may differ from the requested range.
    pub served: Option<ByteRange>,
}

/// Read-only view of the remote archive.
///
/// All implementations must be thread-safe (Send + Sync). Keys are archive
/// filenames relative to the store root, treated as opaque strings.
///
/// # Error Handling
///
/// - `CoreError::NotFound` - object does not exist
/// - `CoreError::Rejected` - access refused or range not satisfiable
/// - `CoreError::TransientNetwork` - throttling, 5xx, connection trouble
/// - `CoreError::Truncated` - fewer bytes than promised arrived
///
/// # Examples
///
/// ```rust,no_run
/// use ccfetch_core::ByteRange;
/// use ccfetch_storage::object_store::{ArchiveStore, HttpArchiveStore};
///
/// #[tokio::main]
/// async fn main() -> ccfetch_core::CoreResult<()> {
///     let store = HttpArchiveStore::new(&Default::default())?;
///     let range = ByteRange::from_offset_len(3499, 689)?;
///     let response = store
///         .get("crawl-data/CC-MAIN-2024-22/segments/1/warc/CC-MAIN-1.warc.gz", Some(range))
///         .await?;
///     println!("{} bytes, partial={}", response.body.len(), response.partial);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Reads an object, or only `range` of it when given.
    ///
    /// Stores that cannot serve ranges may answer with the whole object and
    /// `partial == false`. Partial responses carry the range actually served
    /// in `served`; callers must not assume it equals `range`.
    async fn get(&self, key: &str, range: Option<ByteRange>) -> CoreResult<StoreResponse>;

    /// Size of the object in bytes, without transferring it.
    async fn size(&self, key: &str) -> CoreResult<u64>;
}

/// Builds the store selected by `config.backend`.
pub fn open_store(config: &StoreConfig) -> CoreResult<Arc<dyn ArchiveStore>> {
    let store: Arc<dyn ArchiveStore> = match config.backend {
        StoreBackend::Http => Arc::new(HttpArchiveStore::new(config)?),
        StoreBackend::S3 => Arc::new(S3ArchiveStore::new(config)?),
        StoreBackend::Local => {
            let root = config.local_root.as_ref().ok_or_else(|| {
                CoreError::ConfigError("store.local_root is required for the local backend".into())
            })?;
            Arc::new(LocalArchiveStore::new(root))
        }
    };
    Ok(store)
}

/// `start-end` or `full`, the label errors carry for a request.
pub(crate) fn range_label(range: Option<ByteRange>) -> String {
    range
        .map(|r| r.to_string())
        .unwrap_or_else(|| "full".to_string())
}
