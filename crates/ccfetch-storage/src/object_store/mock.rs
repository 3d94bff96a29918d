//! Mock ArchiveStore for testing
//!
//! In-memory archive with configurable failure patterns for testing retry,
//! throttling and partial-content handling without a network.
//!
//! # Features
//!
//! - **Deterministic Failures**: Pre-defined response sequences
//! - **Random Failures**: Configurable failure rate
//! - **Range Quirks**: Servers that ignore `Range` or cut bodies short
//! - **Call History**: Track all requests for assertions
//!
//! # Examples
//!
//! ```rust
//! use bytes::Bytes;
//! use ccfetch_core::ByteRange;
//! use ccfetch_storage::object_store::{ArchiveStore, MockFailure, MockStore};
//!
//! # async fn example() -> ccfetch_core::CoreResult<()> {
//! let mock = MockStore::new_with_failures(vec![
//!     MockFailure::Status(503),
//!     MockFailure::Ok,
//! ]);
//! mock.insert("a.warc.gz", Bytes::from_static(b"0123456789"));
//!
//! let range = Some(ByteRange::new(0, 3)?);
//! assert!(mock.get("a.warc.gz", range).await.is_err());
//! assert!(mock.get("a.warc.gz", range).await.is_ok());
//!
//! assert_eq!(mock.failed_gets(), 1);
//! assert_eq!(mock.successful_gets(), 1);
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ccfetch_core::{ByteRange, CoreError, CoreResult};
use parking_lot::RwLock;
use tokio::time::Instant;

use super::{range_label, ArchiveStore, StoreResponse};

/// Scripted behaviour for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// Answer with this HTTP status (404, 403, 429, 503, ...).
    Status(u16),

    /// Throttle with a `Retry-After` value in seconds.
    Throttled { status: u16, retry_after_secs: u64 },

    /// Connection dropped before a response arrived.
    Timeout,

    /// Serve only the first `n` bytes of what would have been returned.
    Truncate(usize),

    /// Ignore the `Range` header and return the whole object (HTTP 200).
    IgnoreRange,

    /// Answer 206 from byte 0 through the requested end, with a matching
    /// served range.
    ServeFromStart,

    /// Behave normally.
    Ok,
}

/// Mock store configuration.
#[derive(Debug, Clone)]
pub struct MockStoreConfig {
    /// Simulated network latency per request.
    pub latency: Duration,

    /// Enable call history tracking.
    pub track_history: bool,
}

impl Default for MockStoreConfig {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            track_history: true,
        }
    }
}

/// Mock call history entry.
#[derive(Debug, Clone)]
pub struct CallHistoryEntry {
    /// Operation type: "get" or "size".
    pub operation: &'static str,

    /// Archive key.
    pub key: String,

    /// Requested range, if any.
    pub range: Option<ByteRange>,

    /// Whether the request succeeded.
    pub success: bool,

    /// Time of the request (tokio clock, so paused tests see virtual time).
    pub timestamp: Instant,
}

/// In-memory ArchiveStore with scripted failures.
pub struct MockStore {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,

    /// Consumed front to back; an empty queue means normal behaviour.
    failure_queue: Arc<RwLock<VecDeque<MockFailure>>>,

    config: MockStoreConfig,

    call_history: Arc<RwLock<Vec<CallHistoryEntry>>>,
}

impl MockStore {
    /// Create new mock store with default config (no failures).
    pub fn new() -> Self {
        Self::new_with_config(MockStoreConfig::default())
    }

    /// Create new mock store with custom config.
    pub fn new_with_config(config: MockStoreConfig) -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            failure_queue: Arc::new(RwLock::new(VecDeque::new())),
            config,
            call_history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Create mock store with a deterministic response pattern.
    ///
    /// Entries are consumed in order across all keys. Once the queue is empty,
    /// all requests behave normally.
    pub fn new_with_failures(pattern: Vec<MockFailure>) -> Self {
        let mock = Self::new();
        mock.push_failures(pattern);
        mock
    }

    /// Create mock store that answers every request with `status`.
    pub fn new_always_fail(status: u16) -> Self {
        Self::new_with_failures(vec![MockFailure::Status(status); 1000])
    }

    /// Create mock store with intermittent 503s (flaky upstream).
    ///
    /// Generates a random sequence of 100 outcomes based on the failure rate.
    pub fn new_flaky(failure_rate: f64) -> Self {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let pattern = (0..100)
            .map(|_| {
                if rng.gen::<f64>() < failure_rate {
                    MockFailure::Status(503)
                } else {
                    MockFailure::Ok
                }
            })
            .collect();

        Self::new_with_failures(pattern)
    }

    /// Store an object.
    pub fn insert(&self, key: impl Into<String>, data: Bytes) {
        self.objects.write().insert(key.into(), data);
    }

    /// Append scripted responses to the queue.
    pub fn push_failures(&self, pattern: impl IntoIterator<Item = MockFailure>) {
        self.failure_queue.write().extend(pattern);
    }

    /// Get call history for assertions.
    pub fn get_call_history(&self) -> Vec<CallHistoryEntry> {
        self.call_history.read().clone()
    }

    /// Clear call history.
    pub fn clear_history(&self) {
        self.call_history.write().clear();
    }

    /// Number of `get` calls made for `key`.
    pub fn gets_for(&self, key: &str) -> usize {
        self.call_history
            .read()
            .iter()
            .filter(|entry| entry.operation == "get" && entry.key == key)
            .count()
    }

    /// Get number of successful gets.
    pub fn successful_gets(&self) -> usize {
        self.call_history
            .read()
            .iter()
            .filter(|entry| entry.operation == "get" && entry.success)
            .count()
    }

    /// Get number of failed gets.
    pub fn failed_gets(&self) -> usize {
        self.call_history
            .read()
            .iter()
            .filter(|entry| entry.operation == "get" && !entry.success)
            .count()
    }

    fn next_behaviour(&self) -> MockFailure {
        self.failure_queue
            .write()
            .pop_front()
            .unwrap_or(MockFailure::Ok)
    }

    fn record_call(
        &self,
        operation: &'static str,
        key: &str,
        range: Option<ByteRange>,
        success: bool,
    ) {
        if self.config.track_history {
            self.call_history.write().push(CallHistoryEntry {
                operation,
                key: key.to_string(),
                range,
                success,
                timestamp: Instant::now(),
            });
        }
    }

    async fn simulate_latency(&self) {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
    }

    fn respond(
        &self,
        key: &str,
        range: Option<ByteRange>,
        behaviour: MockFailure,
    ) -> CoreResult<StoreResponse> {
        let label = range_label(range);

        match behaviour {
            MockFailure::Status(status) => {
                return Err(CoreError::from_status(key, label, status, None));
            }
            MockFailure::Throttled {
                status,
                retry_after_secs,
            } => {
                return Err(CoreError::from_status(
                    key,
                    label,
                    status,
                    Some(retry_after_secs),
                ));
            }
            MockFailure::Timeout => {
                return Err(CoreError::transient(key, label, "operation timed out"));
            }
            _ => {}
        }

        let data = self
            .objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| CoreError::not_found(key, label.as_str()))?;

        let (mut body, served) = match range {
            Some(range) if behaviour != MockFailure::IgnoreRange => {
                let len = data.len() as u64;
                if range.start >= len {
                    return Err(CoreError::rejected(key, label, 416));
                }
                let start = match behaviour {
                    MockFailure::ServeFromStart => 0,
                    _ => range.start,
                };
                let end = (range.end + 1).min(len);
                let served = ByteRange { start, end: end - 1 };
                (data.slice(start as usize..end as usize), Some(served))
            }
            _ => (data, None),
        };

        if let MockFailure::Truncate(n) = behaviour {
            body.truncate(n);
        }

        Ok(StoreResponse {
            body,
            partial: served.is_some(),
            served,
        })
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArchiveStore for MockStore {
    async fn get(&self, key: &str, range: Option<ByteRange>) -> CoreResult<StoreResponse> {
        self.simulate_latency().await;

        let behaviour = self.next_behaviour();
        let result = self.respond(key, range, behaviour);
        self.record_call("get", key, range, result.is_ok());
        result
    }

    async fn size(&self, key: &str) -> CoreResult<u64> {
        self.simulate_latency().await;

        let result = self
            .objects
            .read()
            .get(key)
            .map(|data| data.len() as u64)
            .ok_or_else(|| CoreError::not_found(key, "full"));
        self.record_call("size", key, None, result.is_ok());
        result
    }
}
