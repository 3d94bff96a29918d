//! Segment fetcher: executes one FetchPlan against an ArchiveStore.
//!
//! Handles partial-content semantics (a server may answer a range request
//! with the whole object), retries transient failures with backoff, pauses
//! all workers on throttling, and stops promptly on cancellation.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ccfetch_core::{ByteRange, CoreError, CoreResult, FetchMode, FetchPlan, Record};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::object_store::ArchiveStore;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

/// Bytes retrieved for one plan.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub plan: FetchPlan,
    pub bytes: Bytes,
    /// True iff the store honoured the range; then `bytes` is exactly the
    /// requested window. Otherwise `bytes` is the whole object.
    pub partial: bool,
    /// Attempts used, first try included.
    pub attempts: u32,
}

impl FetchResult {
    /// Archive offset of `bytes[0]`.
    pub fn window_start(&self) -> u64 {
        if self.partial {
            self.plan.byte_start.unwrap_or(0)
        } else {
            0
        }
    }

    /// Bytes of one member record, or `None` if they lie outside what was fetched.
    pub fn slice_for(&self, record: &Record) -> Option<Bytes> {
        let start = record.offset.checked_sub(self.window_start())?;
        let end = start.checked_add(record.length)?;
        if end > self.bytes.len() as u64 {
            return None;
        }
        Some(self.bytes.slice(start as usize..end as usize))
    }
}

/// Resolves once `cancel` flips to true; never resolves if the sender is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let sender_gone = cancel.wait_for(|c| *c).await.is_err();
    if sender_gone {
        std::future::pending::<()>().await;
    }
}

/// Downloads plans with retry, throttling and cancellation.
#[derive(Clone)]
pub struct SegmentFetcher {
    store: Arc<dyn ArchiveStore>,
    policy: RetryPolicy,
    limiter: Option<Arc<RateLimiter>>,
}

impl SegmentFetcher {
    pub fn new(store: Arc<dyn ArchiveStore>, policy: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            limiter: None,
        }
    }

    /// Share a rate limiter with other fetchers of the same host.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetches `plan` without external cancellation.
    pub async fn fetch(&self, plan: FetchPlan) -> CoreResult<FetchResult> {
        let (_keep_open, cancel) = watch::channel(false);
        self.fetch_with_cancel(plan, cancel).await
    }

    /// Fetches `plan`, giving up with `CoreError::Cancelled` as soon as
    /// `cancel` turns true, whether a request or a backoff sleep is pending.
    pub async fn fetch_with_cancel(
        &self,
        plan: FetchPlan,
        mut cancel: watch::Receiver<bool>,
    ) -> CoreResult<FetchResult> {
        let label = plan.range_label();
        let range = plan.byte_range();
        if plan.mode == FetchMode::Range && range.is_none() {
            return Err(CoreError::ValidationError(format!(
                "range plan {} for {} has no valid byte range",
                plan.plan_id, plan.archive_file
            )));
        }

        let mut attempt = 0;
        loop {
            if *cancel.borrow() {
                return Err(CoreError::Cancelled);
            }
            attempt += 1;

            if let Some(limiter) = &self.limiter {
                tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => return Err(CoreError::Cancelled),
                    _ = limiter.acquire() => {}
                }
            }

            debug!(
                archive_file = %plan.archive_file,
                range = %label,
                attempt,
                "requesting segment"
            );

            let outcome = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => return Err(CoreError::Cancelled),
                outcome = self.attempt(&plan, range, &label) => outcome,
            };

            let err = match outcome {
                Ok((bytes, partial)) => {
                    if let Some(limiter) = &self.limiter {
                        limiter.record_success();
                    }
                    return Ok(FetchResult {
                        plan,
                        bytes,
                        partial,
                        attempts: attempt,
                    });
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                warn!(
                    archive_file = %plan.archive_file,
                    range = %label,
                    error = %err,
                    "segment fetch failed permanently"
                );
                return Err(err);
            }

            let delay = self.policy.delay_for(attempt);

            if err.is_throttle() {
                if let Some(limiter) = &self.limiter {
                    let retry_after = match &err {
                        CoreError::TransientNetwork {
                            retry_after_secs: Some(secs),
                            ..
                        } => Some(Duration::from_secs(*secs)),
                        _ => None,
                    };
                    limiter.penalize(retry_after, delay, self.policy.throttle_cap());
                }
            }

            if !self.policy.should_retry(&err, attempt) {
                error!(
                    archive_file = %plan.archive_file,
                    range = %label,
                    attempts = attempt,
                    error = %err,
                    "segment fetch exhausted retries"
                );
                return Err(CoreError::RetriesExhausted {
                    archive_file: plan.archive_file.clone(),
                    range: label,
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            warn!(
                archive_file = %plan.archive_file,
                range = %label,
                attempt,
                max_attempts = self.policy.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "segment fetch failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => return Err(CoreError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One request plus validation of what came back.
    async fn attempt(
        &self,
        plan: &FetchPlan,
        range: Option<ByteRange>,
        label: &str,
    ) -> CoreResult<(Bytes, bool)> {
        let response = self.store.get(&plan.archive_file, range).await?;
        let received = response.body.len() as u64;

        match (plan.mode, range) {
            (FetchMode::Range, Some(range)) if response.partial => {
                let Some(served) = response.served else {
                    return Err(CoreError::rejected(plan.archive_file.as_str(), label, 206));
                };
                // The served range must cover the request and the body must
                // fill the served range; anything else would shift offsets.
                if served.start > range.start || served.end < range.end || received < served.len() {
                    return Err(CoreError::Truncated {
                        archive_file: plan.archive_file.clone(),
                        range: label.to_string(),
                        expected: range.len(),
                        received,
                    });
                }
                let from = (range.start - served.start) as usize;
                let body = response.body.slice(from..from + range.len() as usize);
                if served != range {
                    debug!(
                        archive_file = %plan.archive_file,
                        range = %label,
                        served = %served,
                        "store served a wider range, keeping the requested window"
                    );
                }
                Ok((body, true))
            }
            (FetchMode::Range, Some(range)) => {
                // Range ignored: the whole object must still contain the window.
                if received <= range.end {
                    return Err(CoreError::Truncated {
                        archive_file: plan.archive_file.clone(),
                        range: label.to_string(),
                        expected: range.end + 1,
                        received,
                    });
                }
                debug!(
                    archive_file = %plan.archive_file,
                    range = %label,
                    bytes = received,
                    "store ignored range request, using whole object"
                );
                Ok((response.body, false))
            }
            _ if response.partial => Err(CoreError::rejected(
                plan.archive_file.as_str(),
                label,
                206,
            )),
            _ => Ok((response.body, false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::{MockFailure, MockStore};
    use ccfetch_core::RetryConfig;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
            backoff_multiplier: 2.0,
            jitter_percent: 0.0,
        })
        .unwrap()
    }

    fn range_plan(start: u64, end: u64) -> FetchPlan {
        FetchPlan {
            plan_id: 0,
            archive_file: "a.gz".to_string(),
            mode: FetchMode::Range,
            byte_start: Some(start),
            byte_end: Some(end),
            expected_record_count: 1,
            members: vec![Record::new("a.gz", start, end - start + 1, "u")],
        }
    }

    fn store(pattern: Vec<MockFailure>) -> Arc<MockStore> {
        let mock = MockStore::new_with_failures(pattern);
        mock.insert("a.gz", Bytes::from_static(b"abcdefghijklmnopqrstuvwxyz"));
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_partial_fetch() {
        let fetcher = SegmentFetcher::new(store(vec![]), policy());
        let result = fetcher.fetch(range_plan(2, 5)).await.unwrap();
        assert!(result.partial);
        assert_eq!(&result.bytes[..], b"cdef");
        assert_eq!(result.attempts, 1);
        assert_eq!(result.window_start(), 2);
    }

    #[tokio::test]
    async fn test_ignored_range_reports_whole_object() {
        let fetcher = SegmentFetcher::new(store(vec![MockFailure::IgnoreRange]), policy());
        let result = fetcher.fetch(range_plan(2, 5)).await.unwrap();
        assert!(!result.partial);
        assert_eq!(result.bytes.len(), 26);
        assert_eq!(result.window_start(), 0);

        let record = Record::new("a.gz", 2, 4, "u");
        assert_eq!(&result.slice_for(&record).unwrap()[..], b"cdef");
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncated_body_is_retried() {
        let mock = store(vec![MockFailure::Truncate(1)]);
        let fetcher = SegmentFetcher::new(mock.clone(), policy());
        let result = fetcher.fetch(range_plan(2, 5)).await.unwrap();
        assert_eq!(result.attempts, 2);
        assert_eq!(mock.gets_for("a.gz"), 2);
    }

    #[tokio::test]
    async fn test_wider_served_range_is_sliced_by_its_offset() {
        let fetcher = SegmentFetcher::new(store(vec![MockFailure::ServeFromStart]), policy());
        let result = fetcher.fetch(range_plan(2, 5)).await.unwrap();
        assert!(result.partial);
        assert_eq!(&result.bytes[..], b"cdef");
        assert_eq!(result.window_start(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_served_range_is_retried() {
        // The object ends at byte 3, so every answer stops short of 5.
        let mock = MockStore::new();
        mock.insert("a.gz", Bytes::from_static(b"abcd"));
        let fetcher = SegmentFetcher::new(Arc::new(mock), policy());

        let err = fetcher.fetch(range_plan(2, 5)).await.unwrap_err();
        assert!(matches!(err, CoreError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_full_plan_fetches_whole_object() {
        let fetcher = SegmentFetcher::new(store(vec![]), policy());
        let plan = FetchPlan::full(0, "a.gz", vec![Record::new("a.gz", 0, 3, "u")]);
        let result = fetcher.fetch(plan).await.unwrap();
        assert!(!result.partial);
        assert_eq!(result.bytes.len(), 26);
    }

    #[test]
    fn test_slice_outside_window() {
        let result = FetchResult {
            plan: range_plan(10, 19),
            bytes: Bytes::from_static(b"0123456789"),
            partial: true,
            attempts: 1,
        };
        assert_eq!(
            &result.slice_for(&Record::new("a.gz", 12, 3, "u")).unwrap()[..],
            b"234"
        );
        assert!(result.slice_for(&Record::new("a.gz", 5, 3, "u")).is_none());
        assert!(result.slice_for(&Record::new("a.gz", 18, 5, "u")).is_none());
    }
}
