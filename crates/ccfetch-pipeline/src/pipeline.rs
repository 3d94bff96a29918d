//! Retrieval pipeline: plans, fetches and extracts under bounded concurrency.
//!
//! One task per plan is spawned into a `JoinSet`; a semaphore caps how many
//! are past their start line at once. All fetchers share one rate limiter,
//! so politeness spacing and throttle penalties are global to the run.
//! The pipeline never retries a plan itself; retries live in the fetcher.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use ccfetch_core::{
    CcfetchConfig, CoreError, CoreResult, DownloadPlan, FailureKind, FetchPlan, FileSizes,
    PipelineConfig, PlannerConfig, RangePlanner, Record, RetryConfig,
};
use ccfetch_storage::{ArchiveStore, FetchResult, RateLimiter, RetryPolicy, SegmentFetcher};
use ccfetch_warc::{Compression, ContainerExtractor};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::report::{PlanOutcome, RetrievalReport, Retrieved};
use crate::state::{PlanState, PlanTracker};

/// Drives records through planning, fetching and extraction.
pub struct RetrievalPipeline {
    store: Arc<dyn ArchiveStore>,
    config: PipelineConfig,
    planner: RangePlanner,
    limiter: Arc<RateLimiter>,
    fetcher: SegmentFetcher,
    extractor: ContainerExtractor,
    compression: Compression,
}

impl RetrievalPipeline {
    /// Pipeline with default planner and retry settings.
    pub fn new(store: Arc<dyn ArchiveStore>, config: PipelineConfig) -> CoreResult<Self> {
        config.validate()?;

        let limiter = Arc::new(RateLimiter::new(config.politeness_delay()));
        let fetcher = SegmentFetcher::new(store.clone(), RetryPolicy::default())
            .with_rate_limiter(limiter.clone());

        Ok(Self {
            store,
            config,
            planner: RangePlanner::new(PlannerConfig::default())?,
            limiter,
            fetcher,
            extractor: ContainerExtractor::html(),
            compression: Compression::Auto,
        })
    }

    /// Pipeline configured from every section of a loaded configuration.
    pub fn from_config(store: Arc<dyn ArchiveStore>, config: &CcfetchConfig) -> CoreResult<Self> {
        Self::new(store, config.pipeline.clone())?
            .with_planner(config.planner.clone())?
            .with_retry(config.retry.clone())
    }

    pub fn with_planner(mut self, config: PlannerConfig) -> CoreResult<Self> {
        self.planner = RangePlanner::new(config)?;
        Ok(self)
    }

    pub fn with_retry(mut self, config: RetryConfig) -> CoreResult<Self> {
        self.fetcher = SegmentFetcher::new(self.store.clone(), RetryPolicy::new(config)?)
            .with_rate_limiter(self.limiter.clone());
        Ok(self)
    }

    pub fn with_extractor(mut self, extractor: ContainerExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Forces the container compression instead of sniffing it per window.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn planner(&self) -> &RangePlanner {
        &self.planner
    }

    /// Plans `records`, probing archive sizes first when configured to.
    ///
    /// A failed probe is logged and the planner falls back to its estimate.
    pub async fn plan(&self, records: Vec<Record>) -> CoreResult<DownloadPlan> {
        let mut sizes = FileSizes::new();

        if self.config.probe_file_sizes {
            let files: BTreeSet<&str> = records.iter().map(|r| r.archive_file.as_str()).collect();
            for file in files {
                match self.store.size(file).await {
                    Ok(size) => {
                        debug!(archive_file = %file, size, "probed archive size");
                        sizes.insert(file.to_string(), size);
                    }
                    Err(e) => {
                        warn!(archive_file = %file, error = %e, "size probe failed, estimating");
                    }
                }
            }
        }

        let plan = self.planner.plan(records, &sizes)?;
        info!(
            plans = plan.len(),
            files = plan.decisions().len(),
            "download plan ready"
        );
        Ok(plan)
    }

    /// Executes `plans` and collects every payload into the report.
    pub async fn run(&self, plans: Vec<FetchPlan>, cancel: CancelToken) -> RetrievalReport {
        self.execute(plans, cancel, None).await
    }

    /// Executes `plans`, sending payloads to `sink` as each plan finishes.
    ///
    /// Payloads that cannot be sent because the receiver is gone are kept in
    /// the returned report instead.
    pub async fn run_streaming(
        &self,
        plans: Vec<FetchPlan>,
        cancel: CancelToken,
        sink: mpsc::Sender<Retrieved>,
    ) -> RetrievalReport {
        self.execute(plans, cancel, Some(sink)).await
    }

    /// Plans and runs `records` in one call.
    pub async fn retrieve(
        &self,
        records: Vec<Record>,
        cancel: CancelToken,
    ) -> CoreResult<RetrievalReport> {
        let plan = self.plan(records).await?;
        Ok(self.run(plan.into_plans(), cancel).await)
    }

    async fn execute(
        &self,
        plans: Vec<FetchPlan>,
        cancel: CancelToken,
        mut sink: Option<mpsc::Sender<Retrieved>>,
    ) -> RetrievalReport {
        let total = plans.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut join_set = JoinSet::new();
        let mut pending = HashMap::with_capacity(total);

        for plan in plans {
            let outcome = planned_outcome(&plan);
            let worker = PlanWorker {
                fetcher: self.fetcher.clone(),
                extractor: self.extractor.clone(),
                compression: self.compression,
                semaphore: semaphore.clone(),
                cancel: cancel.clone(),
            };
            let handle = join_set.spawn(worker.run(plan));
            pending.insert(handle.id(), outcome);
        }

        let mut outcomes = Vec::with_capacity(total);
        let mut payloads = Vec::new();

        while let Some(joined) = join_set.join_next_with_id().await {
            let (outcome, retrieved) = match joined {
                Ok((id, done)) => {
                    pending.remove(&id);
                    done
                }
                Err(e) => {
                    // Panicked or aborted task: the stage it reached is unknown.
                    let Some(mut outcome) = pending.remove(&e.id()) else {
                        warn!(error = %e, "unknown plan task did not complete");
                        continue;
                    };
                    warn!(
                        plan_id = outcome.plan_id,
                        archive_file = %outcome.archive_file,
                        error = %e,
                        "plan task did not complete"
                    );
                    outcome.state = PlanState::Failed(FailureKind::Other);
                    outcome.history.push(outcome.state);
                    outcome.error = Some(format!("plan task did not complete: {e}"));
                    (outcome, Vec::new())
                }
            };

            for item in retrieved {
                match sink.as_ref() {
                    Some(tx) => {
                        if let Err(mpsc::error::SendError(item)) = tx.send(item).await {
                            debug!("payload receiver dropped, keeping payloads in report");
                            sink = None;
                            payloads.push(item);
                        }
                    }
                    None => payloads.push(item),
                }
            }
            outcomes.push(outcome);
        }

        let report = RetrievalReport::new(outcomes, payloads);
        info!(
            plans = total,
            done = report.done_count(),
            failed = report.failed_count(),
            skipped = report.skipped_count(),
            bytes = report.bytes_fetched(),
            misses = report.misses().count(),
            "retrieval run finished"
        );
        report
    }
}

/// Outcome of a plan that has not started yet.
fn planned_outcome(plan: &FetchPlan) -> PlanOutcome {
    PlanOutcome {
        plan_id: plan.plan_id,
        archive_file: plan.archive_file.clone(),
        mode: plan.mode,
        state: PlanState::Planned,
        history: vec![PlanState::Planned],
        attempts: 0,
        partial: false,
        bytes_fetched: 0,
        payloads: 0,
        misses: Vec::new(),
        unmatched: 0,
        error: None,
    }
}

/// Everything one plan task needs, owned so the task is `'static`.
struct PlanWorker {
    fetcher: SegmentFetcher,
    extractor: ContainerExtractor,
    compression: Compression,
    semaphore: Arc<Semaphore>,
    cancel: CancelToken,
}

struct Extracted {
    retrieved: Vec<Retrieved>,
    misses: Vec<Record>,
    unmatched: usize,
}

impl PlanWorker {
    async fn run(self, plan: FetchPlan) -> (PlanOutcome, Vec<Retrieved>) {
        let mut tracker = PlanTracker::new();
        let mut outcome = planned_outcome(&plan);

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            debug!(plan_id = plan.plan_id, archive_file = %plan.archive_file, "plan skipped");
            tracker.transition_to(PlanState::Skipped);
            return (finish(outcome, tracker), Vec::new());
        };

        tracker.transition_to(PlanState::Fetching);
        let fetched = match self.fetcher.fetch_with_cancel(plan, self.cancel.subscribe()).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(
                    plan_id = outcome.plan_id,
                    archive_file = %outcome.archive_file,
                    error = %e,
                    "plan failed"
                );
                tracker.transition_to(PlanState::Failed(e.kind()));
                outcome.error = Some(e.to_string());
                return (finish(outcome, tracker), Vec::new());
            }
        };

        tracker.transition_to(PlanState::Fetched);
        outcome.attempts = fetched.attempts;
        outcome.partial = fetched.partial;
        outcome.bytes_fetched = fetched.bytes.len() as u64;

        tracker.transition_to(PlanState::Extracting);
        let extractor = self.extractor;
        let compression = self.compression;
        let extracted = tokio::task::spawn_blocking(move || {
            extract_members(&extractor, compression, &fetched)
        })
        .await;

        let extracted = match extracted {
            Ok(extracted) => extracted,
            Err(e) => {
                let err = CoreError::MalformedContainer(format!("extraction task failed: {e}"));
                warn!(plan_id = outcome.plan_id, error = %err, "plan failed");
                tracker.transition_to(PlanState::Failed(FailureKind::Other));
                outcome.error = Some(err.to_string());
                return (finish(outcome, tracker), Vec::new());
            }
        };

        tracker.transition_to(PlanState::Done);
        outcome.payloads = extracted.retrieved.len();
        outcome.misses = extracted.misses;
        outcome.unmatched = extracted.unmatched;

        info!(
            plan_id = outcome.plan_id,
            archive_file = %outcome.archive_file,
            mode = %outcome.mode,
            partial = outcome.partial,
            attempts = outcome.attempts,
            bytes = outcome.bytes_fetched,
            payloads = outcome.payloads,
            misses = outcome.misses.len(),
            "plan done"
        );

        (finish(outcome, tracker), extracted.retrieved)
    }
}

fn finish(mut outcome: PlanOutcome, tracker: PlanTracker) -> PlanOutcome {
    outcome.state = tracker.state();
    outcome.history = tracker.into_history();
    outcome
}

/// Slices the fetched window per member record and keeps the first matching
/// payload of each slice.
fn extract_members(
    extractor: &ContainerExtractor,
    compression: Compression,
    fetched: &FetchResult,
) -> Extracted {
    let mut extracted = Extracted {
        retrieved: Vec::with_capacity(fetched.plan.members.len()),
        misses: Vec::new(),
        unmatched: 0,
    };

    for record in &fetched.plan.members {
        let Some(slice) = fetched.slice_for(record) else {
            warn!(
                archive_file = %record.archive_file,
                offset = record.offset,
                length = record.length,
                window_start = fetched.window_start(),
                window_len = fetched.bytes.len(),
                "record outside fetched window"
            );
            extracted.misses.push(record.clone());
            continue;
        };

        match extractor.first_match(slice, compression) {
            Some(payload) => extracted.retrieved.push(Retrieved {
                plan_id: fetched.plan.plan_id,
                record: record.clone(),
                payload,
            }),
            None => {
                debug!(url = %record.url, offset = record.offset, "no matching payload");
                extracted.unmatched += 1;
            }
        }
    }

    extracted
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ccfetch_core::FetchMode;
    use ccfetch_storage::object_store::MockStore;
    use ccfetch_warc::compress_member;

    fn member(url: &str) -> Vec<u8> {
        let block = format!("HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<p>{url}</p>");
        let record = format!(
            "WARC/1.0\r\n\
             WARC-Type: response\r\n\
             WARC-Date: 2024-05-22T10:10:10Z\r\n\
             WARC-Record-ID: <urn:uuid:0c9e4d2a-6f1b-4b7e-8a3d-2e5f7a9c1b40>\r\n\
             WARC-Target-URI: {url}\r\n\
             Content-Type: application/http; msgtype=response\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {block}\r\n\r\n",
            block.len()
        );
        compress_member(record.as_bytes()).unwrap().to_vec()
    }

    #[test]
    fn test_extract_members_slices_full_object() {
        let first = member("https://a/");
        let second = member("https://b/");
        let data = Bytes::from([first.clone(), second.clone()].concat());

        let records = vec![
            Record::new("f.gz", 0, first.len() as u64, "https://a/"),
            Record::new("f.gz", first.len() as u64, second.len() as u64, "https://b/"),
            Record::new("f.gz", 10_000, 50, "https://gone/"),
        ];
        let fetched = FetchResult {
            plan: FetchPlan::full(0, "f.gz", records),
            bytes: data,
            partial: false,
            attempts: 1,
        };

        let out = extract_members(&ContainerExtractor::html(), Compression::Auto, &fetched);
        let urls: Vec<&str> = out.retrieved.iter().map(|r| r.payload.source_url.as_str()).collect();
        assert_eq!(urls, vec!["https://a/", "https://b/"]);
        assert_eq!(out.misses.len(), 1);
        assert_eq!(out.unmatched, 0);
        assert_eq!(fetched.plan.mode, FetchMode::Full);
    }

    #[test]
    fn test_new_rejects_zero_concurrency() {
        let store = Arc::new(MockStore::new());
        let config = PipelineConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(
            RetrievalPipeline::new(store, config),
            Err(CoreError::ConfigError(_))
        ));
    }
}
