//! Results of a pipeline run.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use ccfetch_core::{FailureKind, FetchMode, Record};
use ccfetch_warc::ExtractedPayload;

use crate::state::PlanState;

/// A payload together with the index record it was found for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieved {
    pub plan_id: u32,
    pub record: Record,
    pub payload: ExtractedPayload,
}

/// What happened to one plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanOutcome {
    pub plan_id: u32,
    pub archive_file: String,
    pub mode: FetchMode,
    /// Final state.
    pub state: PlanState,
    /// Every state visited, `Planned` first.
    pub history: Vec<PlanState>,
    /// Fetch attempts, 0 if the plan never reached the store.
    pub attempts: u32,
    /// Whether the store honoured the range request.
    pub partial: bool,
    pub bytes_fetched: u64,
    /// Records that produced a payload.
    pub payloads: usize,
    /// Records whose bytes were outside the fetched window.
    pub misses: Vec<Record>,
    /// Records whose slice held no matching response.
    pub unmatched: usize,
    /// Display form of the error for failed plans.
    pub error: Option<String>,
}

impl PlanOutcome {
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.state {
            PlanState::Failed(kind) => Some(kind),
            _ => None,
        }
    }
}

/// Per-archive-file rollup of plan outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub archive_file: String,
    pub plans: usize,
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes_fetched: u64,
    pub payloads: usize,
    pub misses: usize,
}

/// Outcome of a whole run.
///
/// Plan outcomes are ordered by plan id regardless of completion order.
#[derive(Debug, Clone, Default)]
pub struct RetrievalReport {
    outcomes: Vec<PlanOutcome>,
    payloads: Vec<Retrieved>,
}

impl RetrievalReport {
    pub(crate) fn new(mut outcomes: Vec<PlanOutcome>, mut payloads: Vec<Retrieved>) -> Self {
        outcomes.sort_by_key(|o| o.plan_id);
        payloads.sort_by(|a, b| {
            (a.plan_id, a.record.offset).cmp(&(b.plan_id, b.record.offset))
        });
        Self { outcomes, payloads }
    }

    pub fn outcomes(&self) -> &[PlanOutcome] {
        &self.outcomes
    }

    pub fn outcome(&self, plan_id: u32) -> Option<&PlanOutcome> {
        self.outcomes
            .binary_search_by_key(&plan_id, |o| o.plan_id)
            .ok()
            .map(|i| &self.outcomes[i])
    }

    /// Payloads kept in the report (streamed payloads are not duplicated here).
    pub fn payloads(&self) -> &[Retrieved] {
        &self.payloads
    }

    pub fn into_payloads(self) -> Vec<Retrieved> {
        self.payloads
    }

    pub fn done_count(&self) -> usize {
        self.count(|s| matches!(s, PlanState::Done))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|s| matches!(s, PlanState::Failed(_)))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|s| matches!(s, PlanState::Skipped))
    }

    /// True when every plan finished as `Done`.
    pub fn is_complete(&self) -> bool {
        self.done_count() == self.outcomes.len()
    }

    pub fn failures_by_kind(&self) -> HashMap<FailureKind, usize> {
        let mut counts = HashMap::new();
        for kind in self.outcomes.iter().filter_map(PlanOutcome::failure_kind) {
            *counts.entry(kind).or_insert(0) += 1;
        }
        counts
    }

    /// All records that fell outside their fetched windows.
    pub fn misses(&self) -> impl Iterator<Item = &Record> {
        self.outcomes.iter().flat_map(|o| o.misses.iter())
    }

    pub fn bytes_fetched(&self) -> u64 {
        self.outcomes.iter().map(|o| o.bytes_fetched).sum()
    }

    /// Rollups in archive-file order.
    pub fn file_summaries(&self) -> Vec<FileSummary> {
        let mut by_file: BTreeMap<&str, FileSummary> = BTreeMap::new();

        for outcome in &self.outcomes {
            let summary = by_file
                .entry(outcome.archive_file.as_str())
                .or_insert_with(|| FileSummary {
                    archive_file: outcome.archive_file.clone(),
                    ..Default::default()
                });

            summary.plans += 1;
            match outcome.state {
                PlanState::Done => summary.done += 1,
                PlanState::Failed(_) => summary.failed += 1,
                PlanState::Skipped => summary.skipped += 1,
                _ => {}
            }
            summary.bytes_fetched += outcome.bytes_fetched;
            summary.payloads += outcome.payloads;
            summary.misses += outcome.misses.len();
        }

        by_file.into_values().collect()
    }

    fn count(&self, predicate: impl Fn(&PlanState) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.state)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(plan_id: u32, file: &str, state: PlanState) -> PlanOutcome {
        PlanOutcome {
            plan_id,
            archive_file: file.to_string(),
            mode: FetchMode::Range,
            state,
            history: vec![PlanState::Planned, state],
            attempts: 1,
            partial: true,
            bytes_fetched: 100,
            payloads: usize::from(state == PlanState::Done),
            misses: Vec::new(),
            unmatched: 0,
            error: None,
        }
    }

    #[test]
    fn test_counts_and_rollups() {
        let report = RetrievalReport::new(
            vec![
                outcome(2, "b.gz", PlanState::Skipped),
                outcome(0, "a.gz", PlanState::Done),
                outcome(1, "a.gz", PlanState::Failed(FailureKind::NotFound)),
            ],
            Vec::new(),
        );

        assert_eq!(report.outcomes()[0].plan_id, 0);
        assert_eq!(report.done_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.skipped_count(), 1);
        assert!(!report.is_complete());
        assert_eq!(report.failures_by_kind().get(&FailureKind::NotFound), Some(&1));
        assert_eq!(report.outcome(1).map(|o| o.archive_file.as_str()), Some("a.gz"));
        assert!(report.outcome(9).is_none());

        let files = report.file_summaries();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].archive_file, "a.gz");
        assert_eq!((files[0].plans, files[0].done, files[0].failed), (2, 1, 1));
        assert_eq!(files[0].payloads, 1);
        assert_eq!(files[1].skipped, 1);
        assert_eq!(report.bytes_fetched(), 300);
    }

    #[test]
    fn test_empty_report_is_complete() {
        let report = RetrievalReport::default();
        assert!(report.is_complete());
        assert_eq!(report.misses().count(), 0);
    }
}
