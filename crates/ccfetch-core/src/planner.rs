//! Range planner: turns index records into fetch plans.
//!
//! Records of one archive file are sorted by offset and merged into windows
//! whenever the gap to the open window is at most `merge_threshold_bytes`.
//! Bridging small gaps trades a few extra bytes for fewer round trips. If the
//! windows cover more than `full_download_ratio` of the file, or there are
//! more of them than `max_ranges_per_file`, the whole file is fetched instead.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::config::PlannerConfig;
use crate::error::{CoreError, CoreResult};
use crate::plan::{DownloadPlan, FetchMode, FetchPlan, FileDecision, MergedRange};
use crate::record::Record;

/// Known archive sizes, keyed by archive filename.
pub type FileSizes = HashMap<String, u64>;

/// Plans byte-range or whole-file downloads per archive file.
#[derive(Debug, Clone)]
pub struct RangePlanner {
    config: PlannerConfig,
}

impl RangePlanner {
    /// Creates a planner, rejecting inconsistent thresholds.
    pub fn new(config: PlannerConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Merges records (of a single archive file) into sorted, disjoint windows.
    ///
    /// Input order does not matter. An empty slice yields no windows.
    pub fn merge_ranges(&self, records: &[Record]) -> Vec<MergedRange> {
        let mut sorted: Vec<&Record> = records.iter().collect();
        sorted.sort_by_key(|r| (r.offset, r.length));

        let threshold = self.config.merge_threshold_bytes;
        let mut merged = Vec::new();
        let mut iter = sorted.into_iter();

        let Some(first) = iter.next() else {
            return merged;
        };

        let mut current = MergedRange {
            start: first.offset,
            end: first.end(),
            member_urls: vec![first.url.clone()],
            members: vec![first.clone()],
        };

        for record in iter {
            if record.offset <= current.end.saturating_add(threshold) {
                current.end = current.end.max(record.end());
                current.member_urls.push(record.url.clone());
                current.members.push(record.clone());
            } else {
                let next = MergedRange {
                    start: record.offset,
                    end: record.end(),
                    member_urls: vec![record.url.clone()],
                    members: vec![record.clone()],
                };
                merged.push(std::mem::replace(&mut current, next));
            }
        }
        merged.push(current);

        merged
    }

    /// Decides between ranged and whole-file download for one archive file.
    ///
    /// `file_size` of `None` (or 0) is estimated as `max(offset + length) + threshold`.
    pub fn decide(
        &self,
        archive_file: &str,
        records: &[Record],
        file_size: Option<u64>,
    ) -> CoreResult<FileDecision> {
        if records.is_empty() {
            return Err(CoreError::ValidationError(format!(
                "no records supplied for {archive_file}"
            )));
        }

        for record in records {
            record.validate()?;
            if record.archive_file != archive_file {
                return Err(CoreError::ValidationError(format!(
                    "record for {} passed while planning {archive_file}",
                    record.archive_file
                )));
            }
        }

        let merged_ranges = self.merge_ranges(records);
        let total_merged_bytes: u64 = merged_ranges.iter().map(MergedRange::len).sum();

        let max_end = records.iter().map(Record::end).max().unwrap_or(0);
        let (file_size, size_estimated) = match file_size {
            Some(size) if size > 0 => (size, false),
            _ => (
                max_end.saturating_add(self.config.merge_threshold_bytes),
                true,
            ),
        };

        let coverage = total_merged_bytes as f64 / file_size as f64;
        let mode = if coverage > self.config.full_download_ratio
            || merged_ranges.len() > self.config.max_ranges_per_file
        {
            FetchMode::Full
        } else {
            FetchMode::Range
        };

        debug!(
            archive_file,
            records = records.len(),
            ranges = merged_ranges.len(),
            total_merged_bytes,
            file_size,
            size_estimated,
            coverage,
            mode = %mode,
            "planned archive file"
        );

        Ok(FileDecision {
            archive_file: archive_file.to_string(),
            merged_ranges,
            record_count: records.len(),
            total_merged_bytes,
            file_size,
            size_estimated,
            coverage,
            mode,
        })
    }

    /// Plans one archive file. Plan ids start at 0.
    pub fn plan_file(
        &self,
        archive_file: &str,
        records: &[Record],
        file_size: Option<u64>,
    ) -> CoreResult<Vec<FetchPlan>> {
        let decision = self.decide(archive_file, records, file_size)?;
        let mut next_id = 0;
        Ok(Self::plans_for(&decision, &mut next_id))
    }

    /// Plans every archive file referenced by `records`.
    ///
    /// Files are visited in lexicographic order so plan ids are reproducible.
    pub fn plan(
        &self,
        records: impl IntoIterator<Item = Record>,
        sizes: &FileSizes,
    ) -> CoreResult<DownloadPlan> {
        let mut by_file: BTreeMap<String, Vec<Record>> = BTreeMap::new();
        for record in records {
            by_file
                .entry(record.archive_file.clone())
                .or_default()
                .push(record);
        }

        let mut plans = Vec::new();
        let mut decisions = Vec::with_capacity(by_file.len());
        let mut next_id = 0;

        for (archive_file, mut file_records) in by_file {
            // Exact duplicates would only inflate member counts; sorting on the
            // url too puts every copy next to each other.
            file_records.sort_by(|a, b| {
                (a.offset, a.length, &a.url).cmp(&(b.offset, b.length, &b.url))
            });
            file_records.dedup();

            let decision =
                self.decide(&archive_file, &file_records, sizes.get(&archive_file).copied())?;
            plans.extend(Self::plans_for(&decision, &mut next_id));
            decisions.push(decision);
        }

        Ok(DownloadPlan::new(plans, decisions))
    }

    fn plans_for(decision: &FileDecision, next_id: &mut u32) -> Vec<FetchPlan> {
        let mut take_id = || {
            let id = *next_id;
            *next_id += 1;
            id
        };

        match decision.mode {
            FetchMode::Full => {
                let members = decision
                    .merged_ranges
                    .iter()
                    .flat_map(|m| m.members.iter().cloned())
                    .collect();
                vec![FetchPlan::full(take_id(), &decision.archive_file, members)]
            }
            FetchMode::Range => decision
                .merged_ranges
                .iter()
                .map(|m| FetchPlan::range(take_id(), &decision.archive_file, m.clone()))
                .collect(),
        }
    }
}
