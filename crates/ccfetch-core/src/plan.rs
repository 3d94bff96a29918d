//! Planned fetch windows and the per-file download decision.

use std::fmt;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::record::Record;

/// Inclusive byte range `[start, end]`, the form used by HTTP `Range` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Creates a range, rejecting `end < start`.
    pub fn new(start: u64, end: u64) -> CoreResult<Self> {
        if end < start {
            return Err(CoreError::ValidationError(format!(
                "byte range end {end} precedes start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Range covering `length` bytes from `offset`. `length` must be non-zero.
    pub fn from_offset_len(offset: u64, length: u64) -> CoreResult<Self> {
        if length == 0 {
            return Err(CoreError::ValidationError(
                "byte range length must be > 0".to_string(),
            ));
        }
        let end = offset.checked_add(length - 1).ok_or_else(|| {
            CoreError::ValidationError(format!(
                "byte range of {length} bytes at offset {offset} overflows u64"
            ))
        })?;
        Self::new(offset, end)
    }

    /// Number of bytes covered.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false; a `ByteRange` covers at least one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Range` header value.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Contiguous window produced by merging nearby records of one archive file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRange {
    /// First byte of the window.
    pub start: u64,
    /// One past the last byte of the window.
    pub end: u64,
    /// URLs of the member records, in offset order.
    pub member_urls: Vec<String>,
    /// Member records, in offset order.
    pub members: Vec<Record>,
}

impl MergedRange {
    /// Bytes spanned by the window, gaps included.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// The window as an inclusive byte range.
    #[must_use]
    pub fn byte_range(&self) -> ByteRange {
        ByteRange {
            start: self.start,
            end: self.end - 1,
        }
    }
}

/// How a plan fetches its archive file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Fetch one byte range.
    Range,
    /// Fetch the whole object.
    Full,
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range => f.write_str("range"),
            Self::Full => f.write_str("full"),
        }
    }
}

/// One unit of download work.
///
/// A plan is moved into exactly one fetcher and dropped once the fetch ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchPlan {
    /// Position of the plan in its [`DownloadPlan`].
    pub plan_id: u32,
    pub archive_file: String,
    pub mode: FetchMode,
    /// First requested byte (Range mode only).
    pub byte_start: Option<u64>,
    /// Last requested byte, inclusive (Range mode only).
    pub byte_end: Option<u64>,
    pub expected_record_count: u32,
    /// Records expected inside the fetched bytes.
    pub members: Vec<Record>,
}

impl FetchPlan {
    /// Range-mode plan for one merged window.
    #[must_use]
    pub fn range(plan_id: u32, archive_file: impl Into<String>, merged: MergedRange) -> Self {
        let range = merged.byte_range();
        Self {
            plan_id,
            archive_file: archive_file.into(),
            mode: FetchMode::Range,
            byte_start: Some(range.start),
            byte_end: Some(range.end),
            expected_record_count: merged.members.len() as u32,
            members: merged.members,
        }
    }

    /// Full-mode plan for a whole archive file.
    #[must_use]
    pub fn full(plan_id: u32, archive_file: impl Into<String>, members: Vec<Record>) -> Self {
        Self {
            plan_id,
            archive_file: archive_file.into(),
            mode: FetchMode::Full,
            byte_start: None,
            byte_end: None,
            expected_record_count: members.len() as u32,
            members,
        }
    }

    /// Requested byte range, `None` for Full mode.
    #[must_use]
    pub fn byte_range(&self) -> Option<ByteRange> {
        match (self.mode, self.byte_start, self.byte_end) {
            (FetchMode::Range, Some(start), Some(end)) if end >= start => {
                Some(ByteRange { start, end })
            }
            _ => None,
        }
    }

    /// Label used in errors and logs: `start-end` or `full`.
    #[must_use]
    pub fn range_label(&self) -> String {
        self.byte_range()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "full".to_string())
    }
}

/// Why the planner chose a mode for an archive file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDecision {
    pub archive_file: String,
    pub merged_ranges: Vec<MergedRange>,
    pub record_count: usize,
    pub total_merged_bytes: u64,
    pub file_size: u64,
    /// True when `file_size` is the `max(end) + threshold` estimate.
    pub size_estimated: bool,
    pub coverage: f64,
    pub mode: FetchMode,
}

/// Ordered plans for a whole record set, plus the decisions behind them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadPlan {
    plans: Vec<FetchPlan>,
    decisions: Vec<FileDecision>,
}

impl DownloadPlan {
    pub(crate) fn new(plans: Vec<FetchPlan>, decisions: Vec<FileDecision>) -> Self {
        Self { plans, decisions }
    }

    pub fn plans(&self) -> &[FetchPlan] {
        &self.plans
    }

    pub fn decisions(&self) -> &[FileDecision] {
        &self.decisions
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Gives up ownership of the plans so each can be moved into a fetcher.
    pub fn into_plans(self) -> Vec<FetchPlan> {
        self.plans
    }

    /// Writes one CSV row per plan:
    /// `filename,download_type,ranges,num_records,num_merged_ranges`.
    pub fn write_csv<W: Write>(&self, writer: W) -> CoreResult<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record([
            "filename",
            "download_type",
            "ranges",
            "num_records",
            "num_merged_ranges",
        ])?;

        for plan in &self.plans {
            let merged_ranges = match plan.mode {
                FetchMode::Range => 1,
                FetchMode::Full => self
                    .decisions
                    .iter()
                    .find(|d| d.archive_file == plan.archive_file)
                    .map(|d| d.merged_ranges.len())
                    .unwrap_or(0),
            };
            let ranges = plan.byte_range().map(|r| r.to_string()).unwrap_or_default();

            let row = [
                plan.archive_file.clone(),
                plan.mode.to_string(),
                ranges,
                plan.expected_record_count.to_string(),
                merged_ranges.to_string(),
            ];
            csv_writer.write_record(&row)?;
        }

        csv_writer.flush()?;
        Ok(())
    }
}
