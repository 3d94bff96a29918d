use serde::{Deserialize, Serialize};

use ccfetch_core::FailureKind;

/// Lifecycle of one fetch plan inside a pipeline run.
///
/// ```text
/// Planned -> Fetching -> Fetched -> Extracting -> Done
///    |          |                       |
///    |          +-----> Failed(kind) <--+
///    +-> Skipped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    /// Queued, waiting for a worker slot.
    Planned,
    /// Request in flight (retries included).
    Fetching,
    /// Bytes are in memory.
    Fetched,
    /// Container records are being decoded.
    Extracting,
    /// Extraction finished, payloads (possibly none) delivered.
    Done,
    /// Fetch or extraction failed; the run carries on.
    Failed(FailureKind),
    /// Never started because the run was cancelled.
    Skipped,
}

impl PlanState {
    /// Short lowercase name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Fetching => "fetching",
            Self::Fetched => "fetched",
            Self::Extracting => "extracting",
            Self::Done => "done",
            Self::Failed(_) => "failed",
            Self::Skipped => "skipped",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_) | Self::Skipped)
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(&self, next: PlanState) -> bool {
        matches!(
            (self, next),
            (Self::Planned, Self::Fetching)
                | (Self::Planned, Self::Skipped)
                | (Self::Fetching, Self::Fetched)
                | (Self::Fetching, Self::Failed(_))
                | (Self::Fetched, Self::Extracting)
                | (Self::Extracting, Self::Done)
                | (Self::Extracting, Self::Failed(_))
        )
    }
}

impl Default for PlanState {
    fn default() -> Self {
        Self::Planned
    }
}

/// Current state of a plan plus every state it went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanTracker {
    state: PlanState,
    history: Vec<PlanState>,
}

impl PlanTracker {
    pub fn new() -> Self {
        Self {
            state: PlanState::Planned,
            history: vec![PlanState::Planned],
        }
    }

    pub fn state(&self) -> PlanState {
        self.state
    }

    pub fn history(&self) -> &[PlanState] {
        &self.history
    }

    pub fn into_history(self) -> Vec<PlanState> {
        self.history
    }

    /// Moves to `next`. Illegal transitions are a bug in the caller.
    pub fn transition_to(&mut self, next: PlanState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal plan transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
        self.history.push(next);
    }
}

impl Default for PlanTracker {
    fn default() -> Self {
        Self::new()
    }
}
