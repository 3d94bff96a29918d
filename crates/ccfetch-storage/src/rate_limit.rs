//! Shared politeness state for all fetchers talking to one archive host.
//!
//! Two rules, both global across workers:
//! - request starts are spaced at least `min_interval` apart
//! - after a 429/503 nobody starts a request until the penalty window ends

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug)]
struct LimiterState {
    next_slot: Instant,
    penalty_until: Option<Instant>,
    consecutive_throttles: u32,
}

/// Request pacing shared by every worker of a pipeline.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: Mutex::new(LimiterState {
                next_slot: Instant::now(),
                penalty_until: None,
                consecutive_throttles: 0,
            }),
        }
    }

    /// No spacing; only throttle penalties apply.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Waits for this caller's start slot.
    ///
    /// Slots are reserved under the lock, so concurrent callers queue up in
    /// `min_interval` steps instead of all waking at once.
    pub async fn acquire(&self) {
        let wait = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let mut start = state.next_slot.max(now);

            if let Some(until) = state.penalty_until {
                if until > now {
                    start = start.max(until);
                } else {
                    state.penalty_until = None;
                }
            }

            state.next_slot = start + self.min_interval;
            start - now
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Opens (or extends) a penalty window after a throttling response.
    ///
    /// Uses `retry_after` when the server sent one, `fallback` otherwise,
    /// never more than `cap`. Returns the applied pause.
    pub fn penalize(
        &self,
        retry_after: Option<Duration>,
        fallback: Duration,
        cap: Duration,
    ) -> Duration {
        let pause = retry_after.unwrap_or(fallback).min(cap);
        let mut state = self.state.lock();
        state.consecutive_throttles += 1;

        let until = Instant::now() + pause;
        state.penalty_until = Some(state.penalty_until.map_or(until, |p| p.max(until)));

        warn!(
            pause_ms = pause.as_millis() as u64,
            consecutive = state.consecutive_throttles,
            "archive host throttled requests, pausing all workers"
        );
        pause
    }

    /// Clears the throttle streak after a successful request.
    pub fn record_success(&self) {
        self.state.lock().consecutive_throttles = 0;
    }

    /// Whether a penalty window is currently open.
    pub fn is_penalized(&self) -> bool {
        self.state
            .lock()
            .penalty_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    /// Throttling responses seen since the last success.
    pub fn consecutive_throttles(&self) -> u32 {
        self.state.lock().consecutive_throttles
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}
