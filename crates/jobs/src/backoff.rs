//! Delay policies between status polls.
//!
//! While the backend answers "still in progress" the tracker waits
//! before asking again. Two policies are supported:
//!
//! - [`PollBackoff::Exponential`] (default) -- start short and grow by a
//!   multiplier after every progress response, clamped to a ceiling.
//! - [`PollBackoff::Jittered`] -- a uniformly random delay within a fixed
//!   window, independent of how long the job has been running.
//!
//! Transport failures do not use these policies; they wait the fixed
//! [`TrackerConfig::retry_delay`](crate::TrackerConfig::retry_delay).

use std::time::Duration;

use rand::Rng;

/// Default first poll delay for the exponential policy.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(2000);
/// Default ceiling for the exponential policy.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);
/// Default growth factor for the exponential policy.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Shortest delay any policy yields, so a zero setting cannot busy-poll.
pub const MIN_POLL_DELAY: Duration = Duration::from_millis(10);

/// Default window for the jittered policy.
pub const DEFAULT_JITTER_MIN: Duration = Duration::from_millis(2000);
pub const DEFAULT_JITTER_MAX: Duration = Duration::from_millis(3000);

/// How long to wait between consecutive "still in progress" polls.
#[derive(Debug, Clone, PartialEq)]
pub enum PollBackoff {
    /// `initial * multiplier^n`, clamped to `max`.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
    /// Uniformly random in `[min, max]`.
    Jittered { min: Duration, max: Duration },
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self::Exponential {
            initial: DEFAULT_INITIAL_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            max: DEFAULT_MAX_DELAY,
        }
    }
}

impl PollBackoff {
    /// The default jittered window (2-3 s).
    pub fn jittered() -> Self {
        Self::Jittered {
            min: DEFAULT_JITTER_MIN,
            max: DEFAULT_JITTER_MAX,
        }
    }

    /// Start a fresh delay sequence for one job.
    pub fn schedule(&self) -> PollSchedule {
        PollSchedule {
            policy: self.clone(),
            current: None,
        }
    }
}

/// Calculate the next exponential delay from the current one.
///
/// The result never drops below `current` and is clamped to `max`.
pub fn next_delay(current: Duration, multiplier: f64, max: Duration) -> Duration {
    let factor = if multiplier.is_finite() && multiplier >= 1.0 {
        multiplier
    } else {
        1.0
    };
    let next_ms = (current.as_millis() as f64 * factor) as u64;
    Duration::from_millis(next_ms).max(current).min(max)
}

/// Pick a uniformly random delay in `[min, max]`.
///
/// A window with `min > max` collapses to `min`.
pub fn jittered_delay(min: Duration, max: Duration) -> Duration {
    let lo = min.as_millis() as u64;
    let hi = max.as_millis() as u64;
    if hi <= lo {
        return min;
    }
    Duration::from_millis(rand::rng().random_range(lo..=hi))
}

/// Per-job iterator over poll delays.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    policy: PollBackoff,
    current: Option<Duration>,
}

impl PollSchedule {
    /// Delay to wait before the next poll.
    pub fn next_delay(&mut self) -> Duration {
        match &self.policy {
            PollBackoff::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let max = (*max).max(MIN_POLL_DELAY);
                let delay = match self.current {
                    None => (*initial).clamp(MIN_POLL_DELAY, max),
                    Some(current) => next_delay(current, *multiplier, max),
                };
                self.current = Some(delay);
                delay
            }
            PollBackoff::Jittered { min, max } => {
                jittered_delay((*min).max(MIN_POLL_DELAY), (*max).max(MIN_POLL_DELAY))
            }
        }
    }
}

impl Iterator for PollSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(PollSchedule::next_delay(self))
    }
}
