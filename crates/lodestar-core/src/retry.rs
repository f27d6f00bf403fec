//! Reconnection backoff schedule.
//!
//! The gateway retries quickly at first (2s, 4s, 30s, 5m) and then settles
//! into a 30 minute cadence for twelve hours. Sustained failure usually
//! means the credentials need renewing out of band.

use std::time::Duration;

/// Short delays tried before the long tail.
const EARLY_DELAYS: [Duration; 4] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(30),
    Duration::from_secs(5 * 60),
];

/// Spacing of the long-tail retries.
const TAIL_DELAY: Duration = Duration::from_secs(30 * 60);

/// Number of long-tail retries (twelve hours at [`TAIL_DELAY`]).
const TAIL_RETRIES: usize = 24;

/// Ordered list of waits between connection attempts.
///
/// A schedule of `n` delays allows `n + 1` attempts in total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::standard()
    }
}

impl RetrySchedule {
    /// The production schedule: 2s, 4s, 30s, 5m, then 24 x 30m.
    pub fn standard() -> Self {
        let mut delays = Vec::with_capacity(EARLY_DELAYS.len().saturating_add(TAIL_RETRIES));
        delays.extend_from_slice(&EARLY_DELAYS);
        delays.extend(std::iter::repeat_n(TAIL_DELAY, TAIL_RETRIES));
        Self { delays }
    }

    /// A custom schedule.
    pub const fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Every delay, in order.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Number of retries after the first attempt.
    pub fn retries(&self) -> usize {
        self.delays.len()
    }

    /// Sum of every delay.
    pub fn total(&self) -> Duration {
        self.delays
            .iter()
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(*d))
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn standard_schedule_order_and_count() {
        let schedule = RetrySchedule::standard();
        assert_eq!(schedule.retries(), 28);
        assert_eq!(
            &schedule.delays()[..4],
            &[
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(30),
                Duration::from_secs(300),
            ]
        );
        assert!(
            schedule.delays()[4..]
                .iter()
                .all(|d| *d == Duration::from_secs(1800))
        );
    }

    #[test]
    fn long_tail_spans_twelve_hours() {
        let schedule = RetrySchedule::standard();
        let tail: Duration = schedule.delays()[4..].iter().sum();
        assert_eq!(tail, Duration::from_secs(12 * 60 * 60));
        assert_eq!(
            schedule.total(),
            Duration::from_secs(12 * 60 * 60 + 2 + 4 + 30 + 300)
        );
    }
}
