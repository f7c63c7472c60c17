//! Reconnect backoff schedules.
//!
//! A [`ReconnectPolicy`] is a pure function from "how many attempts have
//! failed so far" to "how long to wait before the next one".  The attempt
//! counter itself is owned by whoever drives reconnection.

use std::time::Duration;

/// A table of delays indexed by attempt number.
///
/// Attempts past the end of the table reuse the last entry.  If
/// `max_attempts` is set, [`ReconnectPolicy::next_delay`] returns `None`
/// once that many attempts have been made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delays: Vec<Duration>,
    max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Builds a policy from an explicit schedule.
    ///
    /// An empty schedule means "retry immediately".
    pub fn new(delays: Vec<Duration>, max_attempts: Option<u32>) -> Self {
        Self {
            delays,
            max_attempts,
        }
    }

    /// The shared multiplexer schedule: `0, 2, 5, 10, 30` seconds, retried
    /// forever at the 30 s ceiling while any subscriber remains.
    pub fn shared_default() -> Self {
        Self::new(
            [0, 2_000, 5_000, 10_000, 30_000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
            None,
        )
    }

    /// The schedule a stock hub client uses for its automatic reconnect:
    /// `0, 2, 10, 30` seconds, then give up.
    pub fn hub_client_default() -> Self {
        Self::new(
            [0, 2_000, 10_000, 30_000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
            Some(4),
        )
    }

    /// Delay before attempt number `attempt` (0-based), clamped to the last
    /// entry of the schedule.  Ignores `max_attempts`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.delays.len().saturating_sub(1));
        self.delays.get(index).copied().unwrap_or(Duration::ZERO)
    }

    /// Like [`delay_for_attempt`](Self::delay_for_attempt) but returns
    /// `None` when the policy has given up.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay_for_attempt(attempt)),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_attempts.is_none()
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::shared_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_millis).collect()
    }

    #[test]
    fn test_shared_schedule_for_six_failures_is_clamped() {
        // Arrange
        let policy = ReconnectPolicy::shared_default();

        // Act
        let delays: Vec<Duration> = (0..6).map(|n| policy.delay_for_attempt(n)).collect();

        // Assert
        assert_eq!(delays, ms(&[0, 2_000, 5_000, 10_000, 30_000, 30_000]));
    }

    #[test]
    fn test_shared_schedule_never_gives_up() {
        let policy = ReconnectPolicy::shared_default();
        assert!(policy.is_unbounded());
        assert_eq!(policy.next_delay(10_000), Some(Duration::from_secs(30)));
        assert_eq!(policy.next_delay(u32::MAX), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_hub_client_schedule_gives_up_after_four_attempts() {
        let policy = ReconnectPolicy::hub_client_default();
        let delays: Vec<Option<Duration>> = (0..5).map(|n| policy.next_delay(n)).collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::ZERO),
                Some(Duration::from_secs(2)),
                Some(Duration::from_secs(10)),
                Some(Duration::from_secs(30)),
                None,
            ]
        );
    }

    #[test]
    fn test_empty_schedule_retries_immediately() {
        let policy = ReconnectPolicy::new(Vec::new(), None);
        assert_eq!(policy.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn test_default_is_shared_schedule() {
        assert_eq!(ReconnectPolicy::default(), ReconnectPolicy::shared_default());
    }
}
