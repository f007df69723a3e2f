//! Reconnect backoff for dropped streams.

use onair_proto::config::PlaybackConfig;
use std::time::Duration;

/// Capped exponential backoff inside a fixed window: 1s, 2s, 4s, 4s...
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max_delay: Duration,
    /// Total wait allowed before the failure is surfaced.
    pub budget: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_retry_ms),
            max_delay: Duration::from_millis(config.max_retry_delay_ms),
            budget: Duration::from_secs(config.max_retry_secs),
        }
    }

    /// Delay before attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(2);
        (self.initial * 2u32.pow(exp)).min(self.max_delay)
    }

    /// `None` once the delays already spent reach the budget.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        let spent: Duration = (1..attempt).map(|n| self.delay_for(n)).sum();
        (spent < self.budget).then(|| self.delay_for(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PlaybackConfig::default())
    }
}

/// Attempt counter for the stream currently being played.
#[derive(Debug, Default)]
pub struct RetryState {
    attempt: u32,
}

impl RetryState {
    /// Advance and return the delay for the next reconnect, if any is left.
    pub fn next(&mut self, policy: &RetryPolicy) -> Option<Duration> {
        self.attempt += 1;
        policy.next_delay(self.attempt)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_fits_window() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::default();
        let delays: Vec<u64> = std::iter::from_fn(|| state.next(&policy))
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 4, 4]);
        assert_eq!(state.attempt(), 6);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            initial: Duration::from_millis(500),
            max_delay: Duration::from_millis(1500),
            budget: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(1500));
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::default();
        state.next(&policy);
        state.next(&policy);
        state.reset();
        assert_eq!(state.next(&policy), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let policy = RetryPolicy {
            budget: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.next_delay(1), None);
    }
}
