//! Retry-with-backoff decisions.

use std::time::Duration;

/// What to do after a retriable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue the item with `attempt` after `delay`.
    Retry {
        /// Attempt count the re-enqueued item carries.
        attempt: u32,
        /// Backoff before the item becomes eligible again.
        delay: Duration,
    },
    /// Attempts are exhausted; move the file into quarantine.
    Quarantine {
        /// Total attempts made.
        attempts: u32,
    },
}

/// Exponential backoff bounded by a maximum attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Build a policy. A zero `max_retries` behaves as one.
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Maximum number of attempts before quarantine.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decide the next step after attempt number `attempt` (0-based) failed.
    #[must_use]
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        let next = attempt.saturating_add(1);
        if self.is_exhausted(next) {
            return RetryDecision::Quarantine { attempts: next };
        }
        RetryDecision::Retry {
            attempt: next,
            delay: self.delay_for(next),
        }
    }

    /// Whether `count` failures (or unclassifiable cycles) reach the limit.
    #[must_use]
    pub const fn is_exhausted(&self, count: u32) -> bool {
        count >= self.max_retries
    }

    /// Backoff before attempt `attempt` (1-based): `base * 2^(attempt - 1)`, capped.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1_u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(60))
    }

    #[test]
    fn retries_until_max_then_quarantines() {
        let policy = policy();
        assert_eq!(
            policy.decide(0),
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(
            policy.decide(1),
            RetryDecision::Retry {
                attempt: 2,
                delay: Duration::from_secs(4)
            }
        );
        assert_eq!(policy.decide(2), RetryDecision::Quarantine { attempts: 3 });
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::new(50, Duration::from_secs(2), Duration::from_secs(60));
        assert_eq!(policy.delay_for(5), Duration::from_secs(32));
        assert_eq!(policy.delay_for(6), Duration::from_secs(60));
        assert_eq!(policy.delay_for(40), Duration::from_secs(60));
    }

    #[test]
    fn single_attempt_policy_quarantines_immediately() {
        let policy = RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1));
        assert_eq!(policy.decide(0), RetryDecision::Quarantine { attempts: 1 });
        assert!(policy.is_exhausted(1));
    }
}
