//! Retry policy for jobs and outbox deliveries
//!
//! The backoff contract lives in one place and is passed to call sites
//! explicitly, so the retry behavior of a queue or channel is visible where
//! it is configured and testable in isolation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (first attempt included)
    pub max_attempts: i32,
    /// Base delay between attempts
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0) spreading retries of concurrent failures
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy with fixed delay and no jitter.
    pub fn fixed(max_attempts: i32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            jitter: 0.0,
        }
    }

    /// Policy with exponential backoff between `base_delay` and `max_delay`.
    pub fn exponential(max_attempts: i32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: 0.1,
        }
    }

    /// Delay before the next attempt, given how many attempts have already
    /// run (1-indexed): `base * 2^(attempt-1)`, capped, with deterministic
    /// jitter so the schedule is reproducible in tests.
    pub fn delay_for_attempt(&self, attempt: i32) -> Duration {
        if attempt <= 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = 2_f64.powi((attempt - 1).min(30));
        let delay_ms = (base_ms * exp).min(max_ms);

        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Whether another attempt is allowed after `attempts` have run.
    pub fn should_retry(&self, attempts: i32) -> bool {
        attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(40));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_range() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(600),
            jitter: 0.2,
        };

        for attempt in 1..=5 {
            let nominal = Duration::from_secs(10 * 2u64.pow(attempt as u32 - 1));
            let actual = policy.delay_for_attempt(attempt);
            let spread = nominal.mul_f64(0.2);
            assert!(actual >= nominal.saturating_sub(spread));
            assert!(actual <= nominal + spread);
        }
    }

    #[test]
    fn test_fixed_policy() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(5));
    }

    #[test]
    fn test_should_retry_bounds() {
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_zero_attempt_has_no_delay() {
        assert_eq!(RetryPolicy::default().delay_for_attempt(0), Duration::ZERO);
    }
}
