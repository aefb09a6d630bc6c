//! Retry policy for deliveries that must not be dropped.
//!
//! Exponential backoff with up to half an interval of random jitter.

use std::time::Duration;

/// How `send_with_retry` spaces its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included. Never below 1.
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled for every further one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Create a policy making `max_attempts` attempts.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// A policy making a single attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Backoff without jitter after the failed attempt `attempt` (0-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }

    /// Sleep duration after the failed attempt `attempt`:
    /// `base_delay * 2^attempt + uniform(0, base_delay / 2)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter = self.base_delay.mul_f64(rand::random::<f64>() * 0.5);
        self.backoff(attempt).saturating_add(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_with_bounded_jitter() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        for attempt in 0..4 {
            let floor = Duration::from_millis(100 * 2u64.pow(attempt));
            for _ in 0..50 {
                let delay = policy.delay_for_attempt(attempt);
                assert!(delay >= floor, "{delay:?} < {floor:?}");
                assert!(delay <= floor + Duration::from_millis(50), "{delay:?} too long");
            }
        }
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
    }
}
