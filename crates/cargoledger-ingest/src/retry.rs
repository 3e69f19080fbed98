//! Exponential backoff schedule shared by persistence retries and the
//! supervisor's restart loop.

use crate::config::RetryConfig;
use std::time::Duration;

/// Stateless retry policy: computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the `attempt`-th retry (1-based), or `None` once
    /// `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let exp = (attempt - 1).min(i32::MAX as u32) as i32;
        let base_ms = self.config.initial_backoff_ms as f64 * self.config.multiplier.powi(exp);
        let capped = base_ms.min(self.config.max_backoff_ms as f64);
        Some(Duration::from_millis(capped as u64))
    }

    /// `true` if a retry is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.config.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32, initial: u64, max: u64, multiplier: f64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_backoff_ms: initial,
            max_backoff_ms: max,
            multiplier,
        })
    }

    #[test]
    fn delays_double() {
        let p = policy(3, 100, 30_000, 2.0);
        assert_eq!(p.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(p.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(p.next_delay(3), Some(Duration::from_millis(400)));
        assert!(p.next_delay(4).is_none());
    }

    #[test]
    fn delay_capped_at_max() {
        let p = policy(10, 100, 500, 10.0);
        assert_eq!(p.next_delay(5), Some(Duration::from_millis(500)));
    }

    #[test]
    fn huge_attempt_numbers_stay_capped() {
        let p = policy(u32::MAX, 500, 60_000, 2.0);
        assert_eq!(p.next_delay(10_000), Some(Duration::from_millis(60_000)));
    }

    #[test]
    fn should_retry_boundary() {
        let p = policy(2, 100, 1_000, 2.0);
        assert!(p.should_retry(1));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
    }
}
