use std::time::Duration;

use crate::error::{ErrorKind, OrbitError};

/// Exponential backoff policy applied to activity attempts.
///
/// Attempts are 1-based. When the remote supplied a `Retry-After` hint, that
/// hint becomes the backoff base for the failing attempt and is deliberately
/// not clamped by `max_interval`: the remote's number wins over ours.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_secs(60),
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// A policy capped at `max_attempts` attempts with default backoff.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Backoff delay after the given (1-based) attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31) as i32;
        let delay = self
            .initial_interval
            .mul_f64(self.backoff_coefficient.powi(exp));
        delay.min(self.max_interval)
    }

    /// Delay before the next attempt, or `None` when the error is terminal
    /// for this invocation (non-retryable kind or attempts exhausted).
    pub fn next_delay(&self, attempt: u32, error: &OrbitError) -> Option<Duration> {
        if attempt >= self.max_attempts || !error.is_retryable() {
            return None;
        }
        if let ErrorKind::RateLimited {
            retry_after: Some(hint),
        } = &error.kind
        {
            let exp = attempt.saturating_sub(1).min(31) as i32;
            return Some(hint.mul_f64(self.backoff_coefficient.powi(exp)));
        }
        Some(self.delay_for_attempt(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(30), Duration::from_secs(60));
    }

    #[test]
    fn retry_after_scales_without_cap() {
        let policy = RetryPolicy::default();
        let err = OrbitError::rate_limited(Some(Duration::from_secs(30)), "slow down");

        assert_eq!(policy.next_delay(1, &err), Some(Duration::from_secs(30)));
        assert_eq!(policy.next_delay(2, &err), Some(Duration::from_secs(60)));
        assert_eq!(policy.next_delay(3, &err), Some(Duration::from_secs(120)));
    }

    #[test]
    fn non_retryable_is_terminal() {
        let policy = RetryPolicy::default();
        let err = OrbitError::validation("bad input");
        assert_eq!(policy.next_delay(1, &err), None);
    }

    #[test]
    fn attempts_exhaust() {
        let policy = RetryPolicy::with_max_attempts(3);
        let err = OrbitError::transient("flaky");
        assert!(policy.next_delay(2, &err).is_some());
        assert_eq!(policy.next_delay(3, &err), None);
    }

    #[test]
    fn none_never_retries() {
        let policy = RetryPolicy::none();
        let err = OrbitError::transient("flaky");
        assert_eq!(policy.next_delay(1, &err), None);
    }
}
