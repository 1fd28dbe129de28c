//! Step retry policy

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::workflow::StepError;

/// Retry configuration for step bodies
///
/// A failed step is retried inside the same resume with exponential backoff
/// and jitter. Once attempts are exhausted (or the error is not retryable)
/// the failure escalates to the workflow instance.
///
/// # Example
///
/// ```
/// use lifecycle_durable::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(4)
///     .with_initial_interval(Duration::from_millis(500))
///     .with_max_interval(Duration::from_secs(10));
///
/// assert!(policy.has_attempts_remaining(3));
/// assert!(!policy.has_attempts_remaining(4));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "crate::serde_millis")]
    pub initial_interval: Duration,

    /// Upper bound for any single delay
    #[serde(with = "crate::serde_millis")]
    pub max_interval: Duration,

    /// Multiplier applied per retry
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0), 0.1 means +/-10%
    pub jitter: f64,

    /// Step error types that are never retried
    #[serde(default)]
    pub non_retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff: 5 attempts, 1s initial, x2, 60s cap, 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            jitter: 0.1,
            non_retryable_errors: vec![],
        }
    }

    /// Single attempt, failures escalate immediately
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            non_retryable_errors: vec![],
        }
    }

    /// Fixed delay between attempts
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            non_retryable_errors: vec![],
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient.max(1.0);
        self
    }

    /// Set the jitter factor, clamped to 0.0-1.0
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Never retry step errors carrying this type
    pub fn with_non_retryable_error(mut self, error_type: impl Into<String>) -> Self {
        self.non_retryable_errors.push(error_type.into());
        self
    }

    /// Delay to wait before `attempt` (1-based); the first attempt has none
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry_num = attempt - 1;
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_coefficient.powi(retry_num as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jitter_range = capped * self.jitter;
        let jittered = if jitter_range > 0.0 {
            let offset = rand::thread_rng().gen_range(-jitter_range..jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        // Jitter can push a capped delay past what a Duration holds.
        Duration::try_from_secs_f64(jittered).unwrap_or(self.max_interval)
    }

    /// Whether an error type is eligible for retry at all
    pub fn is_retryable_type(&self, error_type: Option<&str>) -> bool {
        match error_type {
            Some(error_type) => !self.non_retryable_errors.iter().any(|t| t == error_type),
            None => true,
        }
    }

    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }

    /// Decide whether a step that just failed on `attempt` runs again
    pub fn should_retry(&self, error: &StepError, attempt: u32) -> bool {
        error.retryable
            && self.is_retryable_type(error.error_type.as_deref())
            && self.has_attempts_remaining(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_defaults() {
        let policy = RetryPolicy::exponential();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_interval, Duration::from_secs(1));
        assert_eq!(policy.max_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_delay_for_attempt_without_jitter() {
        let policy = RetryPolicy::exponential().with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::exponential()
            .with_max_interval(Duration::from_secs(5))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(12), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::exponential().with_jitter(0.5);
        for _ in 0..50 {
            let delay = policy.delay_for_attempt(2);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_zero_interval_with_jitter_does_not_panic() {
        let policy = RetryPolicy::fixed(Duration::ZERO, 3).with_jitter(0.3);
        assert_eq!(policy.delay_for_attempt(2), Duration::ZERO);
    }

    #[test]
    fn test_unbounded_max_interval_with_jitter_does_not_panic() {
        let policy = RetryPolicy::exponential()
            .with_max_interval(Duration::MAX)
            .with_backoff_coefficient(10.0)
            .with_jitter(0.5);

        for attempt in [50, 400] {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= Duration::from_secs(3600));
        }
    }

    #[test]
    fn test_should_retry_respects_error_kind() {
        let policy = RetryPolicy::exponential()
            .with_max_attempts(3)
            .with_non_retryable_error("DISPATCH_REJECTED");

        let transient = StepError::retryable("connection reset");
        assert!(policy.should_retry(&transient, 1));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3));

        let permanent = StepError::non_retryable("bad address");
        assert!(!policy.should_retry(&permanent, 1));

        let rejected = StepError::retryable("rejected").with_type("DISPATCH_REJECTED");
        assert!(!policy.should_retry(&rejected, 1));
    }

    #[test]
    fn test_no_retry_policy() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.should_retry(&StepError::retryable("x"), 1));
    }

    #[test]
    fn test_serialization_uses_millis() {
        let policy = RetryPolicy::fixed(Duration::from_millis(250), 2);
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["initial_interval"], 250);

        let parsed: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, policy);
    }
}
