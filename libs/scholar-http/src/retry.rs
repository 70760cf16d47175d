use std::time::Duration;

use crate::error::ClientError;

const BASE_DELAY: Duration = Duration::from_millis(1000);
const MAX_DELAY: Duration = Duration::from_millis(5000);

/// Status-aware retry policy with capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    #[must_use]
    pub fn max_retries(self) -> u32 {
        self.max_retries
    }

    /// Whether the failure of attempt `attempt` (zero-based) earns another one.
    #[must_use]
    pub fn should_retry(self, error: &ClientError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_retryable()
    }

    /// `min(1000ms * 2^attempt, 5000ms)`.
    #[must_use]
    pub fn delay_for(self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        BASE_DELAY.saturating_mul(factor).min(MAX_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use http::StatusCode;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::new(5);
        let delays: Vec<u128> = (0..5).map(|k| policy.delay_for(k).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 5000, 5000]);
        assert_eq!(policy.delay_for(40), MAX_DELAY);
    }

    #[test]
    fn test_attempts_are_bounded() {
        let policy = RetryPolicy::new(2);
        let err = ClientError::Api(ApiError::new("down", StatusCode::SERVICE_UNAVAILABLE));
        assert!(policy.should_retry(&err, 0));
        assert!(policy.should_retry(&err, 1));
        assert!(!policy.should_retry(&err, 2));
    }

    #[test]
    fn test_client_errors_never_retry() {
        let policy = RetryPolicy::new(3);
        for status in [StatusCode::BAD_REQUEST, StatusCode::NOT_FOUND, StatusCode::TOO_MANY_REQUESTS] {
            let err = ClientError::Api(ApiError::new("x", status));
            assert!(!policy.should_retry(&err, 0), "{status} must not retry");
        }
    }

    #[test]
    fn test_zero_retries() {
        let policy = RetryPolicy::new(0);
        assert!(!policy.should_retry(&ClientError::Connection("reset".into()), 0));
    }
}
