use crate::RequestError;
use rally_config::RetrySettings;
use std::time::Duration;

/// Per-request retry state. Consulted by the network executor after every
/// retryable failure; an `Err` ends the attempt loop.
pub trait RetryPolicy: Send + Sync {
    /// Timeout for the next attempt.
    fn current_timeout(&self) -> Duration;

    /// Number of retries performed so far.
    fn current_retry_count(&self) -> u32;

    /// Prepares the next attempt, or gives up with the error to report.
    fn retry(&mut self, error: RequestError) -> Result<(), RequestError>;
}

/// Retries up to `max_retries` times, multiplying the attempt timeout by
/// `backoff_multiplier` after each failure.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultRetryPolicy {
    current_timeout: Duration,
    current_retry_count: u32,
    max_retries: u32,
    backoff_multiplier: f32,
}

impl DefaultRetryPolicy {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2500);
    pub const DEFAULT_MAX_RETRIES: u32 = 1;
    pub const DEFAULT_BACKOFF_MULTIPLIER: f32 = 1.0;

    pub fn new(
        initial_timeout: Duration,
        max_retries: u32,
        backoff_multiplier: f32,
    ) -> Self {
        let backoff_multiplier =
            if backoff_multiplier.is_finite() && backoff_multiplier > 0.0 {
                backoff_multiplier
            } else {
                Self::DEFAULT_BACKOFF_MULTIPLIER
            };
        Self {
            current_timeout: initial_timeout,
            current_retry_count: 0,
            max_retries,
            backoff_multiplier,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff_multiplier(&self) -> f32 {
        self.backoff_multiplier
    }

    fn has_attempt_remaining(&self) -> bool {
        self.current_retry_count <= self.max_retries
    }
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_TIMEOUT,
            Self::DEFAULT_MAX_RETRIES,
            Self::DEFAULT_BACKOFF_MULTIPLIER,
        )
    }
}

impl From<&RetrySettings> for DefaultRetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self::new(
            Duration::from_millis(settings.initial_timeout_ms),
            settings.max_retries,
            settings.backoff_multiplier,
        )
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn current_timeout(&self) -> Duration {
        self.current_timeout
    }

    fn current_retry_count(&self) -> u32 {
        self.current_retry_count
    }

    fn retry(&mut self, error: RequestError) -> Result<(), RequestError> {
        self.current_retry_count += 1;
        self.current_timeout = Duration::try_from_secs_f32(
            self.current_timeout.as_secs_f32() * self.backoff_multiplier,
        )
        .unwrap_or(Duration::MAX);

        if self.has_attempt_remaining() {
            Ok(())
        } else {
            Err(RequestError::RetryExhausted(Box::new(error)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_grow_until_exhausted() {
        let mut policy = DefaultRetryPolicy::new(Duration::from_millis(1000), 2, 2.0);
        let mut attempts = vec![policy.current_timeout()];

        assert!(policy.retry(RequestError::Timeout).is_ok());
        attempts.push(policy.current_timeout());
        assert!(policy.retry(RequestError::Timeout).is_ok());
        attempts.push(policy.current_timeout());

        let exhausted = policy.retry(RequestError::Timeout).unwrap_err();
        assert!(matches!(
            exhausted,
            RequestError::RetryExhausted(last) if matches!(*last, RequestError::Timeout)
        ));
        assert_eq!(
            attempts,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000)
            ]
        );
        assert_eq!(policy.current_retry_count(), 3);
    }

    #[test]
    fn test_defaults() {
        let mut policy = DefaultRetryPolicy::default();
        assert_eq!(policy.current_timeout(), Duration::from_millis(2500));
        assert!(policy.retry(RequestError::Timeout).is_ok());
        assert_eq!(policy.current_timeout(), Duration::from_millis(2500));
        assert!(policy.retry(RequestError::Timeout).is_err());
    }

    #[test]
    fn test_zero_retries_fails_first_time() {
        let mut policy = DefaultRetryPolicy::new(Duration::from_millis(10), 0, 1.0);
        assert!(policy.retry(RequestError::Timeout).is_err());
    }

    #[test]
    fn test_bad_multiplier_falls_back() {
        let policy = DefaultRetryPolicy::new(Duration::from_millis(10), 1, f32::NAN);
        assert_eq!(policy.backoff_multiplier(), 1.0);
        let policy = DefaultRetryPolicy::new(Duration::from_millis(10), 1, -3.0);
        assert_eq!(policy.backoff_multiplier(), 1.0);
    }

    #[test]
    fn test_from_settings() {
        let settings = RetrySettings {
            initial_timeout_ms: 700,
            max_retries: 4,
            backoff_multiplier: 1.5,
        };
        let policy = DefaultRetryPolicy::from(&settings);
        assert_eq!(policy.current_timeout(), Duration::from_millis(700));
        assert_eq!(policy.max_retries(), 4);
        assert_eq!(policy.backoff_multiplier(), 1.5);
    }
}
