//! Retry policy and backoff strategies.

use crate::GatewayError;
use std::time::Duration;

/// Retry policy for failed dispatches.
///
/// Network-level failures and server-side statuses (5xx, 429) are
/// retryable; other client errors are terminal. Auth failures (401/403)
/// never reach this policy; the auth coordinator owns them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay schedule between attempts.
    pub backoff: BackoffStrategy,
    /// Non-5xx status codes that should still trigger a retry.
    pub retry_status_codes: Vec<u16>,
    /// Whether to retry when no response was received.
    pub retry_on_network_error: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Linear {
                delay: Duration::from_millis(300),
                max: Duration::from_secs(5),
            },
            retry_status_codes: vec![408, 429],
            retry_on_network_error: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with linearly increasing delay.
    pub fn linear(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::Linear {
                delay,
                max: Duration::from_secs(30),
            },
            ..Default::default()
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, initial: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::Exponential {
                initial,
                max: Duration::from_secs(30),
                multiplier: 2.0,
            },
            ..Default::default()
        }
    }

    /// Create a policy with a constant delay.
    pub fn constant(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::Constant(delay),
            ..Default::default()
        }
    }

    /// Create a policy with no delay between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::None,
            ..Default::default()
        }
    }

    /// Check if a response status should trigger a retry.
    pub fn should_retry_status(&self, status: u16) -> bool {
        status >= 500 || self.retry_status_codes.contains(&status)
    }

    /// Check if a failed attempt should be retried.
    ///
    /// `attempt` is the 0-indexed number of the attempt that just failed.
    pub fn should_retry(&self, attempt: u32, error: &GatewayError) -> bool {
        if attempt + 1 >= self.max_attempts {
            return false;
        }
        match error {
            GatewayError::Network(_) => self.retry_on_network_error,
            GatewayError::Server { status, .. } => self.should_retry_status(*status),
            _ => false,
        }
    }

    /// Delay before the given retry attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay_for_attempt(attempt)
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Constant delay between retries.
    Constant(Duration),
    /// Delay grows by a fixed increment per attempt.
    Linear {
        /// Delay increment per attempt.
        delay: Duration,
        /// Maximum delay.
        max: Duration,
    },
    /// Delay grows geometrically per attempt.
    Exponential {
        /// Delay before the first retry.
        initial: Duration,
        /// Maximum delay.
        max: Duration,
        /// Growth factor (typically 2.0).
        multiplier: f64,
    },
}

impl BackoffStrategy {
    /// Calculate the delay before the given retry attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(d) => *d,
            Self::Linear { delay, max } => delay.saturating_mul(attempt).min(*max),
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let factor = multiplier.powi(attempt as i32 - 1);
                let millis = (initial.as_millis() as f64 * factor) as u64;
                Duration::from_millis(millis).min(*max)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let strategy = BackoffStrategy::Linear {
            delay: Duration::from_millis(300),
            max: Duration::from_secs(1),
        };
        assert_eq!(strategy.delay_for_attempt(1), Duration::from_millis(300));
        assert_eq!(strategy.delay_for_attempt(2), Duration::from_millis(600));
        assert_eq!(strategy.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_backoff() {
        let strategy = BackoffStrategy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
        };
        assert_eq!(strategy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(strategy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(strategy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_constant_and_none() {
        assert_eq!(
            BackoffStrategy::Constant(Duration::from_millis(50)).delay_for_attempt(7),
            Duration::from_millis(50)
        );
        assert_eq!(BackoffStrategy::None.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn test_status_classification() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry_status(500));
        assert!(policy.should_retry_status(503));
        assert!(policy.should_retry_status(429));
        assert!(!policy.should_retry_status(404));
        assert!(!policy.should_retry_status(401));
    }

    #[test]
    fn test_attempt_bound() {
        let policy = RetryPolicy::immediate(3);
        let err = GatewayError::Network("reset".into());
        assert!(policy.should_retry(0, &err));
        assert!(policy.should_retry(1, &err));
        assert!(!policy.should_retry(2, &err));
    }

    #[test]
    fn test_terminal_errors_never_retry() {
        let policy = RetryPolicy::default();
        let err = GatewayError::Client {
            status: 404,
            message: "not found".into(),
        };
        assert!(!policy.should_retry(0, &err));
        assert!(!policy.should_retry(0, &GatewayError::Auth("expired".into())));
    }
}
