use std::future::Future;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use crate::core::{Result, UploadError};

/// Backoff shape between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Linear,
    Exponential,
}

/// Delay schedule
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Same delay every time
    Fixed(Duration),
    Exponential {
        initial: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
    Linear {
        initial: Duration,
        increment: Duration,
        max_delay: Duration,
    },
}

impl RetryStrategy {
    /// Delay before retry number `attempt` (0-based)
    pub fn get_delay(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential { initial, multiplier, max_delay } => {
                let delay = initial.as_secs_f64() * multiplier.powf(attempt as f64);
                std::cmp::min(Duration::from_secs_f64(delay), *max_delay)
            }
            RetryStrategy::Linear { initial, increment, max_delay } => {
                std::cmp::min(*initial + (*increment * attempt), *max_delay)
            }
        }
    }
}

/// Transport retry settings, `[retry]` in the config file.
///
/// The default makes a single attempt: part failures fail the file unless a
/// policy is configured explicitly.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Exponential,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn strategy(&self) -> RetryStrategy {
        let initial = Duration::from_millis(self.initial_delay_ms);
        let max_delay = Duration::from_millis(self.max_delay_ms);

        match self.backoff {
            Backoff::Fixed => RetryStrategy::Fixed(initial),
            Backoff::Linear => RetryStrategy::Linear {
                initial,
                increment: initial,
                max_delay,
            },
            Backoff::Exponential => RetryStrategy::Exponential {
                initial,
                multiplier: 2.0,
                max_delay,
            },
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or the
/// attempts run out. Waiting between attempts stops as soon as `cancel` fires.
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let strategy = policy.strategy();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let error = match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => error,
        };

        attempt += 1;
        if attempt >= max_attempts || !error.is_transient() || cancel.is_cancelled() {
            return Err(error);
        }

        let delay = strategy.get_delay(attempt - 1);
        warn!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, error = %error, "Retrying request");

        tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Aborted),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Backoff::Fixed,
            initial_delay_ms: 1,
            max_delay_ms: 1,
        }
    }

    #[test]
    fn test_strategy_delays() {
        let exponential = RetryStrategy::Exponential {
            initial: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(exponential.get_delay(0), Duration::from_millis(100));
        assert_eq!(exponential.get_delay(1), Duration::from_millis(200));
        assert_eq!(exponential.get_delay(2), Duration::from_millis(350));

        let linear = RetryStrategy::Linear {
            initial: Duration::from_millis(100),
            increment: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(linear.get_delay(2), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_retry_success() {
        let cancel = CancellationToken::new();
        let mut count = 0;
        let result = retry_with_policy(&fast_policy(3), &cancel, || {
            count += 1;
            let current = count;
            async move {
                if current < 3 {
                    Err(UploadError::remote(503, "busy"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_default_policy_does_not_retry() {
        let cancel = CancellationToken::new();
        let mut count = 0;
        let result = retry_with_policy(&RetryPolicy::default(), &cancel, || {
            count += 1;
            async { Err::<(), _>(UploadError::remote(503, "busy")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let cancel = CancellationToken::new();
        let mut count = 0;
        let result = retry_with_policy(&fast_policy(5), &cancel, || {
            count += 1;
            async { Err::<(), _>(UploadError::AlreadyExists("a".into())) }
        })
        .await;

        assert!(result.unwrap_err().is_already_exists());
        assert_eq!(count, 1);
    }
}
