//! Exponential-backoff retry, applied only to declared transient errors
//! (§4.F, §8 property 6).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PayBridgeError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_wait: Duration,
    pub multiplier: f64,
    pub max_wait: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_wait: Duration::from_millis(100),
            multiplier: 2.0,
            max_wait: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// `wait * multiplier^attempt`, capped at `maxWait`. `attempt` is
    /// zero-based (the delay before the *second* call uses `attempt=0`).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base_wait.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled).min(self.max_wait)
    }
}

/// Runs `operation` up to `config.max_attempts` times, sleeping the computed
/// backoff between attempts, stopping as soon as an attempt succeeds or
/// returns a non-retryable error.
pub async fn execute_with_retry<T, F, Fut>(
    service: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, PayBridgeError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, PayBridgeError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < config.max_attempts => {
                let delay = config.delay_for_attempt(attempt);
                warn!(service, attempt, ?delay, error = %err, "retrying after transient dispatch error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_exponentially_and_caps_at_max_wait() {
        let config = RetryConfig {
            max_attempts: 10,
            base_wait: Duration::from_millis(10),
            multiplier: 2.0,
            max_wait: Duration::from_millis(100),
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(10));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(20));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(40));
        assert_eq!(config.delay_for_attempt(10), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn stops_retrying_once_attempt_succeeds() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig { max_attempts: 5, base_wait: Duration::from_millis(1), ..Default::default() };
        let result = execute_with_retry("clearing", &config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PayBridgeError::DispatchTransient { service: "clearing".into(), message: "reset".into() })
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_retries_non_transient_errors() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();
        let result: Result<i32, _> = execute_with_retry("clearing", &config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PayBridgeError::DispatchPermanent { service: "clearing".into(), message: "400".into() }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn total_attempts_never_exceed_max_attempts() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig { max_attempts: 3, base_wait: Duration::from_millis(1), ..Default::default() };
        let result: Result<i32, _> = execute_with_retry("clearing", &config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PayBridgeError::DispatchTransient { service: "clearing".into(), message: "reset".into() }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
