//! Retry with exponential backoff and jitter for idempotent REST calls.
//!
//! Streaming requests and POSTs are never retried.

use crate::client::ClientError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff policy for the client's idempotent GETs (conversation and model
/// listings, single conversation lookups).
///
/// The stream, logins and every other write go out exactly once no matter
/// what this says. Set `max_retries` to 0, or use [`RetryConfig::none`], to
/// make GETs single-shot too.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts after the first GET fails with a retryable error.
    pub max_retries: usize,
    /// Wait before the first retry, in milliseconds. A 429's
    /// `Retry-After` takes precedence.
    pub initial_delay_ms: u64,
    /// Growth factor between consecutive waits.
    pub backoff_multiplier: f64,
    /// Upper bound on any computed wait, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    /// Two retries, 0.5s then 1s (each ±20%), capped at 10s.
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 500,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Wait before retry number `attempt` (the first retry is 1), jittered
    /// by ±20% so clients hitting the same outage spread out.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let ceiling = self.max_delay_ms as f64;
        let wait_ms = (self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent)).min(ceiling);
        let spread = 0.8 + 0.4 * rand::random::<f64>();
        Duration::from_millis((wait_ms * spread) as u64)
    }
}

impl ClientError {
    /// Rate limits, network failures and 5xx responses are worth retrying.
    /// Auth failures, other HTTP errors and cancellation are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Network(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Server-specified delay from a 429's `Retry-After`.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
pub(crate) async fn with_retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                let delay = e
                    .retry_after()
                    .unwrap_or_else(|| config.delay_for_attempt(attempt));
                log_retry(attempt, config.max_retries, &delay, &e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn log_retry(attempt: usize, max: usize, delay: &Duration, error: &ClientError) {
    warn!(
        "Request failed (attempt {}/{}), retrying in {:.1}s: {}",
        attempt,
        max,
        delay.as_secs_f64(),
        error
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delay_grows_and_caps() {
        let config = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 300,
        };
        let first = config.delay_for_attempt(1).as_millis();
        assert!((80..=120).contains(&first));
        let capped = config.delay_for_attempt(5).as_millis();
        assert!((240..=360).contains(&capped));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::Network("reset".into()).is_retryable());
        assert!(ClientError::RateLimited { retry_after_ms: None }.is_retryable());
        assert!(ClientError::Http {
            status: 503,
            message: "down".into()
        }
        .is_retryable());
        assert!(!ClientError::Http {
            status: 404,
            message: "missing".into()
        }
        .is_retryable());
        assert!(!ClientError::Auth("expired".into()).is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result = with_retry(&RetryConfig::default(), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ClientError::Network("reset".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_permanent_error() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(&RetryConfig::default(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::Auth("expired".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
