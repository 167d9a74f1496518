// Bounded retry with exponential backoff and jitter

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::IsRetryable;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Scale each delay by a uniform factor in [0.5, 1.0]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// `min(base_delay * 2^attempt, max_delay)`, before jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        delay.mul_f64(factor)
    }
}

/// Retries errors that report themselves as retryable
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + fmt::Display,
{
    with_retry_if(config, E::is_retryable, op).await
}

/// Up to `max_retries + 1` attempts; the last error is returned once attempts
/// run out or `retry_on` rejects it.
pub async fn with_retry_if<T, E, F, Fut, P>(config: &RetryConfig, retry_on: P, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("Succeeded after {} retries", attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt >= config.max_retries || !retry_on(&e) {
                    return Err(e);
                }
                let delay = config.jittered(config.delay_for(attempt));
                warn!(
                    "Attempt {}/{} failed: {}; retrying in {:?}",
                    attempt + 1,
                    config.max_retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_always_failing_runs_max_retries_plus_one() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = with_retry(&fast(3), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(Error::network("vcs", format!("attempt {}", n)))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.unwrap_err().to_string(), "vcs request failed: attempt 4");
    }

    #[tokio::test]
    async fn test_retry_on_false_runs_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = with_retry_if(&fast(3), |_| false, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::network("vcs", "down"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = with_retry(&fast(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::CircuitOpen { name: "llm".into() })
        })
        .await;

        assert!(matches!(result, Err(Error::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::network("embeddings", "503"))
            } else {
                Ok("ok")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: false,
        };
        let delays: Vec<u128> = (0..6).map(|k| config.delay_for(k).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(config.delay_for(64), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig { jitter: true, ..RetryConfig::default() };
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let d = config.jittered(base);
            assert!(d >= Duration::from_millis(500) && d <= base, "{:?}", d);
        }
    }
}
