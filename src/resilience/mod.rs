// Retry and circuit breaking for every call that leaves the process

pub mod breaker;
pub mod retry;

use std::future::Future;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use retry::{with_retry, with_retry_if, RetryConfig};

pub use crate::error::IsRetryable;
use crate::error::Result;

/// Retry wrapped around the breaker. Each attempt goes through the breaker,
/// and an open circuit ends the retry loop at once.
pub async fn guarded<T, F, Fut>(breaker: &CircuitBreaker, retry: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry(retry, || breaker.call(op())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_guarded_stops_retrying_once_open() {
        let breaker = CircuitBreaker::new(
            "vcs",
            BreakerConfig {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(60),
                monitor_window: Duration::from_secs(60),
            },
        );
        let calls = AtomicU32::new(0);
        let result: Result<()> = guarded(&breaker, &retry(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::network("vcs", "refused"))
        })
        .await;

        // two real failures open the breaker, the third attempt fails fast
        assert!(matches!(result, Err(Error::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_guarded_passes_success_through() {
        let breaker = CircuitBreaker::new("embeddings", BreakerConfig::default());
        let calls = AtomicU32::new(0);
        let value = guarded(&breaker, &retry(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::network("embeddings", "reset"))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(breaker.failures(), 1);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
