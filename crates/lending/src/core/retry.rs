//! Bounded retry for operations that lost an optimistic-concurrency race.
//!
//! Each attempt re-runs the whole operation from a fresh read, so the closure
//! must not carry state between attempts. Only `ConcurrentStateConflict` is
//! retried; every other error surfaces immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::ConcurrencyConfig;
use crate::errors::LendingError;

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// `max_conflict_retries` extra attempts are used up.
///
/// Delay doubles per attempt from `retry_base_delay_ms`, capped at 2^5.
pub async fn with_conflict_retry<T, F, Fut>(
    config: &ConcurrencyConfig,
    operation: &str,
    mut op: F,
) -> Result<T, LendingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LendingError>>,
{
    let mut retries = 0u32;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && retries < config.max_conflict_retries => {
                retries += 1;
                let delay_ms = backoff_delay_ms(config.retry_base_delay_ms, retries);
                warn!(
                    operation,
                    attempt = retries,
                    max_retries = config.max_conflict_retries,
                    next_retry_ms = delay_ms,
                    error = %e,
                    "state conflict, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            result => return result,
        }
    }
}

/// Delay before the `retry`-th retry (1-based), saturating at `u64::MAX`.
pub fn backoff_delay_ms(base_delay_ms: u64, retry: u32) -> u64 {
    base_delay_ms.saturating_mul(1u64 << retry.saturating_sub(1).min(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(max_conflict_retries: u32) -> ConcurrencyConfig {
        ConcurrencyConfig {
            max_conflict_retries,
            retry_base_delay_ms: 1,
        }
    }

    fn conflict() -> LendingError {
        LendingError::ConcurrentStateConflict {
            entity: "pool GROVE-A".into(),
        }
    }

    #[tokio::test]
    async fn test_conflict_then_success() {
        let calls = &AtomicU32::new(0);
        let result = with_conflict_retry(&config(3), "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(conflict())
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_conflict_retry(&config(2), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(conflict())
        })
        .await;
        assert!(matches!(result, Err(LendingError::ConcurrentStateConflict { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        assert_eq!(backoff_delay_ms(25, 1), 25);
        assert_eq!(backoff_delay_ms(25, 3), 100);
        assert_eq!(backoff_delay_ms(25, 6), 800);
        assert_eq!(backoff_delay_ms(25, 40), 800);
        assert_eq!(backoff_delay_ms(u64::MAX, 4), u64::MAX);
    }

    #[tokio::test]
    async fn test_validation_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_conflict_retry(&config(5), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LendingError::invalid_amount("zero"))
        })
        .await;
        assert!(matches!(result, Err(LendingError::InvalidAmount { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
