//! Bounded retry with linear backoff, shared by the chat and embedding
//! clients. Grounded on `ProviderRouter::send`'s retry loop, minus the
//! multi-provider failover (memcore only ever talks to one chat endpoint
//! and one embedding endpoint — spec §6).

use std::future::Future;

use tracing::warn;

use crate::error::ProviderError;

/// Retry `attempt` up to `max_retries` times, sleeping `delay_ms * (attempt + 1)`
/// between tries. A `RateLimited` error is not retried — its `retry_after_ms`
/// is the caller's signal to back off at a higher level, so it is returned
/// immediately (spec §7: transport errors retry with backoff, then bubble up
/// on exhaustion).
pub async fn with_backoff<T, F, Fut>(
    operation: &str,
    max_retries: u32,
    delay_ms: u64,
    mut f: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e @ ProviderError::RateLimited { .. }) => return Err(e),
            Err(e) => {
                warn!(operation, attempt, err = %e, "provider call failed");
                last_err = Some(e);
                if attempt < max_retries {
                    tokio::time::sleep(tokio::time::Duration::from_millis(
                        delay_ms * (attempt as u64 + 1),
                    ))
                    .await;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ProviderError::Unavailable(operation.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_backoff("test", 3, 1, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::Unavailable("not yet".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let result: Result<(), _> =
            with_backoff("test", 2, 1, || async { Err(ProviderError::Unavailable("nope".into())) }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rate_limited_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff("test", 3, 1, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::RateLimited { retry_after_ms: 500 }) }
        })
        .await;
        assert!(matches!(result, Err(ProviderError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
