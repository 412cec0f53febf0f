use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use qce_bridge::BridgeError;

use crate::error::{FetchError, Result};

/// Base delay between attempts; actual backoff is `interval × attempt`.
const RETRY_INTERVAL_MS: u64 = 1_000;

/// Run `op` with up to `retry_count` retries, each attempt raced against
/// `timeout_ms`.
///
/// Only retryable classifications (`TransientNetwork`, `RateLimited`) and
/// timeouts are retried; everything else surfaces immediately. Cancellation
/// is observed before each attempt and while sleeping between attempts.
pub async fn call_with_retry<T, F, Fut>(
    op_name: &str,
    retry_count: u32,
    timeout_ms: u64,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, BridgeError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Canceled);
        }
        attempt += 1;

        match tokio::time::timeout(Duration::from_millis(timeout_ms), op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if e.is_retryable() && attempt <= retry_count => {
                let backoff = RETRY_INTERVAL_MS * attempt as u64;
                warn!(op = op_name, attempt, backoff_ms = backoff, error = %e, "retrying bridge call");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(backoff)) => {}
                    _ = cancel.cancelled() => return Err(FetchError::Canceled),
                }
            }
            Ok(Err(e)) => return Err(FetchError::Bridge(e)),
            Err(_) if attempt <= retry_count => {
                warn!(op = op_name, attempt, timeout_ms, "bridge call timed out, retrying");
            }
            Err(_) => return Err(FetchError::Timeout { ms: timeout_ms }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let out = call_with_retry("test", 3, 1_000, &cancel, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BridgeError::TransientNetwork("flaky".into()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let out: Result<u32> = call_with_retry("test", 3, 1_000, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BridgeError::PermissionDenied("nope".into())) }
        })
        .await;
        assert!(matches!(out, Err(FetchError::Bridge(BridgeError::PermissionDenied(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_wins_over_retry() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out: Result<u32> = call_with_retry("test", 3, 1_000, &cancel, || async {
            Ok(1u32)
        })
        .await;
        assert!(matches!(out, Err(FetchError::Canceled)));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhausted_surfaces_last_error() {
        let cancel = CancellationToken::new();
        let out: Result<u32> = call_with_retry("test", 2, 1_000, &cancel, || async {
            Err(BridgeError::TransientNetwork("down".into()))
        })
        .await;
        assert!(matches!(out, Err(FetchError::Bridge(BridgeError::TransientNetwork(_)))));
    }
}
