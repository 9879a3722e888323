//! Bounded retry loop for HTTP uploads.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{BulkerError, Result};

/// Delay after each failed attempt. One attempt per entry.
pub const RETRY_DELAYS_MS: [u64; 5] = [100, 200, 200, 500, 0];

/// Outcome of a single attempt.
pub enum Attempt<T> {
    Done(T),
    /// Give up immediately.
    Fatal(BulkerError),
    /// Transient failure; try again after the scheduled delay.
    Retry(BulkerError),
}

/// Run `attempt` once per entry of `delays_ms`, sleeping the entry's delay
/// after every retryable failure. Returns the last error when all attempts
/// fail.
pub async fn with_retries<T, F, Fut>(
    delays_ms: &[u64],
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut last_error = None;
    for (n, delay) in delays_ms.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(BulkerError::Cancelled);
        }
        match attempt(n).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(e) => return Err(e),
            Attempt::Retry(e) => {
                warn!("Attempt {}/{} failed: {}", n + 1, delays_ms.len(), e);
                last_error = Some(e);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(BulkerError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(*delay)) => {}
                }
            }
        }
    }
    Err(last_error.unwrap_or_else(|| BulkerError::Internal("no attempts were made".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorPayload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn payload() -> ErrorPayload {
        ErrorPayload::new("test").table("", "events")
    }

    #[tokio::test]
    async fn test_stops_on_success() {
        let calls = AtomicUsize::new(0);
        let result = with_retries(&[0, 0, 0], &CancellationToken::new(), |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    Attempt::Retry(BulkerError::http(503, "", payload()))
                } else {
                    Attempt::Done(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_returns_last_error_after_exhaustion() {
        let result: Result<()> = with_retries(&[0, 0], &CancellationToken::new(), |n| async move {
            Attempt::Retry(BulkerError::http(500 + n as u16, "", payload()))
        })
        .await;
        assert!(matches!(result, Err(BulkerError::Http { status: 501, .. })));
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_retries(&RETRY_DELAYS_MS, &CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Fatal(BulkerError::http(401, "", payload())) }
        })
        .await;
        assert!(matches!(result, Err(BulkerError::Http { status: 401, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_delay() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let result: Result<()> = with_retries(&[60_000], &cancel, |_| {
            trigger.cancel();
            async { Attempt::Retry(BulkerError::http(503, "", payload())) }
        })
        .await;
        assert!(matches!(result, Err(BulkerError::Cancelled)));
    }
}
