//! Bounded retry, per-attempt timeout and cancellation for outbound service calls.
//!
//! Every call to the embedding or generation service goes through
//! [`call_with_retry`]. A timed-out or cancelled call surfaces as the
//! service's own typed error, so callers never have to tell a hung service
//! apart from a failing one.

use folio_core::{AppError, AppResult};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Upper bound on the backoff exponent.
const MAX_BACKOFF_SHIFT: u32 = 10;

/// Retry and timeout settings for one kind of service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`
    pub max_retries: u32,

    /// Sleep before the first retry; doubles for each further retry
    pub initial_backoff: Duration,

    /// Deadline for a single attempt
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration, timeout: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            timeout,
        }
    }

    /// Total number of attempts this policy allows.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.initial_backoff.saturating_mul(1 << shift)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(100), Duration::from_secs(30))
    }
}

/// Which external service a call targets; decides the error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Embedding,
    Generation,
}

impl ServiceKind {
    /// Wrap a message in this service's error variant.
    pub fn error(self, message: impl Into<String>) -> AppError {
        match self {
            Self::Embedding => AppError::EmbeddingService(message.into()),
            Self::Generation => AppError::GenerationService(message.into()),
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embedding => write!(f, "embedding"),
            Self::Generation => write!(f, "generation"),
        }
    }
}

/// Receiving side of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

/// Sending side of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelToken {
    /// Create a linked handle/token pair.
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx: Some(rx) })
    }

    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once the handle cancels. Stays pending forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(rx) = self.rx.as_ref() else {
            return std::future::pending().await;
        };

        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Run `op` under `policy`, retrying only retryable service errors.
///
/// Each attempt races the per-attempt timeout and `cancel`. Non-retryable
/// errors (dimension mismatch, bad configuration) return immediately.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    kind: ServiceKind,
    cancel: &CancelToken,
    mut op: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;

        if cancel.is_cancelled() {
            return Err(kind.error(format!("{} call cancelled", kind)));
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(kind.error(format!("{} call cancelled", kind)));
            }
            result = tokio::time::timeout(policy.timeout, op()) => match result {
                Ok(inner) => inner,
                Err(_) => Err(kind.error(format!(
                    "{} call timed out after {:?}",
                    kind, policy.timeout
                ))),
            },
        };

        let err = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "{} call succeeded after retry", kind);
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        if attempt >= attempts {
            warn!(attempts, error = %err, "{} call failed, giving up", kind);
            return Err(err);
        }

        let backoff = policy.backoff(attempt);
        warn!(
            "{} call failed (attempt {}/{}), retrying in {:?}: {}",
            kind, attempt, attempts, backoff, err
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(kind.error(format!("{} call cancelled", kind)));
            }
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(20))
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.attempts(), 4);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = call_with_retry(
            &fast_policy(2),
            ServiceKind::Embedding,
            &CancelToken::never(),
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(AppError::EmbeddingService("503".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_exhausts_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: AppResult<()> = call_with_retry(
            &fast_policy(2),
            ServiceKind::Embedding,
            &CancelToken::never(),
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            },
        )
        .await;

        assert!(matches!(result, Err(AppError::EmbeddingService(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: AppResult<()> = call_with_retry(
            &fast_policy(5),
            ServiceKind::Embedding,
            &CancelToken::never(),
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::DimensionMismatch {
                        expected: 4,
                        actual: 8,
                    })
                }
            },
        )
        .await;

        assert!(matches!(result, Err(AppError::DimensionMismatch { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (handle, token) = CancelToken::new();
        handle.cancel();

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: AppResult<()> =
            call_with_retry(&fast_policy(2), ServiceKind::Generation, &token, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::GenerationService(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_call() {
        let (handle, token) = CancelToken::new();
        let policy = RetryPolicy::new(0, Duration::from_millis(1), Duration::from_secs(60));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });

        let started = Instant::now();
        let result: AppResult<()> =
            call_with_retry(&policy, ServiceKind::Generation, &token, || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(AppError::GenerationService(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_dropped_handle_never_cancels() {
        let (handle, token) = CancelToken::new();
        drop(handle);

        assert!(!token.is_cancelled());
        let result = call_with_retry(&fast_policy(0), ServiceKind::Embedding, &token, || async {
            Ok("done")
        })
        .await;
        assert_eq!(result.unwrap(), "done");
    }
}
