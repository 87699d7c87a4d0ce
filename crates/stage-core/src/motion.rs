//! Cooperative waiting for motion to settle.
//!
//! Every loop that waits on hardware state (move settling, homing, closed-loop
//! status polling) goes through [`poll_until`], which is bounded three ways:
//! the condition itself, an optional timeout, and an optional [`CancelToken`].
//!
//! ```rust,ignore
//! let cancel = CancelToken::new();
//! let opts = WaitOptions::default()
//!     .with_poll_interval(Duration::from_millis(20))
//!     .with_cancel(cancel.clone());
//!
//! stage.move_to(&target, Some(&opts)).await?;
//! ```

use crate::error::{StageError, StageResult};
use crate::limits;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

// =============================================================================
// Cancellation
// =============================================================================

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation flag shared between a waiter and its controller.
///
/// Cancelling is sticky: once set, every clone reports cancelled forever.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent cancel is not lost.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// =============================================================================
// Wait options
// =============================================================================

/// How a wait loop polls and when it gives up.
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Delay between polls. Zero yields to the runtime between polls.
    pub poll_interval: Duration,
    /// Give up with [`StageError::Timeout`] after this long. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Abort with [`StageError::Cancelled`] when this token fires.
    pub cancel: Option<CancelToken>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: limits::POLL_INTERVAL,
            timeout: Some(limits::MOTION_TIMEOUT),
            cancel: None,
        }
    }
}

impl WaitOptions {
    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set (or clear) the overall timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attach a cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn check_cancelled(&self) -> StageResult<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(StageError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Sleep one poll interval, returning early with `Cancelled` if the token fires.
    pub async fn pause(&self) -> StageResult<()> {
        if self.poll_interval.is_zero() {
            tokio::task::yield_now().await;
            return self.check_cancelled();
        }
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(StageError::Cancelled),
                    _ = tokio::time::sleep(self.poll_interval) => Ok(()),
                }
            }
            None => {
                tokio::time::sleep(self.poll_interval).await;
                Ok(())
            }
        }
    }
}

// =============================================================================
// Poll loop
// =============================================================================

/// Repeatedly evaluate `done` until it returns `true`.
///
/// Errors from `done` propagate immediately. Between evaluations the loop
/// pauses for `opts.poll_interval`. Cancellation is checked before every
/// evaluation and during every pause.
pub async fn poll_until<F, Fut>(opts: &WaitOptions, operation: &str, mut done: F) -> StageResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StageResult<bool>>,
{
    let start = Instant::now();
    loop {
        opts.check_cancelled()?;
        if done().await? {
            return Ok(());
        }
        if let Some(timeout) = opts.timeout {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                tracing::warn!(operation, ?elapsed, "wait timed out");
                return Err(StageError::Timeout {
                    operation: operation.to_string(),
                    elapsed,
                });
            }
        }
        opts.pause().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_poll_until_stops_when_condition_holds() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let opts = WaitOptions::default().with_poll_interval(Duration::ZERO);
        poll_until(&opts, "count", || async move {
            Ok::<_, StageError>(calls.fetch_add(1, Ordering::SeqCst) >= 3)
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let opts = WaitOptions::default()
            .with_poll_interval(Duration::from_millis(1))
            .with_timeout(Some(Duration::from_millis(20)));
        let err = poll_until(&opts, "never", || async { Ok::<_, StageError>(false) })
            .await
            .unwrap_err();
        match err {
            StageError::Timeout { operation, elapsed } => {
                assert_eq!(operation, "never");
                assert!(elapsed >= Duration::from_millis(20));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_poll_until_propagates_errors() {
        let opts = WaitOptions::default();
        let err = poll_until(&opts, "broken", || async {
            Err::<bool, _>(StageError::ConnectionFailure("unplugged".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StageError::ConnectionFailure(_)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pause() {
        let token = CancelToken::new();
        let opts = WaitOptions::default()
            .with_poll_interval(Duration::from_secs(3600))
            .with_timeout(None)
            .with_cancel(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let err = poll_until(&opts, "forever", || async { Ok::<_, StageError>(false) })
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Cancelled));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_already_cancelled_token_skips_polling() {
        let token = CancelToken::new();
        token.cancel();
        let clone = token.clone();
        assert!(clone.is_cancelled());
        clone.cancelled().await;

        let opts = WaitOptions::default().with_cancel(token);
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let err = poll_until(&opts, "skip", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, StageError>(true)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StageError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
