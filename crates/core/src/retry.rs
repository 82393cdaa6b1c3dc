//! Shared transient-failure retry policy.
//!
//! Backoff grows linearly: a fixed step is added after every attempt,
//! with no cap and no jitter. That mirrors the behavior downstream
//! operators already tuned around; both knobs are configuration, not
//! constants, so tail latency under sustained unavailability can be
//! adjusted without a code change.

use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use crate::error::{ChainError, ChainResult, WatcherError, WatcherResult};

/// Attempt budget plus linear backoff parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts before the operation fails for good.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Fixed increment added to the delay after every retry.
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            step: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep before retry number `retry` (1-based).
    ///
    /// Monotonically non-decreasing: `initial + step * (retry - 1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.initial_delay + self.step * retry.saturating_sub(1)
    }
}

/// Run `op`, retrying transient chain errors with linear backoff.
///
/// Non-transient errors abort immediately. Exhausting the attempt budget
/// returns the last transient error. A shutdown signal interrupts the
/// backoff sleep and surfaces as [`WatcherError::ShutdownRequested`] so an
/// in-flight tick can abort cleanly.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    shutdown_rx: &mut watch::Receiver<bool>,
    mut op: F,
) -> WatcherResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ChainResult<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        if *shutdown_rx.borrow() {
            return Err(WatcherError::ShutdownRequested);
        }

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_transient() || attempt >= policy.max_attempts {
            return Err(WatcherError::Chain(err));
        }

        let delay = policy.delay_for(attempt);
        warn!(
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "⚠️  Transient failure, backing off"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return Err(WatcherError::ShutdownRequested);
                }
            }
        }
    }
}

/// Convenience for call sites without a shutdown channel (tests, one-shots).
pub async fn retry_transient_detached<T, F, Fut>(
    policy: &RetryPolicy,
    op: F,
) -> WatcherResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ChainResult<T>>,
{
    let (_tx, mut rx) = watch::channel(false);
    retry_transient(policy, &mut rx, op).await
}
