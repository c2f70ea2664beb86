//! Retry policy for remote calls.
//!
//! Transient service conditions (throttling, internal errors, 5xx,
//! connection failures) are retried indefinitely with capped exponential
//! backoff; everything else propagates to the caller on first sight.

use crate::{Error, Result};
use exponential_backoff::Backoff;
use std::future::Future;
use std::time::Duration;

/// Determines which errors to retry and how long to wait before doing so.
pub(crate) trait Retry: Send {
    /// Called after any successful operation so that backoffs return to
    /// their minimum.
    fn reset(&mut self);

    /// `Some(backoff)` to retry after the duration elapses, `None` to
    /// surface the error to the caller.
    fn next_backoff(&mut self, error: &Error) -> Option<Duration>;
}

/// The standard policy: retry only transient errors, starting at one second
/// and backing off exponentially to a minute.
#[derive(Debug)]
pub(crate) struct TransientBackoff {
    error_count: u32,
    backoff: Backoff,
}

impl Default for TransientBackoff {
    fn default() -> Self {
        Self {
            error_count: 0,
            backoff: Backoff::new(
                u32::MAX,
                Duration::from_secs(1),
                Some(Duration::from_secs(60)),
            ),
        }
    }
}

impl Retry for TransientBackoff {
    fn reset(&mut self) {
        self.error_count = 0;
    }

    fn next_backoff(&mut self, error: &Error) -> Option<Duration> {
        if !error.is_transient() {
            return None;
        }
        self.error_count += 1;
        self.backoff.next(self.error_count)
    }
}

/// Run `op` until it succeeds or fails non-transiently.
pub(crate) async fn with_retries<T, F, Fut>(retry: &mut impl Retry, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    loop {
        match op().await {
            Ok(value) => {
                retry.reset();
                return Ok(value);
            }
            Err(error) => match retry.next_backoff(&error) {
                Some(backoff) => {
                    tracing::warn!(%error, ?backoff, "transient error, will retry");
                    tokio::time::sleep(backoff).await;
                }
                None => return Err(error),
            },
        }
    }
}
