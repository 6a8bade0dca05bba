//! Time-related abstractions.
//!
//! - On native platforms: `tokio::time`
//! - On WASM: `gloo-timers` (browser `setTimeout`) raced with `futures::select`
//!
//! `timeout` returns `Result<T, TimeoutError>` on both targets so callers can
//! match on it without `cfg` noise.

// ============================================================================
// Native Implementation (Tokio)
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
pub use tokio::time::{sleep, timeout};

#[cfg(not(target_arch = "wasm32"))]
pub use tokio::time::error::Elapsed as TimeoutError;

pub use std::time::Duration;

// ============================================================================
// WASM Implementation
// ============================================================================

#[cfg(target_arch = "wasm32")]
/// Sleeps for the specified duration using the browser's `setTimeout`.
pub async fn sleep(duration: Duration) {
    gloo_timers::future::sleep(duration).await
}

#[cfg(target_arch = "wasm32")]
/// Requires a future to complete before the specified duration has elapsed.
///
/// The losing branch is dropped, so a pending inner future is cancelled.
pub async fn timeout<F>(duration: Duration, future: F) -> Result<F::Output, TimeoutError>
where
    F: std::future::Future,
{
    let sleep_fut = sleep(duration);

    futures::pin_mut!(future);
    futures::pin_mut!(sleep_fut);

    match futures::future::select(future, sleep_fut).await {
        futures::future::Either::Left((output, _)) => Ok(output),
        futures::future::Either::Right(_) => Err(TimeoutError),
    }
}

#[cfg(target_arch = "wasm32")]
/// Error returned when a timeout expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutError;

#[cfg(target_arch = "wasm32")]
impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "deadline has elapsed")
    }
}

#[cfg(target_arch = "wasm32")]
impl std::error::Error for TimeoutError {}
