//! Synchronization primitives.
//!
//! - On native platforms: re-exports of `tokio::sync`
//! - On WASM: thin wrappers over `futures::lock` and `futures::channel`
//!
//! Both flavours expose the same call shapes for what the auth core needs:
//! an async `Mutex` and a `oneshot` channel whose receiver is awaited
//! directly and yields `Result<T, _>`.
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::{oneshot, Mutex};
//!
//! async fn example() {
//!     let mutex = Mutex::new(0);
//!     *mutex.lock().await += 1;
//!
//!     let (tx, rx) = oneshot::channel();
//!     tx.send(7).ok();
//!     assert_eq!(rx.await.ok(), Some(7));
//! }
//! ```

// ============================================================================
// Native Implementation (Tokio)
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
pub use tokio::sync::{oneshot, Mutex, MutexGuard};

// ============================================================================
// WASM Implementation
// ============================================================================

#[cfg(target_arch = "wasm32")]
pub use futures::channel::oneshot;

#[cfg(target_arch = "wasm32")]
/// An async mutex for protecting shared data.
///
/// WASM is single-threaded, so this never contends across threads, but it
/// still serializes interleaved tasks across `.await` points.
pub struct Mutex<T> {
    inner: futures::lock::Mutex<T>,
}

#[cfg(target_arch = "wasm32")]
impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: futures::lock::Mutex::new(value),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, T> {
        MutexGuard {
            inner: self.inner.lock().await,
        }
    }

    /// Returns `None` if the mutex is currently locked.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock().map(|inner| MutexGuard { inner })
    }
}

#[cfg(target_arch = "wasm32")]
impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(target_arch = "wasm32")]
impl<T> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex").finish_non_exhaustive()
    }
}

#[cfg(target_arch = "wasm32")]
/// A guard that releases the mutex when dropped.
pub struct MutexGuard<'a, T> {
    inner: futures::lock::MutexGuard<'a, T>,
}

#[cfg(target_arch = "wasm32")]
impl<'a, T> std::ops::Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(target_arch = "wasm32")]
impl<'a, T> std::ops::DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
