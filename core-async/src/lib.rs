//! Runtime-agnostic async abstraction layer for the auth core.
//!
//! The same API compiles on two runtimes:
//! - Native platforms (desktop, servers): Tokio
//! - WebAssembly: the browser event loop, via `futures` and `gloo-timers`
//!
//! Every `core-*` and `bridge-*` crate depends on this crate instead of
//! depending on tokio directly.
//!
//! # Modules
//!
//! - `time`: sleeping and deadlines
//! - `sync`: async mutex and channels
//!
//! # Examples
//!
//! ```rust
//! use core_async::time::{timeout, Duration};
//!
//! async fn example() {
//!     let result = timeout(Duration::from_millis(50), async { 42 }).await;
//!     assert_eq!(result.ok(), Some(42));
//! }
//! ```

pub mod sync;
pub mod time;

pub use time::{sleep, timeout, Duration};
