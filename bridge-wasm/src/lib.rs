//! WebAssembly Bridge Implementations
//!
//! Browser implementations of the bridge traits defined in `bridge-traits`,
//! built on `web-sys` and `wasm-bindgen`.
//!
//! # Platform Support
//!
//! This crate is designed exclusively for the `wasm32-unknown-unknown` target.
//! It will not compile for native targets.
//!
//! # Implementations
//!
//! - [`WasmHttpClient`]: `fetch` with `AbortController` timeouts
//! - [`WebStorage`]: `localStorage` / `sessionStorage` key-value store
//! - [`IframeFrameHost`]: hidden iframe plus `message` listener for
//!   prompt-less authorization
//!
//! # Examples
//!
//! ```ignore
//! use bridge_wasm::{IframeFrameHost, WasmHttpClient, WebStorage};
//! use std::sync::Arc;
//!
//! let http = Arc::new(WasmHttpClient::new()?);
//! let store = Arc::new(WebStorage::session()?);
//! let frames = Arc::new(IframeFrameHost::new()?);
//! ```

#![cfg(target_arch = "wasm32")]
#![warn(missing_docs)]

mod error;
pub mod frame;
pub mod http;
pub mod storage;

pub use frame::IframeFrameHost;
pub use http::WasmHttpClient;
pub use storage::{StorageKind, WebStorage};
