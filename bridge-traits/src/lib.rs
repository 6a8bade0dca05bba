//! # Host Bridge Traits
//!
//! Capability traits the auth core requires from its host platform.
//!
//! ## Overview
//!
//! The core builds URLs, runs the token protocol and keeps session state. It
//! does not open sockets, touch disks or create DOM nodes. Each of those is a
//! trait here, implemented per platform by `bridge-desktop` and `bridge-wasm`
//! or by the embedding application.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - token, revocation, discovery and JWKS requests
//! - [`KeyValueStore`](storage::KeyValueStore) - string storage behind the credential store
//! - [`FrameHost`](frame::FrameHost) - hidden frame for prompt-less sign-in
//! - [`Clock`](time::Clock) - time source for session freshness
//! - [`LoggerSink`](time::LoggerSink) - forward structured logs to the host
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate |
//! |----------|---------------------|
//! | Desktop  | `bridge-desktop`    |
//! | Web      | `bridge-wasm`       |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). The core maps it
//! into its own error taxonomy at the boundary.
//!
//! ## Thread Safety
//!
//! On native targets every trait requires `Send + Sync` so clients can be
//! shared across tokio tasks. On `wasm32` the bound is relaxed through
//! [`PlatformSendSync`](platform::PlatformSendSync).
//!
//! ## Examples
//!
//! ### Implementing KeyValueStore
//!
//! ```ignore
//! use bridge_traits::storage::KeyValueStore;
//! use bridge_traits::error::Result;
//!
//! pub struct MyStore;
//!
//! #[async_trait::async_trait]
//! impl KeyValueStore for MyStore {
//!     async fn get_item(&self, key: &str) -> Result<Option<String>> {
//!         todo!()
//!     }
//!     async fn set_item(&self, key: &str, value: &str) -> Result<()> {
//!         todo!()
//!     }
//!     async fn remove_item(&self, key: &str) -> Result<()> {
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod frame;
pub mod http;
pub mod platform;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use frame::{FrameHost, FrameSession};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use storage::KeyValueStore;
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
