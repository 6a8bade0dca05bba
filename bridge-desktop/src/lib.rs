//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux):
//! - `HttpClient` using `reqwest`
//! - `KeyValueStore` as an atomically rewritten JSON file
//! - `KeyValueStore` in the OS keychain via `keyring`
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{FileKeyValueStore, ReqwestHttpClient};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let http = Arc::new(ReqwestHttpClient::new()?);
//!     let store = Arc::new(FileKeyValueStore::open_default("my-app").await?);
//!     // Hand both to core_auth::AuthClient::builder(...)
//!     Ok(())
//! }
//! ```

mod file_store;
mod http;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use file_store::FileKeyValueStore;
pub use http::ReqwestHttpClient;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringKeyValueStore;
