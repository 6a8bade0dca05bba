//! Key-value storage abstraction
//!
//! The auth core persists everything as strings under namespaced keys, the
//! same contract as browser `Storage`. Hosts pick the backing:
//! - Desktop: JSON file or OS keychain (`bridge-desktop`)
//! - Web: `localStorage` / `sessionStorage` (`bridge-wasm`)
//! - Tests and short-lived processes: in-memory

use crate::error::Result;
use crate::platform::PlatformSendSync;

/// Raw string storage injected into the credential store.
///
/// Implementations are not expected to be transactional. Two writers racing on
/// the same key resolve as last-write-wins.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::KeyValueStore;
///
/// async fn remember(store: &dyn KeyValueStore) -> Result<()> {
///     store.set_item("session_data-0-client", "{}").await?;
///     Ok(())
/// }
/// ```
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait KeyValueStore: PlatformSendSync {
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error.
    async fn remove_item(&self, key: &str) -> Result<()>;
}
