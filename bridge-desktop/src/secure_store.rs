//! Credential storage in the OS keychain

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::KeyValueStore,
};
use keyring::Entry;
use tracing::debug;

/// Keyring-backed [`KeyValueStore`].
///
/// Uses platform-specific secure storage:
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service (libsecret)
///
/// Each credential-store key becomes one keyring entry under `service_name`.
pub struct KeyringKeyValueStore {
    service_name: String,
}

impl KeyringKeyValueStore {
    pub fn new() -> Self {
        Self::with_service_name("oidc-auth-core")
    }

    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn get_entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service_name, key).map_err(Self::map_keyring_error)
    }

    fn map_keyring_error(e: keyring::Error) -> BridgeError {
        BridgeError::Storage(format!("Keyring error: {}", e))
    }
}

impl Default for KeyringKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for KeyringKeyValueStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        match self.get_entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => {
                debug!(key, "Keyring entry not found");
                Ok(None)
            }
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.get_entry(key)?
            .set_password(value)
            .map_err(Self::map_keyring_error)?;

        debug!(key, "Stored keyring entry");
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        match self.get_entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                debug!(key, "Removed keyring entry");
                Ok(())
            }
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }
}
