//! In-memory [`KeyValueStore`] for tests and short-lived processes.

use bridge_traits::error::Result as BridgeResult;
use bridge_traits::storage::KeyValueStore;
use core_async::sync::Mutex;
use std::collections::BTreeMap;

/// Process-local string map. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all keys currently stored.
    pub async fn keys(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, key: &str) -> BridgeResult<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> BridgeResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
