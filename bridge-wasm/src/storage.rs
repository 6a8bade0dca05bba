//! `localStorage` / `sessionStorage` implementation of [`KeyValueStore`].
//!
//! Browser storage is synchronous and string-only, which is exactly the
//! contract the credential store expects. An optional namespace prefix keeps
//! several hosts on one origin from clobbering each other's keys.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result as BridgeResult},
    storage::KeyValueStore,
};

use crate::error::{js_error, window};

/// Which browser storage area backs a [`WebStorage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Survives browser restarts.
    Local,
    /// Cleared when the tab closes.
    Session,
}

/// Key-value store over a browser `Storage` area.
#[derive(Clone)]
pub struct WebStorage {
    storage: web_sys::Storage,
    kind: StorageKind,
    namespace: Option<String>,
}

impl WebStorage {
    /// Open the given storage area.
    pub fn new(kind: StorageKind) -> BridgeResult<Self> {
        let window = window()?;
        let storage = match kind {
            StorageKind::Local => window
                .local_storage()
                .map_err(|err| js_error("localStorage", err))?,
            StorageKind::Session => window
                .session_storage()
                .map_err(|err| js_error("sessionStorage", err))?,
        }
        .ok_or_else(|| BridgeError::NotAvailable(format!("{kind:?} storage")))?;

        Ok(Self {
            storage,
            kind,
            namespace: None,
        })
    }

    /// `localStorage`-backed store.
    pub fn local() -> BridgeResult<Self> {
        Self::new(StorageKind::Local)
    }

    /// `sessionStorage`-backed store.
    pub fn session() -> BridgeResult<Self> {
        Self::new(StorageKind::Session)
    }

    /// Prefix every key with `{namespace}::`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// The storage area in use.
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    fn key_for(&self, key: &str) -> String {
        match &self.namespace {
            Some(namespace) => format!("{namespace}::{key}"),
            None => key.to_string(),
        }
    }
}

#[async_trait(?Send)]
impl KeyValueStore for WebStorage {
    async fn get_item(&self, key: &str) -> BridgeResult<Option<String>> {
        self.storage
            .get_item(&self.key_for(key))
            .map_err(|err| js_error("storage.getItem", err))
    }

    async fn set_item(&self, key: &str, value: &str) -> BridgeResult<()> {
        // Quota errors surface here.
        self.storage
            .set_item(&self.key_for(key), value)
            .map_err(|err| BridgeError::Storage(format!("{:?}", err)))
    }

    async fn remove_item(&self, key: &str) -> BridgeResult<()> {
        self.storage
            .remove_item(&self.key_for(key))
            .map_err(|err| js_error("storage.removeItem", err))
    }
}
