//! Process-wide table of client instances.
//!
//! Hosts that run several IdP clients side by side register each under its
//! own instance id. Storage keys carry the same id, so clearing one instance
//! never touches another's session.

use core_async::sync::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::client::AuthClient;
use crate::error::Result;

#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<u64, Arc<AuthClient>>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out an instance id not yet returned by this registry.
    pub fn allocate_instance_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register `client` under its instance id, replacing any previous one.
    pub async fn register(&self, client: AuthClient) -> Arc<AuthClient> {
        let client = Arc::new(client);
        let instance_id = client.instance_id();

        // Keep allocated ids ahead of explicitly chosen ones.
        self.next_id.fetch_max(instance_id.saturating_add(1), Ordering::Relaxed);

        if self
            .clients
            .lock()
            .await
            .insert(instance_id, client.clone())
            .is_some()
        {
            debug!(instance_id, "Replaced registered client");
        }
        client
    }

    pub async fn get(&self, instance_id: u64) -> Option<Arc<AuthClient>> {
        self.clients.lock().await.get(&instance_id).cloned()
    }

    pub async fn remove(&self, instance_id: u64) -> Option<Arc<AuthClient>> {
        self.clients.lock().await.remove(&instance_id)
    }

    pub async fn instance_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.clients.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Clear one instance's local session. `Ok(false)` if no such instance.
    pub async fn clear_session(&self, instance_id: u64, user_id: Option<&str>) -> Result<bool> {
        let Some(client) = self.get(instance_id).await else {
            return Ok(false);
        };
        client.clear_session(user_id).await?;
        Ok(true)
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthClientConfig;
    use crate::store::{MemoryStore, Partition};
    use crate::types::SessionData;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
    use mockall::mock;

    mock! {
        Http {}

        #[async_trait::async_trait]
        impl HttpClient for Http {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    fn client(instance_id: u64, store: Arc<MemoryStore>) -> AuthClient {
        let config =
            AuthClientConfig::new("c1", "https://app/cb").with_base_url("https://idp.example");
        AuthClient::builder(config, Arc::new(MockHttp::new()), store)
            .instance_id(instance_id)
            .build()
            .unwrap()
    }

    fn session() -> SessionData {
        serde_json::from_value(serde_json::json!({
            "access_token": "at",
            "scope": "openid",
            "expires_in": 3600,
            "created_at": 0
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_allocate_skips_registered_ids() {
        let registry = ClientRegistry::new();
        let store = Arc::new(MemoryStore::new());

        registry.register(client(4, store)).await;
        assert_eq!(registry.allocate_instance_id(), 5);
        assert_eq!(registry.instance_ids().await, vec![4]);
    }

    #[tokio::test]
    async fn test_clear_session_is_scoped_to_instance() {
        let registry = ClientRegistry::new();
        let store = Arc::new(MemoryStore::new());

        let first = registry.register(client(0, store.clone())).await;
        let second = registry.register(client(1, store.clone())).await;
        first.store().set_session_data(None, &session()).await.unwrap();
        second.store().set_session_data(None, &session()).await.unwrap();

        assert!(registry.clear_session(0, None).await.unwrap());
        assert!(first.get_session_data(None).await.unwrap().is_none());
        assert!(second.get_session_data(None).await.unwrap().is_some());
        assert!(store
            .keys()
            .await
            .contains(&second.store().key(Partition::SessionData, None)));

        assert!(!registry.clear_session(9, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_register_max_instance_id() {
        let registry = ClientRegistry::new();
        registry
            .register(client(u64::MAX, Arc::new(MemoryStore::new())))
            .await;

        assert!(registry.get(u64::MAX).await.is_some());
        assert_eq!(registry.allocate_instance_id(), u64::MAX);
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = ClientRegistry::new();
        registry.register(client(2, Arc::new(MemoryStore::new()))).await;

        assert!(registry.remove(2).await.is_some());
        assert!(registry.get(2).await.is_none());
    }
}
