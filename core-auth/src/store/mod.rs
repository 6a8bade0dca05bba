//! Partitioned credential storage
//!
//! Everything the client persists is one JSON object per partition, stored
//! as a string in the injected [`KeyValueStore`] under a scoped key:
//!
//! ```text
//! {partition}-{instance_id}-{client_id}[-{user_id}]
//! ```
//!
//! Two clients (or two users of one client) therefore never read each
//! other's sessions, even when they share one browser storage area or one
//! credentials file.
//!
//! ## Consistency
//!
//! Attribute updates are read-modify-write on the whole partition object and
//! are not atomic. Concurrent writers to the same partition resolve as
//! last-write-wins; callers that fan out writes must serialize them.
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::store::{CredentialStore, MemoryStore, Partition};
//! use std::sync::Arc;
//!
//! # async fn example() -> core_auth::Result<()> {
//! let store = CredentialStore::new(Arc::new(MemoryStore::new()), 0, "my-client");
//! assert_eq!(store.key(Partition::SessionData, Some("alice")), "session_data-0-my-client-alice");
//!
//! store
//!     .set_attribute(Partition::TemporaryData, "flag", serde_json::json!(true), None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod memory;

pub use memory::MemoryStore;

use bridge_traits::error::BridgeError;
use bridge_traits::storage::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::config::AuthClientConfig;
use crate::error::{AuthError, Result};
use crate::types::{OidcProviderMetadata, SessionData};

const SESSION_STATUS_PREFIX: &str = "session_status";
const SESSION_ACTIVE_ATTRIBUTE: &str = "active";

/// Storage partition. Each maps to one JSON object per scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Config,
    OidcProviderMetadata,
    SessionData,
    /// Short-lived values: PKCE verifiers, discovery flag, grant replay.
    TemporaryData,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Config => "config_data",
            Partition::OidcProviderMetadata => "oidc_provider_meta_data",
            Partition::SessionData => "session_data",
            Partition::TemporaryData => "temporary_data",
        }
    }
}

fn storage_error(e: BridgeError) -> AuthError {
    AuthError::Storage(e.to_string())
}

fn to_object<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(AuthError::Storage(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn from_object<T: DeserializeOwned>(map: Map<String, Value>) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(map))?)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Scoped, partitioned view over a [`KeyValueStore`].
///
/// Cheap to clone; clones share the same backing stores.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
    durable: Option<Arc<dyn KeyValueStore>>,
    instance_id: u64,
    client_id: String,
}

impl CredentialStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        instance_id: u64,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            durable: None,
            instance_id,
            client_id: client_id.into(),
        }
    }

    /// Store that outlives the session store, used for the session-active
    /// flag shared across tabs or processes.
    pub fn with_durable_store(mut self, durable: Arc<dyn KeyValueStore>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Storage key for `partition` in this scope.
    pub fn key(&self, partition: Partition, user_id: Option<&str>) -> String {
        self.scoped_key(partition.as_str(), user_id)
    }

    fn scoped_key(&self, prefix: &str, user_id: Option<&str>) -> String {
        match user_id {
            Some(user_id) => format!(
                "{prefix}-{}-{}-{user_id}",
                self.instance_id, self.client_id
            ),
            None => format!("{prefix}-{}-{}", self.instance_id, self.client_id),
        }
    }

    /// Whole partition object, `None` if never written.
    pub async fn get(
        &self,
        partition: Partition,
        user_id: Option<&str>,
    ) -> Result<Option<Map<String, Value>>> {
        let key = self.key(partition, user_id);
        let Some(raw) = self.store.get_item(&key).await.map_err(storage_error)? else {
            return Ok(None);
        };

        match serde_json::from_str::<Value>(&raw)? {
            Value::Object(map) => Ok(Some(map)),
            other => Err(AuthError::Storage(format!(
                "{key} holds a JSON {} instead of an object",
                json_kind(&other)
            ))),
        }
    }

    /// Overwrite the whole partition object.
    pub async fn set(
        &self,
        partition: Partition,
        user_id: Option<&str>,
        data: &Map<String, Value>,
    ) -> Result<()> {
        let key = self.key(partition, user_id);
        let raw = serde_json::to_string(data)?;
        self.store
            .set_item(&key, &raw)
            .await
            .map_err(storage_error)?;
        debug!(key = %key, "Stored partition");
        Ok(())
    }

    pub async fn remove(&self, partition: Partition, user_id: Option<&str>) -> Result<()> {
        let key = self.key(partition, user_id);
        self.store.remove_item(&key).await.map_err(storage_error)?;
        debug!(key = %key, "Removed partition");
        Ok(())
    }

    pub async fn get_attribute(
        &self,
        partition: Partition,
        attribute: &str,
        user_id: Option<&str>,
    ) -> Result<Option<Value>> {
        Ok(self
            .get(partition, user_id)
            .await?
            .and_then(|mut map| map.remove(attribute)))
    }

    /// Read-modify-write of one attribute. Not atomic.
    pub async fn set_attribute(
        &self,
        partition: Partition,
        attribute: &str,
        value: Value,
        user_id: Option<&str>,
    ) -> Result<()> {
        let mut map = self.get(partition, user_id).await?.unwrap_or_default();
        map.insert(attribute.to_string(), value);
        self.set(partition, user_id, &map).await
    }

    pub async fn remove_attribute(
        &self,
        partition: Partition,
        attribute: &str,
        user_id: Option<&str>,
    ) -> Result<()> {
        let Some(mut map) = self.get(partition, user_id).await? else {
            return Ok(());
        };
        if map.remove(attribute).is_some() {
            self.set(partition, user_id, &map).await?;
        }
        Ok(())
    }

    pub async fn get_config_data(&self) -> Result<Option<AuthClientConfig>> {
        self.get(Partition::Config, None)
            .await?
            .map(from_object)
            .transpose()
    }

    /// Merge `config` into the stored config.
    ///
    /// Top-level fields present in `config` replace the stored ones. Unset
    /// optional fields leave the stored value in place.
    pub async fn set_config_data(&self, config: &AuthClientConfig) -> Result<()> {
        let mut merged = self.get(Partition::Config, None).await?.unwrap_or_default();
        merged.extend(to_object(config)?);
        self.set(Partition::Config, None, &merged).await
    }

    pub async fn remove_config_data(&self) -> Result<()> {
        self.remove(Partition::Config, None).await
    }

    pub async fn get_oidc_provider_metadata(&self) -> Result<Option<OidcProviderMetadata>> {
        self.get(Partition::OidcProviderMetadata, None)
            .await?
            .map(from_object)
            .transpose()
    }

    pub async fn set_oidc_provider_metadata(&self, metadata: &OidcProviderMetadata) -> Result<()> {
        self.set(Partition::OidcProviderMetadata, None, &to_object(metadata)?)
            .await
    }

    pub async fn remove_oidc_provider_metadata(&self) -> Result<()> {
        self.remove(Partition::OidcProviderMetadata, None).await
    }

    pub async fn get_session_data(&self, user_id: Option<&str>) -> Result<Option<SessionData>> {
        self.get(Partition::SessionData, user_id)
            .await?
            .map(from_object)
            .transpose()
    }

    pub async fn set_session_data(
        &self,
        user_id: Option<&str>,
        session: &SessionData,
    ) -> Result<()> {
        self.set(Partition::SessionData, user_id, &to_object(session)?)
            .await
    }

    pub async fn remove_session_data(&self, user_id: Option<&str>) -> Result<()> {
        self.remove(Partition::SessionData, user_id).await
    }

    /// Drop the session and any in-flight temporary values for one user.
    pub async fn clear_session(&self, user_id: Option<&str>) -> Result<()> {
        self.remove_session_data(user_id).await?;
        self.remove(Partition::TemporaryData, user_id).await
    }

    /// Session-active flag from the durable store.
    ///
    /// `None` when no durable store is attached or the flag was never set.
    pub async fn session_status(&self, user_id: Option<&str>) -> Result<Option<bool>> {
        let Some(durable) = &self.durable else {
            return Ok(None);
        };

        let key = self.scoped_key(SESSION_STATUS_PREFIX, user_id);
        let Some(raw) = durable.get_item(&key).await.map_err(storage_error)? else {
            return Ok(None);
        };

        let value: Value = serde_json::from_str(&raw)?;
        Ok(value.get(SESSION_ACTIVE_ATTRIBUTE).and_then(Value::as_bool))
    }

    /// No-op without a durable store.
    pub async fn set_session_status(&self, active: bool, user_id: Option<&str>) -> Result<()> {
        let Some(durable) = &self.durable else {
            return Ok(());
        };

        let key = self.scoped_key(SESSION_STATUS_PREFIX, user_id);
        let mut flag = Map::new();
        flag.insert(SESSION_ACTIVE_ATTRIBUTE.to_string(), Value::Bool(active));
        let raw = Value::Object(flag).to_string();
        durable
            .set_item(&key, &raw)
            .await
            .map_err(storage_error)
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("instance_id", &self.instance_id)
            .field("client_id", &self.client_id)
            .field("durable", &self.durable.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(token: &str) -> SessionData {
        SessionData {
            access_token: token.to_string(),
            refresh_token: None,
            id_token: None,
            scope: "openid".to_string(),
            expires_in: 3600,
            created_at: 0,
            session_state: None,
            token_type: "Bearer".to_string(),
        }
    }

    #[test]
    fn test_key_format() {
        let store = CredentialStore::new(Arc::new(MemoryStore::new()), 3, "c1");
        assert_eq!(store.key(Partition::Config, None), "config_data-3-c1");
        assert_eq!(
            store.key(Partition::SessionData, Some("u1")),
            "session_data-3-c1-u1"
        );
        assert_eq!(
            store.key(Partition::OidcProviderMetadata, None),
            "oidc_provider_meta_data-3-c1"
        );
    }

    #[tokio::test]
    async fn test_scoping_isolation() {
        let backing = Arc::new(MemoryStore::new());
        let instance0 = CredentialStore::new(backing.clone(), 0, "c1");
        let instance1 = CredentialStore::new(backing.clone(), 1, "c1");

        instance0
            .set_session_data(Some("alice"), &session("alice-0"))
            .await
            .unwrap();
        instance0
            .set_session_data(Some("bob"), &session("bob-0"))
            .await
            .unwrap();
        instance1
            .set_session_data(Some("alice"), &session("alice-1"))
            .await
            .unwrap();

        let get = |store: &CredentialStore, user: &'static str| {
            let store = store.clone();
            async move {
                store
                    .get_session_data(Some(user))
                    .await
                    .unwrap()
                    .map(|s| s.access_token)
            }
        };

        assert_eq!(get(&instance0, "alice").await.as_deref(), Some("alice-0"));
        assert_eq!(get(&instance0, "bob").await.as_deref(), Some("bob-0"));
        assert_eq!(get(&instance1, "alice").await.as_deref(), Some("alice-1"));
        assert_eq!(get(&instance1, "bob").await, None);

        instance0.remove_session_data(Some("alice")).await.unwrap();
        assert_eq!(get(&instance1, "alice").await.as_deref(), Some("alice-1"));
    }

    #[tokio::test]
    async fn test_attribute_round_trip() {
        let store = CredentialStore::new(Arc::new(MemoryStore::new()), 0, "c1");

        store
            .set_attribute(Partition::TemporaryData, "a", json!("1"), None)
            .await
            .unwrap();
        store
            .set_attribute(Partition::TemporaryData, "b", json!(2), None)
            .await
            .unwrap();

        assert_eq!(
            store
                .get_attribute(Partition::TemporaryData, "a", None)
                .await
                .unwrap(),
            Some(json!("1"))
        );

        store
            .remove_attribute(Partition::TemporaryData, "a", None)
            .await
            .unwrap();
        let map = store.get(Partition::TemporaryData, None).await.unwrap().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["b"], json!(2));

        // Removing from a partition that was never written is fine.
        store
            .remove_attribute(Partition::SessionData, "x", Some("nobody"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_config_data_merges() {
        let store = CredentialStore::new(Arc::new(MemoryStore::new()), 0, "c1");
        let first = AuthClientConfig::new("c1", "https://app/cb")
            .with_base_url("https://idp")
            .with_client_secret("secret");
        store.set_config_data(&first).await.unwrap();

        let second = AuthClientConfig::new("c1", "https://app/other").with_base_url("https://idp");
        store.set_config_data(&second).await.unwrap();

        let stored = store.get_config_data().await.unwrap().unwrap();
        assert_eq!(stored.after_sign_in_url, "https://app/other");
        assert_eq!(stored.client_secret.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_non_object_payload_is_storage_error() {
        let backing = Arc::new(MemoryStore::new());
        backing.set_item("session_data-0-c1", "[1,2]").await.unwrap();
        let store = CredentialStore::new(backing, 0, "c1");

        assert!(matches!(
            store.get_session_data(None).await,
            Err(AuthError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_session_status_without_durable_store() {
        let store = CredentialStore::new(Arc::new(MemoryStore::new()), 0, "c1");

        store.set_session_status(true, None).await.unwrap();
        assert_eq!(store.session_status(None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_session_status_with_durable_store() {
        let durable = Arc::new(MemoryStore::new());
        let store = CredentialStore::new(Arc::new(MemoryStore::new()), 0, "c1")
            .with_durable_store(durable.clone());

        assert_eq!(store.session_status(None).await.unwrap(), None);
        store.set_session_status(true, None).await.unwrap();
        assert_eq!(store.session_status(None).await.unwrap(), Some(true));
        assert_eq!(durable.keys().await, vec!["session_status-0-c1".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_session_drops_temporary_data() {
        let store = CredentialStore::new(Arc::new(MemoryStore::new()), 0, "c1");
        store.set_session_data(Some("u"), &session("t")).await.unwrap();
        store
            .set_attribute(Partition::TemporaryData, "pkce", json!("v"), Some("u"))
            .await
            .unwrap();

        store.clear_session(Some("u")).await.unwrap();

        assert!(store.get_session_data(Some("u")).await.unwrap().is_none());
        assert!(store
            .get(Partition::TemporaryData, Some("u"))
            .await
            .unwrap()
            .is_none());
    }
}
