//! OIDC endpoint discovery.
//!
//! Resolves the provider's endpoints from, in priority order, the
//! `.well-known/openid-configuration` document, the standard paths under
//! `base_url`, or the explicit `endpoints` block of the config. Explicit
//! endpoints always win over whatever the first two produce.
//!
//! The result is cached in the credential store. A `discovery_initiated`
//! flag in temporary data turns later calls into cache reads until a forced
//! re-initialization. Two forced calls racing each other both write; the
//! last one wins.

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::AuthClientConfig;
use crate::error::{AuthError, Result};
use crate::store::{CredentialStore, Partition};
use crate::types::OidcProviderMetadata;

pub(crate) const DISCOVERY_INITIATED: &str = "discovery_initiated";

/// Standard endpoint layout under an IdP base URL.
pub fn derive_from_base_url(base_url: &str) -> OidcProviderMetadata {
    let base = base_url.trim_end_matches('/');
    let at = |path: &str| Some(format!("{base}{path}"));

    OidcProviderMetadata {
        issuer: at("/oauth2/token"),
        authorization_endpoint: at("/oauth2/authorize"),
        token_endpoint: at("/oauth2/token"),
        end_session_endpoint: at("/oidc/logout"),
        jwks_uri: at("/oauth2/jwks"),
        revocation_endpoint: at("/oauth2/revoke"),
        introspection_endpoint: at("/oauth2/introspect"),
        check_session_iframe: at("/oidc/checksession"),
        userinfo_endpoint: at("/oauth2/userinfo"),
    }
}

pub struct DiscoveryResolver {
    http: Arc<dyn HttpClient>,
    store: CredentialStore,
}

impl DiscoveryResolver {
    pub fn new(http: Arc<dyn HttpClient>, store: CredentialStore) -> Self {
        Self { http, store }
    }

    /// Whether a previous discovery cycle completed for this scope.
    pub async fn is_initiated(&self) -> Result<bool> {
        Ok(self
            .store
            .get_attribute(Partition::TemporaryData, DISCOVERY_INITIATED, None)
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    /// Resolve and cache the provider metadata.
    ///
    /// Without `force_init` a completed earlier cycle is returned from the
    /// store without touching the network.
    #[instrument(skip(self, config), fields(instance_id = self.store.instance_id()))]
    pub async fn resolve(
        &self,
        config: &AuthClientConfig,
        force_init: bool,
    ) -> Result<OidcProviderMetadata> {
        if !force_init && self.is_initiated().await? {
            if let Some(cached) = self.store.get_oidc_provider_metadata().await? {
                debug!("Using cached provider metadata");
                return Ok(cached);
            }
        }

        let mut metadata = if let Some(well_known) = &config.well_known_endpoint {
            self.fetch_well_known(well_known).await?
        } else if let Some(base_url) = &config.base_url {
            debug!(base_url = %base_url, "Deriving endpoints from base URL");
            derive_from_base_url(base_url)
        } else {
            OidcProviderMetadata::default()
        };

        metadata.overlay(&config.endpoints);

        self.store.set_oidc_provider_metadata(&metadata).await?;
        self.store
            .set_attribute(
                Partition::TemporaryData,
                DISCOVERY_INITIATED,
                Value::Bool(true),
                None,
            )
            .await?;

        info!(
            has_token_endpoint = metadata.token_endpoint.is_some(),
            has_end_session_endpoint = metadata.end_session_endpoint.is_some(),
            "Provider metadata resolved"
        );

        Ok(metadata)
    }

    /// Forget the cached metadata so the next `resolve` hits the source again.
    pub async fn invalidate(&self) -> Result<()> {
        self.store.remove_oidc_provider_metadata().await?;
        self.store
            .remove_attribute(Partition::TemporaryData, DISCOVERY_INITIATED, None)
            .await
    }

    async fn fetch_well_known(&self, url: &str) -> Result<OidcProviderMetadata> {
        let request = HttpRequest::new(HttpMethod::Get, url).header("Accept", "application/json");

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if response.status != 200 {
            warn!(status = response.status, url = %url, "Well-known endpoint rejected request");
            return Err(AuthError::Discovery(format!(
                "{url} returned HTTP {}",
                response.status
            )));
        }

        response
            .json::<OidcProviderMetadata>()
            .map_err(|e| {
                AuthError::Discovery(format!("{url} did not return provider metadata: {e}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::HttpResponse;
    use mockall::mock;

    mock! {
        Http {}

        #[async_trait::async_trait]
        impl HttpClient for Http {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    const WELL_KNOWN: &str = "https://idp.example/oauth2/token/.well-known/openid-configuration";

    fn store() -> CredentialStore {
        CredentialStore::new(Arc::new(MemoryStore::new()), 0, "c1")
    }

    fn discovery_body() -> String {
        serde_json::json!({
            "issuer": "https://idp.example/oauth2/token",
            "authorization_endpoint": "https://idp.example/oauth2/authorize",
            "token_endpoint": "https://idp.example/oauth2/token",
            "end_session_endpoint": "https://idp.example/oidc/logout",
            "jwks_uri": "https://idp.example/oauth2/jwks",
            "response_types_supported": ["code"]
        })
        .to_string()
    }

    #[test]
    fn test_derive_from_base_url() {
        let metadata = derive_from_base_url("https://idp.example/t/acme/");
        assert_eq!(
            metadata.authorization_endpoint.as_deref(),
            Some("https://idp.example/t/acme/oauth2/authorize")
        );
        assert_eq!(
            metadata.end_session_endpoint.as_deref(),
            Some("https://idp.example/t/acme/oidc/logout")
        );
        assert_eq!(
            metadata.issuer.as_deref(),
            Some("https://idp.example/t/acme/oauth2/token")
        );
    }

    #[tokio::test]
    async fn test_well_known_takes_priority_and_is_cached() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .withf(|req| req.url == WELL_KNOWN && req.method == HttpMethod::Get)
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, discovery_body())));

        let resolver = DiscoveryResolver::new(Arc::new(http), store());
        let config = AuthClientConfig::new("c1", "https://app/cb")
            .with_base_url("https://ignored.example")
            .with_well_known_endpoint(WELL_KNOWN);

        let first = resolver.resolve(&config, false).await.unwrap();
        assert_eq!(
            first.token_endpoint.as_deref(),
            Some("https://idp.example/oauth2/token")
        );

        // Second call is served from the store; the mock allows one request.
        let second = resolver.resolve(&config, false).await.unwrap();
        assert_eq!(first, second);
        assert!(resolver.is_initiated().await.unwrap());
    }

    #[tokio::test]
    async fn test_force_init_refetches() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .times(2)
            .returning(|_| Ok(HttpResponse::new(200, discovery_body())));

        let resolver = DiscoveryResolver::new(Arc::new(http), store());
        let config =
            AuthClientConfig::new("c1", "https://app/cb").with_well_known_endpoint(WELL_KNOWN);

        resolver.resolve(&config, false).await.unwrap();
        resolver.resolve(&config, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_explicit_endpoints_override_discovery() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .returning(|_| Ok(HttpResponse::new(200, discovery_body())));

        let resolver = DiscoveryResolver::new(Arc::new(http), store());
        let config = AuthClientConfig::new("c1", "https://app/cb")
            .with_well_known_endpoint(WELL_KNOWN)
            .with_endpoints(OidcProviderMetadata {
                token_endpoint: Some("https://proxy.example/token".into()),
                ..Default::default()
            });

        let metadata = resolver.resolve(&config, false).await.unwrap();
        assert_eq!(
            metadata.token_endpoint.as_deref(),
            Some("https://proxy.example/token")
        );
        assert_eq!(
            metadata.authorization_endpoint.as_deref(),
            Some("https://idp.example/oauth2/authorize")
        );
    }

    #[tokio::test]
    async fn test_base_url_needs_no_network() {
        let resolver = DiscoveryResolver::new(Arc::new(MockHttp::new()), store());
        let config =
            AuthClientConfig::new("c1", "https://app/cb").with_base_url("https://idp.example");

        let metadata = resolver.resolve(&config, false).await.unwrap();
        assert_eq!(
            metadata.token_endpoint.as_deref(),
            Some("https://idp.example/oauth2/token")
        );
    }

    #[tokio::test]
    async fn test_non_200_is_discovery_error() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .returning(|_| Ok(HttpResponse::new(404, "not found")));

        let resolver = DiscoveryResolver::new(Arc::new(http), store());
        let config =
            AuthClientConfig::new("c1", "https://app/cb").with_well_known_endpoint(WELL_KNOWN);

        assert!(matches!(
            resolver.resolve(&config, false).await,
            Err(AuthError::Discovery(_))
        ));
        assert!(!resolver.is_initiated().await.unwrap());
    }

    #[tokio::test]
    async fn test_non_json_is_discovery_error() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .returning(|_| Ok(HttpResponse::new(200, "<html>")));

        let resolver = DiscoveryResolver::new(Arc::new(http), store());
        let config =
            AuthClientConfig::new("c1", "https://app/cb").with_well_known_endpoint(WELL_KNOWN);

        assert!(matches!(
            resolver.resolve(&config, false).await,
            Err(AuthError::Discovery(_))
        ));
    }

    #[tokio::test]
    async fn test_invalidate_forces_next_resolve() {
        let resolver = DiscoveryResolver::new(Arc::new(MockHttp::new()), store());
        let config =
            AuthClientConfig::new("c1", "https://app/cb").with_base_url("https://a.example");

        resolver.resolve(&config, false).await.unwrap();
        resolver.invalidate().await.unwrap();
        assert!(!resolver.is_initiated().await.unwrap());

        let config = config.with_base_url("https://b.example");
        let metadata = resolver.resolve(&config, false).await.unwrap();
        assert_eq!(
            metadata.token_endpoint.as_deref(),
            Some("https://b.example/oauth2/token")
        );
    }
}
