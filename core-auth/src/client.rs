//! # Auth Client
//!
//! Token lifecycle for one client instance: authorization URL construction
//! with PKCE, authorization-code exchange, refresh, revocation, sign-out and
//! custom grants. All state lives in the [`CredentialStore`], so several
//! `AuthClient` values (or processes) pointing at the same storage and scope
//! see the same session.
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{AuthClient, AuthClientConfig, AuthorizationParams};
//! use core_auth::store::MemoryStore;
//! use std::sync::Arc;
//! # use bridge_traits::http::HttpClient;
//!
//! # async fn example(http: Arc<dyn HttpClient>) -> core_auth::Result<()> {
//! let config = AuthClientConfig::new("my-client", "https://app.example.com/callback")
//!     .with_base_url("https://idp.example.com");
//!
//! let client = AuthClient::builder(config, http, Arc::new(MemoryStore::new()))
//!     .instance_id(0)
//!     .build()?;
//! client.initialize(false).await?;
//!
//! let url = client
//!     .build_authorization_url(&AuthorizationParams::new(), None)
//!     .await?;
//! // Send the user to `url`, then on the redirect:
//! // client.exchange_authorization_code(code, session_state, state, None, None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Security
//!
//! - Tokens, codes, verifiers and client secrets are never logged
//! - PKCE verifiers are deleted from storage as soon as they are read
//! - ID tokens are verified against the provider JWKS when
//!   `token_validation.id_token.validate` is set

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::storage::KeyValueStore;
use bridge_traits::time::{Clock, SystemClock};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::AuthClientConfig;
use crate::crypto::{
    decode_claims, CryptoProvider, DefaultCryptoProvider, JwkSet, JwtVerification,
    CODE_CHALLENGE_METHOD,
};
use crate::discovery::DiscoveryResolver;
use crate::error::{AuthError, Result};
use crate::store::{CredentialStore, Partition};
use crate::types::{
    AuthorizationParams, BasicUserInfo, CustomGrant, CustomGrantOutcome, IdTokenClaims,
    OidcProviderMetadata, SessionData, TokenResponse,
};

/// `state` value the IdP echoes back after a successful logout.
pub const SIGN_OUT_SUCCESS_STATE: &str = "sign_out_success";

const PKCE_CODE_VERIFIER_PREFIX: &str = "pkce_code_verifier";
const CUSTOM_GRANT_REPLAY: &str = "custom_grant_replay";

fn pkce_key(state: &str) -> String {
    format!("{PKCE_CODE_VERIFIER_PREFIX}_{state}")
}

/// A token endpoint request, decided at the call site.
#[derive(Clone, PartialEq, Eq)]
pub enum GrantRequest {
    AuthorizationCode {
        code: String,
        redirect_uri: String,
        code_verifier: Option<String>,
    },
    RefreshToken {
        refresh_token: String,
    },
    /// Fully rendered form fields of a [`CustomGrant`].
    Custom {
        params: BTreeMap<String, String>,
    },
}

impl GrantRequest {
    pub fn grant_type(&self) -> &str {
        match self {
            GrantRequest::AuthorizationCode { .. } => "authorization_code",
            GrantRequest::RefreshToken { .. } => "refresh_token",
            GrantRequest::Custom { params } => params
                .get("grant_type")
                .map(String::as_str)
                .unwrap_or("custom"),
        }
    }

    /// Form body fields. Custom grants carry their own client credentials
    /// through placeholders.
    pub fn into_form(self, client_id: &str, client_secret: Option<&str>) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = Vec::new();
        let mut push = |k: &str, v: String| form.push((k.to_string(), v));

        match self {
            GrantRequest::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                push("grant_type", "authorization_code".into());
                push("code", code);
                push("redirect_uri", redirect_uri);
                push("client_id", client_id.into());
                if let Some(secret) = client_secret {
                    push("client_secret", secret.into());
                }
                if let Some(verifier) = code_verifier {
                    push("code_verifier", verifier);
                }
            }
            GrantRequest::RefreshToken { refresh_token } => {
                push("grant_type", "refresh_token".into());
                push("refresh_token", refresh_token);
                push("client_id", client_id.into());
                if let Some(secret) = client_secret {
                    push("client_secret", secret.into());
                }
            }
            GrantRequest::Custom { params } => {
                for (k, v) in params {
                    push(&k, v);
                }
            }
        }

        form
    }
}

impl fmt::Debug for GrantRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrantRequest::AuthorizationCode { code_verifier, .. } => f
                .debug_struct("AuthorizationCode")
                .field("pkce", &code_verifier.is_some())
                .finish_non_exhaustive(),
            GrantRequest::RefreshToken { .. } => {
                f.debug_struct("RefreshToken").finish_non_exhaustive()
            }
            GrantRequest::Custom { params } => f
                .debug_struct("Custom")
                .field("params", &params.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

/// Builder for [`AuthClient`].
pub struct AuthClientBuilder {
    instance_id: u64,
    config: AuthClientConfig,
    http: Arc<dyn HttpClient>,
    store: Arc<dyn KeyValueStore>,
    durable_store: Option<Arc<dyn KeyValueStore>>,
    crypto: Option<Arc<dyn CryptoProvider>>,
    clock: Option<Arc<dyn Clock>>,
    events: Option<EventBus>,
}

impl AuthClientBuilder {
    pub fn instance_id(mut self, instance_id: u64) -> Self {
        self.instance_id = instance_id;
        self
    }

    /// Store for the cross-context session-active flag.
    pub fn with_durable_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.durable_store = Some(store);
        self
    }

    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<AuthClient> {
        self.config.validate()?;

        let mut store = CredentialStore::new(self.store, self.instance_id, &self.config.client_id);
        if let Some(durable) = self.durable_store {
            store = store.with_durable_store(durable);
        }

        Ok(AuthClient {
            instance_id: self.instance_id,
            discovery: DiscoveryResolver::new(self.http.clone(), store.clone()),
            initial_config: self.config,
            http: self.http,
            store,
            crypto: self
                .crypto
                .unwrap_or_else(|| Arc::new(DefaultCryptoProvider)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            events: self.events,
        })
    }
}

/// OAuth2/OIDC client for one `(instance_id, client_id)` scope.
pub struct AuthClient {
    instance_id: u64,
    initial_config: AuthClientConfig,
    http: Arc<dyn HttpClient>,
    store: CredentialStore,
    discovery: DiscoveryResolver,
    crypto: Arc<dyn CryptoProvider>,
    clock: Arc<dyn Clock>,
    events: Option<EventBus>,
}

impl AuthClient {
    pub fn builder(
        config: AuthClientConfig,
        http: Arc<dyn HttpClient>,
        store: Arc<dyn KeyValueStore>,
    ) -> AuthClientBuilder {
        AuthClientBuilder {
            instance_id: 0,
            config,
            http,
            store,
            durable_store: None,
            crypto: None,
            clock: None,
            events: None,
        }
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub(crate) fn http(&self) -> &Arc<dyn HttpClient> {
        &self.http
    }

    pub(crate) fn emit(&self, event: AuthEvent) {
        if let Some(bus) = &self.events {
            // No subscribers is fine.
            let _ = bus.emit(CoreEvent::Auth(event));
        }
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.emit(AuthEvent::AuthError {
                instance_id: Some(self.instance_id),
                code: e.code().to_string(),
                message: e.to_string(),
                recoverable: e.is_recoverable(),
            });
        }
        result
    }

    fn now_millis(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    /// Default `state` for authorization requests of this instance.
    pub fn default_state(&self) -> String {
        format!("instance_{}-{}", self.instance_id, self.store.client_id())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Store the config (unless one is already stored) and run discovery.
    ///
    /// `force` overwrites the stored config and re-fetches provider metadata.
    #[instrument(skip(self), fields(instance_id = self.instance_id))]
    pub async fn initialize(&self, force: bool) -> Result<()> {
        let result: Result<()> = async {
            if force || self.store.get_config_data().await?.is_none() {
                self.store.set_config_data(&self.initial_config).await?;
            }
            let config = self.config().await?;
            self.discovery.resolve(&config, force).await?;
            info!("Auth client initialized");
            Ok(())
        }
        .await;

        self.observe(result)
    }

    /// Merge `config` into the stored config and re-run discovery.
    #[instrument(skip(self, config), fields(instance_id = self.instance_id))]
    pub async fn reinitialize(&self, config: AuthClientConfig) -> Result<()> {
        config.validate()?;
        if config.client_id != self.store.client_id() {
            return Err(AuthError::Configuration(
                "client_id cannot change on re-initialization; register a new client instead"
                    .into(),
            ));
        }

        self.store.set_config_data(&config).await?;
        self.discovery.invalidate().await?;
        let merged = self.config().await?;
        self.discovery.resolve(&merged, true).await?;
        Ok(())
    }

    async fn config(&self) -> Result<AuthClientConfig> {
        self.store.get_config_data().await?.ok_or_else(|| {
            AuthError::Configuration("client is not initialized; call initialize() first".into())
        })
    }

    async fn metadata(&self, config: &AuthClientConfig) -> Result<OidcProviderMetadata> {
        self.discovery.resolve(config, false).await
    }

    // ------------------------------------------------------------------
    // Authorization
    // ------------------------------------------------------------------

    /// Build the URL to send the user to.
    ///
    /// With PKCE enabled a fresh verifier is stored under
    /// `pkce_code_verifier_{state}` until the matching code exchange.
    #[instrument(skip(self, params), fields(instance_id = self.instance_id))]
    pub async fn build_authorization_url(
        &self,
        params: &AuthorizationParams,
        user_id: Option<&str>,
    ) -> Result<String> {
        let result = self.build_authorization_url_inner(params, user_id).await;
        if result.is_ok() {
            self.emit(AuthEvent::SigningIn {
                instance_id: self.instance_id,
            });
        }
        self.observe(result)
    }

    async fn build_authorization_url_inner(
        &self,
        params: &AuthorizationParams,
        user_id: Option<&str>,
    ) -> Result<String> {
        let config = self.config().await?;
        let metadata = self.metadata(&config).await?;

        let endpoint = metadata.authorization_endpoint.ok_or_else(|| {
            AuthError::Configuration("no authorization endpoint is known for this client".into())
        })?;
        let mut url = Url::parse(&endpoint).map_err(|e| {
            AuthError::Configuration(format!("invalid authorization endpoint: {e}"))
        })?;

        let state = params
            .state
            .clone()
            .unwrap_or_else(|| self.default_state());
        let response_mode = params.response_mode.unwrap_or(config.response_mode);

        let challenge = if config.enable_pkce {
            let verifier = self.crypto.code_verifier();
            let challenge = self.crypto.code_challenge(&verifier);
            self.set_pkce_code(&verifier, &state, user_id).await?;
            Some(challenge)
        } else {
            None
        };

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &config.client_id);
            query.append_pair("redirect_uri", &config.after_sign_in_url);
            query.append_pair("response_mode", response_mode.as_str());
            query.append_pair("scope", &config.scope_string());

            if let Some(challenge) = &challenge {
                query.append_pair("code_challenge", challenge);
                query.append_pair("code_challenge_method", CODE_CHALLENGE_METHOD);
            }

            query.append_pair("state", &state);

            if let Some(prompt) = &params.prompt {
                query.append_pair("prompt", prompt);
            }
            if let Some(fidp) = &params.fidp {
                query.append_pair("fidp", fidp);
            }
            if let Some(actor) = &params.requested_actor {
                query.append_pair("requested_actor", actor);
            }
            for (key, value) in &params.extra {
                query.append_pair(key, value);
            }
        }

        debug!(
            pkce = challenge.is_some(),
            response_mode = response_mode.as_str(),
            "Built authorization URL"
        );
        Ok(url.to_string())
    }

    /// Exchange an authorization code for a session.
    ///
    /// `state` selects the stored PKCE verifier, which is deleted before the
    /// request is sent.
    #[instrument(skip(self, code, session_state, extra), fields(instance_id = self.instance_id))]
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        session_state: Option<&str>,
        state: &str,
        user_id: Option<&str>,
        extra: Option<&BTreeMap<String, String>>,
    ) -> Result<SessionData> {
        let result: Result<SessionData> = async {
            let config = self.config().await?;
            let metadata = self.metadata(&config).await?;
            let token_endpoint = metadata
                .token_endpoint
                .clone()
                .ok_or(AuthError::TokenEndpointMissing)?;

            let code_verifier = if config.enable_pkce {
                let verifier = self.get_pkce_code(state, user_id).await?;
                self.store
                    .remove_attribute(Partition::TemporaryData, &pkce_key(state), user_id)
                    .await?;
                if verifier.is_none() {
                    warn!("No PKCE verifier stored for this state");
                }
                verifier
            } else {
                None
            };

            let grant = GrantRequest::AuthorizationCode {
                code: code.to_string(),
                redirect_uri: config.after_sign_in_url.clone(),
                code_verifier,
            };

            let response = self
                .send_grant(&config, &token_endpoint, grant, extra, None)
                .await?;
            let tokens: TokenResponse = parse_token_response(&response)?;

            let mut session = SessionData::from_token_response(tokens, self.now_millis());
            session.session_state = session_state.map(str::to_string);

            if let Some(id_token) = &session.id_token {
                self.enforce_id_token(&config, &metadata, id_token).await?;
            }

            self.store.set_session_data(user_id, &session).await?;
            self.store.set_session_status(true, user_id).await?;

            info!(expires_in = session.expires_in, "Signed in");
            self.emit(AuthEvent::SignedIn {
                instance_id: self.instance_id,
                user_id: user_id.map(str::to_string),
            });

            Ok(session)
        }
        .await;

        self.observe(result)
    }

    /// Refresh the access token. Not single-flight; see
    /// [`RefreshCoordinator`](crate::RefreshCoordinator).
    ///
    /// Keeps the previous refresh token (and ID token) when the IdP does not
    /// rotate them.
    #[instrument(skip(self), fields(instance_id = self.instance_id))]
    pub async fn refresh(&self, user_id: Option<&str>) -> Result<SessionData> {
        let result: Result<SessionData> = async {
            let config = self.config().await?;
            let metadata = self.metadata(&config).await?;
            let token_endpoint = metadata
                .token_endpoint
                .clone()
                .ok_or(AuthError::TokenEndpointMissing)?;

            let previous = self.store.get_session_data(user_id).await?;
            let refresh_token = previous
                .as_ref()
                .and_then(|s| s.refresh_token.clone())
                .ok_or(AuthError::NoRefreshToken)?;

            self.emit(AuthEvent::TokenRefreshing {
                instance_id: self.instance_id,
            });

            let grant = GrantRequest::RefreshToken {
                refresh_token: refresh_token.clone(),
            };
            let response = self
                .send_grant(&config, &token_endpoint, grant, None, None)
                .await?;
            let tokens: TokenResponse = parse_token_response(&response)?;
            let rotated_id_token = tokens.id_token.is_some();

            let mut session = SessionData::from_token_response(tokens, self.now_millis());
            if session.refresh_token.is_none() {
                session.refresh_token = Some(refresh_token);
            }
            if let Some(previous) = previous {
                session.session_state = previous.session_state;
                if session.id_token.is_none() {
                    session.id_token = previous.id_token;
                }
            }

            if rotated_id_token {
                if let Some(id_token) = &session.id_token {
                    self.enforce_id_token(&config, &metadata, id_token).await?;
                }
            }

            self.store.set_session_data(user_id, &session).await?;

            info!(expires_in = session.expires_in, "Access token refreshed");
            self.emit(AuthEvent::TokenRefreshed {
                instance_id: self.instance_id,
                expires_in: session.expires_in,
            });

            self.replay_custom_grant(user_id).await;

            Ok(session)
        }
        .await;

        self.observe(result)
    }

    // ------------------------------------------------------------------
    // Sign-out and revocation
    // ------------------------------------------------------------------

    /// Logout URL at the IdP's end-session endpoint.
    #[instrument(skip(self), fields(instance_id = self.instance_id))]
    pub async fn sign_out_url(&self, user_id: Option<&str>) -> Result<String> {
        let config = self.config().await?;
        let metadata = self.metadata(&config).await?;

        let endpoint = metadata.end_session_endpoint.ok_or_else(|| {
            AuthError::Configuration("no end-session endpoint is known for this client".into())
        })?;
        let redirect = config.sign_out_redirect_url();
        if redirect.is_empty() {
            return Err(AuthError::Configuration(
                "no post-logout redirect URL is configured".into(),
            ));
        }

        let mut url = Url::parse(&endpoint)
            .map_err(|e| AuthError::Configuration(format!("invalid end-session endpoint: {e}")))?;

        let id_token = if config.send_id_token_in_logout_request {
            self.store
                .get_session_data(user_id)
                .await?
                .and_then(|s| s.id_token)
        } else {
            None
        };

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("post_logout_redirect_uri", redirect);
            match &id_token {
                Some(id_token) => query.append_pair("id_token_hint", id_token),
                None => query.append_pair("client_id", &config.client_id),
            };
            query.append_pair("state", SIGN_OUT_SUCCESS_STATE);
        }

        Ok(url.to_string())
    }

    /// Build the logout URL, then clear the local session.
    #[instrument(skip(self), fields(instance_id = self.instance_id))]
    pub async fn sign_out(&self, user_id: Option<&str>) -> Result<String> {
        let url = self.observe(self.sign_out_url(user_id).await)?;
        self.clear_session(user_id).await?;
        Ok(url)
    }

    /// Drop the local session without contacting the IdP.
    pub async fn clear_session(&self, user_id: Option<&str>) -> Result<()> {
        self.store.clear_session(user_id).await?;
        self.store.set_session_status(false, user_id).await?;
        self.emit(AuthEvent::SignedOut {
            instance_id: self.instance_id,
            user_id: user_id.map(str::to_string),
        });
        Ok(())
    }

    /// The IdP redirected back with `state=sign_out_success` and no error.
    pub fn is_sign_out_successful(url: &str) -> bool {
        match Url::parse(url) {
            Ok(url) => {
                let state = url.query_pairs().find(|(k, _)| k == "state");
                let error = url.query_pairs().any(|(k, _)| k == "error");
                matches!(state, Some((_, v)) if v == SIGN_OUT_SUCCESS_STATE) && !error
            }
            Err(_) => false,
        }
    }

    /// The IdP redirected back from logout with an error.
    pub fn did_sign_out_fail(url: &str) -> bool {
        match Url::parse(url) {
            Ok(url) => {
                let state = url.query_pairs().find(|(k, _)| k == "state");
                let error = url.query_pairs().any(|(k, _)| k == "error");
                matches!(state, Some((_, v)) if v == SIGN_OUT_SUCCESS_STATE) && error
            }
            Err(_) => false,
        }
    }

    /// Revoke the current access token.
    ///
    /// Only an HTTP 200 clears the session. Any other status leaves it in
    /// place so a transient failure does not silently log the user out.
    #[instrument(skip(self), fields(instance_id = self.instance_id))]
    pub async fn revoke(&self, user_id: Option<&str>) -> Result<()> {
        let result: Result<()> = async {
            let config = self.config().await?;
            let metadata = self.metadata(&config).await?;
            let endpoint = metadata.revocation_endpoint.ok_or_else(|| {
                AuthError::Configuration("no revocation endpoint is known for this client".into())
            })?;

            let Some(session) = self.store.get_session_data(user_id).await? else {
                debug!("No session to revoke");
                return Ok(());
            };

            let mut form = vec![
                ("client_id", config.client_id.clone()),
                ("token", session.access_token.clone()),
                ("token_type_hint", "access_token".to_string()),
            ];
            if let Some(secret) = &config.client_secret {
                form.push(("client_secret", secret.clone()));
            }

            let request = HttpRequest::new(HttpMethod::Post, endpoint)
                .header("Accept", "application/json")
                .with_credentials(config.send_cookies_in_requests)
                .form(&form)
                .map_err(|e| {
                    AuthError::Configuration(format!("cannot encode revocation request: {e}"))
                })?;

            let response = self
                .http
                .execute(request)
                .await
                .map_err(|e| AuthError::Network(e.to_string()))?;

            if response.status != 200 {
                let body = response.text().unwrap_or_default();
                warn!(status = response.status, "Revocation rejected; session kept");
                return Err(AuthError::RevocationFailed {
                    status: response.status,
                    body,
                });
            }

            self.store.clear_session(user_id).await?;
            self.store.set_session_status(false, user_id).await?;

            info!("Access token revoked");
            self.emit(AuthEvent::TokenRevoked {
                instance_id: self.instance_id,
            });
            Ok(())
        }
        .await;

        self.observe(result)
    }

    // ------------------------------------------------------------------
    // Session queries
    // ------------------------------------------------------------------

    /// Local freshness check; no network.
    pub async fn is_signed_in(&self, user_id: Option<&str>) -> Result<bool> {
        let now = self.now_millis();
        Ok(self
            .store
            .get_session_data(user_id)
            .await?
            .map(|s| s.is_fresh(now))
            .unwrap_or(false))
    }

    pub async fn get_session_data(&self, user_id: Option<&str>) -> Result<Option<SessionData>> {
        self.store.get_session_data(user_id).await
    }

    pub async fn get_access_token(&self, user_id: Option<&str>) -> Result<Option<String>> {
        Ok(self
            .store
            .get_session_data(user_id)
            .await?
            .map(|s| s.access_token)
            .filter(|t| !t.is_empty()))
    }

    pub async fn get_id_token(&self, user_id: Option<&str>) -> Result<Option<String>> {
        Ok(self
            .store
            .get_session_data(user_id)
            .await?
            .and_then(|s| s.id_token))
    }

    pub async fn get_refresh_token(&self, user_id: Option<&str>) -> Result<Option<String>> {
        Ok(self
            .store
            .get_session_data(user_id)
            .await?
            .and_then(|s| s.refresh_token))
    }

    pub async fn get_config_data(&self) -> Result<AuthClientConfig> {
        self.config().await
    }

    pub async fn get_oidc_service_endpoints(&self) -> Result<OidcProviderMetadata> {
        let config = self.config().await?;
        self.metadata(&config).await
    }

    /// Claims of the stored ID token, without signature verification.
    pub async fn get_decoded_id_token(
        &self,
        user_id: Option<&str>,
    ) -> Result<Option<IdTokenClaims>> {
        match self.get_id_token(user_id).await? {
            Some(id_token) => Ok(Some(decode_claims(self.crypto.as_ref(), &id_token)?)),
            None => Ok(None),
        }
    }

    pub async fn get_basic_user_info(
        &self,
        user_id: Option<&str>,
    ) -> Result<Option<BasicUserInfo>> {
        let Some(session) = self.store.get_session_data(user_id).await? else {
            return Ok(None);
        };
        let claims = match &session.id_token {
            Some(id_token) => decode_claims(self.crypto.as_ref(), id_token)?,
            None => IdTokenClaims::default(),
        };
        Ok(Some(BasicUserInfo::from_claims(&claims, &session)))
    }

    /// Cross-context session-active flag. `None` without a durable store.
    pub async fn session_status(&self, user_id: Option<&str>) -> Result<Option<bool>> {
        self.store.session_status(user_id).await
    }

    pub async fn set_session_status(&self, active: bool, user_id: Option<&str>) -> Result<()> {
        self.store.set_session_status(active, user_id).await
    }

    // ------------------------------------------------------------------
    // PKCE
    // ------------------------------------------------------------------

    /// Store a verifier for `state`, for hosts that carry it across processes.
    pub async fn set_pkce_code(
        &self,
        verifier: &str,
        state: &str,
        user_id: Option<&str>,
    ) -> Result<()> {
        self.store
            .set_attribute(
                Partition::TemporaryData,
                &pkce_key(state),
                Value::String(verifier.to_string()),
                user_id,
            )
            .await
    }

    pub async fn get_pkce_code(
        &self,
        state: &str,
        user_id: Option<&str>,
    ) -> Result<Option<String>> {
        Ok(self
            .store
            .get_attribute(Partition::TemporaryData, &pkce_key(state), user_id)
            .await?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    // ------------------------------------------------------------------
    // ID token validation
    // ------------------------------------------------------------------

    /// Verify `id_token` against the provider JWKS and the configured
    /// audience, issuer and clock tolerance.
    #[instrument(skip(self, id_token), fields(instance_id = self.instance_id))]
    pub async fn validate_id_token(&self, id_token: &str) -> Result<bool> {
        let config = self.config().await?;
        let metadata = self.metadata(&config).await?;
        self.verify_id_token(&config, &metadata, id_token).await
    }

    async fn enforce_id_token(
        &self,
        config: &AuthClientConfig,
        metadata: &OidcProviderMetadata,
        id_token: &str,
    ) -> Result<()> {
        if !config.token_validation.id_token.validate {
            return Ok(());
        }
        if self.verify_id_token(config, metadata, id_token).await? {
            Ok(())
        } else {
            warn!("ID token failed validation");
            Err(AuthError::Decode(
                "ID token failed signature or claim validation".into(),
            ))
        }
    }

    async fn verify_id_token(
        &self,
        config: &AuthClientConfig,
        metadata: &OidcProviderMetadata,
        id_token: &str,
    ) -> Result<bool> {
        let jwks_uri = metadata.jwks_uri.as_deref().ok_or_else(|| {
            AuthError::Configuration("ID token validation needs a jwks_uri".into())
        })?;
        let jwks = self.fetch_jwks(jwks_uri).await?;

        let claims: IdTokenClaims = decode_claims(self.crypto.as_ref(), id_token)?;
        let validation = &config.token_validation.id_token;

        self.crypto.verify_jwt(&JwtVerification {
            token: id_token,
            jwks: &jwks,
            algorithms: &[],
            audience: &config.client_id,
            issuer: metadata.issuer.as_deref(),
            subject: Some(claims.sub.as_str()).filter(|s| !s.is_empty()),
            clock_tolerance: validation.clock_tolerance,
            validate_issuer: validation.validate_issuer,
        })
    }

    async fn fetch_jwks(&self, jwks_uri: &str) -> Result<JwkSet> {
        let request =
            HttpRequest::new(HttpMethod::Get, jwks_uri).header("Accept", "application/json");
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if !response.is_success() {
            return Err(AuthError::Discovery(format!(
                "{jwks_uri} returned HTTP {}",
                response.status
            )));
        }

        response
            .json::<JwkSet>()
            .map_err(|e| AuthError::Decode(format!("invalid JWKS document: {e}")))
    }

    // ------------------------------------------------------------------
    // Custom grants
    // ------------------------------------------------------------------

    /// Post a custom grant to the token endpoint.
    #[instrument(skip(self, grant), fields(instance_id = self.instance_id, grant_id = %grant.id))]
    pub async fn request_custom_grant(
        &self,
        grant: &CustomGrant,
        user_id: Option<&str>,
    ) -> Result<CustomGrantOutcome> {
        let result = self.request_custom_grant_inner(grant, user_id).await;
        self.observe(result)
    }

    async fn request_custom_grant_inner(
        &self,
        grant: &CustomGrant,
        user_id: Option<&str>,
    ) -> Result<CustomGrantOutcome> {
        let config = self.config().await?;
        let metadata = self.metadata(&config).await?;
        let session = self.store.get_session_data(user_id).await?;
        let now = self.now_millis();

        if grant.sign_in_required && !session.as_ref().is_some_and(|s| s.is_fresh(now)) {
            return Err(AuthError::Configuration(format!(
                "custom grant '{}' requires a signed-in user",
                grant.id
            )));
        }

        let endpoint = grant
            .token_endpoint
            .clone()
            .or_else(|| metadata.token_endpoint.clone())
            .ok_or(AuthError::TokenEndpointMissing)?;

        let access_token = session
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_default();
        let username = session
            .as_ref()
            .and_then(|s| s.id_token.as_deref())
            .and_then(|t| decode_claims::<IdTokenClaims>(self.crypto.as_ref(), t).ok())
            .map(|c| c.login_name().to_string())
            .unwrap_or_default();

        let scope = config.scope_string();
        let client_secret = config.client_secret.clone().unwrap_or_default();
        let placeholders = [
            ("{{token}}", access_token.as_str()),
            ("{{username}}", username.as_str()),
            ("{{scope}}", scope.as_str()),
            ("{{clientId}}", config.client_id.as_str()),
            ("{{clientSecret}}", client_secret.as_str()),
        ];

        let params: BTreeMap<String, String> = grant
            .data
            .iter()
            .map(|(key, template)| {
                let value = placeholders
                    .iter()
                    .fold(template.clone(), |acc, (ph, v)| acc.replace(ph, v));
                (key.clone(), value)
            })
            .collect();

        if grant.replay_after_refresh {
            self.store
                .set_attribute(
                    Partition::TemporaryData,
                    CUSTOM_GRANT_REPLAY,
                    serde_json::to_value(grant)?,
                    user_id,
                )
                .await?;
        }

        let bearer = if grant.attach_token {
            if access_token.is_empty() {
                return Err(AuthError::Configuration(format!(
                    "custom grant '{}' attaches a token but there is no session",
                    grant.id
                )));
            }
            Some(access_token.as_str())
        } else {
            None
        };

        let response = self
            .send_grant(&config, &endpoint, GrantRequest::Custom { params }, None, bearer)
            .await?;

        if !grant.returns_session {
            if response.body.is_empty() {
                return Ok(CustomGrantOutcome::Response(Value::Null));
            }
            return Ok(CustomGrantOutcome::Response(serde_json::from_slice(
                &response.body,
            )?));
        }

        let tokens = parse_token_response(&response)?;
        let mut new_session = SessionData::from_token_response(tokens, now);
        if let Some(previous) = &session {
            if new_session.refresh_token.is_none() {
                new_session.refresh_token.clone_from(&previous.refresh_token);
            }
            new_session.session_state.clone_from(&previous.session_state);
        }
        if let Some(id_token) = &new_session.id_token {
            self.enforce_id_token(&config, &metadata, id_token).await?;
        }

        self.store.set_session_data(user_id, &new_session).await?;
        self.emit(AuthEvent::SignedIn {
            instance_id: self.instance_id,
            user_id: user_id.map(str::to_string),
        });

        Ok(CustomGrantOutcome::Session(new_session))
    }

    /// Run the grant parked by `replay_after_refresh`, once.
    async fn replay_custom_grant(&self, user_id: Option<&str>) {
        let stored = match self
            .store
            .get_attribute(Partition::TemporaryData, CUSTOM_GRANT_REPLAY, user_id)
            .await
        {
            Ok(Some(stored)) => stored,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Could not read parked custom grant");
                return;
            }
        };

        if let Err(e) = self
            .store
            .remove_attribute(Partition::TemporaryData, CUSTOM_GRANT_REPLAY, user_id)
            .await
        {
            warn!(error = %e, "Could not clear parked custom grant");
            return;
        }

        let mut grant: CustomGrant = match serde_json::from_value(stored) {
            Ok(grant) => grant,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable parked custom grant");
                return;
            }
        };
        grant.replay_after_refresh = false;

        if let Err(e) = self.request_custom_grant(&grant, user_id).await {
            warn!(grant_id = %grant.id, error = %e, "Custom grant replay failed");
        }
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    async fn send_grant(
        &self,
        config: &AuthClientConfig,
        endpoint: &str,
        grant: GrantRequest,
        extra: Option<&BTreeMap<String, String>>,
        bearer: Option<&str>,
    ) -> Result<HttpResponse> {
        let grant_type = grant.grant_type().to_string();
        let mut form = grant.into_form(&config.client_id, config.client_secret.as_deref());
        if let Some(extra) = extra {
            form.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let mut request = HttpRequest::new(HttpMethod::Post, endpoint)
            .header("Accept", "application/json")
            .with_credentials(config.send_cookies_in_requests)
            .form(&form)
            .map_err(|e| AuthError::Configuration(format!("cannot encode token request: {e}")))?;
        if let Some(token) = bearer {
            request = request.bearer_token(token);
        }

        debug!(grant_type = %grant_type, "Sending token request");

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if !response.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(
                status = response.status,
                grant_type = %grant_type,
                error = %body,
                "Token request rejected"
            );
            return Err(AuthError::TokenRequestFailed {
                status: response.status,
                body,
            });
        }

        Ok(response)
    }
}

fn parse_token_response(response: &HttpResponse) -> Result<TokenResponse> {
    response
        .json::<TokenResponse>()
        .map_err(|e| AuthError::TokenRequestFailed {
            status: response.status,
            body: format!("unreadable token response: {e}"),
        })
}

impl fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthClient")
            .field("instance_id", &self.instance_id)
            .field("client_id", &self.store.client_id())
            .field("events", &self.events.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_form_order() {
        let form = GrantRequest::AuthorizationCode {
            code: "abc".into(),
            redirect_uri: "https://app/cb".into(),
            code_verifier: Some("v".into()),
        }
        .into_form("c1", Some("s"));

        let keys: Vec<&str> = form.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "grant_type",
                "code",
                "redirect_uri",
                "client_id",
                "client_secret",
                "code_verifier"
            ]
        );
    }

    #[test]
    fn test_refresh_form_without_secret() {
        let form = GrantRequest::RefreshToken {
            refresh_token: "rt".into(),
        }
        .into_form("c1", None);

        assert_eq!(
            form,
            vec![
                ("grant_type".to_string(), "refresh_token".to_string()),
                ("refresh_token".to_string(), "rt".to_string()),
                ("client_id".to_string(), "c1".to_string()),
            ]
        );
    }

    #[test]
    fn test_custom_grant_type() {
        let mut params = BTreeMap::new();
        params.insert(
            "grant_type".to_string(),
            "urn:ietf:params:oauth:grant-type:token-exchange".to_string(),
        );
        let grant = GrantRequest::Custom { params };
        assert_eq!(
            grant.grant_type(),
            "urn:ietf:params:oauth:grant-type:token-exchange"
        );
    }

    #[test]
    fn test_grant_debug_is_redacted() {
        let debug = format!(
            "{:?}",
            GrantRequest::RefreshToken {
                refresh_token: "super-secret".into()
            }
        );
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn test_sign_out_classification() {
        assert!(AuthClient::is_sign_out_successful(
            "https://app/cb?state=sign_out_success"
        ));
        assert!(!AuthClient::did_sign_out_fail(
            "https://app/cb?state=sign_out_success"
        ));

        let failed = "https://app/cb?state=sign_out_success&error=access_denied";
        assert!(!AuthClient::is_sign_out_successful(failed));
        assert!(AuthClient::did_sign_out_fail(failed));

        assert!(!AuthClient::is_sign_out_successful("https://app/cb?state=other"));
        assert!(!AuthClient::did_sign_out_fail("not a url"));
    }
}
