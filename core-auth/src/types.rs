use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::ResponseMode;

/// Tokens and metadata for one signed-in user.
///
/// Created by a successful token exchange, overwritten in place by refresh,
/// and deleted on sign-out or revocation.
///
/// # Security
///
/// Tokens must never be logged. The `Debug` implementation redacts them.
///
/// # Examples
///
/// ```
/// use core_auth::SessionData;
///
/// let session = SessionData {
///     access_token: "at".to_string(),
///     refresh_token: None,
///     id_token: None,
///     scope: "openid".to_string(),
///     expires_in: 3600,
///     created_at: 1_000_000,
///     session_state: None,
///     token_type: "Bearer".to_string(),
/// };
///
/// assert!(session.is_fresh(1_000_000));
/// assert!(!session.is_fresh(1_000_000 + 3_600_000));
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    /// Epoch milliseconds at which the tokens were received.
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_state: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

impl SessionData {
    pub fn from_token_response(response: TokenResponse, created_at: i64) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            id_token: response.id_token,
            scope: response.scope,
            expires_in: response.expires_in,
            created_at,
            session_state: None,
            token_type: response.token_type,
        }
    }

    /// Epoch milliseconds at which the access token stops being valid.
    pub fn expires_at(&self) -> i64 {
        let lifetime_ms = i64::try_from(self.expires_in)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        self.created_at.saturating_add(lifetime_ms)
    }

    /// The access token is non-empty and expires strictly after `now_ms`.
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        !self.access_token.is_empty() && self.expires_at() > now_ms
    }
}

impl fmt::Debug for SessionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionData")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("created_at", &self.created_at)
            .field("session_state", &self.session_state)
            .field("token_type", &self.token_type)
            .finish()
    }
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn default_expires_in() -> u64 {
    3600
}

/// JSON body returned by the token endpoint.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(
        default = "default_expires_in",
        deserialize_with = "deserialize_expires_in"
    )]
    pub expires_in: u64,
    #[serde(default)]
    pub scope: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_id_token", &self.id_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Some providers send `expires_in` as a string.
fn deserialize_expires_in<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Endpoint URLs of the identity provider, discovered or configured.
///
/// Field names follow the OpenID Connect discovery document, so a
/// `.well-known/openid-configuration` response deserializes directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcProviderMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_session_iframe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
}

impl OidcProviderMetadata {
    /// Replace every field that is set in `overrides`.
    pub fn overlay(&mut self, overrides: &OidcProviderMetadata) {
        fn pick(target: &mut Option<String>, source: &Option<String>) {
            if source.is_some() {
                target.clone_from(source);
            }
        }

        pick(&mut self.issuer, &overrides.issuer);
        pick(
            &mut self.authorization_endpoint,
            &overrides.authorization_endpoint,
        );
        pick(&mut self.token_endpoint, &overrides.token_endpoint);
        pick(&mut self.end_session_endpoint, &overrides.end_session_endpoint);
        pick(&mut self.jwks_uri, &overrides.jwks_uri);
        pick(&mut self.revocation_endpoint, &overrides.revocation_endpoint);
        pick(
            &mut self.introspection_endpoint,
            &overrides.introspection_endpoint,
        );
        pick(&mut self.check_session_iframe, &overrides.check_session_iframe);
        pick(&mut self.userinfo_endpoint, &overrides.userinfo_endpoint);
    }

    pub fn is_empty(&self) -> bool {
        self == &OidcProviderMetadata::default()
    }
}

/// Per-call options for
/// [`AuthClient::build_authorization_url`](crate::AuthClient::build_authorization_url).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationParams {
    /// Overrides the default `instance_{id}-{client_id}` state.
    pub state: Option<String>,
    pub prompt: Option<String>,
    /// Overrides the configured response mode for this request.
    pub response_mode: Option<ResponseMode>,
    /// Federated IdP hint.
    pub fidp: Option<String>,
    pub requested_actor: Option<String>,
    /// Appended verbatim after the standard parameters.
    pub extra: BTreeMap<String, String>,
}

impl AuthorizationParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_response_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = Some(mode);
        self
    }

    pub fn with_fidp(mut self, fidp: impl Into<String>) -> Self {
        self.fidp = Some(fidp.into());
        self
    }

    pub fn with_requested_actor(mut self, actor: impl Into<String>) -> Self {
        self.requested_actor = Some(actor.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Claims carried by an ID token.
///
/// Standard claims are typed; everything else lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default)]
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// A single client id or an array of them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl IdTokenClaims {
    /// Login name, falling back from `username` to `preferred_username` to `sub`.
    pub fn login_name(&self) -> &str {
        self.username
            .as_deref()
            .or(self.preferred_username.as_deref())
            .unwrap_or(&self.sub)
    }

    /// Tenant suffix of a multi-tenant subject (`alice@example.com@tenant`).
    ///
    /// A subject with a single `@` is an email address, not a tenant-qualified
    /// name, and yields `None`.
    pub fn tenant_domain(&self) -> Option<String> {
        let parts: Vec<&str> = self.sub.split('@').collect();
        if parts.len() > 2 {
            parts.last().map(|s| s.to_string())
        } else {
            None
        }
    }
}

/// Display-friendly view of the signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicUserInfo {
    pub sub: String,
    pub username: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub tenant_domain: Option<String>,
    pub session_state: Option<String>,
    pub allowed_scopes: String,
}

impl BasicUserInfo {
    pub fn from_claims(claims: &IdTokenClaims, session: &SessionData) -> Self {
        Self {
            sub: claims.sub.clone(),
            username: claims.login_name().to_string(),
            email: claims.email.clone(),
            display_name: claims
                .preferred_username
                .clone()
                .or_else(|| claims.name.clone()),
            tenant_domain: claims.tenant_domain(),
            session_state: session.session_state.clone(),
            allowed_scopes: session.scope.clone(),
        }
    }
}

/// A non-standard grant posted to the token endpoint.
///
/// Values in `data` may contain the placeholders `{{token}}`,
/// `{{username}}`, `{{scope}}`, `{{clientId}}` and `{{clientSecret}}`,
/// substituted before the request is sent.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomGrant {
    pub id: String,
    pub data: BTreeMap<String, String>,
    /// Defaults to the discovered token endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    /// Send the current access token as a bearer header.
    #[serde(default)]
    pub attach_token: bool,
    /// Persist the response as the new session.
    #[serde(default)]
    pub returns_session: bool,
    /// Fail fast when there is no fresh session.
    #[serde(default)]
    pub sign_in_required: bool,
    /// Run this grant once more after the next successful refresh.
    #[serde(default)]
    pub replay_after_refresh: bool,
}

impl CustomGrant {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: BTreeMap::new(),
            token_endpoint: None,
            attach_token: false,
            returns_session: false,
            sign_in_required: false,
            replay_after_refresh: false,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = Some(endpoint.into());
        self
    }

    pub fn attaching_token(mut self) -> Self {
        self.attach_token = true;
        self
    }

    pub fn returning_session(mut self) -> Self {
        self.returns_session = true;
        self
    }

    pub fn requiring_sign_in(mut self) -> Self {
        self.sign_in_required = true;
        self
    }

    pub fn replaying_after_refresh(mut self) -> Self {
        self.replay_after_refresh = true;
        self
    }
}

impl fmt::Debug for CustomGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomGrant")
            .field("id", &self.id)
            .field("params", &self.data.keys().collect::<Vec<_>>())
            .field("token_endpoint", &self.token_endpoint)
            .field("attach_token", &self.attach_token)
            .field("returns_session", &self.returns_session)
            .field("sign_in_required", &self.sign_in_required)
            .field("replay_after_refresh", &self.replay_after_refresh)
            .finish()
    }
}

/// Result of [`AuthClient::request_custom_grant`](crate::AuthClient::request_custom_grant).
#[derive(Debug, Clone, PartialEq)]
pub enum CustomGrantOutcome {
    /// The response was stored as the current session.
    Session(SessionData),
    /// Raw JSON body for grants that do not produce a session.
    Response(serde_json::Value),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_in: u64, created_at: i64) -> SessionData {
        SessionData {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            id_token: None,
            scope: "openid".to_string(),
            expires_in,
            created_at,
            session_state: None,
            token_type: "Bearer".to_string(),
        }
    }

    #[test]
    fn test_freshness_boundary() {
        let session = session(60, 1_000);

        assert!(session.is_fresh(1_000 + 59_999));
        // Expiry exactly at `now` is stale.
        assert!(!session.is_fresh(1_000 + 60_000));
        assert!(!session.is_fresh(1_000 + 60_001));
    }

    #[test]
    fn test_empty_access_token_is_never_fresh() {
        let mut session = session(3600, 0);
        session.access_token.clear();
        assert!(!session.is_fresh(0));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let debug = format!("{:?}", session(3600, 0));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("\"at\""));
        assert!(!debug.contains("rt"));
    }

    #[test]
    fn test_token_response_accepts_string_expiry() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"a","expires_in":"120","token_type":"Bearer"}"#,
        )
        .unwrap();
        assert_eq!(response.expires_in, 120);
        assert_eq!(response.scope, "");
    }

    #[test]
    fn test_token_response_defaults() {
        let response: TokenResponse = serde_json::from_str(r#"{"access_token":"a"}"#).unwrap();
        assert_eq!(response.expires_in, 3600);
        assert_eq!(response.token_type, "Bearer");
        assert!(response.refresh_token.is_none());
    }

    #[test]
    fn test_metadata_overlay_only_replaces_set_fields() {
        let mut discovered = OidcProviderMetadata {
            authorization_endpoint: Some("https://idp/authorize".into()),
            token_endpoint: Some("https://idp/token".into()),
            ..Default::default()
        };
        let overrides = OidcProviderMetadata {
            token_endpoint: Some("https://proxy/token".into()),
            ..Default::default()
        };

        discovered.overlay(&overrides);

        assert_eq!(
            discovered.authorization_endpoint.as_deref(),
            Some("https://idp/authorize")
        );
        assert_eq!(
            discovered.token_endpoint.as_deref(),
            Some("https://proxy/token")
        );
    }

    #[test]
    fn test_tenant_domain_extraction() {
        let claims = IdTokenClaims {
            sub: "alice@example.com@acme".into(),
            ..Default::default()
        };
        assert_eq!(claims.tenant_domain().as_deref(), Some("acme"));

        let claims = IdTokenClaims {
            sub: "alice@example.com".into(),
            ..Default::default()
        };
        assert_eq!(claims.tenant_domain(), None);
    }

    #[test]
    fn test_claims_keep_unknown_fields() {
        let claims: IdTokenClaims = serde_json::from_str(
            r#"{"sub":"u1","aud":["c1","c2"],"org_id":"o-42","preferred_username":"alice"}"#,
        )
        .unwrap();

        assert_eq!(claims.login_name(), "alice");
        assert_eq!(claims.extra.get("org_id").unwrap(), "o-42");
    }

    #[test]
    fn test_custom_grant_debug_hides_values() {
        let grant = CustomGrant::new("exchange").with_param("subject_token", "{{token}}");
        let debug = format!("{grant:?}");
        assert!(debug.contains("subject_token"));
        assert!(!debug.contains("{{token}}"));
    }
}
