//! Client configuration.
//!
//! `AuthClientConfig` is what a host hands to [`AuthClient`](crate::AuthClient)
//! and what the credential store persists in the config partition. It
//! serializes as camelCase JSON so stored configs stay readable by other SDKs
//! sharing the same storage.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::{AuthError, Result};
use crate::types::OidcProviderMetadata;

/// How the IdP returns the authorization response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    #[default]
    Query,
    FormPost,
    /// App-native flows that never leave the host.
    Direct,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Query => "query",
            ResponseMode::FormPost => "form_post",
            ResponseMode::Direct => "direct",
        }
    }
}

/// ID token checks run after every code exchange and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTokenValidation {
    /// Leeway in seconds applied to `exp` and `nbf`.
    #[serde(default = "default_clock_tolerance")]
    pub clock_tolerance: u64,
    #[serde(default = "default_true")]
    pub validate: bool,
    #[serde(default = "default_true")]
    pub validate_issuer: bool,
}

impl Default for IdTokenValidation {
    fn default() -> Self {
        Self {
            clock_tolerance: default_clock_tolerance(),
            validate: true,
            validate_issuer: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenValidation {
    #[serde(default)]
    pub id_token: IdTokenValidation,
}

/// Configuration for one auth client instance.
///
/// Endpoint resolution uses the first source present, in order:
/// `well_known_endpoint`, then `base_url`, then `endpoints`. Any field set in
/// `endpoints` overrides the resolved value.
///
/// # Examples
///
/// ```
/// use core_auth::AuthClientConfig;
///
/// let config = AuthClientConfig::new("my-client", "https://app.example.com/callback")
///     .with_base_url("https://idp.example.com")
///     .with_scopes(["openid", "profile"]);
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.scope_string(), "openid profile");
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthClientConfig {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub well_known_endpoint: Option<String>,
    /// Explicit endpoint overrides.
    #[serde(default, skip_serializing_if = "OidcProviderMetadata::is_empty")]
    pub endpoints: OidcProviderMetadata,
    /// Redirect URI registered with the IdP.
    pub after_sign_in_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_sign_out_url: Option<String>,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_true")]
    pub enable_pkce: bool,
    #[serde(default)]
    pub response_mode: ResponseMode,
    #[serde(default)]
    pub send_cookies_in_requests: bool,
    #[serde(default = "default_true")]
    pub send_id_token_in_logout_request: bool,
    #[serde(default)]
    pub token_validation: TokenValidation,
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_clock_tolerance() -> u64 {
    300
}

impl AuthClientConfig {
    pub fn new(client_id: impl Into<String>, after_sign_in_url: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            base_url: None,
            well_known_endpoint: None,
            endpoints: OidcProviderMetadata::default(),
            after_sign_in_url: after_sign_in_url.into(),
            after_sign_out_url: None,
            scopes: default_scopes(),
            enable_pkce: true,
            response_mode: ResponseMode::default(),
            send_cookies_in_requests: false,
            send_id_token_in_logout_request: true,
            token_validation: TokenValidation::default(),
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_well_known_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.well_known_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_endpoints(mut self, endpoints: OidcProviderMetadata) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_after_sign_out_url(mut self, url: impl Into<String>) -> Self {
        self.after_sign_out_url = Some(url.into());
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pkce(mut self, enabled: bool) -> Self {
        self.enable_pkce = enabled;
        self
    }

    pub fn with_response_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = mode;
        self
    }

    pub fn with_cookies_in_requests(mut self, enabled: bool) -> Self {
        self.send_cookies_in_requests = enabled;
        self
    }

    pub fn with_id_token_hint_on_logout(mut self, enabled: bool) -> Self {
        self.send_id_token_in_logout_request = enabled;
        self
    }

    pub fn with_id_token_validation(mut self, validation: IdTokenValidation) -> Self {
        self.token_validation.id_token = validation;
        self
    }

    /// Check that the config can drive a sign-in at all.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Configuration("client_id is required".into()));
        }

        Url::parse(&self.after_sign_in_url).map_err(|e| {
            AuthError::Configuration(format!("after_sign_in_url is not a valid URL: {e}"))
        })?;

        if let Some(url) = &self.after_sign_out_url {
            Url::parse(url).map_err(|e| {
                AuthError::Configuration(format!("after_sign_out_url is not a valid URL: {e}"))
            })?;
        }

        for (name, value) in [
            ("base_url", &self.base_url),
            ("well_known_endpoint", &self.well_known_endpoint),
        ] {
            if let Some(value) = value {
                Url::parse(value).map_err(|e| {
                    AuthError::Configuration(format!("{name} is not a valid URL: {e}"))
                })?;
            }
        }

        if self.base_url.is_none()
            && self.well_known_endpoint.is_none()
            && self.endpoints.authorization_endpoint.is_none()
        {
            return Err(AuthError::Configuration(
                "one of base_url, well_known_endpoint or an authorization endpoint is required"
                    .into(),
            ));
        }

        Ok(())
    }

    /// Space-separated scopes, with `openid` always first.
    pub fn scope_string(&self) -> String {
        let mut scopes: Vec<&str> = vec!["openid"];
        scopes.extend(
            self.scopes
                .iter()
                .map(String::as_str)
                .filter(|s| *s != "openid" && !s.is_empty()),
        );
        scopes.join(" ")
    }

    /// Where the IdP sends the browser after logout.
    pub fn sign_out_redirect_url(&self) -> &str {
        self.after_sign_out_url
            .as_deref()
            .unwrap_or(&self.after_sign_in_url)
    }
}

impl fmt::Debug for AuthClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthClientConfig")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("base_url", &self.base_url)
            .field("well_known_endpoint", &self.well_known_endpoint)
            .field("endpoints", &self.endpoints)
            .field("after_sign_in_url", &self.after_sign_in_url)
            .field("after_sign_out_url", &self.after_sign_out_url)
            .field("scopes", &self.scopes)
            .field("enable_pkce", &self.enable_pkce)
            .field("response_mode", &self.response_mode)
            .field("send_cookies_in_requests", &self.send_cookies_in_requests)
            .field(
                "send_id_token_in_logout_request",
                &self.send_id_token_in_logout_request,
            )
            .field("token_validation", &self.token_validation)
            .finish()
    }
}
