use thiserror::Error;

/// Errors surfaced by the auth core.
///
/// Every variant maps to a stable machine-readable [`code`](AuthError::code)
/// that hosts can match on without parsing messages.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    #[error("No token endpoint is known for this client")]
    TokenEndpointMissing,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Token request failed with status {status}: {body}")]
    TokenRequestFailed { status: u16, body: String },

    #[error("Token revocation failed with status {status}: {body}")]
    RevocationFailed { status: u16, body: String },

    #[error("No refresh token found in the session")]
    NoRefreshToken,

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Failed to decode JWT: {0}")]
    Decode(String),

    #[error("No signing key matches key id '{kid}'")]
    KeyNotFound { kid: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("A silent sign-in attempt is already in progress")]
    SilentSignInInProgress,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Configuration(_) => "AUTH-CONFIG",
            AuthError::Discovery(_) => "AUTH-DISCOVERY",
            AuthError::TokenEndpointMissing => "AUTH-TOKEN-ENDPOINT-MISSING",
            AuthError::Network(_) => "AUTH-NETWORK",
            AuthError::TokenRequestFailed { .. } => "AUTH-TOKEN-REQUEST-FAILED",
            AuthError::RevocationFailed { .. } => "AUTH-REVOCATION-FAILED",
            AuthError::NoRefreshToken => "AUTH-NO-REFRESH-TOKEN",
            AuthError::TokenRefreshFailed(_) => "AUTH-TOKEN-REFRESH-FAILED",
            AuthError::Decode(_) => "AUTH-JWT-DECODE",
            AuthError::KeyNotFound { .. } => "AUTH-JWT-KEY-NOT-FOUND",
            AuthError::Storage(_) => "AUTH-STORAGE",
            AuthError::Serialization(_) => "AUTH-SERIALIZATION",
            AuthError::SilentSignInInProgress => "AUTH-SILENT-IN-PROGRESS",
        }
    }

    /// Whether repeating the same call later may succeed.
    ///
    /// Fatal errors need a configuration change or a full interactive
    /// sign-in first.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AuthError::Configuration(_)
                | AuthError::Discovery(_)
                | AuthError::TokenEndpointMissing
                | AuthError::NoRefreshToken
                | AuthError::Decode(_)
                | AuthError::KeyNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(AuthError::NoRefreshToken.code(), "AUTH-NO-REFRESH-TOKEN");
        assert_eq!(
            AuthError::TokenRequestFailed {
                status: 400,
                body: "invalid_grant".into()
            }
            .code(),
            "AUTH-TOKEN-REQUEST-FAILED"
        );
        assert_eq!(
            AuthError::KeyNotFound { kid: "k1".into() }.code(),
            "AUTH-JWT-KEY-NOT-FOUND"
        );
    }

    #[test]
    fn test_recoverability() {
        assert!(AuthError::Network("reset".into()).is_recoverable());
        assert!(AuthError::TokenRefreshFailed("boom".into()).is_recoverable());
        assert!(!AuthError::NoRefreshToken.is_recoverable());
        assert!(!AuthError::Decode("bad".into()).is_recoverable());
    }

    #[test]
    fn test_display_includes_status() {
        let err = AuthError::RevocationFailed {
            status: 503,
            body: "unavailable".into(),
        };
        assert_eq!(
            err.to_string(),
            "Token revocation failed with status 503: unavailable"
        );
    }
}
