//! # Authentication Core
//!
//! OAuth 2.0 / OpenID Connect client core for public and confidential clients.
//!
//! ## Overview
//!
//! This crate drives the authorization-code flow against an OIDC identity
//! provider and keeps the resulting session in host-provided storage. It
//! never performs I/O itself: HTTP, storage, hidden frames and time come in
//! through the `bridge-traits` capabilities.
//!
//! ## Features
//!
//! - Endpoint discovery from `.well-known`, a base URL or explicit overrides
//! - Authorization URLs with PKCE (S256)
//! - Code exchange, refresh, revocation and sign-out URLs
//! - ID token verification against the provider JWKS
//! - Single-flight refresh for authenticated requests
//! - Prompt-less sign-in through a hidden frame
//! - Custom grants with placeholder templating
//! - Session state scoped per instance, client and user
//!
//! ## Modules
//!
//! - [`client`] - the per-instance [`AuthClient`]
//! - [`discovery`] - provider metadata resolution
//! - [`crypto`] - PKCE and JWT primitives
//! - [`store`] - partitioned credential storage
//! - [`refresh`] - [`RefreshCoordinator`]
//! - [`silent`] - [`SilentAuthenticator`]
//! - [`registry`] - [`ClientRegistry`]

pub mod client;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod refresh;
pub mod registry;
pub mod silent;
pub mod store;
pub mod types;

pub use client::{AuthClient, AuthClientBuilder, GrantRequest, SIGN_OUT_SUCCESS_STATE};
pub use config::{AuthClientConfig, IdTokenValidation, ResponseMode, TokenValidation};
pub use crypto::{CryptoProvider, DefaultCryptoProvider, JwkSet, JwtVerification};
pub use discovery::DiscoveryResolver;
pub use error::{AuthError, Result};
pub use refresh::RefreshCoordinator;
pub use registry::ClientRegistry;
pub use silent::{
    build_silent_sign_in_callback_message, SilentAuthenticator, SilentSignInMessage, SilentState,
    SILENT_SIGN_IN_STATE,
};
pub use store::{CredentialStore, MemoryStore, Partition};
pub use types::{
    AuthorizationParams, BasicUserInfo, CustomGrant, CustomGrantOutcome, IdTokenClaims,
    OidcProviderMetadata, SessionData, TokenResponse,
};
