//! Workspace facade crate.
//!
//! Re-exports the auth core together with the platform bridges selected by
//! feature flags, so a host can depend on `oidc-auth-core` alone:
//!
//! - `desktop-shims` (default): reqwest HTTP client and file-backed storage
//! - `secure-store`: OS keychain storage on top of `desktop-shims`
//! - `wasm`: fetch client, web storage and hidden-iframe host for browsers

pub use bridge_traits as bridge;
pub use core_auth as auth;
pub use core_runtime as runtime;

pub use core_auth::{
    AuthClient, AuthClientConfig, AuthError, ClientRegistry, RefreshCoordinator,
    SilentAuthenticator,
};

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub use bridge_desktop as desktop;

#[cfg(all(feature = "wasm", target_arch = "wasm32"))]
pub use bridge_wasm as web;
