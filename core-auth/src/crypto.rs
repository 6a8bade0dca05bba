//! PKCE and JWT primitives.
//!
//! [`CryptoProvider`] is the seam hosts can swap (hardware-backed RNG, a
//! platform JOSE library). [`DefaultCryptoProvider`] covers RFC 7636 S256
//! challenges and ID token verification against a JWKS with `jsonwebtoken`.
//!
//! # Security
//!
//! - Verifiers come from the OS CSPRNG and are never logged
//! - A token is only checked against the key its header `kid` names
//! - The header algorithm must match the key's algorithm, so an HMAC token
//!   cannot be verified with an RSA public key as the secret

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bridge_traits::platform::PlatformSendSync;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{AuthError, Result};

/// Code challenge method sent with every PKCE authorization request.
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// One entry of a JSON Web Key Set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    // RSA fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    // EC fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    // Symmetric key material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
}

impl Jwk {
    /// Determine the JWT algorithm for this key.
    pub fn algorithm(&self) -> Algorithm {
        if let Some(alg) = &self.alg {
            match alg.as_str() {
                "RS256" => return Algorithm::RS256,
                "RS384" => return Algorithm::RS384,
                "RS512" => return Algorithm::RS512,
                "PS256" => return Algorithm::PS256,
                "PS384" => return Algorithm::PS384,
                "PS512" => return Algorithm::PS512,
                "ES256" => return Algorithm::ES256,
                "ES384" => return Algorithm::ES384,
                "HS256" => return Algorithm::HS256,
                "HS384" => return Algorithm::HS384,
                "HS512" => return Algorithm::HS512,
                "EdDSA" => return Algorithm::EdDSA,
                _ => {}
            }
        }
        // Default based on key type.
        match self.kty.as_str() {
            "EC" => match self.crv.as_deref() {
                Some("P-384") => Algorithm::ES384,
                _ => Algorithm::ES256,
            },
            "OKP" => Algorithm::EdDSA,
            "oct" => Algorithm::HS256,
            _ => Algorithm::RS256,
        }
    }

    fn decoding_key(&self) -> Result<DecodingKey> {
        let missing =
            |field: &str| AuthError::Decode(format!("{} JWK is missing '{field}'", self.kty));

        match self.kty.as_str() {
            "RSA" => {
                let n = self.n.as_deref().ok_or_else(|| missing("n"))?;
                let e = self.e.as_deref().ok_or_else(|| missing("e"))?;
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| AuthError::Decode(format!("Invalid RSA JWK: {e}")))
            }
            "EC" => {
                let x = self.x.as_deref().ok_or_else(|| missing("x"))?;
                let y = self.y.as_deref().ok_or_else(|| missing("y"))?;
                DecodingKey::from_ec_components(x, y)
                    .map_err(|e| AuthError::Decode(format!("Invalid EC JWK: {e}")))
            }
            "OKP" => {
                let x = self.x.as_deref().ok_or_else(|| missing("x"))?;
                DecodingKey::from_ed_components(x)
                    .map_err(|e| AuthError::Decode(format!("Invalid OKP JWK: {e}")))
            }
            "oct" => {
                let k = self.k.as_deref().ok_or_else(|| missing("k"))?;
                let secret = URL_SAFE_NO_PAD
                    .decode(k.trim_end_matches('='))
                    .map_err(|e| AuthError::Decode(format!("Invalid oct JWK: {e}")))?;
                Ok(DecodingKey::from_secret(&secret))
            }
            other => Err(AuthError::Decode(format!("Unsupported key type '{other}'"))),
        }
    }
}

/// A JSON Web Key Set as served from `jwks_uri`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Key named by `kid`. Without a `kid`, only an unambiguous single-key
    /// set matches.
    pub fn find(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self.keys.iter().find(|k| k.kid.as_deref() == Some(kid)),
            None if self.keys.len() == 1 => self.keys.first(),
            None => None,
        }
    }
}

/// Inputs to [`CryptoProvider::verify_jwt`].
#[derive(Debug, Clone, Copy)]
pub struct JwtVerification<'a> {
    pub token: &'a str,
    pub jwks: &'a JwkSet,
    /// Accepted header algorithms. Empty accepts whatever the key declares.
    pub algorithms: &'a [Algorithm],
    /// Expected `aud`, normally the client id.
    pub audience: &'a str,
    pub issuer: Option<&'a str>,
    pub subject: Option<&'a str>,
    /// Leeway in seconds for `exp` and `nbf`.
    pub clock_tolerance: u64,
    pub validate_issuer: bool,
}

/// PKCE and JWT operations used by the token lifecycle.
pub trait CryptoProvider: PlatformSendSync {
    /// Fresh base64url code verifier from 32 random bytes.
    fn code_verifier(&self) -> String;

    /// `BASE64URL(SHA256(verifier))`.
    fn code_challenge(&self, verifier: &str) -> String;

    /// Decode the payload segment without checking the signature.
    fn decode_jwt(&self, token: &str) -> Result<serde_json::Value>;

    /// Verify signature and standard claims.
    ///
    /// `Ok(false)` means the token is well formed but fails verification.
    /// Malformed headers and unknown key ids are errors.
    fn verify_jwt(&self, params: &JwtVerification<'_>) -> Result<bool>;
}

/// Default implementation backed by `rand`, `sha2` and `jsonwebtoken`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCryptoProvider;

impl CryptoProvider for DefaultCryptoProvider {
    fn code_verifier(&self) -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn code_challenge(&self, verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    fn decode_jwt(&self, token: &str) -> Result<serde_json::Value> {
        let payload = token
            .split('.')
            .nth(1)
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| AuthError::Decode("token has no payload segment".into()))?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AuthError::Decode(format!("payload is not base64url: {e}")))?;

        let claims: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| AuthError::Decode(format!("payload is not JSON: {e}")))?;

        if !claims.is_object() {
            return Err(AuthError::Decode("payload is not a JSON object".into()));
        }

        Ok(claims)
    }

    fn verify_jwt(&self, params: &JwtVerification<'_>) -> Result<bool> {
        let header = decode_header(params.token)
            .map_err(|e| AuthError::Decode(format!("Invalid JWT header: {e}")))?;

        let jwk = params
            .jwks
            .find(header.kid.as_deref())
            .ok_or_else(|| AuthError::KeyNotFound {
                kid: header.kid.clone().unwrap_or_default(),
            })?;

        let key_alg = jwk.algorithm();
        if header.alg != key_alg {
            debug!(
                header_alg = ?header.alg,
                key_alg = ?key_alg,
                "JWT algorithm does not match key"
            );
            return Ok(false);
        }
        if !params.algorithms.is_empty() && !params.algorithms.contains(&header.alg) {
            debug!(alg = ?header.alg, "JWT algorithm not accepted");
            return Ok(false);
        }

        let key = jwk.decoding_key()?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = params.clock_tolerance;
        validation.validate_nbf = true;
        validation.set_audience(&[params.audience]);
        if params.validate_issuer {
            if let Some(issuer) = params.issuer {
                validation.set_issuer(&[issuer]);
            }
        }
        validation.sub = params.subject.map(str::to_string);

        match decode::<serde_json::Value>(params.token, &key, &validation) {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!(error = %e, "JWT verification failed");
                Ok(false)
            }
        }
    }
}

/// Decode a JWT payload into a typed claims struct.
pub fn decode_claims<T: DeserializeOwned>(
    crypto: &dyn CryptoProvider,
    token: &str,
) -> Result<T> {
    let value = crypto.decode_jwt(token)?;
    serde_json::from_value(value).map_err(|e| AuthError::Decode(format!("unexpected claims: {e}")))
}
