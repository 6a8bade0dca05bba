//! Shared fakes for the auth integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::frame::{FrameHost, FrameSession};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::time::Clock;
use chrono::{DateTime, TimeZone, Utc};
use core_auth::{AuthClient, AuthClientConfig, IdTokenValidation, MemoryStore};
use futures::channel::mpsc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BASE_URL: &str = "https://idp.example";
pub const AUTHORIZE_URL: &str = "https://idp.example/oauth2/authorize";
pub const TOKEN_URL: &str = "https://idp.example/oauth2/token";
pub const REVOKE_URL: &str = "https://idp.example/oauth2/revoke";
pub const JWKS_URL: &str = "https://idp.example/oauth2/jwks";
pub const LOGOUT_URL: &str = "https://idp.example/oidc/logout";
pub const API_URL: &str = "https://api.example/me";
pub const REDIRECT_URL: &str = "https://app/cb";

pub const JWT_SECRET: &[u8] = b"integration-test-hmac-secret-0123456789";

type Handler = dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync;

/// HTTP client answering from a closure and logging every request.
pub struct ScriptedHttp {
    handler: Box<Handler>,
    delays: Vec<(String, Duration)>,
    failures: Mutex<Vec<String>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttp {
    pub fn new(handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            delays: Vec::new(),
            failures: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Hold responses for `url` back by `delay`.
    pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.push((url.to_string(), delay));
        self
    }

    /// Fail the next request to `url` at the transport level.
    pub fn with_failure_once(self, url: &str) -> Self {
        self.failures.lock().unwrap().push(url.to_string());
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url == url)
            .collect()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let delay = self
            .delays
            .iter()
            .find(|(url, _)| *url == request.url)
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut failures = self.failures.lock().unwrap();
        if let Some(pos) = failures.iter().position(|url| *url == request.url) {
            failures.remove(pos);
            return Err(BridgeError::OperationFailed("connection reset".to_string()));
        }
        drop(failures);

        Ok((self.handler)(&request))
    }
}

/// Decoded `application/x-www-form-urlencoded` body.
pub fn form(request: &HttpRequest) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(request.body.as_deref().unwrap_or_default())
        .into_owned()
        .collect()
}

pub fn query(url: &str) -> BTreeMap<String, String> {
    url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .into_owned()
        .collect()
}

pub fn token_response(
    access_token: &str,
    refresh_token: Option<&str>,
    id_token: Option<&str>,
) -> HttpResponse {
    let mut body = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 3600,
        "scope": "openid profile",
    });
    if let Some(refresh_token) = refresh_token {
        body["refresh_token"] = json!(refresh_token);
    }
    if let Some(id_token) = id_token {
        body["id_token"] = json!(id_token);
    }
    HttpResponse::new(200, body.to_string())
}

pub fn jwks_response() -> HttpResponse {
    let body = json!({
        "keys": [{
            "kty": "oct",
            "kid": "k1",
            "alg": "HS256",
            "k": URL_SAFE_NO_PAD.encode(JWT_SECRET),
        }]
    });
    HttpResponse::new(200, body.to_string())
}

/// HS256 ID token signed with [`JWT_SECRET`] under kid `k1`.
pub fn id_token(sub: &str, audience: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = json!({
        "sub": sub,
        "aud": audience,
        "iss": TOKEN_URL,
        "iat": now,
        "exp": now + 3600,
        "email": "alice@example.com",
        "username": "alice@acme.example@carbon.super",
    });

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("k1".to_string());
    encode(&header, &claims, &EncodingKey::from_secret(JWT_SECRET)).unwrap()
}

pub fn config() -> AuthClientConfig {
    AuthClientConfig::new("c1", REDIRECT_URL)
        .with_base_url(BASE_URL)
        .with_scopes(["openid", "profile"])
        .with_id_token_validation(IdTokenValidation {
            validate: false,
            ..Default::default()
        })
}

/// Initialized client over a fresh in-memory store.
pub async fn client(http: Arc<ScriptedHttp>) -> (Arc<AuthClient>, Arc<MemoryStore>) {
    client_with(http, config()).await
}

pub async fn client_with(
    http: Arc<ScriptedHttp>,
    config: AuthClientConfig,
) -> (Arc<AuthClient>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let client = AuthClient::builder(config, http, store.clone())
        .build()
        .unwrap();
    client.initialize(false).await.unwrap();
    (Arc::new(client), store)
}

/// Clock that only moves when told to.
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn at(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
            .unwrap()
    }
}

/// Frame host that records opened URLs and optionally answers right away.
#[derive(Default)]
pub struct ScriptedFrames {
    reply: Option<String>,
    opened: Mutex<Vec<String>>,
    sender: Mutex<Option<mpsc::UnboundedSender<String>>>,
    teardowns: Arc<AtomicUsize>,
}

impl ScriptedFrames {
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn replying(message: impl Into<String>) -> Self {
        Self {
            reply: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    /// Post into the last opened frame. `false` once it has been torn down.
    pub fn post(&self, message: &str) -> bool {
        match self.sender.lock().unwrap().as_ref() {
            Some(tx) => tx.unbounded_send(message.to_string()).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl FrameHost for ScriptedFrames {
    async fn open(&self, url: &str) -> BridgeResult<FrameSession> {
        self.opened.lock().unwrap().push(url.to_string());

        let (tx, rx) = mpsc::unbounded();
        if let Some(reply) = &self.reply {
            tx.unbounded_send(reply.clone()).unwrap();
        }
        *self.sender.lock().unwrap() = Some(tx);

        let teardowns = Arc::clone(&self.teardowns);
        Ok(FrameSession::new(
            rx,
            Box::new(move || {
                teardowns.fetch_add(1, Ordering::SeqCst);
            }),
        ))
    }
}
