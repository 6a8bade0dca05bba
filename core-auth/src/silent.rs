//! Prompt-less sign-in through a hidden frame.
//!
//! ```text
//! Idle ──try_sign_in──▶ AwaitingResponse ──┬─ check_session_signed_in ──▶ SignedIn
//!                                          ├─ check_session_signed_out ─▶ SignedOut
//!                                          └─ deadline ─────────────────▶ TimedOut
//! ```
//!
//! The authorization URL is built with `prompt=none`, `response_mode=query`
//! and `state=silent_sign_in`. The callback page inside the frame turns its
//! own URL into a message with [`build_silent_sign_in_callback_message`] and
//! posts it to the parent. The frame and its listener are torn down before
//! the outcome is acted upon, so a message arriving after the deadline has
//! nowhere to go.

use core_async::time::{timeout, Duration};
use core_runtime::events::{AuthEvent, SilentOutcome};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument};
use url::Url;

use bridge_traits::frame::FrameHost;

use crate::client::AuthClient;
use crate::config::ResponseMode;
use crate::error::{AuthError, Result};
use crate::types::AuthorizationParams;

/// `state` carried by every silent authorization request.
pub const SILENT_SIGN_IN_STATE: &str = "silent_sign_in";

pub const DEFAULT_SILENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilentState {
    Idle,
    AwaitingResponse,
    SignedIn,
    SignedOut,
    TimedOut,
}

/// Message posted from the callback frame to its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SilentSignInMessage {
    #[serde(rename = "check_session_signed_in")]
    SignedIn(SignedInPayload),
    #[serde(rename = "check_session_signed_out")]
    SignedOut,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedInPayload {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl fmt::Debug for SignedInPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedInPayload")
            .field("code", &"[REDACTED]")
            .field("session_state", &self.session_state)
            .field("state", &self.state)
            .finish()
    }
}

/// Turn the callback URL loaded inside the frame into the JSON message the
/// frame posts to its parent. A URL without `code` reports signed-out.
pub fn build_silent_sign_in_callback_message(url: &str) -> Result<String> {
    let url = Url::parse(url)
        .map_err(|e| AuthError::Configuration(format!("invalid callback URL: {e}")))?;
    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };

    let message = match param("code") {
        Some(code) => SilentSignInMessage::SignedIn(SignedInPayload {
            code,
            session_state: param("session_state"),
            state: param("state"),
        }),
        None => SilentSignInMessage::SignedOut,
    };

    Ok(serde_json::to_string(&message)?)
}

/// Marks an attempt as in flight. The state returns to `Idle` when the
/// attempt is dropped before it settles.
struct AttemptGuard<'a> {
    state: &'a Mutex<SilentState>,
    settled: Option<SilentState>,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.settled.is_none() {
            debug!("Silent sign-in abandoned");
        }
        *lock(self.state) = self.settled.unwrap_or(SilentState::Idle);
    }
}

fn lock(state: &Mutex<SilentState>) -> MutexGuard<'_, SilentState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SilentAuthenticator {
    client: Arc<AuthClient>,
    frames: Arc<dyn FrameHost>,
    timeout: Duration,
    state: Mutex<SilentState>,
}

impl SilentAuthenticator {
    pub fn new(client: Arc<AuthClient>, frames: Arc<dyn FrameHost>) -> Self {
        Self {
            client,
            frames,
            timeout: DEFAULT_SILENT_TIMEOUT,
            state: Mutex::new(SilentState::Idle),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> SilentState {
        *lock(&self.state)
    }

    /// Attempt to establish a session without user interaction.
    ///
    /// Resolves `true` only when the IdP reported an active session and the
    /// code exchange succeeded. Signed-out and timed-out both resolve
    /// `false`. A second call while one is awaiting a response fails with
    /// [`AuthError::SilentSignInInProgress`].
    #[instrument(skip(self), fields(instance_id = self.client.instance_id()))]
    pub async fn try_sign_in(&self, user_id: Option<&str>) -> Result<bool> {
        let mut guard = {
            let mut state = lock(&self.state);
            if *state == SilentState::AwaitingResponse {
                return Err(AuthError::SilentSignInInProgress);
            }
            *state = SilentState::AwaitingResponse;
            AttemptGuard {
                state: &self.state,
                settled: None,
            }
        };

        let result = self.attempt(user_id).await;

        guard.settled = Some(match &result {
            Ok(outcome) => *outcome,
            Err(_) => SilentState::Idle,
        });
        drop(guard);

        let outcome = match result? {
            SilentState::SignedIn => SilentOutcome::SignedIn,
            SilentState::TimedOut => SilentOutcome::TimedOut,
            _ => SilentOutcome::SignedOut,
        };
        info!(outcome = ?outcome, "Silent sign-in finished");
        self.client.emit(AuthEvent::SilentSignIn {
            instance_id: self.client.instance_id(),
            outcome,
        });

        Ok(outcome == SilentOutcome::SignedIn)
    }

    async fn attempt(&self, user_id: Option<&str>) -> Result<SilentState> {
        let params = AuthorizationParams::new()
            .with_prompt("none")
            .with_response_mode(ResponseMode::Query)
            .with_state(SILENT_SIGN_IN_STATE);
        let url = self.client.build_authorization_url(&params, user_id).await?;

        let mut session = self.frames.open(&url).await.map_err(|e| {
            AuthError::Network(format!("could not open silent sign-in frame: {e}"))
        })?;

        let received = {
            let messages = session.messages();
            let wait = async {
                while let Some(raw) = messages.next().await {
                    match serde_json::from_str::<SilentSignInMessage>(&raw) {
                        Ok(message) => return Some(message),
                        Err(_) => debug!("Ignoring unrelated frame message"),
                    }
                }
                None
            };
            timeout(self.timeout, wait).await
        };

        // Tear down the frame before the exchange.
        drop(session);

        match received {
            Err(_) => {
                debug!(timeout = ?self.timeout, "Silent sign-in timed out");
                Ok(SilentState::TimedOut)
            }
            Ok(None) | Ok(Some(SilentSignInMessage::SignedOut)) => Ok(SilentState::SignedOut),
            Ok(Some(SilentSignInMessage::SignedIn(payload))) => {
                let state = payload.state.as_deref().unwrap_or(SILENT_SIGN_IN_STATE);
                self.client
                    .exchange_authorization_code(
                        &payload.code,
                        payload.session_state.as_deref(),
                        state,
                        user_id,
                        None,
                    )
                    .await?;
                Ok(SilentState::SignedIn)
            }
        }
    }
}

impl fmt::Debug for SilentAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SilentAuthenticator")
            .field("client", &self.client)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
