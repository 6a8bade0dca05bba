//! Single-flight token refresh for authenticated requests.
//!
//! [`RefreshCoordinator::send`] attaches the stored access token to a
//! request. When the response is a 401 (or the request fails at the network
//! level) it triggers at most one refresh per client instance: the first
//! caller performs it, later callers park on a oneshot channel and are woken
//! with the outcome. A leader that is cancelled mid-refresh frees the slot
//! and wakes its waiters with a failure. Every caller retries its request once after a
//! successful refresh and never more.

use bridge_traits::http::{HttpRequest, HttpResponse};
use core_async::sync::oneshot;
use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, instrument, warn};

use crate::client::AuthClient;
use crate::error::{AuthError, Result};

type Outcome = std::result::Result<(), String>;
type Waiter = oneshot::Sender<Outcome>;

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    /// Bumped after every successful refresh.
    generation: u64,
    waiters: VecDeque<Waiter>,
}

/// Held by the caller performing a refresh. Dropping it, including when the
/// caller's future is cancelled mid-refresh, releases the slot and settles
/// every parked waiter.
struct LeaderGuard<'a> {
    state: &'a Mutex<RefreshState>,
    outcome: Option<Outcome>,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        let waiters = {
            let mut state = lock(self.state);
            state.refreshing = false;
            if matches!(self.outcome, Some(Ok(()))) {
                state.generation = state.generation.wrapping_add(1);
            }
            mem::take(&mut state.waiters)
        };

        match &self.outcome {
            // Dropping the senders wakes waiters with "abandoned".
            None => {
                if !waiters.is_empty() {
                    warn!(waiters = waiters.len(), "Refresh abandoned");
                }
            }
            Some(outcome) => {
                if let Err(reason) = outcome {
                    warn!(waiters = waiters.len(), error = %reason, "Refresh failed");
                }
                for waiter in waiters {
                    // A waiter that gave up has dropped its receiver.
                    let _ = waiter.send(outcome.clone());
                }
            }
        }
    }
}

fn lock(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RefreshCoordinator {
    client: Arc<AuthClient>,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(client: Arc<AuthClient>) -> Self {
        Self {
            client,
            state: Mutex::new(RefreshState::default()),
        }
    }

    pub fn client(&self) -> &Arc<AuthClient> {
        &self.client
    }

    /// Number of callers parked behind an in-flight refresh.
    pub fn waiting(&self) -> usize {
        lock(&self.state).waiters.len()
    }

    /// Whether a refresh is currently running.
    pub fn is_refreshing(&self) -> bool {
        lock(&self.state).refreshing
    }

    /// Send `request` with the current access token, refreshing once on 401.
    ///
    /// Non-401 error statuses are returned as responses; only transport
    /// failures and refresh failures become errors.
    #[instrument(
        skip(self, request),
        fields(instance_id = self.client.instance_id(), url = %request.url)
    )]
    pub async fn send(&self, request: HttpRequest, user_id: Option<&str>) -> Result<HttpResponse> {
        let seen = lock(&self.state).generation;
        let used_token = self.client.get_access_token(user_id).await?;
        let first = self
            .execute_with(request.clone(), used_token.as_deref())
            .await;

        match &first {
            Ok(response) if response.is_unauthorized() => {
                debug!("Request unauthorized; refreshing");
            }
            Err(AuthError::Network(reason)) => {
                debug!(reason = %reason, "Request failed; refreshing");
            }
            _ => return first,
        }

        self.refresh_after(Some(seen), user_id).await?;

        let token = self.client.get_access_token(user_id).await?;
        self.execute_with(request, token.as_deref()).await
    }

    /// Refresh the session, joining an in-flight refresh if there is one.
    pub async fn refresh(&self, user_id: Option<&str>) -> Result<()> {
        self.refresh_after(None, user_id).await
    }

    /// `seen` is the refresh generation observed before the failed request
    /// was sent. If it has moved on, another caller already refreshed.
    async fn refresh_after(&self, seen: Option<u64>, user_id: Option<&str>) -> Result<()> {
        let parked = {
            let mut state = lock(&self.state);
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            } else if seen.is_some_and(|g| g != state.generation) {
                debug!("Token already refreshed by another caller");
                return Ok(());
            } else {
                state.refreshing = true;
                None
            }
        };

        if let Some(rx) = parked {
            return match rx.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(reason)) => Err(AuthError::TokenRefreshFailed(reason)),
                Err(_) => Err(AuthError::TokenRefreshFailed(
                    "refresh was abandoned".into(),
                )),
            };
        }

        let mut guard = LeaderGuard {
            state: &self.state,
            outcome: None,
        };
        let outcome = self.client.refresh(user_id).await;
        guard.outcome = Some(match &outcome {
            Ok(_) => Ok(()),
            Err(e) => Err(e.to_string()),
        });
        drop(guard);

        outcome.map(|_| ())
    }

    async fn execute_with(
        &self,
        request: HttpRequest,
        token: Option<&str>,
    ) -> Result<HttpResponse> {
        let request = match token {
            Some(token) => request.bearer_token(token),
            None => request,
        };
        self.client
            .http()
            .execute(request)
            .await
            .map_err(|e| AuthError::Network(e.to_string()))
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
