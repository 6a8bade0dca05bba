//! Integration tests for single-flight refresh
//!
//! Concurrent requests that all come back 401 must share one refresh-token
//! grant, and each request is retried at most once.

mod common;

use bridge_traits::http::{HttpMethod, HttpRequest, HttpResponse};
use common::*;
use core_auth::{AuthError, RefreshCoordinator, SessionData};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

fn session(access_token: &str) -> SessionData {
    SessionData {
        access_token: access_token.to_string(),
        refresh_token: Some("rt-1".to_string()),
        id_token: None,
        scope: "openid".to_string(),
        expires_in: 3600,
        created_at: chrono::Utc::now().timestamp_millis(),
        session_state: None,
        token_type: "Bearer".to_string(),
    }
}

fn api_request() -> HttpRequest {
    HttpRequest::new(HttpMethod::Get, API_URL)
}

/// API accepts only `at-new`; the token endpoint is slow enough for every
/// caller to hit the 401 before the refresh lands.
fn idp(token_status: u16) -> ScriptedHttp {
    ScriptedHttp::new(move |req| match req.url.as_str() {
        TOKEN_URL if token_status == 200 => token_response("at-new", Some("rt-2"), None),
        TOKEN_URL => HttpResponse::new(token_status, r#"{"error":"invalid_grant"}"#),
        API_URL => match req.headers.get("Authorization").map(String::as_str) {
            Some("Bearer at-new") => HttpResponse::new(200, "me"),
            _ => HttpResponse::new(401, ""),
        },
        _ => HttpResponse::new(404, ""),
    })
    .with_delay(TOKEN_URL, Duration::from_millis(50))
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let http = Arc::new(idp(200));
    let (client, _) = client(http.clone()).await;
    client
        .store()
        .set_session_data(None, &session("at-old"))
        .await
        .unwrap();

    let coordinator = Arc::new(RefreshCoordinator::new(client.clone()));
    let calls = (0..5).map(|_| {
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.send(api_request(), None).await }
    });

    for result in join_all(calls).await {
        assert_eq!(result.unwrap().status, 200);
    }

    assert_eq!(http.requests_to(TOKEN_URL).len(), 1);
    // Five first attempts, five retries.
    assert_eq!(http.requests_to(API_URL).len(), 10);
    assert_eq!(coordinator.waiting(), 0);
    assert_eq!(
        client.get_access_token(None).await.unwrap().as_deref(),
        Some("at-new")
    );
}

#[tokio::test]
async fn test_refresh_failure_reaches_every_waiter() {
    let http = Arc::new(idp(400));
    let (client, _) = client(http.clone()).await;
    client
        .store()
        .set_session_data(None, &session("at-old"))
        .await
        .unwrap();

    let coordinator = Arc::new(RefreshCoordinator::new(client));
    let calls = (0..4).map(|_| {
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.send(api_request(), None).await }
    });
    let results = join_all(calls).await;

    assert!(results.iter().all(Result::is_err));
    let parked = results
        .iter()
        .filter(|r| matches!(r, Err(AuthError::TokenRefreshFailed(_))))
        .count();
    assert_eq!(parked, 3);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(AuthError::TokenRequestFailed { status: 400, .. }))));

    assert_eq!(http.requests_to(TOKEN_URL).len(), 1);
    // No retries after a failed refresh.
    assert_eq!(http.requests_to(API_URL).len(), 4);
}

#[tokio::test]
async fn test_retry_happens_at_most_once() {
    let http = Arc::new(
        ScriptedHttp::new(|req| match req.url.as_str() {
            TOKEN_URL => token_response("at-new", None, None),
            _ => HttpResponse::new(401, ""),
        }),
    );
    let (client, _) = client(http.clone()).await;
    client
        .store()
        .set_session_data(None, &session("at-old"))
        .await
        .unwrap();

    let coordinator = RefreshCoordinator::new(client);
    let response = coordinator.send(api_request(), None).await.unwrap();

    assert_eq!(response.status, 401);
    assert_eq!(http.requests_to(TOKEN_URL).len(), 1);
    assert_eq!(http.requests_to(API_URL).len(), 2);
}

#[tokio::test]
async fn test_other_statuses_pass_through_without_refresh() {
    let http = Arc::new(ScriptedHttp::new(|req| match req.url.as_str() {
        API_URL => HttpResponse::new(500, "boom"),
        _ => HttpResponse::new(404, ""),
    }));
    let (client, _) = client(http.clone()).await;
    client
        .store()
        .set_session_data(None, &session("at-old"))
        .await
        .unwrap();

    let coordinator = RefreshCoordinator::new(client);
    let response = coordinator.send(api_request(), None).await.unwrap();

    assert_eq!(response.status, 500);
    assert!(http.requests_to(TOKEN_URL).is_empty());

    let sent = &http.requests_to(API_URL)[0];
    assert_eq!(
        sent.headers.get("Authorization").map(String::as_str),
        Some("Bearer at-old")
    );
}

#[tokio::test]
async fn test_explicit_refresh_without_refresh_token() {
    let http = Arc::new(idp(200));
    let (client, _) = client(http.clone()).await;
    let mut stale = session("at-old");
    stale.refresh_token = None;
    client.store().set_session_data(None, &stale).await.unwrap();

    let coordinator = RefreshCoordinator::new(client);
    assert!(matches!(
        coordinator.refresh(None).await,
        Err(AuthError::NoRefreshToken)
    ));
    assert!(http.requests_to(TOKEN_URL).is_empty());
}

#[tokio::test]
async fn test_transport_failure_triggers_refresh() {
    let http = Arc::new(idp(200).with_failure_once(API_URL));
    let (client, _) = client(http.clone()).await;
    client
        .store()
        .set_session_data(None, &session("at-old"))
        .await
        .unwrap();

    let coordinator = RefreshCoordinator::new(client);
    let response = coordinator.send(api_request(), None).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(http.requests_to(TOKEN_URL).len(), 1);
    assert_eq!(http.requests_to(API_URL).len(), 2);
}

#[tokio::test]
async fn test_cancelled_refresh_releases_waiters_and_slot() {
    let http = Arc::new(
        ScriptedHttp::new(|req| match req.url.as_str() {
            TOKEN_URL => token_response("at-new", Some("rt-2"), None),
            API_URL => match req.headers.get("Authorization").map(String::as_str) {
                Some("Bearer at-new") => HttpResponse::new(200, "me"),
                _ => HttpResponse::new(401, ""),
            },
            _ => HttpResponse::new(404, ""),
        })
        .with_delay(TOKEN_URL, Duration::from_millis(200)),
    );
    let (client, _) = client(http.clone()).await;
    client
        .store()
        .set_session_data(None, &session("at-old"))
        .await
        .unwrap();

    let coordinator = RefreshCoordinator::new(client);
    let (leader, parked) = tokio::join!(
        tokio::time::timeout(
            Duration::from_millis(50),
            coordinator.send(api_request(), None)
        ),
        coordinator.send(api_request(), None),
    );

    assert!(leader.is_err());
    assert!(matches!(parked, Err(AuthError::TokenRefreshFailed(_))));
    assert!(!coordinator.is_refreshing());
    assert_eq!(coordinator.waiting(), 0);

    let next = tokio::time::timeout(
        Duration::from_secs(2),
        coordinator.send(api_request(), None),
    )
    .await
    .expect("refresh slot is free again");
    assert_eq!(next.unwrap().status, 200);
    assert_eq!(http.requests_to(TOKEN_URL).len(), 2);
}
