//! Integration tests for prompt-less sign-in through a hidden frame

mod common;

use bridge_traits::http::HttpResponse;
use common::*;
use core_auth::{
    build_silent_sign_in_callback_message, AuthError, SilentAuthenticator, SilentState,
    SILENT_SIGN_IN_STATE,
};
use std::sync::Arc;
use std::time::Duration;

fn idp() -> Arc<ScriptedHttp> {
    Arc::new(ScriptedHttp::new(|req| match req.url.as_str() {
        TOKEN_URL => token_response("at-silent", Some("rt-silent"), None),
        _ => HttpResponse::new(404, ""),
    }))
}

#[tokio::test]
async fn test_signed_in_message_exchanges_code() {
    let http = idp();
    let (client, _) = client(http.clone()).await;
    let message = build_silent_sign_in_callback_message(
        "https://app/cb?code=silent-code&session_state=ss-9&state=silent_sign_in",
    )
    .unwrap();
    let frames = Arc::new(ScriptedFrames::replying(message));

    let auth = SilentAuthenticator::new(client.clone(), frames.clone());
    assert!(auth.try_sign_in(None).await.unwrap());
    assert_eq!(auth.state(), SilentState::SignedIn);

    let opened = frames.opened();
    assert_eq!(opened.len(), 1);
    let params = query(&opened[0]);
    assert_eq!(params["prompt"], "none");
    assert_eq!(params["response_mode"], "query");
    assert_eq!(params["state"], SILENT_SIGN_IN_STATE);

    let body = form(&http.requests_to(TOKEN_URL)[0]);
    assert_eq!(body["code"], "silent-code");
    assert!(body.contains_key("code_verifier"));
    assert!(client
        .get_pkce_code(SILENT_SIGN_IN_STATE, None)
        .await
        .unwrap()
        .is_none());

    let session = client.get_session_data(None).await.unwrap().unwrap();
    assert_eq!(session.access_token, "at-silent");
    assert_eq!(session.session_state.as_deref(), Some("ss-9"));
    assert_eq!(frames.teardowns(), 1);
}

#[tokio::test]
async fn test_signed_out_message_resolves_false() {
    let http = idp();
    let (client, _) = client(http.clone()).await;
    let frames = Arc::new(ScriptedFrames::replying(
        r#"{"type":"check_session_signed_out"}"#,
    ));

    let auth = SilentAuthenticator::new(client.clone(), frames.clone());
    assert!(!auth.try_sign_in(None).await.unwrap());
    assert_eq!(auth.state(), SilentState::SignedOut);

    assert!(http.requests_to(TOKEN_URL).is_empty());
    assert!(client.get_session_data(None).await.unwrap().is_none());
    assert_eq!(frames.teardowns(), 1);
}

#[tokio::test]
async fn test_timeout_tears_down_and_ignores_late_messages() {
    let http = idp();
    let (client, _) = client(http.clone()).await;
    let frames = Arc::new(ScriptedFrames::silent());

    let auth = SilentAuthenticator::new(client.clone(), frames.clone())
        .with_timeout(Duration::from_millis(50));
    assert!(!auth.try_sign_in(None).await.unwrap());
    assert_eq!(auth.state(), SilentState::TimedOut);
    assert_eq!(frames.teardowns(), 1);

    let late = build_silent_sign_in_callback_message("https://app/cb?code=late").unwrap();
    assert!(!frames.post(&late));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(http.requests_to(TOKEN_URL).is_empty());
    assert!(client.get_session_data(None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unrelated_messages_are_ignored() {
    let (client, _) = client(idp()).await;
    let frames = Arc::new(ScriptedFrames::replying(r#"{"type":"resize","height":20}"#));

    let auth = SilentAuthenticator::new(client, frames).with_timeout(Duration::from_millis(50));
    assert!(!auth.try_sign_in(None).await.unwrap());
    assert_eq!(auth.state(), SilentState::TimedOut);
}

#[tokio::test]
async fn test_overlapping_attempt_is_rejected() {
    let (client, _) = client(idp()).await;
    let frames = Arc::new(ScriptedFrames::silent());
    let auth = SilentAuthenticator::new(client, frames.clone())
        .with_timeout(Duration::from_millis(100));

    let (first, second) = tokio::join!(auth.try_sign_in(None), auth.try_sign_in(None));

    assert!(!first.unwrap());
    assert!(matches!(second, Err(AuthError::SilentSignInInProgress)));
    assert_eq!(frames.opened().len(), 1);

    // Idle again after the first attempt settles.
    assert!(!auth.try_sign_in(None).await.unwrap());
    assert_eq!(frames.opened().len(), 2);
}

#[tokio::test]
async fn test_cancelled_attempt_returns_to_idle() {
    let (client, _) = client(idp()).await;
    let frames = Arc::new(ScriptedFrames::silent());
    let auth = SilentAuthenticator::new(client, frames.clone())
        .with_timeout(Duration::from_millis(500));

    let cancelled = tokio::time::timeout(Duration::from_millis(50), auth.try_sign_in(None)).await;

    assert!(cancelled.is_err());
    assert_eq!(auth.state(), SilentState::Idle);
    assert_eq!(frames.teardowns(), 1);

    // The same authenticator accepts a new attempt.
    assert!(!auth.try_sign_in(None).await.unwrap());
    assert_eq!(auth.state(), SilentState::TimedOut);
    assert_eq!(frames.opened().len(), 2);
}
