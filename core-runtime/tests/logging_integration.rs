//! Integration tests for logging configuration and redaction

use bridge_traits::time::LogLevel;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, EventSeverity};
use core_runtime::logging::{redact_if_sensitive, LogFormat, LoggingConfig};

#[test]
fn test_logging_config_chaining() {
    // init_logging can only run once per process, so only the builder is
    // exercised here.
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_filter("core_auth=debug,reqwest=warn")
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert_eq!(
        config.filter.as_deref(),
        Some("core_auth=debug,reqwest=warn")
    );
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
    assert!(config.logger_sink.is_none());
}

#[test]
fn test_token_fields_are_redacted() {
    for field in [
        "access_token",
        "refresh_token",
        "id_token",
        "id_token_hint",
        "code_verifier",
        "client_secret",
        "Authorization",
        "client_assertion",
    ] {
        assert_eq!(redact_if_sensitive(field, "value"), "[REDACTED]", "{field}");
    }
}

#[test]
fn test_authorization_code_is_redacted_but_error_codes_are_not() {
    assert_eq!(redact_if_sensitive("code", "SplxlOBeZQQYbYS6WxSbIA"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("error_code", "AUTH-NETWORK"), "AUTH-NETWORK");
}

#[test]
fn test_operational_fields_pass_through() {
    assert_eq!(redact_if_sensitive("instance_id", "3"), "3");
    assert_eq!(redact_if_sensitive("status", "401"), "401");
    assert_eq!(
        redact_if_sensitive("url", "https://idp.example/oauth2/token"),
        "https://idp.example/oauth2/token"
    );
}

#[tokio::test]
async fn test_auth_error_events_reach_subscribers() {
    let bus = EventBus::new(8);
    let mut rx = bus.subscribe();

    bus.emit(CoreEvent::Auth(AuthEvent::AuthError {
        instance_id: Some(1),
        code: "AUTH-NO-REFRESH-TOKEN".to_string(),
        message: "no refresh token".to_string(),
        recoverable: false,
    }))
    .unwrap();

    let event = rx.recv().await.unwrap();
    assert_eq!(event.severity(), EventSeverity::Error);
}
