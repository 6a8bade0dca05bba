//! Logging and auth event demonstration
//!
//! Run with:
//! ```bash
//! # Pretty format (default in debug)
//! cargo run --example logging_demo
//!
//! # JSON format
//! cargo run --example logging_demo -- json
//!
//! # Compact format with a custom filter
//! cargo run --example logging_demo -- compact "core_runtime=trace"
//! ```

use bridge_traits::time::LogLevel;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, SilentOutcome};
use core_runtime::logging::{init_logging, redact_if_sensitive, LogFormat, LoggingConfig};
use std::env;
use tracing::{debug, info, instrument, warn};

#[tokio::main]
async fn main() -> core_runtime::Result<()> {
    let args: Vec<String> = env::args().collect();

    let format = match args.get(1).map(String::as_str) {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::default(),
    };

    let mut config = LoggingConfig::default()
        .with_format(format)
        .with_level(LogLevel::Debug)
        .with_spans(true);
    if let Some(filter) = args.get(2) {
        config = config.with_filter(filter.clone());
    }
    init_logging(config)?;

    info!(format = ?format, "Logging initialized");

    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();

    let listener = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event.severity() {
                core_runtime::events::EventSeverity::Error => {
                    warn!(event = ?event, "{}", event.description())
                }
                _ => info!(event = ?event, "{}", event.description()),
            }
        }
    });

    simulate_session(&bus, 0).await;
    drop(bus);

    // The listener ends once every sender is gone.
    let _ = listener.await;
    Ok(())
}

#[instrument(skip(bus))]
async fn simulate_session(bus: &EventBus, instance_id: u64) {
    let emit = |event: AuthEvent| {
        let _ = bus.emit(CoreEvent::Auth(event));
    };

    emit(AuthEvent::SigningIn { instance_id });
    debug!(
        code = %redact_if_sensitive("code", "SplxlOBeZQQYbYS6WxSbIA"),
        state = %redact_if_sensitive("state", "instance_0-demo"),
        "Callback received"
    );

    emit(AuthEvent::SignedIn {
        instance_id,
        user_id: Some("alice".to_string()),
    });
    emit(AuthEvent::TokenRefreshing { instance_id });
    emit(AuthEvent::TokenRefreshed {
        instance_id,
        expires_in: 3600,
    });
    emit(AuthEvent::SilentSignIn {
        instance_id,
        outcome: SilentOutcome::TimedOut,
    });
    emit(AuthEvent::AuthError {
        instance_id: Some(instance_id),
        code: "AUTH-NO-REFRESH-TOKEN".to_string(),
        message: "no refresh token in the stored session".to_string(),
        recoverable: false,
    });
}
