//! # Event Bus System
//!
//! Typed events published by the auth core over `tokio::sync::broadcast`, so
//! host layers (UI bindings, telemetry) can react to session changes without
//! polling.
//!
//! ```text
//! ┌────────────┐   emit    ┌───────────┐   subscribe   ┌────────────┐
//! │ AuthClient ├──────────>│ EventBus  ├──────────────>│ Subscriber │
//! └────────────┘           └───────────┘               └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(32);
//! let mut subscriber = bus.subscribe();
//!
//! bus.emit(CoreEvent::Auth(AuthEvent::SignedIn {
//!     instance_id: 0,
//!     user_id: None,
//! }))
//! .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.description(), "User signed in");
//! # }
//! ```
//!
//! Events never carry token material.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall further behind receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 64;

/// Top-level event enum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Auth(AuthEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::AuthError {
                recoverable: false, ..
            }) => EventSeverity::Error,
            CoreEvent::Auth(AuthEvent::AuthError { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::SignedIn { .. })
            | CoreEvent::Auth(AuthEvent::SignedOut { .. })
            | CoreEvent::Auth(AuthEvent::TokenRevoked { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Outcome of a prompt-less sign-in attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SilentOutcome {
    SignedIn,
    SignedOut,
    TimedOut,
}

/// Session lifecycle events for one client instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// An authorization URL was handed to the host.
    SigningIn { instance_id: u64 },
    /// A code exchange produced a session.
    SignedIn {
        instance_id: u64,
        user_id: Option<String>,
    },
    /// The local session was cleared.
    SignedOut {
        instance_id: u64,
        user_id: Option<String>,
    },
    /// A refresh-token grant is in flight.
    TokenRefreshing { instance_id: u64 },
    TokenRefreshed {
        instance_id: u64,
        /// Lifetime of the new access token in seconds.
        expires_in: u64,
    },
    /// The IdP accepted a revocation request.
    TokenRevoked { instance_id: u64 },
    SilentSignIn {
        instance_id: u64,
        outcome: SilentOutcome,
    },
    AuthError {
        instance_id: Option<u64>,
        /// Stable machine-readable error code.
        code: String,
        message: String,
        /// Whether retrying the same call may succeed.
        recoverable: bool,
    },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::SigningIn { .. } => "Authorization started",
            AuthEvent::SignedIn { .. } => "User signed in",
            AuthEvent::SignedOut { .. } => "User signed out",
            AuthEvent::TokenRefreshing { .. } => "Refreshing access token",
            AuthEvent::TokenRefreshed { .. } => "Access token refreshed",
            AuthEvent::TokenRevoked { .. } => "Access token revoked",
            AuthEvent::SilentSignIn { .. } => "Silent sign-in finished",
            AuthEvent::AuthError { .. } => "Authentication error",
        }
    }
}

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus clones the sender; every `subscribe()` call creates an
/// independent receiver that only sees events emitted afterwards.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
