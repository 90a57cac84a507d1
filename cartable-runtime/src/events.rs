//! # Session Event Bus
//!
//! Process-wide notification channel built on `tokio::sync::broadcast`.
//! Any API caller can signal that it observed an authentication failure,
//! and the refresh coordinator announces how each refresh attempt resolved.
//!
//! ## Delivery semantics
//!
//! - Every subscriber registered before `emit` receives the event
//!   (at-least-once fan-out; events are cloned per subscriber).
//! - Unsubscribing is dropping the receiver - there is no registration
//!   list to leak.
//! - Slow subscribers observe `RecvError::Lagged(n)` and keep receiving
//!   newer events; they never block publishers.
//!
//! ## Usage
//!
//! ```rust
//! use cartable_runtime::events::{EventBus, SessionEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(SessionEvent::UnauthorizedObserved).ok();
//! assert_eq!(rx.recv().await.unwrap(), SessionEvent::UnauthorizedObserved);
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall behind by more than this many events receive
/// `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Session lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// A caller observed an unauthorized (401) response on a live API call.
    UnauthorizedObserved,
    /// A refresh attempt started; exactly one is live at a time.
    TokenRefreshing {
        /// Correlation id of the attempt.
        attempt_id: String,
    },
    /// A refresh attempt resolved, successfully or not.
    RefreshResolved {
        /// Correlation id of the attempt.
        attempt_id: String,
        /// Whether a new session was installed.
        success: bool,
    },
    /// The session was invalidated and the user signed out.
    SignedOut {
        /// Why the session ended (e.g. "RefreshAccessTokenError").
        reason: String,
    },
}

impl SessionEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            SessionEvent::UnauthorizedObserved => "Unauthorized response observed",
            SessionEvent::TokenRefreshing { .. } => "Refreshing access token",
            SessionEvent::RefreshResolved { success: true, .. } => "Token refreshed successfully",
            SessionEvent::RefreshResolved { success: false, .. } => "Token refresh failed",
            SessionEvent::SignedOut { .. } => "User signed out",
        }
    }
}

/// Central event bus for publishing and subscribing to session events.
///
/// Uses `tokio::sync::broadcast` internally: multiple producers (clone the
/// `EventBus`), multiple independent consumers (each `subscribe()` creates
/// a new receiver), non-blocking sends, lagging detection.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are currently none. Publishers that do not care
    /// whether anyone is listening can ignore the result.
    pub fn emit(&self, event: SessionEvent) -> Result<usize, SendError<SessionEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber receiving all future events.
    ///
    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
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
