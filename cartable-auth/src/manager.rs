//! # Session Manager
//!
//! Facade wiring the whole token lifecycle together from a [`CoreConfig`]:
//! token store, identity client, refresh coordinator, session invalidator,
//! and the event bus. Hosts construct one `SessionManager` at startup,
//! seed it with the session obtained from their sign-in flow, and hand the
//! [`AuthorizedClient`] to their API layer.
//!
//! ## Usage
//!
//! ```no_run
//! use cartable_auth::{Session, SessionManager};
//! use cartable_runtime::config::{CoreConfig, IdentityConfig};
//! use std::sync::Arc;
//! # use cartable_bridge::{HttpClient, HttpRequest, HttpResponse};
//! # use cartable_bridge::error::Result as BridgeResult;
//! # struct MyHttpClient;
//! # #[async_trait::async_trait]
//! # impl HttpClient for MyHttpClient {
//! #     async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> { unimplemented!() }
//! # }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoreConfig::builder()
//!     .identity(IdentityConfig::new(
//!         "https://sso.bank.example",
//!         "cartable-web",
//!         "https://cartable.bank.example/signed-out",
//!     )?)
//!     .http_client(Arc::new(MyHttpClient))
//!     .build()?;
//!
//! let manager = SessionManager::new(config);
//!
//! // After the host's sign-in flow produced tokens:
//! manager
//!     .install_session(Session::new("AT1", "RT1", None, 3600))
//!     .await;
//!
//! let client = manager.client();
//! // client.execute(...) keeps requests authorized from here on.
//! # Ok(())
//! # }
//! ```

use crate::coordinator::RefreshCoordinator;
use crate::error::Result;
use crate::identity::IdentityClient;
use crate::interceptor::AuthorizedClient;
use crate::invalidator::SessionInvalidator;
use crate::token_store::TokenStore;
use crate::types::Session;
use cartable_bridge::HttpClient;
use cartable_runtime::config::CoreConfig;
use cartable_runtime::events::{EventBus, Receiver, SessionEvent};
use std::sync::Arc;

/// Application-facing entry point for the session lifecycle.
pub struct SessionManager {
    store: TokenStore,
    coordinator: RefreshCoordinator,
    invalidator: SessionInvalidator,
    event_bus: EventBus,
    http_client: Arc<dyn HttpClient>,
}

impl SessionManager {
    /// Wires all lifecycle components from the given configuration.
    pub fn new(config: CoreConfig) -> Self {
        let event_bus = EventBus::new(config.event_buffer);

        let store = match &config.session_mirror {
            Some(mirror) => TokenStore::with_mirror(mirror.clone()),
            None => TokenStore::new(),
        };

        let identity = Arc::new(IdentityClient::new(
            config.identity.clone(),
            config.http_client.clone(),
            config.tuning.http_timeout,
        ));

        let invalidator =
            SessionInvalidator::new(store.clone(), identity.clone(), event_bus.clone());

        let coordinator = RefreshCoordinator::new(
            store.clone(),
            identity,
            invalidator.clone(),
            event_bus.clone(),
            config.tuning,
        );

        Self {
            store,
            coordinator,
            invalidator,
            event_bus,
            http_client: config.http_client,
        }
    }

    /// Seeds the store with a session produced by the host's sign-in flow.
    pub async fn install_session(&self, session: Session) {
        self.store.replace(session).await;
    }

    /// Returns the current session, if signed in.
    pub async fn current_session(&self) -> Option<Session> {
        self.store.current().await
    }

    /// Returns a session with a non-expiring access token, refreshing if
    /// needed. See [`RefreshCoordinator::ensure_fresh`].
    pub async fn ensure_fresh(&self) -> Result<Session> {
        self.coordinator.ensure_fresh().await
    }

    /// Signals that a caller observed an unauthorized response. See
    /// [`RefreshCoordinator::on_unauthorized`].
    pub async fn on_unauthorized(&self) -> Result<Session> {
        self.coordinator.on_unauthorized().await
    }

    /// Signs out: clears the session, notifies the provider best-effort,
    /// and emits `SignedOut`.
    pub async fn sign_out(&self, reason: &str) {
        self.invalidator.invalidate(reason).await;
    }

    /// An HTTP client wrapper that keeps requests authorized.
    pub fn client(&self) -> AuthorizedClient {
        AuthorizedClient::new(
            self.http_client.clone(),
            self.coordinator.clone(),
            self.event_bus.clone(),
        )
    }

    /// Subscribes to session lifecycle events.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.event_bus.subscribe()
    }
}
