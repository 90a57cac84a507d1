//! Session Invalidator
//!
//! Forced sign-out: clears the local session, notifies the identity
//! provider's end-session endpoint best-effort, and announces `SignedOut`
//! on the event bus.
//!
//! Idempotency rests on [`TokenStore::clear`] being an atomic take: of any
//! number of concurrent callers, exactly one receives the session and
//! performs the remote notification; the rest find the slot empty and
//! return. A later sign-in re-arms everything - there is no sticky
//! "already invalidated" state.

use crate::identity::IdentityClient;
use crate::token_store::TokenStore;
use cartable_runtime::events::{EventBus, SessionEvent};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Performs forced sign-out.
#[derive(Clone)]
pub struct SessionInvalidator {
    store: TokenStore,
    identity: Arc<IdentityClient>,
    event_bus: EventBus,
}

impl SessionInvalidator {
    pub fn new(store: TokenStore, identity: Arc<IdentityClient>, event_bus: EventBus) -> Self {
        Self {
            store,
            identity,
            event_bus,
        }
    }

    /// Invalidates the current session.
    ///
    /// Local state is cleared before anything touches the network; the
    /// end-session notification runs fire-and-forget so a dead provider
    /// cannot block sign-out. Safe to call concurrently and repeatedly.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, reason: &str) {
        let Some(session) = self.store.clear().await else {
            debug!("No active session to invalidate");
            return;
        };

        info!(reason, "Invalidating session");

        let identity = self.identity.clone();
        let id_token = session.id_token.clone();
        tokio::spawn(async move {
            identity.end_session(id_token.as_deref()).await;
        });

        let _ = self.event_bus.emit(SessionEvent::SignedOut {
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Session;
    use async_trait::async_trait;
    use bytes::Bytes;
    use cartable_bridge::error::Result as BridgeResult;
    use cartable_bridge::{HttpClient, HttpRequest, HttpResponse};
    use cartable_runtime::config::IdentityConfig;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingIdp {
        end_session_calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for CountingIdp {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            self.end_session_calls.fetch_add(1, Ordering::SeqCst);
            Ok(HttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: Bytes::new(),
            })
        }
    }

    fn invalidator() -> (SessionInvalidator, TokenStore, Arc<CountingIdp>, EventBus) {
        let idp = Arc::new(CountingIdp {
            end_session_calls: AtomicUsize::new(0),
        });
        let store = TokenStore::new();
        let bus = EventBus::new(100);
        let config = IdentityConfig::new(
            "https://sso.bank.example",
            "cartable-web",
            "https://cartable.bank.example/signed-out",
        )
        .unwrap();
        let identity = Arc::new(IdentityClient::new(
            config,
            idp.clone(),
            Duration::from_secs(10),
        ));

        (
            SessionInvalidator::new(store.clone(), identity, bus.clone()),
            store,
            idp,
            bus,
        )
    }

    #[tokio::test]
    async fn test_invalidate_clears_session_and_notifies() {
        let (invalidator, store, idp, bus) = invalidator();
        store
            .replace(Session::new("AT1", "RT1", Some("IDT1".to_string()), 3600))
            .await;

        let mut events = bus.subscribe();
        invalidator.invalidate("SessionExpired").await;

        assert!(store.current().await.is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(idp.end_session_calls.load(Ordering::SeqCst), 1);

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            SessionEvent::SignedOut {
                reason: "SessionExpired".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_invalidate_without_session_is_noop() {
        let (invalidator, _store, idp, _bus) = invalidator();

        invalidator.invalidate("SessionExpired").await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(idp.end_session_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_invalidation_notifies_once() {
        let (invalidator, store, idp, _bus) = invalidator();
        store
            .replace(Session::new("AT1", "RT1", Some("IDT1".to_string()), 3600))
            .await;

        tokio::join!(
            invalidator.invalidate("RefreshAccessTokenError"),
            invalidator.invalidate("RefreshAccessTokenError"),
        );

        assert!(store.current().await.is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(idp.end_session_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_rearms_after_new_session() {
        let (invalidator, store, idp, _bus) = invalidator();
        store
            .replace(Session::new("AT1", "RT1", None, 3600))
            .await;

        invalidator.invalidate("SessionExpired").await;
        store
            .replace(Session::new("AT2", "RT2", None, 3600))
            .await;
        invalidator.invalidate("SessionExpired").await;

        assert!(store.current().await.is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(idp.end_session_calls.load(Ordering::SeqCst), 2);
    }
}
