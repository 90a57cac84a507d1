//! Refresh Coordinator
//!
//! Single-flight engine for token refresh. Many callers can demand a fresh
//! token near-simultaneously - a proactive expiry check and any number of
//! API calls that just saw a 401 - but at most one refresh attempt runs at
//! a time, and every caller blocked on that attempt receives the same
//! outcome.
//!
//! ## How the single flight works
//!
//! The in-flight attempt is an `Option<broadcast::Sender<Outcome>>` behind
//! a `Mutex`. Leader election happens entirely inside that lock: the first
//! caller to find the slot empty installs a sender and spawns the attempt
//! task; everyone else (including the leader itself) subscribes and awaits
//! the fan-out. Publishing the outcome and clearing the slot also happen
//! under the lock, so a caller can never subscribe to an attempt whose
//! outcome it would miss.
//!
//! Running the attempt in a spawned task means a caller whose own request
//! future is cancelled simply drops its receiver; the attempt still
//! completes for everyone else.
//!
//! ## Deadlines
//!
//! The remote call is wrapped in `tokio::time::timeout`, which drops the
//! request future at the deadline - the exchange is aborted, not ignored.
//! Waiters carry a slightly longer backstop so a wedged attempt task can
//! never hang them indefinitely.

use crate::error::{AuthError, Result};
use crate::identity::IdentityClient;
use crate::invalidator::SessionInvalidator;
use crate::token_store::TokenStore;
use crate::types::{Outcome, Session};
use cartable_runtime::config::RefreshTuning;
use cartable_runtime::events::{EventBus, SessionEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Reason recorded when a refresh attempt tears the session down.
const REFRESH_FAILURE_REASON: &str = "RefreshAccessTokenError";

/// Extra slack waiters allow the attempt task beyond the deadline before
/// assuming it is wedged.
const WAITER_GRACE: Duration = Duration::from_millis(500);

/// Single-flight refresh engine.
///
/// Cloning is cheap; clones share the same attempt slot and token store.
#[derive(Clone)]
pub struct RefreshCoordinator {
    store: TokenStore,
    identity: Arc<IdentityClient>,
    invalidator: SessionInvalidator,
    event_bus: EventBus,
    tuning: RefreshTuning,
    attempt: Arc<Mutex<Option<broadcast::Sender<Outcome>>>>,
}

impl RefreshCoordinator {
    pub fn new(
        store: TokenStore,
        identity: Arc<IdentityClient>,
        invalidator: SessionInvalidator,
        event_bus: EventBus,
        tuning: RefreshTuning,
    ) -> Self {
        Self {
            store,
            identity,
            invalidator,
            event_bus,
            tuning,
            attempt: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns a session whose access token is not about to expire,
    /// refreshing it first when necessary.
    ///
    /// Fast path: when no attempt is in flight and the current token is
    /// outside the refresh buffer, the session is returned without taking
    /// any network step.
    ///
    /// # Errors
    ///
    /// - `AuthError::NotAuthenticated` - no session is installed
    /// - any refresh failure, after the session has been invalidated
    #[instrument(skip(self))]
    pub async fn ensure_fresh(&self) -> Result<Session> {
        self.refresh_or_join(false).await
    }

    /// Reacts to an observed unauthorized response.
    ///
    /// Forces a refresh even when the local expiry still looks healthy -
    /// the server has already rejected the credential. Concurrent signals
    /// coalesce into the attempt already in flight.
    #[instrument(skip(self))]
    pub async fn on_unauthorized(&self) -> Result<Session> {
        self.refresh_or_join(true).await
    }

    async fn refresh_or_join(&self, force: bool) -> Result<Session> {
        let receiver = {
            let mut slot = self.attempt.lock().await;

            match slot.as_ref() {
                // An attempt is in flight: join it.
                Some(attempt) => attempt.subscribe(),
                None => {
                    let session = self
                        .store
                        .current()
                        .await
                        .ok_or(AuthError::NotAuthenticated)?;

                    if !force && !session.is_expiring_within(self.tuning.refresh_buffer) {
                        return Ok(session);
                    }

                    let (sender, receiver) = broadcast::channel(1);
                    *slot = Some(sender.clone());

                    let coordinator = self.clone();
                    tokio::spawn(async move {
                        coordinator.run_attempt(session, sender).await;
                    });

                    receiver
                }
            }
        };

        self.await_outcome(receiver).await
    }

    /// Body of the spawned attempt task: the leader work of one refresh.
    async fn run_attempt(&self, current: Session, sender: broadcast::Sender<Outcome>) {
        let attempt_id = Uuid::new_v4();
        let _ = self.event_bus.emit(SessionEvent::TokenRefreshing {
            attempt_id: attempt_id.to_string(),
        });
        info!(%attempt_id, "Refreshing access token");

        let outcome = match timeout(
            self.tuning.attempt_deadline,
            self.identity.refresh(&current.refresh_token),
        )
        .await
        {
            Ok(Ok(mut next)) => {
                // Providers may omit the id token on refresh; the
                // end-session hint still needs the original one.
                if next.id_token.is_none() {
                    next.id_token = current.id_token.clone();
                }
                self.store.replace(next.clone()).await;
                Outcome::Refreshed(next)
            }
            Ok(Err(error)) => {
                warn!(%attempt_id, %error, "Token refresh failed");
                Outcome::Failed(error)
            }
            Err(_) => {
                warn!(%attempt_id, "Token refresh hit the attempt deadline");
                Outcome::Failed(AuthError::Timeout)
            }
        };

        // Publish and clear under the same lock that registers waiters, so
        // no caller can subscribe to an attempt it will never hear from.
        {
            let mut slot = self.attempt.lock().await;
            let _ = sender.send(outcome.clone());
            *slot = None;
        }

        match &outcome {
            Outcome::Refreshed(session) => {
                info!(%attempt_id, expires_at = %session.expires_at, "Token refreshed");
                let _ = self.event_bus.emit(SessionEvent::RefreshResolved {
                    attempt_id: attempt_id.to_string(),
                    success: true,
                });
            }
            Outcome::Failed(_) => {
                self.store.tag_error(REFRESH_FAILURE_REASON).await;
                self.invalidator.invalidate(REFRESH_FAILURE_REASON).await;
                let _ = self.event_bus.emit(SessionEvent::RefreshResolved {
                    attempt_id: attempt_id.to_string(),
                    success: false,
                });
            }
        }
    }

    async fn await_outcome(
        &self,
        mut receiver: broadcast::Receiver<Outcome>,
    ) -> Result<Session> {
        let backstop = self.tuning.attempt_deadline + WAITER_GRACE;

        match timeout(backstop, receiver.recv()).await {
            Ok(Ok(outcome)) => outcome.into_result(),
            Ok(Err(_)) | Err(_) => {
                // Attempt task died or stalled without publishing. The
                // invalidator is idempotent, so every stranded waiter may
                // call it.
                debug!("Refresh attempt produced no outcome before the backstop");
                self.invalidator.invalidate(REFRESH_FAILURE_REASON).await;
                Err(AuthError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use cartable_bridge::error::Result as BridgeResult;
    use cartable_bridge::{BridgeError, HttpClient, HttpRequest, HttpResponse};
    use cartable_runtime::config::IdentityConfig;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Script {
        Tokens { access_token: &'static str, delay: Duration },
        Status(u16),
        Hang,
    }

    struct ScriptedIdp {
        script: Script,
        token_calls: AtomicUsize,
        end_session_calls: AtomicUsize,
    }

    impl ScriptedIdp {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                token_calls: AtomicUsize::new(0),
                end_session_calls: AtomicUsize::new(0),
            })
        }

        fn token_calls(&self) -> usize {
            self.token_calls.load(Ordering::SeqCst)
        }

        fn end_session_calls(&self) -> usize {
            self.end_session_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedIdp {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            if request.url.contains("/connect/endsession") {
                self.end_session_calls.fetch_add(1, Ordering::SeqCst);
                return Ok(HttpResponse {
                    status: 200,
                    headers: HashMap::new(),
                    body: Bytes::new(),
                });
            }

            self.token_calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Tokens { access_token, delay } => {
                    tokio::time::sleep(*delay).await;
                    Ok(HttpResponse {
                        status: 200,
                        headers: HashMap::new(),
                        body: Bytes::from(format!(
                            r#"{{"access_token":"{}","refresh_token":"RT2","expires_in":3600}}"#,
                            access_token
                        )),
                    })
                }
                Script::Status(status) => Ok(HttpResponse {
                    status: *status,
                    headers: HashMap::new(),
                    body: Bytes::from("invalid_grant"),
                }),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(BridgeError::OperationFailed("unreachable".to_string()))
                }
            }
        }
    }

    struct Harness {
        coordinator: RefreshCoordinator,
        store: TokenStore,
        idp: Arc<ScriptedIdp>,
        bus: EventBus,
    }

    fn harness(script: Script, tuning: RefreshTuning) -> Harness {
        let idp = ScriptedIdp::new(script);
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
            tuning.http_timeout,
        ));
        let invalidator = SessionInvalidator::new(store.clone(), identity.clone(), bus.clone());
        let coordinator =
            RefreshCoordinator::new(store.clone(), identity, invalidator, bus.clone(), tuning);

        Harness {
            coordinator,
            store,
            idp,
            bus,
        }
    }

    fn fast_tuning() -> RefreshTuning {
        RefreshTuning {
            refresh_buffer: Duration::from_secs(60),
            attempt_deadline: Duration::from_millis(300),
            http_timeout: Duration::from_millis(300),
        }
    }

    #[tokio::test]
    async fn test_fast_path_no_network_call() {
        let h = harness(
            Script::Tokens {
                access_token: "AT2",
                delay: Duration::ZERO,
            },
            fast_tuning(),
        );
        h.store
            .replace(Session::new("AT1", "RT1", None, 3600))
            .await;

        let session = h.coordinator.ensure_fresh().await.unwrap();
        assert_eq!(session.access_token, "AT1");
        assert_eq!(h.idp.token_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_session_is_not_authenticated() {
        let h = harness(
            Script::Tokens {
                access_token: "AT2",
                delay: Duration::ZERO,
            },
            fast_tuning(),
        );

        let error = h.coordinator.ensure_fresh().await.unwrap_err();
        assert_eq!(error, AuthError::NotAuthenticated);
        assert_eq!(h.idp.token_calls(), 0);
    }

    #[tokio::test]
    async fn test_near_expiry_triggers_refresh() {
        let h = harness(
            Script::Tokens {
                access_token: "AT2",
                delay: Duration::from_millis(50),
            },
            fast_tuning(),
        );
        h.store.replace(Session::new("AT1", "RT1", None, 5)).await;

        let session = h.coordinator.ensure_fresh().await.unwrap();
        assert_eq!(session.access_token, "AT2");
        assert_eq!(h.idp.token_calls(), 1);

        let stored = h.store.current().await.unwrap();
        assert_eq!(stored.access_token, "AT2");
    }

    #[tokio::test]
    async fn test_single_flight_many_concurrent_callers() {
        let h = harness(
            Script::Tokens {
                access_token: "AT2",
                delay: Duration::from_millis(100),
            },
            fast_tuning(),
        );
        h.store.replace(Session::new("AT1", "RT1", None, 5)).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let coordinator = h.coordinator.clone();
            handles.push(tokio::spawn(
                async move { coordinator.ensure_fresh().await },
            ));
        }

        for handle in handles {
            let session = handle.await.unwrap().unwrap();
            assert_eq!(session.access_token, "AT2");
        }

        assert_eq!(h.idp.token_calls(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_signals_coalesce() {
        let h = harness(
            Script::Tokens {
                access_token: "AT2",
                delay: Duration::from_millis(100),
            },
            fast_tuning(),
        );
        // Token looks healthy locally; the server disagrees.
        h.store
            .replace(Session::new("AT1", "RT1", None, 3600))
            .await;

        let (a, b, c) = tokio::join!(
            h.coordinator.on_unauthorized(),
            h.coordinator.on_unauthorized(),
            h.coordinator.on_unauthorized(),
        );

        assert_eq!(a.unwrap().access_token, "AT2");
        assert_eq!(b.unwrap().access_token, "AT2");
        assert_eq!(c.unwrap().access_token, "AT2");
        assert_eq!(h.idp.token_calls(), 1);
    }

    #[tokio::test]
    async fn test_rejected_refresh_fans_out_and_signs_out() {
        let h = harness(Script::Status(400), fast_tuning());
        h.store
            .replace(Session::new("AT1", "RT1", Some("IDT1".to_string()), 5))
            .await;

        let mut events = h.bus.subscribe();

        let (a, b) = tokio::join!(
            h.coordinator.ensure_fresh(),
            h.coordinator.ensure_fresh(),
        );

        assert!(matches!(
            a.unwrap_err(),
            AuthError::RefreshRejected { status: 400, .. }
        ));
        assert!(matches!(
            b.unwrap_err(),
            AuthError::RefreshRejected { status: 400, .. }
        ));
        assert_eq!(h.idp.token_calls(), 1);

        // Give the invalidator's fire-and-forget end-session task a beat.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.store.current().await.is_none());
        assert_eq!(h.idp.end_session_calls(), 1);

        let mut saw_signed_out = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::SignedOut { .. }) {
                saw_signed_out = true;
            }
        }
        assert!(saw_signed_out);
    }

    #[tokio::test]
    async fn test_timeout_releases_all_waiters() {
        let h = harness(Script::Hang, fast_tuning());
        h.store.replace(Session::new("AT1", "RT1", None, 5)).await;

        let started = tokio::time::Instant::now();
        let (a, b, c) = tokio::join!(
            h.coordinator.ensure_fresh(),
            h.coordinator.ensure_fresh(),
            h.coordinator.ensure_fresh(),
        );
        let elapsed = started.elapsed();

        assert_eq!(a.unwrap_err(), AuthError::Timeout);
        assert_eq!(b.unwrap_err(), AuthError::Timeout);
        assert_eq!(c.unwrap_err(), AuthError::Timeout);

        // Released at the deadline, not the mock's hour-long stall.
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(5));

        assert_eq!(h.idp.token_calls(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.store.current().await.is_none());
        assert_eq!(h.idp.end_session_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_attempt_leaves_no_stale_lock() {
        let h = harness(Script::Status(400), fast_tuning());
        h.store.replace(Session::new("AT1", "RT1", None, 5)).await;

        let _ = h.coordinator.ensure_fresh().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.store.current().await.is_none());

        // A fresh sign-in starts cleanly after the failure.
        h.store
            .replace(Session::new("AT3", "RT3", None, 3600))
            .await;
        let session = h.coordinator.ensure_fresh().await.unwrap();
        assert_eq!(session.access_token, "AT3");
    }

    #[tokio::test]
    async fn test_refresh_retains_id_token_when_response_omits_it() {
        let h = harness(
            Script::Tokens {
                access_token: "AT2",
                delay: Duration::ZERO,
            },
            fast_tuning(),
        );
        h.store
            .replace(Session::new("AT1", "RT1", Some("IDT1".to_string()), 5))
            .await;

        let session = h.coordinator.ensure_fresh().await.unwrap();
        assert_eq!(session.id_token.as_deref(), Some("IDT1"));
    }

    #[tokio::test]
    async fn test_refresh_events_emitted() {
        let h = harness(
            Script::Tokens {
                access_token: "AT2",
                delay: Duration::ZERO,
            },
            fast_tuning(),
        );
        h.store.replace(Session::new("AT1", "RT1", None, 5)).await;

        let mut events = h.bus.subscribe();
        h.coordinator.ensure_fresh().await.unwrap();

        let first = events.recv().await.unwrap();
        assert!(matches!(first, SessionEvent::TokenRefreshing { .. }));

        let second = events.recv().await.unwrap();
        assert!(matches!(
            second,
            SessionEvent::RefreshResolved { success: true, .. }
        ));
    }
}
