//! In-Memory Token Store
//!
//! Holds the current [`Session`] for the signed-in user. All reads see a
//! complete session: `replace` swaps the whole value under a write lock
//! and `clear` atomically takes it, so there is no observable intermediate
//! state.
//!
//! Session lifetime is process-scoped. When a [`SessionMirror`] is
//! configured the store additionally mirrors the serialized session into
//! the host's short-lived client-side store, strictly best-effort: mirror
//! failures are logged and never surface to callers.

use crate::types::Session;
use cartable_bridge::SessionMirror;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Shared, atomically-replaceable session slot.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<RwLock<Option<Session>>>,
    mirror: Option<Arc<dyn SessionMirror>>,
}

impl TokenStore {
    /// Creates an empty store without mirroring.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
            mirror: None,
        }
    }

    /// Creates an empty store that mirrors the session best-effort.
    pub fn with_mirror(mirror: Arc<dyn SessionMirror>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
            mirror: Some(mirror),
        }
    }

    /// Returns a clone of the current session, if signed in.
    pub async fn current(&self) -> Option<Session> {
        self.inner.read().await.clone()
    }

    /// Atomically replaces the session, visible to all subsequent readers.
    pub async fn replace(&self, session: Session) {
        {
            let mut slot = self.inner.write().await;
            *slot = Some(session.clone());
        }
        debug!(expires_at = %session.expires_at, "Session installed");

        self.mirror_session(&session).await;
    }

    /// Atomically takes the session out of the store.
    ///
    /// Returns `None` when the store was already empty, which is what makes
    /// concurrent invalidation naturally idempotent: only one caller gets
    /// the session.
    pub async fn clear(&self) -> Option<Session> {
        let taken = self.inner.write().await.take();

        if taken.is_some() {
            if let Some(mirror) = &self.mirror {
                if let Err(e) = mirror.clear().await {
                    warn!(error = %e, "Failed to erase mirrored session");
                }
            }
        }

        taken
    }

    /// Records an authentication error tag on the current session, if any.
    ///
    /// The tag survives until the session is replaced or cleared, letting
    /// readers distinguish "signed out" from "being torn down after a
    /// failure".
    pub async fn tag_error(&self, tag: &str) {
        let mut slot = self.inner.write().await;
        if let Some(session) = slot.as_mut() {
            session.last_error = Some(tag.to_string());
        }
    }

    /// Whether the current session expires within the given buffer.
    ///
    /// An empty store counts as expiring: any caller asking is about to
    /// need a credential it does not have.
    pub async fn is_expiring_within(&self, buffer: Duration) -> bool {
        match self.inner.read().await.as_ref() {
            Some(session) => session.is_expiring_within(buffer),
            None => true,
        }
    }

    async fn mirror_session(&self, session: &Session) {
        let Some(mirror) = &self.mirror else {
            return;
        };

        match serde_json::to_vec(session) {
            Ok(payload) => {
                if let Err(e) = mirror.store(&payload).await {
                    warn!(error = %e, "Failed to mirror session");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize session for mirroring"),
        }
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}
