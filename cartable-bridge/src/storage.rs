//! Session Mirroring
//!
//! The session lives in process memory; hosts may additionally mirror it
//! into a short-lived client-side store (session storage, encrypted page
//! state) so a reload within the token lifetime can resume without a full
//! sign-in. Mirroring is strictly best-effort: the core logs mirror
//! failures and carries on.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::error::Result;

/// Best-effort mirror for the serialized session.
///
/// Implementations must treat the payload as opaque and sensitive: never
/// log it, and scope its lifetime to the host session (it is erased on
/// sign-out).
#[async_trait]
pub trait SessionMirror: Send + Sync {
    /// Store the serialized session, replacing any previous value.
    async fn store(&self, payload: &[u8]) -> Result<()>;

    /// Load the previously mirrored session, if any.
    async fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Erase the mirrored session.
    async fn clear(&self) -> Result<()>;
}

/// In-memory mirror, useful for tests and for hosts that opt out of
/// client-side mirroring but want uniform wiring.
#[derive(Default)]
pub struct InMemorySessionMirror {
    slot: Mutex<Option<Vec<u8>>>,
    writes: AtomicUsize,
}

impl InMemorySessionMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `store` calls observed. Test hook.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionMirror for InMemorySessionMirror {
    async fn store(&self, payload: &[u8]) -> Result<()> {
        *self.slot.lock().await = Some(payload.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.slot.lock().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        *self.slot.lock().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_load_clear() {
        let mirror = InMemorySessionMirror::new();

        assert!(mirror.load().await.unwrap().is_none());

        mirror.store(b"payload").await.unwrap();
        assert_eq!(mirror.load().await.unwrap().as_deref(), Some(&b"payload"[..]));
        assert_eq!(mirror.writes(), 1);

        mirror.clear().await.unwrap();
        assert!(mirror.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_replaces_previous() {
        let mirror = InMemorySessionMirror::new();

        mirror.store(b"first").await.unwrap();
        mirror.store(b"second").await.unwrap();

        assert_eq!(mirror.load().await.unwrap().as_deref(), Some(&b"second"[..]));
        assert_eq!(mirror.writes(), 2);
    }
}
