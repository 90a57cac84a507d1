use crate::error::{AuthError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// An authenticated session.
///
/// Exactly one logical session exists per signed-in user. It is replaced
/// wholesale on every successful refresh - never mutated field by field -
/// so readers can never observe a half-updated access/refresh token pair.
///
/// # Security
///
/// Tokens should never be logged. The `Debug` implementation redacts them.
///
/// # Examples
///
/// ```
/// use cartable_auth::Session;
///
/// let session = Session::new("AT1", "RT1", Some("IDT1".to_string()), 3600);
/// assert!(!session.is_expiring_within(std::time::Duration::from_secs(60)));
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    /// Short-lived credential attached to API calls
    pub access_token: String,
    /// Longer-lived credential exchanged for new access tokens
    pub refresh_token: String,
    /// Identity token, used as the end-session hint on sign-out
    pub id_token: Option<String>,
    /// When the access token expires (UTC)
    pub expires_at: chrono::DateTime<chrono::Utc>,
    /// Last authentication error observed for this session, if any
    pub last_error: Option<String>,
}

impl Session {
    /// Creates a session expiring `expires_in` seconds from now.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        id_token: Option<String>,
        expires_in: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            id_token,
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(expires_in),
            last_error: None,
        }
    }

    /// Whether the access token expires within the given buffer.
    ///
    /// A token counted as expiring triggers a proactive refresh before the
    /// provider actually starts rejecting it.
    pub fn is_expiring_within(&self, buffer: Duration) -> bool {
        let buffer = chrono::Duration::seconds(buffer.as_secs() as i64);
        chrono::Utc::now() >= self.expires_at - buffer
    }

    /// Time remaining until expiry, or `None` if already expired.
    pub fn time_until_expiry(&self) -> Option<chrono::Duration> {
        let now = chrono::Utc::now();
        if now >= self.expires_at {
            None
        } else {
            Some(self.expires_at - now)
        }
    }
}

// Custom Debug implementation to avoid logging tokens
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// How one refresh attempt resolved, fanned out to every waiter.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A new session was installed in the token store.
    Refreshed(Session),
    /// The attempt failed; the session has been invalidated.
    Failed(AuthError),
}

impl Outcome {
    pub fn into_result(self) -> Result<Session> {
        match self {
            Outcome::Refreshed(session) => Ok(session),
            Outcome::Failed(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    fn session_expiring_in(seconds: i64) -> Session {
        Session {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            id_token: None,
            expires_at: Utc::now() + ChronoDuration::seconds(seconds),
            last_error: None,
        }
    }

    #[test]
    fn test_session_new() {
        let session = Session::new("access", "refresh", Some("id".to_string()), 3600);
        assert_eq!(session.access_token, "access");
        assert_eq!(session.refresh_token, "refresh");
        assert_eq!(session.id_token.as_deref(), Some("id"));
        assert!(session.time_until_expiry().is_some());
    }

    #[test]
    fn test_is_expiring_within_fresh_token() {
        let session = session_expiring_in(3600);
        assert!(!session.is_expiring_within(Duration::from_secs(60)));
    }

    #[test]
    fn test_is_expiring_within_buffer() {
        let session = session_expiring_in(30);
        assert!(session.is_expiring_within(Duration::from_secs(60)));
    }

    #[test]
    fn test_is_expiring_within_past_expiry() {
        let session = session_expiring_in(-3600);
        assert!(session.is_expiring_within(Duration::from_secs(60)));
        assert!(session.time_until_expiry().is_none());
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let session = Session::new(
            "secret_access_token",
            "secret_refresh_token",
            Some("secret_id_token".to_string()),
            3600,
        );

        let debug_str = format!("{:?}", session);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("secret_access_token"));
        assert!(!debug_str.contains("secret_refresh_token"));
        assert!(!debug_str.contains("secret_id_token"));
    }

    #[test]
    fn test_session_serialization() {
        let session = Session::new("access", "refresh", None, 3600);
        let json = serde_json::to_string(&session).unwrap();
        let deserialized: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.access_token, session.access_token);
        assert_eq!(deserialized.refresh_token, session.refresh_token);
        assert_eq!(deserialized.expires_at, session.expires_at);
    }

    #[test]
    fn test_outcome_into_result() {
        let session = Session::new("access", "refresh", None, 3600);
        assert!(Outcome::Refreshed(session).into_result().is_ok());

        let failed = Outcome::Failed(AuthError::Timeout).into_result();
        assert_eq!(failed.unwrap_err(), AuthError::Timeout);
    }
}
