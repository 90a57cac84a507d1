use thiserror::Error;

/// Authentication failures.
///
/// `Clone` so a single failure can be fanned out to every waiter of a
/// refresh attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Token endpoint unreachable: {0}")]
    Network(String),

    #[error("Token endpoint rejected the refresh grant ({status}): {body}")]
    RefreshRejected { status: u16, body: String },

    #[error("Refresh attempt deadline elapsed")]
    Timeout,

    #[error("Request rejected as unauthorized (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Request still unauthorized (HTTP {status}) after token refresh")]
    AlreadyRetried { status: u16 },

    #[error("No active session")]
    NotAuthenticated,

    #[error("Malformed token endpoint response: {0}")]
    MalformedResponse(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
