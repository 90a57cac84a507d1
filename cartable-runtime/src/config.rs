//! # Core Configuration
//!
//! Configuration for the cartable session core: identity-provider settings,
//! refresh tuning, and the host bridges the core runs against.
//!
//! The builder enforces fail-fast validation so a misconfigured host is
//! rejected at startup with an actionable message rather than failing on
//! the first refresh.
//!
//! ## Usage
//!
//! ```no_run
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
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let identity = IdentityConfig::new(
//!     "https://sso.bank.example",
//!     "cartable-web",
//!     "https://cartable.bank.example/signed-out",
//! )?;
//!
//! let config = CoreConfig::builder()
//!     .identity(identity)
//!     .http_client(Arc::new(MyHttpClient))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use cartable_bridge::{HttpClient, SessionMirror};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::events::DEFAULT_EVENT_BUFFER_SIZE;

/// Identity provider settings.
///
/// The issuer is the base URL of the provider; token and end-session
/// endpoints are derived from it (`{issuer}/connect/token` and
/// `{issuer}/connect/endsession`).
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Base URL of the identity provider (normalized to end with `/`).
    pub issuer: Url,
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret (optional for public clients)
    pub client_secret: Option<String>,
    /// Where the provider should send the browser after a remote sign-out
    pub post_logout_redirect_uri: String,
}

impl IdentityConfig {
    /// Creates a new identity configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the issuer is not a valid absolute URL.
    pub fn new(
        issuer: impl AsRef<str>,
        client_id: impl Into<String>,
        post_logout_redirect_uri: impl Into<String>,
    ) -> Result<Self> {
        let mut issuer = Url::parse(issuer.as_ref())
            .map_err(|e| Error::Config(format!("Invalid issuer URL: {}", e)))?;

        if issuer.cannot_be_a_base() {
            return Err(Error::Config(
                "Issuer must be an absolute http(s) URL".to_string(),
            ));
        }

        // Url::join treats a path without a trailing slash as a file segment
        if !issuer.path().ends_with('/') {
            let path = format!("{}/", issuer.path());
            issuer.set_path(&path);
        }

        Ok(Self {
            issuer,
            client_id: client_id.into(),
            client_secret: None,
            post_logout_redirect_uri: post_logout_redirect_uri.into(),
        })
    }

    /// Loads identity settings from the environment.
    ///
    /// Reads `CARTABLE_ISSUER`, `CARTABLE_CLIENT_ID`,
    /// `CARTABLE_POST_LOGOUT_REDIRECT_URI` (all required) and
    /// `CARTABLE_CLIENT_SECRET` (optional).
    pub fn from_env() -> Result<Self> {
        let issuer = require_env("CARTABLE_ISSUER")?;
        let client_id = require_env("CARTABLE_CLIENT_ID")?;
        let post_logout = require_env("CARTABLE_POST_LOGOUT_REDIRECT_URI")?;

        let mut config = Self::new(issuer, client_id, post_logout)?;
        config.client_secret = std::env::var("CARTABLE_CLIENT_SECRET").ok();
        Ok(config)
    }

    /// Sets the client secret.
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// The token endpoint used for the refresh grant.
    pub fn token_endpoint(&self) -> Url {
        self.issuer
            .join("connect/token")
            .expect("issuer is an absolute URL")
    }

    /// The best-effort end-session endpoint used on sign-out.
    pub fn end_session_endpoint(&self) -> Url {
        self.issuer
            .join("connect/endsession")
            .expect("issuer is an absolute URL")
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| Error::Config(format!("{} is required but not set", key)))
}

/// Tuning knobs for the refresh coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTuning {
    /// How close to expiry a token counts as expiring (proactive refresh window)
    pub refresh_buffer: Duration,
    /// Hard deadline for one refresh attempt; waiters are released with a
    /// timeout failure once it elapses
    pub attempt_deadline: Duration,
    /// Timeout for individual identity-provider HTTP requests
    pub http_timeout: Duration,
}

impl Default for RefreshTuning {
    fn default() -> Self {
        Self {
            refresh_buffer: Duration::from_secs(60),
            attempt_deadline: Duration::from_secs(10),
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl RefreshTuning {
    /// Validates the tuning values.
    pub fn validate(&self) -> Result<()> {
        if self.attempt_deadline.is_zero() {
            return Err(Error::Config(
                "Attempt deadline must be greater than zero".to_string(),
            ));
        }

        if self.http_timeout.is_zero() {
            return Err(Error::Config(
                "HTTP timeout must be greater than zero".to_string(),
            ));
        }

        if self.http_timeout > self.attempt_deadline {
            return Err(Error::Config(
                "HTTP timeout exceeds the attempt deadline; the deadline would \
                 always fire first. Lower the HTTP timeout or raise the deadline."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Core configuration for the cartable session core.
///
/// Use [`CoreConfig::builder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Identity provider settings
    pub identity: IdentityConfig,
    /// HTTP client for identity-provider and API calls (required)
    pub http_client: Arc<dyn HttpClient>,
    /// Optional best-effort session mirror
    pub session_mirror: Option<Arc<dyn SessionMirror>>,
    /// Refresh coordinator tuning
    pub tuning: RefreshTuning,
    /// Event bus buffer size
    pub event_buffer: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("identity", &self.identity)
            .field("http_client", &"HttpClient { ... }")
            .field(
                "session_mirror",
                &self.session_mirror.as_ref().map(|_| "SessionMirror { ... }"),
            )
            .field("tuning", &self.tuning)
            .field("event_buffer", &self.event_buffer)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }
}

/// Builder for [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    identity: Option<IdentityConfig>,
    http_client: Option<Arc<dyn HttpClient>>,
    session_mirror: Option<Arc<dyn SessionMirror>>,
    tuning: Option<RefreshTuning>,
    event_buffer: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the identity provider settings (required).
    pub fn identity(mut self, identity: IdentityConfig) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Sets the HTTP client implementation (required).
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the optional session mirror.
    pub fn session_mirror(mut self, mirror: Arc<dyn SessionMirror>) -> Self {
        self.session_mirror = Some(mirror);
        self
    }

    /// Sets all refresh tuning knobs at once.
    pub fn tuning(mut self, tuning: RefreshTuning) -> Self {
        self.tuning = Some(tuning);
        self
    }

    /// Sets the proactive refresh window.
    pub fn refresh_buffer(mut self, buffer: Duration) -> Self {
        let mut tuning = self.tuning.unwrap_or_default();
        tuning.refresh_buffer = buffer;
        self.tuning = Some(tuning);
        self
    }

    /// Sets the refresh attempt deadline.
    pub fn attempt_deadline(mut self, deadline: Duration) -> Self {
        let mut tuning = self.tuning.unwrap_or_default();
        tuning.attempt_deadline = deadline;
        self.tuning = Some(tuning);
        self
    }

    /// Sets the identity-provider HTTP timeout.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        let mut tuning = self.tuning.unwrap_or_default();
        tuning.http_timeout = timeout;
        self.tuning = Some(tuning);
        self
    }

    /// Sets the event bus buffer size.
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = Some(capacity);
        self
    }

    /// Builds the final `CoreConfig`, validating required dependencies.
    pub fn build(self) -> Result<CoreConfig> {
        let identity = self.identity.ok_or_else(|| {
            Error::Config(
                "Identity configuration is required. Use .identity() to set it.".to_string(),
            )
        })?;

        let http_client = self.http_client.ok_or_else(|| Error::CapabilityMissing {
            capability: "HttpClient".to_string(),
            message: "No HTTP client implementation provided. \
                      Enable the cartable-bridge 'reqwest-client' feature for the \
                      built-in client, or inject a host-native adapter."
                .to_string(),
        })?;

        let tuning = self.tuning.unwrap_or_default();
        tuning.validate()?;

        let event_buffer = self.event_buffer.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE);
        if event_buffer == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than zero".to_string(),
            ));
        }

        Ok(CoreConfig {
            identity,
            http_client,
            session_mirror: self.session_mirror,
            tuning,
            event_buffer,
        })
    }
}
