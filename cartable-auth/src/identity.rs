//! Identity Provider Client
//!
//! Remote calls against the identity provider: the refresh grant on
//! `{issuer}/connect/token` and the best-effort sign-out notification on
//! `{issuer}/connect/endsession`.
//!
//! The refresh call is deliberately single-shot - no internal retry or
//! backoff. A rejected or unreachable token endpoint means the session is
//! torn down, and retrying a broken session silently would only delay the
//! forced sign-out the caller is about to see.
//!
//! # Security
//!
//! Tokens, grants, and hints are never logged.

use crate::error::{AuthError, Result};
use crate::types::Session;
use cartable_bridge::{HttpClient, HttpMethod, HttpRequest};
use cartable_runtime::config::IdentityConfig;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Client for the identity provider's token and end-session endpoints.
pub struct IdentityClient {
    config: IdentityConfig,
    http_client: Arc<dyn HttpClient>,
    http_timeout: Duration,
}

impl IdentityClient {
    pub fn new(
        config: IdentityConfig,
        http_client: Arc<dyn HttpClient>,
        http_timeout: Duration,
    ) -> Self {
        Self {
            config,
            http_client,
            http_timeout,
        }
    }

    /// Exchanges a refresh token for a new session.
    ///
    /// When the provider omits a rotated `refresh_token` in its response,
    /// the previous one is retained - providers are not required to rotate
    /// on every exchange.
    ///
    /// # Errors
    ///
    /// - `AuthError::Network` - the endpoint could not be reached
    /// - `AuthError::RefreshRejected` - the endpoint returned a non-2xx status
    /// - `AuthError::MalformedResponse` - the success body did not parse
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        let body = {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            form.append_pair("client_id", &self.config.client_id);
            if let Some(secret) = &self.config.client_secret {
                form.append_pair("client_secret", secret);
            }
            form.append_pair("grant_type", "refresh_token");
            form.append_pair("refresh_token", refresh_token);
            form.finish()
        };

        debug!("Exchanging refresh token");

        let request = HttpRequest::new(HttpMethod::Post, self.config.token_endpoint())
            .form(body)
            .timeout(self.http_timeout);

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if !response.is_success() {
            let status = response.status;
            let body = response
                .text()
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            warn!(status, "Token endpoint rejected the refresh grant");

            return Err(AuthError::RefreshRejected { status, body });
        }

        let token_response: TokenEndpointResponse = response
            .json()
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;

        debug!(
            expires_in = token_response.expires_in,
            rotated = token_response.refresh_token.is_some(),
            "Refresh grant accepted"
        );

        Ok(Session::new(
            token_response.access_token,
            token_response
                .refresh_token
                .unwrap_or_else(|| refresh_token.to_string()),
            token_response.id_token,
            token_response.expires_in,
        ))
    }

    /// Notifies the provider's end-session endpoint, best-effort.
    ///
    /// All failures are logged and swallowed: a dead identity provider must
    /// not block local sign-out.
    #[instrument(skip(self, id_token_hint))]
    pub async fn end_session(&self, id_token_hint: Option<&str>) {
        let mut url = self.config.end_session_endpoint();
        {
            let mut query = url.query_pairs_mut();
            if let Some(hint) = id_token_hint {
                query.append_pair("id_token_hint", hint);
            }
            query.append_pair(
                "post_logout_redirect_uri",
                &self.config.post_logout_redirect_uri,
            );
        }

        let request = HttpRequest::new(HttpMethod::Get, url).timeout(self.http_timeout);

        match self.http_client.execute(request).await {
            Ok(response) if response.is_success() => {
                debug!("End-session endpoint notified");
            }
            Ok(response) => {
                warn!(
                    status = response.status,
                    "End-session endpoint returned non-success"
                );
            }
            Err(e) => {
                warn!(error = %e, "End-session notification failed");
            }
        }
    }
}

/// Token response from the identity provider.
#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600 // Default to 1 hour if not specified
}
