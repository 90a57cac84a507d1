//! Request Interceptor
//!
//! Wraps outbound API calls: attaches the current access token, detects
//! unauthorized responses, and drives the retry-or-fail decision for that
//! one call. The refresh itself always goes through the coordinator's
//! single flight - an interceptor never refreshes on its own.
//!
//! A call retries at most once per unauthorized cause. If the retried
//! request is rejected again, the original failure propagates; the
//! invalidator has already torn the session down by then.

use crate::coordinator::RefreshCoordinator;
use crate::error::{AuthError, Result};
use cartable_bridge::{HttpClient, HttpRequest, HttpResponse};
use cartable_runtime::events::{EventBus, SessionEvent};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// HTTP client wrapper that keeps requests authorized.
#[derive(Clone)]
pub struct AuthorizedClient {
    http_client: Arc<dyn HttpClient>,
    coordinator: RefreshCoordinator,
    event_bus: EventBus,
}

impl AuthorizedClient {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        coordinator: RefreshCoordinator,
        event_bus: EventBus,
    ) -> Self {
        Self {
            http_client,
            coordinator,
            event_bus,
        }
    }

    /// Executes one API call with the current access token.
    ///
    /// The token is checked for freshness before sending, so the reactive
    /// 401 path is the exception rather than the norm. Both the proactive
    /// check and the 401 reaction converge on the coordinator's single
    /// flight.
    ///
    /// # Errors
    ///
    /// - `AuthError::NotAuthenticated` - no session installed
    /// - `AuthError::Network` - the request could not complete
    /// - `AuthError::Unauthorized` - the call was rejected and the session
    ///   could not be recovered
    /// - `AuthError::AlreadyRetried` - still unauthorized after one refresh
    ///   and retry
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let session = self.coordinator.ensure_fresh().await?;

        let first = self
            .http_client
            .execute(request.clone().bearer_token(&session.access_token))
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if !first.is_unauthorized() {
            return Ok(first);
        }

        debug!("Unauthorized response, joining refresh flight");
        let _ = self.event_bus.emit(SessionEvent::UnauthorizedObserved);

        let refreshed = match self.coordinator.on_unauthorized().await {
            Ok(session) => session,
            Err(AuthError::NotAuthenticated) => return Err(AuthError::NotAuthenticated),
            Err(error) => {
                // The session is already torn down; the caller gets the
                // failure it observed, not the refresh internals.
                warn!(%error, "Refresh failed, propagating the original rejection");
                return Err(AuthError::Unauthorized {
                    status: first.status,
                });
            }
        };

        let retry = self
            .http_client
            .execute(request.bearer_token(&refreshed.access_token))
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if retry.is_unauthorized() {
            warn!(status = retry.status, "Request unauthorized even after refresh");
            return Err(AuthError::AlreadyRetried {
                status: retry.status,
            });
        }

        Ok(retry)
    }
}
