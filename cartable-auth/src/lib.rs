//! # Cartable Authentication Core
//!
//! Token lifecycle and unauthorized-request recovery for the cartable
//! client: keeps the short-lived access token fresh by silently exchanging
//! the refresh token before expiry, and reacts to live API calls failing
//! with 401 by running exactly one refresh attempt system-wide, suspending
//! the affected callers, and degrading to a forced sign-out when the
//! refresh fails.
//!
//! ## Guarantees
//!
//! - At most one refresh attempt is in flight per session at any instant;
//!   concurrent demands coalesce into it.
//! - Every caller blocked on an attempt receives exactly its outcome -
//!   no waiter is dropped, none notified twice.
//! - The session is only ever replaced wholesale; readers never observe a
//!   half-updated token pair.
//! - A stalled refresh is cut off at a hard deadline and treated as a
//!   failure; nothing hangs the application.
//!
//! ## Modules
//!
//! - [`types`] - `Session` and refresh `Outcome`
//! - [`token_store`] - atomically-replaceable session slot
//! - [`identity`] - identity-provider client (refresh grant, end-session)
//! - [`coordinator`] - single-flight refresh engine
//! - [`invalidator`] - idempotent forced sign-out
//! - [`interceptor`] - per-request authorization wrapper
//! - [`manager`] - facade wiring everything from a `CoreConfig`

pub mod coordinator;
pub mod error;
pub mod identity;
pub mod interceptor;
pub mod invalidator;
pub mod manager;
pub mod token_store;
pub mod types;

pub use coordinator::RefreshCoordinator;
pub use error::{AuthError, Result};
pub use identity::IdentityClient;
pub use interceptor::AuthorizedClient;
pub use invalidator::SessionInvalidator;
pub use manager::SessionManager;
pub use token_store::TokenStore;
pub use types::{Outcome, Session};
