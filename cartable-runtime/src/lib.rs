//! # Cartable Runtime
//!
//! Ambient runtime services shared by the cartable core modules:
//!
//! - [`events`] - typed broadcast event bus for session lifecycle events
//! - [`config`] - identity-provider settings, refresh tuning, and the
//!   validated [`CoreConfig`](config::CoreConfig) builder
//! - [`logging`] - `tracing` subscriber setup with env-filter support
//!
//! The runtime crate owns everything that is infrastructure rather than
//! authentication logic; `cartable-auth` builds on top of it.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, IdentityConfig, RefreshTuning};
pub use error::{Error, Result};
pub use events::{EventBus, SessionEvent};
pub use logging::{init_logging, LogFormat, LoggingConfig};
