//! # Host Bridge Traits
//!
//! Platform abstraction traits implemented by each host embedding the
//! cartable core (desktop shell, server-side gateway, test harness).
//!
//! ## Overview
//!
//! This crate defines the contract between the core library and
//! platform-specific implementations:
//!
//! - [`HttpClient`](http::HttpClient) - async HTTP operations with bearer
//!   tokens and per-request timeouts
//! - [`SessionMirror`](storage::SessionMirror) - optional best-effort mirror
//!   for the in-memory session (short-lived client-side store)
//!
//! All bridge traits require `Send + Sync` bounds so they can be shared
//! across async tasks behind `Arc`. Implementations should convert
//! platform-specific errors into [`BridgeError`](error::BridgeError) with
//! actionable messages.
//!
//! A reqwest-backed [`ReqwestHttpClient`](reqwest_client::ReqwestHttpClient)
//! ships behind the `reqwest-client` feature for hosts without their own
//! HTTP stack.

pub mod error;
pub mod http;
#[cfg(feature = "reqwest-client")]
pub mod reqwest_client;
pub mod storage;

pub use error::BridgeError;
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
#[cfg(feature = "reqwest-client")]
pub use reqwest_client::ReqwestHttpClient;
pub use storage::{InMemorySessionMirror, SessionMirror};
