// Allow missing docs for internal items
#![allow(missing_docs)]

//! Sync Gateway - a synchronous front for an asynchronous message-send API.
//!
//! Clients send messages through this gateway exactly as they would to the
//! upstream API. Instead of the bare `202 message(s) queued` acknowledgment
//! they receive the message's delivery status, resolved by whichever comes
//! first: the upstream's status webhook or an active status poll.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                           SYNC GATEWAY                                │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐        ┌─────────────┐        ┌─────────────┐        │
//! │  │    Proxy    │        │  Callback   │        │    Admin    │        │
//! │  │  Port 8090  │        │  Port 8091  │        │  Port 8092  │        │
//! │  └──────┬──────┘        └──────┬──────┘        └─────────────┘        │
//! │         │                      │                                      │
//! │  ┌──────┴──────────────┐       │ try_send                             │
//! │  │  Tracing → Intercept│       │                                      │
//! │  └──────┬──────────┬───┘       │                                      │
//! │         │          │   ┌───────┴──────────────────┐                   │
//! │         │          └──►│   Correlation Store      │                   │
//! │         │   race       │ (key → bounded channel)  │                   │
//! │         │  ◄───────────┴──────────────────────────┘                   │
//! │         │  ◄─────────── Poller (status lookups)                       │
//! │  ┌──────┴──────┐                                                      │
//! │  │  Forwarder  │                                                      │
//! │  └──────┬──────┘                                                      │
//! └─────────┼─────────────────────────────────────────────────────────────┘
//!           │
//!      Upstream API ──── status webhook ────► Callback
//! ```
//!
//! # Resolution
//!
//! - **Webhook**: the upstream posts to `{callback.base_url}/{correlation_id}`
//! - **Poll**: `GET /v1/Account/{auth_id}/Message/{message_uuid}/` until the
//!   message leaves `queued`
//! - **Deadline**: neither arrived within `wait.timeout`, client gets `504`
//!
//! # Usage
//!
//! ```ignore
//! use sync_gateway::{GatewayConfig, SyncGatewayService};
//!
//! let service = SyncGatewayService::new(GatewayConfig::default())?;
//! let handle = service.start().await?;
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod callback;
pub mod domain;
pub mod middleware;
pub mod poller;
pub mod ports;
pub mod proxy;
pub mod service;

// Re-exports for public API
pub use adapters::HttpStatusLookup;
pub use domain::config::GatewayConfig;
pub use domain::error::{ApiError, GatewayError, InterceptError, PollError};
pub use domain::pending::{CorrelationStore, InMemoryCorrelationStore};
pub use domain::types::*;
pub use domain::CorrelationId;
pub use middleware::GatewayMetrics;
pub use poller::Poller;
pub use ports::StatusLookup;
pub use service::{GatewayHandle, SyncGatewayService};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
