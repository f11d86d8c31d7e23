//! Reverse proxy in front of the upstream API.
//!
//! Layer order: Intercept → Forwarder

pub mod forwarder;
pub mod interceptor;
pub mod route;

pub use forwarder::UpstreamForwarder;
pub use interceptor::{InterceptLayer, InterceptService, Interceptor};
pub use route::is_send_message_route;
