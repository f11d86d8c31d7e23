//! Middleware for the proxy listener.
//!
//! Layer order: Request → Tracing → Intercept → Forwarder

pub mod metrics;
pub mod tracing;

pub use metrics::{GatewayMetrics, RequestTimer, Resolution};
pub use tracing::TracingLayer;
