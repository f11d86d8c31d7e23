//! Domain types for the gateway.
//!
//! Configuration, errors, wire types, and the correlation store.

pub mod config;
pub mod correlation;
pub mod error;
pub mod pending;
pub mod types;

// Re-exports for convenience
pub use config::{ConfigError, GatewayConfig};
pub use correlation::CorrelationId;
pub use error::{ApiError, GatewayError, InterceptError, PollError};
pub use pending::{
    CorrelationStore, EntryGuard, InMemoryCorrelationStore, PendingRequest, StoreStats,
    NOTIFICATION_CAPACITY,
};
pub use types::{Credentials, MessageState, SendAck, SendRequest, StatusPayload};
