//! Adapters for the gateway.
//!
//! Infrastructure implementations of the ports.

pub mod error_conversions;
pub mod status_client;

pub use status_client::HttpStatusLookup;
