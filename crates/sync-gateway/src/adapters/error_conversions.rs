//! Error conversions from infrastructure types.
//!
//! These conversions involve I/O types and belong in the adapters layer.

use crate::domain::{GatewayError, InterceptError, PollError};

impl From<reqwest::Error> for PollError {
    fn from(e: reqwest::Error) -> Self {
        PollError::Transport(e.to_string())
    }
}

impl From<reqwest::Error> for InterceptError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_body() || e.is_decode() {
            InterceptError::BodyRead(e.to_string())
        } else {
            InterceptError::Upstream(e.to_string())
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Bind(e.to_string())
    }
}
