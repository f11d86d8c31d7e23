//! Gateway error types.
//!
//! Only `InterceptError` ever reaches a client; everything on the
//! pass-through side is logged and forwarded untouched instead.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Error codes carried in client-visible error bodies
pub mod codes {
    pub const INTERNAL_ERROR: i32 = 1000;
    pub const BAD_REQUEST_BODY: i32 = 1001;
    pub const UPSTREAM_UNAVAILABLE: i32 = 1002;
    pub const BAD_UPSTREAM_RESPONSE: i32 = 1003;
    pub const CALLBACK_TIMEOUT: i32 = 1004;
}

/// Error body written to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Gateway error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Optional additional data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i32, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn internal(details: impl Into<String>) -> Self {
        Self::new(
            codes::INTERNAL_ERROR,
            format!("Internal error: {}", details.into()),
        )
    }

    /// Render as a JSON response with the given status.
    pub fn into_response_with(self, status: StatusCode) -> Response {
        let body = serde_json::to_vec(&serde_json::json!({ "error": self })).unwrap_or_default();
        let mut response = Response::new(axum::body::Body::from(body));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Failure of the interception hooks or the forwarder.
#[derive(Debug, thiserror::Error)]
pub enum InterceptError {
    /// The client's request body could not be buffered (or exceeded the limit)
    #[error("failed to read request body: {0}")]
    RequestBody(String),

    /// Reading the upstream response body failed (or it exceeded the limit)
    #[error("failed to read body: {0}")]
    BodyRead(String),

    /// Resolved status could not be serialized
    #[error("failed to serialize response body: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Neither webhook nor poll resolved before the deadline
    #[error("timeout on waiting for callback after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Upstream could not be reached
    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl InterceptError {
    /// HTTP status surfaced to the client
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::RequestBody(_) => StatusCode::BAD_REQUEST,
            Self::BodyRead(_) | Self::Serialize(_) | Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::Timeout(wait) => ApiError::with_data(
                codes::CALLBACK_TIMEOUT,
                self.to_string(),
                serde_json::json!({ "timeout_ms": wait.as_millis() as u64 }),
            ),
            Self::RequestBody(_) => ApiError::new(codes::BAD_REQUEST_BODY, self.to_string()),
            Self::BodyRead(_) => ApiError::new(codes::BAD_UPSTREAM_RESPONSE, self.to_string()),
            Self::Upstream(_) => ApiError::new(codes::UPSTREAM_UNAVAILABLE, self.to_string()),
            Self::Serialize(_) => ApiError::internal(self.to_string()),
        }
    }
}

impl IntoResponse for InterceptError {
    fn into_response(self) -> Response {
        let status = self.status();
        self.to_api_error().into_response_with(status)
    }
}

/// Outcome of a single status lookup that did not yield a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// Upstream still reports the message as queued
    #[error("message still in queue")]
    StillQueued,

    /// Network failure, non-200 status, or unparseable body
    #[error("status lookup failed: {0}")]
    Transport(String),

    /// The race was decided elsewhere
    #[error("polling cancelled")]
    Cancelled,
}

/// Gateway-level errors (startup and wiring)
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    /// HTTP client construction failed
    #[error("http client error: {0}")]
    Client(String),
}
