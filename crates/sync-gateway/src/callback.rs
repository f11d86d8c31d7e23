//! Webhook listener for upstream status notifications.
//!
//! The upstream posts a form-encoded status to the URL the outbound hook
//! stamped into the send, i.e. `{callback.base_url}/{correlation_id}`. The
//! base URL may carry a path, so the key is the last segment of whatever
//! path the webhook arrives on. The status is handed to the waiting interceptor through its bounded channel.
//! A webhook carrying only a `MessageUUID` resolves through the alias table.
//!
//! Every handled webhook is answered with `200 OK`, matched or not, so the
//! upstream never retries.

use crate::domain::{CorrelationId, CorrelationStore, MessageState, StatusPayload};
use crate::middleware::GatewayMetrics;
use axum::extract::rejection::FormRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Form, Router};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, trace};

/// Status webhook body.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackForm {
    #[serde(default, rename = "MessageUUID")]
    pub message_uuid: String,
    #[serde(default, rename = "Status")]
    pub status: String,
    #[serde(default, rename = "MessageTime")]
    pub message_time: String,
    #[serde(default, rename = "SentTime")]
    pub sent_time: String,
    #[serde(default, rename = "TotalRate")]
    pub total_rate: String,
    #[serde(default, rename = "TotalAmount")]
    pub total_amount: String,
    #[serde(default, rename = "Units")]
    pub units: String,
    #[serde(default, rename = "ErrorCode")]
    pub error_code: String,
}

impl CallbackForm {
    pub fn into_status(self) -> StatusPayload {
        StatusPayload {
            message_state: MessageState::from_wire(&self.status),
            message_uuid: self.message_uuid,
            message_time: self.message_time,
            sent_time: Some(self.sent_time).filter(|t| !t.is_empty()),
            total_rate: self.total_rate,
            total_amount: self.total_amount,
            units: self.units.trim().parse().unwrap_or(0),
            error_code: self.error_code,
        }
    }
}

#[derive(Clone)]
struct CallbackState {
    store: Arc<dyn CorrelationStore>,
    metrics: Arc<GatewayMetrics>,
}

/// Router for the callback listener
pub fn callback_router(
    store: Arc<dyn CorrelationStore>,
    metrics: Arc<GatewayMetrics>,
    max_body_size: usize,
) -> Router {
    Router::new()
        .route("/", post(handle_callback))
        .route("/*path", post(handle_keyed_callback))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .with_state(CallbackState { store, metrics })
}

async fn handle_callback(
    State(state): State<CallbackState>,
    form: Result<Form<CallbackForm>, FormRejection>,
) -> StatusCode {
    deliver(&state, None, form);
    StatusCode::OK
}

async fn handle_keyed_callback(
    State(state): State<CallbackState>,
    Path(path): Path<String>,
    form: Result<Form<CallbackForm>, FormRejection>,
) -> StatusCode {
    let key = correlation_key(&path);
    if key.is_none() {
        trace!(path = %path, "Callback path does not end in a correlation id");
    }
    deliver(&state, key, form);
    StatusCode::OK
}

/// Correlation key from the last non-empty path segment.
fn correlation_key(path: &str) -> Option<CorrelationId> {
    let segment = path.rsplit('/').find(|segment| !segment.is_empty())?;
    CorrelationId::parse(segment).ok()
}

fn deliver(
    state: &CallbackState,
    key: Option<CorrelationId>,
    form: Result<Form<CallbackForm>, FormRejection>,
) {
    state.metrics.record_webhook_received();

    let Form(form) = match form {
        Ok(form) => form,
        Err(rejection) => {
            debug!(error = %rejection, "Ignoring undecodable callback");
            return;
        }
    };

    if form.message_uuid.is_empty() || form.status.is_empty() {
        debug!("Ignoring callback without message uuid or status");
        return;
    }

    let message_state = MessageState::from_wire(&form.status);
    if !message_state.is_terminal() {
        trace!(message_uuid = %form.message_uuid, state = %form.status, "Ignoring non-terminal callback");
        return;
    }

    let pending = key
        .and_then(|key| state.store.get(&key))
        .or_else(|| state.store.get_by_message_uuid(&form.message_uuid));
    let Some(pending) = pending else {
        debug!(
            correlation_id = ?key,
            message_uuid = %form.message_uuid,
            "No pending send for callback"
        );
        state.metrics.record_webhook_unmatched();
        return;
    };

    let message_uuid = form.message_uuid.clone();
    match pending.notifier.try_send(form.into_status()) {
        Ok(()) => {
            debug!(
                correlation_id = %pending.correlation_id,
                message_uuid = %message_uuid,
                state = %message_state,
                "Callback delivered"
            );
            state.metrics.record_webhook_delivered();
        }
        Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
            debug!(
                correlation_id = %pending.correlation_id,
                message_uuid = %message_uuid,
                "Callback dropped, waiter full or gone"
            );
            state.metrics.record_webhook_dropped();
        }
    }
}
