//! Active status polling - the second leg of the race.
//!
//! Issues status lookups for one message on a fixed interval until the
//! upstream reports a terminal state, the attempt budget runs out, or the
//! cancellation token fires (the webhook won, the deadline passed, or the
//! client went away).

use crate::domain::config::PollConfig;
use crate::domain::{Credentials, MessageState, PollError, StatusPayload};
use crate::middleware::GatewayMetrics;
use crate::ports::StatusLookup;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Polls the upstream status endpoint on behalf of one intercepted send.
pub struct Poller {
    lookup: Arc<dyn StatusLookup>,
    max_attempts: u32,
    interval: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl Poller {
    pub fn new(
        lookup: Arc<dyn StatusLookup>,
        config: &PollConfig,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            lookup,
            max_attempts: config.max_attempts,
            interval: config.interval,
            metrics,
        }
    }

    /// One lookup, classified.
    ///
    /// Any non-terminal state (`queued`, or one this gateway does not know)
    /// is reported as [`PollError::StillQueued`]; the lookup itself is
    /// abandoned as soon as `cancel` fires.
    pub async fn poll_once(
        &self,
        message_uuid: &str,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<StatusPayload, PollError> {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            result = self.lookup.lookup(message_uuid, credentials) => result,
        };
        self.metrics.record_poll_attempt(status.is_ok());

        let status = status?;
        if !status.message_state.is_terminal() {
            if status.message_state != MessageState::Queued {
                debug!(message_uuid, state = %status.message_state, "Ignoring non-terminal status");
            }
            return Err(PollError::StillQueued);
        }
        Ok(status)
    }

    /// Poll until resolved, cancelled, or out of attempts.
    ///
    /// On exhaustion the last attempt's error is returned.
    pub async fn poll_until_resolved(
        &self,
        message_uuid: &str,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<StatusPayload, PollError> {
        let mut last_error = PollError::StillQueued;

        for attempt in 1..=self.max_attempts {
            match self.poll_once(message_uuid, credentials, cancel).await {
                Ok(status) => return Ok(status),
                Err(PollError::Cancelled) => return Err(PollError::Cancelled),
                Err(PollError::StillQueued) => {
                    debug!(message_uuid, attempt, "Message still queued");
                    last_error = PollError::StillQueued;
                }
                Err(e) => {
                    warn!(message_uuid, attempt, error = %e, "Status lookup failed");
                    last_error = e;
                }
            }

            if attempt == self.max_attempts {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        Err(last_error)
    }

    /// Task body: deliver a resolved status on `tx`, or drop it silently.
    ///
    /// Nothing is sent once `cancel` has fired.
    pub async fn run(
        self: Arc<Self>,
        message_uuid: String,
        credentials: Credentials,
        cancel: CancellationToken,
        tx: oneshot::Sender<StatusPayload>,
    ) {
        match self
            .poll_until_resolved(&message_uuid, &credentials, &cancel)
            .await
        {
            Ok(status) => {
                if cancel.is_cancelled() {
                    return;
                }
                debug!(
                    message_uuid = %message_uuid,
                    state = %status.message_state,
                    "Poll resolved status"
                );
                let _ = tx.send(status);
            }
            Err(PollError::Cancelled) => {
                debug!(message_uuid = %message_uuid, "Polling cancelled");
            }
            Err(e) => {
                debug!(
                    message_uuid = %message_uuid,
                    attempts = self.max_attempts,
                    error = %e,
                    "Polling gave up"
                );
            }
        }
    }
}
