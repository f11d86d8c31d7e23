//! HTTP status lookup against the upstream message detail endpoint.

use crate::domain::config::{PollConfig, UpstreamConfig};
use crate::domain::{Credentials, GatewayError, PollError, StatusPayload};
use crate::ports::StatusLookup;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::trace;

/// `GET {base}/v1/Account/{auth_id}/Message/{message_uuid}/` with the
/// caller's basic credentials.
///
/// Uses its own client so polling timeouts stay short and independent of
/// the forwarder's.
#[derive(Clone)]
pub struct HttpStatusLookup {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusLookup {
    pub fn new(upstream: &UpstreamConfig, poll: &PollConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(poll.connect_timeout)
            .timeout(poll.request_timeout)
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(100)
            .build()
            .map_err(|e| GatewayError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: upstream.base().to_string(),
        })
    }

    fn message_url(&self, auth_id: &str, message_uuid: &str) -> String {
        format!(
            "{}/v1/Account/{}/Message/{}/",
            self.base_url, auth_id, message_uuid
        )
    }
}

#[async_trait]
impl StatusLookup for HttpStatusLookup {
    async fn lookup(
        &self,
        message_uuid: &str,
        credentials: &Credentials,
    ) -> Result<StatusPayload, PollError> {
        let url = self.message_url(&credentials.auth_id, message_uuid);
        let response = self
            .client
            .get(&url)
            .basic_auth(&credentials.auth_id, Some(&credentials.auth_token))
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(PollError::Transport(format!(
                "API returned non-200 resp: {}",
                status.as_u16()
            )));
        }

        let body = response.bytes().await?;
        trace!(message_uuid, bytes = body.len(), "Status lookup response");
        serde_json::from_slice(&body)
            .map_err(|e| PollError::Transport(format!("invalid status body: {e}")))
    }
}
