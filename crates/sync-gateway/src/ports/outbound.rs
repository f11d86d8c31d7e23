//! Outbound ports for the gateway.

use crate::domain::{Credentials, PollError, StatusPayload};
use async_trait::async_trait;

/// Status lookup against the upstream API.
///
/// Returns whatever state the upstream reports, `queued` included; the
/// poller decides what counts as resolved.
#[async_trait]
pub trait StatusLookup: Send + Sync {
    async fn lookup(
        &self,
        message_uuid: &str,
        credentials: &Credentials,
    ) -> Result<StatusPayload, PollError>;
}
