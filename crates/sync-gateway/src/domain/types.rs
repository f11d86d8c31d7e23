//! Wire types for the upstream messaging API and the client-visible status.
//!
//! `StatusPayload` is the one shape shared by all three legs: the webhook
//! delivers it, the poller parses it from a status lookup, and the gateway
//! writes it back to the waiting client.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;

/// Acknowledgment text the upstream returns when a send was accepted.
pub const QUEUED_ACK_MESSAGE: &str = "message(s) queued";

/// Delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    Queued,
    Sent,
    Delivered,
    Undelivered,
    Failed,
    /// Any state this gateway does not know about.
    #[serde(other)]
    Unknown,
}

impl MessageState {
    /// Parse the upstream's state string. Unrecognized values map to `Unknown`.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "queued" => Self::Queued,
            "sent" => Self::Sent,
            "delivered" => Self::Delivered,
            "undelivered" => Self::Undelivered,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Terminal states carry a final (or best-effort final) answer for the client.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Sent | Self::Delivered | Self::Undelivered | Self::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Undelivered => "undelivered",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized outcome of a send, returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub message_uuid: String,
    pub message_state: MessageState,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_time: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_rate: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_amount: String,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub units: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub error_code: String,
}

impl StatusPayload {
    /// Minimal payload carrying only identity and state.
    pub fn new(message_uuid: impl Into<String>, message_state: MessageState) -> Self {
        Self {
            message_uuid: message_uuid.into(),
            message_state,
            message_time: String::new(),
            sent_time: None,
            total_rate: String::new(),
            total_amount: String::new(),
            units: 0,
            error_code: String::new(),
        }
    }
}

/// Body of a send-message request as forwarded upstream.
///
/// Only the notification fields are typed; everything else (`src`, `dst`,
/// `text`, `media_urls`, `powerpack_uuid`, ...) is carried through verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendRequest {
    /// Notification URL the upstream will POST status webhooks to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// HTTP method for the notification webhook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Upstream acknowledgment of a send.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendAck {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub message_uuid: Vec<String>,
}

impl SendAck {
    /// The single message UUID of a queued acknowledgment, if this ack is one.
    ///
    /// Multi-recipient sends (more than one UUID) and anything other than the
    /// queued phrase yield `None`.
    pub fn queued_message_uuid(&self) -> Option<&str> {
        if self.message != QUEUED_ACK_MESSAGE {
            return None;
        }
        match self.message_uuid.as_slice() {
            [uuid] if uuid::Uuid::parse_str(uuid).is_ok() => Some(uuid.as_str()),
            _ => None,
        }
    }
}

/// HTTP basic credentials of the original caller.
///
/// Reused to authenticate status lookups made on the caller's behalf.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub auth_id: String,
    pub auth_token: String,
}

impl Credentials {
    pub fn new(auth_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            auth_id: auth_id.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Decode `Authorization: Basic <base64(id:token)>`.
    pub fn from_basic_auth(value: &str) -> Option<Self> {
        let (scheme, encoded) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = BASE64.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (auth_id, auth_token) = decoded.split_once(':')?;
        if auth_id.is_empty() {
            return None;
        }
        Some(Self::new(auth_id, auth_token))
    }

    /// Extract from request headers.
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Option<Self> {
        let value = headers.get(axum::http::header::AUTHORIZATION)?;
        Self::from_basic_auth(value.to_str().ok()?)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_id", &self.auth_id)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts `units` as a number, a numeric string, or null.
fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    struct UnitsVisitor;

    impl<'de> de::Visitor<'de> for UnitsVisitor {
        type Value = u32;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a non-negative integer or numeric string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u32, E> {
            u32::try_from(v).map_err(E::custom)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u32, E> {
            u32::try_from(v).map_err(E::custom)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u32, E> {
            if v.is_empty() {
                return Ok(0);
            }
            v.parse().map_err(E::custom)
        }

        fn visit_unit<E: de::Error>(self) -> Result<u32, E> {
            Ok(0)
        }

        fn visit_none<E: de::Error>(self) -> Result<u32, E> {
            Ok(0)
        }
    }

    deserializer.deserialize_any(UnitsVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "550e8400-e29b-41d4-a716-446655440000";

    #[test]
    fn test_status_payload_serialization_shape() {
        let mut status = StatusPayload::new(UUID, MessageState::Delivered);
        status.units = 1;
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["message_uuid"], UUID);
        assert_eq!(json["message_state"], "delivered");
        assert_eq!(json["units"], 1);
        assert!(json.get("sent_time").is_none());
        assert!(json.get("error_code").is_some());
    }

    #[test]
    fn test_status_payload_from_lookup_body() {
        let body = serde_json::json!({
            "api_id": "ignored",
            "message_uuid": UUID,
            "message_state": "sent",
            "message_time": "2020-01-01 10:00:00+00:00",
            "total_rate": "0.00350",
            "total_amount": "0.00350",
            "units": 1,
            "error_code": null,
            "message_direction": "outbound"
        });
        let status: StatusPayload = serde_json::from_value(body).unwrap();
        assert_eq!(status.message_state, MessageState::Sent);
        assert_eq!(status.units, 1);
        assert_eq!(status.error_code, "");
        assert_eq!(status.sent_time, None);
    }

    #[test]
    fn test_units_accepts_string() {
        let body = serde_json::json!({
            "message_uuid": UUID,
            "message_state": "delivered",
            "units": "3"
        });
        let status: StatusPayload = serde_json::from_value(body).unwrap();
        assert_eq!(status.units, 3);
    }

    #[test]
    fn test_unknown_state_deserializes() {
        let body = serde_json::json!({ "message_uuid": UUID, "message_state": "received" });
        let status: StatusPayload = serde_json::from_value(body).unwrap();
        assert_eq!(status.message_state, MessageState::Unknown);
        assert!(!status.message_state.is_terminal());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!MessageState::Queued.is_terminal());
        for state in ["sent", "delivered", "undelivered", "failed"] {
            assert!(MessageState::from_wire(state).is_terminal(), "{state}");
        }
    }

    #[test]
    fn test_send_request_preserves_unknown_fields() {
        let raw = r#"{"src":"1111","dst":"2222","text":"hi","url":"https://client/cb","method":"GET","powerpack_uuid":"pp"}"#;
        let mut req: SendRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.url.as_deref(), Some("https://client/cb"));
        req.url = Some("https://gw/cb/1".into());
        req.method = Some("POST".into());

        let out: serde_json::Value = serde_json::to_value(&req).unwrap();
        assert_eq!(out["url"], "https://gw/cb/1");
        assert_eq!(out["method"], "POST");
        assert_eq!(out["dst"], "2222");
        assert_eq!(out["powerpack_uuid"], "pp");
    }

    #[test]
    fn test_send_request_rejects_non_object() {
        assert!(serde_json::from_str::<SendRequest>("[1,2]").is_err());
        assert!(serde_json::from_str::<SendRequest>("not json").is_err());
    }

    #[test]
    fn test_queued_ack_requires_single_valid_uuid() {
        let ack = SendAck {
            message: QUEUED_ACK_MESSAGE.into(),
            message_uuid: vec![UUID.into()],
        };
        assert_eq!(ack.queued_message_uuid(), Some(UUID));

        let two = SendAck {
            message_uuid: vec![UUID.into(), UUID.into()],
            ..ack.clone()
        };
        assert!(two.queued_message_uuid().is_none());

        let bad = SendAck {
            message_uuid: vec!["nope".into()],
            ..ack.clone()
        };
        assert!(bad.queued_message_uuid().is_none());

        let other = SendAck {
            message: "something else".into(),
            ..ack
        };
        assert!(other.queued_message_uuid().is_none());
    }

    #[test]
    fn test_basic_auth_decoding() {
        let header = format!("Basic {}", BASE64.encode("MAXXXX:secret:with:colons"));
        let creds = Credentials::from_basic_auth(&header).unwrap();
        assert_eq!(creds.auth_id, "MAXXXX");
        assert_eq!(creds.auth_token, "secret:with:colons");

        assert!(Credentials::from_basic_auth("Bearer abc").is_none());
        assert!(Credentials::from_basic_auth("Basic !!!").is_none());
    }

    #[test]
    fn test_credentials_debug_redacts_token() {
        let creds = Credentials::new("MAXXXX", "topsecret");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("topsecret"));
    }
}
