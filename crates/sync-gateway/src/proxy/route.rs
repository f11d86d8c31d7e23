//! Recognition of the send-message route.

use axum::http::Method;
use regex::Regex;
use std::sync::LazyLock;

/// `POST /v1/Account/{auth_id}/Message/` where the auth id is a main account
/// (`MA`), subaccount (`SA`) or legacy (`AA`) identifier.
static SEND_MESSAGE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/v1/Account/(MA|SA|AA)[A-Za-z0-9]+/Message/$")
        .expect("send-message route regex must compile")
});

/// True if this request is a send that should be intercepted.
pub fn is_send_message_route(method: &Method, path: &str) -> bool {
    method == Method::POST && SEND_MESSAGE_PATH.is_match(path)
}
