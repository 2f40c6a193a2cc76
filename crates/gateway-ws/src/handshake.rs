//! Identity claims carried by the WebSocket upgrade request
//!
//! Headers win over query parameters:
//! - `authorization: Bearer <token>` or `?token=`
//! - `x-user-id` or `?userId=`
//! - `x-plan` or `?plan=`

use quill_core::port::Handshake;
use tokio_tungstenite::tungstenite::handshake::server::Request;
use tracing::warn;
use url::form_urlencoded;

pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_PLAN: &str = "x-plan";

/// Extract identity claims from an upgrade request
pub fn from_request(request: &Request) -> Handshake {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let query = request.uri().query().unwrap_or("");

    let token = header("authorization")
        .and_then(|v| strip_bearer(&v).map(String::from))
        .or_else(|| query_param(query, "token"));

    Handshake {
        token,
        member_id: header(HEADER_USER_ID).or_else(|| query_param(query, "userId")),
        plan: header(HEADER_PLAN).or_else(|| query_param(query, "plan")),
    }
}

fn strip_bearer(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

fn query_param(query: &str, key: &str) -> Option<String> {
    let (_, value) = form_urlencoded::parse(query.as_bytes()).find(|(k, _)| k == key)?;
    // Decoding is lossy; a claim with invalid UTF-8 is dropped rather than mangled
    if value.contains(char::REPLACEMENT_CHARACTER) {
        warn!(key, "Ignoring query claim with invalid UTF-8");
        return None;
    }
    Some(value.trim().to_string()).filter(|v| !v.is_empty())
}
