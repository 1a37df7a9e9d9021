use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::types::{Method, StatusCode};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::{Digest, Sha1};

/// Fixed GUID appended to the client key, per RFC 6455 §1.3.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The upgrade predicate: does this request ask for a WebSocket?
///
/// Requires method `GET`, `Upgrade: websocket`, a `Connection` header
/// carrying the `Upgrade` token, version 13, and a `Sec-WebSocket-Key`
/// that decodes to 16 bytes.
pub(crate) fn is_upgrade(req: &Request) -> bool {
    req.method() == Method::Get
        && req
            .header("upgrade")
            .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
        && req.headers().contains_token("connection", "upgrade")
        && req
            .header("sec-websocket-version")
            .map(|v| v.trim() == "13")
            .unwrap_or(false)
        && req
            .header("sec-websocket-key")
            .map(valid_key)
            .unwrap_or(false)
}

#[inline]
fn valid_key(key: &str) -> bool {
    BASE64
        .decode(key.trim())
        .map(|bytes| bytes.len() == 16)
        .unwrap_or(false)
}

/// `Sec-WebSocket-Accept` for a client key: base64 of the SHA-1 of the
/// key concatenated with the WebSocket GUID.
pub(crate) fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// The `101 Switching Protocols` response completing the handshake.
///
/// Echoes the first offered subprotocol when the client sent any.
pub(crate) fn accept_response(req: &Request) -> Response {
    let key = req.header("sec-websocket-key").unwrap_or_default();

    let mut response = Response::new(StatusCode::SwitchingProtocols)
        .with_header("upgrade", "websocket")
        .with_header("connection", "Upgrade")
        .with_header("sec-websocket-accept", accept_key(key));

    if let Some(offered) = req.header("sec-websocket-protocol") {
        if let Some(first) = offered.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                response = response.with_header("sec-websocket-protocol", first);
            }
        }
    }

    response
}
