//! Server-side opening handshake validation and response construction.
//! Grounded on the teacher's `handshake.rs::perform_handshake`, generalized
//! with subprotocol selection and compression negotiation.

use std::collections::HashMap;

use crate::compression::{self, CompressionOffer};
use crate::error::Error;
use crate::http::{Headers, HttpRequest, HttpResponse};
use crate::options::{is_forbidden_header, ServerOptions};
use crate::utils::generate_websocket_accept_value;

use super::HandshakeResult;

/// Validates an inbound request as a well-formed WebSocket upgrade.
/// Returns a descriptive [`Error`] (never panics) for every rejection case
/// named in §4.6; the caller turns that into a 4xx response via
/// [`reject_response`].
pub fn validate(request: &HttpRequest) -> Result<(), Error> {
    if request.method != "GET" {
        return Err(Error::InvalidHTTPHandshake);
    }
    if request.minor_version < 1 {
        return Err(Error::InvalidHTTPHandshake);
    }
    if request.headers.get("host").is_none() {
        return Err(Error::NoHostHeaderPresent);
    }
    if !request.headers.contains_token("upgrade", "websocket") {
        return Err(Error::NoUpgradeHeaderPresent);
    }
    if !request.headers.contains_token("connection", "upgrade") {
        return Err(Error::NoConnectionHeaderPresent);
    }
    match request.headers.get("sec-websocket-version") {
        Some("13") => {}
        _ => return Err(Error::InvalidHTTPHandshake),
    }
    if request.headers.get("sec-websocket-key").is_none() {
        return Err(Error::NoSecWebsocketKey);
    }
    Ok(())
}

/// Picks the first subprotocol the client offered that the server also
/// supports, preserving the client's preference order.
fn select_subprotocol(request: &HttpRequest, options: &ServerOptions) -> Option<String> {
    let offered = request.headers.token_list("sec-websocket-protocol");
    offered
        .into_iter()
        .find(|p| options.subprotocols.iter().any(|s| s.eq_ignore_ascii_case(p)))
}

fn select_compression(request: &HttpRequest, options: &ServerOptions) -> Option<CompressionOffer> {
    if !options.common.enable_compression {
        return None;
    }
    let header = request.headers.get("sec-websocket-extensions")?;
    let offers = compression::parse_offers(header);
    compression::negotiate_server_response(&offers)
}

/// Builds the 101 response plus the [`HandshakeResult`] the endpoint will
/// carry, given a request already validated by [`validate`]. `subprotocol`
/// lets the application override the automatic first-mutual-match pick
/// (§4.8's `upgrade(subprotocol, ...)` parameter); `None` falls back to
/// [`select_subprotocol`]. `extra_headers` are appended to the response,
/// filtered through the same forbidden-name list `extra_headers` on the
/// client side is filtered through.
pub fn accept(
    request: &HttpRequest,
    options: &ServerOptions,
    subprotocol: Option<String>,
    extra_headers: &HashMap<String, String>,
) -> (HttpResponse, HandshakeResult) {
    let key = request
        .headers
        .get("sec-websocket-key")
        .expect("validated by validate()")
        .to_string();
    let accept_value = generate_websocket_accept_value(key);

    let subprotocol = subprotocol.or_else(|| select_subprotocol(request, options));
    let compression = select_compression(request, options);

    let mut headers = Headers::default();
    headers.set("Upgrade", "websocket");
    headers.set("Connection", "Upgrade");
    headers.set("Sec-WebSocket-Accept", accept_value);
    if let Some(ref proto) = subprotocol {
        headers.set("Sec-WebSocket-Protocol", proto.clone());
    }
    if let Some(ref compression) = compression {
        headers.set(
            "Sec-WebSocket-Extensions",
            crate::compression::format_header_value(compression),
        );
    }
    for (name, value) in extra_headers {
        if !is_forbidden_header(name) {
            headers.set(name, value.clone());
        }
    }

    let response = HttpResponse {
        status: 101,
        reason: "Switching Protocols".to_string(),
        minor_version: 1,
        headers,
        body: Vec::new(),
    };

    (
        response,
        HandshakeResult {
            subprotocol,
            compression,
            extra_headers: extra_headers.clone(),
        },
    )
}

/// Builds a plain-text rejection response for a handshake that failed
/// [`validate`] or that the application refused via `Request::respond`.
pub fn reject_response(status: u16, reason: &str, body: &str) -> HttpResponse {
    let mut headers = Headers::default();
    headers.set("Content-Type", "text/plain; charset=utf-8");
    headers.set("Content-Length", body.len().to_string());
    headers.set("Connection", "close");
    HttpResponse {
        status,
        reason: reason.to_string(),
        minor_version: 1,
        headers,
        body: body.as_bytes().to_vec(),
    }
}

pub fn error_to_response(error: &Error) -> HttpResponse {
    reject_response(400, "Bad Request", &error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> HttpRequest {
        let mut headers = Headers::default();
        headers.set("Host", "example.com");
        headers.set("Upgrade", "websocket");
        headers.set("Connection", "Upgrade");
        headers.set("Sec-WebSocket-Version", "13");
        headers.set("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        HttpRequest {
            method: "GET".to_string(),
            target: "/chat".to_string(),
            minor_version: 1,
            headers,
            body: Vec::new(),
        }
    }

    #[test]
    fn accepts_well_formed_request() {
        assert!(validate(&valid_request()).is_ok());
    }

    #[test]
    fn rejects_missing_key() {
        let mut request = valid_request();
        request.headers.0.remove("sec-websocket-key");
        assert!(matches!(validate(&request), Err(Error::NoSecWebsocketKey)));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut request = valid_request();
        request.headers.set("Sec-WebSocket-Version", "8");
        assert!(matches!(validate(&request), Err(Error::InvalidHTTPHandshake)));
    }

    #[test]
    fn picks_first_mutually_supported_subprotocol() {
        let mut request = valid_request();
        request
            .headers
            .set("Sec-WebSocket-Protocol", "chat, superchat");
        let options = ServerOptions {
            subprotocols: vec!["superchat".to_string()],
            ..Default::default()
        };
        let (response, result) = accept(&request, &options, None, &HashMap::new());
        assert_eq!(result.subprotocol.as_deref(), Some("superchat"));
        assert_eq!(
            response.headers.get("sec-websocket-protocol"),
            Some("superchat")
        );
    }
}
