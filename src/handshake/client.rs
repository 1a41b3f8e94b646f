//! Client-side opening handshake: request construction and response
//! validation. Grounded on the teacher's `request.rs` (URL → HTTP request)
//! and `handshake.rs` (accept-key check), generalized with subprotocol,
//! extension, and redirect handling per §4.5.

use url::Url;

use crate::compression::{self, CompressionOffer};
use crate::error::Error;
use crate::http::{HttpRequest, HttpResponse, Headers};
use crate::options::ClientOptions;
use crate::utils::generate_websocket_accept_value;

use super::{FailedHandshakeResult, HandshakeResult};

pub struct PreparedRequest {
    pub request: HttpRequest,
    pub key: String,
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// Validates the URL scheme and builds the GET + upgrade-header request.
pub fn prepare(url: &Url, key: String, options: &ClientOptions) -> Result<PreparedRequest, Error> {
    let use_tls = match url.scheme() {
        "ws" => false,
        "wss" => true,
        _ => return Err(Error::InvalidSchemeURL),
    };
    let host = url.host_str().ok_or(Error::URLNoHost)?.to_string();
    let port = url
        .port_or_known_default()
        .ok_or(Error::URLNoPort)?;

    let mut target = url.path().to_string();
    if target.is_empty() {
        target = "/".to_string();
    }
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut headers = Headers::default();
    headers.set("Host", format!("{host}:{port}"));
    headers.set("Upgrade", "websocket");
    headers.set("Connection", "Upgrade");
    headers.set("Sec-WebSocket-Key", key.clone());
    headers.set("Sec-WebSocket-Version", "13");
    if !options.subprotocols.is_empty() {
        headers.set("Sec-WebSocket-Protocol", options.subprotocols.join(", "));
    }
    if options.common.enable_compression {
        let offer = CompressionOffer::default_client_offer();
        headers.set(
            "Sec-WebSocket-Extensions",
            compression::format_header_value(&offer),
        );
    }
    for (name, value) in options.common.sanitized_extra_headers() {
        headers.set(&name, value);
    }

    Ok(PreparedRequest {
        request: HttpRequest {
            method: "GET".to_string(),
            target,
            minor_version: 1,
            headers,
            body: Vec::new(),
        },
        key,
        host,
        port,
        use_tls,
    })
}

/// Outcome of validating a server's handshake response.
pub enum ClientOutcome {
    Ready(HandshakeResult),
    Redirect(Url),
    Rejected(FailedHandshakeResult),
}

/// Validates a 101 response against the key/subprotocols/extensions this
/// client offered, per §4.5. Non-101/3xx statuses become `Rejected`.
pub fn process_response(
    response: &HttpResponse,
    client_key: &str,
    offered_subprotocols: &[String],
    offered_compression: Option<&CompressionOffer>,
    base_url: &Url,
) -> Result<ClientOutcome, Error> {
    if (300..400).contains(&response.status) {
        let location = response
            .headers
            .get("location")
            .ok_or(Error::InvalidRedirection)?;
        let resolved = base_url
            .join(location)
            .map_err(|_| Error::InvalidRedirectLocation(location.to_string()))?;
        return Ok(ClientOutcome::Redirect(resolved));
    }

    if response.status != 101 {
        return Ok(ClientOutcome::Rejected(FailedHandshakeResult {
            status: response.status,
            reason: response.reason.clone(),
            extra_headers: response.headers.0.clone(),
            content_type: response.headers.get("content-type").map(str::to_string),
            body: response.body.clone(),
        }));
    }

    if !response.headers.contains_token("upgrade", "websocket") {
        return Err(Error::NoUpgrade);
    }
    if !response.headers.contains_token("connection", "upgrade") {
        return Err(Error::NoConnectionHeaderPresent);
    }
    let accept = response
        .headers
        .get("sec-websocket-accept")
        .ok_or(Error::InvalidAcceptKey)?;
    let expected = generate_websocket_accept_value(client_key.to_string());
    if accept != expected {
        return Err(Error::InvalidAcceptKey);
    }

    let subprotocol = response
        .headers
        .get("sec-websocket-protocol")
        .map(str::to_string);
    if let Some(ref chosen) = subprotocol {
        if !offered_subprotocols.iter().any(|p| p == chosen) {
            return Err(Error::SubprotocolMismatch(chosen.clone()));
        }
    }

    let compression = match response.headers.get("sec-websocket-extensions") {
        Some(value) => {
            let offers = compression::parse_offers(value);
            match (offers.first(), offered_compression) {
                (Some(chosen), Some(offered)) => {
                    if !compression::response_is_subset_of_offer(offered, chosen) {
                        return Err(Error::ExtensionMismatch(value.to_string()));
                    }
                    Some(chosen.clone())
                }
                (Some(chosen), None) => return Err(Error::ExtensionMismatch(
                    format!("server negotiated {chosen:?} but client sent no offer"),
                )),
                (None, _) => None,
            }
        }
        None => None,
    };

    Ok(ClientOutcome::Ready(HandshakeResult {
        subprotocol,
        compression,
        extra_headers: response.headers.0.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepares_request_with_defaults() {
        let url = Url::parse("ws://example.com/chat").unwrap();
        let options = ClientOptions::default();
        let prepared = prepare(&url, "dGhlIHNhbXBsZSBub25jZQ==".to_string(), &options).unwrap();
        assert_eq!(prepared.request.target, "/chat");
        assert!(!prepared.use_tls);
        assert_eq!(prepared.port, 80);
        assert_eq!(
            prepared.request.headers.get("sec-websocket-version"),
            Some("13")
        );
    }

    #[test]
    fn rejects_non_ws_scheme() {
        let url = Url::parse("http://example.com/chat").unwrap();
        let options = ClientOptions::default();
        assert!(matches!(
            prepare(&url, "key".to_string(), &options),
            Err(Error::InvalidSchemeURL)
        ));
    }

    #[test]
    fn validates_accept_key() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let mut headers = Headers::default();
        headers.set("Upgrade", "websocket");
        headers.set("Connection", "Upgrade");
        headers.set(
            "Sec-WebSocket-Accept",
            generate_websocket_accept_value(key.to_string()),
        );
        let response = HttpResponse {
            status: 101,
            reason: "Switching Protocols".to_string(),
            minor_version: 1,
            headers,
            body: Vec::new(),
        };
        let base = Url::parse("ws://example.com/").unwrap();
        let outcome = process_response(&response, key, &[], None, &base).unwrap();
        assert!(matches!(outcome, ClientOutcome::Ready(_)));
    }

    #[test]
    fn redirect_resolves_relative_location() {
        let mut headers = Headers::default();
        headers.set("Location", "/test");
        let response = HttpResponse {
            status: 301,
            reason: "Moved Permanently".to_string(),
            minor_version: 1,
            headers,
            body: Vec::new(),
        };
        let base = Url::parse("ws://example.com/redirect").unwrap();
        match process_response(&response, "key", &[], None, &base).unwrap() {
            ClientOutcome::Redirect(url) => assert_eq!(url.path(), "/test"),
            _ => panic!("expected redirect"),
        }
    }
}
