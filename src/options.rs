//! Endpoint configuration. Generalizes the teacher's `WebSocketConfig` /
//! `ClientConfig` / `ServerConfig` triad into the full options table.

use std::collections::HashMap;
use std::ops::RangeFrom;
use std::time::Duration;

/// Header names an application is never allowed to override via
/// `extra_headers`, either because the handshake codec owns them or because
/// they are hop-by-hop headers that don't make sense on an upgrade request.
const FORBIDDEN_HEADER_PREFIXES: &[&str] = &["sec-", "proxy-"];
const FORBIDDEN_HEADER_NAMES: &[&str] = &[
    "connection",
    "content-length",
    "expect",
    "host",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub(crate) fn is_forbidden_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    FORBIDDEN_HEADER_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
        || FORBIDDEN_HEADER_NAMES.contains(&lower.as_str())
}

/// When to compress an outgoing text/binary frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    /// Compress only if the payload length falls inside
    /// [`Options::text_auto_compression_range`] /
    /// [`Options::binary_auto_compression_range`].
    Auto,
    Never,
    Always,
}

/// Options shared by client and server endpoints.
#[derive(Debug, Clone)]
pub struct Options {
    pub automatically_respond_to_pings: bool,
    pub closing_handshake_timeout: Duration,
    pub enable_fast_open: bool,
    pub maximum_incoming_message_payload_size: Option<usize>,
    pub receive_chunk_size: usize,
    pub extra_headers: HashMap<String, String>,
    pub enable_compression: bool,
    pub text_auto_compression_range: RangeFrom<usize>,
    pub binary_auto_compression_range: RangeFrom<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            automatically_respond_to_pings: true,
            closing_handshake_timeout: Duration::from_secs(30),
            enable_fast_open: false,
            maximum_incoming_message_payload_size: None,
            receive_chunk_size: 32 * 1024,
            extra_headers: HashMap::new(),
            enable_compression: true,
            text_auto_compression_range: 8..,
            binary_auto_compression_range: 8..,
        }
    }
}

impl Options {
    /// Drops any header names the handshake codec must own exclusively.
    pub fn sanitized_extra_headers(&self) -> HashMap<String, String> {
        self.extra_headers
            .iter()
            .filter(|(name, _)| !is_forbidden_header(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn should_compress(&self, mode: CompressionMode, len: usize, is_text: bool) -> bool {
        if !self.enable_compression {
            return false;
        }
        match mode {
            CompressionMode::Never => false,
            CompressionMode::Always => true,
            CompressionMode::Auto => {
                if is_text {
                    self.text_auto_compression_range.contains(&len)
                } else {
                    self.binary_auto_compression_range.contains(&len)
                }
            }
        }
    }
}

/// Client-only options layered on top of [`Options`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub common: Options,
    pub subprotocols: Vec<String>,
    pub maximum_redirects: usize,
    pub opening_handshake_timeout: Duration,
    /// Root CA bundle path; `None` uses the platform/webpki roots.
    pub ca_file: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            common: Options::default(),
            subprotocols: Vec::new(),
            maximum_redirects: 5,
            opening_handshake_timeout: Duration::from_secs(30),
            ca_file: None,
        }
    }
}

/// Server-only options layered on top of [`Options`].
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub common: Options,
    pub subprotocols: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_headers_are_filtered() {
        let mut opts = Options::default();
        opts.extra_headers
            .insert("Sec-WebSocket-Key".to_string(), "x".to_string());
        opts.extra_headers
            .insert("Host".to_string(), "evil".to_string());
        opts.extra_headers
            .insert("X-Request-Id".to_string(), "abc".to_string());
        let sanitized = opts.sanitized_extra_headers();
        assert_eq!(sanitized.len(), 1);
        assert_eq!(sanitized.get("X-Request-Id").unwrap(), "abc");
    }

    #[test]
    fn auto_compression_gates_on_size() {
        let opts = Options::default();
        assert!(!opts.should_compress(CompressionMode::Auto, 4, true));
        assert!(opts.should_compress(CompressionMode::Auto, 64, true));
        assert!(opts.should_compress(CompressionMode::Always, 1, true));
        assert!(!opts.should_compress(CompressionMode::Never, 1000, true));
    }
}
