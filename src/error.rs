use std::io;
use thiserror::Error;
use tokio::time::error::Elapsed;

/// Errors surfaced to the application before an endpoint reaches the `open`
/// state. Once open, protocol and transport failures are folded into a
/// `close` event instead of an `Error` (see [`ProtocolError`]).
#[derive(Error, Debug)]
pub enum Error {
    #[error("opening handshake did not complete within the configured timeout")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    // Handshake errors
    #[error("Invalid handshake request method and version")]
    InvalidHTTPHandshake,

    #[error("Connection: Upgrade header missing in the request")]
    NoConnectionHeaderPresent,

    #[error("Upgrade: websocket header missing in the request")]
    NoUpgradeHeaderPresent,

    #[error("Host header missing in the request")]
    NoHostHeaderPresent,

    #[error("Couldn't find Sec-WebSocket-Key header in the request")]
    NoSecWebsocketKey,

    #[error("Server didn't upgrade the connection")]
    NoUpgrade,

    #[error("Server didn't send a valid Sec-WebSocket-Accept key")]
    InvalidAcceptKey,

    #[error("server returned a subprotocol that was never offered: {0}")]
    SubprotocolMismatch(String),

    #[error("server returned extension parameters the client never offered: {0}")]
    ExtensionMismatch(String),

    #[error("redirect response carried no usable Location header")]
    InvalidRedirection,

    #[error("Location header could not be parsed as a URL: {0}")]
    InvalidRedirectLocation(String),

    #[error("exceeded the maximum of {0} redirects")]
    MaximumRedirectsExceeded(usize),

    #[error("operation was canceled")]
    Canceled,

    #[error("connection closed unexpectedly")]
    UnexpectedDisconnect,

    // HTTP / URL errors
    #[error("Invalid scheme in WebSocket URL, expected ws:// or wss://")]
    InvalidSchemeURL,

    #[error("URL has no host")]
    URLNoHost,

    #[error("URL has no port")]
    URLNoPort,

    #[error("malformed HTTP message: {0}")]
    InvalidHttpMessage(String),

    // Compression errors
    #[error("failed to inflate a compressed message: {0}")]
    DecompressionFailed(String),

    #[error("failed to deflate a message: {0}")]
    CompressionFailed(String),
}

/// Violations detected by [`crate::frame::input::InputFramer`] while parsing
/// inbound bytes. These never reach the application as an [`Error`]; the
/// endpoint controller always translates them into a local `close` (1002 or
/// 1009) per the close-code finalization table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("reserved bits must be zero")]
    ReservedBitsNotZero,

    #[error("RSV1 set without a negotiated compression extension")]
    UnexpectedCompressionBit,

    #[error("control frames must not be fragmented")]
    FragmentedControlFrame,

    #[error("control frame payload exceeds 125 bytes")]
    ControlFramePayloadTooLarge,

    #[error("client frames must be masked")]
    MissingMask,

    #[error("server frames must not be masked")]
    UnexpectedMask,

    #[error("continuation frame received with no message in progress")]
    UnexpectedContinuation,

    #[error("new message started while a fragmented message was in progress")]
    FragmentedInProgress,

    #[error("unknown opcode {0}")]
    InvalidOpcode(u8),

    #[error("frame payload length exceeds the platform maximum")]
    InvalidLength,

    #[error("received a text frame whose payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("close frame body shorter than 2 bytes but nonzero")]
    InvalidCloseFrame,

    #[error("failed to inflate a compressed message: {0}")]
    DecompressionFailed(String),
}
