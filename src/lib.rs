//! Async WebSocket endpoint library for the Tokio stack, implementing
//! [RFC 6455](https://datatracker.ietf.org/doc/html/rfc6455) and the
//! `permessage-deflate` extension
//! ([RFC 7692](https://datatracker.ietf.org/doc/html/rfc7692)).
//!
//! A connection, once open, is driven by a single owning task (the
//! "endpoint controller"): an [`Endpoint`] handle sends messages and close
//! requests into it, and an [`EventStream`] consumes the resulting
//! `Open`/`Text`/`Binary`/`Ping`/`Pong`/`Close` events in order. Clients
//! connect with [`connect`]; servers bind a [`Server`] and resolve each
//! inbound [`Request`] with `respond`, `redirect`, or `upgrade`.

pub mod compression;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod http;
pub mod options;
pub mod server;
pub mod stats;
mod token;
mod transport;
mod utils;

pub use endpoint::{Endpoint, Event, EventStream, ReadyState};
pub use error::{Error, ProtocolError};
pub use frame::{Message, OpCode, Role};
pub use options::{ClientOptions, CompressionMode, Options, ServerOptions};
pub use server::{Request, Server};
pub use stats::StatisticsSnapshot;

use url::Url;

/// Connects to a `ws://`/`wss://` URL, following redirects and negotiating
/// compression per the given [`ClientOptions`]. Returns immediately; the
/// opening handshake runs on the spawned driver task and its outcome
/// arrives as the first [`Event`] on the returned [`EventStream`].
pub fn connect(url: Url, options: ClientOptions) -> (Endpoint, EventStream) {
    endpoint::connect_client(url, options)
}
