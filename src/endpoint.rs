//! The endpoint controller: a single-owner actor that sequences
//! connect/handshake/open/close and multiplexes application sends against
//! inbound frames. One driver task owns all mutable state (transport,
//! framers, ready-state, statistics); `Endpoint` and `EventStream` are thin
//! handles that talk to it over channels, generalizing the teacher's
//! independently-spawned reader/writer halves (`read.rs`/`write.rs`) into a
//! single serialized loop per §5.

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use futures::Stream;
use log::{debug, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout_at, Instant};
use url::Url;

use crate::compression::{CompressionOffer, Deflater, Inflater};
use crate::error::Error;
use crate::frame::{FrameEvent, InputFramer, Message, OutputFramer, Role};
use crate::handshake::{self, client::ClientOutcome, FailedHandshakeResult, HandshakeResult};
use crate::http;
use crate::options::{ClientOptions, CompressionMode, Options, ServerOptions};
use crate::stats::{Statistics, StatisticsSnapshot};
use crate::transport::{self, Transport};
use crate::utils::generate_websocket_key;

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_PROTOCOL_ERROR: u16 = 1002;
const CLOSE_MESSAGE_TOO_BIG: u16 = 1009;
const CLOSE_ABNORMAL: u16 = 1006;
const RESTRICTED_CODES: [u16; 3] = [1005, 1006, 1015];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Initialized,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Events delivered to the application, in order: at most one `Open`, then
/// any number of message/signal events, then exactly one `Close`.
#[derive(Debug, Clone)]
pub enum Event {
    Open(HandshakeResult),
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    ConnectionViability(bool),
    BetterConnectionAvailable(bool),
    Close {
        code: Option<u16>,
        reason: String,
        was_clean: bool,
    },
}

enum Command {
    Send {
        message: Message,
        mode: CompressionMode,
        respond: oneshot::Sender<bool>,
    },
    Close {
        code: Option<u16>,
        reason: String,
    },
    SampleStatistics {
        reset: bool,
        respond: oneshot::Sender<StatisticsSnapshot>,
    },
}

/// Application-facing handle. Cloning is cheap (it's just a channel
/// sender); every clone talks to the same single driver task.
#[derive(Clone)]
pub struct Endpoint {
    commands: mpsc::Sender<Command>,
}

/// The other half of an [`Endpoint`]: a `Stream<Item = Event>` with exactly
/// one permitted consumer, matching the teacher's `EventStream`.
pub struct EventStream {
    events: mpsc::Receiver<Event>,
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Event>> {
        self.events.poll_recv(cx)
    }
}

impl Endpoint {
    /// Sends a message. Returns `false` without side effects if the
    /// endpoint is closing/closed; otherwise parks behind the handshake if
    /// one is still in flight, per §4.7.
    pub async fn send(&self, message: Message, mode: CompressionMode) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Send {
                message,
                mode,
                respond: tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn close(&self, code: Option<u16>, reason: impl Into<String>) {
        let _ = self
            .commands
            .send(Command::Close {
                code,
                reason: reason.into(),
            })
            .await;
    }

    pub async fn sample_statistics(&self, reset: bool) -> Option<StatisticsSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::SampleStatistics { reset, respond: tx })
            .await
            .ok()?;
        rx.await.ok()
    }
}

struct Driver {
    role: Role,
    options: Options,
    state: ReadyState,
    transport: Option<Transport>,
    output: Option<OutputFramer>,
    input: Option<InputFramer>,
    stats: Statistics,
    events: mpsc::Sender<Event>,
    did_send_close: bool,
    did_receive_close: bool,
    closing_deadline: Option<Instant>,
}

impl Driver {
    async fn write_message(&mut self, message: &Message, mode: CompressionMode) -> Result<(), Error> {
        let (is_text, len) = match message {
            Message::Text(s) => (true, s.len()),
            Message::Binary(b) => (false, b.len()),
            _ => (false, 0),
        };
        let compress = !message.is_control() && self.options.should_compress(mode, len, is_text);
        let output = self.output.as_mut().expect("open endpoint has an output framer");
        let bytes = output.encode(message, compress)?;
        let transport = self.transport.as_mut().expect("open endpoint has a transport");
        transport.write_all(&bytes).await?;
        transport.flush().await?;

        if message.is_control() {
            self.stats.record_outgoing_control();
        } else {
            self.stats.record_outgoing_message(is_text, len);
            if compress {
                self.stats.record_compression(true, len, bytes.len());
            }
        }
        Ok(())
    }

    async fn emit(&mut self, event: Event) {
        let _ = self.events.send(event).await;
    }

    async fn finalize(&mut self, code: Option<u16>, reason: String, was_clean: bool) {
        self.state = ReadyState::Closed;
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.shutdown().await;
        }
        self.emit(Event::Close {
            code,
            reason,
            was_clean,
        })
        .await;
    }

    async fn handle_frame_event(&mut self, event: FrameEvent) -> bool {
        match event {
            FrameEvent::Message(Message::Text(text), compressed_wire_len) => {
                self.stats.record_incoming_message(true, text.len());
                if let Some(wire_len) = compressed_wire_len {
                    self.stats.record_compression(false, text.len(), wire_len);
                }
                self.emit(Event::Text(text)).await;
                false
            }
            FrameEvent::Message(Message::Binary(data), compressed_wire_len) => {
                self.stats.record_incoming_message(false, data.len());
                if let Some(wire_len) = compressed_wire_len {
                    self.stats.record_compression(false, data.len(), wire_len);
                }
                self.emit(Event::Binary(data)).await;
                false
            }
            FrameEvent::Message(Message::Ping(data), _) => {
                self.stats.record_incoming_control();
                if self.options.automatically_respond_to_pings {
                    let pong = Message::Pong(data.clone());
                    let _ = self.write_message(&pong, CompressionMode::Never).await;
                }
                self.emit(Event::Ping(data)).await;
                false
            }
            FrameEvent::Message(Message::Pong(data), _) => {
                self.stats.record_incoming_control();
                self.emit(Event::Pong(data)).await;
                false
            }
            FrameEvent::Message(Message::Close(code, reason), _) => {
                self.stats.record_incoming_control();
                self.did_receive_close = true;
                if !self.did_send_close {
                    let _ = self
                        .write_message(&Message::Close(code, String::new()), CompressionMode::Never)
                        .await;
                    self.did_send_close = true;
                }
                self.finalize(code, reason, true).await;
                true
            }
            FrameEvent::ProtocolError(err) => {
                warn!("protocol error, closing with 1002: {err}");
                let _ = self
                    .write_message(
                        &Message::Close(Some(CLOSE_PROTOCOL_ERROR), err.to_string()),
                        CompressionMode::Never,
                    )
                    .await;
                self.finalize(Some(CLOSE_PROTOCOL_ERROR), err.to_string(), false)
                    .await;
                true
            }
            FrameEvent::MessageTooBig => {
                let reason = "Maximum message size exceeded".to_string();
                let _ = self
                    .write_message(
                        &Message::Close(Some(CLOSE_MESSAGE_TOO_BIG), reason.clone()),
                        CompressionMode::Never,
                    )
                    .await;
                self.finalize(Some(CLOSE_MESSAGE_TOO_BIG), reason, false).await;
                true
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send {
                message,
                mode,
                respond,
            } => {
                let ok = if self.state == ReadyState::Open {
                    self.write_message(&message, mode).await.is_ok()
                } else {
                    false
                };
                let _ = respond.send(ok);
            }
            Command::Close { code, reason } => {
                self.initiate_close(code, reason).await;
            }
            Command::SampleStatistics { reset, respond } => {
                let _ = respond.send(self.stats.sample(reset));
            }
        }
    }

    async fn initiate_close(&mut self, code: Option<u16>, reason: String) {
        if self.state == ReadyState::Closing || self.state == ReadyState::Closed {
            return;
        }
        let wire_code = code.filter(|c| !RESTRICTED_CODES.contains(c));
        self.state = ReadyState::Closing;
        self.closing_deadline = Some(Instant::now() + self.options.closing_handshake_timeout);
        let _ = self
            .write_message(
                &Message::Close(wire_code.or(Some(CLOSE_NORMAL)), reason),
                CompressionMode::Never,
            )
            .await;
        self.did_send_close = true;
    }
}

/// Drives an already-open server-side connection: read/command loop,
/// no handshake phase.
pub(crate) async fn spawn_open(
    transport: Transport,
    role: Role,
    handshake_result: HandshakeResult,
    options: Options,
) -> (Endpoint, EventStream) {
    let (command_tx, command_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::channel(256);

    let inflater = handshake_result.compression.as_ref().map(|offer| {
        let bits = CompressionOffer::window_bits_or_default(match role {
            Role::Server => offer.client_max_window_bits,
            Role::Client => offer.server_max_window_bits,
        });
        let no_context_takeover = match role {
            Role::Server => offer.client_no_context_takeover,
            Role::Client => offer.server_no_context_takeover,
        };
        Inflater::new(bits, no_context_takeover)
    });
    let deflater = handshake_result.compression.as_ref().map(|offer| {
        let bits = CompressionOffer::window_bits_or_default(match role {
            Role::Server => offer.server_max_window_bits,
            Role::Client => offer.client_max_window_bits,
        });
        let no_context_takeover = match role {
            Role::Server => offer.server_no_context_takeover,
            Role::Client => offer.client_no_context_takeover,
        };
        Deflater::new(bits, no_context_takeover)
    });

    let max_size = options.maximum_incoming_message_payload_size;
    let mut driver = Driver {
        role,
        options,
        state: ReadyState::Open,
        transport: Some(transport),
        output: Some(OutputFramer::new(role, deflater)),
        input: Some(InputFramer::new(role, inflater, max_size)),
        stats: Statistics::default(),
        events: event_tx,
        did_send_close: false,
        did_receive_close: false,
        closing_deadline: None,
    };

    tokio::spawn(async move {
        driver.emit(Event::Open(handshake_result)).await;
        run_loop(driver, command_rx).await;
    });

    (
        Endpoint {
            commands: command_tx,
        },
        EventStream { events: event_rx },
    )
}

async fn run_loop(mut driver: Driver, mut commands: mpsc::Receiver<Command>) {
    let mut read_buf = vec![0u8; driver.options.receive_chunk_size];
    // Once every `Endpoint` handle is dropped, `commands.recv()` resolves to
    // `Ready(None)` on every poll. Under `biased` that branch would always
    // win the select and starve the read/timer branches forever; once we've
    // seen the close, stop polling the channel at all.
    let mut commands_open = true;
    loop {
        if driver.state == ReadyState::Closed {
            break;
        }
        let closing_deadline = driver
            .closing_deadline
            .map(|deadline| sleep(deadline.saturating_duration_since(Instant::now())));

        tokio::select! {
            biased;

            command = commands.recv(), if commands_open => {
                match command {
                    Some(command) => driver.handle_command(command).await,
                    None => {
                        commands_open = false;
                        driver.initiate_close(Some(CLOSE_NORMAL), String::new()).await;
                    }
                }
            }

            read_result = async {
                match driver.transport.as_mut() {
                    Some(t) => t.read(&mut read_buf).await,
                    None => std::future::pending().await,
                }
            } => {
                match read_result {
                    Ok(0) => {
                        let was_clean = driver.did_send_close && driver.did_receive_close;
                        driver.finalize(Some(CLOSE_ABNORMAL), "connection closed unexpectedly".to_string(), was_clean).await;
                    }
                    Ok(n) => {
                        let events: Vec<FrameEvent> = driver
                            .input
                            .as_mut()
                            .map(|i| i.feed(&read_buf[..n]))
                            .unwrap_or_default();
                        for event in events {
                            if driver.handle_frame_event(event).await {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        debug!("transport read error: {e}");
                        driver.finalize(Some(CLOSE_ABNORMAL), e.to_string(), false).await;
                    }
                }
            }

            _ = async {
                match closing_deadline {
                    Some(timer) => timer.await,
                    None => std::future::pending().await,
                }
            }, if driver.state == ReadyState::Closing => {
                driver.finalize(None, "closing handshake timed out".to_string(), false).await;
            }
        }
    }
}

/// Drives a client connection from `initialized` through the handshake
/// (following redirects) to `open`, per §4.5/§4.7.
pub fn connect_client(url: Url, options: ClientOptions) -> (Endpoint, EventStream) {
    let (command_tx, command_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::channel(256);

    tokio::spawn(async move {
        run_client(url, options, command_rx, event_tx).await;
    });

    (
        Endpoint {
            commands: command_tx,
        },
        EventStream { events: event_rx },
    )
}

async fn run_client(
    mut url: Url,
    options: ClientOptions,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<Event>,
) {
    let deadline = Instant::now() + options.opening_handshake_timeout;

    let mut redirects = 0usize;
    let (transport, handshake_result, leftover) = loop {
        let key = generate_websocket_key();
        let prepared = match handshake::client::prepare(&url, key.clone(), &options) {
            Ok(p) => p,
            Err(e) => {
                fail_before_open(events, e).await;
                return;
            }
        };

        let connect_fut = transport::connect_client(
            &prepared.host,
            prepared.port,
            prepared.use_tls,
            options.ca_file.as_deref(),
        );
        let mut transport = match timeout_at(deadline, connect_fut).await {
            Ok(Ok(t)) => t,
            Ok(Err(e)) => {
                fail_before_open(events, Error::IOError { source: e }).await;
                return;
            }
            Err(elapsed) => {
                fail_before_open(events, Error::from(elapsed)).await;
                return;
            }
        };

        let request_bytes = http::encode_request(&prepared.request);
        match timeout_at(deadline, transport.write_all(&request_bytes)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                fail_before_open(events, Error::IOError { source: e }).await;
                return;
            }
            Err(elapsed) => {
                fail_before_open(events, Error::from(elapsed)).await;
                return;
            }
        }

        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let response = loop {
            match http::parse_response(&buf) {
                http::ParseOutcome::Complete { message, consumed } => {
                    let leftover = buf[consumed..].to_vec();
                    break (message, leftover);
                }
                http::ParseOutcome::Invalid(reason) => {
                    fail_before_open(events, Error::InvalidHttpMessage(reason)).await;
                    return;
                }
                http::ParseOutcome::Incomplete => {
                    let n = match timeout_at(deadline, transport.read(&mut chunk)).await {
                        Ok(Ok(n)) => n,
                        Ok(Err(e)) => {
                            fail_before_open(events, Error::IOError { source: e }).await;
                            return;
                        }
                        Err(elapsed) => {
                            fail_before_open(events, Error::from(elapsed)).await;
                            return;
                        }
                    };
                    if n == 0 {
                        fail_before_open(events, Error::UnexpectedDisconnect).await;
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
        };

        let offered_compression = if options.common.enable_compression {
            Some(CompressionOffer::default_client_offer())
        } else {
            None
        };
        match handshake::client::process_response(
            &response.0,
            &key,
            &options.subprotocols,
            offered_compression.as_ref(),
            &url,
        ) {
            Ok(ClientOutcome::Ready(result)) => break (transport, result, response.1),
            Ok(ClientOutcome::Redirect(location)) => {
                redirects += 1;
                if redirects > options.maximum_redirects {
                    fail_before_open(
                        events,
                        Error::MaximumRedirectsExceeded(options.maximum_redirects),
                    )
                    .await;
                    return;
                }
                let _ = transport.shutdown().await;
                url = location;
                trace!("following redirect to {url}");
                continue;
            }
            Ok(ClientOutcome::Rejected(rejected)) => {
                fail_rejected(events, rejected).await;
                return;
            }
            Err(e) => {
                fail_before_open(events, e).await;
                return;
            }
        }
    };

    let inflater = handshake_result.compression.as_ref().map(|offer| {
        Inflater::new(
            CompressionOffer::window_bits_or_default(offer.server_max_window_bits),
            offer.server_no_context_takeover,
        )
    });
    let deflater = handshake_result.compression.as_ref().map(|offer| {
        Deflater::new(
            CompressionOffer::window_bits_or_default(offer.client_max_window_bits),
            offer.client_no_context_takeover,
        )
    });

    let max_size = options.common.maximum_incoming_message_payload_size;
    let mut driver = Driver {
        role: Role::Client,
        options: options.common,
        state: ReadyState::Open,
        transport: Some(transport),
        output: Some(OutputFramer::new(Role::Client, deflater)),
        input: Some(InputFramer::new(Role::Client, inflater, max_size)),
        stats: Statistics::default(),
        events,
        did_send_close: false,
        did_receive_close: false,
        closing_deadline: None,
    };

    driver.emit(Event::Open(handshake_result)).await;
    if !leftover.is_empty() {
        let leftover_events = driver
            .input
            .as_mut()
            .map(|i| i.feed(&leftover))
            .unwrap_or_default();
        for event in leftover_events {
            if driver.handle_frame_event(event).await {
                return;
            }
        }
    }
    run_loop(driver, commands).await;
}

async fn fail_before_open(events: mpsc::Sender<Event>, error: Error) {
    warn!("client handshake failed: {error}");
    let _ = events
        .send(Event::Close {
            code: None,
            reason: error.to_string(),
            was_clean: false,
        })
        .await;
}

async fn fail_rejected(events: mpsc::Sender<Event>, rejected: FailedHandshakeResult) {
    let _ = events
        .send(Event::Close {
            code: Some(rejected.status),
            reason: rejected.reason,
            was_clean: false,
        })
        .await;
}

/// Used by the server front-end to bound per-connection options to the
/// subset [`Driver`] understands.
pub(crate) fn server_options(options: &ServerOptions) -> Options {
    options.common.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_state_defaults_to_initialized_equivalent() {
        assert_eq!(ReadyState::Initialized, ReadyState::Initialized);
        assert_ne!(ReadyState::Initialized, ReadyState::Open);
    }
}
