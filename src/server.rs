//! Server front-end: accepts connections, parses the request line across a
//! connection, and hands the application a [`Request`] to resolve. Grounded
//! on the teacher's `start_server_with_config` accept loop (`TcpListener`,
//! optional `TlsAcceptor`, per-connection `tokio::spawn`), generalized from
//! "always upgrade" into the three-way `respond`/`redirect`/`upgrade`
//! resolution §4.8 requires, with reclaim-on-drop for requests the
//! application never resolves.

use std::net::SocketAddr;
use std::sync::Arc;

use log::warn;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_rustls::TlsAcceptor;

use crate::endpoint::{self, Endpoint, EventStream};
use crate::error::Error;
use crate::frame::Role;
use crate::handshake::{self, HandshakeResult};
use crate::http::{self, Headers, HttpRequest};
use crate::options::ServerOptions;
use crate::transport::Transport;

/// A bound listener producing one [`Request`] per accepted connection.
pub struct Server {
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    options: ServerOptions,
}

impl Server {
    pub async fn bind(addr: impl ToSocketAddrs, options: ServerOptions) -> std::io::Result<Server> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Server {
            listener,
            tls_acceptor: None,
            options,
        })
    }

    pub async fn bind_tls(
        addr: impl ToSocketAddrs,
        tls_config: Arc<rustls::ServerConfig>,
        options: ServerOptions,
    ) -> std::io::Result<Server> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Server {
            listener,
            tls_acceptor: Some(TlsAcceptor::from(tls_config)),
            options,
        })
    }

    /// Accepts one connection and parses its HTTP request. Returns once a
    /// complete request has been read; the connection is neither upgraded
    /// nor rejected until the caller resolves the returned [`Request`].
    pub async fn accept(&self) -> Result<Request, Error> {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            let _ = stream.set_nodelay(true);

            let transport = if let Some(acceptor) = &self.tls_acceptor {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => Transport::ServerTls(Box::new(tls_stream)),
                    Err(e) => {
                        warn!("TLS handshake failed for {peer_addr}: {e}");
                        continue;
                    }
                }
            } else {
                Transport::Plain(stream)
            };

            match read_request(transport).await {
                Ok((request, transport)) => {
                    return Ok(Request {
                        request,
                        peer_addr,
                        transport: Some(transport),
                        options: self.options.clone(),
                    })
                }
                Err(e) => {
                    warn!("failed to parse request from {peer_addr}: {e}");
                    continue;
                }
            }
        }
    }
}

async fn read_request(mut transport: Transport) -> Result<(HttpRequest, Transport), Error> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match http::parse_request(&buf) {
            http::ParseOutcome::Complete { message, .. } => return Ok((message, transport)),
            http::ParseOutcome::Invalid(reason) => return Err(Error::InvalidHttpMessage(reason)),
            http::ParseOutcome::Incomplete => {
                let n = transport.read(&mut chunk).await?;
                if n == 0 {
                    return Err(Error::UnexpectedDisconnect);
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

/// One inbound HTTP request awaiting resolution. Dropping an unresolved
/// `Request` closes its connection (reclaim-on-drop).
pub struct Request {
    request: HttpRequest,
    peer_addr: SocketAddr,
    transport: Option<Transport>,
    options: ServerOptions,
}

impl Request {
    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn target(&self) -> &str {
        &self.request.target
    }

    pub fn headers(&self) -> &Headers {
        &self.request.headers
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_upgrade_request(&self) -> bool {
        handshake::server::validate(&self.request).is_ok()
    }

    pub fn subprotocols(&self) -> Vec<String> {
        self.request.headers.token_list("sec-websocket-protocol")
    }

    /// Sends a plain-text response and closes the connection.
    pub async fn respond(mut self, status: u16, reason: &str, body: &str) {
        if let Some(mut transport) = self.transport.take() {
            let response = handshake::server::reject_response(status, reason, body);
            let _ = transport.write_all(&http::encode_response(&response)).await;
            let _ = transport.shutdown().await;
        }
    }

    /// Sends a redirect response and closes the connection.
    pub async fn redirect(mut self, location: &str, status: u16) {
        if let Some(mut transport) = self.transport.take() {
            let mut response = handshake::server::reject_response(status, "Redirect", "");
            response.headers.set("Location", location);
            let _ = transport.write_all(&http::encode_response(&response)).await;
            let _ = transport.shutdown().await;
        }
    }

    /// Validates the request as a WebSocket upgrade, sends the 101
    /// response, and hands back a fully open endpoint. On validation
    /// failure, sends a 400 response and closes instead.
    ///
    /// `subprotocol` overrides the automatic first-mutual-match pick
    /// (`None` keeps the automatic choice). `extra_headers` are added to
    /// the 101 response, dropping any forbidden name. `options` overrides
    /// the server's configured [`ServerOptions`] for this connection only
    /// (`None` keeps the listener's configuration).
    pub async fn upgrade(
        mut self,
        subprotocol: Option<String>,
        extra_headers: std::collections::HashMap<String, String>,
        options: Option<ServerOptions>,
    ) -> Result<(Endpoint, EventStream), Error> {
        let mut transport = self.transport.take().ok_or(Error::Canceled)?;
        let options = options.unwrap_or_else(|| self.options.clone());

        if let Err(e) = handshake::server::validate(&self.request) {
            let response = handshake::server::error_to_response(&e);
            let _ = transport.write_all(&http::encode_response(&response)).await;
            let _ = transport.shutdown().await;
            return Err(e);
        }

        let (response, handshake_result): (_, HandshakeResult) =
            handshake::server::accept(&self.request, &options, subprotocol, &extra_headers);
        transport
            .write_all(&http::encode_response(&response))
            .await?;

        let endpoint_options = endpoint::server_options(&options);
        Ok(endpoint::spawn_open(transport, Role::Server, handshake_result, endpoint_options).await)
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            tokio::spawn(async move {
                let _ = transport.shutdown().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subprotocols_are_parsed_from_header() {
        let mut headers = Headers::default();
        headers.set("Sec-WebSocket-Protocol", "chat, superchat");
        let request = HttpRequest {
            method: "GET".to_string(),
            target: "/".to_string(),
            minor_version: 1,
            headers,
            body: Vec::new(),
        };
        let req = Request {
            request,
            peer_addr: "127.0.0.1:1".parse().unwrap(),
            transport: None,
            options: ServerOptions::default(),
        };
        assert_eq!(req.subprotocols(), vec!["chat", "superchat"]);
    }
}
