//! Pending connections
//!
//! A pending connection is a socket whose protocol is not known yet. It owns
//! the bytes read so far and, on TLS listeners, drives the server handshake
//! without blocking. Only the dispatcher touches a pending connection.

use bytes::BytesMut;
use log::{debug, trace};
use openssl::ssl::{ErrorCode, HandshakeError, MidHandshakeSslStream, Ssl, SslAcceptor, SslStream};
use std::io::{self, Read};
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use super::connection::{Connection, Socket, Stream};
use crate::config::DetectionConfig;
use crate::protocol::{DetectionResult, DetectorRegistry, ProtocolDetector};

/// Why a pending connection was closed without a handoff
#[derive(Error, Debug)]
pub(crate) enum CloseReason {
    #[error("TLS handshake failed: {0}")]
    HandshakeFailure(String),

    #[error("no protocol detected within {0:?}")]
    DetectionTimeout(Duration),

    #[error("no protocol matched {0} buffered bytes")]
    NoProtocolMatch(usize),

    #[error("peer disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

enum Transport {
    Plain(Socket),
    /// TLS listener, handshake not started yet
    Accepting(Socket),
    Handshaking(MidHandshakeSslStream<Socket>),
    Tls(SslStream<Socket>),
    /// Handshake failed; kept until the dispatcher has recorded the close
    Failed(MidHandshakeSslStream<Socket>),
    Detached,
}

enum ReadOutcome {
    Data(usize),
    WantRead,
    WantWrite,
    Eof,
}

impl Transport {
    fn socket(&self) -> Option<&Socket> {
        match self {
            Transport::Plain(socket) | Transport::Accepting(socket) => Some(socket),
            Transport::Handshaking(mid) | Transport::Failed(mid) => Some(mid.get_ref()),
            Transport::Tls(stream) => Some(stream.get_ref()),
            Transport::Detached => None,
        }
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        match self {
            Transport::Plain(socket) => match socket.read(buf) {
                Ok(0) => Ok(ReadOutcome::Eof),
                Ok(n) => Ok(ReadOutcome::Data(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::WantRead),
                Err(e) => Err(e),
            },
            Transport::Tls(stream) => match stream.ssl_read(buf) {
                Ok(0) => Ok(ReadOutcome::Eof),
                Ok(n) => Ok(ReadOutcome::Data(n)),
                Err(e) => match e.code() {
                    ErrorCode::WANT_READ => Ok(ReadOutcome::WantRead),
                    ErrorCode::WANT_WRITE => Ok(ReadOutcome::WantWrite),
                    ErrorCode::ZERO_RETURN => Ok(ReadOutcome::Eof),
                    ErrorCode::SYSCALL if e.io_error().is_none() => Ok(ReadOutcome::Eof),
                    _ => Err(e.into_io_error().unwrap_or_else(io::Error::other)),
                },
            },
            _ => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport is not ready for application data",
            )),
        }
    }
}

/// Connection whose protocol identity is still unknown
pub(crate) struct PendingConnection {
    transport: Transport,
    buffer: BytesMut,
    created: Instant,
    peer_addr: SocketAddr,
}

impl PendingConnection {
    /// Track a freshly accepted socket
    ///
    /// With `tls` set the connection starts in the handshake phase and is
    /// invisible to detectors until the handshake completes.
    pub(crate) fn new(stream: tokio::net::TcpStream, peer_addr: SocketAddr, tls: bool) -> Self {
        let socket = Socket::reactor(stream);
        let transport = if tls {
            Transport::Accepting(socket)
        } else {
            Transport::Plain(socket)
        };

        Self {
            transport,
            buffer: BytesMut::new(),
            created: Instant::now(),
            peer_addr,
        }
    }

    pub(crate) fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub(crate) fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub(crate) fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Instant at which the connection is evicted if still unidentified
    pub(crate) fn deadline(&self, timeout: Duration) -> Instant {
        self.created + timeout
    }

    pub(crate) fn is_handshake_complete(&self) -> bool {
        matches!(self.transport, Transport::Plain(_) | Transport::Tls(_))
    }

    /// Read and evaluate until a detector matches or the connection fails
    ///
    /// Detection is attempted after every read, so the handoff happens on
    /// the first read that completes a matching prefix.
    pub(crate) async fn identify(
        &mut self,
        tls: Option<&SslAcceptor>,
        registry: &DetectorRegistry,
        config: &DetectionConfig,
    ) -> Result<Arc<dyn ProtocolDetector>, CloseReason> {
        self.complete_handshake(tls).await?;

        loop {
            let n = self.fill(config.read_chunk_size).await?;
            trace!(
                "Read {} bytes from {} ({} buffered)",
                n,
                self.peer_addr,
                self.buffer.len()
            );

            match registry.detect(&self.buffer) {
                DetectionResult::Matched(detector) => return Ok(detector),
                DetectionResult::NeedMoreData => {}
                DetectionResult::NoMatch => {
                    trace!("No detector accepts {} bytes from {} yet", self.buffer.len(), self.peer_addr);
                }
            }

            if self.buffer.len() >= config.max_buffer_size {
                return Err(CloseReason::NoProtocolMatch(self.buffer.len()));
            }
        }
    }

    async fn complete_handshake(&mut self, tls: Option<&SslAcceptor>) -> Result<(), CloseReason> {
        loop {
            match &self.transport {
                Transport::Accepting(_) => {}
                Transport::Failed(mid) => {
                    return Err(CloseReason::HandshakeFailure(mid.error().to_string()));
                }
                Transport::Handshaking(mid) => {
                    let socket = mid.get_ref();
                    if mid.error().code() == ErrorCode::WANT_WRITE {
                        socket.writable().await?;
                    } else {
                        socket.readable().await?;
                    }
                }
                _ => return Ok(()),
            }

            let result = match mem::replace(&mut self.transport, Transport::Detached) {
                Transport::Accepting(socket) => match tls {
                    Some(acceptor) => match Ssl::new(acceptor.context()) {
                        Ok(ssl) => ssl.accept(socket),
                        Err(e) => {
                            self.transport = Transport::Accepting(socket);
                            return Err(CloseReason::HandshakeFailure(e.to_string()));
                        }
                    },
                    None => {
                        self.transport = Transport::Plain(socket);
                        return Ok(());
                    }
                },
                Transport::Handshaking(mid) => mid.handshake(),
                other => {
                    self.transport = other;
                    return Ok(());
                }
            };

            match result {
                Ok(stream) => {
                    debug!("TLS handshake with {} completed in {:?}", self.peer_addr, self.age());
                    self.transport = Transport::Tls(stream);
                    return Ok(());
                }
                Err(HandshakeError::WouldBlock(mid)) => {
                    self.transport = Transport::Handshaking(mid);
                }
                Err(HandshakeError::Failure(mid)) => {
                    let reason = mid.error().to_string();
                    self.transport = Transport::Failed(mid);
                    return Err(CloseReason::HandshakeFailure(reason));
                }
                Err(HandshakeError::SetupFailure(e)) => {
                    // BIO allocation failed and took the socket with it
                    return Err(CloseReason::HandshakeFailure(e.to_string()));
                }
            }
        }
    }

    /// Perform one successful non-blocking read, waiting for readiness as needed
    async fn fill(&mut self, chunk: usize) -> Result<usize, CloseReason> {
        loop {
            let start = self.buffer.len();
            self.buffer.resize(start + chunk, 0);
            let outcome = self.transport.read_some(&mut self.buffer[start..]);
            let filled = match outcome {
                Ok(ReadOutcome::Data(n)) => n,
                _ => 0,
            };
            self.buffer.truncate(start + filled);

            let want_write = match outcome? {
                ReadOutcome::Data(n) => return Ok(n),
                ReadOutcome::Eof => return Err(CloseReason::Disconnected),
                ReadOutcome::WantRead => false,
                ReadOutcome::WantWrite => true,
            };

            let socket = self.transport.socket().ok_or(CloseReason::Disconnected)?;
            if want_write {
                socket.writable().await?;
            } else {
                socket.readable().await?;
            }
        }
    }

    /// Make the peer observe a reset once this connection is dropped
    pub(crate) fn abort(&self) {
        if let Some(socket) = self.transport.socket() {
            socket.abort();
        }
    }

    /// Turn an identified connection into the handler-facing [`Connection`]
    ///
    /// Must be called on the dispatcher thread since it detaches the socket
    /// from the reactor.
    pub(crate) fn into_connection(self) -> io::Result<Connection> {
        let pending_for = self.age();
        let stream = match self.transport {
            Transport::Plain(mut socket) => {
                socket.make_blocking()?;
                Stream::Plain(socket)
            }
            Transport::Tls(mut stream) => {
                stream.get_mut().make_blocking()?;
                Stream::Tls(stream)
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "connection has not completed its handshake",
                ))
            }
        };

        Ok(Connection::new(
            stream,
            self.buffer.freeze(),
            self.peer_addr,
            pending_for,
        ))
    }
}
