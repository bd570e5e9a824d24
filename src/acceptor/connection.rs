//! Sockets and handed-off connections
//!
//! While a connection is pending its socket is registered with the
//! dispatcher's reactor and every read is non-blocking. At handoff the socket
//! is detached from the reactor and switched to blocking mode, so handlers
//! can use plain `std::io` on their own threads.

use bytes::Bytes;
use log::debug;
use openssl::ssl::{SslRef, SslStream};
use socket2::SockRef;
use std::fmt;
use std::io::{self, Read, Write};
use std::mem;
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

enum SocketState {
    Reactor(tokio::net::TcpStream),
    Blocking(std::net::TcpStream),
    Detached,
}

/// TCP socket that starts out non-blocking and can be made blocking
///
/// `Read`/`Write` on a reactor socket never block and report
/// `ErrorKind::WouldBlock` instead, which is what OpenSSL expects from a
/// non-blocking transport.
pub(crate) struct Socket {
    state: SocketState,
}

impl Socket {
    pub(crate) fn reactor(stream: tokio::net::TcpStream) -> Self {
        Self {
            state: SocketState::Reactor(stream),
        }
    }

    #[cfg(test)]
    pub(crate) fn blocking(stream: std::net::TcpStream) -> Self {
        Self {
            state: SocketState::Blocking(stream),
        }
    }

    fn detached() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "socket is detached")
    }

    fn reactor_stream(&self) -> io::Result<&tokio::net::TcpStream> {
        match &self.state {
            SocketState::Reactor(stream) => Ok(stream),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "socket is not registered with the reactor",
            )),
        }
    }

    /// Wait until the socket may be readable
    pub(crate) async fn readable(&self) -> io::Result<()> {
        self.reactor_stream()?.readable().await
    }

    /// Wait until the socket may be writable
    pub(crate) async fn writable(&self) -> io::Result<()> {
        self.reactor_stream()?.writable().await
    }

    /// Leave the reactor and switch to blocking I/O
    pub(crate) fn make_blocking(&mut self) -> io::Result<()> {
        match mem::replace(&mut self.state, SocketState::Detached) {
            SocketState::Reactor(stream) => {
                let stream = stream.into_std()?;
                stream.set_nonblocking(false)?;
                self.state = SocketState::Blocking(stream);
                Ok(())
            }
            SocketState::Blocking(stream) => {
                self.state = SocketState::Blocking(stream);
                Ok(())
            }
            SocketState::Detached => Err(Self::detached()),
        }
    }

    fn sock_ref(&self) -> io::Result<SockRef<'_>> {
        match &self.state {
            SocketState::Reactor(stream) => Ok(SockRef::from(stream)),
            SocketState::Blocking(stream) => Ok(SockRef::from(stream)),
            SocketState::Detached => Err(Self::detached()),
        }
    }

    /// Arrange for the peer to see a reset when this socket is dropped
    pub(crate) fn abort(&self) {
        if let Ok(sock) = self.sock_ref() {
            let _ = sock.set_linger(Some(Duration::ZERO));
        }
    }

    fn blocking_stream(&self) -> io::Result<&std::net::TcpStream> {
        match &self.state {
            SocketState::Blocking(stream) => Ok(stream),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "socket is not in blocking mode",
            )),
        }
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        self.sock_ref()?.shutdown(how)
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.state {
            SocketState::Reactor(stream) => stream.try_read(buf),
            SocketState::Blocking(stream) => stream.read(buf),
            SocketState::Detached => Err(Self::detached()),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.state {
            SocketState::Reactor(stream) => stream.try_write(buf),
            SocketState::Blocking(stream) => stream.write(buf),
            SocketState::Detached => Err(Self::detached()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            SocketState::Blocking(stream) => stream.flush(),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            SocketState::Reactor(_) => "reactor",
            SocketState::Blocking(_) => "blocking",
            SocketState::Detached => "detached",
        };
        f.debug_struct("Socket").field("state", &state).finish()
    }
}

/// Transport of a handed-off connection
pub(crate) enum Stream {
    Plain(Socket),
    Tls(SslStream<Socket>),
}

impl Stream {
    fn socket(&self) -> &Socket {
        match self {
            Stream::Plain(socket) => socket,
            Stream::Tls(stream) => stream.get_ref(),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(socket) => socket.read(buf),
            Stream::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(socket) => socket.write(buf),
            Stream::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(socket) => socket.flush(),
            Stream::Tls(stream) => stream.flush(),
        }
    }
}

/// An identified connection handed to a protocol detector
///
/// Reading from a `Connection` first replays the bytes consumed during
/// detection, then continues with live reads from the (decrypted) socket, so
/// handlers see the session exactly as the client sent it. The socket is in
/// blocking mode.
pub struct Connection {
    stream: Stream,
    buffered: Bytes,
    replayed: usize,
    peer_addr: SocketAddr,
    pending_for: Duration,
}

impl Connection {
    pub(crate) fn new(
        stream: Stream,
        buffered: Bytes,
        peer_addr: SocketAddr,
        pending_for: Duration,
    ) -> Self {
        Self {
            stream,
            buffered,
            replayed: 0,
            peer_addr,
            pending_for,
        }
    }

    /// Bytes received before the protocol was identified
    pub fn buffered(&self) -> &[u8] {
        &self.buffered
    }

    /// Buffered bytes not yet returned by `read`
    pub fn unread(&self) -> &[u8] {
        &self.buffered[self.replayed..]
    }

    /// Address of the remote peer
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Time between accept and handoff
    pub fn pending_for(&self) -> Duration {
        self.pending_for
    }

    /// Whether the connection was TLS-wrapped by the acceptor
    pub fn is_tls(&self) -> bool {
        matches!(self.stream, Stream::Tls(_))
    }

    /// TLS session details, if any
    pub fn ssl(&self) -> Option<&SslRef> {
        match &self.stream {
            Stream::Tls(stream) => Some(stream.ssl()),
            Stream::Plain(_) => None,
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.socket().blocking_stream()?.set_read_timeout(timeout)
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.socket().blocking_stream()?.set_write_timeout(timeout)
    }

    /// Close the connection gracefully
    ///
    /// TLS connections send `close_notify` first; the TCP stream is then shut
    /// down in both directions.
    pub fn shutdown(&mut self) -> io::Result<()> {
        if let Stream::Tls(stream) = &mut self.stream {
            if let Err(e) = stream.shutdown() {
                debug!("TLS shutdown with {} failed: {}", self.peer_addr, e);
            }
        }

        match self.stream.socket().shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let unread = &self.buffered[self.replayed..];
        if !unread.is_empty() {
            let n = unread.len().min(buf.len());
            buf[..n].copy_from_slice(&unread[..n]);
            self.replayed += n;
            return Ok(n);
        }

        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("tls", &self.is_tls())
            .field("buffered", &self.buffered.len())
            .field("replayed", &self.replayed)
            .field("pending_for", &self.pending_for)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::{TcpListener, TcpStream};

    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn connection(server: TcpStream, buffered: &'static [u8]) -> Connection {
        let peer = server.peer_addr().unwrap();
        Connection::new(
            Stream::Plain(Socket::blocking(server)),
            Bytes::from_static(buffered),
            peer,
            Duration::from_millis(5),
        )
    }

    #[test]
    fn test_replays_buffer_before_socket() {
        let (mut client, server) = tcp_pair();
        let mut conn = connection(server, b"echo ");

        client.write_all(b"testing is fun\n").unwrap();

        let mut first = [0u8; 3];
        assert_eq!(conn.read(&mut first).unwrap(), 3);
        assert_eq!(&first, b"ech");
        assert_eq!(conn.unread(), b"o ");

        let mut line = String::new();
        BufReader::new(&mut conn).read_line(&mut line).unwrap();
        assert_eq!(line, "o testing is fun\n");
        assert_eq!(conn.buffered(), b"echo ");
    }

    #[test]
    fn test_write_and_shutdown() {
        let (mut client, server) = tcp_pair();
        let mut conn = connection(server, b"");

        assert!(!conn.is_tls());
        assert!(conn.ssl().is_none());
        assert_eq!(conn.pending_for(), Duration::from_millis(5));
        assert_eq!(conn.peer_addr(), client.local_addr().unwrap());

        conn.write_all(b"hello\n").unwrap();
        conn.shutdown().unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"hello\n");
    }

    #[test]
    fn test_read_timeout_applies() {
        let (_client, server) = tcp_pair();
        let mut conn = connection(server, b"");
        conn.set_read_timeout(Some(Duration::from_millis(50))).unwrap();

        let mut buf = [0u8; 8];
        let err = conn.read(&mut buf).unwrap_err();
        assert!(matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut));
    }
}
