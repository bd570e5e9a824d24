//! Protocol detector contract
//!
//! A detector recognizes a protocol from the first bytes a client sends and
//! takes ownership of the connection once it has matched.

use std::fmt;
use std::net::SocketAddr;

use crate::acceptor::Connection;

/// Protocol detector trait
///
/// The default methods implement prefix detection: a detector named `"echo"`
/// needs four bytes and matches any buffer starting with `echo`.
///
/// # Contract
///
/// * `detect` runs inline on the dispatcher thread. It must be cheap and must
///   not block. A panic inside `detect` is treated as a programming error and
///   unwinds out of [`Acceptor::serve_forever`](crate::Acceptor::serve_forever).
/// * `handoff` runs on a dedicated thread and receives the connection by
///   value, so it is called at most once per connection. It may block.
pub trait ProtocolDetector: Send + Sync {
    /// Unique name of the detector
    fn name(&self) -> &str;

    /// Minimum number of buffered bytes before [`detect`](Self::detect) is consulted
    fn required_size(&self) -> usize {
        self.name().len()
    }

    /// Decide whether `data` belongs to this protocol
    ///
    /// `data` holds every byte received so far and is never shorter than
    /// [`required_size`](Self::required_size).
    fn detect(&self, data: &[u8]) -> bool {
        data.starts_with(self.name().as_bytes())
    }

    /// Take ownership of an identified connection
    fn handoff(&self, connection: Connection, peer_addr: SocketAddr);
}

/// Detector matching a literal prefix and forwarding to a handler closure
///
/// # Example
///
/// ```no_run
/// use std::io::Write;
/// use protocol_acceptor::{Acceptor, PrefixDetector};
///
/// # fn main() -> protocol_acceptor::Result<()> {
/// let mut acceptor = Acceptor::start("127.0.0.1", 0, None)?;
/// acceptor.add_detector(PrefixDetector::new("PING", |mut conn, _peer| {
///     let _ = conn.write_all(b"PONG\n");
/// }))?;
/// # Ok(())
/// # }
/// ```
pub struct PrefixDetector<H> {
    name: String,
    handler: H,
}

impl<H> PrefixDetector<H>
where
    H: Fn(Connection, SocketAddr) + Send + Sync,
{
    /// Create a detector whose name is also the prefix it matches
    pub fn new(name: impl Into<String>, handler: H) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<H> ProtocolDetector for PrefixDetector<H>
where
    H: Fn(Connection, SocketAddr) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handoff(&self, connection: Connection, peer_addr: SocketAddr) {
        (self.handler)(connection, peer_addr)
    }
}

impl<H> fmt::Debug for PrefixDetector<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefixDetector")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
