//! Protocol Acceptor: one listening port, many protocols
//!
//! An [`Acceptor`] listens on a single TCP port, optionally terminates TLS,
//! and buffers each new connection's opening bytes until a registered
//! [`ProtocolDetector`] recognizes them. The matched detector then takes
//! ownership of the connection, including the bytes already read.
//!
//! # Main Features
//!
//! - Plain or TLS listeners, with non-blocking server handshakes
//! - Detectors evaluated in registration order after every read
//! - Bounded detection window: slow or silent clients are reset
//! - Buffered bytes replayed to the handler before live reads
//!
//! # Example
//!
//! ```no_run
//! use std::io::{BufRead, BufReader, Write};
//! use protocol_acceptor::{Acceptor, PrefixDetector, Result};
//!
//! fn main() -> Result<()> {
//!     let mut acceptor = Acceptor::start("0.0.0.0", 54321, None)?;
//!
//!     acceptor.add_detector(PrefixDetector::new("echo", |mut conn, _peer| {
//!         let mut line = String::new();
//!         if BufReader::new(&mut conn).read_line(&mut line).is_ok() {
//!             let _ = conn.write_all(line.as_bytes());
//!         }
//!     }))?;
//!
//!     // Blocks until `stop()` is called through a handle
//!     acceptor.serve_forever()
//! }
//! ```

pub mod acceptor;
pub mod common;
pub mod config;
pub mod protocol;
pub mod tls;

pub use acceptor::{Acceptor, AcceptorBuilder, AcceptorHandle, Connection, StatsSnapshot};
pub use common::{parse_socket_addr, AcceptorError, Result};
pub use protocol::{PrefixDetector, ProtocolDetector};
pub use tls::create_tls_acceptor;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
