//! Connection acceptor
//!
//! Accepting, handshaking, buffering and routing of incoming connections.

mod connection;
mod dispatcher;
mod handle;
mod pending;
mod server;
mod stats;

pub use connection::Connection;
pub use handle::AcceptorHandle;
pub use server::{Acceptor, AcceptorBuilder};
pub use stats::StatsSnapshot;
