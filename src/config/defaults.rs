//! Default configuration values
//!
//! Single source of truth for defaults, used by serde attributes, the
//! builder and the command line interface.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use super::ClientCertMode;

/// Environment variable prefix for all configuration options
pub const ENV_PREFIX: &str = "PROTOCOL_ACCEPTOR_";

/// Default listen address as string
pub const LISTEN_STR: &str = "0.0.0.0:54321";

/// Default log level as string
pub const LOG_LEVEL_STR: &str = "info";

/// Default detection timeout in seconds
pub const DETECTION_TIMEOUT_SECS: f64 = 30.0;

/// Default listen backlog
pub const BACKLOG: i32 = 128;

/// Default listen address
pub fn listen() -> SocketAddr {
    SocketAddr::from_str(LISTEN_STR)
        .expect("Default listen address should be valid")
}

/// Default log level
pub fn log_level() -> String {
    LOG_LEVEL_STR.to_string()
}

/// Maximum time a connection may stay unidentified
pub fn detection_timeout() -> Duration {
    Duration::from_secs_f64(DETECTION_TIMEOUT_SECS)
}

/// Buffered bytes after which an unidentified connection is dropped
pub fn max_buffer_size() -> usize {
    4096
}

/// Bytes requested from the socket per read
pub fn read_chunk_size() -> usize {
    1024
}

/// Default client certificate mode
pub fn client_cert_mode() -> ClientCertMode {
    ClientCertMode::None
}
