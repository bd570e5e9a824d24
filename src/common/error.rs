//! Error handling module
//!
//! This module defines the error types and result type aliases surfaced to
//! callers of the acceptor. Per-connection failures never appear here; they
//! are handled inside the dispatcher.

use thiserror::Error;
use std::io;

/// Acceptor error type
#[derive(Error, Debug)]
pub enum AcceptorError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// OpenSSL error
    #[error("OpenSSL error: {0}")]
    Ssl(#[from] openssl::error::ErrorStack),

    /// The listening socket could not be created or bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// Invalid configuration (duplicate detector, bad timeout, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Certificate error
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// The acceptor was stopped or has already been served
    #[error("Acceptor is stopped")]
    Stopped,
}

/// Result type alias
///
/// This is a `Result` type alias that uses our custom `AcceptorError`.
pub type Result<T> = std::result::Result<T, AcceptorError>;
