//! Network utility functions
//!
//! This module provides address parsing and resolution helpers.

use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use super::error::{AcceptorError, Result};

/// Parse a socket address
///
/// Accepts literal `ip:port` strings as well as resolvable `host:port` names.
///
/// # Arguments
///
/// * `addr` - The address string to parse
///
/// # Returns
///
/// The parsed `SocketAddr`
pub fn parse_socket_addr(addr: &str) -> Result<SocketAddr> {
    if let Ok(socket_addr) = SocketAddr::from_str(addr) {
        return Ok(socket_addr);
    }

    match addr.to_socket_addrs() {
        Ok(mut addrs) => addrs.next().ok_or_else(|| {
            AcceptorError::Configuration(format!("Failed to parse address: {}", addr))
        }),
        Err(e) => Err(AcceptorError::Configuration(format!(
            "Failed to parse address {}: {}",
            addr, e
        ))),
    }
}

/// Resolve a bind host and port into a single socket address
///
/// Resolution failures are reported as bind errors since they prevent the
/// listener from being created.
pub fn resolve_bind_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let bind_error = |source| AcceptorError::Bind {
        addr: format!("{}:{}", host, port),
        source,
    };

    (host, port)
        .to_socket_addrs()
        .map_err(bind_error)?
        .next()
        .ok_or_else(|| {
            bind_error(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "host resolved to no addresses",
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_socket_addr() {
        let addr = parse_socket_addr("127.0.0.1:8080");
        assert!(addr.is_ok(), "Should be able to parse a valid address");
        assert_eq!(addr.unwrap().port(), 8080);

        let addr = parse_socket_addr("invalid-address");
        assert!(addr.is_err(), "Should fail to parse an invalid address");
    }

    #[test]
    fn test_resolve_bind_addr() {
        let addr = resolve_bind_addr("127.0.0.1", 0).unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 0);

        let addr = resolve_bind_addr("::1", 4000).unwrap();
        assert!(addr.is_ipv6());
    }
}
