//! Configuration module
//!
//! [`DetectionConfig`] holds the acceptor's tuning options and is the only
//! configuration the acceptor itself consumes. [`ServerConfig`] describes a
//! whole daemon (listen address, logging, TLS material) and is what the
//! binary loads from files, environment variables and command line flags.

pub mod defaults;
mod loader;

pub use self::defaults::ENV_PREFIX;
pub use self::loader::ConfigLoader;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::common::{check_file_exists, parse_socket_addr, AcceptorError, Result};

/// Custom deserializer for socket addresses
fn deserialize_socket_addr<'de, D>(deserializer: D) -> std::result::Result<SocketAddr, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_socket_addr(&s).map_err(serde::de::Error::custom)
}

fn serialize_socket_addr<S>(addr: &SocketAddr, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(addr)
}

/// Durations are written as (fractional) seconds
fn deserialize_secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    duration_from_secs(secs).map_err(serde::de::Error::custom)
}

fn serialize_secs<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Convert seconds into a `Duration`, rejecting non-positive and non-finite values
pub fn duration_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(AcceptorError::Configuration(format!(
            "Detection timeout must be a positive number of seconds, got {}",
            secs
        )));
    }

    Ok(Duration::from_secs_f64(secs))
}

/// Client certificate verification mode
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClientCertMode {
    /// Require client certificate, handshake fails if not provided
    Required,
    /// Verify the client certificate if provided but don't require it
    Optional,
    /// Don't request client certificates
    None,
}

// Case-insensitive
impl<'de> Deserialize<'de> for ClientCertMode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ClientCertMode::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl Default for ClientCertMode {
    fn default() -> Self {
        defaults::client_cert_mode()
    }
}

impl fmt::Display for ClientCertMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "required"),
            Self::Optional => write!(f, "optional"),
            Self::None => write!(f, "none"),
        }
    }
}

impl FromStr for ClientCertMode {
    type Err = AcceptorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "required" => Ok(Self::Required),
            "optional" => Ok(Self::Optional),
            "none" => Ok(Self::None),
            _ => Err(AcceptorError::Configuration(format!(
                "Invalid client certificate mode: {}. Valid values are: required, optional, none",
                s
            ))),
        }
    }
}

/// Protocol detection tuning
///
/// These values bound how long and how much a client may send before its
/// protocol is identified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct DetectionConfig {
    /// Maximum time a connection may remain unidentified before forced closure
    #[serde(deserialize_with = "deserialize_secs", serialize_with = "serialize_secs")]
    pub timeout: Duration,

    /// Buffered bytes after which a connection that matched nothing is closed
    pub max_buffer_size: usize,

    /// Bytes requested from the socket per non-blocking read
    pub read_chunk_size: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            timeout: defaults::detection_timeout(),
            max_buffer_size: defaults::max_buffer_size(),
            read_chunk_size: defaults::read_chunk_size(),
        }
    }
}

impl DetectionConfig {
    /// Check that every value is usable
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(AcceptorError::Configuration(
                "Detection timeout must be greater than zero".to_string(),
            ));
        }

        if self.max_buffer_size == 0 {
            return Err(AcceptorError::Configuration(
                "Maximum detection buffer size must be greater than zero".to_string(),
            ));
        }

        if self.read_chunk_size == 0 {
            return Err(AcceptorError::Configuration(
                "Read chunk size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// TLS material for the listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// Server certificate (PEM)
    pub cert_path: PathBuf,

    /// Server private key (PEM)
    pub key_path: PathBuf,

    /// CA bundle used to verify client certificates
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,

    /// Client certificate verification mode
    #[serde(default)]
    pub client_cert_mode: ClientCertMode,
}

impl TlsConfig {
    /// Create a TLS configuration without client certificate verification
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_cert_path: None,
            client_cert_mode: ClientCertMode::None,
        }
    }

    /// Check that the referenced files exist and the verification mode is satisfiable
    pub fn validate(&self) -> Result<()> {
        check_file_exists(&self.cert_path)?;
        check_file_exists(&self.key_path)?;

        match (&self.ca_cert_path, self.client_cert_mode) {
            (Some(ca), _) => check_file_exists(ca),
            (None, ClientCertMode::None) => Ok(()),
            (None, mode) => Err(AcceptorError::Configuration(format!(
                "Client certificate mode '{}' requires a CA certificate",
                mode
            ))),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    #[serde(
        deserialize_with = "deserialize_socket_addr",
        serialize_with = "serialize_socket_addr"
    )]
    pub listen: SocketAddr,

    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,

    /// Detection tuning
    pub detection: DetectionConfig,

    /// TLS settings; plaintext only when absent
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: defaults::listen(),
            log_level: defaults::log_level(),
            detection: DetectionConfig::default(),
            tls: None,
        }
    }
}

impl ServerConfig {
    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        match self.log_level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            other => {
                return Err(AcceptorError::Configuration(format!(
                    "Invalid log level: {}",
                    other
                )))
            }
        }

        self.detection.validate()?;

        if let Some(tls) = &self.tls {
            tls.validate()?;
        }

        Ok(())
    }
}
