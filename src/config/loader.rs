//! Configuration loading functionality
//!
//! Configuration is layered: defaults, then a JSON file, then
//! `PROTOCOL_ACCEPTOR_*` environment variables, then command line flags
//! (applied by the binary).

use log::{debug, warn};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::common::{parse_socket_addr, AcceptorError, Result};
use crate::config::defaults::ENV_PREFIX;
use crate::config::{duration_from_secs, ClientCertMode, ServerConfig, TlsConfig};

/// Trait for loading configuration from different sources
pub trait ConfigLoader: Sized {
    /// Load configuration from a JSON file
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self>;

    /// Apply overrides found in the process environment
    fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| env::var(format!("{}{}", ENV_PREFIX, name)).ok())
    }

    /// Apply overrides from an arbitrary lookup (`name` excludes the prefix)
    fn with_overrides<F>(self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>;
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| {
        AcceptorError::Configuration(format!("Invalid value for {}{}: {}", ENV_PREFIX, name, e))
    })
}

impl ConfigLoader for ServerConfig {
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from file: {}", path.display());

        let content = fs::read_to_string(path).map_err(|e| {
            AcceptorError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            AcceptorError::Configuration(format!(
                "Failed to parse JSON config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("LISTEN") {
            self.listen = parse_socket_addr(&value)?;
        }

        if let Some(value) = lookup("LOG_LEVEL") {
            self.log_level = value;
        }

        if let Some(value) = lookup("DETECTION_TIMEOUT") {
            self.detection.timeout = duration_from_secs(parse_number("DETECTION_TIMEOUT", &value)?)?;
        }

        if let Some(value) = lookup("MAX_BUFFER_SIZE") {
            self.detection.max_buffer_size = parse_number("MAX_BUFFER_SIZE", &value)?;
        }

        if let Some(value) = lookup("READ_CHUNK_SIZE") {
            self.detection.read_chunk_size = parse_number("READ_CHUNK_SIZE", &value)?;
        }

        match (lookup("TLS_CERT"), lookup("TLS_KEY")) {
            (Some(cert), Some(key)) => {
                let tls = self.tls.get_or_insert_with(|| TlsConfig::new(&cert, &key));
                tls.cert_path = PathBuf::from(cert);
                tls.key_path = PathBuf::from(key);
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(AcceptorError::Configuration(format!(
                    "{0}TLS_CERT and {0}TLS_KEY must be set together",
                    ENV_PREFIX
                )));
            }
            (None, None) => {}
        }

        let ca_cert = lookup("TLS_CA_CERT");
        let client_cert_mode = lookup("CLIENT_CERT_MODE")
            .map(|mode| ClientCertMode::from_str(&mode))
            .transpose()?;

        match self.tls.as_mut() {
            Some(tls) => {
                if let Some(ca) = ca_cert {
                    tls.ca_cert_path = Some(PathBuf::from(ca));
                }
                if let Some(mode) = client_cert_mode {
                    tls.client_cert_mode = mode;
                }
            }
            None if ca_cert.is_some() || client_cert_mode.is_some() => {
                warn!("Ignoring client certificate settings: TLS is not configured");
            }
            None => {}
        }

        Ok(self)
    }
}
