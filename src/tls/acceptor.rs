//! TLS acceptor creation

use log::info;
use openssl::ssl::{SslAcceptor, SslFiletype, SslMethod, SslVerifyMode};

use crate::common::{AcceptorError, Result};
use crate::config::{ClientCertMode, TlsConfig};

/// Build a reusable server-side TLS context from PEM files
///
/// # Example
///
/// ```no_run
/// # use protocol_acceptor::config::TlsConfig;
/// # use protocol_acceptor::tls::create_tls_acceptor;
/// # fn main() -> protocol_acceptor::Result<()> {
/// let tls = create_tls_acceptor(&TlsConfig::new("certs/server.crt", "certs/server.key"))?;
/// # Ok(())
/// # }
/// ```
pub fn create_tls_acceptor(config: &TlsConfig) -> Result<SslAcceptor> {
    config.validate()?;

    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())?;

    acceptor.set_certificate_chain_file(&config.cert_path).map_err(|e| {
        AcceptorError::Certificate(format!(
            "Failed to load certificate {}: {}",
            config.cert_path.display(),
            e
        ))
    })?;
    acceptor
        .set_private_key_file(&config.key_path, SslFiletype::PEM)
        .map_err(|e| {
            AcceptorError::Certificate(format!(
                "Failed to load private key {}: {}",
                config.key_path.display(),
                e
            ))
        })?;
    acceptor.check_private_key()?;

    if let Some(ca_cert_path) = &config.ca_cert_path {
        acceptor.set_ca_file(ca_cert_path)?;
    }

    match config.client_cert_mode {
        ClientCertMode::Required => {
            info!("Client certificates required (will be verified)");
            acceptor.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);
        }
        ClientCertMode::Optional => {
            info!("Client certificates optional (will be verified if provided)");
            acceptor.set_verify(SslVerifyMode::PEER);
        }
        ClientCertMode::None => {
            info!("Client certificates not requested");
            acceptor.set_verify(SslVerifyMode::NONE);
        }
    }

    Ok(acceptor.build())
}
