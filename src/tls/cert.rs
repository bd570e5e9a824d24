//! Certificate inspection
//!
//! Used by the daemon to log which certificate the listener presents.

use log::debug;
use openssl::hash::MessageDigest;
use openssl::x509::X509;
use std::path::Path;

use crate::common::{read_file, AcceptorError, Result};

/// Load a PEM-encoded certificate
pub fn load_cert(cert_path: &Path) -> Result<X509> {
    let cert_data = read_file(cert_path).map_err(|e| {
        AcceptorError::Certificate(format!(
            "Failed to read certificate file {}: {}",
            cert_path.display(),
            e
        ))
    })?;

    X509::from_pem(&cert_data)
        .map_err(|e| AcceptorError::Certificate(format!("Failed to parse certificate: {}", e)))
}

/// Subject of a certificate as `SN=value` pairs, e.g. `CN=localhost, O=Example`
pub fn get_cert_subject(cert_path: &Path) -> Result<String> {
    let cert = load_cert(cert_path)?;

    let mut parts = Vec::new();
    for entry in cert.subject_name().entries() {
        let key = entry.object().nid().short_name().unwrap_or("?");
        let value = entry
            .data()
            .to_string()
            .unwrap_or_else(|_| String::from("<binary>"));
        parts.push(format!("{}={}", key, value));
    }

    let subject = parts.join(", ");
    debug!("Certificate {} subject: {}", cert_path.display(), subject);
    Ok(subject)
}

/// SHA-256 fingerprint as colon-separated lowercase hex
pub fn get_cert_fingerprint(cert_path: &Path) -> Result<String> {
    let cert = load_cert(cert_path)?;
    let fingerprint = cert.digest(MessageDigest::sha256())?;

    Ok(fingerprint
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<String>>()
        .join(":"))
}
