//! File system helpers used when loading configuration and PEM material.

use std::fs;
use std::path::Path;

use super::error::{AcceptorError, Result};

/// Check that `path` exists and is a regular file
pub fn check_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(AcceptorError::Configuration(format!(
            "File does not exist: {}",
            path.display()
        )));
    }

    if !path.is_file() {
        return Err(AcceptorError::Configuration(format!(
            "Path is not a file: {}",
            path.display()
        )));
    }

    Ok(())
}

/// Read a whole file after checking that it exists
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    check_file_exists(path)?;

    fs::read(path).map_err(AcceptorError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_check_file_exists() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(check_file_exists(file.path()).is_ok());

        let dir = tempfile::tempdir().unwrap();
        assert!(check_file_exists(dir.path()).is_err(), "Directories are rejected");
        assert!(check_file_exists(&dir.path().join("missing.pem")).is_err());
    }

    #[test]
    fn test_read_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"-----BEGIN CERTIFICATE-----").unwrap();

        let content = read_file(file.path()).unwrap();
        assert_eq!(content, b"-----BEGIN CERTIFICATE-----");
    }
}
