//! Credential provisioning.
//!
//! Each credential kind is loaded from its configured path when present, or
//! generated and persisted when absent. Every failure is returned as a
//! [`CredentialError`]; partially provisioned material is never accepted.

mod onion;
mod signing;
mod tls;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub use onion::{load_or_create_onion_identity, onion_service_id, OnionIdentity};
pub use signing::{load_or_create_signing_identity, SigningIdentity};
pub use tls::{
    load_or_create_tls_identity, CertificateIssuer, IssuedCertificate, SelfSignedIssuer,
    TlsIdentity,
};

/// Credential provisioning error
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Onion key {path} is {len} bytes (expected 32)")]
    InvalidOnionKey { path: PathBuf, len: usize },

    #[error("Signing key {path} is not a valid Ed25519 PKCS#8 key: {reason}")]
    InvalidSigningKey { path: PathBuf, reason: String },

    #[error("Failed to issue certificate for {host}: {reason}")]
    Issuance { host: String, reason: String },
}

/// Write private material to `path` with owner-only permissions.
///
/// Goes through a sibling temp file and a rename so a crash never leaves a
/// truncated key behind.
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> Result<(), CredentialError> {
    let write_err = |source| CredentialError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp).map_err(write_err)?;
    file.write_all(contents).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    fs::rename(&tmp, path).map_err(write_err)?;

    // An existing file keeps its old mode across rename on some platforms.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(write_err)?;
    }

    Ok(())
}

/// Write public material (certificates) to `path`.
pub(crate) fn write_public(path: &Path, contents: &[u8]) -> Result<(), CredentialError> {
    fs::write(path, contents).map_err(|source| CredentialError::Write {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>, CredentialError> {
    fs::read(path).map_err(|source| CredentialError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_private_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");

        write_private(&path, b"first").unwrap();
        write_private(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!dir.path().join("secret.key.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn write_private_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        fs::write(&path, b"old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        write_private(&path, b"new").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("secret.key");
        assert!(matches!(
            write_private(&path, b"x"),
            Err(CredentialError::Write { .. })
        ));
    }
}
