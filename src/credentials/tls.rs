//! TLS server certificate provisioning.

use std::path::{Path, PathBuf};

use super::{write_private, write_public, CredentialError};

/// A TLS host and the certificate/key files that serve it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsIdentity {
    pub host: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// PEM-encoded certificate and private key
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Mints a certificate/key pair for a host.
pub trait CertificateIssuer {
    fn issue_self_signed(&self, host: &str) -> Result<IssuedCertificate, CredentialError>;
}

/// Self-signed certificates via rcgen
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfSignedIssuer;

impl CertificateIssuer for SelfSignedIssuer {
    fn issue_self_signed(&self, host: &str) -> Result<IssuedCertificate, CredentialError> {
        let certified = rcgen::generate_simple_self_signed(vec![host.to_string()]).map_err(|e| {
            CredentialError::Issuance {
                host: host.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(IssuedCertificate {
            cert_pem: certified.cert.pem(),
            key_pem: certified.key_pair.serialize_pem(),
        })
    }
}

/// Accept an existing cert/key pair, or issue and persist a fresh one bound to `host`.
///
/// A pair with only one half on disk is reissued as a whole.
pub fn load_or_create_tls_identity(
    host: &str,
    cert_path: &Path,
    key_path: &Path,
    issuer: &dyn CertificateIssuer,
) -> Result<TlsIdentity, CredentialError> {
    let identity = TlsIdentity {
        host: host.to_string(),
        cert_path: cert_path.to_path_buf(),
        key_path: key_path.to_path_buf(),
    };

    let cert_exists = cert_path.exists();
    let key_exists = key_path.exists();
    if cert_exists && key_exists {
        tracing::info!(
            host = %host,
            cert = %cert_path.display(),
            key = %key_path.display(),
            "Using existing TLS certificate"
        );
        return Ok(identity);
    }

    if cert_exists || key_exists {
        tracing::warn!(
            host = %host,
            cert_exists,
            key_exists,
            "Incomplete TLS certificate pair, reissuing both files"
        );
    }

    tracing::info!(host = %host, "Issuing self-signed TLS certificate");
    let issued = issuer.issue_self_signed(host)?;

    write_private(key_path, issued.key_pem.as_bytes())?;
    write_public(cert_path, issued.cert_pem.as_bytes())?;

    tracing::info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "Persisted TLS certificate"
    );
    Ok(identity)
}
