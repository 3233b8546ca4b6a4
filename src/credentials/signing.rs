//! Content-signing identity.
//!
//! The key is Ed25519, stored as PKCS#8 PEM. An existing file is always
//! loaded; a key is generated only when no file exists at all.

use std::fmt;
use std::path::Path;

use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use super::{read_file, write_private, CredentialError};

/// The signer label and private key used to attest bundles
pub struct SigningIdentity {
    label: String,
    key: SigningKey,
}

impl SigningIdentity {
    pub fn new(label: impl Into<String>, key: SigningKey) -> Self {
        Self {
            label: label.into(),
            key,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Hex-encoded public key, for display
    pub fn public_hex(&self) -> String {
        hex::encode(self.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.key.sign(message)
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("label", &self.label)
            .field("public_key", &self.public_hex())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Load the signing key at `path`, or generate and persist one.
pub fn load_or_create_signing_identity(
    path: &Path,
    label: &str,
) -> Result<SigningIdentity, CredentialError> {
    let invalid = |reason: String| CredentialError::InvalidSigningKey {
        path: path.to_path_buf(),
        reason,
    };

    if path.exists() {
        let bytes = read_file(path)?;
        let pem = String::from_utf8(bytes).map_err(|e| invalid(e.to_string()))?;
        let key = SigningKey::from_pkcs8_pem(&pem).map_err(|e| invalid(e.to_string()))?;
        let identity = SigningIdentity::new(label, key);
        tracing::info!(
            signer = %label,
            path = %path.display(),
            public_key = %identity.public_hex(),
            "Loaded signing key"
        );
        return Ok(identity);
    }

    let key = SigningKey::generate(&mut OsRng);
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| invalid(e.to_string()))?;
    write_private(path, pem.as_bytes())?;

    let identity = SigningIdentity::new(label, key);
    tracing::warn!(
        signer = %label,
        path = %path.display(),
        public_key = %identity.public_hex(),
        "No signing key found, generated and saved a new one"
    );
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::Verifier;

    use super::*;

    #[test]
    fn absent_key_creates_exactly_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("me_at_mail.i2p.pem");

        let identity = load_or_create_signing_identity(&path, "me@mail.i2p").unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
        assert_eq!(identity.label(), "me@mail.i2p");
    }

    #[test]
    fn existing_key_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signer.pem");

        let first = load_or_create_signing_identity(&path, "me@mail.i2p").unwrap();
        let before = std::fs::read(&path).unwrap();

        let second = load_or_create_signing_identity(&path, "me@mail.i2p").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(first.verifying_key(), second.verifying_key());
    }

    #[test]
    fn corrupt_key_is_fatal_and_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signer.pem");
        std::fs::write(&path, "not a key").unwrap();

        assert!(matches!(
            load_or_create_signing_identity(&path, "me@mail.i2p"),
            Err(CredentialError::InvalidSigningKey { .. })
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not a key");
    }

    #[test]
    fn signatures_verify() {
        let identity = SigningIdentity::new("me@mail.i2p", SigningKey::generate(&mut OsRng));
        let signature = identity.sign(b"bundle");
        assert!(identity.verifying_key().verify(b"bundle", &signature).is_ok());
    }
}
