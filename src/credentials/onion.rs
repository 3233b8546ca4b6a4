//! Tor v3 onion service identity.
//!
//! The key file holds the raw 32-byte Ed25519 seed. The service ID is
//! `base32(pubkey || checksum[..2] || version)` as Tor defines it, so the
//! address is stable for as long as the file is.

use std::fmt;
use std::path::Path;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use sha3::Sha3_256;

use super::{read_file, write_private, CredentialError};

const ONION_VERSION: u8 = 0x03;
const ONION_CHECKSUM_PREFIX: &[u8] = b".onion checksum";
const SEED_LEN: usize = 32;

/// An onion service key and the service ID derived from it
#[derive(Clone)]
pub struct OnionIdentity {
    seed: [u8; SEED_LEN],
    service_id: String,
}

impl OnionIdentity {
    pub fn from_seed(seed: [u8; SEED_LEN]) -> Self {
        let public = SigningKey::from_bytes(&seed).verifying_key().to_bytes();
        Self {
            seed,
            service_id: onion_service_id(&public),
        }
    }

    pub fn generate() -> Self {
        let mut seed = [0u8; SEED_LEN];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Service ID without the `.onion` suffix
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn hostname(&self) -> String {
        format!("{}.onion", self.service_id)
    }

    pub fn seed(&self) -> &[u8; SEED_LEN] {
        &self.seed
    }

    /// Key argument for the Tor control port `ADD_ONION` command.
    ///
    /// Tor expects the 64-byte expanded secret key, not the seed.
    pub fn tor_key_blob(&self) -> String {
        let mut expanded = [0u8; 64];
        expanded.copy_from_slice(&Sha512::digest(self.seed));
        expanded[0] &= 248;
        expanded[31] &= 127;
        expanded[31] |= 64;
        format!("ED25519-V3:{}", data_encoding::BASE64.encode(&expanded))
    }
}

impl fmt::Debug for OnionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnionIdentity")
            .field("service_id", &self.service_id)
            .field("seed", &"<redacted>")
            .finish()
    }
}

/// Derive the v3 service ID (56 lowercase base32 characters) from a public key.
pub fn onion_service_id(public_key: &[u8; 32]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(ONION_CHECKSUM_PREFIX);
    hasher.update(public_key);
    hasher.update([ONION_VERSION]);
    let checksum = hasher.finalize();

    let mut address = Vec::with_capacity(35);
    address.extend_from_slice(public_key);
    address.extend_from_slice(&checksum[..2]);
    address.push(ONION_VERSION);

    data_encoding::BASE32_NOPAD.encode(&address).to_lowercase()
}

/// Load the onion key at `path`, or generate one; either way persist it.
pub fn load_or_create_onion_identity(path: &Path) -> Result<OnionIdentity, CredentialError> {
    let identity = if path.exists() {
        let bytes = read_file(path)?;
        let seed: [u8; SEED_LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| CredentialError::InvalidOnionKey {
                    path: path.to_path_buf(),
                    len: bytes.len(),
                })?;
        let identity = OnionIdentity::from_seed(seed);
        tracing::info!(
            path = %path.display(),
            address = %identity.hostname(),
            "Loaded onion key"
        );
        identity
    } else {
        let identity = OnionIdentity::generate();
        tracing::warn!(
            path = %path.display(),
            address = %identity.hostname(),
            "No onion key found, generated a new one"
        );
        identity
    };

    write_private(path, identity.seed())?;
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_id_shape() {
        let identity = OnionIdentity::generate();
        let id = identity.service_id();

        assert_eq!(id.len(), 56);
        assert!(id.chars().all(|c| matches!(c, 'a'..='z' | '2'..='7')));
        // The trailing version byte 0x03 always encodes as 'd'
        assert!(id.ends_with('d'));
        assert_eq!(identity.hostname(), format!("{}.onion", id));
    }

    #[test]
    fn service_id_is_pure_function_of_seed() {
        let a = OnionIdentity::from_seed([7u8; 32]);
        let b = OnionIdentity::from_seed([7u8; 32]);
        let c = OnionIdentity::from_seed([8u8; 32]);
        assert_eq!(a.service_id(), b.service_id());
        assert_ne!(a.service_id(), c.service_id());
    }

    #[test]
    fn tor_key_blob_is_clamped_expanded_key() {
        let identity = OnionIdentity::from_seed([1u8; 32]);
        let blob = identity.tor_key_blob();
        let encoded = blob.strip_prefix("ED25519-V3:").unwrap();
        let expanded = data_encoding::BASE64.decode(encoded.as_bytes()).unwrap();

        assert_eq!(expanded.len(), 64);
        assert_eq!(expanded[0] & 7, 0);
        assert_eq!(expanded[31] & 0xc0, 0x40);
    }

    #[test]
    fn debug_redacts_seed() {
        let identity = OnionIdentity::from_seed([9u8; 32]);
        let debug = format!("{:?}", identity);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("[9, 9"));
    }

    #[test]
    fn creates_then_reuses_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("onion.key");

        let first = load_or_create_onion_identity(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first.seed());

        let second = load_or_create_onion_identity(&path).unwrap();
        assert_eq!(first.service_id(), second.service_id());
        assert_eq!(std::fs::read(&path).unwrap(), first.seed());
    }

    #[test]
    fn existing_key_is_used_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("onion.key");
        std::fs::write(&path, [42u8; 32]).unwrap();

        let identity = load_or_create_onion_identity(&path).unwrap();
        assert_eq!(identity.seed(), &[42u8; 32]);
        assert_eq!(
            identity.service_id(),
            OnionIdentity::from_seed([42u8; 32]).service_id()
        );
    }

    #[test]
    fn truncated_key_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("onion.key");
        std::fs::write(&path, [1u8; 20]).unwrap();

        assert!(matches!(
            load_or_create_onion_identity(&path),
            Err(CredentialError::InvalidOnionKey { len: 20, .. })
        ));
        // The corrupt file is left alone for the operator to inspect
        assert_eq!(std::fs::read(&path).unwrap(), [1u8; 20]);
    }
}
