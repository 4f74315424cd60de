use std::fmt;
use std::path::Path;

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::ConfigError;

/// Size of the wrapping key handed to attested clients.
pub const WRAP_KEY_SIZE: usize = 16;

/// The wrapping key. Zeroized on drop; never printed. Deliberately not
/// `PartialEq`: compare `as_bytes()` where a test needs to.
#[derive(Clone)]
pub struct SecretMaterial(Vec<u8>);

impl SecretMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First 8 bytes of SHA-256 over the secret, hex encoded. Lets operators
    /// tell which secret a server holds without revealing it.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.0);
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretMaterial({} bytes, redacted)", self.0.len())
    }
}

impl Drop for SecretMaterial {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Holds the process-wide wrapping key. Read-only once constructed.
#[derive(Debug)]
pub struct SecretStore {
    secret: SecretMaterial,
}

impl SecretStore {
    /// Load the secret from `source` if given, otherwise generate a fresh one.
    pub fn initialize(source: Option<&Path>) -> Result<Self, ConfigError> {
        match source {
            Some(path) => Self::load(path),
            None => Ok(Self::generate()),
        }
    }

    /// Draw a fresh key from the OS random source.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; WRAP_KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self {
            secret: SecretMaterial::new(bytes),
        }
    }

    /// Wrap an externally provisioned key.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ConfigError> {
        if bytes.len() != WRAP_KEY_SIZE {
            let actual = bytes.len();
            drop(SecretMaterial::new(bytes));
            return Err(ConfigError::InvalidLength {
                field: "secret",
                expected: WRAP_KEY_SIZE,
                actual,
            });
        }
        Ok(Self {
            secret: SecretMaterial::new(bytes),
        })
    }

    /// Read a key file: exactly [`WRAP_KEY_SIZE`] raw bytes, or a hex string
    /// encoding that many bytes.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        if raw.len() == WRAP_KEY_SIZE {
            return Self::from_bytes(raw);
        }

        let decoded = std::str::from_utf8(&raw)
            .map_err(|_| ConfigError::InvalidValue {
                field: "secret",
                reason: "expected raw key bytes or a hex string".to_string(),
            })
            .and_then(|text| {
                hex::decode(text.trim())
                    .map_err(|source| ConfigError::InvalidHex { field: "secret", source })
            });
        raw.zeroize();

        Self::from_bytes(decoded?)
    }

    pub fn get(&self) -> &SecretMaterial {
        &self.secret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secret_has_wrap_key_size() {
        let store = SecretStore::initialize(None).unwrap();
        assert_eq!(store.get().len(), WRAP_KEY_SIZE);
    }

    #[test]
    fn generated_secrets_differ() {
        let a = SecretStore::generate();
        let b = SecretStore::generate();
        assert_ne!(a.get().as_bytes(), b.get().as_bytes());
    }

    #[test]
    fn debug_is_redacted() {
        let store = SecretStore::from_bytes(vec![0x41; WRAP_KEY_SIZE]).unwrap();
        let rendered = format!("{store:?}");
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains("41414141"));
        assert!(!rendered.contains("AAAA"));
    }

    #[test]
    fn load_hex_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.hex");
        std::fs::write(&path, "000102030405060708090a0b0c0d0e0f\n").unwrap();

        let store = SecretStore::initialize(Some(&path)).unwrap();
        assert_eq!(store.get().as_bytes(), &(0u8..16).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn load_raw_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.bin");
        std::fs::write(&path, [0xEE; WRAP_KEY_SIZE]).unwrap();

        let store = SecretStore::load(&path).unwrap();
        assert_eq!(store.get().as_bytes(), &[0xEE; WRAP_KEY_SIZE]);
    }

    #[test]
    fn load_rejects_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.hex");
        std::fs::write(&path, "0011").unwrap();

        let err = SecretStore::load(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidLength { expected: WRAP_KEY_SIZE, actual: 2, .. }
        ));
    }

    #[test]
    fn load_missing_file() {
        let err = SecretStore::load(Path::new("/nonexistent/secret.key")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let store = SecretStore::from_bytes(vec![7; WRAP_KEY_SIZE]).unwrap();
        let fp = store.get().fingerprint();
        assert_eq!(fp.len(), 16);
        assert_eq!(fp, store.get().fingerprint());
        assert!(!fp.contains(&hex::encode([7u8; WRAP_KEY_SIZE])));
    }
}
