//! Server identity: a long-term X25519 key pair.
//!
//! The "certificate" file holds the hex-encoded public key clients pin; the
//! key file holds the hex-encoded private key. Both are mixed into every
//! session's key derivation, so a server without the private key cannot
//! complete a handshake.

use std::path::Path;

use zeroize::Zeroize;

use crate::crypto::kex::{self, KeyPair};
use crate::crypto::PublicKey;
use crate::error::{ConfigError, CryptoError};

pub struct ServerIdentity {
    keypair: KeyPair,
}

impl ServerIdentity {
    pub fn generate() -> Self {
        Self {
            keypair: KeyPair::generate(),
        }
    }

    /// Load the identity from its certificate and private key files.
    ///
    /// Fails if either file is missing or malformed, or if the certificate
    /// does not belong to the private key.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, ConfigError> {
        let mut secret = read_hex_key(key_path, "key_path")?;
        let keypair = KeyPair::from_secret_bytes(secret);
        secret.zeroize();

        let cert = read_hex_key(cert_path, "cert_path")?;
        if keypair.public.as_bytes() != &cert {
            return Err(ConfigError::IdentityMismatch);
        }

        Ok(Self { keypair })
    }

    /// Write the identity as a certificate/key file pair.
    pub fn write(&self, cert_path: &Path, key_path: &Path) -> Result<(), ConfigError> {
        let write = |path: &Path, contents: String| {
            let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
            parent
                .map_or(Ok(()), std::fs::create_dir_all)
                .and_then(|()| std::fs::write(path, contents))
                .map_err(|source| ConfigError::Write {
                    path: path.to_path_buf(),
                    source,
                })
        };
        let mut secret_hex = hex::encode(self.keypair.secret.to_bytes());
        let result = write(key_path, format!("{secret_hex}\n"));
        secret_hex.zeroize();
        result?;
        write(cert_path, format!("{}\n", hex::encode(self.public_key())))
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public.to_bytes()
    }

    /// DH between the identity key and a client's ephemeral key.
    pub(crate) fn agree(&self, client: &x25519_dalek::PublicKey) -> Result<[u8; 32], CryptoError> {
        kex::agree(&self.keypair.secret, client)
    }
}

impl std::fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

fn read_hex_key(path: &Path, field: &'static str) -> Result<[u8; 32], ConfigError> {
    let mut text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let decoded = hex::decode(text.trim());
    text.zeroize();
    let mut bytes = decoded.map_err(|source| ConfigError::InvalidHex { field, source })?;

    if bytes.len() != 32 {
        return Err(ConfigError::InvalidLength {
            field,
            expected: 32,
            actual: bytes.len(),
        });
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    bytes.zeroize();
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("server.pub");
        let key = dir.path().join("server.key");

        let identity = ServerIdentity::generate();
        identity.write(&cert, &key).unwrap();

        let loaded = ServerIdentity::load(&cert, &key).unwrap();
        assert_eq!(loaded.public_key(), identity.public_key());
    }

    #[test]
    fn mismatched_pair_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (cert_a, key_a) = (dir.path().join("a.pub"), dir.path().join("a.key"));
        let (cert_b, key_b) = (dir.path().join("b.pub"), dir.path().join("b.key"));
        ServerIdentity::generate().write(&cert_a, &key_a).unwrap();
        ServerIdentity::generate().write(&cert_b, &key_b).unwrap();

        let err = ServerIdentity::load(&cert_b, &key_a).unwrap_err();
        assert!(matches!(err, ConfigError::IdentityMismatch));
    }

    #[test]
    fn missing_files_are_config_errors() {
        let err = ServerIdentity::load(
            Path::new("/nonexistent/server.pub"),
            Path::new("/nonexistent/server.key"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn short_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("server.pub");
        let key = dir.path().join("server.key");
        std::fs::write(&key, "abcd").unwrap();
        std::fs::write(&cert, "abcd").unwrap();

        let err = ServerIdentity::load(&cert, &key).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidLength { field: "key_path", expected: 32, actual: 2 }
        ));
    }
}
