use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use super::SymmetricKey;
use crate::error::CryptoError;

/// An X25519 key pair.
///
/// Used both for per-session ephemeral keys and for the server's long-term
/// identity key.
pub struct KeyPair {
    pub secret: StaticSecret,
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a key pair from raw private key bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }
}

/// X25519 with a contributory check: an all-zero shared secret means the
/// peer sent a low-order point.
pub fn agree(ours: &StaticSecret, theirs: &PublicKey) -> Result<[u8; 32], CryptoError> {
    let shared = ours.diffie_hellman(theirs);
    if !shared.was_contributory() {
        return Err(CryptoError::NonContributoryKey);
    }
    Ok(shared.to_bytes())
}

/// Derive send/recv keys from the ephemeral and static agreements via HKDF.
///
/// `ephemeral_dh` is DH(client_eph, server_eph), `static_dh` is
/// DH(client_eph, server_static). Returns `(send_key, recv_key)`; the
/// initiator's send key is the responder's recv key.
pub fn derive_session_keys(
    ephemeral_dh: &[u8; 32],
    static_dh: &[u8; 32],
    transcript_hash: &[u8; 32],
    is_initiator: bool,
) -> Result<(SymmetricKey, SymmetricKey), CryptoError> {
    let mut ikm = [0u8; 64];
    ikm[..32].copy_from_slice(ephemeral_dh);
    ikm[32..].copy_from_slice(static_dh);

    let hkdf = Hkdf::<Sha256>::new(Some(transcript_hash), &ikm);
    ikm.zeroize();

    let mut key_a = [0u8; 32];
    let mut key_b = [0u8; 32];

    hkdf.expand(b"sp-client-to-server", &mut key_a)
        .map_err(|_| CryptoError::HkdfExpandFailed)?;
    hkdf.expand(b"sp-server-to-client", &mut key_b)
        .map_err(|_| CryptoError::HkdfExpandFailed)?;

    let (a, b) = (SymmetricKey::from(key_a), SymmetricKey::from(key_b));
    key_a.zeroize();
    key_b.zeroize();

    if is_initiator {
        Ok((a, b))
    } else {
        Ok((b, a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_derivation_symmetry() {
        let client = KeyPair::generate();
        let server_eph = KeyPair::generate();
        let server_static = KeyPair::generate();
        let transcript = [0xCC; 32];

        let client_eph_dh = agree(&client.secret, &server_eph.public).unwrap();
        let client_static_dh = agree(&client.secret, &server_static.public).unwrap();
        let server_eph_dh = agree(&server_eph.secret, &client.public).unwrap();
        let server_static_dh = agree(&server_static.secret, &client.public).unwrap();

        let (client_send, client_recv) =
            derive_session_keys(&client_eph_dh, &client_static_dh, &transcript, true).unwrap();
        let (server_send, server_recv) =
            derive_session_keys(&server_eph_dh, &server_static_dh, &transcript, false).unwrap();

        assert_eq!(client_send, server_recv);
        assert_eq!(server_send, client_recv);
        assert_ne!(client_send, client_recv);
    }

    #[test]
    fn wrong_static_key_diverges() {
        let client = KeyPair::generate();
        let server_eph = KeyPair::generate();
        let real_static = KeyPair::generate();
        let impostor = KeyPair::generate();
        let transcript = [0x11; 32];

        let eph = agree(&client.secret, &server_eph.public).unwrap();
        let client_static = agree(&client.secret, &real_static.public).unwrap();
        let impostor_static = agree(&impostor.secret, &client.public).unwrap();

        let (client_send, _) =
            derive_session_keys(&eph, &client_static, &transcript, true).unwrap();
        let (_, impostor_recv) =
            derive_session_keys(&eph, &impostor_static, &transcript, false).unwrap();
        assert_ne!(client_send, impostor_recv);
    }

    #[test]
    fn identity_point_rejected() {
        let ours = KeyPair::generate();
        let zero = PublicKey::from([0u8; 32]);
        assert!(matches!(
            agree(&ours.secret, &zero),
            Err(CryptoError::NonContributoryKey)
        ));
    }

    #[test]
    fn from_secret_bytes_is_deterministic() {
        let a = KeyPair::from_secret_bytes([7u8; 32]);
        let b = KeyPair::from_secret_bytes([7u8; 32]);
        assert_eq!(a.public.as_bytes(), b.public.as_bytes());
    }
}
