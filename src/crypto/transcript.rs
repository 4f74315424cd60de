use sha2::{Digest, Sha256};

use super::PublicKey;
use crate::frame::PROTOCOL_VERSION;

/// Compute the transcript hash binding the session to the client's
/// attestation and to both sides' key material.
///
/// `transcript = SHA256(doc_hash || client_eph || server_eph || server_static || nonce || version)`
pub fn compute_transcript(
    attestation_hash: &[u8; 32],
    client_ephemeral: &PublicKey,
    server_ephemeral: &PublicKey,
    server_static: &PublicKey,
    nonce: &[u8; 32],
) -> [u8; 32] {
    let mut hasher = Sha256::new();

    hasher.update(b"sp-transcript");
    hasher.update(attestation_hash);
    hasher.update(client_ephemeral);
    hasher.update(server_ephemeral);
    hasher.update(server_static);
    hasher.update(nonce);
    hasher.update([PROTOCOL_VERSION]);

    hasher.finalize().into()
}
