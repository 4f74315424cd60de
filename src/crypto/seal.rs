//! Record protection for the post-handshake channel.
//!
//! Each record is ChaCha20-Poly1305 under a direction-specific key. The
//! nonce is the frame sequence number; the associated data binds the
//! protocol version, frame type, flags, session id and sequence, so a
//! record cannot be replayed into another session, reordered, or relabeled
//! (e.g. a `Data` record presented as a `Shutdown`).

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::Zeroize;

use super::SymmetricKey;
use crate::error::CryptoError;
use crate::frame::{Flags, FrameType, PROTOCOL_VERSION};

const AAD_LEN: usize = 3 + 32 + 4;

/// Cipher and session binding shared by both directions. The cipher
/// zeroizes its key on drop.
struct RecordKey {
    cipher: ChaCha20Poly1305,
    session_id: [u8; 32],
}

impl RecordKey {
    fn new(key: &SymmetricKey, session_id: [u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
            session_id,
        }
    }

    fn aad(&self, msg_type: FrameType, flags: Flags, sequence: u32) -> [u8; AAD_LEN] {
        let mut aad = [0u8; AAD_LEN];
        aad[0] = PROTOCOL_VERSION;
        aad[1] = msg_type as u8;
        aad[2] = flags.raw();
        aad[3..35].copy_from_slice(&self.session_id);
        aad[35..].copy_from_slice(&sequence.to_be_bytes());
        aad
    }

    fn nonce(sequence: u32) -> Nonce {
        let mut nonce = Nonce::default();
        nonce[8..].copy_from_slice(&sequence.to_be_bytes());
        nonce
    }
}

impl Drop for RecordKey {
    fn drop(&mut self) {
        self.session_id.zeroize();
    }
}

/// Outgoing direction. Numbers records from 0 upwards.
pub struct SealingContext {
    key: RecordKey,
    next: u32,
}

impl SealingContext {
    pub fn new(key: &SymmetricKey, session_id: [u8; 32]) -> Self {
        Self {
            key: RecordKey::new(key, session_id),
            next: 0,
        }
    }

    /// Encrypt one record. Returns the ciphertext (tag appended) and the
    /// sequence number to put in the frame header.
    pub fn seal(
        &mut self,
        plaintext: &[u8],
        msg_type: FrameType,
        flags: Flags,
    ) -> Result<(Vec<u8>, u32), CryptoError> {
        let seq = self.next;
        self.next = seq.checked_add(1).ok_or(CryptoError::NonceOverflow)?;

        let aad = self.key.aad(msg_type, flags, seq);
        let ciphertext = self
            .key
            .cipher
            .encrypt(&RecordKey::nonce(seq), Payload { msg: plaintext, aad: &aad })
            .map_err(|_| CryptoError::SealFailed)?;
        Ok((ciphertext, seq))
    }
}

/// Incoming direction. Only accepts strictly increasing sequence numbers.
pub struct OpeningContext {
    key: RecordKey,
    last: Option<u32>,
}

impl OpeningContext {
    pub fn new(key: &SymmetricKey, session_id: [u8; 32]) -> Self {
        Self {
            key: RecordKey::new(key, session_id),
            last: None,
        }
    }

    /// Decrypt one record using the header values it arrived with.
    pub fn open(
        &mut self,
        ciphertext: &[u8],
        sequence: u32,
        msg_type: FrameType,
        flags: Flags,
    ) -> Result<Vec<u8>, CryptoError> {
        if let Some(last) = self.last.filter(|&last| sequence <= last) {
            return Err(CryptoError::SequenceReplay {
                received: sequence.into(),
                expected: last.into(),
            });
        }

        let aad = self.key.aad(msg_type, flags, sequence);
        let plaintext = self
            .key
            .cipher
            .decrypt(&RecordKey::nonce(sequence), Payload { msg: ciphertext, aad: &aad })
            .map_err(|_| CryptoError::OpenFailed)?;

        self.last = Some(sequence);
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SID: [u8; 32] = [0xAA; 32];

    fn pair() -> (SealingContext, OpeningContext) {
        let key = SymmetricKey::from([0x42; 32]);
        (SealingContext::new(&key, SID), OpeningContext::new(&key, SID))
    }

    fn seal_secret(sealer: &mut SealingContext) -> (Vec<u8>, u32) {
        sealer
            .seal(b"wrapping key", FrameType::Data, Flags::encrypted())
            .unwrap()
    }

    #[test]
    fn opens_what_was_sealed() {
        let (mut sealer, mut opener) = pair();
        let (ct, seq) = seal_secret(&mut sealer);
        assert_eq!(ct.len(), b"wrapping key".len() + 16);

        let pt = opener.open(&ct, seq, FrameType::Data, Flags::encrypted()).unwrap();
        assert_eq!(pt, b"wrapping key");
    }

    #[test]
    fn empty_shutdown_record() {
        let (mut sealer, mut opener) = pair();
        let (ct, seq) = sealer.seal(&[], FrameType::Shutdown, Flags::encrypted()).unwrap();
        assert!(opener
            .open(&ct, seq, FrameType::Shutdown, Flags::encrypted())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn header_tampering_breaks_authentication() {
        let (mut sealer, _) = pair();
        let (ct, seq) = seal_secret(&mut sealer);

        let cases: [(&[u8], u32, FrameType, Flags); 5] = [
            (&ct, seq + 7, FrameType::Data, Flags::encrypted()),
            (&ct, seq, FrameType::Shutdown, Flags::encrypted()),
            (&ct, seq, FrameType::Data, Flags::from_raw(0x03)),
            (&ct[..ct.len() - 1], seq, FrameType::Data, Flags::encrypted()),
            (&[0u8; 28], seq, FrameType::Data, Flags::encrypted()),
        ];
        for (ct, seq, ty, flags) in cases {
            let (_, mut opener) = pair();
            assert!(matches!(
                opener.open(ct, seq, ty, flags),
                Err(CryptoError::OpenFailed)
            ));
        }
    }

    #[test]
    fn flipped_ciphertext_bit_fails() {
        let (mut sealer, mut opener) = pair();
        let (mut ct, seq) = seal_secret(&mut sealer);
        ct[3] ^= 0x01;
        assert!(matches!(
            opener.open(&ct, seq, FrameType::Data, Flags::encrypted()),
            Err(CryptoError::OpenFailed)
        ));
    }

    #[test]
    fn other_session_cannot_open() {
        let key = SymmetricKey::from([0x42; 32]);
        let mut sealer = SealingContext::new(&key, [0x01; 32]);
        let mut opener = OpeningContext::new(&key, [0x02; 32]);

        let (ct, seq) = seal_secret(&mut sealer);
        assert!(matches!(
            opener.open(&ct, seq, FrameType::Data, Flags::encrypted()),
            Err(CryptoError::OpenFailed)
        ));
    }

    #[test]
    fn replayed_record_is_refused() {
        let (mut sealer, mut opener) = pair();
        let first = seal_secret(&mut sealer);
        let second = seal_secret(&mut sealer);
        assert_eq!((first.1, second.1, sealer.next), (0, 1, 2));

        opener.open(&first.0, first.1, FrameType::Data, Flags::encrypted()).unwrap();
        opener.open(&second.0, second.1, FrameType::Data, Flags::encrypted()).unwrap();

        let err = opener
            .open(&first.0, first.1, FrameType::Data, Flags::encrypted())
            .unwrap_err();
        assert!(matches!(err, CryptoError::SequenceReplay { received: 0, expected: 1 }));
    }

    #[test]
    fn failed_open_does_not_advance_window() {
        let (mut sealer, mut opener) = pair();
        let (ct, seq) = seal_secret(&mut sealer);

        let mut forged = ct.clone();
        forged[0] ^= 0xFF;
        assert!(opener.open(&forged, seq, FrameType::Data, Flags::encrypted()).is_err());
        assert!(opener.open(&ct, seq, FrameType::Data, Flags::encrypted()).is_ok());
    }

    #[test]
    fn sealer_refuses_to_wrap_sequence() {
        let (mut sealer, _) = pair();
        sealer.next = u32::MAX;
        assert!(matches!(
            sealer.seal(b"x", FrameType::Data, Flags::encrypted()),
            Err(CryptoError::NonceOverflow)
        ));
    }
}
