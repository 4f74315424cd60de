use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::types::{AttestationDocument, ClaimedMeasurements, VerifiedQuote};
use super::{QuoteProvider, QuoteVerifier};
use crate::error::AttestError;

const MOCK_MARKER: &[u8] = b"MOCK_SGX_QUOTE_V1\0";

/// Fixed-size body: mr_enclave, mr_signer, isv_prod_id, isv_svn.
const BODY_LEN: usize = 32 + 32 + 2 + 2;

/// Mock quote provider. Produces an unsigned document carrying the
/// configured measurements plus the report data.
///
/// # Security Warning
///
/// Documents from this provider carry **no signature**. The matching
/// [`MockVerifier`] believes whatever measurements they claim. Use only for
/// development and testing.
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    measurements: ClaimedMeasurements,
}

impl MockProvider {
    pub fn new(measurements: ClaimedMeasurements) -> Self {
        Self { measurements }
    }
}

#[async_trait]
impl QuoteProvider for MockProvider {
    async fn quote(
        &self,
        public_key: &[u8; 32],
        nonce: &[u8; 32],
    ) -> Result<AttestationDocument, AttestError> {
        let mut raw = Vec::with_capacity(MOCK_MARKER.len() + BODY_LEN + 2 * (4 + 32));
        raw.extend_from_slice(MOCK_MARKER);
        raw.extend_from_slice(&self.measurements.mr_enclave);
        raw.extend_from_slice(&self.measurements.mr_signer);
        raw.extend_from_slice(&self.measurements.isv_prod_id.to_le_bytes());
        raw.extend_from_slice(&self.measurements.isv_svn.to_le_bytes());

        for field in [&nonce[..], &public_key[..]] {
            raw.extend_from_slice(&(field.len() as u32).to_le_bytes());
            raw.extend_from_slice(field);
        }

        Ok(AttestationDocument::new(raw))
    }
}

/// Mock quote verifier. Accepts any well-formed document produced by
/// [`MockProvider`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MockVerifier;

impl MockVerifier {
    pub fn new() -> Self {
        Self
    }
}

fn truncated() -> AttestError {
    AttestError::VerificationFailed("truncated mock quote".to_string())
}

fn take<'a>(raw: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8], AttestError> {
    let end = offset.checked_add(len).ok_or_else(truncated)?;
    let slice = raw.get(*offset..end).ok_or_else(truncated)?;
    *offset = end;
    Ok(slice)
}

#[async_trait]
impl QuoteVerifier for MockVerifier {
    async fn verify_quote(&self, doc: &AttestationDocument) -> Result<VerifiedQuote, AttestError> {
        let raw = &doc.raw;

        if !raw.starts_with(MOCK_MARKER) {
            return Err(AttestError::VerificationFailed(
                "not a mock quote".to_string(),
            ));
        }

        let mut offset = MOCK_MARKER.len();
        let body = take(raw, &mut offset, BODY_LEN)?;

        let mut measurements = ClaimedMeasurements::default();
        measurements.mr_enclave.copy_from_slice(&body[0..32]);
        measurements.mr_signer.copy_from_slice(&body[32..64]);
        measurements.isv_prod_id = u16::from_le_bytes([body[64], body[65]]);
        measurements.isv_svn = u16::from_le_bytes([body[66], body[67]]);

        let mut fields = Vec::with_capacity(2);
        for _ in 0..2 {
            let len_bytes = take(raw, &mut offset, 4)?;
            let len =
                u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
                    as usize;
            let value = take(raw, &mut offset, len)?;
            fields.push((!value.is_empty()).then(|| value.to_vec()));
        }

        if offset != raw.len() {
            return Err(AttestError::VerificationFailed(
                "trailing bytes after mock quote".to_string(),
            ));
        }

        let public_key = fields.pop().flatten();
        let nonce = fields.pop().flatten();

        Ok(VerifiedQuote {
            document_hash: Sha256::digest(raw).into(),
            public_key,
            nonce,
            measurements,
        })
    }
}
