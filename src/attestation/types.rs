use std::fmt;

/// Raw attestation document bytes (opaque to the transport layer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationDocument {
    pub raw: Vec<u8>,
}

impl AttestationDocument {
    pub fn new(raw: Vec<u8>) -> Self {
        Self { raw }
    }
}

/// Enclave identity as claimed by a verified quote.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ClaimedMeasurements {
    /// MRENCLAVE: hash of the code and initial data loaded into the enclave.
    pub mr_enclave: [u8; 32],
    /// MRSIGNER: hash of the enclave signer's public key.
    pub mr_signer: [u8; 32],
    /// ISV_PROD_ID.
    pub isv_prod_id: u16,
    /// ISV_SVN.
    pub isv_svn: u16,
}

impl fmt::Debug for ClaimedMeasurements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimedMeasurements")
            .field("mr_enclave", &hex::encode(self.mr_enclave))
            .field("mr_signer", &hex::encode(self.mr_signer))
            .field("isv_prod_id", &self.isv_prod_id)
            .field("isv_svn", &self.isv_svn)
            .finish()
    }
}

/// The result of a successful quote verification.
#[derive(Debug, Clone)]
pub struct VerifiedQuote {
    /// SHA-256 of the attestation document, bound into the handshake transcript.
    pub document_hash: [u8; 32],

    /// Public key carried in the quote's report data (if bound).
    pub public_key: Option<Vec<u8>>,

    /// Nonce carried in the quote's report data (if present).
    pub nonce: Option<Vec<u8>>,

    /// Measurements extracted from the quote body.
    pub measurements: ClaimedMeasurements,
}
