pub mod types;

#[cfg(feature = "mock")]
pub mod mock;

use async_trait::async_trait;

use crate::error::AttestError;
use types::{AttestationDocument, VerifiedQuote};

/// Produces attestation documents from inside the enclave (client side).
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Generate a quote whose report data binds `public_key` and `nonce`.
    async fn quote(
        &self,
        public_key: &[u8; 32],
        nonce: &[u8; 32],
    ) -> Result<AttestationDocument, AttestError>;
}

/// Checks a quote's signature chain and extracts the claimed measurements
/// (server side).
///
/// Implementations only establish that the document is genuine; whether the
/// measurements are acceptable is decided by a
/// [`MeasurementVerifier`](crate::verifier::MeasurementVerifier).
#[async_trait]
pub trait QuoteVerifier: Send + Sync {
    async fn verify_quote(&self, doc: &AttestationDocument) -> Result<VerifiedQuote, AttestError>;
}
