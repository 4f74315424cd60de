//! Attestation-gated secret provisioning.
//!
//! A [`ProvisioningServer`] holds a single wrapping key and releases it only
//! to clients that present a genuine quote whose measurements satisfy the
//! configured [`MeasurementPolicy`]. Rejected clients learn nothing beyond a
//! generic failure.

pub mod attestation;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod identity;
pub mod policy;
pub mod secret;
pub mod server;
pub mod session;
pub mod transport;
pub mod verifier;

// Re-export key types at crate root for convenience.
pub use error::{Error, Result};
pub use frame::{Flags, Frame, FrameType};

pub use attestation::types::{AttestationDocument, ClaimedMeasurements, VerifiedQuote};
pub use attestation::{QuoteProvider, QuoteVerifier};
pub use client::ProvisioningClient;
pub use config::ServerConfig;
pub use identity::ServerIdentity;
pub use policy::{MeasurementPolicy, MismatchField};
pub use secret::{SecretMaterial, SecretStore};
pub use server::ProvisioningServer;
pub use session::provisioning::{
    ProvisioningContext, ProvisioningSession, RejectReason, SessionOutcome, SessionState,
};
pub use session::retry::RetryPolicy;
pub use session::SessionConfig;
pub use verifier::{MeasurementVerifier, PolicyVerifier, VerifyResult};

#[cfg(feature = "mock")]
pub use attestation::mock::{MockProvider, MockVerifier};
