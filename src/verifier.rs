use std::sync::Arc;

use parking_lot::Mutex;

use crate::attestation::types::ClaimedMeasurements;
use crate::error::PolicyMismatch;
use crate::policy::{MeasurementPolicy, MismatchField};

/// Verdict of a measurement check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyResult {
    Accept,
    Reject(MismatchField),
}

impl VerifyResult {
    pub fn is_accept(&self) -> bool {
        matches!(self, VerifyResult::Accept)
    }

    pub fn into_result(self) -> Result<(), PolicyMismatch> {
        match self {
            VerifyResult::Accept => Ok(()),
            VerifyResult::Reject(field) => Err(PolicyMismatch(field)),
        }
    }
}

/// Decides whether an attested client may receive the secret.
///
/// Invoked once per handshake, after the quote itself has been verified and
/// before the server sends its hello. Implementations must not keep
/// per-session state; one instance serves every session concurrently.
pub trait MeasurementVerifier: Send + Sync {
    fn verify(&self, claimed: &ClaimedMeasurements) -> VerifyResult;
}

/// Evaluate `claimed` against `policy`.
pub fn verify_against(claimed: &ClaimedMeasurements, policy: &MeasurementPolicy) -> VerifyResult {
    match policy.check(claimed) {
        Ok(()) => VerifyResult::Accept,
        Err(field) => VerifyResult::Reject(field),
    }
}

/// [`MeasurementVerifier`] backed by a fixed [`MeasurementPolicy`].
///
/// Each call logs the claimed measurements as one report. The report lock is
/// held only while the report is written so reports from concurrent
/// sessions never interleave.
#[derive(Debug, Clone)]
pub struct PolicyVerifier {
    policy: Arc<MeasurementPolicy>,
    report_lock: Arc<Mutex<()>>,
}

impl PolicyVerifier {
    pub fn new(policy: Arc<MeasurementPolicy>) -> Self {
        Self {
            policy,
            report_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn policy(&self) -> &MeasurementPolicy {
        &self.policy
    }

    fn report(&self, claimed: &ClaimedMeasurements) {
        let _guard = self.report_lock.lock();
        tracing::info!(
            mr_enclave = %hex::encode(claimed.mr_enclave),
            mr_signer = %hex::encode(claimed.mr_signer),
            isv_prod_id = claimed.isv_prod_id,
            isv_svn = claimed.isv_svn,
            "client measurements"
        );
    }
}

impl MeasurementVerifier for PolicyVerifier {
    fn verify(&self, claimed: &ClaimedMeasurements) -> VerifyResult {
        self.report(claimed);

        let verdict = verify_against(claimed, &self.policy);
        if let VerifyResult::Reject(field) = verdict {
            tracing::warn!(reason = %field, "measurement policy rejected client");
        }
        verdict
    }
}
