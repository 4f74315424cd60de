//! Expected enclave identity and the match predicate applied to every
//! attested client.

use std::fmt;

use crate::attestation::types::ClaimedMeasurements;

/// The measurement that caused a policy check to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchField {
    Enclave,
    Signer,
    ProductId,
    SecurityVersion,
}

impl fmt::Display for MismatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MismatchField::Enclave => "enclave mismatch",
            MismatchField::Signer => "signer mismatch",
            MismatchField::ProductId => "product id mismatch",
            MismatchField::SecurityVersion => "security version mismatch",
        };
        f.write_str(s)
    }
}

/// Expected identity of clients allowed to receive the secret.
///
/// A zero field (all-zero hash or `0` integer) is a wildcard and never
/// causes a mismatch. Built once at startup and shared read-only.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct MeasurementPolicy {
    mr_enclave: [u8; 32],
    mr_signer: [u8; 32],
    isv_prod_id: u16,
    isv_svn: u16,
}

impl MeasurementPolicy {
    pub fn new(mr_enclave: [u8; 32], mr_signer: [u8; 32], isv_prod_id: u16, isv_svn: u16) -> Self {
        Self {
            mr_enclave,
            mr_signer,
            isv_prod_id,
            isv_svn,
        }
    }

    /// A policy in which every field is a wildcard.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn mr_enclave(&self) -> &[u8; 32] {
        &self.mr_enclave
    }

    pub fn mr_signer(&self) -> &[u8; 32] {
        &self.mr_signer
    }

    pub fn isv_prod_id(&self) -> u16 {
        self.isv_prod_id
    }

    pub fn isv_svn(&self) -> u16 {
        self.isv_svn
    }

    /// Number of fields that are pinned (not wildcards).
    pub fn pinned_fields(&self) -> usize {
        [
            !is_wildcard_hash(&self.mr_enclave),
            !is_wildcard_hash(&self.mr_signer),
            self.isv_prod_id != 0,
            self.isv_svn != 0,
        ]
        .iter()
        .filter(|pinned| **pinned)
        .count()
    }

    /// True iff every non-wildcard field equals the claimed value.
    pub fn matches(&self, claimed: &ClaimedMeasurements) -> bool {
        self.check(claimed).is_ok()
    }

    /// Like [`matches`](Self::matches), reporting the first mismatching
    /// field in the order enclave, signer, product id, security version.
    pub fn check(&self, claimed: &ClaimedMeasurements) -> Result<(), MismatchField> {
        if !is_wildcard_hash(&self.mr_enclave) && self.mr_enclave != claimed.mr_enclave {
            return Err(MismatchField::Enclave);
        }
        if !is_wildcard_hash(&self.mr_signer) && self.mr_signer != claimed.mr_signer {
            return Err(MismatchField::Signer);
        }
        if self.isv_prod_id != 0 && self.isv_prod_id != claimed.isv_prod_id {
            return Err(MismatchField::ProductId);
        }
        if self.isv_svn != 0 && self.isv_svn != claimed.isv_svn {
            return Err(MismatchField::SecurityVersion);
        }
        Ok(())
    }
}

impl fmt::Debug for MeasurementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn hash(h: &[u8; 32]) -> String {
            if is_wildcard_hash(h) {
                "*".to_string()
            } else {
                hex::encode(h)
            }
        }
        fn int(v: u16) -> String {
            if v == 0 {
                "*".to_string()
            } else {
                v.to_string()
            }
        }
        f.debug_struct("MeasurementPolicy")
            .field("mr_enclave", &hash(&self.mr_enclave))
            .field("mr_signer", &hash(&self.mr_signer))
            .field("isv_prod_id", &int(self.isv_prod_id))
            .field("isv_svn", &int(self.isv_svn))
            .finish()
    }
}

fn is_wildcard_hash(h: &[u8; 32]) -> bool {
    h.iter().all(|b| *b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: [u8; 32] = [0x5A; 32];

    fn claim(mr_enclave: [u8; 32], mr_signer: [u8; 32], prod: u16, svn: u16) -> ClaimedMeasurements {
        ClaimedMeasurements {
            mr_enclave,
            mr_signer,
            isv_prod_id: prod,
            isv_svn: svn,
        }
    }

    #[test]
    fn wildcard_policy_accepts_anything() {
        let policy = MeasurementPolicy::any();
        assert!(policy.matches(&claim([0xFF; 32], [0x01; 32], 9, 65535)));
        assert!(policy.matches(&ClaimedMeasurements::default()));
        assert_eq!(policy.pinned_fields(), 0);
    }

    #[test]
    fn signer_and_svn_pinned() {
        let policy = MeasurementPolicy::new([0; 32], S, 0, 2);
        assert_eq!(policy.pinned_fields(), 2);

        assert!(policy.matches(&claim([0x33; 32], S, 17, 2)));
        assert!(policy.matches(&claim([0x44; 32], S, 0, 2)));

        assert_eq!(
            policy.check(&claim([0x33; 32], [0x5B; 32], 17, 2)),
            Err(MismatchField::Signer)
        );
        assert_eq!(
            policy.check(&claim([0x33; 32], S, 17, 3)),
            Err(MismatchField::SecurityVersion)
        );
    }

    #[test]
    fn first_mismatch_is_reported() {
        let policy = MeasurementPolicy::new([1; 32], [2; 32], 3, 4);
        let all_wrong = claim([9; 32], [9; 32], 9, 9);
        assert_eq!(policy.check(&all_wrong), Err(MismatchField::Enclave));

        let enclave_ok = claim([1; 32], [9; 32], 9, 9);
        assert_eq!(policy.check(&enclave_ok), Err(MismatchField::Signer));

        let signer_ok = claim([1; 32], [2; 32], 9, 9);
        assert_eq!(policy.check(&signer_ok), Err(MismatchField::ProductId));

        assert!(policy.matches(&claim([1; 32], [2; 32], 3, 4)));
    }

    #[test]
    fn mismatch_labels() {
        assert_eq!(MismatchField::Signer.to_string(), "signer mismatch");
        assert_eq!(MismatchField::Enclave.to_string(), "enclave mismatch");
        assert_eq!(MismatchField::ProductId.to_string(), "product id mismatch");
        assert_eq!(
            MismatchField::SecurityVersion.to_string(),
            "security version mismatch"
        );
    }

    #[test]
    fn debug_marks_wildcards() {
        let policy = MeasurementPolicy::new([0; 32], S, 0, 2);
        let rendered = format!("{policy:?}");
        assert!(rendered.contains("mr_enclave: \"*\""));
        assert!(rendered.contains(&hex::encode(S)));
    }
}
