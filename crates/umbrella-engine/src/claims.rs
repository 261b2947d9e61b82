//! Claim submission
//!
//! A claim is authorized off-chain by a registered signer over
//! `(policy_id, claimant, amount_out, deadline)`. An accepted claim burns the
//! policy, so a second claim against the same policy fails with
//! `InvalidPolicy`.

use std::collections::HashSet;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use umbrella_common::{
    crypto, Amount, AuthorizationError, ClaimSignature, CoverEvent, HolderId, PolicyId,
    PolicyStateError, Result,
};

use crate::collaborators::ClaimVerifier;
use crate::engine::CoverEngine;

/// Claim payout request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub policy_id: PolicyId,
    pub amount_out: Amount,
    /// Last unix second the authorization is valid
    pub deadline: u64,
    pub signature: ClaimSignature,
}

/// Registered claim signers
#[derive(Debug, Default)]
pub struct ClaimSigners {
    signers: RwLock<HashSet<[u8; 32]>>,
}

impl ClaimSigners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, signer: [u8; 32]) {
        self.signers.write().insert(signer);
    }

    pub fn remove(&self, signer: &[u8; 32]) {
        self.signers.write().remove(signer);
    }

    pub fn contains(&self, signer: &[u8; 32]) -> bool {
        self.signers.read().contains(signer)
    }

    pub fn snapshot(&self) -> HashSet<[u8; 32]> {
        self.signers.read().clone()
    }
}

/// Policy facts a claim is checked against
#[derive(Debug, Clone, Copy)]
pub struct ClaimTarget<'a> {
    pub holder: &'a HolderId,
    pub cover_limit: Amount,
    /// Fixed-term policies only
    pub expires_at: Option<u64>,
}

/// Check a claim without touching any state
///
/// Checks run in order: policy live, deadline, claimant, expiry, amount,
/// signer registration, signature.
pub fn validate_claim(
    request: &ClaimRequest,
    claimant: &HolderId,
    target: ClaimTarget<'_>,
    now: u64,
    signers: &ClaimSigners,
    verifier: &dyn ClaimVerifier,
) -> Result<()> {
    if target.cover_limit == 0 {
        return Err(PolicyStateError::InvalidPolicy.into());
    }
    if now > request.deadline {
        return Err(PolicyStateError::ClaimDeadlinePassed.into());
    }
    if claimant != target.holder {
        return Err(AuthorizationError::NotPolicyHolder.into());
    }
    if target.expires_at.is_some_and(|expires_at| expires_at <= now) {
        return Err(PolicyStateError::PolicyExpired.into());
    }
    if request.amount_out > target.cover_limit {
        return Err(PolicyStateError::ClaimExceedsCover.into());
    }
    if !signers.contains(&request.signature.signer) {
        return Err(AuthorizationError::UnauthorizedSigner.into());
    }
    let message = crypto::claim_message(
        request.policy_id,
        claimant,
        request.amount_out,
        request.deadline,
    );
    if !verifier.verify(
        &request.signature.signer,
        &message,
        &request.signature.signature,
    ) {
        return Err(AuthorizationError::InvalidSignature.into());
    }
    Ok(())
}

impl CoverEngine {
    /// Submit a signed claim; on success the policy is burned and the
    /// payout handed to the funds ledger
    #[instrument(skip(self, claimant, request), fields(claimant = %claimant.short(), policy_id = %request.policy_id))]
    pub async fn submit_claim(&self, claimant: &HolderId, request: &ClaimRequest) -> Result<()> {
        let _gate = self.gate.read().await;
        let holder = self
            .holder_of(request.policy_id)
            .ok_or(PolicyStateError::InvalidPolicy)?;
        let handle = self
            .existing(&holder)
            .ok_or(PolicyStateError::InvalidPolicy)?;
        let mut guard = handle.lock_owned().await;
        let mut record = guard.clone();
        let params = self.params();

        let policy = record
            .live_policy()
            .filter(|p| p.id == request.policy_id)
            .ok_or(PolicyStateError::InvalidPolicy)?;
        let target = ClaimTarget {
            holder: &policy.holder,
            cover_limit: policy.cover_limit,
            expires_at: None,
        };
        if let Err(err) = validate_claim(
            request,
            claimant,
            target,
            self.now(),
            &self.claim_signers,
            self.collaborators.verifier.as_ref(),
        ) {
            debug!(error = %err, "Claim rejected");
            return Err(err);
        }

        let reservation = self
            .capacity
            .reserve(&params.strategy, policy.cover_limit, 0, None)?;
        if let Some(policy) = record.live_policy_mut() {
            policy.cover_limit = 0;
            policy.pre_deactivate_cover_limit = 0;
            policy.burned = true;
        }

        self.collaborators
            .funds
            .payout_claim(&holder, request.amount_out)
            .await?;

        // Commit
        *guard = record;
        reservation.commit();
        self.policy_index.remove(&request.policy_id);
        self.metrics.claims_submitted.inc();
        self.refresh_cover_gauge(&params.strategy);

        self.publish(vec![CoverEvent::ClaimSubmitted {
            policy_id: request.policy_id,
            holder,
            amount: request.amount_out,
        }]);

        info!(amount = request.amount_out, "Claim paid");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Ed25519ClaimVerifier;
    use ed25519_dalek::SigningKey;
    use umbrella_common::UmbrellaError;

    struct Fixture {
        signer: SigningKey,
        signers: ClaimSigners,
        holder: HolderId,
    }

    fn fixture() -> Fixture {
        let signer = SigningKey::from_bytes(&[9u8; 32]);
        let signers = ClaimSigners::new();
        signers.add(signer.verifying_key().to_bytes());
        Fixture {
            signer,
            signers,
            holder: HolderId::from(&SigningKey::from_bytes(&[1u8; 32]).verifying_key()),
        }
    }

    fn request(f: &Fixture, amount_out: Amount, deadline: u64) -> ClaimRequest {
        ClaimRequest {
            policy_id: PolicyId(1),
            amount_out,
            deadline,
            signature: ClaimSignature::sign(&f.signer, PolicyId(1), &f.holder, amount_out, deadline),
        }
    }

    fn check(f: &Fixture, req: &ClaimRequest, claimant: &HolderId, now: u64) -> Result<()> {
        let target = ClaimTarget {
            holder: &f.holder,
            cover_limit: 100,
            expires_at: Some(1_000),
        };
        validate_claim(req, claimant, target, now, &f.signers, &Ed25519ClaimVerifier)
    }

    #[test]
    fn test_valid_claim() {
        let f = fixture();
        let req = request(&f, 100, 500);
        check(&f, &req, &f.holder, 500).unwrap();
    }

    #[test]
    fn test_deadline_passed() {
        let f = fixture();
        let req = request(&f, 10, 500);
        assert_eq!(
            check(&f, &req, &f.holder, 501),
            Err(UmbrellaError::State(PolicyStateError::ClaimDeadlinePassed))
        );
    }

    #[test]
    fn test_wrong_claimant() {
        let f = fixture();
        let req = request(&f, 10, 500);
        let other = HolderId([3u8; 32]);
        assert_eq!(
            check(&f, &req, &other, 100),
            Err(UmbrellaError::Authorization(AuthorizationError::NotPolicyHolder))
        );
    }

    #[test]
    fn test_amount_over_cover() {
        let f = fixture();
        let req = request(&f, 101, 500);
        assert_eq!(
            check(&f, &req, &f.holder, 100),
            Err(UmbrellaError::State(PolicyStateError::ClaimExceedsCover))
        );
    }

    #[test]
    fn test_expired_policy() {
        let f = fixture();
        let req = request(&f, 10, 5_000);
        assert_eq!(
            check(&f, &req, &f.holder, 1_000),
            Err(UmbrellaError::State(PolicyStateError::PolicyExpired))
        );
    }

    #[test]
    fn test_unregistered_signer() {
        let f = fixture();
        let rogue = SigningKey::from_bytes(&[4u8; 32]);
        let req = ClaimRequest {
            signature: ClaimSignature::sign(&rogue, PolicyId(1), &f.holder, 10, 500),
            ..request(&f, 10, 500)
        };
        assert_eq!(
            check(&f, &req, &f.holder, 100),
            Err(UmbrellaError::Authorization(AuthorizationError::UnauthorizedSigner))
        );
    }

    #[test]
    fn test_tampered_amount() {
        let f = fixture();
        let mut req = request(&f, 10, 500);
        req.amount_out = 20;
        assert_eq!(
            check(&f, &req, &f.holder, 100),
            Err(UmbrellaError::Authorization(AuthorizationError::InvalidSignature))
        );
    }
}
