//! Claim and referral signing
//!
//! Claims are authorized by an off-chain signer over a blake3 digest of
//! `(policy_id, claimant, amount_out, deadline)`. Referral codes are the
//! referrer's own signature over a digest of their identity.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::types::ids::{HolderId, PolicyId};
use crate::types::units::Amount;

const CLAIM_DOMAIN: &[u8] = b"umbrella.claim.v1";
const REFERRAL_DOMAIN: &[u8] = b"umbrella.referral.v1";

/// Serde helper for [u8; 64] arrays
pub mod signature_bytes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        bytes.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        let vec: Vec<u8> = Vec::deserialize(deserializer)?;
        if vec.len() != 64 {
            return Err(serde::de::Error::custom(format!(
                "expected 64 bytes, got {}",
                vec.len()
            )));
        }
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&vec);
        Ok(arr)
    }
}

/// Digest a claim signer authorizes
pub fn claim_message(
    policy_id: PolicyId,
    claimant: &HolderId,
    amount_out: Amount,
    deadline: u64,
) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(CLAIM_DOMAIN);
    hasher.update(&policy_id.0.to_le_bytes());
    hasher.update(claimant.as_bytes());
    hasher.update(&amount_out.to_le_bytes());
    hasher.update(&deadline.to_le_bytes());
    *hasher.finalize().as_bytes()
}

/// Digest a referrer signs to produce their referral code
pub fn referral_message(referrer: &HolderId) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(REFERRAL_DOMAIN);
    hasher.update(referrer.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Sign data using a signing key, returning signature bytes
pub fn sign_with_key(signing_key: &SigningKey, message: &[u8]) -> [u8; 64] {
    signing_key.sign(message).to_bytes()
}

/// Verify an Ed25519 signature against raw public key bytes
pub fn verify_signature(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    key.verify(message, &Signature::from_bytes(signature)).is_ok()
}

/// Referral code handed out by an existing policyholder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralCode {
    pub referrer: HolderId,
    #[serde(with = "signature_bytes")]
    pub signature: [u8; 64],
}

impl ReferralCode {
    /// Issue a code for the holder owning `signing_key`
    pub fn issue(signing_key: &SigningKey) -> Self {
        let referrer = HolderId::from(&signing_key.verifying_key());
        let signature = sign_with_key(signing_key, &referral_message(&referrer));
        Self {
            referrer,
            signature,
        }
    }

    /// Check the code was signed by the referrer it names
    pub fn is_valid(&self) -> bool {
        verify_signature(
            self.referrer.as_bytes(),
            &referral_message(&self.referrer),
            &self.signature,
        )
    }
}

/// Signed authorization for a claim payout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSignature {
    /// Public key of the authorizing signer
    pub signer: [u8; 32],
    #[serde(with = "signature_bytes")]
    pub signature: [u8; 64],
}

impl ClaimSignature {
    /// Sign a claim with an authorized signer key
    pub fn sign(
        signer: &SigningKey,
        policy_id: PolicyId,
        claimant: &HolderId,
        amount_out: Amount,
        deadline: u64,
    ) -> Self {
        let message = claim_message(policy_id, claimant, amount_out, deadline);
        Self {
            signer: signer.verifying_key().to_bytes(),
            signature: sign_with_key(signer, &message),
        }
    }
}
