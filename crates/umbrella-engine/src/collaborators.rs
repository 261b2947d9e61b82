//! External collaborators
//!
//! The engine never resolves collaborators by name; hosts inject typed
//! handles through [`Collaborators`]. Any collaborator error aborts the
//! whole operation that made the call.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use umbrella_common::{crypto, Amount, Clock, EventRecord, HolderId, Result};

use crate::capacity::CoverScope;

/// Source of max-cover ceilings and externally observed usage
#[async_trait]
pub trait RiskBudget: Send + Sync {
    /// Ceiling for a scope
    async fn max_cover(&self, scope: &CoverScope) -> Result<Amount>;

    /// Active cover as seen by the risk manager, for reconciliation
    async fn active_cover(&self, scope: &CoverScope) -> Result<Amount>;
}

/// Token movements between holders, engine custody and the premium pool
#[async_trait]
pub trait FundsLedger: Send + Sync {
    /// Pull funds from the holder into engine custody
    async fn transfer_in(&self, holder: &HolderId, amount: Amount) -> Result<()>;

    /// Return funds from custody to the holder
    async fn transfer_out(&self, holder: &HolderId, amount: Amount) -> Result<()>;

    /// Move collected premiums from custody to the premium pool
    async fn transfer_to_pool(&self, amount: Amount) -> Result<()>;

    /// Pay an approved claim to the holder
    async fn payout_claim(&self, holder: &HolderId, amount: Amount) -> Result<()>;
}

/// Signature check for claim authorizations
pub trait ClaimVerifier: Send + Sync {
    fn verify(&self, signer: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool;
}

/// Ed25519 verifier
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519ClaimVerifier;

impl ClaimVerifier for Ed25519ClaimVerifier {
    fn verify(&self, signer: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
        crypto::verify_signature(signer, message, signature)
    }
}

/// Privileged roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Parameter changes, reward grants, signer management
    Governor,
    /// Runs the per-epoch billing batch
    PremiumCollector,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Governor => write!(f, "governor"),
            Role::PremiumCollector => write!(f, "premium_collector"),
        }
    }
}

/// External authorization check
pub trait Authority: Send + Sync {
    fn has_role(&self, identity: &HolderId, role: Role) -> bool;
}

/// Receiver of committed events
pub trait EventSink: Send + Sync {
    fn emit(&self, record: EventRecord);
}

/// Handles injected into an engine
#[derive(Clone)]
pub struct Collaborators {
    pub risk_budget: Arc<dyn RiskBudget>,
    pub funds: Arc<dyn FundsLedger>,
    pub authority: Arc<dyn Authority>,
    pub verifier: Arc<dyn ClaimVerifier>,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
