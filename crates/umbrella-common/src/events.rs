//! Cover events
//!
//! Every committed state transition produces one or more [`CoverEvent`]s.
//! Events of an aborted operation are never delivered.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ids::{HolderId, PolicyId};
use crate::types::units::Amount;

/// Observable state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoverEvent {
    PolicyCreated {
        policy_id: PolicyId,
        holder: HolderId,
        cover_limit: Amount,
    },
    PolicyUpdated {
        policy_id: PolicyId,
        holder: HolderId,
        cover_limit: Amount,
    },
    PolicyDeactivated {
        policy_id: PolicyId,
        holder: HolderId,
    },
    PolicyCanceled {
        policy_id: PolicyId,
        holder: HolderId,
        refund: Amount,
    },
    PolicyExtended {
        policy_id: PolicyId,
        holder: HolderId,
        expires_at: u64,
    },
    PolicyExpired {
        policy_id: PolicyId,
        holder: HolderId,
    },
    DepositMade {
        holder: HolderId,
        amount: Amount,
    },
    WithdrawMade {
        holder: HolderId,
        amount: Amount,
    },
    PremiumCharged {
        holder: HolderId,
        amount: Amount,
    },
    PremiumPartiallyCharged {
        holder: HolderId,
        due: Amount,
        charged: Amount,
    },
    PremiumsCollected {
        holders: usize,
        total: Amount,
    },
    ClaimSubmitted {
        policy_id: PolicyId,
        holder: HolderId,
        amount: Amount,
    },
    CooldownStarted {
        holder: HolderId,
        started_at: u64,
    },
    CooldownStopped {
        holder: HolderId,
    },
    ReferralRewardEarned {
        holder: HolderId,
        reward: Amount,
    },
    RewardPointsSet {
        holder: HolderId,
        points: Amount,
    },
    PausedSet {
        paused: bool,
    },
}

impl CoverEvent {
    /// Stable event name
    pub fn name(&self) -> &'static str {
        match self {
            CoverEvent::PolicyCreated { .. } => "PolicyCreated",
            CoverEvent::PolicyUpdated { .. } => "PolicyUpdated",
            CoverEvent::PolicyDeactivated { .. } => "PolicyDeactivated",
            CoverEvent::PolicyCanceled { .. } => "PolicyCanceled",
            CoverEvent::PolicyExtended { .. } => "PolicyExtended",
            CoverEvent::PolicyExpired { .. } => "PolicyExpired",
            CoverEvent::DepositMade { .. } => "DepositMade",
            CoverEvent::WithdrawMade { .. } => "WithdrawMade",
            CoverEvent::PremiumCharged { .. } => "PremiumCharged",
            CoverEvent::PremiumPartiallyCharged { .. } => "PremiumPartiallyCharged",
            CoverEvent::PremiumsCollected { .. } => "PremiumsCollected",
            CoverEvent::ClaimSubmitted { .. } => "ClaimSubmitted",
            CoverEvent::CooldownStarted { .. } => "CooldownStarted",
            CoverEvent::CooldownStopped { .. } => "CooldownStopped",
            CoverEvent::ReferralRewardEarned { .. } => "ReferralRewardEarned",
            CoverEvent::RewardPointsSet { .. } => "RewardPointsSet",
            CoverEvent::PausedSet { .. } => "PausedSet",
        }
    }
}

/// Delivered event with identity and timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique, time-ordered event ID
    pub id: Uuid,
    /// Unix seconds at commit
    pub emitted_at: u64,
    pub event: CoverEvent,
}

impl EventRecord {
    pub fn new(event: CoverEvent, emitted_at: u64) -> Self {
        Self {
            id: Uuid::now_v7(),
            emitted_at,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = CoverEvent::PremiumPartiallyCharged {
            holder: HolderId([1u8; 32]),
            due: 5,
            charged: 3,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"premium_partially_charged\""));

        let back: CoverEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.name(), "PremiumPartiallyCharged");
    }
}
