//! Policy records
//!
//! One policy per holder. `cover_limit > 0` is the sole definition of
//! "active". `pre_deactivate_cover_limit` mirrors `cover_limit` except
//! between a deactivation and the withdrawal that finalizes it, so the epoch
//! in progress can still be billed.

use serde::{Deserialize, Serialize};
use umbrella_common::{Amount, HolderId, PolicyId};

use crate::account::Account;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub holder: HolderId,
    pub cover_limit: Amount,
    pub pre_deactivate_cover_limit: Amount,
    /// One-shot; never reset once set
    pub referral_code_used: bool,
    /// Set when a claim burned the policy
    pub burned: bool,
    pub created_at: u64,
}

impl Policy {
    pub fn new(id: PolicyId, holder: HolderId, created_at: u64) -> Self {
        Self {
            id,
            holder,
            cover_limit: 0,
            pre_deactivate_cover_limit: 0,
            referral_code_used: false,
            burned: false,
            created_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.cover_limit > 0
    }

    /// Set both cover fields, leaving the deactivation window
    pub fn set_cover(&mut self, cover_limit: Amount) {
        self.cover_limit = cover_limit;
        self.pre_deactivate_cover_limit = cover_limit;
    }
}

/// Everything the engine tracks for one holder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderRecord {
    pub account: Account,
    pub policy: Option<Policy>,
}

impl HolderRecord {
    /// Live (not burned) policy
    pub fn live_policy(&self) -> Option<&Policy> {
        self.policy.as_ref().filter(|p| !p.burned)
    }

    pub fn live_policy_mut(&mut self) -> Option<&mut Policy> {
        self.policy.as_mut().filter(|p| !p.burned)
    }

    pub fn active_cover(&self) -> Amount {
        self.live_policy().map(|p| p.cover_limit).unwrap_or(0)
    }

    pub fn pre_deactivate_cover(&self) -> Amount {
        self.live_policy()
            .map(|p| p.pre_deactivate_cover_limit)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_definition() {
        let mut policy = Policy::new(PolicyId(1), HolderId([1u8; 32]), 10);
        assert!(!policy.is_active());

        policy.set_cover(5);
        assert!(policy.is_active());
        assert_eq!(policy.pre_deactivate_cover_limit, 5);
    }

    #[test]
    fn test_burned_policy_is_not_live() {
        let mut record = HolderRecord::default();
        let mut policy = Policy::new(PolicyId(1), HolderId([1u8; 32]), 10);
        policy.set_cover(5);
        policy.burned = true;
        record.policy = Some(policy);

        assert!(record.live_policy().is_none());
        assert_eq!(record.active_cover(), 0);
    }
}
