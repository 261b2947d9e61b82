//! Shared harness for engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use umbrella_common::{units::units, Amount, HolderId, ManualClock, PolicyId};
use umbrella_engine::{
    Collaborators, CoverEngine, Ed25519ClaimVerifier, EngineConfig, EventLog, InMemoryFunds,
    Role, RoleTable, StaticRiskBudget,
};

pub const START: u64 = 1_700_000_000;
pub const WEEK: u64 = 604_800;

/// min_required_balance(100 units) at the default rate and cycle
pub const RESERVE_100: Amount = 191_780_821_917_808_219;

pub struct TestHarness {
    pub engine: CoverEngine,
    pub funds: Arc<InMemoryFunds>,
    pub risk: Arc<StaticRiskBudget>,
    pub roles: Arc<RoleTable>,
    pub events: Arc<EventLog>,
    pub clock: Arc<ManualClock>,
    pub governor: HolderId,
    pub collector: HolderId,
    pub claim_signer: SigningKey,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let funds = Arc::new(InMemoryFunds::new());
        let risk = Arc::new(StaticRiskBudget::new(units(1_000_000)));
        let roles = Arc::new(RoleTable::new());
        let events = Arc::new(EventLog::new());
        let clock = Arc::new(ManualClock::new(START));

        let governor = HolderId([0xAA; 32]);
        let collector = HolderId([0xBB; 32]);
        roles.grant(governor, Role::Governor);
        roles.grant(collector, Role::PremiumCollector);

        let collaborators = Collaborators {
            risk_budget: risk.clone(),
            funds: funds.clone(),
            authority: roles.clone(),
            verifier: Arc::new(Ed25519ClaimVerifier),
            events: events.clone(),
            clock: clock.clone(),
        };
        let engine = CoverEngine::new(&config, collaborators).unwrap();

        let claim_signer = SigningKey::from_bytes(&[0xCC; 32]);
        engine
            .add_claim_signer(&governor, claim_signer.verifying_key().to_bytes())
            .unwrap();

        Self {
            engine,
            funds,
            risk,
            roles,
            events,
            clock,
            governor,
            collector,
            claim_signer,
        }
    }

    pub fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    pub fn holder(seed: u8) -> HolderId {
        HolderId::from(&Self::key(seed).verifying_key())
    }

    /// Mint wallet funds and activate in one go
    pub async fn activate(&self, holder: &HolderId, cover: Amount, deposit: Amount) -> PolicyId {
        self.funds.mint(holder, deposit);
        self.engine
            .activate(holder, cover, deposit, None)
            .await
            .unwrap()
    }
}
