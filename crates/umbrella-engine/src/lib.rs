//! # Umbrella Engine
//!
//! Cover accounting and premium lifecycle for subscription cover products.
//!
//! ## Components
//!
//! - [`capacity`]: global and per-strategy active cover against risk budget ceilings
//! - [`premium`]: time-prorated premium math with floor division
//! - [`account`]: balances, reward points and cumulative premium per holder
//! - [`cooldown`]: withdrawal cooldown state machine
//! - [`policy`]: one non-transferable policy per holder
//! - [`CoverEngine`]: activation, updates, deactivation, withdrawals, billing
//!   batches and claims over the components above
//!
//! Collaborators (risk budget, funds ledger, authority, claim verifier,
//! event sink, clock) are injected through [`Collaborators`]; in-memory
//! versions live in [`memory`].
//!
//! ## Example
//!
//! ```ignore
//! let engine = CoverEngine::new(&EngineConfig::load(None)?, collaborators)?;
//! let policy_id = engine.activate(&holder, units(100), units(1000), None).await?;
//! ```

pub mod account;
pub mod billing;
pub mod capacity;
pub mod claims;
pub mod collaborators;
pub mod config;
pub mod cooldown;
pub mod engine;
mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod policy;
pub mod premium;

pub use account::{Account, ChargeOutcome};
pub use billing::{BillingReport, ChargeStatus};
pub use capacity::{CapacityLedger, CapacityReservation, Ceilings, CoverScope};
pub use claims::{validate_claim, ClaimRequest, ClaimSigners, ClaimTarget};
pub use collaborators::{
    Authority, ClaimVerifier, Collaborators, Ed25519ClaimVerifier, EventSink, FundsLedger,
    RiskBudget, Role,
};
pub use config::{EngineConfig, RewardPointsGating};
pub use cooldown::CooldownState;
pub use engine::{CoverEngine, EngineParams, ScopeReconciliation};
pub use memory::{EventLog, InMemoryFunds, RoleTable, StaticRiskBudget};
pub use metrics::EngineMetrics;
pub use policy::{HolderRecord, Policy};
pub use premium::{premium_for, PremiumCalculator, PremiumDelta, PremiumRate};
