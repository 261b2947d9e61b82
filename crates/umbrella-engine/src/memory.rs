//! In-memory collaborators
//!
//! Back tests and simulations. `InMemoryFunds` keeps external wallets,
//! engine custody and the premium pool as plain counters and can be told to
//! fail its next call to exercise rollback paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use umbrella_common::{Amount, CoverEvent, EventRecord, HolderId, Result, UmbrellaError};

use crate::capacity::CoverScope;
use crate::collaborators::{Authority, EventSink, FundsLedger, RiskBudget, Role};

/// Wallets, custody and pool balances
#[derive(Debug, Default)]
pub struct InMemoryFunds {
    wallets: DashMap<HolderId, Amount>,
    custody: Mutex<Amount>,
    pool: Mutex<Amount>,
    claims_paid: DashMap<HolderId, Amount>,
    fail_next: AtomicBool,
}

impl InMemoryFunds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give a holder external funds to deposit from
    pub fn mint(&self, holder: &HolderId, amount: Amount) {
        *self.wallets.entry(*holder).or_insert(0) += amount;
    }

    pub fn wallet(&self, holder: &HolderId) -> Amount {
        self.wallets.get(holder).map(|w| *w).unwrap_or(0)
    }

    pub fn custody(&self) -> Amount {
        *self.custody.lock()
    }

    pub fn pool(&self) -> Amount {
        *self.pool.lock()
    }

    pub fn claims_paid(&self, holder: &HolderId) -> Amount {
        self.claims_paid.get(holder).map(|c| *c).unwrap_or(0)
    }

    /// Make the next call fail
    pub fn fail_next_call(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn check_failure(&self, call: &str) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(UmbrellaError::Collaborator(format!("{} failed", call)));
        }
        Ok(())
    }
}

#[async_trait]
impl FundsLedger for InMemoryFunds {
    async fn transfer_in(&self, holder: &HolderId, amount: Amount) -> Result<()> {
        self.check_failure("transfer_in")?;
        // Never hold a wallet entry and the custody lock together
        {
            let mut wallet = self.wallets.entry(*holder).or_insert(0);
            if *wallet < amount {
                return Err(UmbrellaError::Collaborator(format!(
                    "wallet {} holds {}, cannot transfer {}",
                    holder.short(),
                    *wallet,
                    amount
                )));
            }
            *wallet -= amount;
        }
        *self.custody.lock() += amount;
        Ok(())
    }

    async fn transfer_out(&self, holder: &HolderId, amount: Amount) -> Result<()> {
        self.check_failure("transfer_out")?;
        {
            let mut custody = self.custody.lock();
            if *custody < amount {
                return Err(UmbrellaError::Collaborator("custody underfunded".into()));
            }
            *custody -= amount;
        }
        *self.wallets.entry(*holder).or_insert(0) += amount;
        Ok(())
    }

    async fn transfer_to_pool(&self, amount: Amount) -> Result<()> {
        self.check_failure("transfer_to_pool")?;
        let mut custody = self.custody.lock();
        if *custody < amount {
            return Err(UmbrellaError::Collaborator("custody underfunded".into()));
        }
        *custody -= amount;
        *self.pool.lock() += amount;
        Ok(())
    }

    async fn payout_claim(&self, holder: &HolderId, amount: Amount) -> Result<()> {
        self.check_failure("payout_claim")?;
        *self.claims_paid.entry(*holder).or_insert(0) += amount;
        *self.wallets.entry(*holder).or_insert(0) += amount;
        Ok(())
    }
}

/// Fixed ceilings per scope
#[derive(Debug)]
pub struct StaticRiskBudget {
    max: RwLock<HashMap<CoverScope, Amount>>,
    reported_active: RwLock<HashMap<CoverScope, Amount>>,
    default_max: Amount,
    unavailable: AtomicBool,
}

impl StaticRiskBudget {
    /// Every scope gets `default_max` unless overridden
    pub fn new(default_max: Amount) -> Self {
        Self {
            max: RwLock::new(HashMap::new()),
            reported_active: RwLock::new(HashMap::new()),
            default_max,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_max_cover(&self, scope: CoverScope, max: Amount) {
        self.max.write().insert(scope, max);
    }

    pub fn set_active_cover(&self, scope: CoverScope, active: Amount) {
        self.reported_active.write().insert(scope, active);
    }

    /// Simulate the risk manager being unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(UmbrellaError::Collaborator("risk budget unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RiskBudget for StaticRiskBudget {
    async fn max_cover(&self, scope: &CoverScope) -> Result<Amount> {
        self.check_available()?;
        Ok(self.max.read().get(scope).copied().unwrap_or(self.default_max))
    }

    async fn active_cover(&self, scope: &CoverScope) -> Result<Amount> {
        self.check_available()?;
        Ok(self.reported_active.read().get(scope).copied().unwrap_or(0))
    }
}

/// Role assignments
#[derive(Debug, Default)]
pub struct RoleTable {
    grants: RwLock<HashSet<(HolderId, Role)>>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, identity: HolderId, role: Role) {
        self.grants.write().insert((identity, role));
    }

    pub fn revoke(&self, identity: &HolderId, role: Role) {
        self.grants.write().remove(&(*identity, role));
    }
}

impl Authority for RoleTable {
    fn has_role(&self, identity: &HolderId, role: Role) -> bool {
        self.grants.read().contains(&(*identity, role))
    }
}

/// Append-only event log
#[derive(Debug, Default)]
pub struct EventLog {
    records: RwLock<Vec<EventRecord>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records.read().clone()
    }

    pub fn events(&self) -> Vec<CoverEvent> {
        self.records.read().iter().map(|r| r.event.clone()).collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.records.read().iter().map(|r| r.event.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }

    /// One JSON document per line
    pub fn to_json_lines(&self) -> Result<String> {
        let records = self.records.read();
        let mut out = String::new();
        for record in records.iter() {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl EventSink for EventLog {
    fn emit(&self, record: EventRecord) {
        debug!(event = record.event.name(), id = %record.id, "Event recorded");
        self.records.write().push(record);
    }
}
