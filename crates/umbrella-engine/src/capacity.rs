//! Capacity ledger
//!
//! Tracks active cover globally and per strategy against ceilings supplied by
//! the risk budget. Admission and application are a single atomic step: a
//! [`CapacityReservation`] applies the delta immediately and reverts it on
//! drop unless the owning operation commits.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use umbrella_common::{math, AdmissionError, Amount, Result, StrategyId, UmbrellaError};

/// Scope a cover total is tracked against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoverScope {
    Global,
    Strategy(StrategyId),
}

impl std::fmt::Display for CoverScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoverScope::Global => write!(f, "global"),
            CoverScope::Strategy(id) => write!(f, "strategy:{}", id),
        }
    }
}

/// Max-cover budgets for the two scopes an admission is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ceilings {
    pub global: Amount,
    pub strategy: Amount,
}

/// Admission rule
///
/// Shrinking is always admitted. Growth is admitted only when the increase is
/// strictly below the remaining budget; an exact fit is rejected.
pub fn can_admit(max_cover: Amount, active_cover: Amount, current: Amount, requested: Amount) -> bool {
    if requested <= current {
        return true;
    }
    let increase = requested - current;
    increase < max_cover.saturating_sub(active_cover)
}

#[derive(Debug, Default)]
struct CapacityTotals {
    global: Amount,
    per_strategy: HashMap<StrategyId, Amount>,
}

impl CapacityTotals {
    fn strategy(&self, strategy: &StrategyId) -> Amount {
        self.per_strategy.get(strategy).copied().unwrap_or(0)
    }

    /// Apply a delta to both scopes, or neither
    fn apply(&mut self, strategy: &StrategyId, delta: i128) -> Result<()> {
        let global = math::apply_delta(self.global, delta)?;
        let scoped = math::apply_delta(self.strategy(strategy), delta)?;
        self.global = global;
        self.per_strategy.insert(strategy.clone(), scoped);
        Ok(())
    }
}

/// Running active-cover sums
#[derive(Debug, Default)]
pub struct CapacityLedger {
    totals: Mutex<CapacityTotals>,
}

impl CapacityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current active cover for a scope
    pub fn active_cover(&self, scope: &CoverScope) -> Amount {
        let totals = self.totals.lock();
        match scope {
            CoverScope::Global => totals.global,
            CoverScope::Strategy(id) => totals.strategy(id),
        }
    }

    /// Headroom left for a strategy, bounded by both ceilings
    pub fn available(&self, strategy: &StrategyId, ceilings: Ceilings) -> Amount {
        let totals = self.totals.lock();
        let global = ceilings.global.saturating_sub(totals.global);
        let scoped = ceilings.strategy.saturating_sub(totals.strategy(strategy));
        global.min(scoped)
    }

    /// Check admission for `current -> requested` and apply it atomically
    ///
    /// `ceilings` may be `None` only when the change does not grow cover.
    pub fn reserve(
        self: &Arc<Self>,
        strategy: &StrategyId,
        current: Amount,
        requested: Amount,
        ceilings: Option<Ceilings>,
    ) -> Result<CapacityReservation> {
        let delta = math::signed_delta(current, requested)?;
        let mut totals = self.totals.lock();

        if requested > current {
            let ceilings = ceilings.ok_or_else(|| {
                UmbrellaError::Validation("capacity ceilings required to grow cover".into())
            })?;
            let scoped_active = totals.strategy(strategy);
            let admitted = can_admit(ceilings.global, totals.global, current, requested)
                && can_admit(ceilings.strategy, scoped_active, current, requested);
            if !admitted {
                let available = ceilings
                    .global
                    .saturating_sub(totals.global)
                    .min(ceilings.strategy.saturating_sub(scoped_active));
                debug!(
                    strategy = %strategy,
                    requested = requested - current,
                    available,
                    "Capacity admission rejected"
                );
                return Err(AdmissionError::InsufficientCapacity {
                    requested: requested - current,
                    available,
                }
                .into());
            }
        }

        totals.apply(strategy, delta)?;
        Ok(CapacityReservation {
            ledger: Arc::clone(self),
            strategy: strategy.clone(),
            delta,
            committed: false,
        })
    }

    /// Panic if the tracked strategy total diverges from the live policy sum
    ///
    /// Divergence means cover was admitted or released without a matching
    /// policy mutation; continuing would risk insolvency.
    pub fn assert_consistent(&self, strategy: &StrategyId, live_sum: Amount) {
        let totals = self.totals.lock();
        let tracked = totals.strategy(strategy);
        let strategies: Amount = totals.per_strategy.values().sum();

        if tracked != live_sum || strategies != totals.global {
            error!(
                strategy = %strategy,
                tracked,
                live_sum,
                global = totals.global,
                strategies,
                "Capacity invariant violated"
            );
            panic!(
                "capacity invariant violated for {}: tracked {} vs live {} (global {} vs strategies {})",
                strategy, tracked, live_sum, totals.global, strategies
            );
        }
    }

    fn revert(&self, strategy: &StrategyId, delta: i128) {
        let mut totals = self.totals.lock();
        if let Err(err) = totals.apply(strategy, -delta) {
            panic!("capacity reservation could not be reverted for {}: {}", strategy, err);
        }
    }
}

/// Applied-but-uncommitted capacity change
#[must_use = "dropping a reservation reverts it"]
#[derive(Debug)]
pub struct CapacityReservation {
    ledger: Arc<CapacityLedger>,
    strategy: StrategyId,
    delta: i128,
    committed: bool,
}

impl CapacityReservation {
    pub fn delta(&self) -> i128 {
        self.delta
    }

    /// Make the change permanent
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for CapacityReservation {
    fn drop(&mut self) {
        if !self.committed && self.delta != 0 {
            debug!(strategy = %self.strategy, delta = self.delta, "Reverting capacity reservation");
            self.ledger.revert(&self.strategy, self.delta);
        }
    }
}
