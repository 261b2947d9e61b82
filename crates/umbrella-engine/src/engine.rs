//! Cover engine
//!
//! [`CoverEngine`] owns every holder record and the capacity ledger of one
//! subscription product. Mutating operations are spread across
//! `lifecycle`, `billing` and `claims`; this module holds the shared state,
//! locking helpers, views and governance setters.
//!
//! Each holder's record sits behind its own async mutex, held for the whole
//! operation including collaborator calls. Operations that touch several
//! holders take the locks in ascending [`HolderId`] order. Every mutating
//! operation also holds a shared gate that [`CoverEngine::audit`] takes
//! exclusively, so the audit never observes an uncommitted reservation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock as AsyncRwLock};
use tracing::{info, instrument, warn};
use umbrella_common::{
    Amount, AuthorizationError, CoverEvent, EventRecord, HolderId, PolicyId, PolicyStateError,
    Result, StrategyId, UmbrellaError,
};

use crate::account::Account;
use crate::capacity::{CapacityLedger, Ceilings, CoverScope};
use crate::claims::ClaimSigners;
use crate::collaborators::{Collaborators, Role};
use crate::config::{EngineConfig, RewardPointsGating};
use crate::cooldown::CooldownState;
use crate::metrics::EngineMetrics;
use crate::policy::{HolderRecord, Policy};
use crate::premium::{PremiumCalculator, PremiumRate};

pub(crate) type RecordHandle = Arc<Mutex<HolderRecord>>;
pub(crate) type RecordGuard = OwnedMutexGuard<HolderRecord>;

/// Runtime parameters, adjustable by the governor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineParams {
    pub strategy: StrategyId,
    pub calculator: PremiumCalculator,
    pub cooldown_period_secs: u64,
    pub referral_reward: Amount,
    pub referral_threshold: Amount,
    pub referrals_enabled: bool,
    pub reward_points_gating: RewardPointsGating,
}

impl EngineParams {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            strategy: config.strategy.clone(),
            calculator: config.calculator()?,
            cooldown_period_secs: config.cooldown_period_secs,
            referral_reward: config.referral_reward_amount()?,
            referral_threshold: config.referral_threshold_amount()?,
            referrals_enabled: config.referrals_enabled,
            reward_points_gating: config.reward_points_gating,
        })
    }

    /// Whether billing may draw on reward points for an account
    pub fn points_usable(&self, account: &Account) -> bool {
        match self.reward_points_gating {
            RewardPointsGating::Always => true,
            RewardPointsGating::AfterThreshold => account.premium_paid >= self.referral_threshold,
        }
    }
}

/// Engine-tracked vs risk-manager-reported cover for one scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeReconciliation {
    pub scope: CoverScope,
    pub tracked: Amount,
    pub reported: Amount,
    pub max_cover: Amount,
}

impl ScopeReconciliation {
    pub fn in_sync(&self) -> bool {
        self.tracked == self.reported
    }
}

/// Subscription cover engine
pub struct CoverEngine {
    pub(crate) params: RwLock<EngineParams>,
    pub(crate) paused: AtomicBool,
    pub(crate) capacity: Arc<CapacityLedger>,
    pub(crate) collaborators: Collaborators,
    pub(crate) holders: DashMap<HolderId, RecordHandle>,
    pub(crate) policy_index: DashMap<PolicyId, HolderId>,
    pub(crate) next_policy_id: AtomicU64,
    pub(crate) claim_signers: ClaimSigners,
    pub(crate) latest_charged_at: AtomicU64,
    pub(crate) metrics: Arc<EngineMetrics>,
    pub(crate) gate: AsyncRwLock<()>,
}

impl CoverEngine {
    /// Build an engine with its own capacity ledger
    pub fn new(config: &EngineConfig, collaborators: Collaborators) -> Result<Self> {
        Self::with_capacity_ledger(config, collaborators, Arc::new(CapacityLedger::new()))
    }

    /// Build an engine that books cover into a shared capacity ledger
    pub fn with_capacity_ledger(
        config: &EngineConfig,
        collaborators: Collaborators,
        capacity: Arc<CapacityLedger>,
    ) -> Result<Self> {
        let params = EngineParams::from_config(config)?;
        let metrics = EngineMetrics::new().map_err(|e| UmbrellaError::Config(e.to_string()))?;

        info!(
            strategy = %params.strategy,
            charge_cycle_secs = params.calculator.charge_cycle_secs(),
            cooldown_period_secs = params.cooldown_period_secs,
            "Cover engine initialized"
        );

        Ok(Self {
            params: RwLock::new(params),
            paused: AtomicBool::new(false),
            capacity,
            collaborators,
            holders: DashMap::new(),
            policy_index: DashMap::new(),
            next_policy_id: AtomicU64::new(1),
            claim_signers: ClaimSigners::new(),
            latest_charged_at: AtomicU64::new(0),
            metrics: Arc::new(metrics),
            gate: AsyncRwLock::new(()),
        })
    }

    // Internal helpers

    pub(crate) fn params(&self) -> EngineParams {
        self.params.read().clone()
    }

    pub(crate) fn now(&self) -> u64 {
        self.collaborators.clock.now()
    }

    /// Record handle, creating an empty record on first use
    pub(crate) fn handle(&self, holder: &HolderId) -> RecordHandle {
        Arc::clone(self.holders.entry(*holder).or_default().value())
    }

    pub(crate) fn existing(&self, holder: &HolderId) -> Option<RecordHandle> {
        self.holders.get(holder).map(|h| Arc::clone(h.value()))
    }

    /// Lock a holder and, when given, a second holder in ascending id order
    ///
    /// The second holder must already have a record.
    pub(crate) async fn lock_pair(
        &self,
        holder: &HolderId,
        other: Option<HolderId>,
    ) -> Result<(RecordGuard, Option<RecordGuard>)> {
        let subject = self.handle(holder);
        let Some(other) = other else {
            return Ok((subject.lock_owned().await, None));
        };
        let other_handle = self
            .existing(&other)
            .ok_or(PolicyStateError::ReferrerInactive)?;

        if other < *holder {
            let second = other_handle.lock_owned().await;
            let first = subject.lock_owned().await;
            Ok((first, Some(second)))
        } else {
            let first = subject.lock_owned().await;
            let second = other_handle.lock_owned().await;
            Ok((first, Some(second)))
        }
    }

    pub(crate) fn mint_policy_id(&self) -> PolicyId {
        PolicyId(self.next_policy_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) async fn ceilings(&self, strategy: &StrategyId) -> Result<Ceilings> {
        let risk_budget = &self.collaborators.risk_budget;
        let global = risk_budget.max_cover(&CoverScope::Global).await?;
        let scoped = risk_budget
            .max_cover(&CoverScope::Strategy(strategy.clone()))
            .await?;
        Ok(Ceilings {
            global,
            strategy: scoped,
        })
    }

    pub(crate) fn require_role(&self, caller: &HolderId, role: Role) -> Result<()> {
        if self.collaborators.authority.has_role(caller, role) {
            Ok(())
        } else {
            warn!(caller = %caller.short(), role = %role, "Role check failed");
            Err(AuthorizationError::NotAuthorizedRole {
                role: role.to_string(),
            }
            .into())
        }
    }

    pub(crate) fn require_unpaused(&self) -> Result<()> {
        if self.is_paused() {
            return Err(PolicyStateError::ProductPaused.into());
        }
        Ok(())
    }

    /// Deliver events of a committed operation
    pub(crate) fn publish(&self, events: Vec<CoverEvent>) {
        let now = self.now();
        for event in events {
            self.collaborators.events.emit(EventRecord::new(event, now));
        }
    }

    pub(crate) fn refresh_cover_gauge(&self, strategy: &StrategyId) {
        self.metrics
            .set_active_cover(self.capacity.active_cover(&CoverScope::Strategy(strategy.clone())));
    }

    // Views

    pub fn strategy(&self) -> StrategyId {
        self.params.read().strategy.clone()
    }

    pub fn engine_params(&self) -> EngineParams {
        self.params()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn capacity(&self) -> Arc<CapacityLedger> {
        Arc::clone(&self.capacity)
    }

    /// Unix seconds of the last committed billing batch, or 0
    pub fn latest_charged_at(&self) -> u64 {
        self.latest_charged_at.load(Ordering::SeqCst)
    }

    /// Active cover booked by this engine's strategy
    pub fn active_cover_limit(&self) -> Amount {
        self.capacity
            .active_cover(&CoverScope::Strategy(self.strategy()))
    }

    pub fn holder_of(&self, policy_id: PolicyId) -> Option<HolderId> {
        self.policy_index.get(&policy_id).map(|h| *h.value())
    }

    pub async fn policy_of(&self, holder: &HolderId) -> Option<Policy> {
        let handle = self.existing(holder)?;
        let record = handle.lock().await;
        record.live_policy().cloned()
    }

    pub async fn account_of(&self, holder: &HolderId) -> Option<Account> {
        let handle = self.existing(holder)?;
        let record = handle.lock().await;
        Some(record.account.clone())
    }

    /// Premium one charge cycle would cost at `cover_limit`
    pub fn min_required_balance(&self, cover_limit: Amount) -> Result<Amount> {
        Ok(self.params.read().calculator.min_required_balance(cover_limit)?)
    }

    /// Amount the holder could withdraw right now
    pub async fn withdrawable(&self, holder: &HolderId) -> Result<Amount> {
        let Some(handle) = self.existing(holder) else {
            return Ok(0);
        };
        let record = handle.lock().await;
        let params = self.params();
        let now = self.now();
        let reserve = params
            .calculator
            .min_required_balance(record.pre_deactivate_cover())?;
        Ok(record
            .account
            .withdrawable(now, params.cooldown_period_secs, reserve))
    }

    pub async fn cooldown_state(&self, holder: &HolderId) -> CooldownState {
        let Some(handle) = self.existing(holder) else {
            return CooldownState::NotStarted;
        };
        let record = handle.lock().await;
        record
            .account
            .cooldown_state(self.now(), self.params.read().cooldown_period_secs)
    }

    /// Headroom left for new cover in this engine's strategy
    pub async fn available_cover_capacity(&self) -> Result<Amount> {
        let strategy = self.strategy();
        let ceilings = self.ceilings(&strategy).await?;
        Ok(self.capacity.available(&strategy, ceilings))
    }

    pub fn is_claim_signer(&self, signer: &[u8; 32]) -> bool {
        self.claim_signers.contains(signer)
    }

    // Integrity

    /// Recompute the live cover sum and panic if the ledger diverged
    #[instrument(skip(self))]
    pub async fn audit(&self) -> Amount {
        let _exclusive = self.gate.write().await;
        let strategy = self.strategy();

        let mut handles: Vec<(HolderId, RecordHandle)> = self
            .holders
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        handles.sort_by_key(|(holder, _)| *holder);

        let mut live_sum: Amount = 0;
        for (_, handle) in handles {
            let record = handle.lock().await;
            live_sum += record.active_cover();
        }

        self.capacity.assert_consistent(&strategy, live_sum);
        live_sum
    }

    /// Compare tracked cover against what the risk manager reports
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<Vec<ScopeReconciliation>> {
        let strategy = self.strategy();
        let risk_budget = &self.collaborators.risk_budget;
        let mut report = Vec::with_capacity(2);

        for scope in [CoverScope::Global, CoverScope::Strategy(strategy)] {
            let entry = ScopeReconciliation {
                tracked: self.capacity.active_cover(&scope),
                reported: risk_budget.active_cover(&scope).await?,
                max_cover: risk_budget.max_cover(&scope).await?,
                scope,
            };
            if !entry.in_sync() {
                warn!(
                    scope = %entry.scope,
                    tracked = entry.tracked,
                    reported = entry.reported,
                    "Active cover differs from risk manager"
                );
            }
            report.push(entry);
        }
        Ok(report)
    }

    /// Policies are bound to their holder for life
    pub fn transfer_policy(
        &self,
        _caller: &HolderId,
        policy_id: PolicyId,
        _to: &HolderId,
    ) -> Result<()> {
        if self.holder_of(policy_id).is_none() {
            return Err(PolicyStateError::InvalidPolicy.into());
        }
        Err(AuthorizationError::NonTransferable.into())
    }

    // Governance

    #[instrument(skip(self, caller))]
    pub fn set_paused(&self, caller: &HolderId, paused: bool) -> Result<()> {
        self.require_role(caller, Role::Governor)?;
        self.paused.store(paused, Ordering::SeqCst);
        info!(paused, "Pause state set");
        self.publish(vec![CoverEvent::PausedSet { paused }]);
        Ok(())
    }

    #[instrument(skip(self, caller))]
    pub fn set_referrals_enabled(&self, caller: &HolderId, enabled: bool) -> Result<()> {
        self.require_role(caller, Role::Governor)?;
        self.params.write().referrals_enabled = enabled;
        info!(enabled, "Referral program toggled");
        Ok(())
    }

    #[instrument(skip(self, caller))]
    pub fn set_referral_reward(&self, caller: &HolderId, reward: Amount) -> Result<()> {
        self.require_role(caller, Role::Governor)?;
        self.params.write().referral_reward = reward;
        info!(reward, "Referral reward set");
        Ok(())
    }

    #[instrument(skip(self, caller))]
    pub fn set_referral_threshold(&self, caller: &HolderId, threshold: Amount) -> Result<()> {
        self.require_role(caller, Role::Governor)?;
        self.params.write().referral_threshold = threshold;
        info!(threshold, "Referral threshold set");
        Ok(())
    }

    #[instrument(skip(self, caller))]
    pub fn set_cooldown_period(&self, caller: &HolderId, period_secs: u64) -> Result<()> {
        self.require_role(caller, Role::Governor)?;
        self.params.write().cooldown_period_secs = period_secs;
        info!(period_secs, "Cooldown period set");
        Ok(())
    }

    #[instrument(skip(self, caller))]
    pub fn set_charge_cycle(&self, caller: &HolderId, cycle_secs: u64) -> Result<()> {
        self.require_role(caller, Role::Governor)?;
        if cycle_secs == 0 {
            return Err(UmbrellaError::Validation(
                "charge cycle must be non-zero".into(),
            ));
        }
        let mut params = self.params.write();
        params.calculator = PremiumCalculator::new(params.calculator.rate(), cycle_secs);
        info!(cycle_secs, "Charge cycle set");
        Ok(())
    }

    #[instrument(skip(self, caller))]
    pub fn set_rate(&self, caller: &HolderId, numerator: u128, denominator: u128) -> Result<()> {
        self.require_role(caller, Role::Governor)?;
        let rate = PremiumRate::new(numerator, denominator)?;
        let mut params = self.params.write();
        params.calculator = PremiumCalculator::new(rate, params.calculator.charge_cycle_secs());
        info!(numerator, denominator, "Premium rate set");
        Ok(())
    }

    #[instrument(skip_all)]
    pub fn add_claim_signer(&self, caller: &HolderId, signer: [u8; 32]) -> Result<()> {
        self.require_role(caller, Role::Governor)?;
        self.claim_signers.add(signer);
        Ok(())
    }

    #[instrument(skip_all)]
    pub fn remove_claim_signer(&self, caller: &HolderId, signer: &[u8; 32]) -> Result<()> {
        self.require_role(caller, Role::Governor)?;
        self.claim_signers.remove(signer);
        Ok(())
    }

    /// Holders with a record, in lock order
    pub fn holders(&self) -> Vec<HolderId> {
        let mut holders: Vec<HolderId> = self.holders.iter().map(|e| *e.key()).collect();
        holders.sort();
        holders
    }
}

impl std::fmt::Debug for CoverEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverEngine")
            .field("params", &*self.params.read())
            .field("paused", &self.is_paused())
            .field("holders", &self.holders.len())
            .finish_non_exhaustive()
    }
}
