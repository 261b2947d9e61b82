//! Term policy book
//!
//! Every holder has at most one live policy. Premium for the whole period is
//! pulled into custody when cover is bought; repricing charges or refunds
//! the difference against what the unexpired remainder already paid for.
//! Earned premium (expired, canceled or claimed policies) accumulates until
//! the next sweep moves it to the premium pool in one transfer.
//!
//! The book state sits behind a single async mutex held for the whole
//! operation, external calls included, so each call is all-or-nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use umbrella_common::{
    AdmissionError, Amount, AuthorizationError, CoverEvent, EventRecord, HolderId, PolicyId,
    PolicyStateError, Result, StrategyId,
};
use umbrella_engine::{
    premium_for, validate_claim, CapacityLedger, CapacityReservation, Ceilings, ClaimRequest,
    ClaimSigners, ClaimTarget, Collaborators, CoverScope, PremiumDelta, PremiumRate, Role,
};

use crate::adapter::{PositionRef, ProtocolAdapter};
use crate::config::TermConfig;

/// Fixed-term policy over one protocol position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermPolicy {
    pub id: PolicyId,
    pub holder: HolderId,
    pub position: PositionRef,
    pub cover_limit: Amount,
    pub expires_at: u64,
    /// Premium held in custody on behalf of this policy
    pub premium_paid: Amount,
    pub burned: bool,
}

impl TermPolicy {
    /// Holds booked capacity, whether or not it has expired yet
    pub fn is_live(&self) -> bool {
        !self.burned && self.cover_limit > 0
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }

    pub fn remaining(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }
}

/// What a cover-changing call settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermReceipt {
    pub policy_id: PolicyId,
    /// Cover after appraisal clamping
    pub cover_limit: Amount,
    pub expires_at: u64,
    pub charged: Amount,
    pub refunded: Amount,
    /// Part of the offered payment that was not needed
    pub unused_payment: Amount,
}

/// Outcome of an expiry sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub expired: Vec<PolicyId>,
    /// Earned premium moved to the pool
    pub settled: Amount,
}

#[derive(Debug, Default)]
struct BookState {
    policies: HashMap<HolderId, TermPolicy>,
    index: HashMap<PolicyId, HolderId>,
    pending_settlement: Amount,
}

impl BookState {
    fn live_sum(&self) -> Amount {
        self.policies
            .values()
            .filter(|p| p.is_live())
            .map(|p| p.cover_limit)
            .sum()
    }
}

/// Repricing request shared by the update operations
struct Reprice {
    new_cover: Amount,
    new_expires_at: u64,
    new_premium: Amount,
    paid_for_remaining: Amount,
    payment: Amount,
}

pub struct TermBook {
    strategy: StrategyId,
    rate: PremiumRate,
    cancel_fee: Amount,
    config: TermConfig,
    paused: AtomicBool,
    capacity: Arc<CapacityLedger>,
    collaborators: Collaborators,
    adapter: Arc<dyn ProtocolAdapter>,
    claim_signers: ClaimSigners,
    state: Mutex<BookState>,
    next_policy_id: AtomicU64,
}

impl std::fmt::Debug for TermBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermBook")
            .field("strategy", &self.strategy)
            .field("protocol", &self.adapter.protocol())
            .finish_non_exhaustive()
    }
}

impl TermBook {
    pub fn new(
        config: &TermConfig,
        collaborators: Collaborators,
        adapter: Arc<dyn ProtocolAdapter>,
    ) -> Result<Self> {
        Self::with_capacity_ledger(config, collaborators, adapter, Arc::new(CapacityLedger::new()))
    }

    /// Share a capacity ledger with other products
    pub fn with_capacity_ledger(
        config: &TermConfig,
        collaborators: Collaborators,
        adapter: Arc<dyn ProtocolAdapter>,
        capacity: Arc<CapacityLedger>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            strategy = %config.strategy,
            protocol = adapter.protocol(),
            "Term book created"
        );
        Ok(Self {
            strategy: config.strategy.clone(),
            rate: config.rate()?,
            cancel_fee: config.cancel_fee_amount()?,
            config: config.clone(),
            paused: AtomicBool::new(false),
            capacity,
            collaborators,
            adapter,
            claim_signers: ClaimSigners::new(),
            state: Mutex::new(BookState::default()),
            next_policy_id: AtomicU64::new(1),
        })
    }

    fn now(&self) -> u64 {
        self.collaborators.clock.now()
    }

    fn publish(&self, events: Vec<CoverEvent>) {
        let now = self.now();
        for event in events {
            self.collaborators.events.emit(EventRecord::new(event, now));
        }
    }

    fn require_role(&self, caller: &HolderId, role: Role) -> Result<()> {
        if self.collaborators.authority.has_role(caller, role) {
            return Ok(());
        }
        warn!(caller = %caller.short(), role = %role, "Role check failed");
        Err(AuthorizationError::NotAuthorizedRole {
            role: role.to_string(),
        }
        .into())
    }

    async fn ceilings(&self) -> Result<Ceilings> {
        let risk_budget = &self.collaborators.risk_budget;
        Ok(Ceilings {
            global: risk_budget.max_cover(&CoverScope::Global).await?,
            strategy: risk_budget
                .max_cover(&CoverScope::Strategy(self.strategy.clone()))
                .await?,
        })
    }

    /// Reserve `current -> requested`, fetching ceilings only for growth
    async fn reserve(&self, current: Amount, requested: Amount) -> Result<CapacityReservation> {
        let ceilings = if requested > current {
            Some(self.ceilings().await?)
        } else {
            None
        };
        self.capacity
            .reserve(&self.strategy, current, requested, ceilings)
    }

    /// The holder's live, unexpired policy
    fn current(&self, state: &BookState, holder: &HolderId, now: u64) -> Result<TermPolicy> {
        let policy = state
            .policies
            .get(holder)
            .filter(|p| p.is_live())
            .ok_or(PolicyStateError::InvalidPolicy)?;
        if policy.is_expired(now) {
            return Err(PolicyStateError::PolicyExpired.into());
        }
        Ok(policy.clone())
    }

    /// Validate the position and clamp cover to its appraisal
    ///
    /// Appraises exactly once.
    async fn appraised_cover(
        &self,
        holder: &HolderId,
        position: &PositionRef,
        requested: Amount,
    ) -> Result<Amount> {
        if position.protocol != self.adapter.protocol() {
            return Err(AuthorizationError::WrongProduct.into());
        }
        if !self.adapter.validate(position).await? {
            return Err(AdmissionError::InvalidPosition.into());
        }
        let appraised = self.adapter.appraise(holder, position).await?;
        let cover = requested.min(appraised);
        if cover == 0 {
            return Err(AdmissionError::ZeroCoverValue.into());
        }
        if cover < requested {
            debug!(requested, appraised, "Cover clamped to appraisal");
        }
        Ok(cover)
    }

    fn require_payment(premium: Amount, payment: Amount) -> Result<()> {
        if payment < premium {
            return Err(AdmissionError::InsufficientDeposit {
                required: premium,
                provided: payment,
            }
            .into());
        }
        Ok(())
    }

    // Views

    pub fn strategy(&self) -> &StrategyId {
        &self.strategy
    }

    pub fn config(&self) -> &TermConfig {
        &self.config
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> &Arc<CapacityLedger> {
        &self.capacity
    }

    /// Premium for `cover_limit` over `period_secs` at the book's rate
    pub fn quote(&self, cover_limit: Amount, period_secs: u64) -> Result<Amount> {
        Ok(premium_for(cover_limit, period_secs, self.rate)?)
    }

    pub async fn policy_of(&self, holder: &HolderId) -> Option<TermPolicy> {
        self.state.lock().await.policies.get(holder).cloned()
    }

    pub async fn policy(&self, policy_id: PolicyId) -> Option<TermPolicy> {
        let state = self.state.lock().await;
        let holder = state.index.get(&policy_id)?;
        state.policies.get(holder).cloned()
    }

    pub fn active_cover_limit(&self) -> Amount {
        self.capacity
            .active_cover(&CoverScope::Strategy(self.strategy.clone()))
    }

    /// Earned premium awaiting the next sweep
    pub async fn pending_settlement(&self) -> Amount {
        self.state.lock().await.pending_settlement
    }

    pub fn is_claim_signer(&self, signer: &[u8; 32]) -> bool {
        self.claim_signers.contains(signer)
    }

    // Operations

    /// Buy cover for `period_secs`, paying the whole premium up front
    ///
    /// Only the premium is pulled from `payment`; the rest stays with the
    /// holder and is reported as unused.
    #[instrument(skip(self, holder, position), fields(holder = %holder.short(), position = %position))]
    pub async fn buy_policy(
        &self,
        holder: &HolderId,
        position: &PositionRef,
        cover_limit: Amount,
        period_secs: u64,
        payment: Amount,
    ) -> Result<TermReceipt> {
        if self.is_paused() {
            return Err(PolicyStateError::ProductPaused.into());
        }
        if cover_limit == 0 {
            return Err(AdmissionError::ZeroCoverValue.into());
        }
        if !self.config.period_allowed(period_secs) {
            return Err(AdmissionError::InvalidDuration.into());
        }

        let mut state = self.state.lock().await;
        let now = self.now();
        if let Some(existing) = state.policies.get(holder).filter(|p| p.is_live()) {
            if existing.is_expired(now) {
                return Err(PolicyStateError::PolicyExpired.into());
            }
            return Err(PolicyStateError::PolicyAlreadyActive.into());
        }

        let cover = self.appraised_cover(holder, position, cover_limit).await?;
        let premium = self.quote(cover, period_secs)?;
        Self::require_payment(premium, payment)?;

        let reservation = self.reserve(0, cover).await?;
        let policy = TermPolicy {
            id: PolicyId(self.next_policy_id.fetch_add(1, Ordering::SeqCst)),
            holder: *holder,
            position: position.clone(),
            cover_limit: cover,
            expires_at: now + period_secs,
            premium_paid: premium,
            burned: false,
        };

        if premium > 0 {
            self.collaborators.funds.transfer_in(holder, premium).await?;
        }

        // Commit
        reservation.commit();
        state.index.insert(policy.id, *holder);
        state.policies.insert(*holder, policy.clone());
        drop(state);

        self.publish(vec![CoverEvent::PolicyCreated {
            policy_id: policy.id,
            holder: *holder,
            cover_limit: cover,
        }]);
        info!(policy_id = %policy.id, cover, premium, expires_at = policy.expires_at, "Term policy bought");

        Ok(TermReceipt {
            policy_id: policy.id,
            cover_limit: cover,
            expires_at: policy.expires_at,
            charged: premium,
            refunded: 0,
            unused_payment: payment - premium,
        })
    }

    /// Push expiry out by `extra_secs` at the current cover
    #[instrument(skip(self, holder), fields(holder = %holder.short()))]
    pub async fn extend_policy(
        &self,
        holder: &HolderId,
        extra_secs: u64,
        payment: Amount,
    ) -> Result<TermReceipt> {
        let mut state = self.state.lock().await;
        let now = self.now();
        let mut policy = self.current(&state, holder, now)?;

        let expires_at = policy
            .expires_at
            .checked_add(extra_secs)
            .filter(|&at| extra_secs > 0 && at - now <= self.config.max_period_secs)
            .ok_or(AdmissionError::InvalidDuration)?;
        let premium = self.quote(policy.cover_limit, extra_secs)?;
        Self::require_payment(premium, payment)?;

        if premium > 0 {
            self.collaborators.funds.transfer_in(holder, premium).await?;
        }

        // Commit
        policy.expires_at = expires_at;
        policy.premium_paid += premium;
        state.policies.insert(*holder, policy.clone());
        drop(state);

        self.publish(vec![CoverEvent::PolicyExtended {
            policy_id: policy.id,
            holder: *holder,
            expires_at,
        }]);
        info!(policy_id = %policy.id, expires_at, premium, "Term policy extended");

        Ok(TermReceipt {
            policy_id: policy.id,
            cover_limit: policy.cover_limit,
            expires_at,
            charged: premium,
            refunded: 0,
            unused_payment: payment - premium,
        })
    }

    /// Change cover for the rest of the current period
    #[instrument(skip(self, holder), fields(holder = %holder.short()))]
    pub async fn update_cover(
        &self,
        holder: &HolderId,
        new_cover: Amount,
        payment: Amount,
    ) -> Result<TermReceipt> {
        if new_cover == 0 {
            return Err(AdmissionError::ZeroCoverValue.into());
        }
        let mut state = self.state.lock().await;
        let now = self.now();
        let policy = self.current(&state, holder, now)?;

        let cover = self
            .appraised_cover(holder, &policy.position, new_cover)
            .await?;
        let remaining = policy.remaining(now);
        let reprice = Reprice {
            new_cover: cover,
            new_expires_at: policy.expires_at,
            new_premium: self.quote(cover, remaining)?,
            paid_for_remaining: self.quote(policy.cover_limit, remaining)?,
            payment,
        };
        self.reprice(&mut state, policy, reprice).await
    }

    /// Change cover and restart the period from now
    #[instrument(skip(self, holder), fields(holder = %holder.short()))]
    pub async fn update_policy(
        &self,
        holder: &HolderId,
        new_cover: Amount,
        new_period_secs: u64,
        payment: Amount,
    ) -> Result<TermReceipt> {
        if new_cover == 0 {
            return Err(AdmissionError::ZeroCoverValue.into());
        }
        if !self.config.period_allowed(new_period_secs) {
            return Err(AdmissionError::InvalidDuration.into());
        }
        let mut state = self.state.lock().await;
        let now = self.now();
        let policy = self.current(&state, holder, now)?;

        let cover = self
            .appraised_cover(holder, &policy.position, new_cover)
            .await?;
        let reprice = Reprice {
            new_cover: cover,
            new_expires_at: now + new_period_secs,
            new_premium: self.quote(cover, new_period_secs)?,
            paid_for_remaining: self.quote(policy.cover_limit, policy.remaining(now))?,
            payment,
        };
        self.reprice(&mut state, policy, reprice).await
    }

    async fn reprice(
        &self,
        state: &mut BookState,
        mut policy: TermPolicy,
        reprice: Reprice,
    ) -> Result<TermReceipt> {
        if reprice.new_cover > policy.cover_limit && self.is_paused() {
            return Err(PolicyStateError::ProductPaused.into());
        }
        let delta = PremiumDelta::between(reprice.new_premium, reprice.paid_for_remaining);
        if let PremiumDelta::Charge(charge) = delta {
            Self::require_payment(charge, reprice.payment)?;
        }

        let reservation = self.reserve(policy.cover_limit, reprice.new_cover).await?;

        let (charged, refunded) = match delta {
            PremiumDelta::Charge(charge) => {
                self.collaborators
                    .funds
                    .transfer_in(&policy.holder, charge)
                    .await?;
                (charge, 0)
            }
            PremiumDelta::Refund(refund) => {
                self.collaborators
                    .funds
                    .transfer_out(&policy.holder, refund)
                    .await?;
                (0, refund)
            }
            PremiumDelta::Settled => (0, 0),
        };

        // Commit
        let extended = reprice.new_expires_at != policy.expires_at;
        policy.cover_limit = reprice.new_cover;
        policy.expires_at = reprice.new_expires_at;
        policy.premium_paid = (policy.premium_paid + charged).saturating_sub(refunded);
        reservation.commit();
        state.policies.insert(policy.holder, policy.clone());

        let mut events = vec![CoverEvent::PolicyUpdated {
            policy_id: policy.id,
            holder: policy.holder,
            cover_limit: policy.cover_limit,
        }];
        if extended {
            events.push(CoverEvent::PolicyExtended {
                policy_id: policy.id,
                holder: policy.holder,
                expires_at: policy.expires_at,
            });
        }
        self.publish(events);
        info!(
            policy_id = %policy.id,
            cover = policy.cover_limit,
            charged,
            refunded,
            "Term policy repriced"
        );

        Ok(TermReceipt {
            policy_id: policy.id,
            cover_limit: policy.cover_limit,
            expires_at: policy.expires_at,
            charged,
            refunded,
            unused_payment: reprice.payment.saturating_sub(charged),
        })
    }

    /// End cover now, refunding the unexpired remainder minus the cancel fee
    #[instrument(skip(self, holder), fields(holder = %holder.short()))]
    pub async fn cancel_policy(&self, holder: &HolderId) -> Result<Amount> {
        let mut state = self.state.lock().await;
        let now = self.now();
        let mut policy = self.current(&state, holder, now)?;

        let refund = self
            .quote(policy.cover_limit, policy.remaining(now))?
            .saturating_sub(self.cancel_fee)
            .min(policy.premium_paid);
        let reservation = self.reserve(policy.cover_limit, 0).await?;

        if refund > 0 {
            self.collaborators.funds.transfer_out(holder, refund).await?;
        }

        // Commit
        state.pending_settlement += policy.premium_paid - refund;
        policy.cover_limit = 0;
        policy.premium_paid = 0;
        reservation.commit();
        state.index.remove(&policy.id);
        state.policies.insert(*holder, policy.clone());
        drop(state);

        self.publish(vec![CoverEvent::PolicyCanceled {
            policy_id: policy.id,
            holder: *holder,
            refund,
        }]);
        info!(policy_id = %policy.id, refund, "Term policy canceled");
        Ok(refund)
    }

    /// Close every expired policy and settle earned premium to the pool
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        let mut state = self.state.lock().await;
        let now = self.now();

        let mut expired: Vec<TermPolicy> = state
            .policies
            .values()
            .filter(|p| p.is_live() && p.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|p| p.id);

        let mut reservations = Vec::with_capacity(expired.len());
        let mut settled = state.pending_settlement;
        for policy in &expired {
            reservations.push(self.reserve(policy.cover_limit, 0).await?);
            settled += policy.premium_paid;
        }

        if settled > 0 {
            self.collaborators.funds.transfer_to_pool(settled).await?;
        }

        // Commit
        for reservation in reservations {
            reservation.commit();
        }
        state.pending_settlement = 0;
        let mut events = Vec::with_capacity(expired.len());
        for policy in &expired {
            if let Some(stored) = state.policies.get_mut(&policy.holder) {
                stored.cover_limit = 0;
                stored.premium_paid = 0;
            }
            state.index.remove(&policy.id);
            events.push(CoverEvent::PolicyExpired {
                policy_id: policy.id,
                holder: policy.holder,
            });
        }
        drop(state);

        self.publish(events);
        let report = SweepReport {
            expired: expired.iter().map(|p| p.id).collect(),
            settled,
        };
        info!(expired = report.expired.len(), settled, "Expiry sweep complete");
        Ok(report)
    }

    /// Submit a signed claim against a term policy
    #[instrument(skip(self, claimant, request), fields(claimant = %claimant.short(), policy_id = %request.policy_id))]
    pub async fn submit_claim(&self, claimant: &HolderId, request: &ClaimRequest) -> Result<()> {
        let mut state = self.state.lock().await;
        let holder = *state
            .index
            .get(&request.policy_id)
            .ok_or(PolicyStateError::InvalidPolicy)?;
        let mut policy = state
            .policies
            .get(&holder)
            .filter(|p| p.id == request.policy_id && p.is_live())
            .cloned()
            .ok_or(PolicyStateError::InvalidPolicy)?;

        let target = ClaimTarget {
            holder: &policy.holder,
            cover_limit: policy.cover_limit,
            expires_at: Some(policy.expires_at),
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

        let reservation = self.reserve(policy.cover_limit, 0).await?;
        self.collaborators
            .funds
            .payout_claim(&holder, request.amount_out)
            .await?;

        // Commit
        state.pending_settlement += policy.premium_paid;
        policy.cover_limit = 0;
        policy.premium_paid = 0;
        policy.burned = true;
        reservation.commit();
        state.index.remove(&request.policy_id);
        state.policies.insert(holder, policy);
        drop(state);

        self.publish(vec![CoverEvent::ClaimSubmitted {
            policy_id: request.policy_id,
            holder,
            amount: request.amount_out,
        }]);
        info!(amount = request.amount_out, "Term claim paid");
        Ok(())
    }

    /// Recompute live cover and check it against the capacity ledger
    ///
    /// Expired but unswept policies still count. Panics on divergence.
    pub async fn audit(&self) -> Amount {
        let state = self.state.lock().await;
        let live_sum = state.live_sum();
        self.capacity.assert_consistent(&self.strategy, live_sum);
        live_sum
    }

    // Governance

    #[instrument(skip(self, caller))]
    pub fn set_paused(&self, caller: &HolderId, paused: bool) -> Result<()> {
        self.require_role(caller, Role::Governor)?;
        self.paused.store(paused, Ordering::SeqCst);
        info!(paused, "Term book pause state set");
        self.publish(vec![CoverEvent::PausedSet { paused }]);
        Ok(())
    }

    #[instrument(skip(self, caller, signer))]
    pub fn add_claim_signer(&self, caller: &HolderId, signer: [u8; 32]) -> Result<()> {
        self.require_role(caller, Role::Governor)?;
        self.claim_signers.add(signer);
        info!("Claim signer added");
        Ok(())
    }

    #[instrument(skip(self, caller, signer))]
    pub fn remove_claim_signer(&self, caller: &HolderId, signer: &[u8; 32]) -> Result<()> {
        self.require_role(caller, Role::Governor)?;
        self.claim_signers.remove(signer);
        info!("Claim signer removed");
        Ok(())
    }
}
