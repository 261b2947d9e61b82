//! Policy lifecycle
//!
//! Activation, cover updates, deactivation, deposits, withdrawals and the
//! referral program. Every operation stages its changes on a copy of the
//! holder record and writes it back only after the last fallible step,
//! including the external transfer, has succeeded.

use tracing::{debug, info, instrument};
use umbrella_common::{
    AdmissionError, Amount, ArithmeticError, AuthorizationError, BalanceError, CoverEvent,
    HolderId, PolicyId, PolicyStateError, ReferralCode, Result,
};

use crate::collaborators::Role;
use crate::engine::{CoverEngine, EngineParams};
use crate::policy::{HolderRecord, Policy};

impl CoverEngine {
    /// Activate cover for a holder, depositing `deposit` first
    ///
    /// The resulting balance must be strictly greater than one charge
    /// cycle's premium for `cover_limit`.
    #[instrument(skip(self, holder, referral), fields(holder = %holder.short()))]
    pub async fn activate(
        &self,
        holder: &HolderId,
        cover_limit: Amount,
        deposit: Amount,
        referral: Option<&ReferralCode>,
    ) -> Result<PolicyId> {
        let _gate = self.gate.read().await;
        self.require_unpaused()?;
        if cover_limit == 0 {
            return Err(AdmissionError::ZeroCoverValue.into());
        }
        let params = self.params();
        let referrer = Self::check_referral_code(holder, referral, &params)?;

        let (mut guard, mut referrer_guard) = self.lock_pair(holder, referrer).await?;
        let mut record = guard.clone();
        let mut referrer_record = referrer_guard.as_ref().map(|g| (**g).clone());

        if record.live_policy().is_some_and(Policy::is_active) {
            return Err(PolicyStateError::PolicyAlreadyActive.into());
        }

        let required = params.calculator.min_required_balance(cover_limit)?;
        let provided = record
            .account
            .balance
            .checked_add(deposit)
            .ok_or(ArithmeticError::Overflow)?;
        if provided <= required {
            debug!(required, provided, "Activation rejected: deposit too small");
            return Err(AdmissionError::InsufficientDeposit { required, provided }.into());
        }

        let ceilings = self.ceilings(&params.strategy).await?;
        let reservation =
            self.capacity
                .reserve(&params.strategy, record.active_cover(), cover_limit, Some(ceilings))?;

        let mut events = Vec::new();
        if record.account.exit_cooldown() {
            events.push(CoverEvent::CooldownStopped { holder: *holder });
        }
        if deposit > 0 {
            record.account.deposit(deposit)?;
            events.push(CoverEvent::DepositMade {
                holder: *holder,
                amount: deposit,
            });
        }

        let now = self.now();
        let policy_id = match record.live_policy_mut() {
            Some(policy) => {
                policy.set_cover(cover_limit);
                policy.id
            }
            None => {
                let mut policy = Policy::new(self.mint_policy_id(), *holder, now);
                policy.set_cover(cover_limit);
                let id = policy.id;
                record.policy = Some(policy);
                id
            }
        };

        if let Some(referrer_record) = referrer_record.as_mut() {
            events.extend(Self::apply_referral(
                holder,
                &mut record,
                referrer_record,
                &params,
            )?);
        }

        if deposit > 0 {
            self.collaborators.funds.transfer_in(holder, deposit).await?;
        }

        // Commit
        *guard = record;
        if let (Some(g), Some(r)) = (referrer_guard.as_mut(), referrer_record) {
            **g = r;
        }
        reservation.commit();
        self.policy_index.insert(policy_id, *holder);
        self.metrics.policies_activated.inc();
        self.refresh_cover_gauge(&params.strategy);

        events.push(CoverEvent::PolicyCreated {
            policy_id,
            holder: *holder,
            cover_limit,
        });
        self.publish(events);

        info!(policy_id = %policy_id, "Policy activated");
        Ok(policy_id)
    }

    /// Change the cover limit of an existing policy
    ///
    /// Decreases are always admitted. Any change, including a no-op one,
    /// exits the withdrawal cooldown.
    #[instrument(skip(self, holder, referral), fields(holder = %holder.short()))]
    pub async fn update_cover_limit(
        &self,
        holder: &HolderId,
        new_cover_limit: Amount,
        referral: Option<&ReferralCode>,
    ) -> Result<()> {
        let _gate = self.gate.read().await;
        if new_cover_limit == 0 {
            return Err(AdmissionError::ZeroCoverValue.into());
        }
        let params = self.params();
        let referrer = Self::check_referral_code(holder, referral, &params)?;

        if self.existing(holder).is_none() {
            return Err(PolicyStateError::InvalidPolicy.into());
        }
        let (mut guard, mut referrer_guard) = self.lock_pair(holder, referrer).await?;
        let mut record = guard.clone();
        let mut referrer_record = referrer_guard.as_ref().map(|g| (**g).clone());

        let current = record
            .live_policy()
            .map(|p| p.cover_limit)
            .ok_or(PolicyStateError::InvalidPolicy)?;
        let increase = new_cover_limit > current;
        if increase {
            self.require_unpaused()?;
        }

        let required = params.calculator.min_required_balance(new_cover_limit)?;
        let provided = record.account.balance;
        if provided <= required {
            debug!(required, provided, "Update rejected: balance too small");
            return Err(AdmissionError::InsufficientDeposit { required, provided }.into());
        }

        let ceilings = if increase {
            Some(self.ceilings(&params.strategy).await?)
        } else {
            None
        };
        let reservation =
            self.capacity
                .reserve(&params.strategy, current, new_cover_limit, ceilings)?;

        let mut events = Vec::new();
        if record.account.exit_cooldown() {
            events.push(CoverEvent::CooldownStopped { holder: *holder });
        }

        let policy = record
            .live_policy_mut()
            .ok_or(PolicyStateError::InvalidPolicy)?;
        policy.set_cover(new_cover_limit);
        let policy_id = policy.id;

        if let Some(referrer_record) = referrer_record.as_mut() {
            events.extend(Self::apply_referral(
                holder,
                &mut record,
                referrer_record,
                &params,
            )?);
        }

        // Commit
        *guard = record;
        if let (Some(g), Some(r)) = (referrer_guard.as_mut(), referrer_record) {
            **g = r;
        }
        reservation.commit();
        self.refresh_cover_gauge(&params.strategy);

        events.push(CoverEvent::PolicyUpdated {
            policy_id,
            holder: *holder,
            cover_limit: new_cover_limit,
        });
        self.publish(events);

        info!(policy_id = %policy_id, from = current, to = new_cover_limit, "Cover limit updated");
        Ok(())
    }

    /// Zero the cover limit and start the withdrawal cooldown
    ///
    /// `pre_deactivate_cover_limit` stays set so the epoch in progress can
    /// still be billed.
    #[instrument(skip_all, fields(holder = %holder.short()))]
    pub async fn deactivate(&self, holder: &HolderId) -> Result<()> {
        let _gate = self.gate.read().await;
        let handle = self
            .existing(holder)
            .ok_or(PolicyStateError::InvalidPolicy)?;
        let mut guard = handle.lock_owned().await;
        let mut record = guard.clone();
        let params = self.params();

        let policy = record.live_policy().ok_or(PolicyStateError::InvalidPolicy)?;
        if !policy.is_active() {
            return Err(PolicyStateError::PolicyInactive.into());
        }
        let policy_id = policy.id;

        let reservation =
            self.capacity
                .reserve(&params.strategy, policy.cover_limit, 0, None)?;

        record.account.start_cooldown(self.now());
        let started_at = record.account.cooldown_start;
        if let Some(policy) = record.live_policy_mut() {
            policy.cover_limit = 0;
        }

        // Commit
        *guard = record;
        reservation.commit();
        self.metrics.policies_deactivated.inc();
        self.refresh_cover_gauge(&params.strategy);

        self.publish(vec![
            CoverEvent::CooldownStarted {
                holder: *holder,
                started_at,
            },
            CoverEvent::PolicyDeactivated {
                policy_id,
                holder: *holder,
            },
        ]);

        info!(policy_id = %policy_id, "Policy deactivated");
        Ok(())
    }

    /// Credit funds to a holder's account
    #[instrument(skip(self, holder), fields(holder = %holder.short()))]
    pub async fn deposit(&self, holder: &HolderId, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let _gate = self.gate.read().await;
        let handle = self.handle(holder);
        let mut guard = handle.lock_owned().await;
        let mut record = guard.clone();

        record.account.deposit(amount)?;
        self.collaborators.funds.transfer_in(holder, amount).await?;

        *guard = record;
        self.publish(vec![CoverEvent::DepositMade {
            holder: *holder,
            amount,
        }]);

        debug!("Deposit credited");
        Ok(())
    }

    /// Withdraw up to the withdrawable amount
    ///
    /// Once the cooldown has passed the whole balance is withdrawable and
    /// the deactivation window is closed.
    #[instrument(skip(self, holder), fields(holder = %holder.short()))]
    pub async fn withdraw(&self, holder: &HolderId, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let _gate = self.gate.read().await;
        let handle = self.existing(holder).ok_or(BalanceError::InsufficientBalance {
            requested: amount,
            withdrawable: 0,
        })?;
        let mut guard = handle.lock_owned().await;
        let mut record = guard.clone();
        let params = self.params();
        let now = self.now();

        let passed = record
            .account
            .cooldown_passed(now, params.cooldown_period_secs);
        let reserve = if passed {
            0
        } else {
            params
                .calculator
                .min_required_balance(record.pre_deactivate_cover())?
        };
        let withdrawable = record
            .account
            .withdrawable(now, params.cooldown_period_secs, reserve);
        if let Err(err) = record.account.debit_withdrawal(amount, withdrawable) {
            debug!(withdrawable, "Withdrawal rejected");
            return Err(err.into());
        }

        if passed {
            if let Some(policy) = record.live_policy_mut() {
                policy.pre_deactivate_cover_limit = 0;
            }
        }

        self.collaborators.funds.transfer_out(holder, amount).await?;

        *guard = record;
        self.publish(vec![CoverEvent::WithdrawMade {
            holder: *holder,
            amount,
        }]);

        info!(cooldown_passed = passed, "Withdrawal made");
        Ok(())
    }

    /// Overwrite a holder's reward points
    #[instrument(skip(self, caller, holder), fields(holder = %holder.short()))]
    pub async fn set_reward_points(
        &self,
        caller: &HolderId,
        holder: &HolderId,
        points: Amount,
    ) -> Result<()> {
        self.require_role(caller, Role::Governor)?;
        let _gate = self.gate.read().await;
        let handle = self.handle(holder);
        let mut guard = handle.lock_owned().await;

        guard.account.reward_points = points;
        self.publish(vec![CoverEvent::RewardPointsSet {
            holder: *holder,
            points,
        }]);

        info!("Reward points set");
        Ok(())
    }

    // Referral program

    /// Stateless checks on a referral code; returns the referrer to lock
    fn check_referral_code(
        holder: &HolderId,
        referral: Option<&ReferralCode>,
        params: &EngineParams,
    ) -> Result<Option<HolderId>> {
        let Some(code) = referral else {
            return Ok(None);
        };
        if !params.referrals_enabled {
            return Err(PolicyStateError::ReferralsDisabled.into());
        }
        if code.referrer == *holder {
            return Err(AuthorizationError::SelfReferral.into());
        }
        if !code.is_valid() {
            return Err(AuthorizationError::InvalidSignature.into());
        }
        Ok(Some(code.referrer))
    }

    /// Reward both sides of a referral on staged records
    fn apply_referral(
        holder: &HolderId,
        record: &mut HolderRecord,
        referrer_record: &mut HolderRecord,
        params: &EngineParams,
    ) -> Result<Vec<CoverEvent>> {
        let referrer = referrer_record
            .live_policy()
            .filter(|p| p.is_active())
            .map(|p| p.holder)
            .ok_or(PolicyStateError::ReferrerInactive)?;

        let policy = record
            .live_policy_mut()
            .ok_or(PolicyStateError::InvalidPolicy)?;
        if policy.referral_code_used {
            return Err(PolicyStateError::ReferralCodeUsed.into());
        }
        policy.referral_code_used = true;

        let reward = params.referral_reward;
        record.account.add_reward_points(reward)?;
        referrer_record.account.add_reward_points(reward)?;

        debug!(referrer = %referrer.short(), reward, "Referral applied");
        Ok(vec![
            CoverEvent::ReferralRewardEarned {
                holder: *holder,
                reward,
            },
            CoverEvent::ReferralRewardEarned {
                holder: referrer,
                reward,
            },
        ])
    }
}
