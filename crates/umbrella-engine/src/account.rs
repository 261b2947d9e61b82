//! Account ledger
//!
//! Each policyholder has one account holding deposited funds (`balance`) and
//! a separate reward-point credit. Billing draws reward points first; only
//! the balance-drawn portion counts toward `premium_paid`, which gates
//! referral rewards and must not be inflatable with granted points.

use serde::{Deserialize, Serialize};
use umbrella_common::{Amount, ArithmeticError, BalanceError};

use crate::cooldown::{self, CooldownState, NOT_STARTED};

/// Per-holder funds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Deposited funds available to pay premiums
    pub balance: Amount,
    /// Credit consumed before `balance` during billing
    pub reward_points: Amount,
    /// Cumulative premium drawn from `balance`; never decreases
    pub premium_paid: Amount,
    /// Unix seconds the withdrawal cooldown began, or 0
    pub cooldown_start: u64,
}

/// Result of charging one epoch's premium
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// Premium covered in full
    Full {
        from_points: Amount,
        from_balance: Amount,
    },
    /// Funds exhausted; the policy must be deactivated
    Partial {
        due: Amount,
        from_points: Amount,
        from_balance: Amount,
    },
}

impl ChargeOutcome {
    /// Total drawn from the account
    pub fn charged(&self) -> Amount {
        match *self {
            ChargeOutcome::Full {
                from_points,
                from_balance,
            }
            | ChargeOutcome::Partial {
                from_points,
                from_balance,
                ..
            } => from_points + from_balance,
        }
    }

    /// Portion backed by deposited funds
    pub fn from_balance(&self) -> Amount {
        match *self {
            ChargeOutcome::Full { from_balance, .. }
            | ChargeOutcome::Partial { from_balance, .. } => from_balance,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, ChargeOutcome::Partial { .. })
    }
}

impl Account {
    pub fn deposit(&mut self, amount: Amount) -> Result<(), ArithmeticError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(ArithmeticError::Overflow)?;
        Ok(())
    }

    pub fn add_reward_points(&mut self, points: Amount) -> Result<(), ArithmeticError> {
        self.reward_points = self
            .reward_points
            .checked_add(points)
            .ok_or(ArithmeticError::Overflow)?;
        Ok(())
    }

    /// Funds billing may draw on
    pub fn billable_funds(&self, use_points: bool) -> Amount {
        if use_points {
            self.balance.saturating_add(self.reward_points)
        } else {
            self.balance
        }
    }

    /// Charge one epoch's premium, reward points first
    ///
    /// When funds fall short both sources are drained and the outcome is
    /// `Partial`; nothing ever goes negative.
    pub fn charge_epoch(
        &mut self,
        premium_due: Amount,
        use_points: bool,
    ) -> Result<ChargeOutcome, ArithmeticError> {
        let points = if use_points { self.reward_points } else { 0 };

        if self.billable_funds(use_points) >= premium_due {
            let from_points = points.min(premium_due);
            let from_balance = premium_due - from_points;
            self.reward_points -= from_points;
            self.balance -= from_balance;
            self.record_paid(from_balance)?;
            return Ok(ChargeOutcome::Full {
                from_points,
                from_balance,
            });
        }

        let from_points = points;
        let from_balance = self.balance;
        self.reward_points -= from_points;
        self.balance = 0;
        self.record_paid(from_balance)?;
        Ok(ChargeOutcome::Partial {
            due: premium_due,
            from_points,
            from_balance,
        })
    }

    fn record_paid(&mut self, amount: Amount) -> Result<(), ArithmeticError> {
        self.premium_paid = self
            .premium_paid
            .checked_add(amount)
            .ok_or(ArithmeticError::Overflow)?;
        Ok(())
    }

    pub fn cooldown_state(&self, now: u64, period_secs: u64) -> CooldownState {
        CooldownState::evaluate(self.cooldown_start, now, period_secs)
    }

    pub fn cooldown_passed(&self, now: u64, period_secs: u64) -> bool {
        cooldown::has_passed(self.cooldown_start, now, period_secs)
    }

    /// Stamp the cooldown start; 0 is reserved for "not started"
    pub fn start_cooldown(&mut self, now: u64) {
        self.cooldown_start = now.max(1);
    }

    /// Leave the cooldown; returns whether one was running
    pub fn exit_cooldown(&mut self) -> bool {
        let was_started = self.cooldown_start != NOT_STARTED;
        self.cooldown_start = NOT_STARTED;
        was_started
    }

    /// Amount withdrawable now: everything once the cooldown passed,
    /// otherwise the excess above `reserve`
    pub fn withdrawable(&self, now: u64, period_secs: u64, reserve: Amount) -> Amount {
        if self.cooldown_passed(now, period_secs) {
            self.balance
        } else {
            self.balance.saturating_sub(reserve)
        }
    }

    pub fn debit_withdrawal(
        &mut self,
        amount: Amount,
        withdrawable: Amount,
    ) -> Result<(), BalanceError> {
        if amount > withdrawable || amount > self.balance {
            return Err(BalanceError::InsufficientBalance {
                requested: amount,
                withdrawable,
            });
        }
        self.balance -= amount;
        Ok(())
    }
}
