//! Premium calculation
//!
//! ```text
//! premium = cover_limit * duration_secs * rate_numerator / rate_denominator
//! ```
//!
//! Floor division throughout: amounts are reproduced exactly, never rounded
//! up. The per-epoch reserve a holder must keep is the premium for one
//! charge cycle.

use serde::{Deserialize, Serialize};
use umbrella_common::{math, Amount, ArithmeticError, Result, UmbrellaError};

/// Premium rate per unit of cover per second, as a fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremiumRate {
    pub numerator: u128,
    pub denominator: u128,
}

impl PremiumRate {
    pub fn new(numerator: u128, denominator: u128) -> Result<Self> {
        if denominator == 0 {
            return Err(UmbrellaError::Config(
                "premium rate denominator must be non-zero".into(),
            ));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }
}

/// Premium owed for `cover_limit` over `duration_secs`
pub fn premium_for(
    cover_limit: Amount,
    duration_secs: u64,
    rate: PremiumRate,
) -> std::result::Result<Amount, ArithmeticError> {
    math::checked_mul_div(
        cover_limit,
        duration_secs as u128,
        rate.numerator,
        rate.denominator,
    )
}

/// Outcome of repricing a policy mid-term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PremiumDelta {
    /// Holder owes the difference
    Charge(Amount),
    /// Holder is owed the difference
    Refund(Amount),
    /// Nothing changes hands
    Settled,
}

impl PremiumDelta {
    /// Compare a freshly computed premium with what was already paid
    pub fn between(new_premium: Amount, already_paid: Amount) -> Self {
        if new_premium > already_paid {
            PremiumDelta::Charge(new_premium - already_paid)
        } else if new_premium < already_paid {
            PremiumDelta::Refund(already_paid - new_premium)
        } else {
            PremiumDelta::Settled
        }
    }
}

/// Premium calculator bound to a rate and a charge cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PremiumCalculator {
    rate: PremiumRate,
    charge_cycle_secs: u64,
}

impl PremiumCalculator {
    pub fn new(rate: PremiumRate, charge_cycle_secs: u64) -> Self {
        Self {
            rate,
            charge_cycle_secs,
        }
    }

    pub fn rate(&self) -> PremiumRate {
        self.rate
    }

    pub fn charge_cycle_secs(&self) -> u64 {
        self.charge_cycle_secs
    }

    pub fn premium_for(
        &self,
        cover_limit: Amount,
        duration_secs: u64,
    ) -> std::result::Result<Amount, ArithmeticError> {
        premium_for(cover_limit, duration_secs, self.rate)
    }

    /// Maximum a single epoch can charge; the withdrawal reserve floor
    pub fn min_required_balance(
        &self,
        cover_limit: Amount,
    ) -> std::result::Result<Amount, ArithmeticError> {
        self.premium_for(cover_limit, self.charge_cycle_secs)
    }
}
