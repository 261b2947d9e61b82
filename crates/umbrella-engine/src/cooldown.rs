//! Withdrawal cooldown
//!
//! A holder may withdraw their whole balance only once the cooldown started
//! by deactivation has elapsed. Until then only the excess above one
//! epoch's reserve is withdrawable. Any activation or cover change exits the
//! cooldown.

use serde::{Deserialize, Serialize};

/// Sentinel for "cooldown not started"
pub const NOT_STARTED: u64 = 0;

/// Cooldown status of an account at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownState {
    NotStarted,
    Cooling { started_at: u64 },
    Passed { started_at: u64 },
}

impl CooldownState {
    pub fn evaluate(cooldown_start: u64, now: u64, period_secs: u64) -> Self {
        if cooldown_start == NOT_STARTED {
            CooldownState::NotStarted
        } else if has_passed(cooldown_start, now, period_secs) {
            CooldownState::Passed {
                started_at: cooldown_start,
            }
        } else {
            CooldownState::Cooling {
                started_at: cooldown_start,
            }
        }
    }

    pub fn has_passed(&self) -> bool {
        matches!(self, CooldownState::Passed { .. })
    }
}

/// `cooldown_start != 0 && now >= cooldown_start + period`
pub fn has_passed(cooldown_start: u64, now: u64, period_secs: u64) -> bool {
    cooldown_start != NOT_STARTED && now >= cooldown_start.saturating_add(period_secs)
}
