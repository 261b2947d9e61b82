//! Checked arithmetic for cover amounts
//!
//! Cover changes are expressed as a signed delta against an unsigned running
//! total. [`apply_delta`] fails cleanly instead of wrapping.

use crate::error::ArithmeticError;
use crate::types::units::Amount;

/// Apply a signed delta to an unsigned total
pub fn apply_delta(current: Amount, delta: i128) -> Result<Amount, ArithmeticError> {
    if delta >= 0 {
        current
            .checked_add(delta.unsigned_abs())
            .ok_or(ArithmeticError::Overflow)
    } else {
        current
            .checked_sub(delta.unsigned_abs())
            .ok_or(ArithmeticError::Underflow)
    }
}

/// Signed difference `to - from`
pub fn signed_delta(from: Amount, to: Amount) -> Result<i128, ArithmeticError> {
    if to >= from {
        i128::try_from(to - from).map_err(|_| ArithmeticError::Overflow)
    } else {
        i128::try_from(from - to)
            .map(|d| -d)
            .map_err(|_| ArithmeticError::Underflow)
    }
}

/// `a * b * c / d` with floor division and overflow detection
pub fn checked_mul_div(a: Amount, b: u128, c: u128, d: u128) -> Result<Amount, ArithmeticError> {
    if d == 0 {
        return Err(ArithmeticError::DivisionByZero);
    }
    let product = a
        .checked_mul(b)
        .and_then(|x| x.checked_mul(c))
        .ok_or(ArithmeticError::Overflow)?;
    Ok(product / d)
}
