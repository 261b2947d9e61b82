//! 18-decimal fixed point amounts
//!
//! All balances, cover limits and premiums are integers scaled by [`WAD`].
//! Conversions to [`Decimal`] exist for configuration files and log output;
//! engine arithmetic never goes through `Decimal`.

use rust_decimal::Decimal;

use crate::error::ArithmeticError;

/// Fixed point amount with 18 implied decimals
pub type Amount = u128;

/// One whole unit
pub const WAD: Amount = 1_000_000_000_000_000_000;

/// Number of implied decimals
pub const DECIMALS: u32 = 18;

/// Whole units to fixed point
pub const fn units(whole: u64) -> Amount {
    whole as Amount * WAD
}

/// Fixed point to `Decimal`
pub fn to_decimal(amount: Amount) -> Result<Decimal, ArithmeticError> {
    let mantissa = i128::try_from(amount).map_err(|_| ArithmeticError::Overflow)?;
    Decimal::try_from_i128_with_scale(mantissa, DECIMALS).map_err(|_| ArithmeticError::Overflow)
}

/// `Decimal` to fixed point, truncating digits past the 18th decimal
pub fn from_decimal(value: Decimal) -> Result<Amount, ArithmeticError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ArithmeticError::Underflow);
    }

    let mantissa = value.mantissa().unsigned_abs();
    let scale = value.scale();

    if scale <= DECIMALS {
        let factor = 10u128.pow(DECIMALS - scale);
        mantissa.checked_mul(factor).ok_or(ArithmeticError::Overflow)
    } else {
        Ok(mantissa / 10u128.pow(scale - DECIMALS))
    }
}

/// Human readable rendering for logs
pub fn display(amount: Amount) -> String {
    match to_decimal(amount) {
        Ok(value) => value.normalize().to_string(),
        Err(_) => format!("{amount}e-18"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_units() {
        assert_eq!(units(1), WAD);
        assert_eq!(units(1000), 1_000 * WAD);
    }

    #[test]
    fn test_decimal_conversion() {
        assert_eq!(from_decimal(dec!(0.5)).unwrap(), WAD / 2);
        assert_eq!(from_decimal(dec!(1000)).unwrap(), units(1000));
        assert_eq!(to_decimal(WAD / 2).unwrap(), dec!(0.5));
    }

    #[test]
    fn test_from_decimal_truncates() {
        // 19th decimal dropped
        let value = Decimal::from_i128_with_scale(15, 19);
        assert_eq!(from_decimal(value).unwrap(), 1);
    }

    #[test]
    fn test_negative_rejected() {
        assert_eq!(from_decimal(dec!(-1)), Err(ArithmeticError::Underflow));
        assert_eq!(from_decimal(dec!(0)).unwrap(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(display(units(999) + WAD / 2), "999.5");
    }
}
