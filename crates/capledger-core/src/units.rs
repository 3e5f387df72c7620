//! Amount arithmetic helpers.
//!
//! Token amounts and multipliers exceed 64-bit range after repeated splits,
//! so everything runs on 256-bit integers with checked arithmetic; amounts
//! cross the persistence boundary as decimal strings, never floats.

use alloy_primitives::{I256, U256};

use crate::error::LedgerError;

/// Fixed-point unit the contract-level split multiplier is expressed in.
///
/// `readSplitMultiplier` returns `N * 1e18` for a cumulative N× split.
pub const MULTIPLIER_BASE: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Scale a raw amount by a fixed-point multiplier: `raw * mult_fp / 1e18`.
pub fn scale_fixed_point(raw: U256, mult_fp: U256) -> Result<U256, LedgerError> {
    let scaled = raw
        .checked_mul(mult_fp)
        .ok_or_else(|| LedgerError::integrity(format!("overflow scaling {raw} by {mult_fp}")))?;
    Ok(scaled / MULTIPLIER_BASE)
}

/// Checked product of two integer multipliers.
pub fn checked_mul(a: U256, b: U256) -> Result<U256, LedgerError> {
    a.checked_mul(b)
        .ok_or_else(|| LedgerError::integrity(format!("multiplier overflow: {a} * {b}")))
}

/// Parse a decimal-string-encoded unsigned amount.
pub fn parse_amount(s: &str) -> Result<U256, LedgerError> {
    s.parse::<U256>()
        .map_err(|e| LedgerError::Storage(format!("bad amount '{s}': {e}")))
}

/// Parse a decimal-string-encoded signed balance.
pub fn parse_balance(s: &str) -> Result<I256, LedgerError> {
    s.parse::<I256>()
        .map_err(|e| LedgerError::Storage(format!("bad balance '{s}': {e}")))
}

/// Convert a signed projection balance to its positive magnitude, if any.
pub fn positive(balance: I256) -> Option<U256> {
    if balance.is_positive() {
        Some(balance.unsigned_abs())
    } else {
        None
    }
}

/// Widen an unsigned amount into the signed domain used during projection.
pub fn to_signed(amount: U256) -> Result<I256, LedgerError> {
    I256::try_from(amount)
        .map_err(|_| LedgerError::integrity(format!("amount out of signed range: {amount}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_is_1e18() {
        assert_eq!(MULTIPLIER_BASE, U256::from(10).pow(U256::from(18)));
    }

    #[test]
    fn scale_fixed_point_identity() {
        let raw = U256::from(3000);
        assert_eq!(scale_fixed_point(raw, MULTIPLIER_BASE).unwrap(), raw);
    }

    #[test]
    fn scale_fixed_point_seven_x() {
        let raw = U256::from(3000);
        let seven = MULTIPLIER_BASE * U256::from(7);
        assert_eq!(scale_fixed_point(raw, seven).unwrap(), U256::from(21000));
    }

    #[test]
    fn amount_string_roundtrip() {
        let big = U256::from(10).pow(U256::from(30)); // beyond u64
        assert_eq!(parse_amount(&big.to_string()).unwrap(), big);
    }

    #[test]
    fn balance_string_roundtrip_negative() {
        let neg = I256::try_from(-42i64).unwrap();
        assert_eq!(parse_balance(&neg.to_string()).unwrap(), neg);
    }

    #[test]
    fn positive_filters_non_positive() {
        assert_eq!(positive(I256::ZERO), None);
        assert_eq!(positive(I256::try_from(-1i64).unwrap()), None);
        assert_eq!(
            positive(I256::try_from(5i64).unwrap()),
            Some(U256::from(5))
        );
    }
}
