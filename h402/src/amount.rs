//! Exact conversion between human-readable amounts and smallest units.
//!
//! Payment amounts arrive on the wire as decimal strings and leave as
//! integer token units (wei, lamports, token base units). Every
//! conversion here runs on [`Decimal`] and [`U256`]; no floating point
//! is involved at any step, so `1.1` at 6 decimals is exactly
//! `1_100_000` and never `1_099_999`.

use alloy_primitives::U256;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Errors produced by amount conversion.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AmountError {
    /// Negative amounts are never valid payment values.
    #[error("negative amount: {0}")]
    Negative(Decimal),
    /// The amount string could not be interpreted as an integer unit
    /// count.
    #[error("invalid amount: {0}")]
    Invalid(String),
    /// The value does not fit the target representation.
    #[error("amount {0} out of range at {1} decimals")]
    OutOfRange(String, u8),
}

/// `10^decimals` as a [`U256`].
#[must_use]
pub fn unit_scale(decimals: u8) -> U256 {
    U256::from(10u64).pow(U256::from(decimals))
}

/// Converts a human-readable decimal amount into smallest units.
///
/// Fractional digits beyond `decimals` are truncated, not rounded: a
/// requirement of `0.1234567` USDC (6 decimals) converts to `123456`
/// units. The integer and fractional parts are shifted as decimal
/// strings, so the conversion is exact for every representable input.
///
/// # Errors
///
/// Returns [`AmountError::Negative`] for negative input and
/// [`AmountError::OutOfRange`] if the scaled value overflows 256 bits.
pub fn to_smallest_unit(amount: Decimal, decimals: u8) -> Result<U256, AmountError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(AmountError::Negative(amount));
    }

    let text = amount.normalize().to_string();
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), ""));

    let mut frac = frac_part.to_owned();
    frac.truncate(decimals as usize);
    while frac.len() < decimals as usize {
        frac.push('0');
    }

    let int_units = parse_decimal_digits(int_part)?;
    let frac_units = if frac.is_empty() {
        U256::ZERO
    } else {
        parse_decimal_digits(&frac)?
    };

    int_units
        .checked_mul(unit_scale(decimals))
        .and_then(|scaled| scaled.checked_add(frac_units))
        .ok_or_else(|| AmountError::OutOfRange(text, decimals))
}

/// Converts a smallest-unit count back into a human-readable decimal.
///
/// # Errors
///
/// Returns [`AmountError::OutOfRange`] when the value exceeds
/// [`Decimal`]'s 96-bit mantissa.
pub fn to_human_readable(amount: U256, decimals: u8) -> Result<Decimal, AmountError> {
    let text = format_units(amount, decimals);
    Decimal::from_str(&text).map_err(|_| AmountError::OutOfRange(text, decimals))
}

/// Formats a smallest-unit count as a decimal string, trimming trailing
/// fractional zeros. `1500000` at 6 decimals renders as `1.5`, and
/// `1000000` as `1`.
#[must_use]
pub fn format_units(amount: U256, decimals: u8) -> String {
    let scale = unit_scale(decimals);
    let quotient = amount / scale;
    let remainder = amount % scale;

    if remainder.is_zero() {
        return quotient.to_string();
    }

    let mut frac = remainder.to_string();
    while frac.len() < decimals as usize {
        frac.insert(0, '0');
    }
    let frac = frac.trim_end_matches('0');
    format!("{quotient}.{frac}")
}

/// Rounds `amount` to at most `decimals` fractional digits and trims
/// trailing zeros, for display. `1.2300` at 2 renders as `1.23`, `1.0`
/// as `1`.
#[must_use]
pub fn format_with_precision(amount: Decimal, decimals: u8) -> String {
    let rounded = amount.round_dp(u32::from(decimals));
    let text = rounded.to_string();
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_owned()
    } else {
        text
    }
}

fn parse_decimal_digits(digits: &str) -> Result<U256, AmountError> {
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 10).map_err(|_| AmountError::Invalid(digits.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn exact_fractional_scaling() {
        assert_eq!(
            to_smallest_unit(dec("1.1"), 6).unwrap(),
            U256::from(1_100_000u64)
        );
        assert_eq!(
            to_smallest_unit(dec("0.000001"), 6).unwrap(),
            U256::from(1u64)
        );
        assert_eq!(
            to_smallest_unit(dec("1.5"), 18).unwrap(),
            U256::from(1_500_000_000_000_000_000u64)
        );
    }

    #[test]
    fn excess_digits_truncate() {
        assert_eq!(
            to_smallest_unit(dec("0.1234567"), 6).unwrap(),
            U256::from(123_456u64)
        );
    }

    #[test]
    fn zero_decimals_drops_fraction() {
        assert_eq!(to_smallest_unit(dec("7.9"), 0).unwrap(), U256::from(7u64));
    }

    #[test]
    fn negative_amounts_rejected() {
        assert!(matches!(
            to_smallest_unit(dec("-0.5"), 6),
            Err(AmountError::Negative(_))
        ));
    }

    #[test]
    fn round_trip_within_precision() {
        for (text, decimals) in [("1.5", 6u8), ("0.01", 18), ("42", 9), ("123.456789", 6)] {
            let amount = dec(text);
            let units = to_smallest_unit(amount, decimals).unwrap();
            assert_eq!(to_human_readable(units, decimals).unwrap(), amount);
        }
    }

    #[test]
    fn format_units_trims_trailing_zeros() {
        assert_eq!(format_units(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_units(U256::from(1_000_000u64), 6), "1");
        assert_eq!(format_units(U256::from(1u64), 6), "0.000001");
        assert_eq!(format_units(U256::ZERO, 18), "0");
    }

    #[test]
    fn precision_formatting() {
        assert_eq!(format_with_precision(dec("1.2300"), 2), "1.23");
        assert_eq!(format_with_precision(dec("1.0"), 2), "1");
        assert_eq!(format_with_precision(dec("0.016"), 2), "0.02");
        assert_eq!(format_with_precision(dec("50"), 6), "50");
    }

    #[test]
    fn formatting_is_idempotent() {
        for text in ["1.23", "0.5", "100", "0.000001"] {
            let once = format_with_precision(dec(text), 6);
            let twice = format_with_precision(dec(&once), 6);
            assert_eq!(once, twice);
        }
    }
}
