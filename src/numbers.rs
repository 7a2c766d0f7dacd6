// 1.5: safe numeric parsing and rounding helpers.
// feeds send numbers as strings. bad strings become None (or zero), never a panic.

use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Parses a decimal string, accepting plain and scientific notation.
/// Returns `None` for empty or unparseable input.
pub fn maybe_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

/// Like [`maybe_decimal`] but falls back to zero.
pub fn must_decimal(raw: &str) -> Decimal {
    maybe_decimal(raw).unwrap_or(Decimal::ZERO)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// away from zero
    Up,
    /// toward zero
    Down,
    /// nearest, ties away from zero
    HalfUp,
}

impl Rounding {
    fn strategy(self) -> RoundingStrategy {
        match self {
            Rounding::Up => RoundingStrategy::AwayFromZero,
            Rounding::Down => RoundingStrategy::ToZero,
            Rounding::HalfUp => RoundingStrategy::MidpointAwayFromZero,
        }
    }
}

/// Rounds `value` to an integer multiple of `factor`. A non-positive factor,
/// or one so small the step count doesn't fit, leaves the value alone.
pub fn round_to_factor(value: Decimal, factor: Decimal, rounding: Rounding) -> Decimal {
    if factor <= Decimal::ZERO {
        return value;
    }
    value
        .checked_div(factor)
        .map(|steps| steps.round_dp_with_strategy(0, rounding.strategy()))
        .and_then(|steps| steps.checked_mul(factor))
        .map(|rounded| rounded.normalize())
        .unwrap_or(value)
}

/// Rounds to `dp` decimal places, ties away from zero.
pub fn round_dp_half_up(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Significant decimal places once trailing zeros are dropped ("0.010" -> 2).
pub fn decimal_places(value: Decimal) -> u32 {
    value.normalize().scale()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_plain_and_scientific() {
        assert_eq!(maybe_decimal("50000.5"), Some(dec!(50000.5)));
        assert_eq!(maybe_decimal(" -2 "), Some(dec!(-2)));
        assert_eq!(maybe_decimal("1e-5"), Some(dec!(0.00001)));
    }

    #[test]
    fn malformed_input_is_none_or_zero() {
        assert_eq!(maybe_decimal(""), None);
        assert_eq!(maybe_decimal("NaN"), None);
        assert_eq!(maybe_decimal("12abc"), None);
        assert_eq!(must_decimal("garbage"), Decimal::ZERO);
    }

    #[test]
    fn rounds_to_factor() {
        assert_eq!(round_to_factor(dec!(101.3), dec!(5), Rounding::Up), dec!(105));
        assert_eq!(round_to_factor(dec!(101.3), dec!(5), Rounding::Down), dec!(100));
        assert_eq!(round_to_factor(dec!(102.5), dec!(5), Rounding::HalfUp), dec!(105));
        assert_eq!(round_to_factor(dec!(102.4), dec!(5), Rounding::HalfUp), dec!(100));
        assert_eq!(round_to_factor(dec!(0.123), dec!(0.01), Rounding::Up), dec!(0.13));
        assert_eq!(round_to_factor(dec!(7), Decimal::ZERO, Rounding::Up), dec!(7));
    }

    #[test]
    fn factor_too_fine_for_value_leaves_it_alone() {
        assert_eq!(round_to_factor(Decimal::MAX, dec!(0.001), Rounding::Up), Decimal::MAX);
    }

    #[test]
    fn counts_decimal_places() {
        assert_eq!(decimal_places(dec!(0.010)), 2);
        assert_eq!(decimal_places(dec!(1)), 0);
        assert_eq!(decimal_places(dec!(0.0001)), 4);
    }

    #[test]
    fn half_up_precision() {
        assert_eq!(round_dp_half_up(dec!(1.0000005), 6), dec!(1.000001));
        assert_eq!(round_dp_half_up(dec!(-1.0000005), 6), dec!(-1.000001));
    }
}
