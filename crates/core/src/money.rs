//! Monetary amounts.
//!
//! Amounts are exact decimals in major currency units (e.g. rupees with two
//! fractional digits). Floating point never touches a total.

use core::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value as JsonValue;

/// Exact monetary amount in major currency units.
pub type Amount = Decimal;

/// Fractional digits of the settlement currency (paise).
pub const CURRENCY_SCALE: u32 = 2;

/// Round to the settlement currency's minor unit, half away from zero.
pub fn to_currency_precision(amount: Amount) -> Amount {
    amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `true` when `actual` is within `tolerance` of `expected` (inclusive).
pub fn within_tolerance(expected: Amount, actual: Amount, tolerance: Amount) -> bool {
    (expected - actual).abs() <= tolerance
}

/// Parse an amount from an untrusted JSON value.
///
/// Accepts JSON numbers and numeric strings. The number is parsed from its
/// textual form so `100.011` stays `100.011` instead of its nearest binary
/// float. Anything else yields `None`.
pub fn amount_from_json(value: &JsonValue) -> Option<Amount> {
    match value {
        JsonValue::Number(n) => parse_decimal(&n.to_string()),
        JsonValue::String(s) => parse_decimal(s.trim()),
        _ => None,
    }
}

fn parse_decimal(s: &str) -> Option<Amount> {
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn tolerance_is_inclusive() {
        let tol = dec!(0.01);
        assert!(within_tolerance(dec!(100.00), dec!(100.01), tol));
        assert!(!within_tolerance(dec!(100.00), dec!(100.02), tol));
        assert!(within_tolerance(dec!(100.00), dec!(99.99), tol));
    }

    #[test]
    fn currency_precision_rounds_half_away_from_zero() {
        assert_eq!(to_currency_precision(dec!(100.011)), dec!(100.01));
        assert_eq!(to_currency_precision(dec!(100.015)), dec!(100.02));
        assert_eq!(to_currency_precision(dec!(-0.005)), dec!(-0.01));
    }

    #[test]
    fn json_numbers_keep_their_textual_precision() {
        assert_eq!(amount_from_json(&json!(100.011)), Some(dec!(100.011)));
        assert_eq!(amount_from_json(&json!(42)), Some(dec!(42)));
        assert_eq!(amount_from_json(&json!("19.99")), Some(dec!(19.99)));
    }

    #[test]
    fn non_numeric_json_is_rejected() {
        assert_eq!(amount_from_json(&json!(null)), None);
        assert_eq!(amount_from_json(&json!("abc")), None);
        assert_eq!(amount_from_json(&json!("")), None);
        assert_eq!(amount_from_json(&json!({"v": 1})), None);
    }
}
