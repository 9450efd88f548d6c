//! Decimal parsing and rounding.
//!
//! Upstream values arrive as decimal strings (or occasionally JSON numbers).
//! They are parsed exactly as `BigDecimal` and rounded half-up to cents before
//! anything else sees them, so storage and comparisons never drift.

use bigdecimal::{BigDecimal, RoundingMode};
use serde_json::Value;
use std::str::FromStr;

/// Parse a JSON string or number as an exact decimal.
pub fn parse_decimal(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::String(s) => BigDecimal::from_str(s.trim()).ok(),
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Round half-up to 2 fractional digits (5.555 -> 5.56, 5.554 -> 5.55).
pub fn round_to_cents(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(2, RoundingMode::HalfUp)
}

/// Convert to the nearest f64, rejecting values that do not fit.
///
/// Goes through the decimal string so 5.56 becomes exactly the f64 literal
/// `5.56` and not a scaled product like 5.5600000000000005.
pub fn decimal_to_f64(value: &BigDecimal) -> Option<f64> {
    value
        .to_string()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}
