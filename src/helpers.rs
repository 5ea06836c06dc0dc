//! Shared helpers for coordinate Decimal conversions.
//!
//! Coordinates are stored as exact decimals so that the textual coordinate a
//! client sends ("24.026") matches the one the extraction step wrote into its
//! metadata header, regardless of binary floating-point representation.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse a decimal from text, accepting plain and scientific notation.
pub(crate) fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
        .map(|d| d.normalize())
}

/// Convert a JSON number (or numeric string) to a Decimal.
///
/// Numbers go through their shortest textual form, so `24.026` stays exactly
/// `24.026` instead of picking up f64 noise.
pub(crate) fn json_to_decimal(v: &serde_json::Value) -> Option<Decimal> {
    match v {
        serde_json::Value::Number(n) => parse_decimal(&n.to_string()),
        serde_json::Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

/// Convert a Decimal to f64, defaulting to 0.0 for values that can't be represented.
pub(crate) fn dec_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Whether a latitude/longitude pair lies on the globe.
pub(crate) fn is_valid_coordinate(latitude: Decimal, longitude: Decimal) -> bool {
    let lat_bound = Decimal::from(90);
    let lon_bound = Decimal::from(180);
    latitude.abs() <= lat_bound && longitude.abs() <= lon_bound
}
