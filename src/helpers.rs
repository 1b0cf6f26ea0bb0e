//! Shared helpers for Decimal ↔ f64 conversions.
//!
//! Coordinates and distances are stored as NUMERIC and surfaced to clients as
//! f64. Geocoder output is converted with full precision so that a stored
//! latitude/longitude is exactly what the geocoder returned.
//!
//! `f64_to_decimal_full` returns `Decimal::ZERO` for non-finite inputs
//! (NaN, ±Inf).

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Convert an f64 to Decimal preserving full precision.
pub(crate) fn f64_to_decimal_full(v: f64) -> Decimal {
    if !v.is_finite() {
        tracing::warn!(
            "f64_to_decimal_full received non-finite value {}, defaulting to 0",
            v
        );
        return Decimal::ZERO;
    }
    Decimal::from_f64(v).unwrap_or_else(|| Decimal::new(v as i64, 0))
}

/// Convert a Decimal to f64, defaulting to 0.0 for values that can't be represented.
///
/// Replaces the repeated pattern `some_decimal.to_f64().unwrap_or(0.0)`.
pub(crate) fn dec_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Convert an Option<Decimal> to Option<f64>.
pub(crate) fn opt_dec_to_f64(d: Option<Decimal>) -> Option<f64> {
    d.and_then(|v| v.to_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_f64_to_decimal_full_normal() {
        let d = f64_to_decimal_full(40.0149856);
        assert!((d.to_f64().unwrap() - 40.0149856).abs() < 1e-9);
    }

    #[test]
    fn test_f64_to_decimal_full_nan() {
        assert_eq!(f64_to_decimal_full(f64::NAN), Decimal::ZERO);
    }

    #[test]
    fn test_f64_to_decimal_full_infinity() {
        assert_eq!(f64_to_decimal_full(f64::INFINITY), Decimal::ZERO);
        assert_eq!(f64_to_decimal_full(f64::NEG_INFINITY), Decimal::ZERO);
    }

    #[test]
    fn test_dec_to_f64_normal() {
        let d = Decimal::from_str("-105.27").unwrap();
        assert!((dec_to_f64(d) + 105.27).abs() < 1e-10);
    }

    #[test]
    fn test_dec_to_f64_zero() {
        assert_eq!(dec_to_f64(Decimal::ZERO), 0.0);
    }

    #[test]
    fn test_opt_dec_to_f64() {
        assert_eq!(opt_dec_to_f64(None), None);
        let d = Decimal::from_str("40.0").unwrap();
        assert!((opt_dec_to_f64(Some(d)).unwrap() - 40.0).abs() < 1e-10);
    }
}
