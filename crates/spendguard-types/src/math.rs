//! Small numeric helpers shared by the stats producers.
//!
//! Ratios are computed in [`Decimal`] and converted once at the end, which
//! keeps integer-to-float casts out of the accounting code.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// `numerator / denominator` as `f64`, or 0 when the denominator is 0.
pub fn ratio(numerator: u64, denominator: u64) -> f64 {
    Decimal::from(numerator)
        .checked_div(Decimal::from(denominator))
        .and_then(|r| r.to_f64())
        .unwrap_or(0.0)
}

/// `100 * part / whole`, or 0 when `whole` is 0.
pub fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    part.checked_div(whole)
        .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_of_zero_denominator_is_zero() {
        assert!(ratio(5, 0).abs() < f64::EPSILON);
        assert!((ratio(1, 4) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn percent_of_whole() {
        assert_eq!(percent_of(Decimal::new(25, 0), Decimal::new(200, 0)), Decimal::new(125, 1));
        assert_eq!(percent_of(Decimal::ONE, Decimal::ZERO), Decimal::ZERO);
    }
}
