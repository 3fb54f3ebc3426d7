//! Decimal money helpers.
//!
//! All KES/USD amounts are `rust_decimal::Decimal`. Floating point is never
//! used for money: the quote engine and funding verifier both depend on
//! exact rounding behavior that `f64` cannot guarantee.

use rust_decimal::Decimal;
use rust_decimal::prelude::*;

/// Round to 2 decimal places (KES display/storage precision), half-up.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn is_finite_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
