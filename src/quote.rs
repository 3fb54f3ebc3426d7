//! Quote Engine — `spec.md` §4.1.
//!
//! Prices a request, computes fees, and produces a time-bounded quote
//! record. Every KES/USD quantity here is `rust_decimal::Decimal`; no
//! floating point enters the calculation.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use uuid::Uuid;

use crate::domain::money::{is_finite_positive, round2};
use crate::domain::{Currency, FlowType, Quote};
use crate::errors::{CoreError, CoreResult};

pub struct QuoteRequest {
    pub flow_type: FlowType,
    pub amount: f64,
    pub currency: Currency,
    pub kes_per_usd_override: Option<Decimal>,
}

fn network_fee_kes(flow_type: FlowType) -> Decimal {
    if flow_type == FlowType::Onramp {
        Decimal::ZERO
    } else {
        Decimal::from_i32(3).unwrap()
    }
}

fn fee_floor_kes() -> Decimal {
    Decimal::from_i32(5).unwrap()
}

/// Builds a [`Quote`] per `spec.md` §4.1.
///
/// `default_rate` is `KES_PER_USD` from configuration; `ttl_secs` is
/// `MPESA_QUOTE_TTL_SECONDS`.
pub fn build_quote(req: QuoteRequest, default_rate: Decimal, ttl_secs: i64) -> CoreResult<Quote> {
    if !is_finite_positive(req.amount) {
        return Err(CoreError::validation(
            "amount must be a positive, finite number",
        ));
    }
    let rate = match req.kes_per_usd_override {
        Some(r) if r > Decimal::ZERO => r,
        _ => default_rate,
    };
    if rate <= Decimal::ZERO {
        return Err(CoreError::validation("rate must be positive"));
    }

    let amount_requested =
        Decimal::from_f64_retain(req.amount).ok_or_else(|| CoreError::validation("amount is not finite"))?;

    let (amount_kes, amount_usd) = match req.currency {
        Currency::KES => (amount_requested, round2(amount_requested / rate)),
        Currency::USD => (round2(amount_requested * rate), amount_requested),
    };

    let bps = Decimal::from_u32(req.flow_type.fee_bps()).unwrap();
    let raw_fee = amount_kes * bps / Decimal::from_i32(10_000).unwrap();
    let fee_amount_kes = round2(raw_fee.max(fee_floor_kes()));
    let network_fee = network_fee_kes(req.flow_type);
    let total_debit_kes = round2(amount_kes + fee_amount_kes + network_fee);

    let snapshot_at = Utc::now();
    let expires_at = snapshot_at + Duration::seconds(ttl_secs);

    Ok(Quote {
        quote_id: Uuid::now_v7().to_string(),
        currency: req.currency,
        amount_requested,
        amount_kes,
        amount_usd,
        rate_kes_per_usd: rate,
        fee_amount_kes,
        network_fee_kes: network_fee,
        total_debit_kes,
        expected_receive_kes: amount_kes,
        snapshot_at,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn kes_onramp_quote() {
        let q = build_quote(
            QuoteRequest {
                flow_type: FlowType::Onramp,
                amount: 1000.0,
                currency: Currency::KES,
                kes_per_usd_override: None,
            },
            dec!(130),
            120,
        )
        .unwrap();
        assert_eq!(q.amount_kes, dec!(1000));
        assert_eq!(q.amount_usd, dec!(7.69));
        assert_eq!(q.fee_amount_kes, dec!(13.00));
        assert_eq!(q.network_fee_kes, dec!(0));
        assert_eq!(q.total_debit_kes, dec!(1013.00));
        assert_eq!(q.expected_receive_kes, dec!(1000));
        let span = (q.expires_at - q.snapshot_at).num_seconds();
        assert!((span - 120).abs() <= 1);
    }

    #[test]
    fn usd_offramp_quote_with_rate_override() {
        let q = build_quote(
            QuoteRequest {
                flow_type: FlowType::Offramp,
                amount: 10.0,
                currency: Currency::USD,
                kes_per_usd_override: Some(dec!(155)),
            },
            dec!(130),
            300,
        )
        .unwrap();
        assert_eq!(q.amount_usd, dec!(10));
        assert_eq!(q.amount_kes, dec!(1550.00));
        assert_eq!(q.fee_amount_kes, dec!(27.90));
        assert_eq!(q.network_fee_kes, dec!(3));
        assert_eq!(q.total_debit_kes, dec!(1580.90));
        assert_eq!(q.expected_receive_kes, dec!(1550.00));
    }

    #[test]
    fn rejects_non_positive_amount() {
        let err = build_quote(
            QuoteRequest {
                flow_type: FlowType::Paybill,
                amount: 0.0,
                currency: Currency::KES,
                kes_per_usd_override: None,
            },
            dec!(130),
            300,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn rejects_non_finite_amount() {
        let err = build_quote(
            QuoteRequest {
                flow_type: FlowType::Paybill,
                amount: f64::NAN,
                currency: Currency::KES,
                kes_per_usd_override: None,
            },
            dec!(130),
            300,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn fee_floor_applies_for_tiny_amounts() {
        let q = build_quote(
            QuoteRequest {
                flow_type: FlowType::Buygoods,
                amount: 10.0,
                currency: Currency::KES,
                kes_per_usd_override: None,
            },
            dec!(130),
            300,
        )
        .unwrap();
        // 10 * 120bps = 0.12, below the 5 KES floor.
        assert_eq!(q.fee_amount_kes, dec!(5.00));
    }
}
