//! Funding Verifier, `spec.md` §4.4.
//!
//! Confirms a user-supplied transaction hash carries a qualifying
//! ERC-20 `Transfer` to the treasury, on the configured chain, with
//! enough confirmations and value. Grounded in the teacher's
//! `assert_enough_balance`/`assert_enough_value` style of composing
//! small fallible checks, and its use of `sol!` to decode contract
//! events via Alloy.

use alloy::primitives::{Address, B256, U256};
use alloy::providers::Provider;
use alloy::sol;
use alloy::sol_types::SolEvent;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;

use crate::errors::{CoreError, CoreResult};

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Computes `expectedUnits = ceil((totalDebitKes_scaled * 10^decimals) / rateKesPerUsd_scaled)`
/// using integer-exact fixed point arithmetic (6-decimal scaling for
/// both KES and rate inputs), per §4.4.
pub fn expected_units(total_debit_kes: Decimal, rate_kes_per_usd: Decimal, decimals: u32) -> CoreResult<U256> {
    const SCALE: u32 = 6;
    let scaled_debit = scale_to_i128(total_debit_kes, SCALE)?;
    let scaled_rate = scale_to_i128(rate_kes_per_usd, SCALE)?;
    if scaled_rate <= 0 {
        return Err(CoreError::validation("rateKesPerUsd must be positive"));
    }
    let decimals = decimals.min(18);
    let numerator = (scaled_debit as i128)
        .checked_mul(10i128.pow(decimals))
        .ok_or_else(|| CoreError::validation("expected units overflow"))?;
    let expected = numerator.div_euclid(scaled_rate as i128)
        + if numerator.rem_euclid(scaled_rate as i128) != 0 { 1 } else { 0 };
    if expected <= 0 {
        return Err(CoreError::validation("expectedUnits must be positive"));
    }
    Ok(U256::from(expected as u128))
}

fn scale_to_i128(value: Decimal, scale: u32) -> CoreResult<i128> {
    let scaled = value * Decimal::from(10i64.pow(scale));
    scaled
        .round()
        .to_i128()
        .ok_or_else(|| CoreError::validation("amount does not fit fixed-point scale"))
}

pub struct FundingRequest {
    pub tx_hash: B256,
    pub expected_from: Address,
    pub treasury: Address,
    pub token: Address,
    pub configured_chain_id: u64,
    pub requested_chain_id: Option<u64>,
    pub expected_units: U256,
    pub min_confirmations: u64,
}

pub struct FundingResult {
    pub tx_hash: B256,
    pub chain_id: u64,
    pub token: Address,
    pub treasury: Address,
    pub from: Address,
    pub to: Address,
    pub funded_units: U256,
    pub log_index: u64,
    pub block_number: u64,
}

/// Runs the full §4.4 verification procedure against a connected
/// provider.
pub async fn verify_funding<P: Provider>(provider: &P, req: &FundingRequest) -> CoreResult<FundingResult> {
    let chain_id = provider
        .get_chain_id()
        .await
        .map_err(|e| CoreError::external(format!("failed to read chain id: {e}")))?;
    if chain_id != req.configured_chain_id {
        return Err(CoreError::validation("rpc chain id does not match configured chain"));
    }
    if let Some(requested) = req.requested_chain_id {
        if requested != req.configured_chain_id {
            return Err(CoreError::validation("requested chain id does not match configured chain"));
        }
    }

    let receipt = provider
        .get_transaction_receipt(req.tx_hash)
        .await
        .map_err(|e| CoreError::external(format!("failed to fetch receipt: {e}")))?
        .ok_or_else(|| CoreError::validation("funding transaction not found"))?;

    if !receipt.status() {
        return Err(CoreError::validation("funding transaction reverted"));
    }

    let tip = provider
        .get_block_number()
        .await
        .map_err(|e| CoreError::external(format!("failed to read block number: {e}")))?;
    let block_number = receipt
        .block_number
        .ok_or_else(|| CoreError::validation("funding transaction has no block number"))?;
    let confirmations = tip.saturating_sub(block_number) + 1;
    if confirmations < req.min_confirmations {
        return Err(CoreError::validation(format!(
            "funding transaction has {confirmations} confirmations, need {}",
            req.min_confirmations
        )));
    }

    let mut total = U256::ZERO;
    let mut lowest_log_index: Option<u64> = None;
    let mut matched_from = req.expected_from;
    let mut matched_to = req.treasury;

    for log in receipt.inner.logs() {
        if log.address() != req.token {
            continue;
        }
        let Ok(decoded) = Transfer::decode_log(&log.inner) else {
            continue;
        };
        if decoded.from != req.expected_from || decoded.to != req.treasury {
            continue;
        }
        total = total
            .checked_add(decoded.value)
            .ok_or_else(|| CoreError::external("funded amount overflow"))?;
        let idx = log.log_index.unwrap_or(u64::MAX);
        if lowest_log_index.map(|l| idx < l).unwrap_or(true) {
            lowest_log_index = Some(idx);
            matched_from = decoded.from;
            matched_to = decoded.to;
        }
    }

    if total < req.expected_units {
        return Err(CoreError::validation(format!(
            "funded amount {total} below expected {expected}",
            expected = req.expected_units
        )));
    }

    Ok(FundingResult {
        tx_hash: req.tx_hash,
        chain_id,
        token: req.token,
        treasury: req.treasury,
        from: matched_from,
        to: matched_to,
        funded_units: total,
        log_index: lowest_log_index.unwrap_or(0),
        block_number,
    })
}

pub fn parse_address(hex: &str) -> CoreResult<Address> {
    Address::from_str(hex).map_err(|_| CoreError::validation("expected a 20-byte hex address"))
}

pub fn parse_tx_hash(hex: &str) -> CoreResult<B256> {
    B256::from_str(hex).map_err(|_| CoreError::validation("expected a 32-byte hex transaction hash"))
}
