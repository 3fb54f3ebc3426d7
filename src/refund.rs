//! Refund Service, `spec.md` §4.8.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::sol;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::config::Config;
use crate::domain::{RefundStatus, Status, Transaction};
use crate::errors::{CoreError, CoreResult};
use crate::repo::TransactionRepository;
use crate::state_machine::assert_transition;
use crate::treasury;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

pub struct RefundService {
    pub config: Arc<Config>,
    pub transactions: Arc<dyn TransactionRepository>,
}

fn pick_recipient(tx: &Transaction) -> CoreResult<Address> {
    let hex = tx
        .onchain
        .from_address
        .clone()
        .or_else(|| tx.authorization.signer_address.clone())
        .unwrap_or_else(|| tx.user_address.clone());
    Address::from_str(&hex).map_err(|_| CoreError::validation("refund recipient is not a valid address"))
}

fn pick_amount_usd(tx: &Transaction) -> Decimal {
    tx.onchain
        .funded_amount_usd
        .or(tx.onchain.expected_amount_usd)
        .or_else(|| tx.quote.as_ref().map(|q| q.amount_usd))
        .unwrap_or(Decimal::ZERO)
}

fn usd_to_units(amount_usd: Decimal, decimals: u32) -> U256 {
    let scaled = (amount_usd * Decimal::from(10u64.pow(decimals))).round();
    U256::from(scaled.to_u128().unwrap_or(0))
}

impl RefundService {
    /// Runs the §4.8 procedure for a `failed`, funded transaction.
    pub async fn refund(&self, mut tx: Transaction, reason: &str) -> CoreResult<Transaction> {
        assert_transition(&mut tx, Status::RefundPending, reason, "refund-service")?;
        tx.refund.reason = Some(reason.to_string());
        tx.refund.initiated_at = Some(chrono::Utc::now());
        tx = self.transactions.save(tx).await?;

        let recipient = pick_recipient(&tx)?;
        let amount_usd = pick_amount_usd(&tx);
        let units = usd_to_units(amount_usd, self.config.treasury.usdc_decimals);

        let outcome = if self.config.treasury.can_send() && self.config.treasury.refund_enabled {
            self.send_onchain_refund(recipient, units).await
        } else if self.config.mpesa.env == crate::config::MpesaEnv::Sandbox {
            Ok(format!("RF_{}_{:x}", base36_time(), rand_suffix()))
        } else {
            Err(CoreError::config("treasury not configured for refunds outside sandbox"))
        };

        match outcome {
            Ok(tx_hash) => {
                tx.refund.tx_hash = Some(tx_hash);
                tx.refund.status = RefundStatus::Completed;
                tx.refund.completed_at = Some(chrono::Utc::now());
                assert_transition(&mut tx, Status::Refunded, "refund completed", "refund-service")?;
            }
            Err(e) => {
                tx.refund.status = RefundStatus::Failed;
                tx.refund.reason = Some(format!("{reason}: {e}"));
                assert_transition(&mut tx, Status::Failed, "refund failed", "refund-service")?;
            }
        }
        self.transactions.save(tx).await
    }

    async fn send_onchain_refund(&self, recipient: Address, units: U256) -> CoreResult<String> {
        let rpc_url = self
            .config
            .treasury
            .rpc_url
            .as_deref()
            .ok_or_else(|| CoreError::config("treasury rpc not configured"))?;
        let private_key = self
            .config
            .treasury
            .private_key
            .as_deref()
            .ok_or_else(|| CoreError::config("treasury private key not configured"))?;
        let token = crate::funding::parse_address(
            self.config
                .treasury
                .usdc_contract
                .as_deref()
                .ok_or_else(|| CoreError::config("treasury token not configured"))?,
        )?;

        let (provider, _sender) = treasury::connect_sending(rpc_url, private_key).await?;
        let contract = IERC20::new(token, &provider);
        let pending = contract
            .transfer(recipient, units)
            .send()
            .await
            .map_err(|e| CoreError::external(format!("refund transfer failed: {e}")))?;
        let receipt = pending
            .with_required_confirmations(self.config.treasury.wait_confirmations)
            .get_receipt()
            .await
            .map_err(|e| CoreError::external(format!("refund receipt failed: {e}")))?;
        if !receipt.status() {
            return Err(CoreError::external("refund transaction reverted"));
        }
        Ok(format!("{:#x}", receipt.transaction_hash))
    }
}

fn base36_time() -> String {
    let secs = chrono::Utc::now().timestamp();
    to_base36(secs as u64)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap()
}

fn rand_suffix() -> u32 {
    use rand::RngCore;
    rand::rng().next_u32()
}
