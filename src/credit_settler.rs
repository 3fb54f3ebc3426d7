//! Onramp Credit Settler, `spec.md` §4.9: treasury-to-user stablecoin
//! transfer completing an onramp after its STK callback succeeds.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::config::Config;
use crate::domain::{Status, Transaction, VerificationStatus};
use crate::errors::{CoreError, CoreResult};
use crate::refund::IERC20;
use crate::repo::TransactionRepository;
use crate::state_machine::assert_transition;
use crate::treasury;

pub struct CreditSettler {
    pub config: Arc<Config>,
    pub transactions: Arc<dyn TransactionRepository>,
}

impl CreditSettler {
    /// Idempotent: re-loads the transaction and bails if it was already
    /// credited, guarding against concurrent invocation for the same
    /// transaction (§5).
    pub async fn settle(&self, transaction_id: &str) -> CoreResult<Transaction> {
        let mut tx = self
            .transactions
            .get(transaction_id)
            .await?
            .ok_or_else(|| CoreError::state("transaction not found"))?;

        if tx.onchain.verification_status == VerificationStatus::Verified && tx.onchain.tx_hash.is_some() {
            return Ok(tx);
        }

        let quote = tx
            .quote
            .clone()
            .ok_or_else(|| CoreError::state("transaction has no bound quote"))?;

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
        let recipient = Address::from_str(&tx.user_address)
            .map_err(|_| CoreError::validation("user address is not valid"))?;
        let units = usd_to_units(quote.amount_usd, self.config.treasury.usdc_decimals);

        match self.send_credit(rpc_url, private_key, token, recipient, units).await {
            Ok((tx_hash, log_index)) => {
                tx.onchain.tx_hash = Some(tx_hash);
                tx.onchain.from_address = self.config.treasury.platform_address.clone();
                tx.onchain.to_address = Some(format!("{recipient:#x}"));
                tx.onchain.funded_amount_units = Some(units.to_string());
                tx.onchain.funded_amount_usd = Some(quote.amount_usd);
                tx.onchain.log_index = Some(log_index);
                tx.onchain.verification_status = VerificationStatus::Verified;

                if tx.status == Status::MpesaSubmitted {
                    assert_transition(&mut tx, Status::MpesaProcessing, "credit settlement started", "credit-settler")?;
                }
                assert_transition(&mut tx, Status::Succeeded, "credited onramp recipient", "credit-settler")?;
                self.transactions.save(tx).await
            }
            Err(e) => {
                tx.onchain.verification_status = VerificationStatus::Failed;
                tx.onchain.verification_error = Some(e.to_string());
                self.transactions.save(tx).await
            }
        }
    }

    async fn send_credit(
        &self,
        rpc_url: &str,
        private_key: &str,
        token: Address,
        recipient: Address,
        units: U256,
    ) -> CoreResult<(String, u64)> {
        let (provider, _sender) = treasury::connect_sending(rpc_url, private_key).await?;
        let contract = IERC20::new(token, &provider);
        let pending = contract
            .transfer(recipient, units)
            .send()
            .await
            .map_err(|e| CoreError::external(format!("credit transfer failed: {e}")))?;
        let receipt = pending
            .with_required_confirmations(self.config.treasury.wait_confirmations)
            .get_receipt()
            .await
            .map_err(|e| CoreError::external(format!("credit receipt failed: {e}")))?;
        if !receipt.status() {
            return Err(CoreError::external("credit transaction reverted"));
        }
        let log_index = receipt
            .inner
            .logs()
            .first()
            .and_then(|l| l.log_index)
            .unwrap_or(0);
        Ok((format!("{:#x}", receipt.transaction_hash), log_index))
    }
}

fn usd_to_units(amount_usd: Decimal, decimals: u32) -> U256 {
    let scaled = (amount_usd * Decimal::from(10u64.pow(decimals))).round();
    U256::from(scaled.to_u128().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Limits, MpesaConfig, MpesaEnv, TreasuryConfig};
    use crate::domain::FlowType;
    use crate::repo::InMemoryTransactionRepository;
    use rust_decimal_macros::dec;

    fn minimal_config() -> Config {
        Config {
            port: 8080,
            host: "0.0.0.0".parse().unwrap(),
            base_url: "http://localhost:8080".into(),
            mpesa: MpesaConfig {
                env: MpesaEnv::Sandbox,
                base_url: "https://sandbox.safaricom.co.ke".into(),
                consumer_key: "key".into(),
                consumer_secret: "secret".into(),
                passkey: "passkey".into(),
                shortcode: "600000".into(),
                stk_shortcode: "600000".into(),
                b2c_shortcode: "600000".into(),
                b2b_shortcode: "600000".into(),
                initiator_name: "init".into(),
                security_credential: None,
                initiator_password: None,
                cert_path: None,
                result_base_url: String::new(),
                timeout_base_url: String::new(),
                webhook_secret: None,
                request_timeout_secs: 30,
            },
            treasury: TreasuryConfig {
                rpc_url: None,
                chain_id: None,
                usdc_contract: None,
                usdc_decimals: 6,
                platform_address: None,
                private_key: None,
                refund_enabled: true,
                wait_confirmations: 1,
            },
            limits: Limits {
                max_txn_kes: dec!(150_000),
                max_daily_kes: dec!(500_000),
                pin_min_length: 6,
                signature_max_age_secs: 600,
            },
            quote_ttl_secs: 300,
            kes_per_usd: dec!(130),
            auto_refund: true,
            require_onchain_funding: false,
            min_funding_confirmations: 1,
            jwt_secret: "test-secret".into(),
            internal_api_key: None,
            mongo_uri: None,
        }
    }

    #[tokio::test]
    async fn settle_is_a_noop_when_already_verified_and_funded() {
        let transactions = Arc::new(InMemoryTransactionRepository::new());
        let mut tx = Transaction::new("tx_1".into(), FlowType::Onramp, "0xabc".into());
        tx.onchain.verification_status = VerificationStatus::Verified;
        tx.onchain.tx_hash = Some("0xalready".into());
        transactions.insert(tx).await.unwrap();

        let settler = CreditSettler { config: Arc::new(minimal_config()), transactions: transactions.clone() };
        let settled = settler.settle("tx_1").await.unwrap();
        assert_eq!(settled.onchain.tx_hash.as_deref(), Some("0xalready"));
    }

    #[tokio::test]
    async fn settle_fails_fast_for_unknown_transaction() {
        let transactions = Arc::new(InMemoryTransactionRepository::new());
        let settler = CreditSettler { config: Arc::new(minimal_config()), transactions };
        let err = settler.settle("nope").await.unwrap_err();
        assert!(matches!(err, CoreError::State(_)));
    }

    #[test]
    fn usd_to_units_rounds_to_nearest_unit() {
        assert_eq!(usd_to_units(dec!(1.0000006), 6), U256::from(1_000_001u64));
    }
}
