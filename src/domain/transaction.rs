//! The `Transaction` aggregate and its embedded value types, per `spec.md` §3.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::flow::{Currency, FlowType};
use super::status::Status;

/// A time-bounded priced snapshot binding an amount to a rate and fee
/// schedule. Embedded in a `Transaction` once it reaches `quoted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub quote_id: String,
    pub currency: Currency,
    pub amount_requested: Decimal,
    pub amount_kes: Decimal,
    pub amount_usd: Decimal,
    pub rate_kes_per_usd: Decimal,
    pub fee_amount_kes: Decimal,
    pub network_fee_kes: Decimal,
    pub total_debit_kes: Decimal,
    pub expected_receive_kes: Decimal,
    pub snapshot_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Quote {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// The destination of a payout: exactly one variant is populated depending
/// on `flowType`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Targets {
    pub phone: Option<String>,
    pub paybill_number: Option<String>,
    pub till_number: Option<String>,
    pub account_reference: Option<String>,
}

/// PIN-and-wallet-signature authorization state for funded flows.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub pin_provided: bool,
    pub signer_address: Option<String>,
    pub signature: Option<String>,
    pub signed_at: Option<String>,
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    NotRequired,
    Pending,
    Verified,
    Failed,
}

/// On-chain funding state: what the orchestrator expects, and what the
/// funding verifier actually observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Onchain {
    pub required: bool,
    pub tx_hash: Option<String>,
    pub chain_id: Option<u64>,
    pub token: Option<String>,
    pub treasury: Option<String>,
    pub expected_amount_units: Option<String>,
    pub expected_amount_usd: Option<Decimal>,
    pub funded_amount_units: Option<String>,
    pub funded_amount_usd: Option<Decimal>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub log_index: Option<u64>,
    pub verification_status: VerificationStatus,
    pub verification_error: Option<String>,
}

impl Default for Onchain {
    fn default() -> Self {
        Onchain {
            required: false,
            tx_hash: None,
            chain_id: None,
            token: None,
            treasury: None,
            expected_amount_units: None,
            expected_amount_usd: None,
            funded_amount_units: None,
            funded_amount_usd: None,
            from_address: None,
            to_address: None,
            log_index: None,
            verification_status: VerificationStatus::NotRequired,
            verification_error: None,
        }
    }
}

/// Raw and parsed state from the mobile-money provider (Daraja).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Daraja {
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub conversation_id: Option<String>,
    pub originator_conversation_id: Option<String>,
    pub result_code_raw: Option<String>,
    pub result_code: Option<i64>,
    pub result_desc: Option<String>,
    pub receipt_number: Option<String>,
    pub raw_request: Option<Json>,
    pub raw_response: Option<Json>,
    pub raw_callback: Option<Json>,
    pub callback_received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    #[default]
    None,
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
    pub status: RefundStatus,
    pub reason: Option<String>,
    pub tx_hash: Option<String>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One entry in a transaction's append-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub from: Status,
    pub to: Status,
    pub reason: String,
    pub source: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub source: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub extra: serde_json::Map<String, Json>,
}

/// The central entity: a single mobile-money <-> stablecoin payment,
/// unique by opaque `transactionId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: String,
    pub flow_type: FlowType,
    pub status: Status,
    pub user_address: String,
    pub business_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub quote: Option<Quote>,
    pub targets: Targets,
    pub authorization: Authorization,
    pub onchain: Onchain,
    pub daraja: Daraja,
    pub refund: Refund,
    pub history: Vec<HistoryEntry>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(transaction_id: String, flow_type: FlowType, user_address: String) -> Self {
        let now = Utc::now();
        Transaction {
            transaction_id,
            flow_type,
            status: Status::Created,
            user_address,
            business_id: None,
            idempotency_key: None,
            quote: None,
            targets: Targets::default(),
            authorization: Authorization::default(),
            onchain: Onchain::default(),
            daraja: Daraja::default(),
            refund: Refund::default(),
            history: Vec::new(),
            metadata: Metadata::default(),
            created_at: now,
            updated_at: now,
        }
    }
}
