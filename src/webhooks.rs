//! Webhook Demultiplexer, `spec.md` §4.7. Always acknowledges the
//! provider with HTTP 200 and `{ResultCode:0, ResultDesc:"Accepted"}`,
//! even when internal processing fails — mirroring the teacher's
//! principle of never letting a collaborator's broken assumption become
//! our retry storm.

use std::sync::Arc;

use serde_json::Value as Json;

use crate::domain::{DedupEvent, DedupSource, FlowType, Status, Transaction};
use crate::errors::CoreResult;
use crate::repo::{DedupRepository, TransactionRepository};
use crate::state_machine::assert_transition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    Stk,
    B2cResult,
    B2cTimeout,
    B2bResult,
    B2bTimeout,
}

impl WebhookKind {
    fn as_str(self) -> &'static str {
        match self {
            WebhookKind::Stk => "stk",
            WebhookKind::B2cResult => "b2c_result",
            WebhookKind::B2cTimeout => "b2c_timeout",
            WebhookKind::B2bResult => "b2b_result",
            WebhookKind::B2bTimeout => "b2b_timeout",
        }
    }

    fn is_timeout(self) -> bool {
        matches!(self, WebhookKind::B2cTimeout | WebhookKind::B2bTimeout)
    }
}

/// The fields the demultiplexer extracts from a raw provider payload,
/// regardless of which of the five shapes it arrived as.
pub struct ParsedCallback {
    pub transaction_id_hint: Option<String>,
    /// Candidate `(field, value)` lookup pairs, tried in order against
    /// `find_by_provider_id` — STK carries CheckoutRequestID and
    /// MerchantRequestID; B2C/B2B carry ConversationID and
    /// OriginatorConversationID.
    pub provider_ids: Vec<(&'static str, String)>,
    pub result_code_raw: Option<String>,
    pub result_code: Option<i64>,
    pub result_desc: Option<String>,
    pub receipt_number: Option<String>,
    pub raw: Json,
}

fn parse_stk_callback(tx_query: Option<String>, body: &Json) -> ParsedCallback {
    let stk = body
        .get("Body")
        .and_then(|b| b.get("stkCallback"))
        .cloned()
        .unwrap_or(Json::Null);
    let result_code = stk.get("ResultCode").and_then(|v| v.as_i64());
    let result_code_raw = stk
        .get("ResultCode")
        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()));
    let receipt_number = stk
        .get("CallbackMetadata")
        .and_then(|m| m.get("Item"))
        .and_then(|items| items.as_array())
        .and_then(|items| {
            items.iter().find(|item| item.get("Name").and_then(|n| n.as_str()) == Some("MpesaReceiptNumber"))
        })
        .and_then(|item| item.get("Value"))
        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()));

    let mut provider_ids = Vec::new();
    if let Some(v) = stk.get("CheckoutRequestID").and_then(|v| v.as_str()) {
        provider_ids.push(("checkoutRequestId", v.to_string()));
    }
    if let Some(v) = stk.get("MerchantRequestID").and_then(|v| v.as_str()) {
        provider_ids.push(("merchantRequestId", v.to_string()));
    }

    ParsedCallback {
        transaction_id_hint: tx_query,
        provider_ids,
        result_code_raw,
        result_code,
        result_desc: stk.get("ResultDesc").and_then(|v| v.as_str()).map(str::to_string),
        receipt_number,
        raw: body.clone(),
    }
}

fn parse_b2_result_callback(_kind: WebhookKind, tx_query: Option<String>, body: &Json) -> ParsedCallback {
    let result = body
        .get("Result")
        .cloned()
        .unwrap_or(Json::Null);
    let result_code = result.get("ResultCode").and_then(|v| v.as_i64());
    let result_code_raw = result
        .get("ResultCode")
        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()));
    let receipt_number = result
        .get("ResultParameters")
        .and_then(|p| p.get("ResultParameter"))
        .and_then(|items| items.as_array())
        .and_then(|items| {
            items.iter().find(|item| {
                matches!(
                    item.get("Key").and_then(|k| k.as_str()),
                    Some("TransactionReceipt") | Some("TransactionID")
                )
            })
        })
        .and_then(|item| item.get("Value"))
        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()));

    let mut provider_ids = Vec::new();
    if let Some(v) = result.get("ConversationID").and_then(|v| v.as_str()) {
        provider_ids.push(("conversationId", v.to_string()));
    }
    if let Some(v) = result.get("OriginatorConversationID").and_then(|v| v.as_str()) {
        provider_ids.push(("originatorConversationId", v.to_string()));
    }

    ParsedCallback {
        transaction_id_hint: tx_query,
        provider_ids,
        result_code_raw,
        result_code,
        result_desc: result.get("ResultDesc").and_then(|v| v.as_str()).map(str::to_string),
        receipt_number,
        raw: body.clone(),
    }
}

pub fn parse_callback(kind: WebhookKind, tx_query: Option<String>, body: &Json) -> ParsedCallback {
    match kind {
        WebhookKind::Stk => parse_stk_callback(tx_query, body),
        other => parse_b2_result_callback(other, tx_query, body),
    }
}

pub struct Demultiplexer {
    pub transactions: Arc<dyn TransactionRepository>,
    pub dedup: Arc<dyn DedupRepository>,
}

pub enum WebhookOutcome {
    /// Handled with nothing further to do — the caller always acks 200
    /// regardless of this variant.
    Acked,
    /// A successful onramp STK callback landed; the caller owns the
    /// treasury-to-user credit settlement dependency and should dispatch
    /// `CreditSettler::settle` for this transaction after acking.
    OnrampSettlementNeeded { transaction_id: String },
    /// A funded-flow transaction just failed or timed out; the caller
    /// owns the refund service dependency and should dispatch
    /// `RefundService::refund` for this transaction after acking.
    RefundNeeded { transaction: Transaction, reason: String },
}

impl Demultiplexer {
    pub async fn handle(&self, kind: WebhookKind, parsed: ParsedCallback) -> CoreResult<WebhookOutcome> {
        let transaction = self.locate_transaction(&parsed).await?;
        let Some(mut tx) = transaction else {
            return Ok(WebhookOutcome::Acked);
        };

        let event_key = format!(
            "{}:{}:{}:{}",
            kind.as_str(),
            tx.transaction_id,
            parsed.provider_ids.first().map(|(_, v)| v.as_str()).unwrap_or("none"),
            parsed.result_code_raw.as_deref().unwrap_or("fixed"),
        );
        let inserted = self
            .dedup
            .try_insert(DedupEvent {
                event_key,
                transaction_id: tx.transaction_id.clone(),
                source: DedupSource::Webhook,
                event_type: kind.as_str().to_string(),
                payload: parsed.raw.clone(),
                received_at: chrono::Utc::now(),
            })
            .await?;
        if !inserted {
            return Ok(WebhookOutcome::Acked);
        }

        tx.daraja.result_code_raw = parsed.result_code_raw.clone();
        tx.daraja.result_code = parsed.result_code;
        tx.daraja.result_desc = parsed.result_desc.clone();
        if parsed.receipt_number.is_some() {
            tx.daraja.receipt_number = parsed.receipt_number.clone();
        }
        tx.daraja.raw_callback = Some(parsed.raw.clone());
        tx.daraja.callback_received_at = Some(chrono::Utc::now());

        let succeeded = parsed.result_code_raw.as_deref() == Some("0") && !kind.is_timeout();

        match (kind, succeeded) {
            (WebhookKind::Stk, true) if tx.flow_type == FlowType::Onramp => {
                if tx.status == Status::MpesaSubmitted {
                    assert_transition(&mut tx, Status::MpesaProcessing, "stk accepted", "webhook")?;
                }
                tx = self.transactions.save(tx).await?;
                // Credit settlement is dispatched out-of-band by the
                // caller after this returns; do not block the ack.
                Ok(WebhookOutcome::OnrampSettlementNeeded {
                    transaction_id: tx.transaction_id,
                })
            }
            (WebhookKind::Stk, true) => {
                assert_transition(&mut tx, Status::Succeeded, "stk succeeded", "webhook")?;
                self.transactions.save(tx).await?;
                Ok(WebhookOutcome::Acked)
            }
            (WebhookKind::B2cResult | WebhookKind::B2bResult, true) => {
                assert_transition(&mut tx, Status::Succeeded, "provider succeeded", "webhook")?;
                self.transactions.save(tx).await?;
                Ok(WebhookOutcome::Acked)
            }
            _ => {
                let reason = parsed.result_desc.clone().unwrap_or_else(|| "provider failure".to_string());
                assert_transition(&mut tx, Status::Failed, &reason, "webhook")?;
                tx = self.transactions.save(tx).await?;
                // Auto-refund scheduling for funded flows happens in the
                // caller, which owns the refund service dependency.
                if tx.flow_type.is_funded() {
                    Ok(WebhookOutcome::RefundNeeded { transaction: tx, reason })
                } else {
                    Ok(WebhookOutcome::Acked)
                }
            }
        }
    }

    async fn locate_transaction(&self, parsed: &ParsedCallback) -> CoreResult<Option<Transaction>> {
        if let Some(id) = &parsed.transaction_id_hint {
            if let Some(tx) = self.transactions.get(id).await? {
                return Ok(Some(tx));
            }
        }
        for (field, value) in &parsed.provider_ids {
            if let Some(tx) = self.transactions.find_by_provider_id(field, value).await? {
                return Ok(Some(tx));
            }
        }
        Ok(None)
    }
}

/// The provider-facing acknowledgement body, identical on every path.
pub fn ack_body() -> Json {
    serde_json::json!({ "ResultCode": 0, "ResultDesc": "Accepted" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Status;
    use crate::repo::{InMemoryDedupRepository, InMemoryTransactionRepository};

    fn demux() -> Demultiplexer {
        Demultiplexer {
            transactions: Arc::new(InMemoryTransactionRepository::new()),
            dedup: Arc::new(InMemoryDedupRepository::new()),
        }
    }

    fn stk_body(checkout_id: &str, result_code: i64) -> Json {
        serde_json::json!({
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": checkout_id,
                    "ResultCode": result_code,
                    "ResultDesc": if result_code == 0 { "Success" } else { "Failed" },
                }
            }
        })
    }

    #[tokio::test]
    async fn unmatched_callback_is_acked_without_error() {
        let demux = demux();
        let parsed = parse_callback(WebhookKind::Stk, Some("missing-tx".into()), &stk_body("c1", 0));
        let outcome = demux.handle(WebhookKind::Stk, parsed).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Acked));
    }

    #[tokio::test]
    async fn stk_success_moves_offramp_analogue_onramp_transaction_to_processing() {
        let demux = demux();
        let mut tx = Transaction::new("tx_1".into(), FlowType::Onramp, "0xabc".into());
        tx.status = Status::MpesaSubmitted;
        tx.daraja.checkout_request_id = Some("c1".into());
        demux.transactions.insert(tx).await.unwrap();

        let parsed = parse_callback(WebhookKind::Stk, Some("tx_1".into()), &stk_body("c1", 0));
        let outcome = demux.handle(WebhookKind::Stk, parsed).await.unwrap();
        assert!(matches!(
            outcome,
            WebhookOutcome::OnrampSettlementNeeded { transaction_id } if transaction_id == "tx_1"
        ));

        let saved = demux.transactions.get("tx_1").await.unwrap().unwrap();
        assert_eq!(saved.status, Status::MpesaProcessing);
        assert_eq!(saved.daraja.result_code, Some(0));
    }

    #[tokio::test]
    async fn stk_callback_matches_on_merchant_request_id_when_checkout_id_is_absent() {
        let demux = demux();
        let mut tx = Transaction::new("tx_1".into(), FlowType::Onramp, "0xabc".into());
        tx.status = Status::MpesaSubmitted;
        tx.daraja.merchant_request_id = Some("m1".into());
        demux.transactions.insert(tx).await.unwrap();

        let body = serde_json::json!({
            "Body": { "stkCallback": { "MerchantRequestID": "m1", "ResultCode": 0, "ResultDesc": "Success" } }
        });
        let parsed = parse_callback(WebhookKind::Stk, None, &body);
        let outcome = demux.handle(WebhookKind::Stk, parsed).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::OnrampSettlementNeeded { .. }));
    }

    #[tokio::test]
    async fn failed_funded_offramp_submission_schedules_a_refund() {
        let demux = demux();
        let mut tx = Transaction::new("tx_1".into(), FlowType::Offramp, "0xabc".into());
        tx.status = Status::MpesaSubmitted;
        tx.daraja.conversation_id = Some("conv1".into());
        demux.transactions.insert(tx).await.unwrap();

        let body = serde_json::json!({
            "Result": { "ConversationID": "conv1", "ResultCode": 1, "ResultDesc": "insufficient funds" }
        });
        let parsed = parse_callback(WebhookKind::B2cResult, Some("tx_1".into()), &body);
        let outcome = demux.handle(WebhookKind::B2cResult, parsed).await.unwrap();
        match outcome {
            WebhookOutcome::RefundNeeded { transaction, reason } => {
                assert_eq!(transaction.status, Status::Failed);
                assert_eq!(reason, "insufficient funds");
            }
            _ => panic!("expected a refund to be scheduled for a funded flow"),
        }
    }

    #[tokio::test]
    async fn failed_unfunded_onramp_submission_does_not_schedule_a_refund() {
        let demux = demux();
        let mut tx = Transaction::new("tx_1".into(), FlowType::Onramp, "0xabc".into());
        tx.status = Status::MpesaSubmitted;
        tx.daraja.checkout_request_id = Some("c1".into());
        demux.transactions.insert(tx).await.unwrap();

        let parsed = parse_callback(WebhookKind::Stk, Some("tx_1".into()), &stk_body("c1", 1));
        let outcome = demux.handle(WebhookKind::Stk, parsed).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Acked));
    }

    #[tokio::test]
    async fn duplicate_webhook_delivery_is_deduped_and_has_no_second_effect() {
        let demux = demux();
        let mut tx = Transaction::new("tx_1".into(), FlowType::Onramp, "0xabc".into());
        tx.status = Status::MpesaSubmitted;
        tx.daraja.checkout_request_id = Some("c1".into());
        demux.transactions.insert(tx).await.unwrap();

        let body = stk_body("c1", 0);
        let first = parse_callback(WebhookKind::Stk, Some("tx_1".into()), &body);
        demux.handle(WebhookKind::Stk, first).await.unwrap();
        let after_first = demux.transactions.get("tx_1").await.unwrap().unwrap();
        assert_eq!(after_first.history.len(), 1);

        let second = parse_callback(WebhookKind::Stk, Some("tx_1".into()), &body);
        demux.handle(WebhookKind::Stk, second).await.unwrap();
        let after_second = demux.transactions.get("tx_1").await.unwrap().unwrap();
        assert_eq!(after_second.history.len(), 1, "replayed webhook must not re-apply a transition");
    }

    #[tokio::test]
    async fn b2c_timeout_is_treated_as_failure_even_with_zero_result_code() {
        let demux = demux();
        let mut tx = Transaction::new("tx_1".into(), FlowType::Offramp, "0xabc".into());
        tx.status = Status::MpesaSubmitted;
        tx.daraja.conversation_id = Some("conv1".into());
        demux.transactions.insert(tx).await.unwrap();

        let body = serde_json::json!({
            "Result": { "ConversationID": "conv1", "ResultCode": 0, "ResultDesc": "Timeout" }
        });
        let parsed = parse_callback(WebhookKind::B2cTimeout, Some("tx_1".into()), &body);
        demux.handle(WebhookKind::B2cTimeout, parsed).await.unwrap();

        let saved = demux.transactions.get("tx_1").await.unwrap().unwrap();
        assert_eq!(saved.status, Status::Failed);
    }

    #[test]
    fn ack_body_is_always_success() {
        assert_eq!(ack_body(), serde_json::json!({"ResultCode": 0, "ResultDesc": "Accepted"}));
    }
}
