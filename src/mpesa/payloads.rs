//! Daraja request payload builders, `spec.md` §4.5.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use crate::errors::{CoreError, CoreResult};

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn ceil_amount(amount_kes: Decimal) -> CoreResult<u64> {
    amount_kes
        .ceil()
        .to_u64()
        .ok_or_else(|| CoreError::validation("amountKes does not fit an integer payout"))
}

#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: &'static str,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub call_back_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

/// Builds an STK (C2B push) request. `shortcode`/`passkey` are the
/// configured paybill/passkey pair; `msisdn` is the already-validated
/// `254[7|1]XXXXXXXX` phone number.
pub fn build_stk_push(
    shortcode: &str,
    passkey: &str,
    msisdn: &str,
    amount_kes: Decimal,
    callback_url: String,
    account_reference: &str,
    transaction_desc: &str,
) -> CoreResult<StkPushRequest> {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let password = B64.encode(format!("{shortcode}{passkey}{timestamp}"));
    Ok(StkPushRequest {
        business_short_code: shortcode.to_string(),
        password,
        timestamp,
        transaction_type: "CustomerPayBillOnline",
        amount: ceil_amount(amount_kes)?,
        party_a: msisdn.to_string(),
        party_b: shortcode.to_string(),
        phone_number: msisdn.to_string(),
        call_back_url: callback_url,
        account_reference: truncate(account_reference, 12),
        transaction_desc: truncate(transaction_desc, 182),
    })
}

#[derive(Debug, Serialize)]
pub struct B2cRequest {
    #[serde(rename = "OriginatorConversationID")]
    pub originator_conversation_id: String,
    #[serde(rename = "InitiatorName")]
    pub initiator_name: String,
    #[serde(rename = "SecurityCredential")]
    pub security_credential: String,
    #[serde(rename = "CommandID")]
    pub command_id: String,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "Remarks")]
    pub remarks: String,
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_timeout_url: String,
    #[serde(rename = "ResultURL")]
    pub result_url: String,
    #[serde(rename = "Occasion")]
    pub occasion: String,
}

#[allow(clippy::too_many_arguments)]
pub fn build_b2c(
    originator_conversation_id: String,
    initiator_name: &str,
    security_credential: &str,
    b2c_shortcode: &str,
    msisdn: &str,
    amount_kes: Decimal,
    remarks: &str,
    queue_timeout_url: String,
    result_url: String,
    occasion: &str,
) -> CoreResult<B2cRequest> {
    Ok(B2cRequest {
        originator_conversation_id,
        initiator_name: initiator_name.to_string(),
        security_credential: security_credential.to_string(),
        command_id: "BusinessPayment".to_string(),
        amount: ceil_amount(amount_kes)?,
        party_a: b2c_shortcode.to_string(),
        party_b: msisdn.to_string(),
        remarks: truncate(remarks, 100),
        queue_timeout_url,
        result_url,
        occasion: truncate(occasion, 100),
    })
}

#[derive(Debug, Clone, Copy)]
pub enum B2bRecipientKind {
    Paybill,
    Buygoods,
}

impl B2bRecipientKind {
    fn receiver_identifier_type(self) -> &'static str {
        match self {
            B2bRecipientKind::Paybill => "4",
            B2bRecipientKind::Buygoods => "2",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct B2bRequest {
    #[serde(rename = "OriginatorConversationID")]
    pub originator_conversation_id: String,
    #[serde(rename = "Initiator")]
    pub initiator: String,
    #[serde(rename = "SecurityCredential")]
    pub security_credential: String,
    #[serde(rename = "CommandID")]
    pub command_id: &'static str,
    #[serde(rename = "SenderIdentifierType")]
    pub sender_identifier_type: &'static str,
    #[serde(rename = "RecieverIdentifierType")]
    pub receiver_identifier_type: &'static str,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "Remarks")]
    pub remarks: String,
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_timeout_url: String,
    #[serde(rename = "ResultURL")]
    pub result_url: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "Requester")]
    pub requester: Option<String>,
}

#[allow(clippy::too_many_arguments)]
pub fn build_b2b(
    originator_conversation_id: String,
    initiator: &str,
    security_credential: &str,
    kind: B2bRecipientKind,
    b2b_shortcode: &str,
    recipient_shortcode: &str,
    amount_kes: Decimal,
    account_reference: &str,
    remarks: &str,
    queue_timeout_url: String,
    result_url: String,
    requester: Option<String>,
) -> CoreResult<B2bRequest> {
    Ok(B2bRequest {
        originator_conversation_id,
        initiator: initiator.to_string(),
        security_credential: security_credential.to_string(),
        command_id: "BusinessPayBill",
        sender_identifier_type: "4",
        receiver_identifier_type: kind.receiver_identifier_type(),
        amount: ceil_amount(amount_kes)?,
        party_a: b2b_shortcode.to_string(),
        party_b: recipient_shortcode.to_string(),
        account_reference: truncate(account_reference, 20),
        remarks: truncate(remarks, 100),
        queue_timeout_url,
        result_url,
        requester,
    })
}

/// Synchronous-response acceptance rule: HTTP 2xx and `ResponseCode == "0"`.
pub fn is_accepted(status_is_2xx: bool, response_code: &str) -> bool {
    status_is_2xx && response_code == "0"
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn stk_push_truncates_reference_and_desc() {
        let req = build_stk_push(
            "600000",
            "passkey123",
            "254712345678",
            dec!(1013.40),
            "https://x/cb".into(),
            "this-reference-is-too-long",
            &"d".repeat(200),
        )
        .unwrap();
        assert_eq!(req.account_reference.chars().count(), 12);
        assert_eq!(req.transaction_desc.chars().count(), 182);
        assert_eq!(req.amount, 1014);
        assert_eq!(req.transaction_type, "CustomerPayBillOnline");
    }

    #[test]
    fn b2b_receiver_identifier_varies_by_kind() {
        let paybill = build_b2b(
            "conv1".into(),
            "init",
            "seccred",
            B2bRecipientKind::Paybill,
            "600000",
            "700000",
            dec!(500),
            "acct",
            "remark",
            "https://x/timeout".into(),
            "https://x/result".into(),
            None,
        )
        .unwrap();
        assert_eq!(paybill.receiver_identifier_type, "4");

        let buygoods = build_b2b(
            "conv2".into(),
            "init",
            "seccred",
            B2bRecipientKind::Buygoods,
            "600000",
            "800000",
            dec!(500),
            "acct",
            "remark",
            "https://x/timeout".into(),
            "https://x/result".into(),
            None,
        )
        .unwrap();
        assert_eq!(buygoods.receiver_identifier_type, "2");
    }

    #[test]
    fn acceptance_requires_both_2xx_and_zero_code() {
        assert!(is_accepted(true, "0"));
        assert!(!is_accepted(true, "1"));
        assert!(!is_accepted(false, "0"));
    }
}
