//! Canonical authorization message and EIP-191 signature recovery,
//! `spec.md` §4.3.

use alloy::primitives::Address;
use alloy::signers::Signature;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::errors::{CoreError, CoreResult};

/// The target descriptor embedded in the authorization message, one
/// variant per flow.
pub enum TargetDescriptor<'a> {
    Phone(&'a str),
    Paybill { number: &'a str, account: &'a str },
    Buygoods { till: &'a str, account: &'a str },
    Onramp,
}

impl std::fmt::Display for TargetDescriptor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetDescriptor::Phone(msisdn) => write!(f, "phone:{msisdn}"),
            TargetDescriptor::Paybill { number, account } => {
                write!(f, "paybill:{number}:{account}")
            }
            TargetDescriptor::Buygoods { till, account } => {
                write!(f, "buygoods:{till}:{account}")
            }
            TargetDescriptor::Onramp => write!(f, "onramp"),
        }
    }
}

pub struct AuthorizationMessageInput<'a> {
    pub transaction_id: &'a str,
    pub flow_type: &'a str,
    pub quote_id: &'a str,
    pub total_debit_kes: Decimal,
    pub expected_amount_usd: Decimal,
    pub target: TargetDescriptor<'a>,
    pub nonce: &'a str,
    pub signed_at: &'a str,
}

/// Builds the exact newline-joined message the wallet is expected to
/// personal-sign.
pub fn authorization_message(input: &AuthorizationMessageInput) -> String {
    format!(
        "DotPay Authorization\nTransaction: {}\nFlow: {}\nQuote: {}\nAmountKES: {:.2}\nAmountUSDC: {:.6}\nTarget: {}\nNonce: {}\nSignedAt: {}",
        input.transaction_id,
        input.flow_type,
        input.quote_id,
        input.total_debit_kes,
        input.expected_amount_usd,
        input.target,
        input.nonce,
        input.signed_at,
    )
}

/// Recovers the EIP-191 personal-sign signer of `message` from a
/// `0x`-prefixed hex signature.
pub fn recover_signer(message: &str, signature_hex: &str) -> CoreResult<Address> {
    let sig_bytes = hex::decode(signature_hex.trim_start_matches("0x"))
        .map_err(|_| CoreError::auth("signature is not valid hex"))?;
    let signature = Signature::from_raw(&sig_bytes)
        .map_err(|e| CoreError::auth(format!("malformed signature: {e}")))?;
    signature
        .recover_address_from_msg(message.as_bytes())
        .map_err(|e| CoreError::auth(format!("signature recovery failed: {e}")))
}

/// Full §4.3 authorization check: freshness of `nonce`/`signature`
/// length, `signedAt` window, signature recovery, and signer match
/// against `expected_signer` (lowercase hex).
pub fn verify_authorization(
    input: &AuthorizationMessageInput,
    signature_hex: &str,
    expected_signer: &str,
    now: DateTime<Utc>,
    signature_max_age_secs: i64,
) -> CoreResult<()> {
    if input.nonce.len() < 8 {
        return Err(CoreError::auth("nonce too short"));
    }
    if signature_hex.trim_start_matches("0x").len() < 24 {
        return Err(CoreError::auth("signature too short"));
    }
    let signed_at: DateTime<Utc> = input
        .signed_at
        .parse()
        .map_err(|_| CoreError::auth("signedAt is not a valid timestamp"))?;
    if signed_at > now + Duration::seconds(60) {
        return Err(CoreError::auth("signedAt is too far in the future"));
    }
    if now - signed_at > Duration::seconds(signature_max_age_secs) {
        return Err(CoreError::auth("signedAt is too old"));
    }

    let message = authorization_message(input);
    let recovered = recover_signer(&message, signature_hex)?;
    let recovered_lower = format!("{recovered:#x}").to_lowercase();
    if recovered_lower != expected_signer.to_lowercase() {
        return Err(CoreError::auth("recovered signer does not match authenticated user"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::{SignerSync, local::PrivateKeySigner};
    use rust_decimal_macros::dec;

    fn sample_input() -> AuthorizationMessageInput<'static> {
        AuthorizationMessageInput {
            transaction_id: "tx_1",
            flow_type: "offramp",
            quote_id: "quote_1",
            total_debit_kes: dec!(1013.00),
            expected_amount_usd: dec!(7.792308),
            target: TargetDescriptor::Phone("254712345678"),
            nonce: "nonce1234",
            signed_at: "2026-07-28T10:00:00Z",
        }
    }

    #[test]
    fn message_format_matches_canonical_layout() {
        let msg = authorization_message(&sample_input());
        assert_eq!(
            msg,
            "DotPay Authorization\nTransaction: tx_1\nFlow: offramp\nQuote: quote_1\nAmountKES: 1013.00\nAmountUSDC: 7.792308\nTarget: phone:254712345678\nNonce: nonce1234\nSignedAt: 2026-07-28T10:00:00Z"
        );
    }

    #[test]
    fn recovers_matching_signer() {
        let signer = PrivateKeySigner::random();
        let message = authorization_message(&sample_input());
        let signature = signer.sign_message_sync(message.as_bytes()).unwrap();
        let sig_hex = format!("0x{}", hex::encode(signature.as_bytes()));
        let recovered = recover_signer(&message, &sig_hex).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn verify_authorization_rejects_short_nonce() {
        let mut input = sample_input();
        input.nonce = "short";
        let err = verify_authorization(&input, &"a".repeat(40), "0xabc", Utc::now(), 600).unwrap_err();
        assert!(matches!(err, CoreError::Auth(_)));
    }
}
