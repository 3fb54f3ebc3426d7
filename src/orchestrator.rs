//! Transaction Orchestrator, `spec.md` §4.6. One shared pipeline behind
//! all four initiate endpoints (onramp STK push, offramp, paybill,
//! buygoods), grounded in the teacher's `assert_valid_payment` style of
//! composing a sequence of fallible steps before any side effect runs.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::auth::{authorization_message, verify_authorization, verify_pin};
use crate::auth::signature::{AuthorizationMessageInput, TargetDescriptor};
use crate::config::Config;
use crate::domain::{Currency, FlowType, Onchain, Targets, Transaction, VerificationStatus};
use crate::errors::{CoreError, CoreResult};
use crate::funding::{self, FundingRequest};
use crate::idempotency::validate_idempotency_key;
use crate::mpesa::MpesaClient;
use crate::mpesa::payloads::{B2bRecipientKind, build_b2b, build_b2c, build_stk_push};
use crate::mpesa::security_credential::derive_security_credential;
use crate::quote::{self, QuoteRequest};
use crate::refund::RefundService;
use crate::repo::{DedupRepository, TransactionRepository};
use crate::state_machine::assert_transition;
use crate::treasury;
use crate::validation::{validate_account_reference, validate_phone, validate_pin_format, validate_shortcode};

/// Caller-supplied authorization material, absent for onramp.
///
/// `stored_pin_hash` is the `scheme$salt_b64$hash_b64` hash on file for
/// this user (PIN enrollment/storage is an out-of-band concern not
/// modeled by this crate).
pub struct AuthorizationInput {
    pub pin: String,
    pub stored_pin_hash: String,
    pub signature_hex: String,
    pub nonce: String,
    pub signed_at: String,
}

pub struct InitiateRequest {
    pub flow_type: FlowType,
    pub user_address: String,
    pub idempotency_key: String,
    pub quote_id: Option<String>,
    pub amount: Option<f64>,
    pub currency: Currency,
    pub phone: Option<String>,
    pub paybill_number: Option<String>,
    pub till_number: Option<String>,
    pub account_reference: Option<String>,
    pub authorization: Option<AuthorizationInput>,
    pub onchain_tx_hash: Option<String>,
    pub requested_chain_id: Option<u64>,
}

pub struct InitiateResult {
    pub transaction: Transaction,
    pub idempotent: bool,
}

fn target_descriptor<'a>(flow_type: FlowType, req: &'a InitiateRequest) -> CoreResult<TargetDescriptor<'a>> {
    match flow_type {
        FlowType::Onramp => Ok(TargetDescriptor::Onramp),
        FlowType::Offramp => {
            let phone = req.phone.as_deref().ok_or_else(|| CoreError::validation("phone is required"))?;
            validate_phone(phone)?;
            Ok(TargetDescriptor::Phone(phone))
        }
        FlowType::Paybill => {
            let number = req
                .paybill_number
                .as_deref()
                .ok_or_else(|| CoreError::validation("paybillNumber is required"))?;
            validate_shortcode(number)?;
            let account = req
                .account_reference
                .as_deref()
                .ok_or_else(|| CoreError::validation("accountReference is required"))?;
            validate_account_reference(account)?;
            Ok(TargetDescriptor::Paybill { number, account })
        }
        FlowType::Buygoods => {
            let till = req
                .till_number
                .as_deref()
                .ok_or_else(|| CoreError::validation("tillNumber is required"))?;
            validate_shortcode(till)?;
            let account = req.account_reference.as_deref().unwrap_or("DotPay");
            Ok(TargetDescriptor::Buygoods { till, account })
        }
    }
}

fn build_targets(flow_type: FlowType, req: &InitiateRequest) -> Targets {
    match flow_type {
        FlowType::Onramp => Targets::default(),
        FlowType::Offramp => Targets {
            phone: req.phone.clone(),
            ..Default::default()
        },
        FlowType::Paybill => Targets {
            paybill_number: req.paybill_number.clone(),
            account_reference: req.account_reference.clone(),
            ..Default::default()
        },
        FlowType::Buygoods => Targets {
            till_number: req.till_number.clone(),
            account_reference: Some(req.account_reference.clone().unwrap_or_else(|| "DotPay".to_string())),
            ..Default::default()
        },
    }
}

pub struct Orchestrator {
    pub config: Arc<Config>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub mpesa: Arc<MpesaClient>,
}

impl Orchestrator {
    pub async fn initiate(&self, req: InitiateRequest) -> CoreResult<InitiateResult> {
        validate_idempotency_key(&req.idempotency_key)?;

        // Step 1: idempotency.
        if let Some(existing) = self
            .transactions
            .find_by_idempotency_key(&req.user_address, req.flow_type, &req.idempotency_key)
            .await?
        {
            return Ok(InitiateResult {
                transaction: existing,
                idempotent: true,
            });
        }

        // Step 2: target validation (also builds the authorization descriptor).
        let descriptor = target_descriptor(req.flow_type, &req)?;

        // Step 4: quote binding. `quoteId` is the transactionId of the
        // transaction created alongside the quote by the quotes endpoint
        // (a quote never exists detached from its owning transaction).
        let (mut tx, is_new) = match &req.quote_id {
            Some(quote_id) => {
                let existing = self
                    .transactions
                    .get(quote_id)
                    .await?
                    .ok_or_else(|| CoreError::validation("quote not found"))?;
                if existing.user_address != req.user_address {
                    return Err(CoreError::auth("quote belongs to another user"));
                }
                let quote = existing
                    .quote
                    .as_ref()
                    .ok_or_else(|| CoreError::state("transaction has no bound quote"))?;
                if quote.is_expired(Utc::now()) {
                    return Err(CoreError::validation("quote has expired"));
                }
                (existing, false)
            }
            None => {
                let amount = req
                    .amount
                    .ok_or_else(|| CoreError::validation("amount is required when quoteId is absent"))?;
                let built = quote::build_quote(
                    QuoteRequest {
                        flow_type: req.flow_type,
                        amount,
                        currency: req.currency,
                        kes_per_usd_override: None,
                    },
                    self.config.kes_per_usd,
                    self.config.quote_ttl_secs,
                )?;
                let mut tx = Transaction::new(
                    uuid::Uuid::now_v7().to_string(),
                    req.flow_type,
                    req.user_address.clone(),
                );
                tx.idempotency_key = Some(req.idempotency_key.clone());
                tx.targets = build_targets(req.flow_type, &req);
                tx.quote = Some(built);
                (tx, true)
            }
        };

        // Step 5: limits.
        let quote = tx.quote.clone().expect("quote bound above");
        if quote.total_debit_kes > self.config.limits.max_txn_kes {
            return Err(CoreError::validation("amount exceeds the per-transaction limit"));
        }
        let since = Utc::now() - chrono::Duration::hours(24);
        let today_total = self.transactions.sum_today_kes(&req.user_address, since).await?;
        if today_total + quote.total_debit_kes > self.config.limits.max_daily_kes {
            return Err(CoreError::validation("amount exceeds the daily limit"));
        }

        // Step 6: funding defaults.
        let funded_flow = req.flow_type.is_funded();
        if funded_flow {
            let decimals = self.config.treasury.usdc_decimals;
            let expected_units = funding::expected_units(quote.total_debit_kes, quote.rate_kes_per_usd, decimals)?;
            tx.onchain = Onchain {
                required: true,
                token: self.config.treasury.usdc_contract.clone(),
                treasury: self.config.treasury.platform_address.clone(),
                chain_id: self.config.treasury.chain_id,
                expected_amount_units: Some(expected_units.to_string()),
                expected_amount_usd: Some(quote.amount_usd),
                verification_status: VerificationStatus::Pending,
                ..Onchain::default()
            };
        } else {
            tx.onchain = Onchain::default();
        }

        // Step 3: PIN + authorization (all flows but onramp).
        if req.flow_type != FlowType::Onramp {
            let auth = req
                .authorization
                .as_ref()
                .ok_or_else(|| CoreError::auth("pin and signature are required for this flow"))?;
            validate_pin_format(&auth.pin, self.config.limits.pin_min_length)?;
            if !verify_pin(&auth.pin, &auth.stored_pin_hash)? {
                return Err(CoreError::auth("invalid pin"));
            }
            let message_input = AuthorizationMessageInput {
                transaction_id: &tx.transaction_id,
                flow_type: &req.flow_type.to_string(),
                quote_id: &quote.quote_id,
                total_debit_kes: quote.total_debit_kes,
                expected_amount_usd: tx.onchain.expected_amount_usd.unwrap_or(Decimal::ZERO),
                target: descriptor,
                nonce: &auth.nonce,
                signed_at: &auth.signed_at,
            };
            verify_authorization(
                &message_input,
                &auth.signature_hex,
                &req.user_address,
                Utc::now(),
                self.config.limits.signature_max_age_secs,
            )?;
            tx.authorization.pin_provided = true;
            tx.authorization.signer_address = Some(req.user_address.clone());
            tx.authorization.signature = Some(auth.signature_hex.clone());
            tx.authorization.signed_at = Some(auth.signed_at.clone());
            tx.authorization.nonce = Some(auth.nonce.clone());
            tx.metadata.extra.insert(
                "signedMessage".to_string(),
                serde_json::Value::String(authorization_message(&message_input)),
            );
        }

        if is_new {
            tx = self.transactions.insert(tx).await?;
        }

        // Step 7: transitions + funding verification.
        assert_transition(&mut tx, crate::domain::Status::AwaitingUserAuthorization, "authorization checked", "orchestrator")?;
        tx = self.transactions.save(tx).await?;

        if funded_flow {
            assert_transition(&mut tx, crate::domain::Status::AwaitingOnchainFunding, "awaiting funding", "orchestrator")?;
            tx = self.transactions.save(tx).await?;

            let verify_result = self.verify_funding_for(&mut tx, &req).await;
            match verify_result {
                Ok(()) => {}
                Err(e) => {
                    tx.onchain.verification_status = VerificationStatus::Failed;
                    tx.onchain.verification_error = Some(e.to_string());
                    tx = self.transactions.save(tx).await?;
                    return Err(e);
                }
            }
            tx = self.transactions.save(tx).await?;
        }

        assert_transition(&mut tx, crate::domain::Status::MpesaSubmitted, "submitting to provider", "orchestrator")?;

        // Step 8: submission.
        let callback_kind = match req.flow_type {
            FlowType::Onramp => "stk",
            FlowType::Offramp => "b2c/result",
            FlowType::Paybill | FlowType::Buygoods => "b2b/result",
        };
        let callback_url = format!(
            "{}/api/mpesa/webhooks/{callback_kind}?tx={}",
            self.config.base_url, tx.transaction_id
        );

        let outcome = match req.flow_type {
            FlowType::Onramp => {
                let stk = build_stk_push(
                    &self.config.mpesa.stk_shortcode,
                    &self.config.mpesa.passkey,
                    req.phone.as_deref().unwrap_or_default(),
                    quote.total_debit_kes,
                    callback_url,
                    "DotPay",
                    "DotPay onramp",
                )?;
                self.mpesa.submit_stk_push(&stk).await?
            }
            FlowType::Offramp => {
                let security_credential = self.resolve_security_credential()?;
                let b2c = build_b2c(
                    uuid::Uuid::now_v7().to_string(),
                    &self.config.mpesa.initiator_name,
                    &security_credential,
                    &self.config.mpesa.b2c_shortcode,
                    req.phone.as_deref().unwrap_or_default(),
                    quote.amount_kes,
                    "DotPay offramp",
                    format!("{}/api/mpesa/webhooks/b2c/timeout?tx={}", self.config.base_url, tx.transaction_id),
                    callback_url,
                    "DotPay",
                )?;
                self.mpesa.submit_b2c(&b2c).await?
            }
            FlowType::Paybill | FlowType::Buygoods => {
                let security_credential = self.resolve_security_credential()?;
                let kind = if req.flow_type == FlowType::Paybill {
                    B2bRecipientKind::Paybill
                } else {
                    B2bRecipientKind::Buygoods
                };
                let recipient = req
                    .paybill_number
                    .clone()
                    .or_else(|| req.till_number.clone())
                    .unwrap_or_default();
                let b2b = build_b2b(
                    uuid::Uuid::now_v7().to_string(),
                    &self.config.mpesa.initiator_name,
                    &security_credential,
                    kind,
                    &self.config.mpesa.b2b_shortcode,
                    &recipient,
                    quote.amount_kes,
                    req.account_reference.as_deref().unwrap_or("DotPay"),
                    "DotPay merchant payment",
                    format!("{}/api/mpesa/webhooks/b2b/timeout?tx={}", self.config.base_url, tx.transaction_id),
                    callback_url,
                    None,
                )?;
                self.mpesa.submit_b2b(&b2b).await?
            }
        };

        tx.daraja.raw_response = Some(outcome.raw.clone());
        tx.daraja.conversation_id = outcome.conversation_id.clone();
        tx.daraja.originator_conversation_id = outcome.originator_conversation_id.clone();
        tx.daraja.merchant_request_id = outcome.merchant_request_id.clone();
        tx.daraja.checkout_request_id = outcome.checkout_request_id.clone();

        if outcome.accepted {
            assert_transition(&mut tx, crate::domain::Status::MpesaProcessing, "provider accepted", "orchestrator")?;
            tx = self.transactions.save(tx).await?;
        } else {
            assert_transition(&mut tx, crate::domain::Status::Failed, &outcome.response_description, "orchestrator")?;
            tx = self.transactions.save(tx).await?;
            if funded_flow {
                let refund_service = RefundService {
                    config: self.config.clone(),
                    transactions: self.transactions.clone(),
                };
                tx = refund_service.refund(tx, &outcome.response_description).await?;
            }
        }

        Ok(InitiateResult {
            transaction: tx,
            idempotent: false,
        })
    }

    /// `MPESA_SECURITY_CREDENTIAL` directly, or derived from
    /// `MPESA_INITIATOR_PASSWORD` + `MPESA_CERT_PATH` when unset.
    fn resolve_security_credential(&self) -> CoreResult<String> {
        if let Some(cred) = &self.config.mpesa.security_credential {
            return Ok(cred.clone());
        }
        let password = self
            .config
            .mpesa
            .initiator_password
            .as_deref()
            .ok_or_else(|| CoreError::config("security credential not configured"))?;
        let cert_path = self
            .config
            .mpesa
            .cert_path
            .as_deref()
            .ok_or_else(|| CoreError::config("security credential not configured"))?;
        let cert_pem = std::fs::read_to_string(cert_path)
            .map_err(|e| CoreError::config(format!("failed to read mpesa cert at {cert_path}: {e}")))?;
        derive_security_credential(password, &cert_pem)
    }

    async fn verify_funding_for(&self, tx: &mut Transaction, req: &InitiateRequest) -> CoreResult<()> {
        let tx_hash_hex = req
            .onchain_tx_hash
            .as_deref()
            .ok_or_else(|| CoreError::validation("onchainTxHash is required for funded flows"))?;
        let rpc_url = self
            .config
            .treasury
            .rpc_url
            .as_deref()
            .ok_or_else(|| CoreError::config("treasury rpc not configured"))?;
        let chain_id = self
            .config
            .treasury
            .chain_id
            .ok_or_else(|| CoreError::config("treasury chain id not configured"))?;
        let token = funding::parse_address(
            self.config
                .treasury
                .usdc_contract
                .as_deref()
                .ok_or_else(|| CoreError::config("treasury token not configured"))?,
        )?;
        let treasury_addr = funding::parse_address(
            self.config
                .treasury
                .platform_address
                .as_deref()
                .ok_or_else(|| CoreError::config("treasury platform address not configured"))?,
        )?;
        let expected_from = funding::parse_address(&req.user_address)?;
        let expected_units = tx
            .onchain
            .expected_amount_units
            .as_deref()
            .and_then(|s| alloy::primitives::U256::from_str(s).ok())
            .ok_or_else(|| CoreError::state("expected units not computed"))?;

        let provider = treasury::connect_read_only(rpc_url).await?;
        let result = funding::verify_funding(
            &provider,
            &FundingRequest {
                tx_hash: funding::parse_tx_hash(tx_hash_hex)?,
                expected_from,
                treasury: treasury_addr,
                token,
                configured_chain_id: chain_id,
                requested_chain_id: req.requested_chain_id,
                expected_units,
                min_confirmations: self.config.min_funding_confirmations,
            },
        )
        .await?;

        let decimals = self.config.treasury.usdc_decimals;
        let funded_amount_usd = Decimal::from_str(&result.funded_units.to_string())
            .ok()
            .map(|units| units / Decimal::from(10u64.pow(decimals)));

        tx.onchain.tx_hash = Some(tx_hash_hex.to_string());
        tx.onchain.from_address = Some(format!("{:#x}", result.from));
        tx.onchain.to_address = Some(format!("{:#x}", result.to));
        tx.onchain.funded_amount_units = Some(result.funded_units.to_string());
        tx.onchain.funded_amount_usd = funded_amount_usd;
        tx.onchain.log_index = Some(result.log_index);
        tx.onchain.verification_status = VerificationStatus::Verified;
        Ok(())
    }
}
