//! HTTP endpoints, `spec.md` §6 "API surface".
//!
//! Every handler returns `Envelope<T>` on success and lets `CoreError`'s
//! `IntoResponse` impl shape the error body, mirroring the teacher's single
//! error-to-response mapping rather than per-handler status juggling.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json2;
use tracing::instrument;

use crate::app_state::AppState;
use crate::credit_settler::CreditSettler;
use crate::domain::{Currency, FlowType, Status, Transaction};
use crate::errors::{CoreError, CoreResult, Envelope};
use crate::jwt::verify_bearer_token;
use crate::orchestrator::{AuthorizationInput, InitiateRequest};
use crate::quote::{self, QuoteRequest};
use crate::reconciler::{ReconcileRequest, Reconciler};
use crate::refund::RefundService;
use crate::repo::TransactionFilter;
use crate::webhooks::{Demultiplexer, WebhookKind, WebhookOutcome, ack_body, parse_callback};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/mpesa/health", get(get_health))
        .route("/api/mpesa/quotes", post(post_quote))
        .route("/api/mpesa/onramp/stk/initiate", post(post_onramp_initiate))
        .route("/api/mpesa/offramp/initiate", post(post_offramp_initiate))
        .route("/api/mpesa/merchant/paybill/initiate", post(post_paybill_initiate))
        .route("/api/mpesa/merchant/buygoods/initiate", post(post_buygoods_initiate))
        .route("/api/mpesa/transactions/{id}", get(get_transaction))
        .route("/api/mpesa/transactions", get(list_transactions))
        .route("/api/mpesa/internal/reconcile", post(post_reconcile))
        .route("/api/mpesa/webhooks/stk", post(post_webhook_stk))
        .route("/api/mpesa/webhooks/b2c/result", post(post_webhook_b2c_result))
        .route("/api/mpesa/webhooks/b2c/timeout", post(post_webhook_b2c_timeout))
        .route("/api/mpesa/webhooks/b2b/result", post(post_webhook_b2b_result))
        .route("/api/mpesa/webhooks/b2b/timeout", post(post_webhook_b2b_timeout))
}

#[instrument(skip_all)]
pub async fn get_health() -> impl IntoResponse {
    Json(Envelope::ok(serde_json::json!({ "status": "ok" })))
}

fn bearer_claims(headers: &HeaderMap, state: &AppState) -> CoreResult<crate::jwt::Claims> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CoreError::auth("missing Authorization header"))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| CoreError::auth("Authorization header must be a Bearer token"))?;
    verify_bearer_token(token, &state.config.jwt_secret)
}

fn idempotency_key(headers: &HeaderMap) -> CoreResult<String> {
    let value = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CoreError::validation("Idempotency-Key header is required"))?;
    crate::idempotency::validate_idempotency_key(value)?;
    Ok(value.to_string())
}

fn require_internal_key(headers: &HeaderMap, state: &AppState) -> CoreResult<()> {
    let configured = state
        .config
        .internal_api_key
        .as_deref()
        .ok_or_else(|| CoreError::config("DOTPAY_INTERNAL_API_KEY is not configured"))?;
    let provided = headers
        .get("X-DotPay-Internal-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CoreError::auth("missing X-DotPay-Internal-Key header"))?;
    if provided != configured {
        return Err(CoreError::auth("invalid internal key"));
    }
    Ok(())
}

/// Wraps a handler's `CoreResult<T>` into the uniform envelope, letting
/// `CoreError::into_response` take over on failure.
fn respond<T: Serialize>(result: CoreResult<T>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(Envelope::ok(data))).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteBody {
    pub flow_type: FlowType,
    pub amount: f64,
    pub currency: Currency,
    pub kes_per_usd_override: Option<rust_decimal::Decimal>,
}

#[instrument(skip_all)]
pub async fn post_quote(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<QuoteBody>) -> Response {
    respond(post_quote_inner(state, headers, body).await)
}

async fn post_quote_inner(state: AppState, headers: HeaderMap, body: QuoteBody) -> CoreResult<Json2> {
    let claims = bearer_claims(&headers, &state)?;
    let user_address = claims.user_address()?;

    let built = quote::build_quote(
        QuoteRequest {
            flow_type: body.flow_type,
            amount: body.amount,
            currency: body.currency,
            kes_per_usd_override: body.kes_per_usd_override,
        },
        state.config.kes_per_usd,
        state.config.quote_ttl_secs,
    )?;

    let mut tx = Transaction::new(uuid::Uuid::now_v7().to_string(), body.flow_type, user_address);
    tx.quote = Some(built);
    crate::state_machine::assert_transition(&mut tx, Status::Quoted, "quote generated", "quotes-endpoint")?;
    let saved = state.transactions.insert(tx).await?;
    Ok(serde_json::to_value(saved).expect("transaction always serializes"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateBody {
    pub quote_id: Option<String>,
    pub amount: Option<f64>,
    #[serde(default = "default_currency")]
    pub currency: Currency,
    pub phone: Option<String>,
    pub paybill_number: Option<String>,
    pub till_number: Option<String>,
    pub account_reference: Option<String>,
    pub pin: Option<String>,
    pub stored_pin_hash: Option<String>,
    pub signature: Option<String>,
    pub nonce: Option<String>,
    pub signed_at: Option<String>,
    pub onchain_tx_hash: Option<String>,
    pub requested_chain_id: Option<u64>,
}

fn default_currency() -> Currency {
    Currency::KES
}

async fn run_initiate(
    state: AppState,
    headers: HeaderMap,
    flow_type: FlowType,
    body: InitiateBody,
) -> CoreResult<Json2> {
    let claims = bearer_claims(&headers, &state)?;
    let user_address = claims.user_address()?;
    let idempotency_key = idempotency_key(&headers)?;

    let authorization = if flow_type == FlowType::Onramp {
        None
    } else {
        Some(AuthorizationInput {
            pin: body.pin.ok_or_else(|| CoreError::auth("pin is required"))?,
            stored_pin_hash: body
                .stored_pin_hash
                .ok_or_else(|| CoreError::auth("stored pin hash is required"))?,
            signature_hex: body.signature.ok_or_else(|| CoreError::auth("signature is required"))?,
            nonce: body.nonce.ok_or_else(|| CoreError::auth("nonce is required"))?,
            signed_at: body.signed_at.ok_or_else(|| CoreError::auth("signedAt is required"))?,
        })
    };

    let orchestrator = crate::orchestrator::Orchestrator {
        config: state.config.clone(),
        transactions: state.transactions.clone(),
        mpesa: state.mpesa.clone(),
    };

    let result = orchestrator
        .initiate(InitiateRequest {
            flow_type,
            user_address,
            idempotency_key,
            quote_id: body.quote_id,
            amount: body.amount,
            currency: body.currency,
            phone: body.phone,
            paybill_number: body.paybill_number,
            till_number: body.till_number,
            account_reference: body.account_reference,
            authorization,
            onchain_tx_hash: body.onchain_tx_hash,
            requested_chain_id: body.requested_chain_id,
        })
        .await?;

    Ok(serde_json::json!({
        "transaction": result.transaction,
        "idempotent": result.idempotent,
    }))
}

#[instrument(skip_all)]
pub async fn post_onramp_initiate(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<InitiateBody>) -> Response {
    respond(run_initiate(state, headers, FlowType::Onramp, body).await)
}

#[instrument(skip_all)]
pub async fn post_offramp_initiate(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<InitiateBody>) -> Response {
    respond(run_initiate(state, headers, FlowType::Offramp, body).await)
}

#[instrument(skip_all)]
pub async fn post_paybill_initiate(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<InitiateBody>) -> Response {
    respond(run_initiate(state, headers, FlowType::Paybill, body).await)
}

#[instrument(skip_all)]
pub async fn post_buygoods_initiate(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<InitiateBody>) -> Response {
    respond(run_initiate(state, headers, FlowType::Buygoods, body).await)
}

#[instrument(skip_all)]
pub async fn get_transaction(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    respond(get_transaction_inner(state, headers, id).await)
}

async fn get_transaction_inner(state: AppState, headers: HeaderMap, id: String) -> CoreResult<Transaction> {
    let claims = bearer_claims(&headers, &state)?;
    let user_address = claims.user_address()?;
    let tx = state
        .transactions
        .get(&id)
        .await?
        .ok_or_else(|| CoreError::validation("transaction not found"))?;
    if tx.user_address != user_address {
        return Err(CoreError::auth("transaction belongs to another user"));
    }
    Ok(tx)
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "flowType")]
    pub flow_type: Option<FlowType>,
    pub status: Option<Status>,
    pub limit: Option<i64>,
}

#[instrument(skip_all)]
pub async fn list_transactions(State(state): State<AppState>, headers: HeaderMap, Query(query): Query<ListQuery>) -> Response {
    respond(list_transactions_inner(state, headers, query).await)
}

async fn list_transactions_inner(state: AppState, headers: HeaderMap, query: ListQuery) -> CoreResult<Vec<Transaction>> {
    let claims = bearer_claims(&headers, &state)?;
    let user_address = claims.user_address()?;
    let filter = TransactionFilter {
        flow_type: query.flow_type,
        status: query.status,
        limit: query.limit,
    };
    state.transactions.list(&user_address, &filter).await
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileBody {
    pub max_age_minutes: Option<i64>,
    #[serde(default)]
    pub execute_query: bool,
    pub transaction_id: Option<String>,
}

#[instrument(skip_all)]
pub async fn post_reconcile(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<ReconcileBody>) -> Response {
    respond(post_reconcile_inner(state, headers, body).await)
}

async fn post_reconcile_inner(state: AppState, headers: HeaderMap, body: ReconcileBody) -> CoreResult<Json2> {
    require_internal_key(&headers, &state)?;
    let reconciler = Reconciler {
        transactions: state.transactions.clone(),
        refund_service: RefundService {
            config: state.config.clone(),
            transactions: state.transactions.clone(),
        },
    };
    let mut req = ReconcileRequest::default();
    if let Some(max_age) = body.max_age_minutes {
        req.max_age_minutes = max_age;
    }
    req.execute_query = body.execute_query;
    req.transaction_id = body.transaction_id;
    let report = reconciler.run(req).await?;
    Ok(serde_json::to_value(report).expect("report always serializes"))
}

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    pub tx: Option<String>,
}

async fn handle_webhook(state: AppState, kind: WebhookKind, tx_query: Option<String>, body: Json2) -> Response {
    let demux = Demultiplexer {
        transactions: state.transactions.clone(),
        dedup: state.dedup.clone(),
    };
    let parsed = parse_callback(kind, tx_query, &body);
    match demux.handle(kind, parsed).await {
        Ok(WebhookOutcome::Acked) => {}
        Ok(WebhookOutcome::OnrampSettlementNeeded { transaction_id }) => {
            let settler = CreditSettler {
                config: state.config.clone(),
                transactions: state.transactions.clone(),
            };
            if let Err(err) = settler.settle(&transaction_id).await {
                tracing::error!(error = %err, transaction_id, "onramp credit settlement failed");
            }
        }
        Ok(WebhookOutcome::RefundNeeded { transaction, reason }) => {
            let refund_service = RefundService {
                config: state.config.clone(),
                transactions: state.transactions.clone(),
            };
            if let Err(err) = refund_service.refund(transaction, &reason).await {
                tracing::error!(error = %err, kind = ?kind, "auto-refund dispatch failed");
            }
        }
        Err(err) => {
            tracing::error!(error = %err, kind = ?kind, "webhook processing failed, acking anyway");
        }
    }
    (StatusCode::OK, Json(ack_body())).into_response()
}

#[instrument(skip_all)]
pub async fn post_webhook_stk(State(state): State<AppState>, Query(q): Query<WebhookQuery>, Json(body): Json<Json2>) -> Response {
    handle_webhook(state, WebhookKind::Stk, q.tx, body).await
}

#[instrument(skip_all)]
pub async fn post_webhook_b2c_result(State(state): State<AppState>, Query(q): Query<WebhookQuery>, Json(body): Json<Json2>) -> Response {
    handle_webhook(state, WebhookKind::B2cResult, q.tx, body).await
}

#[instrument(skip_all)]
pub async fn post_webhook_b2c_timeout(State(state): State<AppState>, Query(q): Query<WebhookQuery>, Json(body): Json<Json2>) -> Response {
    handle_webhook(state, WebhookKind::B2cTimeout, q.tx, body).await
}

#[instrument(skip_all)]
pub async fn post_webhook_b2b_result(State(state): State<AppState>, Query(q): Query<WebhookQuery>, Json(body): Json<Json2>) -> Response {
    handle_webhook(state, WebhookKind::B2bResult, q.tx, body).await
}

#[instrument(skip_all)]
pub async fn post_webhook_b2b_timeout(State(state): State<AppState>, Query(q): Query<WebhookQuery>, Json(body): Json<Json2>) -> Response {
    handle_webhook(state, WebhookKind::B2bTimeout, q.tx, body).await
}
