//! End-to-end coverage of the HTTP surface (`spec.md` §6), calling the
//! Axum handlers directly with an in-memory `AppState` rather than
//! standing up a real listener.

use std::net::IpAddr;
use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, header};
use dotpay_mpesa_bridge::app_state::AppState;
use dotpay_mpesa_bridge::config::{Config, Limits, MpesaConfig, MpesaEnv, TreasuryConfig};
use dotpay_mpesa_bridge::domain::{Currency, FlowType, Transaction};
use dotpay_mpesa_bridge::handlers::{self, ListQuery, QuoteBody};
use dotpay_mpesa_bridge::mpesa::MpesaClient;
use dotpay_mpesa_bridge::repo::{InMemoryDedupRepository, InMemoryTransactionRepository};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rust_decimal_macros::dec;
use serde::Serialize;

const JWT_SECRET: &str = "integration-test-secret";
const INTERNAL_KEY: &str = "internal-test-key";

fn test_config() -> Config {
    Config {
        port: 8080,
        host: "0.0.0.0".parse::<IpAddr>().unwrap(),
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
        jwt_secret: JWT_SECRET.into(),
        internal_api_key: Some(INTERNAL_KEY.into()),
        mongo_uri: None,
    }
}

fn test_state() -> AppState {
    let config = test_config();
    let mpesa = MpesaClient::new(config.mpesa.clone()).unwrap();
    AppState::new(
        config,
        Arc::new(InMemoryTransactionRepository::new()),
        Arc::new(InMemoryDedupRepository::new()),
        mpesa,
    )
}

#[derive(Serialize)]
struct TestClaims {
    address: String,
    scope: String,
    exp: u64,
}

fn bearer_for(address: &str) -> String {
    let claims = TestClaims {
        address: address.to_string(),
        scope: "mpesa".into(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as u64,
    };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(JWT_SECRET.as_bytes())).unwrap()
}

fn auth_headers(address: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", bearer_for(address))).unwrap(),
    );
    headers
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_reports_ok_without_auth() {
    let response = handlers::get_health().await;
    let body = body_json(axum::response::IntoResponse::into_response(response)).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn quote_without_bearer_token_is_rejected() {
    let state = test_state();
    let response = handlers::post_quote(
        State(state),
        HeaderMap::new(),
        axum::Json(QuoteBody { flow_type: FlowType::Offramp, amount: 1000.0, currency: Currency::KES, kes_per_usd_override: None }),
    )
    .await;
    assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn quote_with_valid_bearer_creates_a_quoted_transaction() {
    let state = test_state();
    let headers = auth_headers("0xUser1");
    let response = handlers::post_quote(
        State(state.clone()),
        headers,
        axum::Json(QuoteBody { flow_type: FlowType::Offramp, amount: 1000.0, currency: Currency::KES, kes_per_usd_override: None }),
    )
    .await;
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "quoted");
    assert_eq!(body["data"]["userAddress"], "0xuser1");
}

#[tokio::test]
async fn get_transaction_rejects_a_different_users_token() {
    let state = test_state();
    let mut tx = Transaction::new("tx_1".into(), FlowType::Offramp, "0xowner".into());
    tx.quote = None;
    state.transactions.insert(tx).await.unwrap();

    let response = handlers::get_transaction(State(state), auth_headers("0xintruder"), axum::extract::Path("tx_1".into())).await;
    assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn get_transaction_succeeds_for_its_owner() {
    let state = test_state();
    let tx = Transaction::new("tx_1".into(), FlowType::Offramp, "0xowner".into());
    state.transactions.insert(tx).await.unwrap();

    let response = handlers::get_transaction(State(state), auth_headers("0xowner"), axum::extract::Path("tx_1".into())).await;
    assert_eq!(response.status(), axum::http::StatusCode::OK);
}

#[tokio::test]
async fn list_transactions_only_returns_the_caller_s_own_rows() {
    let state = test_state();
    state.transactions.insert(Transaction::new("tx_1".into(), FlowType::Offramp, "0xowner".into())).await.unwrap();
    state.transactions.insert(Transaction::new("tx_2".into(), FlowType::Offramp, "0xother".into())).await.unwrap();

    let response = handlers::list_transactions(
        State(state),
        auth_headers("0xowner"),
        Query(ListQuery { flow_type: None, status: None, limit: None }),
    )
    .await;
    let body = body_json(response).await;
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["transactionId"], "tx_1");
}

#[tokio::test]
async fn reconcile_requires_the_internal_key_header() {
    let state = test_state();
    let response = handlers::post_reconcile(State(state), HeaderMap::new(), axum::Json(serde_json::from_value(serde_json::json!({})).unwrap())).await;
    assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn stk_webhook_success_acks_200_even_though_credit_settlement_has_no_treasury() {
    let state = test_state();
    let mut tx = Transaction::new("tx_1".into(), FlowType::Onramp, "0xabc".into());
    tx.status = dotpay_mpesa_bridge::domain::Status::MpesaSubmitted;
    tx.daraja.checkout_request_id = Some("c1".into());
    state.transactions.insert(tx).await.unwrap();

    let response = handlers::post_webhook_stk(
        State(state.clone()),
        Query(handlers::WebhookQuery { tx: Some("tx_1".into()) }),
        axum::Json(serde_json::json!({
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "c1",
                    "ResultCode": 0,
                    "ResultDesc": "Success",
                }
            }
        })),
    )
    .await;
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let saved = state.transactions.get("tx_1").await.unwrap().unwrap();
    assert_eq!(
        saved.status,
        dotpay_mpesa_bridge::domain::Status::MpesaProcessing,
        "the webhook's own transition to mpesa_processing must persist even though \
         the follow-up credit settlement attempt fails fast on missing treasury config"
    );
}

#[tokio::test]
async fn reconcile_runs_with_a_valid_internal_key() {
    let state = test_state();
    let mut headers = HeaderMap::new();
    headers.insert("X-DotPay-Internal-Key", HeaderValue::from_str(INTERNAL_KEY).unwrap());
    let response = handlers::post_reconcile(State(state), headers, axum::Json(serde_json::from_value(serde_json::json!({})).unwrap())).await;
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["scanned"], 0);
}
