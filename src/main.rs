//! DotPay mobile-money bridge HTTP entrypoint.
//!
//! Endpoints: see `handlers::routes`. This binary loads configuration,
//! connects persistence and the Daraja client, and serves the Axum router
//! with graceful shutdown on SIGTERM/SIGINT.
//!
//! Environment: `.env` values loaded at startup; `HOST`/`PORT` control the
//! bind address; `MONGO_URI` selects MongoDB persistence over the
//! in-memory repository used for local development.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use dotpay_mpesa_bridge::app_state::AppState;
use dotpay_mpesa_bridge::config::Config;
use dotpay_mpesa_bridge::handlers;
use dotpay_mpesa_bridge::mpesa::MpesaClient;
use dotpay_mpesa_bridge::repo::{InMemoryDedupRepository, InMemoryTransactionRepository, MongoRepository};
use dotpay_mpesa_bridge::sig_down::SigDown;
use dotpay_mpesa_bridge::telemetry::Telemetry;
use dotpay_mpesa_bridge::trace_id::TraceIdLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load()?;

    let (transactions, dedup): (
        Arc<dyn dotpay_mpesa_bridge::repo::TransactionRepository>,
        Arc<dyn dotpay_mpesa_bridge::repo::DedupRepository>,
    ) = match &config.mongo_uri {
        Some(uri) => {
            let mongo = MongoRepository::connect(uri).await?;
            let mongo = Arc::new(mongo);
            (mongo.clone(), mongo)
        }
        None => {
            tracing::warn!("MONGO_URI is not set, falling back to an in-memory repository");
            (
                Arc::new(InMemoryTransactionRepository::new()),
                Arc::new(InMemoryDedupRepository::new()),
            )
        }
    };

    let mpesa = MpesaClient::new(config.mpesa.clone())?;
    let state = AppState::new(config, transactions, dedup, mpesa);

    let app = Router::new()
        .merge(handlers::routes())
        .with_state(state.clone())
        .layer(TraceIdLayer)
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(state.config.host, state.config.port);
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        tracing::error!("Failed to bind to {}: {}", addr, e);
        std::process::exit(1);
    });

    let sig_down = SigDown::try_new()?;
    let cancellation_token = sig_down.cancellation_token();
    let graceful_shutdown = async move { cancellation_token.cancelled().await };

    axum::serve(listener, app)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    Ok(())
}
