//! Shared application state, constructed once at startup and cloned
//! (cheaply, via `Arc`) into every Axum handler — the same shape as the
//! teacher's `FacilitatorLocal`/`ProviderCache` being built once in
//! `main` and handed to the router as `State`.

use std::sync::Arc;

use crate::config::Config;
use crate::mpesa::MpesaClient;
use crate::repo::{DedupRepository, TransactionRepository};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub dedup: Arc<dyn DedupRepository>,
    pub mpesa: Arc<MpesaClient>,
}

impl AppState {
    pub fn new(
        config: Config,
        transactions: Arc<dyn TransactionRepository>,
        dedup: Arc<dyn DedupRepository>,
        mpesa: MpesaClient,
    ) -> Self {
        AppState {
            config: Arc::new(config),
            transactions,
            dedup,
            mpesa: Arc::new(mpesa),
        }
    }
}
