//! Repository traits, `spec.md` §4.12 / §6 "Persistence layout".

use async_trait::async_trait;

use crate::domain::{DedupEvent, Transaction};
use crate::errors::CoreResult;

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub flow_type: Option<crate::domain::FlowType>,
    pub status: Option<crate::domain::Status>,
    pub limit: Option<i64>,
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, tx: Transaction) -> CoreResult<Transaction>;

    async fn get(&self, transaction_id: &str) -> CoreResult<Option<Transaction>>;

    async fn find_by_idempotency_key(
        &self,
        user_address: &str,
        flow_type: crate::domain::FlowType,
        idempotency_key: &str,
    ) -> CoreResult<Option<Transaction>>;

    async fn find_by_provider_id(&self, field: &str, value: &str) -> CoreResult<Option<Transaction>>;

    async fn list(&self, user_address: &str, filter: &TransactionFilter) -> CoreResult<Vec<Transaction>>;

    /// Sums `quote.totalDebitKes` for `user_address`'s non-failed
    /// transactions created since `since`, for the daily-cap check in
    /// §4.6 step 5.
    async fn sum_today_kes(
        &self,
        user_address: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> CoreResult<rust_decimal::Decimal>;

    /// Atomically replaces the stored transaction, applying the mutation
    /// closure's effect as observed in `updated`. Implementations persist
    /// field-level updates (`$set`/`$push`), never a blind overwrite of
    /// an empty history.
    async fn save(&self, updated: Transaction) -> CoreResult<Transaction>;

    /// Returns `mpesa_processing` transactions older than `older_than`,
    /// bounded by `limit`, for the Reconciler's sweep (§4.10).
    async fn find_stuck_processing(
        &self,
        older_than: chrono::DateTime<chrono::Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Transaction>>;
}

#[async_trait]
pub trait DedupRepository: Send + Sync {
    /// Inserts a dedup record. Returns `Ok(false)` (not an error) when
    /// `event_key` already exists; the caller treats that as "already
    /// applied, ack and drop".
    async fn try_insert(&self, event: DedupEvent) -> CoreResult<bool>;
}
