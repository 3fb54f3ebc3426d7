//! `dashmap`-backed in-memory repository, `spec.md` §4.12. Grounded in
//! the teacher's use of `dashmap` for its shared process-wide caches;
//! here it backs the test suite and durability-optional deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::domain::{DedupEvent, FlowType, Status, Transaction};
use crate::errors::{CoreError, CoreResult};
use crate::repo::traits::{DedupRepository, TransactionFilter, TransactionRepository};

#[derive(Default)]
pub struct InMemoryTransactionRepository {
    by_id: DashMap<String, Transaction>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn insert(&self, tx: Transaction) -> CoreResult<Transaction> {
        if let Some(key) = &tx.idempotency_key {
            let clash = self.by_id.iter().any(|entry| {
                entry.user_address == tx.user_address
                    && entry.flow_type == tx.flow_type
                    && entry.idempotency_key.as_deref() == Some(key.as_str())
                    && entry.transaction_id != tx.transaction_id
            });
            if clash {
                return Err(CoreError::state("idempotency key already in use for this user and flow"));
            }
        }
        if let Some(hash) = &tx.onchain.tx_hash {
            let clash = self
                .by_id
                .iter()
                .any(|entry| entry.onchain.tx_hash.as_deref() == Some(hash.as_str()));
            if clash {
                return Err(CoreError::state("onchain tx hash already linked to another transaction"));
            }
        }
        self.by_id.insert(tx.transaction_id.clone(), tx.clone());
        Ok(tx)
    }

    async fn get(&self, transaction_id: &str) -> CoreResult<Option<Transaction>> {
        Ok(self.by_id.get(transaction_id).map(|e| e.clone()))
    }

    async fn find_by_idempotency_key(
        &self,
        user_address: &str,
        flow_type: FlowType,
        idempotency_key: &str,
    ) -> CoreResult<Option<Transaction>> {
        Ok(self
            .by_id
            .iter()
            .find(|e| {
                e.user_address == user_address
                    && e.flow_type == flow_type
                    && e.idempotency_key.as_deref() == Some(idempotency_key)
            })
            .map(|e| e.clone()))
    }

    async fn find_by_provider_id(&self, field: &str, value: &str) -> CoreResult<Option<Transaction>> {
        let matches = |tx: &Transaction| -> bool {
            match field {
                "checkoutRequestId" => tx.daraja.checkout_request_id.as_deref() == Some(value),
                "merchantRequestId" => tx.daraja.merchant_request_id.as_deref() == Some(value),
                "conversationId" => tx.daraja.conversation_id.as_deref() == Some(value),
                "originatorConversationId" => {
                    tx.daraja.originator_conversation_id.as_deref() == Some(value)
                }
                _ => false,
            }
        };
        Ok(self.by_id.iter().find(|e| matches(&e)).map(|e| e.clone()))
    }

    async fn list(&self, user_address: &str, filter: &TransactionFilter) -> CoreResult<Vec<Transaction>> {
        let mut out: Vec<Transaction> = self
            .by_id
            .iter()
            .filter(|e| e.user_address == user_address)
            .filter(|e| filter.flow_type.map(|f| f == e.flow_type).unwrap_or(true))
            .filter(|e| filter.status.map(|s| s == e.status).unwrap_or(true))
            .map(|e| e.clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            out.truncate(limit.max(0) as usize);
        }
        Ok(out)
    }

    async fn sum_today_kes(&self, user_address: &str, since: DateTime<Utc>) -> CoreResult<Decimal> {
        let sum = self
            .by_id
            .iter()
            .filter(|e| e.user_address == user_address)
            .filter(|e| e.status != Status::Failed)
            .filter(|e| e.created_at >= since)
            .filter_map(|e| e.quote.as_ref().map(|q| q.total_debit_kes))
            .sum();
        Ok(sum)
    }

    async fn save(&self, updated: Transaction) -> CoreResult<Transaction> {
        self.by_id.insert(updated.transaction_id.clone(), updated.clone());
        Ok(updated)
    }

    async fn find_stuck_processing(&self, older_than: DateTime<Utc>, limit: i64) -> CoreResult<Vec<Transaction>> {
        let mut out: Vec<Transaction> = self
            .by_id
            .iter()
            .filter(|e| e.status == Status::MpesaProcessing && e.updated_at < older_than)
            .map(|e| e.clone())
            .collect();
        out.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }
}

#[derive(Default)]
pub struct InMemoryDedupRepository {
    seen: DashMap<String, DedupEvent>,
}

impl InMemoryDedupRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupRepository for InMemoryDedupRepository {
    async fn try_insert(&self, event: DedupEvent) -> CoreResult<bool> {
        if self.seen.contains_key(&event.event_key) {
            return Ok(false);
        }
        self.seen.insert(event.event_key.clone(), event);
        Ok(true)
    }
}
