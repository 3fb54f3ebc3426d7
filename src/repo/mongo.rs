//! MongoDB-backed repository, `spec.md` §4.12 / §6 "Persistence layout".
//!
//! Per-transaction mutation always goes through `find_one_and_update`
//! with `$set`/`$push`, never a full-document replace, matching the
//! concurrency model in `spec.md` §5.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, to_bson};
use mongodb::options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};
use rust_decimal::Decimal;

use crate::domain::{DedupEvent, FlowType, Transaction};
use crate::errors::{CoreError, CoreResult};
use crate::repo::traits::{DedupRepository, TransactionFilter, TransactionRepository};

pub struct MongoRepository {
    transactions: Collection<Transaction>,
    dedup_events: Collection<DedupEvent>,
}

impl MongoRepository {
    pub async fn connect(uri: &str) -> CoreResult<Self> {
        let client = mongodb::Client::with_uri_str(uri)
            .await
            .map_err(|e| CoreError::config(format!("failed to connect to mongo: {e}")))?;
        let db = client.default_database().unwrap_or_else(|| client.database("dotpay"));
        let repo = Self::from_database(&db);
        repo.ensure_indexes().await?;
        Ok(repo)
    }

    pub fn from_database(db: &Database) -> Self {
        MongoRepository {
            transactions: db.collection("transactions"),
            dedup_events: db.collection("dedup_events"),
        }
    }

    async fn ensure_indexes(&self) -> CoreResult<()> {
        let unique = |keys: mongodb::bson::Document| {
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build()
        };
        let partial_unique = |keys: mongodb::bson::Document, filter: mongodb::bson::Document| {
            IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(filter)
                        .build(),
                )
                .build()
        };

        let tx_indexes = vec![
            unique(doc! { "transactionId": 1 }),
            IndexModel::builder()
                .keys(doc! { "userAddress": 1, "createdAt": -1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "flowType": 1, "status": 1, "createdAt": -1 })
                .build(),
            partial_unique(
                doc! { "onchain.txHash": 1 },
                doc! { "onchain.txHash": { "$exists": true, "$ne": null } },
            ),
            partial_unique(
                doc! { "userAddress": 1, "flowType": 1, "idempotencyKey": 1 },
                doc! { "idempotencyKey": { "$exists": true, "$ne": null } },
            ),
        ];
        self.transactions
            .create_indexes(tx_indexes)
            .await
            .map_err(|e| CoreError::external(format!("failed to create transaction indexes: {e}")))?;

        let dedup_indexes = vec![
            unique(doc! { "eventKey": 1 }),
            IndexModel::builder()
                .keys(doc! { "transactionId": 1, "receivedAt": 1 })
                .build(),
        ];
        self.dedup_events
            .create_indexes(dedup_indexes)
            .await
            .map_err(|e| CoreError::external(format!("failed to create dedup indexes: {e}")))?;
        Ok(())
    }
}

fn duplicate_key_error(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(we))
            if we.code == 11000
    )
}

#[async_trait]
impl TransactionRepository for MongoRepository {
    async fn insert(&self, tx: Transaction) -> CoreResult<Transaction> {
        match self.transactions.insert_one(&tx).await {
            Ok(_) => Ok(tx),
            Err(e) if duplicate_key_error(&e) => {
                Err(CoreError::state("duplicate idempotency key or onchain tx hash"))
            }
            Err(e) => Err(CoreError::external(format!("failed to insert transaction: {e}"))),
        }
    }

    async fn get(&self, transaction_id: &str) -> CoreResult<Option<Transaction>> {
        self.transactions
            .find_one(doc! { "transactionId": transaction_id })
            .await
            .map_err(|e| CoreError::external(format!("failed to fetch transaction: {e}")))
    }

    async fn find_by_idempotency_key(
        &self,
        user_address: &str,
        flow_type: FlowType,
        idempotency_key: &str,
    ) -> CoreResult<Option<Transaction>> {
        let flow_type_bson = to_bson(&flow_type)
            .map_err(|e| CoreError::external(format!("failed to encode flow type: {e}")))?;
        self.transactions
            .find_one(doc! {
                "userAddress": user_address,
                "flowType": flow_type_bson,
                "idempotencyKey": idempotency_key,
            })
            .await
            .map_err(|e| CoreError::external(format!("failed to fetch transaction: {e}")))
    }

    async fn find_by_provider_id(&self, field: &str, value: &str) -> CoreResult<Option<Transaction>> {
        self.transactions
            .find_one(doc! { format!("daraja.{field}"): value })
            .await
            .map_err(|e| CoreError::external(format!("failed to fetch transaction: {e}")))
    }

    async fn list(&self, user_address: &str, filter: &TransactionFilter) -> CoreResult<Vec<Transaction>> {
        use futures_util::TryStreamExt;

        let mut query = doc! { "userAddress": user_address };
        if let Some(flow_type) = filter.flow_type {
            query.insert(
                "flowType",
                to_bson(&flow_type).map_err(|e| CoreError::external(format!("failed to encode flow type: {e}")))?,
            );
        }
        if let Some(status) = filter.status {
            query.insert(
                "status",
                to_bson(&status).map_err(|e| CoreError::external(format!("failed to encode status: {e}")))?,
            );
        }
        let mut options = mongodb::options::FindOptions::default();
        options.sort = Some(doc! { "createdAt": -1 });
        options.limit = filter.limit;

        let cursor = self
            .transactions
            .find(query)
            .with_options(options)
            .await
            .map_err(|e| CoreError::external(format!("failed to list transactions: {e}")))?;
        cursor
            .try_collect()
            .await
            .map_err(|e| CoreError::external(format!("failed to read transactions: {e}")))
    }

    async fn sum_today_kes(&self, user_address: &str, since: DateTime<Utc>) -> CoreResult<Decimal> {
        use futures_util::TryStreamExt;

        let cursor = self
            .transactions
            .find(doc! {
                "userAddress": user_address,
                "status": { "$ne": "failed" },
                "createdAt": { "$gte": since },
            })
            .await
            .map_err(|e| CoreError::external(format!("failed to sum daily total: {e}")))?;
        let txs: Vec<Transaction> = cursor
            .try_collect()
            .await
            .map_err(|e| CoreError::external(format!("failed to read daily total: {e}")))?;
        Ok(txs
            .iter()
            .filter_map(|t| t.quote.as_ref().map(|q| q.total_debit_kes))
            .sum())
    }

    async fn save(&self, updated: Transaction) -> CoreResult<Transaction> {
        let document = mongodb::bson::to_document(&updated)
            .map_err(|e| CoreError::external(format!("failed to encode transaction: {e}")))?;
        let result = self
            .transactions
            .find_one_and_update(
                doc! { "transactionId": &updated.transaction_id },
                doc! { "$set": document },
            )
            .with_options(
                FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await
            .map_err(|e| CoreError::external(format!("failed to save transaction: {e}")))?;
        result.ok_or_else(|| CoreError::state("transaction not found during save"))
    }

    async fn find_stuck_processing(&self, older_than: DateTime<Utc>, limit: i64) -> CoreResult<Vec<Transaction>> {
        use futures_util::TryStreamExt;

        let mut options = mongodb::options::FindOptions::default();
        options.sort = Some(doc! { "updatedAt": 1 });
        options.limit = Some(limit);

        let cursor = self
            .transactions
            .find(doc! {
                "status": "mpesa_processing",
                "updatedAt": { "$lt": older_than },
            })
            .with_options(options)
            .await
            .map_err(|e| CoreError::external(format!("failed to scan stuck transactions: {e}")))?;
        cursor
            .try_collect()
            .await
            .map_err(|e| CoreError::external(format!("failed to read stuck transactions: {e}")))
    }
}

#[async_trait]
impl DedupRepository for MongoRepository {
    async fn try_insert(&self, event: DedupEvent) -> CoreResult<bool> {
        match self.dedup_events.insert_one(&event).await {
            Ok(_) => Ok(true),
            Err(e) if duplicate_key_error(&e) => Ok(false),
            Err(e) => Err(CoreError::external(format!("failed to insert dedup event: {e}"))),
        }
    }
}
