use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupSource {
    Webhook,
    Reconcile,
    System,
}

/// A persisted record uniquely identifying an applied webhook callback (or
/// reconcile/system event), per `spec.md` §3 "DedupEvent".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupEvent {
    pub event_key: String,
    pub transaction_id: String,
    pub source: DedupSource,
    pub event_type: String,
    pub payload: Json,
    pub received_at: DateTime<Utc>,
}
