//! Wire payloads for the bulk shard write API (`indices:data/write/bulk[s]`).

use serde::{Deserialize, Serialize};

/// Kind of per-item write operation requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOpType {
    Index,
    Update,
    Delete,
}

/// Consistency level required before a bulk shard request is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteConsistency {
    One,
    Quorum,
    All,
}

/// A single item within a bulk shard request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemRequest {
    pub op_type: BulkOpType,
    pub index: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub routing: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub if_seq_no: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub if_primary_term: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<serde_json::Value>,
    /// Number of times to retry an `update` on a version conflict. Ignored
    /// for `index`/`delete` items.
    #[serde(default)]
    pub retry_on_conflict: u32,
}

/// A bulk write request scoped to a single shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkShardRequest {
    pub shard_id: u32,
    pub items: Vec<BulkItemRequest>,
    pub write_consistency: WriteConsistency,
    pub timeout_ms: u64,
}

/// Outcome of applying a single bulk item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkItemOutcome {
    Created,
    Updated,
    Deleted,
    NotFound,
    Noop,
    Failed,
}

/// Per-item response returned to the client after a bulk shard request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemResponse {
    pub op_type: BulkOpType,
    pub index: String,
    pub id: String,
    pub result: BulkItemOutcome,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub seq_no: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub primary_term: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Response to a bulk shard request: one result per input item, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkShardResponse {
    pub shard_id: u32,
    pub items: Vec<BulkItemResponse>,
}
