//! Bulk write pipeline (C5/C6): per-shard primary execution and replica
//! application for `indices:data/write/bulk[s]`.

pub mod memory_shard;
pub mod primary;
pub mod replica;
pub mod types;

pub use memory_shard::InMemoryShard;
pub use primary::BulkPrimaryExecutor;
pub use replica::{BulkReplicaExecutor, RetryOnReplica};
pub use types::{
    BulkConfig, ExecuteOutcome, PrimaryShard, ReplicaApplyOutcome, ReplicaOp, ReplicaShard,
    TranslatedOp,
};
