//! Shared types for the bulk write pipeline: shard-level storage seams and
//! the per-item state machine the primary and replica executors drive.

use async_trait::async_trait;
use lattice_core::messages::BulkItemOutcome;
use lattice_core::MapSchema;

use crate::cluster::ClusterError;

/// Knobs shared by the primary and replica executors.
#[derive(Debug, Clone)]
pub struct BulkConfig {
    /// How long an item may wait for a mapping update to propagate before
    /// finalizing as `MappingUpdateTimeout`, bounding the otherwise-unbounded
    /// mapping-availability retry.
    pub mapping_wait_timeout_ms: u64,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self { mapping_wait_timeout_ms: 30_000 }
    }
}

/// Outcome of the translate step for `update` items: the update helper's
/// stored script / doc-merge resolves to one of these before execution.
#[derive(Debug, Clone)]
pub enum TranslatedOp {
    /// The merge produced no change; the item completes without touching storage.
    Noop,
    Index { source: serde_json::Value },
    Delete,
}

/// Outcome of applying an index or delete on the primary shard.
#[derive(Debug, Clone)]
pub enum ExecuteOutcome {
    Success { seq_no: u64, primary_term: u64, version: u64, result: BulkItemOutcome },
    /// `seq_no`/`primary_term` are `Some` when the engine allocated a
    /// sequence number before the failure occurred (e.g. a version conflict
    /// detected after allocation) -- that seq-no must still replicate as a
    /// no-op so the replica's sequence stays contiguous.
    Failure { seq_no: Option<u64>, primary_term: Option<u64>, error: String },
    MappingUpdateRequired { proposed_mapping: MapSchema },
}

/// The operation a replica is asked to apply, with the primary's assigned
/// sequencing already attached.
#[derive(Debug, Clone)]
pub enum ReplicaOp {
    Index { source: serde_json::Value },
    Delete,
}

/// Outcome of applying an operation (or a no-op marker) on a replica shard.
#[derive(Debug, Clone)]
pub enum ReplicaApplyOutcome {
    Applied,
    MappingUpdateRequired { proposed_mapping: MapSchema },
}

/// Per-shard write surface the primary executor drives. Kept free of any
/// concrete storage engine dependency, mirroring the `RecordStore` seam.
#[async_trait]
pub trait PrimaryShard: Send + Sync {
    fn shard_id(&self) -> u32;

    /// Runs the partial-doc merge for an `update` item against the currently
    /// stored document, producing the concrete index/delete/no-op it resolves
    /// to. `partial` is the item's own `source` field; `None` for an update
    /// with nothing to merge, which always resolves to `Noop`.
    async fn translate_update(
        &self,
        index: &str,
        id: &str,
        partial: Option<&serde_json::Value>,
    ) -> Result<TranslatedOp, ClusterError>;

    async fn execute_index(
        &self,
        index: &str,
        id: &str,
        source: serde_json::Value,
        if_seq_no: Option<u64>,
        if_primary_term: Option<u64>,
    ) -> Result<ExecuteOutcome, ClusterError>;

    async fn execute_delete(
        &self,
        index: &str,
        id: &str,
        if_seq_no: Option<u64>,
        if_primary_term: Option<u64>,
    ) -> Result<ExecuteOutcome, ClusterError>;
}

/// Per-shard write surface the replica executor drives.
#[async_trait]
pub trait ReplicaShard: Send + Sync {
    fn shard_id(&self) -> u32;

    /// Applies `op` at the primary's assigned `seq_no`/`primary_term`.
    async fn apply(
        &self,
        index: &str,
        id: &str,
        op: ReplicaOp,
        seq_no: u64,
        primary_term: u64,
    ) -> Result<ReplicaApplyOutcome, ClusterError>;

    /// Marks `seq_no` as a no-op on the replica (primary failed after
    /// assigning a seq-no).
    async fn mark_noop(&self, index: &str, id: &str, seq_no: u64, primary_term: u64) -> Result<(), ClusterError>;
}
