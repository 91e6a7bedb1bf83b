//! Bulk replica executor (C6): derives an execution mode per item from the
//! primary's recorded response and applies it on a [`ReplicaShard`].

use std::sync::Arc;

use lattice_core::messages::{BulkItemOutcome, BulkItemResponse};
use lattice_core::MapSchema;

use crate::cluster::ClusterError;

use super::types::{ReplicaApplyOutcome, ReplicaOp, ReplicaShard};

/// The mode derived from a primary's per-item response.
#[derive(Debug, Clone, PartialEq)]
enum ExecutionMode {
    /// Primary succeeded: apply the same operation at the same seq-no/version.
    Normal { seq_no: u64, primary_term: u64 },
    /// Primary failed after assigning a seq-no: mark that seq-no as a no-op.
    Failure { seq_no: u64, primary_term: u64 },
    /// Primary failed before assigning a seq-no, or was an explicit no-op: skip.
    Noop,
}

fn derive_mode(primary_response: &BulkItemResponse) -> ExecutionMode {
    match (primary_response.result, primary_response.seq_no, primary_response.primary_term) {
        (BulkItemOutcome::Noop, _, _) => ExecutionMode::Noop,
        (_, None, _) | (_, _, None) => ExecutionMode::Noop,
        (BulkItemOutcome::Failed, Some(seq_no), Some(primary_term)) => {
            ExecutionMode::Failure { seq_no, primary_term }
        }
        (_, Some(seq_no), Some(primary_term)) => ExecutionMode::Normal { seq_no, primary_term },
    }
}

/// Signal raised when applying on the replica itself requires a mapping
/// update the replica hasn't observed yet. The caller is expected to wait
/// for the replica's own cluster state to catch up and retry -- primary and
/// replica may observe mapping publications at different moments.
#[derive(Debug)]
pub struct RetryOnReplica {
    pub index: String,
    pub id: String,
    pub proposed_mapping: MapSchema,
}

pub struct BulkReplicaExecutor<S: ReplicaShard> {
    shard: Arc<S>,
}

impl<S: ReplicaShard> BulkReplicaExecutor<S> {
    pub fn new(shard: Arc<S>) -> Self {
        Self { shard }
    }

    /// Applies one primary-finalized item on this replica.
    ///
    /// Returns `Ok(None)` when the item is skipped (`Noop` mode) or applied
    /// cleanly, `Ok(Some(retry))` when the replica needs the caller to wait
    /// for a mapping update before retrying, and `Err` for any other
    /// replica-side failure.
    pub async fn apply_item(
        &self,
        index: &str,
        primary_response: &BulkItemResponse,
        source: Option<serde_json::Value>,
    ) -> Result<Option<RetryOnReplica>, ClusterError> {
        match derive_mode(primary_response) {
            ExecutionMode::Noop => Ok(None),
            ExecutionMode::Failure { seq_no, primary_term } => {
                self.shard.mark_noop(index, &primary_response.id, seq_no, primary_term).await?;
                Ok(None)
            }
            ExecutionMode::Normal { seq_no, primary_term } => {
                let op = match primary_response.op_type {
                    lattice_core::messages::BulkOpType::Delete => ReplicaOp::Delete,
                    _ => ReplicaOp::Index { source: source.unwrap_or(serde_json::Value::Null) },
                };

                match self.shard.apply(index, &primary_response.id, op, seq_no, primary_term).await? {
                    ReplicaApplyOutcome::Applied => Ok(None),
                    ReplicaApplyOutcome::MappingUpdateRequired { proposed_mapping } => {
                        Ok(Some(RetryOnReplica {
                            index: index.to_string(),
                            id: primary_response.id.clone(),
                            proposed_mapping,
                        }))
                    }
                }
            }
        }
    }
}
