//! Bulk primary executor (C5): per-shard driver over the ordered items of a
//! bulk shard request.
//!
//! Each item runs translate / execute / finalize as a cooperative state
//! machine -- the same logical task suspends on `MappingUpdateRequired` and
//! resumes once the cluster state observer reports a change, rather than
//! blocking a writer-pool thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lattice_core::messages::{
    BulkItemOutcome, BulkItemRequest, BulkItemResponse, BulkOpType, BulkShardRequest,
    BulkShardResponse, WriteConsistency,
};

use crate::cluster::{ClusterError, ClusterStateStore, MappingCoordinator, PutMappingRequest};

use super::types::{BulkConfig, ExecuteOutcome, PrimaryShard, TranslatedOp};

/// Drives a `BulkShardRequest` to completion against a concrete [`PrimaryShard`].
pub struct BulkPrimaryExecutor<S: PrimaryShard> {
    shard: Arc<S>,
    mapping: Arc<MappingCoordinator>,
    store: Arc<ClusterStateStore>,
    config: BulkConfig,
}

impl<S: PrimaryShard> BulkPrimaryExecutor<S> {
    pub fn new(
        shard: Arc<S>,
        mapping: Arc<MappingCoordinator>,
        store: Arc<ClusterStateStore>,
        config: BulkConfig,
    ) -> Self {
        Self { shard, mapping, store, config }
    }

    /// Executes every item in order, returning once each has finalized
    /// exactly once.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::Validation` if the shard does not currently
    /// hold enough active copies (owner + backups) to satisfy
    /// `write_consistency`. Individual item failures never surface as an
    /// `Err` here -- they are reported per-item in the response.
    pub async fn execute_shard(&self, request: BulkShardRequest) -> Result<BulkShardResponse, ClusterError> {
        self.check_consistency(&request)?;

        let deadline = Instant::now() + Duration::from_millis(request.timeout_ms);
        let mut items = Vec::with_capacity(request.items.len());
        for item in request.items {
            items.push(self.execute_item(item, deadline).await);
        }

        Ok(BulkShardResponse { shard_id: request.shard_id, items })
    }

    fn check_consistency(&self, request: &BulkShardRequest) -> Result<(), ClusterError> {
        let snapshot = self.store.current();
        let Some(meta) = snapshot.routing.get(&request.shard_id) else {
            return Err(ClusterError::Validation(format!(
                "shard {} has no routing entry",
                request.shard_id
            )));
        };

        let total_copies = 1 + meta.backups.len();
        let required = match request.write_consistency {
            WriteConsistency::One => 1,
            WriteConsistency::Quorum => total_copies / 2 + 1,
            WriteConsistency::All => total_copies,
        };

        if total_copies < required {
            return Err(ClusterError::Validation(format!(
                "shard {} has {total_copies} active copies, {required} required for {:?}",
                request.shard_id, request.write_consistency
            )));
        }
        Ok(())
    }

    /// Runs one item through translate / execute / finalize. Each call
    /// finalizes exactly once; mapping-update waits and conflict retries
    /// loop internally and never return early.
    async fn execute_item(&self, item: BulkItemRequest, deadline: Instant) -> BulkItemResponse {
        let mut conflict_retries = 0u32;

        loop {
            let translated = match item.op_type {
                BulkOpType::Update => match self
                    .shard
                    .translate_update(&item.index, &item.id, item.source.as_ref())
                    .await
                {
                    Ok(t) => t,
                    Err(err) => return failed(&item, None, None, err.to_string()),
                },
                BulkOpType::Index => TranslatedOp::Index {
                    source: item.source.clone().unwrap_or(serde_json::Value::Null),
                },
                BulkOpType::Delete => TranslatedOp::Delete,
            };

            let execute_result = match translated {
                TranslatedOp::Noop => return noop(&item),
                TranslatedOp::Index { source } => {
                    self.shard
                        .execute_index(&item.index, &item.id, source, item.if_seq_no, item.if_primary_term)
                        .await
                }
                TranslatedOp::Delete => {
                    self.shard
                        .execute_delete(&item.index, &item.id, item.if_seq_no, item.if_primary_term)
                        .await
                }
            };

            match execute_result {
                Ok(ExecuteOutcome::Success { seq_no, primary_term, version, result }) => {
                    return BulkItemResponse {
                        op_type: item.op_type,
                        index: item.index,
                        id: item.id,
                        result,
                        seq_no: Some(seq_no),
                        primary_term: Some(primary_term),
                        version: Some(version),
                        error: None,
                    };
                }
                Ok(ExecuteOutcome::Failure { seq_no, primary_term, error }) => {
                    return failed(&item, seq_no, primary_term, error)
                }
                Ok(ExecuteOutcome::MappingUpdateRequired { proposed_mapping }) => {
                    if Instant::now() >= deadline {
                        return failed(
                            &item,
                            None,
                            None,
                            ClusterError::MappingUpdateTimeout {
                                index: item.index.clone(),
                                timeout_ms: self.config.mapping_wait_timeout_ms,
                            }
                            .to_string(),
                        );
                    }

                    let baseline_version = self.store.current().version;

                    let publish = self
                        .mapping
                        .put_mapping(
                            &self.store,
                            vec![PutMappingRequest { index: item.index.clone(), mapping: proposed_mapping }],
                            Duration::from_millis(self.config.mapping_wait_timeout_ms),
                        )
                        .await;

                    if let Err(err) = publish {
                        if !err.is_retryable() {
                            return failed(&item, None, None, err.to_string());
                        }
                    }

                    // Wait for a snapshot newer than the one observed before
                    // publishing, bounded by the item's overall deadline so
                    // mapping-unavailability can't hold the shard forever.
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let _ = tokio::time::timeout(remaining, self.store.wait_for_version_after(baseline_version)).await;
                    // Loop back to INITIAL: re-translate and re-execute.
                }
                Err(ClusterError::VersionConflict { .. }) => {
                    if item.op_type == BulkOpType::Update && conflict_retries < item.retry_on_conflict {
                        conflict_retries += 1;
                        continue;
                    }
                    return failed(&item, None, None, "version conflict".to_string());
                }
                Err(err) => return failed(&item, None, None, err.to_string()),
            }
        }
    }
}

fn noop(item: &BulkItemRequest) -> BulkItemResponse {
    BulkItemResponse {
        op_type: item.op_type,
        index: item.index.clone(),
        id: item.id.clone(),
        result: BulkItemOutcome::Noop,
        seq_no: None,
        primary_term: None,
        version: None,
        error: None,
    }
}

/// Builds a failed item response. `seq_no` is `Some` only when the primary
/// had already assigned one before failing -- that seq-no still needs to
/// replicate as a no-op, so callers that have one must pass it through.
fn failed(item: &BulkItemRequest, seq_no: Option<u64>, primary_term: Option<u64>, error: String) -> BulkItemResponse {
    BulkItemResponse {
        op_type: item.op_type,
        index: item.index.clone(),
        id: item.id.clone(),
        result: BulkItemOutcome::Failed,
        seq_no,
        primary_term,
        version: None,
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use lattice_core::{FieldDef, FieldType, MapSchema};

    use super::*;
    use crate::cluster::state_loop;
    use crate::cluster::types::{IndexMetadata, PartitionMeta, PartitionState};
    use crate::cluster::{StateTask, TaskOutcome, TaskPriority};

    /// Test double: always succeeds, optionally demanding one mapping update
    /// before it will accept an index for a given field.
    struct FakeShard {
        seq_no: AtomicU64,
        fail_index: bool,
        require_mapping_once: Mutex<bool>,
    }

    impl FakeShard {
        fn new() -> Self {
            Self { seq_no: AtomicU64::new(0), fail_index: false, require_mapping_once: Mutex::new(false) }
        }

        fn requiring_mapping_once() -> Self {
            Self { seq_no: AtomicU64::new(0), fail_index: false, require_mapping_once: Mutex::new(true) }
        }

        fn failing() -> Self {
            Self { seq_no: AtomicU64::new(0), fail_index: true, require_mapping_once: Mutex::new(false) }
        }
    }

    #[async_trait]
    impl PrimaryShard for FakeShard {
        fn shard_id(&self) -> u32 {
            0
        }

        async fn translate_update(
            &self,
            _index: &str,
            _id: &str,
            _partial: Option<&serde_json::Value>,
        ) -> Result<TranslatedOp, ClusterError> {
            Ok(TranslatedOp::Noop)
        }

        async fn execute_index(
            &self,
            _index: &str,
            _id: &str,
            _source: serde_json::Value,
            _if_seq_no: Option<u64>,
            _if_primary_term: Option<u64>,
        ) -> Result<ExecuteOutcome, ClusterError> {
            if self.fail_index {
                return Ok(ExecuteOutcome::Failure {
                    seq_no: None,
                    primary_term: None,
                    error: "simulated storage failure".into(),
                });
            }

            let mut needs_mapping = self.require_mapping_once.lock().unwrap();
            if *needs_mapping {
                *needs_mapping = false;
                return Ok(ExecuteOutcome::MappingUpdateRequired {
                    proposed_mapping: MapSchema::new(
                        1,
                        vec![FieldDef { name: "new_field".to_string(), required: false, field_type: FieldType::Long }],
                    ),
                });
            }

            let seq_no = self.seq_no.fetch_add(1, Ordering::Relaxed);
            Ok(ExecuteOutcome::Success {
                seq_no,
                primary_term: 1,
                version: seq_no + 1,
                result: BulkItemOutcome::Created,
            })
        }

        async fn execute_delete(
            &self,
            _index: &str,
            _id: &str,
            _if_seq_no: Option<u64>,
            _if_primary_term: Option<u64>,
        ) -> Result<ExecuteOutcome, ClusterError> {
            let seq_no = self.seq_no.fetch_add(1, Ordering::Relaxed);
            Ok(ExecuteOutcome::Success { seq_no, primary_term: 1, version: seq_no + 1, result: BulkItemOutcome::Deleted })
        }
    }

    fn item(op_type: BulkOpType, id: &str) -> BulkItemRequest {
        BulkItemRequest {
            op_type,
            index: "logs".to_string(),
            id: id.to_string(),
            routing: None,
            version: None,
            if_seq_no: None,
            if_primary_term: None,
            source: Some(serde_json::json!({"msg": "hi"})),
            retry_on_conflict: 0,
        }
    }

    async fn harness<S: PrimaryShard + 'static>(shard: S) -> (BulkPrimaryExecutor<S>, Arc<ClusterStateStore>) {
        let (handle, store, _join) = state_loop::spawn("n1".to_string(), 16);

        let name = "logs".to_string();
        let (task, rx) = StateTask::new(TaskPriority::Immediate, "seed", move |current, _| {
            let mut next = current.clone();
            next.indices.insert(name.clone(), IndexMetadata::new("uuid-1".into(), name, 1));
            next.routing.insert(
                0,
                PartitionMeta { partition_id: 0, owner: "n1".to_string(), backups: vec![], state: PartitionState::Active, version: 1 },
            );
            TaskOutcome::Publish(next)
        });
        handle.submit(task).unwrap();
        rx.await.unwrap();

        let mapping = Arc::new(crate::cluster::MappingCoordinator::new(handle, 16));
        let executor = BulkPrimaryExecutor::new(Arc::new(shard), mapping, store.clone(), BulkConfig::default());
        (executor, store)
    }

    fn shard_request(items: Vec<BulkItemRequest>) -> BulkShardRequest {
        BulkShardRequest { shard_id: 0, items, write_consistency: WriteConsistency::One, timeout_ms: 5_000 }
    }

    #[tokio::test]
    async fn successful_index_assigns_seq_no() {
        let (executor, _store) = harness(FakeShard::new()).await;
        let response = executor
            .execute_shard(shard_request(vec![item(BulkOpType::Index, "1")]))
            .await
            .unwrap();

        assert_eq!(response.items.len(), 1);
        assert_eq!(response.items[0].result, BulkItemOutcome::Created);
        assert_eq!(response.items[0].seq_no, Some(0));
    }

    #[tokio::test]
    async fn update_resolving_to_noop_skips_storage() {
        let (executor, _store) = harness(FakeShard::new()).await;
        let response = executor
            .execute_shard(shard_request(vec![item(BulkOpType::Update, "1")]))
            .await
            .unwrap();

        assert_eq!(response.items[0].result, BulkItemOutcome::Noop);
        assert_eq!(response.items[0].seq_no, None);
    }

    #[tokio::test]
    async fn storage_failure_finalizes_as_failed_with_no_seq_no() {
        let (executor, _store) = harness(FakeShard::failing()).await;
        let response = executor
            .execute_shard(shard_request(vec![item(BulkOpType::Index, "1")]))
            .await
            .unwrap();

        assert_eq!(response.items[0].result, BulkItemOutcome::Failed);
        assert!(response.items[0].error.is_some());
        assert_eq!(response.items[0].seq_no, None);
    }

    #[tokio::test]
    async fn mapping_update_required_retries_and_succeeds_after_publish() {
        let (executor, _store) = harness(FakeShard::requiring_mapping_once()).await;
        let response = executor
            .execute_shard(shard_request(vec![item(BulkOpType::Index, "1")]))
            .await
            .unwrap();

        assert_eq!(response.items[0].result, BulkItemOutcome::Created);
        assert_eq!(response.items[0].seq_no, Some(0));
    }

    #[tokio::test]
    async fn insufficient_copies_for_quorum_rejects_before_any_item_runs() {
        let (executor, _store) = harness(FakeShard::new()).await;
        let mut request = shard_request(vec![item(BulkOpType::Index, "1")]);
        request.write_consistency = WriteConsistency::Quorum;

        let err = executor.execute_shard(request).await.unwrap_err();
        assert!(matches!(err, ClusterError::Validation(_)));
    }
}
