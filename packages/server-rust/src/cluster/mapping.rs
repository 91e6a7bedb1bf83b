//! Mapping coordinator (C4): serializes dynamic mapping updates on the master.
//!
//! `put_mapping` batches run on the state loop at `HIGH` priority. A request
//! whose mapping source already byte-matches (via content hash) the index's
//! current mapping is fast-pathed before scheduling; everything else is
//! validated and merged inside the state task itself, against whatever
//! snapshot happens to be current when the task actually runs.

use std::sync::Arc;
use std::time::Duration;

use lattice_core::{MapSchema, ValidationResult};
use quick_cache::sync::Cache;
use tracing::info;

use super::error::ClusterError;
use super::state_loop::{ClusterStateStore, StateLoopHandle, StateTask, TaskAck, TaskOutcome, TaskPriority};
use super::types::ClusterStateSnapshot;

/// A single index's requested mapping change.
#[derive(Debug, Clone)]
pub struct PutMappingRequest {
    pub index: String,
    pub mapping: MapSchema,
}

/// Serializes `put_mapping` batches through the single-writer state loop.
///
/// The per-index mapper cache is seeded from current metadata on first use
/// and bounded so memory doesn't grow with the number of indices ever
/// touched, standing in for "closed after the batch" without needing
/// explicit open/close bookkeeping per task.
pub struct MappingCoordinator {
    state_loop: StateLoopHandle,
    mapper_cache: Cache<String, Arc<MapSchema>>,
}

impl MappingCoordinator {
    pub fn new(state_loop: StateLoopHandle, cache_capacity: usize) -> Self {
        Self { state_loop, mapper_cache: Cache::new(cache_capacity) }
    }

    fn seed_mapper(&self, index: &str, current: &ClusterStateSnapshot) -> Arc<MapSchema> {
        if let Some(cached) = self.mapper_cache.get(index) {
            return cached;
        }
        let seeded = Arc::new(
            current
                .get_index(index)
                .map(|meta| meta.mapping.clone())
                .unwrap_or_default(),
        );
        self.mapper_cache.insert(index.to_string(), seeded.clone());
        seeded
    }

    /// Runs a `put_mapping` batch. Returns `Ok(true)` once every request is
    /// acknowledged (published or already a no-op), `Ok(false)` if the ack
    /// timeout elapses without error, or `Err` for a rejected or failed
    /// batch.
    pub async fn put_mapping(
        &self,
        store: &ClusterStateStore,
        requests: Vec<PutMappingRequest>,
        ack_timeout: Duration,
    ) -> Result<bool, ClusterError> {
        let current = store.current();

        let pending: Vec<PutMappingRequest> = requests
            .into_iter()
            .filter(|req| {
                let already_current = current
                    .get_index(&req.index)
                    .is_some_and(|meta| meta.mapping.content_hash() == req.mapping.content_hash());
                if already_current {
                    info!(index = %req.index, "mapping fast-path: source unchanged, acking without scheduling");
                }
                !already_current
            })
            .collect();

        if pending.is_empty() {
            return Ok(true);
        }

        for req in &pending {
            self.seed_mapper(&req.index, &current);
        }

        let (task, ack_rx) = StateTask::new(TaskPriority::High, "put_mapping", move |current, _is_master| {
            apply_put_mapping(current, &pending)
        });

        self.state_loop.submit(task).map_err(|_| ClusterError::NodeClosed)?;

        match tokio::time::timeout(ack_timeout, ack_rx).await {
            Ok(Ok(TaskAck::Published(_) | TaskAck::NoOp(_))) => Ok(true),
            Ok(Ok(TaskAck::Failed(message))) => Err(ClusterError::Validation(message)),
            Ok(Ok(TaskAck::NoLongerMaster)) => Err(ClusterError::NotMaster),
            Ok(Err(_)) => Err(ClusterError::NodeClosed),
            Err(_) => Ok(false),
        }
    }
}

fn apply_put_mapping(current: &ClusterStateSnapshot, pending: &[PutMappingRequest]) -> TaskOutcome {
    let mut next = current.clone();
    let mut changed = false;

    for req in pending {
        let Some(meta) = next.indices.get(&req.index) else {
            return TaskOutcome::Failed(format!("unknown index: {}", req.index));
        };

        if meta.mapping.content_hash() == req.mapping.content_hash() {
            continue;
        }

        match meta.mapping.validate_merge(&req.mapping) {
            ValidationResult::Invalid { errors } => {
                return TaskOutcome::Failed(format!("mapping rejected for index {}: {}", req.index, errors.join("; ")));
            }
            ValidationResult::Valid => {}
        }

        let merged = meta.mapping.merge(&req.mapping);
        if merged.content_hash() != meta.mapping.content_hash() {
            let mut new_meta = meta.clone();
            new_meta.mapping_version += 1;
            new_meta.mapping = merged;
            next.indices.insert(req.index.clone(), new_meta);
            changed = true;
        }
    }

    if changed {
        TaskOutcome::Publish(next)
    } else {
        TaskOutcome::NoOp
    }
}
