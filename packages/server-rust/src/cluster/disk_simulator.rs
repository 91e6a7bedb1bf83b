//! Cluster-info simulator (C7): disk usage projection for the allocator.
//!
//! Consumes the same [`MigrationTask`](super::types::MigrationTask) plan
//! `assignment::plan_rebalance` produces. Never persisted — the projection
//! exists only so the allocator can reserve space correctly before a shard
//! actually finishes relocating or initializing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::types::MigrationTask;

/// Free/total bytes for one writable path on a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl DiskUsage {
    /// Applies a signed delta to free space, clamped to `[0, total_bytes]`.
    /// A positive delta frees space (a shard left); negative consumes it.
    fn apply_delta(&mut self, delta: i64) {
        let current = self.free_bytes as i64;
        let next = (current + delta).clamp(0, self.total_bytes as i64);
        self.free_bytes = next as u64;
    }
}

/// Projected disk state for one node: one path per writable data directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeDiskProjection {
    pub paths: Vec<DiskUsage>,
}

impl NodeDiskProjection {
    pub fn single(usage: DiskUsage) -> Self {
        Self { paths: vec![usage] }
    }

    fn is_multi_path(&self) -> bool {
        self.paths.len() > 1
    }

    fn most_available_index(&self) -> Option<usize> {
        self.paths
            .iter()
            .enumerate()
            .max_by_key(|(_, usage)| usage.free_bytes)
            .map(|(idx, _)| idx)
    }

    /// Charges `delta` bytes of free space to this node's projection.
    ///
    /// Single-path nodes apply the delta to their one path, which is
    /// simultaneously the least- and most-available view. Multi-path nodes
    /// apply it only to the most-available path, to avoid double counting
    /// a shard that could in principle land on any of several paths.
    fn charge(&mut self, delta: i64) {
        if self.paths.is_empty() {
            return;
        }
        let idx = if self.is_multi_path() {
            self.most_available_index().unwrap_or(0)
        } else {
            0
        };
        self.paths[idx].apply_delta(delta);
    }
}

/// Working set of per-node disk projections, mutated in place as the
/// simulator projects planned placements.
#[derive(Debug, Clone, Default)]
pub struct DiskSimulator {
    nodes: HashMap<String, NodeDiskProjection>,
}

impl DiskSimulator {
    pub fn new(nodes: HashMap<String, NodeDiskProjection>) -> Self {
        Self { nodes }
    }

    pub fn projection(&self, node_id: &str) -> Option<&NodeDiskProjection> {
        self.nodes.get(node_id)
    }

    /// Projects a relocating shard: destination gains `shard_size` of usage;
    /// source regains it only if `reserve_source_space` says the allocator's
    /// policy reserves space for the in-flight relocation.
    pub fn project_relocation(&mut self, task: &MigrationTask, shard_size: u64, reserve_source_space: bool) {
        let size = shard_size as i64;
        if let Some(dest) = self.nodes.get_mut(&task.destination) {
            dest.charge(-size);
        }
        if reserve_source_space {
            if let Some(source) = self.nodes.get_mut(&task.source) {
                source.charge(size);
            }
        }
    }

    /// Projects a newly initializing shard with no source: only the
    /// destination's usage changes.
    pub fn project_new_shard(&mut self, destination_node_id: &str, shard_size: u64) {
        if let Some(dest) = self.nodes.get_mut(destination_node_id) {
            dest.charge(-(shard_size as i64));
        }
    }
}
