//! Partition hash and lookup for distributing data across cluster nodes.
//!
//! `Lattice` uses 271 hash-based partitions. The partition hash function
//! (`fnv1a_hash(key) % 271`) is the shared contract between the TS client,
//! TS server, and Rust server. This module provides:
//!
//! - [`PARTITION_COUNT`]: The number of partitions (271, a prime for uniform distribution)
//! - [`hash_to_partition`]: Maps a string key to a partition ID in `[0, 271)`
//! - [`PartitionLookup`]: Read-only trait for partition ownership queries
//! - [`PartitionTable`]: Versioned partition-to-owner lookup, populated from wire messages
//! - [`get_relevant_partitions`]: Partition pruning from query key predicates

use std::collections::HashSet;

use crate::messages::base::{PredicateNode, PredicateOp, Query};
use crate::messages::cluster::PartitionMapPayload;

/// Number of partitions in the cluster. A prime chosen for uniform modulo distribution.
pub const PARTITION_COUNT: u32 = 271;

/// Key attributes that identify partition-routable fields.
const KEY_ATTRIBUTES: &[&str] = &["_key", "key", "id", "_id"];

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// FNV-1a 32-bit hash, matching the TS client/server's partition hash contract.
fn fnv1a_hash(key: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

// ---------------------------------------------------------------------------
// hash_to_partition
// ---------------------------------------------------------------------------

/// Compute partition ID for a given key.
///
/// Equivalent to TS `hashString(key) % PARTITION_COUNT`.
///
/// # Examples
///
/// ```
/// use lattice_core::partition::hash_to_partition;
///
/// assert_eq!(hash_to_partition("hello"), 95);
/// assert_eq!(hash_to_partition("key1"), 268);
/// ```
#[must_use]
pub fn hash_to_partition(key: &str) -> u32 {
    fnv1a_hash(key) % PARTITION_COUNT
}

// ---------------------------------------------------------------------------
// PartitionLookup trait
// ---------------------------------------------------------------------------

/// Read-only partition ownership queries.
pub trait PartitionLookup {
    /// Get the owner node ID for a partition, if assigned.
    fn get_owner(&self, partition_id: u32) -> Option<&str>;

    /// Get the partition table version.
    fn version(&self) -> u32;

    /// Total partition count.
    fn partition_count(&self) -> u32;
}

// ---------------------------------------------------------------------------
// PartitionTable
// ---------------------------------------------------------------------------

/// Versioned partition-to-owner lookup table.
///
/// Uses a `Vec<Option<String>>` indexed by partition ID for O(1) lookup,
/// since partition IDs are dense integers in `[0, 271)`.
pub struct PartitionTable {
    /// Indexed by partition ID (length = 271). Each slot holds the owner node ID, or `None`.
    owners: Vec<Option<String>>,
    version: u32,
}

impl PartitionTable {
    /// Creates an empty table with all partitions unassigned and version 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            owners: vec![None; PARTITION_COUNT as usize],
            version: 0,
        }
    }

    /// Populates a table from a wire-format `PartitionMapPayload`.
    #[must_use]
    pub fn from_payload(payload: &PartitionMapPayload) -> Self {
        let mut table = Self {
            owners: vec![None; PARTITION_COUNT as usize],
            version: payload.version,
        };
        for p in &payload.partitions {
            if (p.partition_id as usize) < table.owners.len() {
                table.owners[p.partition_id as usize] = Some(p.owner_node_id.clone());
            }
        }
        table
    }

    /// Assign an owner to a partition.
    ///
    /// # Panics
    ///
    /// Panics if `partition_id >= PARTITION_COUNT`.
    pub fn set_owner(&mut self, partition_id: u32, node_id: String) {
        assert!(
            partition_id < PARTITION_COUNT,
            "partition_id {partition_id} out of range [0, {PARTITION_COUNT})"
        );
        self.owners[partition_id as usize] = Some(node_id);
    }

    /// Combines hash + lookup: returns the owner of the partition for a given key.
    #[must_use]
    pub fn get_owner_for_key(&self, key: &str) -> Option<&str> {
        let pid = hash_to_partition(key);
        self.get_owner(pid)
    }

    /// Returns a deduplicated list of owner node IDs for the given partition IDs.
    /// Unassigned partitions are excluded.
    #[must_use]
    pub fn owner_nodes_for_partitions(&self, partition_ids: &[u32]) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for &pid in partition_ids {
            if let Some(owner) = self.get_owner(pid) {
                if seen.insert(owner) {
                    result.push(owner);
                }
            }
        }
        result
    }

    /// Returns all partition IDs owned by the given node.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Safe: PARTITION_COUNT is 271, well within u32
    pub fn partitions_for_node(&self, node_id: &str) -> Vec<u32> {
        self.owners
            .iter()
            .enumerate()
            .filter_map(|(i, owner)| {
                owner
                    .as_deref()
                    .filter(|&o| o == node_id)
                    .map(|_| i as u32)
            })
            .collect()
    }
}

impl Default for PartitionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionLookup for PartitionTable {
    fn get_owner(&self, partition_id: u32) -> Option<&str> {
        self.owners
            .get(partition_id as usize)
            .and_then(|o| o.as_deref())
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn partition_count(&self) -> u32 {
        PARTITION_COUNT
    }
}

// ---------------------------------------------------------------------------
// Partition Pruning
// ---------------------------------------------------------------------------

/// Extract relevant partition IDs from a `Query`.
///
/// Returns `None` when pruning is not possible (no key filter, OR/NOT predicates).
/// Returns `Some(Vec<u32>)` with deduplicated, sorted partition IDs when key values
/// can be extracted.
#[must_use]
pub fn get_relevant_partitions(query: &Query) -> Option<Vec<u32>> {
    // Try the where clause first
    if let Some(ref where_clause) = query.r#where {
        if let Some(keys) = extract_keys_from_where(where_clause) {
            let mut pids: Vec<u32> = keys.iter().map(|k| hash_to_partition(k)).collect();
            pids.sort_unstable();
            pids.dedup();
            return Some(pids);
        }
    }

    // Then try the predicate tree
    if let Some(ref predicate) = query.predicate {
        if let Some(keys) = extract_keys_from_predicate(predicate) {
            let mut pids: Vec<u32> = keys.iter().map(|k| hash_to_partition(k)).collect();
            pids.sort_unstable();
            pids.dedup();
            return Some(pids);
        }
    }

    None
}

/// Extract key values from a where clause.
///
/// Checks `KEY_ATTRIBUTES` for:
/// - Direct string/integer value: `{ "_key": "hello" }`
/// - Array of values: `{ "_key": ["a", "b"] }`
/// - `$eq` operator: `{ "_key": { "$eq": "hello" } }`
/// - `$in` operator: `{ "_key": { "$in": ["a", "b"] } }`
fn extract_keys_from_where(
    where_clause: &std::collections::HashMap<String, rmpv::Value>,
) -> Option<Vec<String>> {
    for attr in KEY_ATTRIBUTES {
        if let Some(val) = where_clause.get(*attr) {
            return extract_key_values_from_rmpv(val);
        }
    }
    None
}

/// Extract string key values from an `rmpv::Value`.
///
/// Handles:
/// - String value -> single key
/// - Integer value -> stringified key
/// - Array of strings/integers -> multiple keys
/// - Map with "$eq" -> single key
/// - Map with "$in" -> multiple keys
fn extract_key_values_from_rmpv(val: &rmpv::Value) -> Option<Vec<String>> {
    match val {
        rmpv::Value::String(s) => s.as_str().map(|s| vec![s.to_string()]),
        rmpv::Value::Integer(i) => {
            // Match TS behavior: typeof value === 'number'
            if let Some(n) = i.as_i64() {
                Some(vec![n.to_string()])
            } else {
                i.as_u64().map(|n| vec![n.to_string()])
            }
        }
        rmpv::Value::Array(arr) => {
            let keys: Vec<String> = arr
                .iter()
                .filter_map(value_to_string)
                .collect();
            if keys.is_empty() {
                None
            } else {
                Some(keys)
            }
        }
        rmpv::Value::Map(entries) => {
            // Look for $eq or $in operators
            for (k, v) in entries {
                if let Some(key_str) = k.as_str() {
                    if key_str == "$eq" {
                        return value_to_string(v).map(|s| vec![s]);
                    }
                    if key_str == "$in" {
                        if let rmpv::Value::Array(arr) = v {
                            let keys: Vec<String> =
                                arr.iter().filter_map(value_to_string).collect();
                            if !keys.is_empty() {
                                return Some(keys);
                            }
                        }
                    }
                }
            }
            None
        }
        _ => None,
    }
}

/// Convert an `rmpv::Value` to a string key (string or stringified integer).
fn value_to_string(val: &rmpv::Value) -> Option<String> {
    match val {
        rmpv::Value::String(s) => s.as_str().map(std::string::ToString::to_string),
        rmpv::Value::Integer(i) => {
            if let Some(n) = i.as_i64() {
                Some(n.to_string())
            } else {
                i.as_u64().map(|n| n.to_string())
            }
        }
        _ => None,
    }
}

/// Extract key values from a predicate tree.
///
/// Supports:
/// - `eq` on key attributes -> single key
/// - `and` with children -> merges keys from all children
/// - `or` / `not` -> returns `None` (cannot prune)
fn extract_keys_from_predicate(predicate: &PredicateNode) -> Option<Vec<String>> {
    match predicate.op {
        PredicateOp::Eq => {
            // Check if the attribute is a key attribute
            if let Some(ref attr) = predicate.attribute {
                if KEY_ATTRIBUTES.contains(&attr.as_str()) {
                    if let Some(ref val) = predicate.value {
                        return value_to_string(val).map(|s| vec![s]);
                    }
                }
            }
            None
        }
        PredicateOp::And => {
            // Merge keys from all children that produce keys
            if let Some(ref children) = predicate.children {
                let mut all_keys = Vec::new();
                for child in children {
                    if let Some(keys) = extract_keys_from_predicate(child) {
                        all_keys.extend(keys);
                    }
                }
                if all_keys.is_empty() {
                    None
                } else {
                    Some(all_keys)
                }
            } else {
                None
            }
        }
        // or/not predicates cannot be pruned; other ops (gt, lt, etc.) cannot
        // determine exact partition IDs either
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
