//! In-memory document store (C5/C6 concrete backend): a `DashMap`-keyed
//! store implementing both [`PrimaryShard`] and [`ReplicaShard`] directly,
//! validating incoming documents against the owning index's current mapping.
//!
//! Mirrors [`HashMapStorage`](crate::storage::engines::HashMapStorage) in
//! spirit (`DashMap`-backed, one process-wide instance) but stores typed
//! documents with seq_no/version bookkeeping instead of CRDT records.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use lattice_core::messages::BulkItemOutcome;
use lattice_core::{FieldDef, FieldType, MapSchema};

use crate::cluster::{ClusterError, ClusterStateStore};

use super::types::{ExecuteOutcome, PrimaryShard, ReplicaApplyOutcome, ReplicaOp, ReplicaShard, TranslatedOp};

#[derive(Debug, Clone)]
struct StoredDoc {
    source: Value,
    seq_no: u64,
    primary_term: u64,
    version: u64,
    deleted: bool,
}

/// Single-node in-memory document store backing both shard seams. Documents
/// are keyed by `(index, id)`; `shard_id` is carried for reporting only --
/// routing itself is validated by the caller before an executor ever reaches
/// this store.
pub struct InMemoryShard {
    shard_id: u32,
    primary_term: u64,
    store: Arc<ClusterStateStore>,
    docs: DashMap<(String, String), StoredDoc>,
    seq_no_counter: AtomicU64,
}

impl InMemoryShard {
    #[must_use]
    pub fn new(shard_id: u32, primary_term: u64, store: Arc<ClusterStateStore>) -> Self {
        Self {
            shard_id,
            primary_term,
            store,
            docs: DashMap::new(),
            seq_no_counter: AtomicU64::new(0),
        }
    }

    fn next_seq_no(&self) -> u64 {
        self.seq_no_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Field definitions for any top-level key in `source` the schema doesn't
    /// already declare. `None` once every key is already mapped.
    fn infer_new_fields(schema: &MapSchema, source: &Value) -> Option<MapSchema> {
        let Value::Object(map) = source else { return None };
        let mut new_fields = Vec::new();
        for (key, value) in map {
            if schema.fields.iter().any(|f| &f.name == key) {
                continue;
            }
            if let Some(field_type) = infer_field_type(value) {
                new_fields.push(FieldDef { name: key.clone(), required: false, field_type });
            }
        }
        if new_fields.is_empty() { None } else { Some(MapSchema::new(schema.version, new_fields)) }
    }

    fn check_version(
        existing: Option<&StoredDoc>,
        if_seq_no: Option<u64>,
        if_primary_term: Option<u64>,
    ) -> Result<(), ClusterError> {
        let (Some(expected_seq_no), Some(expected_primary_term)) = (if_seq_no, if_primary_term) else {
            return Ok(());
        };
        let (actual_seq_no, actual_primary_term) = match existing {
            Some(doc) if !doc.deleted => (doc.seq_no, doc.primary_term),
            _ => (u64::MAX, u64::MAX),
        };
        if actual_seq_no != expected_seq_no || actual_primary_term != expected_primary_term {
            return Err(ClusterError::VersionConflict {
                expected_seq_no,
                expected_primary_term,
                actual_seq_no,
                actual_primary_term,
            });
        }
        Ok(())
    }
}

fn infer_field_type(value: &Value) -> Option<FieldType> {
    match value {
        Value::String(_) => Some(FieldType::Text),
        Value::Bool(_) => Some(FieldType::Boolean),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(FieldType::Long),
        Value::Number(_) => Some(FieldType::Double),
        Value::Object(_) => Some(FieldType::Object),
        Value::Null | Value::Array(_) => None,
    }
}

#[async_trait]
impl PrimaryShard for InMemoryShard {
    fn shard_id(&self) -> u32 {
        self.shard_id
    }

    async fn translate_update(
        &self,
        index: &str,
        id: &str,
        partial: Option<&Value>,
    ) -> Result<TranslatedOp, ClusterError> {
        let Some(partial) = partial else { return Ok(TranslatedOp::Noop) };
        let key = (index.to_string(), id.to_string());

        match self.docs.get(&key) {
            Some(doc) if !doc.deleted => {
                let mut merged = doc.source.clone();
                match (&mut merged, partial) {
                    (Value::Object(base), Value::Object(incoming)) => {
                        for (k, v) in incoming {
                            base.insert(k.clone(), v.clone());
                        }
                    }
                    _ => merged = partial.clone(),
                }
                if merged == doc.source { Ok(TranslatedOp::Noop) } else { Ok(TranslatedOp::Index { source: merged }) }
            }
            // Missing or soft-deleted: an update on a document that isn't
            // there yet upserts, same as an explicit index request.
            _ => Ok(TranslatedOp::Index { source: partial.clone() }),
        }
    }

    async fn execute_index(
        &self,
        index: &str,
        id: &str,
        source: Value,
        if_seq_no: Option<u64>,
        if_primary_term: Option<u64>,
    ) -> Result<ExecuteOutcome, ClusterError> {
        let snapshot = self.store.current();
        let Some(index_meta) = snapshot.get_index(index) else {
            return Ok(ExecuteOutcome::Failure {
                seq_no: None,
                primary_term: None,
                error: format!("unknown index: {index}"),
            });
        };
        if let Some(proposed_mapping) = Self::infer_new_fields(&index_meta.mapping, &source) {
            return Ok(ExecuteOutcome::MappingUpdateRequired { proposed_mapping });
        }

        let key = (index.to_string(), id.to_string());
        let existing = self.docs.get(&key).map(|r| r.clone());
        Self::check_version(existing.as_ref(), if_seq_no, if_primary_term)?;

        let was_absent = existing.as_ref().map_or(true, |d| d.deleted);
        let new_version = existing.as_ref().map_or(1, |d| d.version + 1);
        let seq_no = self.next_seq_no();
        self.docs.insert(
            key,
            StoredDoc { source, seq_no, primary_term: self.primary_term, version: new_version, deleted: false },
        );

        Ok(ExecuteOutcome::Success {
            seq_no,
            primary_term: self.primary_term,
            version: new_version,
            result: if was_absent { BulkItemOutcome::Created } else { BulkItemOutcome::Updated },
        })
    }

    async fn execute_delete(
        &self,
        index: &str,
        id: &str,
        if_seq_no: Option<u64>,
        if_primary_term: Option<u64>,
    ) -> Result<ExecuteOutcome, ClusterError> {
        let key = (index.to_string(), id.to_string());
        let existing = self.docs.get(&key).map(|r| r.clone());
        Self::check_version(existing.as_ref(), if_seq_no, if_primary_term)?;

        match existing {
            Some(doc) if !doc.deleted => {
                let seq_no = self.next_seq_no();
                let new_version = doc.version + 1;
                self.docs.insert(
                    key,
                    StoredDoc {
                        source: Value::Null,
                        seq_no,
                        primary_term: self.primary_term,
                        version: new_version,
                        deleted: true,
                    },
                );
                Ok(ExecuteOutcome::Success {
                    seq_no,
                    primary_term: self.primary_term,
                    version: new_version,
                    result: BulkItemOutcome::Deleted,
                })
            }
            _ => {
                let seq_no = self.next_seq_no();
                Ok(ExecuteOutcome::Success {
                    seq_no,
                    primary_term: self.primary_term,
                    version: 0,
                    result: BulkItemOutcome::NotFound,
                })
            }
        }
    }
}

#[async_trait]
impl ReplicaShard for InMemoryShard {
    fn shard_id(&self) -> u32 {
        self.shard_id
    }

    async fn apply(
        &self,
        index: &str,
        id: &str,
        op: ReplicaOp,
        seq_no: u64,
        primary_term: u64,
    ) -> Result<ReplicaApplyOutcome, ClusterError> {
        let key = (index.to_string(), id.to_string());
        match op {
            ReplicaOp::Index { source } => {
                let snapshot = self.store.current();
                let Some(index_meta) = snapshot.get_index(index) else {
                    return Err(ClusterError::Validation(format!("unknown index: {index}")));
                };
                if let Some(proposed_mapping) = Self::infer_new_fields(&index_meta.mapping, &source) {
                    return Ok(ReplicaApplyOutcome::MappingUpdateRequired { proposed_mapping });
                }

                let new_version = self.docs.get(&key).map_or(1, |d| if d.deleted { 1 } else { d.version + 1 });
                self.docs.insert(key, StoredDoc { source, seq_no, primary_term, version: new_version, deleted: false });
                Ok(ReplicaApplyOutcome::Applied)
            }
            ReplicaOp::Delete => {
                let new_version = self.docs.get(&key).map_or(1, |d| d.version + 1);
                self.docs.insert(
                    key,
                    StoredDoc { source: Value::Null, seq_no, primary_term, version: new_version, deleted: true },
                );
                Ok(ReplicaApplyOutcome::Applied)
            }
        }
    }

    /// No-op: this store keeps no per-shard operation log to record into,
    /// so there is nothing to mark beyond letting the seq-no pass unapplied.
    async fn mark_noop(&self, _index: &str, _id: &str, _seq_no: u64, _primary_term: u64) -> Result<(), ClusterError> {
        Ok(())
    }
}
