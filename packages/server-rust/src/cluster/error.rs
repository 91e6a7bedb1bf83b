//! Cluster-wide error taxonomy.
//!
//! Every failure path in the cluster-state store, node-join controller, mapping
//! coordinator, and bulk write pipeline funnels through [`ClusterError`]. Kinds
//! are a closed set (no free-form variant) so callers can match exhaustively.

use thiserror::Error;

/// Closed set of cluster-core failure kinds.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("operation requires master, but local node is not master")]
    NotMaster,

    #[error("version conflict: expected seq_no={expected_seq_no:?} primary_term={expected_primary_term:?}, found seq_no={actual_seq_no} primary_term={actual_primary_term}")]
    VersionConflict {
        expected_seq_no: Option<u64>,
        expected_primary_term: Option<u64>,
        actual_seq_no: u64,
        actual_primary_term: u64,
    },

    #[error("mapping update required for index {index}")]
    MappingUpdateRequired { index: String },

    #[error("mapping update for index {index} did not propagate within {timeout_ms}ms")]
    MappingUpdateTimeout { index: String, timeout_ms: u64 },

    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("node is closed")]
    NodeClosed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("fatal invariant violation: {0}")]
    Fatal(String),
}

impl ClusterError {
    /// Returns `true` for kinds that are safe to retry without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MappingUpdateRequired { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_update_required_is_retryable() {
        let err = ClusterError::MappingUpdateRequired { index: "logs".into() };
        assert!(err.is_retryable());
    }

    #[test]
    fn not_master_is_not_retryable() {
        assert!(!ClusterError::NotMaster.is_retryable());
    }

    #[test]
    fn version_conflict_message_contains_actuals() {
        let err = ClusterError::VersionConflict {
            expected_seq_no: Some(3),
            expected_primary_term: Some(1),
            actual_seq_no: 5,
            actual_primary_term: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains('5'));
    }
}
