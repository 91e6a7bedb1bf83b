//! Wire-compatible message schemas for the Lattice protocol.
//!
//! Each submodule corresponds to a domain of messages defined in the TypeScript
//! Zod schemas (`packages/core/src/schemas/`). All types use named MsgPack
//! serialization (`rmp_serde::to_vec_named()`) with camelCase field names to
//! match the TypeScript wire format.

pub mod base;
pub mod bulk;
pub mod cluster;

pub use base::{AuthMessage, AuthRequiredMessage};
pub use bulk::{
    BulkItemOutcome, BulkItemRequest, BulkItemResponse, BulkOpType, BulkShardRequest,
    BulkShardResponse, WriteConsistency,
};
pub use cluster::{
    ClusterJoinNode, JoinRequestPayload, JoinResponsePayload, JoinValidateRequestPayload,
    JoinValidateResponsePayload, LeaveRequestPayload, LeaveResponsePayload, NodeEndpoints,
    NodeInfo, NodeStatus, PartitionInfo, PartitionMapPayload, PartitionMapRequestPayload,
};

/// Envelope wrapping any client-facing wire-level payload.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Auth(AuthMessage),
    AuthRequired(AuthRequiredMessage),
    BulkRequest(BulkShardRequest),
    BulkResponse(BulkShardResponse),
    /// `internal:discovery/zen/join`
    JoinRequest(JoinRequestPayload),
    JoinResponse(JoinResponsePayload),
    /// `internal:discovery/zen/join/validate`
    JoinValidateRequest(JoinValidateRequestPayload),
    JoinValidateResponse(JoinValidateResponsePayload),
    /// `internal:discovery/zen/leave`
    LeaveRequest(LeaveRequestPayload),
    LeaveResponse(LeaveResponsePayload),
}
