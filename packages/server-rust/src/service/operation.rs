//! Operation types carried through the service pipeline.
//!
//! A classified [`Operation`] is what the router, middleware, and handlers
//! actually operate on -- never the raw wire [`lattice_core::messages::Message`].

use lattice_core::messages::{BulkShardRequest, ClusterJoinNode};

use crate::cluster::{ClusterError, PutMappingRequest};

/// Service names a call_id is scoped under. Used for routing and metrics
/// labels; kept as `&'static str` rather than an enum so new services don't
/// require a breaking change to every match site.
pub mod service_names {
    pub const CLUSTER: &str = "cluster";
    pub const BULK: &str = "bulk";
}

/// Stable wire-level endpoint identifiers, embedded in request framing.
/// These values are bit-stable and must never change once shipped.
pub mod wire_actions {
    pub const JOIN: &str = "internal:discovery/zen/join";
    pub const JOIN_VALIDATE: &str = "internal:discovery/zen/join/validate";
    pub const LEAVE: &str = "internal:discovery/zen/leave";
    pub const BULK: &str = "indices:data/write/bulk[s]";
}

/// Origin of the operation caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerOrigin {
    Client,
    Forwarded,
    Backup,
    Wan,
    System,
}

/// Context carried with every operation through the pipeline.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub call_id: u64,
    pub partition_id: Option<u32>,
    pub service_name: &'static str,
    pub caller_origin: CallerOrigin,
    pub client_id: Option<String>,
    pub caller_node_id: Option<String>,
    pub timestamp: lattice_core::Timestamp,
    pub call_timeout_ms: u64,
}

impl OperationContext {
    pub fn new(
        call_id: u64,
        service_name: &'static str,
        timestamp: lattice_core::Timestamp,
        call_timeout_ms: u64,
    ) -> Self {
        Self {
            call_id,
            partition_id: None,
            service_name,
            caller_origin: CallerOrigin::Client,
            client_id: None,
            caller_node_id: None,
            timestamp,
            call_timeout_ms,
        }
    }

    pub fn with_partition(mut self, partition_id: u32) -> Self {
        self.partition_id = Some(partition_id);
        self
    }

    pub fn with_caller_origin(mut self, caller_origin: CallerOrigin) -> Self {
        self.caller_origin = caller_origin;
        self
    }

    pub fn with_client_id(mut self, client_id: String) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_caller_node_id(mut self, caller_node_id: String) -> Self {
        self.caller_node_id = Some(caller_node_id);
        self
    }
}

/// Typed operation variants dispatched through the pipeline.
#[derive(Debug)]
pub enum Operation {
    /// `indices:data/write/bulk[s]` -- a shard-scoped bulk write.
    Bulk { ctx: OperationContext, request: BulkShardRequest },
    /// `indices:admin/mapping/put` -- a dynamic mapping update.
    PutMapping { ctx: OperationContext, requests: Vec<PutMappingRequest> },
    /// `internal:discovery/zen/join` -- a node requesting to join the cluster.
    Join { ctx: OperationContext, node: ClusterJoinNode },
    /// `internal:discovery/zen/join/validate` -- validates a joining node's
    /// cluster-state view. Carries the opaque `MsgPack`-encoded snapshot.
    JoinValidate { ctx: OperationContext, snapshot: Vec<u8> },
    /// `internal:discovery/zen/leave` -- a node requesting to leave gracefully.
    Leave { ctx: OperationContext, node: ClusterJoinNode },
}

impl Operation {
    pub fn ctx(&self) -> &OperationContext {
        match self {
            Operation::Bulk { ctx, .. } => ctx,
            Operation::PutMapping { ctx, .. } => ctx,
            Operation::Join { ctx, .. } => ctx,
            Operation::JoinValidate { ctx, .. } => ctx,
            Operation::Leave { ctx, .. } => ctx,
        }
    }
}

/// Successful response from an operation handler.
#[derive(Debug)]
pub enum OperationResponse {
    Ack { call_id: u64 },
    Message(Box<lattice_core::messages::Message>),
    Messages(Vec<lattice_core::messages::Message>),
    NotImplemented { service_name: &'static str, call_id: u64 },
    Empty,
}

/// Errors returned by operation handlers.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("unknown service: {name}")]
    UnknownService { name: String },
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("wrong service for operation")]
    WrongService,
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Errors from classifying a `Message` into an `Operation`.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("server-to-client response cannot be classified as operation: {variant}")]
    ServerToClient { variant: &'static str },
    #[error("transport envelope must be unpacked before classification: {variant}")]
    TransportEnvelope { variant: &'static str },
    #[error("authentication message handled at transport layer: {variant}")]
    AuthMessage { variant: &'static str },
}
