//! Message classification: converts `Message` into typed `Operation` variants.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lattice_core::messages::Message;
use lattice_core::HLC;

use crate::cluster::PutMappingRequest;

use super::config::ServerConfig;
use super::operation::{service_names, CallerOrigin, ClassifyError, Operation, OperationContext};

// ---------------------------------------------------------------------------
// OperationService
// ---------------------------------------------------------------------------

/// Classifies incoming `Message` values into typed `Operation` variants.
///
/// Each call generates a fresh HLC timestamp and a unique call ID.
pub struct OperationService {
    hlc: Arc<parking_lot::Mutex<HLC>>,
    config: Arc<ServerConfig>,
    call_id_counter: AtomicU64,
}

impl OperationService {
    #[must_use]
    pub fn new(hlc: Arc<parking_lot::Mutex<HLC>>, config: Arc<ServerConfig>) -> Self {
        Self { hlc, config, call_id_counter: AtomicU64::new(1) }
    }

    fn next_call_id(&self) -> u64 {
        self.call_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn now(&self) -> lattice_core::Timestamp {
        self.hlc.lock().now()
    }

    fn make_ctx(&self, service_name: &'static str, caller_origin: CallerOrigin) -> OperationContext {
        OperationContext::new(self.next_call_id(), service_name, self.now(), self.config.default_operation_timeout_ms)
            .with_caller_origin(caller_origin)
    }

    /// Classify a `Message` into an `Operation`.
    ///
    /// Client-to-server request messages (`BulkRequest`) produce `Ok(Operation)`.
    /// Server-to-client responses and auth handshake messages produce `Err(ClassifyError)`.
    ///
    /// # Errors
    ///
    /// Returns `ClassifyError` for messages that are not classifiable as operations:
    /// - `ClassifyError::ServerToClient` for response messages
    /// - `ClassifyError::AuthMessage` for `Auth` and `AuthRequired` messages
    pub fn classify(&self, msg: Message, caller_origin: CallerOrigin) -> Result<Operation, ClassifyError> {
        match msg {
            Message::BulkRequest(request) => {
                let ctx = self.make_ctx(service_names::BULK, caller_origin).with_partition(request.shard_id);
                Ok(Operation::Bulk { ctx, request })
            }
            Message::BulkResponse(_) => {
                Err(ClassifyError::ServerToClient { variant: "BulkResponse" })
            }
            Message::JoinRequest(payload) => {
                let ctx = self.make_ctx(service_names::CLUSTER, caller_origin);
                Ok(Operation::Join { ctx, node: payload.node })
            }
            Message::JoinResponse(_) => {
                Err(ClassifyError::ServerToClient { variant: "JoinResponse" })
            }
            Message::JoinValidateRequest(payload) => {
                let ctx = self.make_ctx(service_names::CLUSTER, caller_origin);
                Ok(Operation::JoinValidate { ctx, snapshot: payload.cluster_state_snapshot })
            }
            Message::JoinValidateResponse(_) => {
                Err(ClassifyError::ServerToClient { variant: "JoinValidateResponse" })
            }
            Message::LeaveRequest(payload) => {
                let ctx = self.make_ctx(service_names::CLUSTER, caller_origin);
                Ok(Operation::Leave { ctx, node: payload.node })
            }
            Message::LeaveResponse(_) => {
                Err(ClassifyError::ServerToClient { variant: "LeaveResponse" })
            }
            Message::Auth(_) => Err(ClassifyError::AuthMessage { variant: "Auth" }),
            Message::AuthRequired(_) => Err(ClassifyError::AuthMessage { variant: "AuthRequired" }),
        }
    }

    /// Classify a `put_mapping` batch directly, bypassing the wire envelope --
    /// this operation is issued internally by index administration, not by a
    /// generic client message.
    pub fn classify_put_mapping(&self, index: String, mapping: lattice_core::MapSchema) -> Operation {
        let ctx = self.make_ctx(service_names::CLUSTER, CallerOrigin::Client);
        Operation::PutMapping { ctx, requests: vec![PutMappingRequest { index, mapping }] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::messages::{BulkItemOutcome, BulkItemResponse, BulkOpType, BulkShardRequest, BulkShardResponse, WriteConsistency};
    use lattice_core::{FieldDef, FieldType, MapSchema};

    fn service() -> OperationService {
        OperationService::new(
            Arc::new(parking_lot::Mutex::new(HLC::new("n1".to_string(), Box::new(lattice_core::SystemClock)))),
            Arc::new(ServerConfig::default()),
        )
    }

    fn bulk_request(shard_id: u32) -> BulkShardRequest {
        BulkShardRequest {
            shard_id,
            items: vec![lattice_core::messages::BulkItemRequest {
                op_type: BulkOpType::Index,
                index: "logs".to_string(),
                id: "1".to_string(),
                routing: None,
                version: None,
                if_seq_no: None,
                if_primary_term: None,
                source: None,
                retry_on_conflict: 0,
            }],
            write_consistency: WriteConsistency::Quorum,
            timeout_ms: 30_000,
        }
    }

    #[test]
    fn classifies_bulk_request_into_bulk_operation() {
        let svc = service();
        let op = svc.classify(Message::BulkRequest(bulk_request(4)), CallerOrigin::Client).unwrap();
        match op {
            Operation::Bulk { ctx, request } => {
                assert_eq!(ctx.service_name, service_names::BULK);
                assert_eq!(ctx.partition_id, Some(4));
                assert_eq!(request.shard_id, 4);
            }
            Operation::PutMapping { .. } => panic!("expected Bulk"),
        }
    }

    #[test]
    fn rejects_bulk_response_as_server_to_client() {
        let svc = service();
        let response = Message::BulkResponse(BulkShardResponse {
            shard_id: 0,
            items: vec![BulkItemResponse {
                op_type: BulkOpType::Index,
                index: "logs".to_string(),
                id: "1".to_string(),
                result: BulkItemOutcome::Created,
                seq_no: Some(0),
                primary_term: Some(1),
                version: Some(1),
                error: None,
            }],
        });
        let err = svc.classify(response, CallerOrigin::Client).unwrap_err();
        assert!(matches!(err, ClassifyError::ServerToClient { variant: "BulkResponse" }));
    }

    #[test]
    fn rejects_auth_messages() {
        let svc = service();
        let err = svc
            .classify(Message::Auth(lattice_core::messages::AuthMessage { token: "t".to_string(), protocol_version: None }), CallerOrigin::Client)
            .unwrap_err();
        assert!(matches!(err, ClassifyError::AuthMessage { variant: "Auth" }));
    }

    #[test]
    fn classifies_put_mapping_directly() {
        let svc = service();
        let schema = MapSchema::new(1, vec![FieldDef { name: "f".to_string(), required: false, field_type: FieldType::Long }]);
        let op = svc.classify_put_mapping("logs".to_string(), schema);
        match op {
            Operation::PutMapping { ctx, requests } => {
                assert_eq!(ctx.service_name, service_names::CLUSTER);
                assert_eq!(requests.len(), 1);
                assert_eq!(requests[0].index, "logs");
            }
            Operation::Bulk { .. } => panic!("expected PutMapping"),
        }
    }

    #[test]
    fn classifies_join_request_into_join_operation_on_cluster_service() {
        let svc = service();
        let node = lattice_core::messages::ClusterJoinNode {
            node_id: "n2".to_string(),
            host: "10.0.0.2".to_string(),
            client_port: 8080,
            cluster_port: 9090,
        };
        let op = svc
            .classify(
                Message::JoinRequest(lattice_core::messages::JoinRequestPayload { node: node.clone() }),
                CallerOrigin::Forwarded,
            )
            .unwrap();
        match op {
            Operation::Join { ctx, node: classified } => {
                assert_eq!(ctx.service_name, service_names::CLUSTER);
                assert_eq!(classified.node_id, node.node_id);
            }
            other => panic!("expected Join, got {other:?}"),
        }
    }

    #[test]
    fn classifies_leave_request_into_leave_operation() {
        let svc = service();
        let node = lattice_core::messages::ClusterJoinNode {
            node_id: "n2".to_string(),
            host: "10.0.0.2".to_string(),
            client_port: 8080,
            cluster_port: 9090,
        };
        let op = svc
            .classify(
                Message::LeaveRequest(lattice_core::messages::LeaveRequestPayload { node }),
                CallerOrigin::Forwarded,
            )
            .unwrap();
        assert!(matches!(op, Operation::Leave { .. }));
    }

    #[test]
    fn classifies_join_validate_request_carries_opaque_snapshot() {
        let svc = service();
        let op = svc
            .classify(
                Message::JoinValidateRequest(lattice_core::messages::JoinValidateRequestPayload {
                    cluster_state_snapshot: vec![9, 9, 9],
                }),
                CallerOrigin::Forwarded,
            )
            .unwrap();
        match op {
            Operation::JoinValidate { snapshot, .. } => assert_eq!(snapshot, vec![9, 9, 9]),
            other => panic!("expected JoinValidate, got {other:?}"),
        }
    }

    #[test]
    fn rejects_join_response_as_server_to_client() {
        let svc = service();
        let err = svc
            .classify(
                Message::JoinResponse(lattice_core::messages::JoinResponsePayload::default()),
                CallerOrigin::Client,
            )
            .unwrap_err();
        assert!(matches!(err, ClassifyError::ServerToClient { variant: "JoinResponse" }));
    }

    #[test]
    fn call_ids_increment_across_calls() {
        let svc = service();
        let op1 = svc.classify(Message::BulkRequest(bulk_request(0)), CallerOrigin::Client).unwrap();
        let op2 = svc.classify(Message::BulkRequest(bulk_request(0)), CallerOrigin::Client).unwrap();
        assert!(op2.ctx().call_id > op1.ctx().call_id);
    }
}
