//! HTTP sync endpoint handler.
//!
//! Decodes a `MsgPack`-encoded [`Message`](lattice_core::messages::Message),
//! classifies it into an [`Operation`](crate::service::Operation), dispatches
//! it through the operation pipeline, and re-encodes the response.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use tracing::warn;

use crate::service::{CallerOrigin, ClassifyError, Operation, OperationError, OperationResponse};

use super::AppState;

const MSGPACK_CONTENT_TYPE: [(&str, &str); 1] = [("content-type", "application/msgpack")];

/// Handles POST /sync requests with `MsgPack`-encoded bodies.
pub async fn http_sync_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let (Some(operation_service), Some(pipeline)) = (&state.operation_service, &state.pipeline) else {
        return (StatusCode::SERVICE_UNAVAILABLE, MSGPACK_CONTENT_TYPE, Vec::<u8>::new());
    };

    let message = match rmp_serde::from_slice::<lattice_core::messages::Message>(&body) {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, "malformed /sync request body");
            return (StatusCode::BAD_REQUEST, MSGPACK_CONTENT_TYPE, Vec::<u8>::new());
        }
    };

    let op = match operation_service.classify(message, CallerOrigin::Client) {
        Ok(op) => op,
        Err(err) => return (classify_error_status(&err), MSGPACK_CONTENT_TYPE, Vec::<u8>::new()),
    };

    match pipeline.call(op).await {
        Ok(response) => encode_response(response),
        Err(err) => (operation_error_status(&err), MSGPACK_CONTENT_TYPE, Vec::<u8>::new()),
    }
}

fn classify_error_status(err: &ClassifyError) -> StatusCode {
    match err {
        ClassifyError::ServerToClient { .. }
        | ClassifyError::TransportEnvelope { .. }
        | ClassifyError::AuthMessage { .. } => StatusCode::BAD_REQUEST,
    }
}

fn operation_error_status(err: &OperationError) -> StatusCode {
    match err {
        OperationError::UnknownService { .. } => StatusCode::NOT_FOUND,
        OperationError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        OperationError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
        OperationError::WrongService => StatusCode::INTERNAL_SERVER_ERROR,
        OperationError::Cluster(_) | OperationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn encode_response(response: OperationResponse) -> (StatusCode, [(&'static str, &'static str); 1], Vec<u8>) {
    match response {
        OperationResponse::Message(msg) => {
            let bytes = rmp_serde::to_vec_named(&*msg).unwrap_or_default();
            (StatusCode::OK, MSGPACK_CONTENT_TYPE, bytes)
        }
        OperationResponse::Messages(msgs) => {
            let bytes = rmp_serde::to_vec_named(&msgs).unwrap_or_default();
            (StatusCode::OK, MSGPACK_CONTENT_TYPE, bytes)
        }
        OperationResponse::Ack { .. } | OperationResponse::Empty => {
            (StatusCode::OK, MSGPACK_CONTENT_TYPE, Vec::new())
        }
        OperationResponse::NotImplemented { .. } => {
            (StatusCode::NOT_IMPLEMENTED, MSGPACK_CONTENT_TYPE, Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use lattice_core::messages::{BulkItemRequest, BulkOpType, BulkShardRequest, Message, WriteConsistency};
    use lattice_core::{SystemClock, HLC};

    use super::*;
    use crate::cluster::state_loop;
    use crate::cluster::types::{IndexMetadata, PartitionMeta, PartitionState};
    use crate::cluster::{MappingCoordinator, StateTask, TaskOutcome, TaskPriority};
    use crate::network::{ConnectionRegistry, NetworkConfig, ShutdownController};
    use crate::service::domain::BulkService;
    use crate::service::middleware::OperationPipelineHandle;
    use crate::service::router::OperationRouter;
    use crate::service::{service_names, ServerConfig};

    async fn wired_state() -> AppState {
        let config = ServerConfig { node_id: "n1".to_string(), ..ServerConfig::default() };
        let hlc = Arc::new(parking_lot::Mutex::new(HLC::new(config.node_id.clone(), Box::new(SystemClock))));
        let operation_service = Arc::new(crate::service::OperationService::new(hlc, Arc::new(config.clone())));

        let (handle, store, _join) = state_loop::spawn(config.node_id.clone(), 16);
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
        let mapping = Arc::new(MappingCoordinator::new(handle, 16));

        let mut router = OperationRouter::new();
        router.register(service_names::BULK, Arc::new(BulkService::new(mapping, store)));
        let pipeline = OperationPipelineHandle::new(router, &config);

        AppState {
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: Arc::new(ShutdownController::new()),
            config: Arc::new(NetworkConfig::default()),
            start_time: Instant::now(),
            metrics_handle: metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder().handle(),
            operation_service: Some(operation_service),
            pipeline: Some(pipeline),
        }
    }

    fn bulk_request_bytes() -> Vec<u8> {
        let msg = Message::BulkRequest(BulkShardRequest {
            shard_id: 0,
            items: vec![BulkItemRequest {
                op_type: BulkOpType::Index,
                index: "logs".to_string(),
                id: "1".to_string(),
                routing: None,
                version: None,
                if_seq_no: None,
                if_primary_term: None,
                source: Some(serde_json::json!({"msg": "hi"})),
                retry_on_conflict: 0,
            }],
            write_consistency: WriteConsistency::One,
            timeout_ms: 5000,
        });
        rmp_serde::to_vec_named(&msg).unwrap()
    }

    #[tokio::test]
    async fn returns_503_when_pipeline_not_wired() {
        let state = AppState {
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: Arc::new(ShutdownController::new()),
            config: Arc::new(NetworkConfig::default()),
            start_time: Instant::now(),
            metrics_handle: metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder().handle(),
            operation_service: None,
            pipeline: None,
        };
        let response = http_sync_handler(State(state), Bytes::new()).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn returns_400_for_malformed_body() {
        let state = wired_state().await;
        let response = http_sync_handler(State(state), Bytes::from_static(b"not msgpack \xff\xff")).await.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn dispatches_bulk_request_and_returns_bulk_response() {
        let state = wired_state().await;
        let body = Bytes::from(bulk_request_bytes());
        let response = http_sync_handler(State(state), body).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let decoded: Message = rmp_serde::from_slice(&bytes).unwrap();
        match decoded {
            Message::BulkResponse(resp) => assert_eq!(resp.items.len(), 1),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
