//! Domain service stubs.
//!
//! Each service implements both `ManagedService` (lifecycle) and `tower::Service<Operation>`
//! (request handling). All stubs return `OperationResponse::NotImplemented` -- actual
//! business logic lives in the `cluster` and `bulk` modules and is wired in once the
//! pipeline's middleware stack (timeout, metrics, load-shedding) is assembled.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use dashmap::DashMap;
use tower::Service;

use lattice_core::messages::{
    ClusterJoinNode, JoinResponsePayload, JoinValidateResponsePayload, LeaveResponsePayload, Message,
};

use crate::bulk::{BulkConfig, BulkPrimaryExecutor, InMemoryShard};
use crate::cluster::{ClusterStateSnapshot, ClusterStateStore, MappingCoordinator, MemberInfo, NodeJoinController, NodeState};
use crate::service::operation::{service_names, Operation, OperationError, OperationResponse};
use crate::service::registry::{ManagedService, ServiceContext};

// ---------------------------------------------------------------------------
// Cluster domain service
// ---------------------------------------------------------------------------

/// Cluster domain service: membership (join/leave/join-validate) and mapping
/// administration.
///
/// Membership requests are delegated to the [`NodeJoinController`], which
/// owns the accumulate-vs-stream election logic; this service's job is just
/// translating between wire payloads and the controller's native types.
pub struct ClusterService {
    join_controller: Arc<NodeJoinController>,
    store: Arc<ClusterStateStore>,
}

impl ClusterService {
    #[must_use]
    pub fn new(join_controller: Arc<NodeJoinController>, store: Arc<ClusterStateStore>) -> Self {
        Self { join_controller, store }
    }

    /// One past the highest `join_version` currently known to the cluster.
    fn next_join_version(&self) -> u64 {
        self.store.current().nodes.iter().map(|n| n.join_version).max().unwrap_or(0) + 1
    }

    fn candidate_member(&self, node: ClusterJoinNode) -> MemberInfo {
        MemberInfo {
            node_id: node.node_id,
            host: node.host,
            client_port: node.client_port,
            cluster_port: node.cluster_port,
            state: NodeState::Joining,
            join_version: self.next_join_version(),
        }
    }
}

#[async_trait]
impl ManagedService for ClusterService {
    fn name(&self) -> &'static str {
        service_names::CLUSTER
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn reset(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Service<Operation> for Arc<ClusterService> {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let this = self.clone();
        Box::pin(async move {
            match op {
                Operation::Join { node, .. } => {
                    let member = this.candidate_member(node);
                    let (tx, rx) = tokio::sync::oneshot::channel();
                    this.join_controller.handle_join_request(member, tx);
                    let payload = match rx.await {
                        Ok(Ok(())) => JoinResponsePayload { accepted: true, reject_reason: None },
                        Ok(Err(err)) => JoinResponsePayload { accepted: false, reject_reason: Some(err.to_string()) },
                        Err(_) => JoinResponsePayload { accepted: false, reject_reason: Some("join controller dropped".to_string()) },
                    };
                    Ok(OperationResponse::Message(Box::new(Message::JoinResponse(payload))))
                }
                Operation::JoinValidate { snapshot, .. } => {
                    let error = match rmp_serde::from_slice::<ClusterStateSnapshot>(&snapshot) {
                        Ok(candidate) => {
                            let local = this.store.current();
                            if candidate.master_node_id.is_some()
                                && local.master_node_id.is_some()
                                && candidate.master_node_id != local.master_node_id
                            {
                                Some("conflicting master in joining node's cluster state".to_string())
                            } else {
                                None
                            }
                        }
                        Err(err) => Some(format!("malformed cluster state snapshot: {err}")),
                    };
                    Ok(OperationResponse::Message(Box::new(Message::JoinValidateResponse(JoinValidateResponsePayload { error }))))
                }
                Operation::Leave { node, .. } => {
                    let (tx, rx) = tokio::sync::oneshot::channel();
                    this.join_controller.handle_leave_request(node.node_id, tx);
                    let error = match rx.await {
                        Ok(Ok(())) => None,
                        Ok(Err(err)) => Some(err.to_string()),
                        Err(_) => Some("join controller dropped".to_string()),
                    };
                    Ok(OperationResponse::Message(Box::new(Message::LeaveResponse(LeaveResponsePayload { error }))))
                }
                Operation::Bulk { ctx, .. } => {
                    Ok(OperationResponse::NotImplemented { service_name: service_names::CLUSTER, call_id: ctx.call_id })
                }
                Operation::PutMapping { ctx, .. } => {
                    Ok(OperationResponse::NotImplemented { service_name: service_names::CLUSTER, call_id: ctx.call_id })
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Bulk write domain service
// ---------------------------------------------------------------------------

/// Bulk write domain service (`indices:data/write/bulk[s]`).
///
/// Lazily builds one [`BulkPrimaryExecutor`] per shard it's asked to serve,
/// all sharing the same cluster-state store and mapping coordinator.
pub struct BulkService {
    mapping: Arc<MappingCoordinator>,
    store: Arc<ClusterStateStore>,
    config: BulkConfig,
    executors: DashMap<u32, Arc<BulkPrimaryExecutor<InMemoryShard>>>,
}

impl BulkService {
    #[must_use]
    pub fn new(mapping: Arc<MappingCoordinator>, store: Arc<ClusterStateStore>) -> Self {
        Self { mapping, store, config: BulkConfig::default(), executors: DashMap::new() }
    }

    fn executor_for(&self, shard_id: u32) -> Arc<BulkPrimaryExecutor<InMemoryShard>> {
        self.executors
            .entry(shard_id)
            .or_insert_with(|| {
                let shard = Arc::new(InMemoryShard::new(shard_id, 1, self.store.clone()));
                Arc::new(BulkPrimaryExecutor::new(shard, self.mapping.clone(), self.store.clone(), self.config.clone()))
            })
            .clone()
    }
}

#[async_trait]
impl ManagedService for BulkService {
    fn name(&self) -> &'static str {
        service_names::BULK
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn reset(&self) -> anyhow::Result<()> {
        self.executors.clear();
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Service<Operation> for Arc<BulkService> {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let this = self.clone();
        Box::pin(async move {
            match op {
                Operation::Bulk { request, .. } => {
                    let executor = this.executor_for(request.shard_id);
                    let response = executor.execute_shard(request).await?;
                    Ok(OperationResponse::Message(Box::new(lattice_core::messages::Message::BulkResponse(response))))
                }
                Operation::PutMapping { ctx, .. }
                | Operation::Join { ctx, .. }
                | Operation::JoinValidate { ctx, .. }
                | Operation::Leave { ctx, .. } => {
                    Ok(OperationResponse::NotImplemented { service_name: service_names::BULK, call_id: ctx.call_id })
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use lattice_core::messages::{BulkItemRequest, BulkOpType, BulkShardRequest, WriteConsistency};
    use lattice_core::Timestamp;
    use tower::ServiceExt;

    use super::*;
    use crate::cluster::state_loop;
    use crate::cluster::types::{IndexMetadata, PartitionMeta, PartitionState};
    use crate::cluster::{StateTask, TaskOutcome, TaskPriority};
    use crate::service::config::ServerConfig;
    use crate::service::operation::OperationContext;
    use crate::service::registry::ServiceRegistry;

    fn make_op(service_name: &'static str) -> Operation {
        let ctx = OperationContext::new(
            1,
            service_name,
            Timestamp {
                millis: 0,
                counter: 0,
                node_id: "test".to_string(),
            },
            5000,
        );
        Operation::PutMapping { ctx, requests: vec![] }
    }

    async fn bulk_service() -> BulkService {
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

        let mapping = Arc::new(MappingCoordinator::new(handle, 16));
        BulkService::new(mapping, store)
    }

    fn bulk_op() -> Operation {
        let ctx = OperationContext::new(
            1,
            service_names::BULK,
            Timestamp { millis: 0, counter: 0, node_id: "test".to_string() },
            5000,
        )
        .with_partition(0);
        Operation::Bulk {
            ctx,
            request: BulkShardRequest {
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
            },
        }
    }

    async fn elected_cluster_service() -> ClusterService {
        let (handle, store, _join) = state_loop::spawn("n1".to_string(), 16);
        let join_controller = Arc::new(NodeJoinController::new(
            "n1".to_string(),
            handle,
            1,
            Arc::new(crate::cluster::DeadlineFailureDetector::new(5_000)),
        ));
        join_controller.start_accumulating().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        join_controller.handle_join_request(
            crate::cluster::MemberInfo {
                node_id: "n1".to_string(),
                host: "10.0.0.1".to_string(),
                client_port: 8080,
                cluster_port: 9090,
                state: crate::cluster::NodeState::Joining,
                join_version: 1,
            },
            tx,
        );
        join_controller.wait_to_be_elected_as_master(1, std::time::Duration::from_secs(5)).await.unwrap();
        rx.await.unwrap().unwrap();
        ClusterService::new(join_controller, store)
    }

    #[tokio::test]
    async fn cluster_service_returns_not_implemented_for_put_mapping() {
        let svc = Arc::new(elected_cluster_service().await);
        let resp = svc.oneshot(make_op(service_names::CLUSTER)).await.unwrap();
        assert!(matches!(
            resp,
            OperationResponse::NotImplemented { service_name: "cluster", .. }
        ));
    }

    #[tokio::test]
    async fn cluster_service_accepts_join_request() {
        let svc = Arc::new(elected_cluster_service().await);
        let ctx = OperationContext::new(
            1,
            service_names::CLUSTER,
            Timestamp { millis: 0, counter: 0, node_id: "test".to_string() },
            5000,
        );
        let op = Operation::Join {
            ctx,
            node: lattice_core::messages::ClusterJoinNode {
                node_id: "n2".to_string(),
                host: "10.0.0.2".to_string(),
                client_port: 8080,
                cluster_port: 9090,
            },
        };
        let resp = svc.oneshot(op).await.unwrap();
        match resp {
            OperationResponse::Message(msg) => match *msg {
                lattice_core::messages::Message::JoinResponse(payload) => assert!(payload.accepted),
                other => panic!("unexpected message variant: {other:?}"),
            },
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn bulk_service_dispatches_to_executor() {
        let svc = Arc::new(bulk_service().await);
        let resp = svc.oneshot(bulk_op()).await.unwrap();
        match resp {
            OperationResponse::Message(msg) => match *msg {
                lattice_core::messages::Message::BulkResponse(response) => {
                    assert_eq!(response.items.len(), 1);
                }
                other => panic!("unexpected message variant: {other:?}"),
            },
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_stubs_implement_managed_service() {
        let registry = ServiceRegistry::new();
        registry.register(elected_cluster_service().await);
        registry.register(bulk_service().await);

        let ctx = ServiceContext { config: Arc::new(ServerConfig::default()) };
        registry.init_all(&ctx).await.unwrap();
        registry.shutdown_all(false).await.unwrap();

        assert!(registry.get_by_name("cluster").is_some());
        assert!(registry.get_by_name("bulk").is_some());
    }
}
