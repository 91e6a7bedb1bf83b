//! Node-join controller (C3): master election accumulation and join commit.
//!
//! Operates in one of two modes. In *streaming* mode a master is already
//! established and every join is committed immediately via a `process_joins`
//! state task. In *accumulating* mode the local node is campaigning: joins
//! are buffered until a quorum of master-eligible nodes has voted, at which
//! point a single `IMMEDIATE` state task both promotes the local node to
//! master and commits every buffered join in one publication.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{info, warn};

use super::assignment::compute_assignment;
use super::error::ClusterError;
use super::state_loop::{StateLoopHandle, StateTask, TaskAck, TaskOutcome, TaskPriority};
use super::traits::FailureDetector;
use super::types::{ClusterBlock, ClusterStateSnapshot, MemberInfo, NodeState, PartitionMeta, PartitionState};

/// Per-join completion signal. Fires exactly once.
pub type JoinCallback = oneshot::Sender<Result<(), ClusterError>>;

/// Per-leave completion signal. Fires exactly once.
pub type LeaveCallback = oneshot::Sender<Result<(), ClusterError>>;

#[allow(clippy::cast_possible_truncation)]
fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Streaming,
    Accumulating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElectionState {
    Fresh,
    TaskSubmitted,
    Elected,
    Failed,
}

/// Pending joins buffered while the controller campaigns or processes a
/// batch, keyed by node_id so a retried join request coalesces in place.
type PendingJoins = HashMap<String, (MemberInfo, Vec<JoinCallback>)>;

/// At-most-one election campaign. `task_submitted` is the compare-and-set
/// gate that ensures only one promotion task is ever submitted for this
/// context, even if multiple join arrivals race to satisfy the quorum.
struct ElectionContext {
    required_master_joins: usize,
    task_submitted: AtomicBool,
    state: Mutex<ElectionState>,
    completion: Mutex<Option<oneshot::Sender<Result<(), ClusterError>>>>,
}

impl ElectionContext {
    fn new(required_master_joins: usize, completion: oneshot::Sender<Result<(), ClusterError>>) -> Self {
        Self {
            required_master_joins,
            task_submitted: AtomicBool::new(false),
            state: Mutex::new(ElectionState::Fresh),
            completion: Mutex::new(Some(completion)),
        }
    }

    /// Compare-and-set: returns `true` exactly once, for whichever caller
    /// wins the race to submit the promotion task.
    fn try_submit(&self) -> bool {
        self.task_submitted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self, state: ElectionState, result: Result<(), ClusterError>) {
        *self.state.lock() = state;
        if let Some(tx) = self.completion.lock().take() {
            let _ = tx.send(result);
        }
    }
}

/// Accumulates joins during a master campaign and commits them, alone or
/// together with a promotion, through the single-writer state loop.
pub struct NodeJoinController {
    local_node_id: String,
    state_loop: StateLoopHandle,
    backup_count: u32,
    failure_detector: Arc<dyn FailureDetector>,
    mode: Mutex<Mode>,
    election: Mutex<Option<Arc<ElectionContext>>>,
    pending: Mutex<PendingJoins>,
}

impl NodeJoinController {
    pub fn new(
        local_node_id: String,
        state_loop: StateLoopHandle,
        backup_count: u32,
        failure_detector: Arc<dyn FailureDetector>,
    ) -> Self {
        Self {
            local_node_id,
            state_loop,
            backup_count,
            failure_detector,
            mode: Mutex::new(Mode::Streaming),
            election: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Preconditions: not already accumulating, and no election context.
    pub fn start_accumulating(&self) -> Result<(), ClusterError> {
        let mut mode = self.mode.lock();
        if *mode == Mode::Accumulating {
            return Err(ClusterError::Fatal("already accumulating".into()));
        }
        if self.election.lock().is_some() {
            return Err(ClusterError::Fatal("election context already exists".into()));
        }
        *mode = Mode::Accumulating;
        Ok(())
    }

    /// Registers a join. In accumulating mode the callback is buffered and
    /// the election threshold rechecked; in streaming mode an `Urgent`
    /// `process_joins` task commits it immediately.
    pub fn handle_join_request(&self, member: MemberInfo, callback: JoinCallback) {
        // The join request itself counts as a heartbeat-equivalent: a node
        // campaigning for master should not wait past the election timeout
        // on a candidate whose join already proved it was reachable.
        self.failure_detector.heartbeat(&member.node_id, now_millis());
        let mode = *self.mode.lock();
        match mode {
            Mode::Accumulating => {
                self.buffer_join(member, callback);
                if let Some(ctx) = self.election.lock().clone() {
                    self.maybe_submit_promotion(&ctx);
                }
            }
            Mode::Streaming => {
                self.buffer_join(member, callback);
                self.submit_process_joins(TaskPriority::Urgent);
            }
        }
    }

    fn buffer_join(&self, member: MemberInfo, callback: JoinCallback) {
        let mut pending = self.pending.lock();
        pending
            .entry(member.node_id.clone())
            .or_insert_with(|| (member, Vec::new()))
            .1
            .push(callback);
    }

    /// Blocks until the local node is elected master, the campaign fails, or
    /// `timeout_duration` elapses. Creates the (at-most-one) election context.
    pub async fn wait_to_be_elected_as_master(
        &self,
        required_master_joins: usize,
        timeout_duration: Duration,
    ) -> Result<(), ClusterError> {
        let (tx, rx) = oneshot::channel();
        let ctx = Arc::new(ElectionContext::new(required_master_joins, tx));

        {
            let mut slot = self.election.lock();
            if slot.is_some() {
                return Err(ClusterError::Fatal("election context already exists".into()));
            }
            *slot = Some(ctx.clone());
        }

        // A quorum may already be buffered from joins received before this
        // call (e.g. retries during a prior, aborted campaign).
        self.maybe_submit_promotion(&ctx);

        let result = match tokio::time::timeout(timeout_duration, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClusterError::Fatal("election completion channel dropped".into())),
            Err(_) => Err(ClusterError::Timeout { timeout_ms: timeout_duration.as_millis() as u64 }),
        };

        *self.election.lock() = None;
        *self.mode.lock() = Mode::Streaming;

        if result.is_err() {
            self.drain_pending_with_failure(ClusterError::NotMaster);
        }

        result
    }

    fn maybe_submit_promotion(&self, ctx: &Arc<ElectionContext>) {
        // Every join buffered while accumulating counts toward quorum, but
        // only if the failure detector still considers that node alive --
        // a buffered join from a node that has since gone silent doesn't
        // satisfy the quorum.
        let now = now_millis();
        let accumulated_join_count = self
            .pending
            .lock()
            .keys()
            .filter(|node_id| self.failure_detector.is_alive(node_id, now))
            .count();
        if accumulated_join_count < ctx.required_master_joins {
            return;
        }
        if !ctx.try_submit() {
            return;
        }
        *ctx.state.lock() = ElectionState::TaskSubmitted;

        let local_node_id = self.local_node_id.clone();
        let pending = std::mem::take(&mut *self.pending.lock());
        let (members, callbacks): (Vec<MemberInfo>, Vec<(String, Vec<JoinCallback>)>) = pending
            .into_iter()
            .map(|(node_id, (member, cbs))| (member, (node_id, cbs)))
            .unzip();

        let callbacks = Arc::new(Mutex::new(Some(callbacks)));
        let callbacks_for_task = callbacks.clone();

        let (task, ack_rx) = StateTask::new(TaskPriority::Immediate, "zen-promotion", move |current, _is_master| {
            if current.has_master() {
                return TaskOutcome::Failed("another master already exists".to_string());
            }
            let mut next = current.clone();
            next.master_node_id = Some(local_node_id.clone());
            next.blocks = next.blocks.without_global(ClusterBlock::NoMaster);
            apply_joins(&mut next, &members);
            TaskOutcome::Publish(next)
        });

        if self.state_loop.submit(task).is_err() {
            ctx.finish(ElectionState::Failed, Err(ClusterError::NodeClosed));
            fail_all(&callbacks_for_task, ClusterError::NodeClosed);
            return;
        }

        let ctx = ctx.clone();
        let state_loop_for_reroute = self.state_loop.clone();
        let backup_count = self.backup_count;
        tokio::spawn(async move {
            match ack_rx.await {
                Ok(TaskAck::Published(_)) => {
                    ctx.finish(ElectionState::Elected, Ok(()));
                    ack_all(&callbacks_for_task);
                    submit_reroute(&state_loop_for_reroute, backup_count, "zen-promotion-reroute");
                }
                Ok(TaskAck::Failed(msg)) => {
                    let err = ClusterError::Fatal(msg);
                    ctx.finish(ElectionState::Failed, Err(ClusterError::Fatal("promotion rejected".into())));
                    fail_all(&callbacks_for_task, err);
                }
                Ok(TaskAck::NoOp(_)) | Ok(TaskAck::NoLongerMaster) | Err(_) => {
                    ctx.finish(ElectionState::Failed, Err(ClusterError::Fatal("promotion did not complete".into())));
                    fail_all(&callbacks_for_task, ClusterError::Fatal("promotion did not complete".into()));
                }
            }
        });
    }

    /// Flushes any buffered joins through a `process_joins` task. Called when
    /// the campaign is abandoned or when leaving accumulating mode directly.
    pub fn stop_accumulating(&self) {
        *self.mode.lock() = Mode::Streaming;
        if !self.pending.lock().is_empty() {
            self.submit_process_joins(TaskPriority::Normal);
        }
    }

    fn submit_process_joins(&self, priority: TaskPriority) {
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return;
        }
        let (members, callbacks): (Vec<MemberInfo>, Vec<(String, Vec<JoinCallback>)>) = pending
            .into_iter()
            .map(|(node_id, (member, cbs))| (member, (node_id, cbs)))
            .unzip();
        let callbacks = Arc::new(Mutex::new(Some(callbacks)));
        let callbacks_for_task = callbacks.clone();

        let (task, ack_rx) = StateTask::new(priority, "process_joins", move |current, is_master| {
            if !is_master {
                return TaskOutcome::NoLongerMaster;
            }
            let mut next = current.clone();
            let changed = apply_joins(&mut next, &members);
            if changed {
                TaskOutcome::Publish(next)
            } else {
                TaskOutcome::NoOp
            }
        });

        if self.state_loop.submit(task).is_err() {
            fail_all(&callbacks_for_task, ClusterError::NodeClosed);
            return;
        }

        let state_loop_for_reroute = self.state_loop.clone();
        let backup_count = self.backup_count;
        tokio::spawn(async move {
            match ack_rx.await {
                Ok(TaskAck::Published(_)) => {
                    ack_all(&callbacks_for_task);
                    submit_reroute(&state_loop_for_reroute, backup_count, "process-joins-reroute");
                }
                Ok(TaskAck::NoOp(_)) => ack_all(&callbacks_for_task),
                Ok(TaskAck::NoLongerMaster) => fail_all(&callbacks_for_task, ClusterError::NotMaster),
                Ok(TaskAck::Failed(msg)) => fail_all(&callbacks_for_task, ClusterError::Fatal(msg)),
                Err(_) => fail_all(&callbacks_for_task, ClusterError::NodeClosed),
            }
        });
    }

    /// Processes a graceful leave request: removes the node from the
    /// snapshot under an `Urgent` state task, then rereoutes affected
    /// partitions away from it on success.
    pub fn handle_leave_request(&self, node_id: String, callback: LeaveCallback) {
        let state_loop_for_reroute = self.state_loop.clone();
        let backup_count = self.backup_count;
        let (task, ack_rx) = StateTask::new(TaskPriority::Urgent, "process_leave", move |current, is_master| {
            if !is_master {
                return TaskOutcome::NoLongerMaster;
            }
            if current.get_node(&node_id).is_none() {
                return TaskOutcome::NoOp;
            }
            let mut next = current.clone();
            next.nodes.retain(|n| n.node_id != node_id);
            TaskOutcome::Publish(next)
        });

        if self.state_loop.submit(task).is_err() {
            let _ = callback.send(Err(ClusterError::NodeClosed));
            return;
        }

        tokio::spawn(async move {
            match ack_rx.await {
                Ok(TaskAck::Published(_)) => {
                    let _ = callback.send(Ok(()));
                    submit_reroute(&state_loop_for_reroute, backup_count, "leave-reroute");
                }
                Ok(TaskAck::NoOp(_)) => {
                    let _ = callback.send(Ok(()));
                }
                Ok(TaskAck::NoLongerMaster) => {
                    let _ = callback.send(Err(ClusterError::NotMaster));
                }
                Ok(TaskAck::Failed(msg)) => {
                    let _ = callback.send(Err(ClusterError::Fatal(msg)));
                }
                Err(_) => {
                    let _ = callback.send(Err(ClusterError::NodeClosed));
                }
            }
        });
    }

    fn drain_pending_with_failure(&self, error: ClusterError) {
        let pending = std::mem::take(&mut *self.pending.lock());
        for (_, (_, callbacks)) in pending {
            for cb in callbacks {
                let _ = cb.send(Err(clone_error(&error)));
            }
        }
    }
}

/// Adds each candidate's node to the snapshot's node list. A node already
/// present by identifier is a no-op for that node. A new node that shares a
/// transport address with an existing node evicts the existing one.
/// Returns `true` if the snapshot's node list actually changed.
fn apply_joins(snapshot: &mut ClusterStateSnapshot, members: &[MemberInfo]) -> bool {
    let mut changed = false;
    for candidate in members {
        if snapshot.get_node(&candidate.node_id).is_some() {
            info!(node_id = %candidate.node_id, "join from already-known node, acking without state change");
            continue;
        }
        snapshot.nodes.retain(|existing| {
            let same_address = existing.host == candidate.host && existing.cluster_port == candidate.cluster_port;
            if same_address {
                warn!(evicted = %existing.node_id, new = %candidate.node_id, "evicting node sharing transport address");
            }
            !same_address
        });
        let mut joined = candidate.clone();
        joined.state = NodeState::Active;
        snapshot.nodes.push(joined);
        changed = true;
    }
    changed
}

/// Submits a low-priority state task that recomputes partition assignment
/// against the current active membership and publishes any change to
/// `routing`. Runs after every successful join/leave commit under a reason
/// distinct from the commit itself, so routing changes ack independently of
/// membership changes.
fn submit_reroute(state_loop: &StateLoopHandle, backup_count: u32, reason: &'static str) {
    let (task, _ack_rx) = StateTask::new(TaskPriority::Normal, reason, move |current, is_master| {
        if !is_master {
            return TaskOutcome::NoLongerMaster;
        }
        let active: Vec<MemberInfo> = current.nodes.clone();
        let target = compute_assignment(&active, lattice_core::PARTITION_COUNT, backup_count);
        if target.is_empty() {
            return TaskOutcome::NoOp;
        }
        let mut next = current.clone();
        let mut changed = false;
        for assignment in target {
            let entry = next.routing.entry(assignment.partition_id).or_insert_with(|| PartitionMeta {
                partition_id: assignment.partition_id,
                owner: assignment.owner.clone(),
                backups: assignment.backups.clone(),
                state: PartitionState::Active,
                version: 0,
            });
            if entry.owner != assignment.owner || entry.backups != assignment.backups {
                entry.owner = assignment.owner;
                entry.backups = assignment.backups;
                entry.state = PartitionState::Active;
                entry.version += 1;
                changed = true;
            }
        }
        if changed {
            TaskOutcome::Publish(next)
        } else {
            TaskOutcome::NoOp
        }
    });
    // Best-effort: if the queue is closed the node is shutting down, and if
    // it's full the next reroute (triggered by the next membership change)
    // will supersede this one.
    let _ = state_loop.submit(task);
}

fn ack_all(callbacks: &Arc<Mutex<Option<Vec<(String, Vec<JoinCallback>)>>>>) {
    if let Some(entries) = callbacks.lock().take() {
        for (_, cbs) in entries {
            for cb in cbs {
                let _ = cb.send(Ok(()));
            }
        }
    }
}

fn fail_all(callbacks: &Arc<Mutex<Option<Vec<(String, Vec<JoinCallback>)>>>>, error: ClusterError) {
    if let Some(entries) = callbacks.lock().take() {
        for (_, cbs) in entries {
            for cb in cbs {
                let _ = cb.send(Err(clone_error(&error)));
            }
        }
    }
}

fn clone_error(error: &ClusterError) -> ClusterError {
    match error {
        ClusterError::NotMaster => ClusterError::NotMaster,
        ClusterError::NodeClosed => ClusterError::NodeClosed,
        ClusterError::Fatal(msg) => ClusterError::Fatal(msg.clone()),
        ClusterError::Timeout { timeout_ms } => ClusterError::Timeout { timeout_ms: *timeout_ms },
        other => ClusterError::Fatal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::state_loop;

    fn member(node_id: &str) -> MemberInfo {
        MemberInfo {
            node_id: node_id.to_string(),
            host: format!("10.0.0.{}", node_id.len()),
            client_port: 8080,
            cluster_port: 9090,
            state: NodeState::Joining,
            join_version: 1,
        }
    }

    #[tokio::test]
    async fn election_with_quorum_elects_and_commits_joins() {
        let (handle, store, _join) = state_loop::spawn("n1".to_string(), 16);
        let controller = Arc::new(NodeJoinController::new(
            "n1".to_string(),
            handle,
            1,
            Arc::new(super::failure_detector::DeadlineFailureDetector::new(5_000)),
        ));

        controller.start_accumulating().unwrap();

        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        controller.handle_join_request(member("n1"), tx1);
        controller.handle_join_request(member("n2"), tx2);

        let elected = controller
            .wait_to_be_elected_as_master(2, Duration::from_secs(5))
            .await;
        assert!(elected.is_ok());

        assert!(rx1.await.unwrap().is_ok());
        assert!(rx2.await.unwrap().is_ok());

        let snapshot = store.current();
        assert_eq!(snapshot.master_node_id.as_deref(), Some("n1"));
        assert!(!snapshot.blocks.has_no_master());
        assert!(snapshot.get_node("n1").is_some());
        assert!(snapshot.get_node("n2").is_some());
    }

    #[tokio::test]
    async fn election_timeout_drains_accumulator() {
        let (handle, store, _join) = state_loop::spawn("n1".to_string(), 16);
        let controller = Arc::new(NodeJoinController::new(
            "n1".to_string(),
            handle,
            1,
            Arc::new(super::failure_detector::DeadlineFailureDetector::new(5_000)),
        ));

        controller.start_accumulating().unwrap();

        let (tx1, rx1) = oneshot::channel();
        controller.handle_join_request(member("n1"), tx1);

        let result = controller
            .wait_to_be_elected_as_master(2, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(ClusterError::Timeout { .. })));

        assert!(rx1.await.unwrap().is_err());
        assert!(store.current().master_node_id.is_none());
    }

    #[tokio::test]
    async fn already_known_join_does_not_change_state() {
        let (handle, store, _join) = state_loop::spawn("n1".to_string(), 16);
        let controller = NodeJoinController::new(
            "n1".to_string(),
            handle,
            1,
            Arc::new(super::failure_detector::DeadlineFailureDetector::new(5_000)),
        );

        // Seed n1 as already present via direct promotion.
        controller.start_accumulating().unwrap();
        let (tx, _rx) = oneshot::channel();
        controller.handle_join_request(member("n1"), tx);
        controller
            .wait_to_be_elected_as_master(1, Duration::from_secs(5))
            .await
            .unwrap();
        let version_after_election = store.current().version;

        let (tx2, rx2) = oneshot::channel();
        controller.handle_join_request(member("n1"), tx2);
        assert!(rx2.await.unwrap().is_ok());
        assert_eq!(store.current().version, version_after_election);
    }

    #[tokio::test]
    async fn successful_election_reroutes_partitions_to_new_members() {
        let (handle, store, _join) = state_loop::spawn("n1".to_string(), 16);
        let controller = Arc::new(NodeJoinController::new(
            "n1".to_string(),
            handle,
            1,
            Arc::new(super::failure_detector::DeadlineFailureDetector::new(5_000)),
        ));

        controller.start_accumulating().unwrap();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        controller.handle_join_request(member("n1"), tx1);
        controller.handle_join_request(member("n2"), tx2);
        controller.wait_to_be_elected_as_master(2, Duration::from_secs(5)).await.unwrap();
        rx1.await.unwrap().unwrap();
        rx2.await.unwrap().unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        loop {
            if !store.current().routing.is_empty() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "reroute did not publish routing in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let routing = store.current().routing;
        assert_eq!(routing.len(), lattice_core::PARTITION_COUNT as usize);
    }

    #[tokio::test]
    async fn leave_request_removes_node_and_acks() {
        let (handle, store, _join) = state_loop::spawn("n1".to_string(), 16);
        let controller = NodeJoinController::new(
            "n1".to_string(),
            handle,
            1,
            Arc::new(super::failure_detector::DeadlineFailureDetector::new(5_000)),
        );

        controller.start_accumulating().unwrap();
        let (tx, rx) = oneshot::channel();
        controller.handle_join_request(member("n1"), tx);
        controller.wait_to_be_elected_as_master(1, Duration::from_secs(5)).await.unwrap();
        rx.await.unwrap().unwrap();
        assert!(store.current().get_node("n1").is_some());

        let (leave_tx, leave_rx) = oneshot::channel();
        controller.handle_leave_request("n1".to_string(), leave_tx);
        assert!(leave_rx.await.unwrap().is_ok());
        assert!(store.current().get_node("n1").is_none());
    }

    #[tokio::test]
    async fn leave_request_for_unknown_node_is_a_noop_ack() {
        let (handle, _store, _join) = state_loop::spawn("n1".to_string(), 16);
        let controller = NodeJoinController::new(
            "n1".to_string(),
            handle,
            1,
            Arc::new(super::failure_detector::DeadlineFailureDetector::new(5_000)),
        );

        controller.start_accumulating().unwrap();
        let (tx, rx) = oneshot::channel();
        controller.handle_join_request(member("n1"), tx);
        controller.wait_to_be_elected_as_master(1, Duration::from_secs(5)).await.unwrap();
        rx.await.unwrap().unwrap();

        let (leave_tx, leave_rx) = oneshot::channel();
        controller.handle_leave_request("ghost".to_string(), leave_tx);
        assert!(leave_rx.await.unwrap().is_ok());
    }
}
