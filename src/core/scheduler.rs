//! The execution scheduler — the single owner of a run.
//!
//! Scheduling decisions are serialized through this one task per run: limit
//! checks, ready-set computation, dispatch gating, pool writes and the step
//! counter all happen here, never concurrently with themselves. Node
//! *execution* is parallel in the [`WorkerPool`]; completions come back one at
//! a time through `join_next`.
//!
//! A persistence failure does not roll back in-memory state, but the write is
//! retried and no new node is dispatched until the backlog drains, so the
//! step-count invariant in durable storage never trails by more than the
//! in-flight work.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{ErrorHandlingMode, ExecutionLimits};
use crate::core::context::{BranchContext, CallContext, RuntimeContext};
use crate::core::limits::{LimitEnforcer, LimitReason};
use crate::core::node_runner::{NodeInvocation, NodeOutput, NodeRunner};
use crate::core::variable_pool::{ScopeId, Selector, VariablePool};
use crate::core::worker_pool::{NodeTask, TaskOutcome, WorkerPool};
use crate::error::{NodeError, NodeResult};
use crate::graph::{
    all_in_edges_skipped, ready_nodes, EdgeState, Graph, GraphNode, GraphSpec, END_NODE_TYPE,
};
use crate::repository::records::record_time;
use crate::repository::{
    ExecutionRepository, NodeExecutionRecord, NodeExecutionStatus, RunRecord, RunStatus,
};

/// External command to control a running workflow.
#[derive(Debug, Clone)]
pub enum Command {
    Cancel { reason: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeRunState {
    Pending,
    Queued,
    Dispatched,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug)]
enum HaltCause {
    Limit(LimitReason),
    Cancelled(String),
    FailFast(String),
}

#[derive(Debug)]
enum PersistOp {
    CreateExec(NodeExecutionRecord),
    UpdateExec(NodeExecutionRecord),
    UpdateRun(RunRecord),
}

enum Dispatch {
    Submitted,
    Requeued,
    Resolved,
}

struct InFlight {
    node_id: String,
    scope: ScopeId,
    group: u64,
    record: NodeExecutionRecord,
}

/// Everything a scheduler needs to drive one run.
pub(crate) struct SchedulerParams {
    pub graph: Arc<Graph>,
    pub runner: Arc<dyn NodeRunner>,
    pub repository: Arc<dyn ExecutionRepository>,
    pub limits: ExecutionLimits,
    pub context: Arc<RuntimeContext>,
    pub run: RunRecord,
    pub pool: VariablePool,
    pub call_context: CallContext,
    pub status_tx: watch::Sender<RunStatus>,
    pub command_rx: mpsc::Receiver<Command>,
    pub external_cancel: CancellationToken,
}

/// Walks the graph, gates every dispatch through the limit enforcer, executes
/// nodes via the worker pool and persists each transition.
pub struct ExecutionScheduler {
    graph: Arc<Graph>,
    runner: Arc<dyn NodeRunner>,
    repository: Arc<dyn ExecutionRepository>,
    enforcer: LimitEnforcer,
    context: Arc<RuntimeContext>,
    pool: VariablePool,
    workers: WorkerPool,
    run: RunRecord,
    call_context: CallContext,
    branch_context: BranchContext,
    edge_states: Vec<EdgeState>,
    node_states: HashMap<String, NodeRunState>,
    ready_queue: VecDeque<String>,
    deferred: VecDeque<String>,
    in_flight: HashMap<String, InFlight>,
    sequence: u64,
    final_outputs: HashMap<String, Value>,
    terminal_reached: bool,
    any_failed: bool,
    first_failure: Option<String>,
    halt: Option<HaltCause>,
    pending_persists: VecDeque<PersistOp>,
    status_tx: watch::Sender<RunStatus>,
    command_rx: mpsc::Receiver<Command>,
    commands_open: bool,
    external_cancel: CancellationToken,
    started_ts: i64,
}

impl ExecutionScheduler {
    pub(crate) fn new(params: SchedulerParams) -> Self {
        let edge_states = vec![EdgeState::Pending; params.graph.edge_count()];
        let workers = WorkerPool::new(params.limits.max_submit_count);
        ExecutionScheduler {
            enforcer: LimitEnforcer::new(params.limits),
            graph: params.graph,
            runner: params.runner,
            repository: params.repository,
            context: params.context,
            pool: params.pool,
            workers,
            run: params.run,
            call_context: params.call_context,
            branch_context: BranchContext::new(),
            edge_states,
            node_states: HashMap::new(),
            ready_queue: VecDeque::new(),
            deferred: VecDeque::new(),
            in_flight: HashMap::new(),
            sequence: 0,
            final_outputs: HashMap::new(),
            terminal_reached: false,
            any_failed: false,
            first_failure: None,
            halt: None,
            pending_persists: VecDeque::new(),
            status_tx: params.status_tx,
            command_rx: params.command_rx,
            commands_open: true,
            external_cancel: params.external_cancel,
            started_ts: 0,
        }
    }

    /// Drive the run to a terminal state and return its final record.
    pub async fn run(mut self) -> RunRecord {
        self.started_ts = self.now();
        self.run.status = RunStatus::Running;
        self.run.started_at = Some(record_time(self.started_ts));
        self.run.call_depth = self.call_context.depth();
        let _ = self.status_tx.send(RunStatus::Running);
        self.push_persist(PersistOp::UpdateRun(self.run.clone()));

        self.complete_start_node();

        loop {
            self.poll_commands();

            if self.halt.is_none() {
                self.collect_ready();
            }

            let persist_ok = self.flush_persists().await;

            let has_work = !(self.ready_queue.is_empty()
                && self.deferred.is_empty()
                && self.workers.is_idle());

            if !has_work && self.halt.is_none() && self.pending_persists.is_empty() {
                break;
            }

            if self.halt.is_none() && has_work {
                let now = self.now();
                if let Some(reason) =
                    self.enforcer
                        .halt_reason(self.run.steps_executed, self.started_ts, now)
                {
                    tracing::debug!(run_id = %self.run.id, reason = %reason, "run hit limit, draining in-flight work");
                    self.halt = Some(HaltCause::Limit(reason));
                    self.workers.cancel_all();
                }
            }

            if self.halt.is_none() && persist_ok {
                self.dispatch_ready();
            }

            if self.workers.is_idle() {
                if self.halt.is_some() {
                    break;
                }
                let drained = self.ready_queue.is_empty() && self.deferred.is_empty();
                if drained && self.pending_persists.is_empty() {
                    break;
                }
                if drained || !persist_ok {
                    self.wait_for_command_or(Duration::from_millis(50)).await;
                }
                continue;
            }

            tokio::select! {
                outcome = self.workers.join_next() => {
                    if let Some(outcome) = outcome {
                        self.handle_completion(outcome);
                    }
                }
                cmd = self.command_rx.recv(), if self.commands_open => {
                    match cmd {
                        Some(cmd) => self.apply_command(cmd),
                        None => self.commands_open = false,
                    }
                }
                _ = self.external_cancel.cancelled(), if self.halt.is_none() => {
                    self.apply_command(Command::Cancel {
                        reason: Some("cancelled by parent run".to_string()),
                    });
                }
            }
        }

        self.finalize().await
    }

    fn now(&self) -> i64 {
        self.context.time_provider.now_timestamp()
    }

    fn state(&self, node_id: &str) -> NodeRunState {
        self.node_states
            .get(node_id)
            .copied()
            .unwrap_or(NodeRunState::Pending)
    }

    fn push_persist(&mut self, op: PersistOp) {
        self.pending_persists.push_back(op);
    }

    /// Flush persistence in transition order. Returns false while a write
    /// keeps failing; dispatch is blocked for as long as that holds.
    async fn flush_persists(&mut self) -> bool {
        while let Some(op) = self.pending_persists.front() {
            let result = match op {
                PersistOp::CreateExec(record) => {
                    self.repository.create_node_execution(record).await
                }
                PersistOp::UpdateExec(record) => {
                    self.repository.update_node_execution(record).await
                }
                PersistOp::UpdateRun(record) => self.repository.update_run(record).await,
            };
            match result {
                Ok(()) => {
                    self.pending_persists.pop_front();
                }
                Err(e) => {
                    tracing::warn!(run_id = %self.run.id, error = %e, "persistence failure, blocking step advancement");
                    return false;
                }
            }
        }
        true
    }

    fn poll_commands(&mut self) {
        while self.commands_open {
            match self.command_rx.try_recv() {
                Ok(cmd) => self.apply_command(cmd),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.commands_open = false;
                }
            }
        }
        if self.external_cancel.is_cancelled() && self.halt.is_none() {
            self.apply_command(Command::Cancel {
                reason: Some("cancelled by parent run".to_string()),
            });
        }
    }

    fn apply_command(&mut self, cmd: Command) {
        match cmd {
            Command::Cancel { reason } => {
                if self.halt.is_none() {
                    tracing::debug!(run_id = %self.run.id, "cancel requested, draining in-flight work");
                    self.halt = Some(HaltCause::Cancelled(
                        reason.unwrap_or_else(|| "cancelled by host".to_string()),
                    ));
                    self.workers.cancel_all();
                }
            }
        }
    }

    async fn wait_for_command_or(&mut self, timeout: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {}
            cmd = self.command_rx.recv(), if self.commands_open => {
                match cmd {
                    Some(cmd) => self.apply_command(cmd),
                    None => self.commands_open = false,
                }
            }
            _ = self.external_cancel.cancelled(), if self.halt.is_none() => {
                self.apply_command(Command::Cancel {
                    reason: Some("cancelled by parent run".to_string()),
                });
            }
        }
    }

    // --- graph traversal bookkeeping ---

    fn complete_start_node(&mut self) {
        let start_id = self.graph.start_node_id().to_string();
        self.node_states
            .insert(start_id.clone(), NodeRunState::Succeeded);
        self.take_out_edges(&start_id, None);
    }

    fn take_out_edges(&mut self, node_id: &str, branch: Option<&str>) {
        for &idx in self.graph.out_edge_indices(node_id) {
            let edge = self.graph.edge(idx);
            let taken = match (&edge.branch, branch) {
                (None, _) => true,
                (Some(label), Some(selected)) => label == selected,
                (Some(_), None) => false,
            };
            self.edge_states[idx] = if taken {
                EdgeState::Taken
            } else {
                EdgeState::Skipped
            };
        }
    }

    fn skip_out_edges(&mut self, node_id: &str) {
        for &idx in self.graph.out_edge_indices(node_id) {
            self.edge_states[idx] = EdgeState::Skipped;
        }
    }

    /// Skip every pending node whose incoming edges have all been skipped,
    /// to a fixpoint.
    fn propagate_skips(&mut self) {
        loop {
            let mut to_skip = Vec::new();
            for node in self.graph.nodes() {
                if self.state(&node.id) == NodeRunState::Pending
                    && all_in_edges_skipped(&self.graph, &self.edge_states, &node.id)
                {
                    to_skip.push(node.id.clone());
                }
            }
            if to_skip.is_empty() {
                break;
            }
            for node_id in to_skip {
                self.mark_skipped(&node_id);
            }
        }
    }

    fn mark_skipped(&mut self, node_id: &str) {
        let structural = self
            .graph
            .node(node_id)
            .map(|n| n.is_structural())
            .unwrap_or(true);
        self.node_states
            .insert(node_id.to_string(), NodeRunState::Skipped);
        if !structural {
            self.sequence += 1;
            let execution_id = self.context.id_generator.next_id();
            let mut record = NodeExecutionRecord::queued(
                self.run.id.clone(),
                node_id,
                execution_id,
                self.sequence,
                HashMap::new(),
            );
            record.status = NodeExecutionStatus::Skipped;
            record.finished_at = Some(record_time(self.now()));
            self.push_persist(PersistOp::CreateExec(record));
        }
        self.skip_out_edges(node_id);
    }

    /// Move newly ready nodes into the queue; terminal markers complete
    /// in place without dispatch.
    fn collect_ready(&mut self) {
        self.propagate_skips();
        for node_id in ready_nodes(&self.graph, &self.edge_states) {
            if self.state(&node_id) != NodeRunState::Pending {
                continue;
            }
            let node_type = self
                .graph
                .node(&node_id)
                .map(|n| n.node_type.clone())
                .unwrap_or_default();
            if node_type == END_NODE_TYPE {
                self.complete_end_node(&node_id);
            } else {
                self.node_states
                    .insert(node_id.clone(), NodeRunState::Queued);
                self.ready_queue.push_back(node_id);
            }
        }
    }

    /// End nodes are structural: they collect their declared inputs as the
    /// run's final outputs, without a NodeExecution record or a step.
    fn complete_end_node(&mut self, node_id: &str) {
        let node = self.graph.node(node_id).expect("ready node exists").clone();
        let snapshot = self.pool.snapshot(ScopeId::ROOT);
        for (name, selector) in &node.inputs {
            if let Some(value) = snapshot.get(selector) {
                self.final_outputs.insert(name.clone(), value.clone());
            }
        }
        self.node_states
            .insert(node_id.to_string(), NodeRunState::Succeeded);
        self.terminal_reached = true;
        self.take_out_edges(node_id, None);
    }

    // --- dispatch ---

    fn dispatch_ready(&mut self) {
        // Sequential backlog from a degraded fan-out runs strictly one at a
        // time, ahead of any new fan-out.
        if !self.deferred.is_empty() {
            if self.workers.is_idle() {
                if let Some(node_id) = self.deferred.pop_front() {
                    self.dispatch_node(node_id, 0);
                }
            }
            return;
        }

        let mut batch: Vec<String> = self.ready_queue.drain(..).collect();
        if batch.len() > 1 {
            if self.enforcer.allow_concurrent_branch(self.branch_context.depth()) {
                let group = self.branch_context.open(batch.len());
                self.run.parallel_depth =
                    self.run.parallel_depth.max(self.branch_context.depth());
                for node_id in batch {
                    match self.dispatch_node(node_id, group) {
                        Dispatch::Submitted => {}
                        Dispatch::Requeued | Dispatch::Resolved => {
                            self.branch_context.complete_member(group);
                        }
                    }
                }
            } else {
                tracing::debug!(
                    run_id = %self.run.id,
                    fan_out = batch.len(),
                    "parallel depth at ceiling, queueing branches sequentially"
                );
                let rest = batch.split_off(1);
                self.deferred.extend(rest);
                self.dispatch_node(batch.remove(0), 0);
            }
            return;
        }
        if let Some(node_id) = batch.pop() {
            self.dispatch_node(node_id, 0);
        }
    }

    fn dispatch_node(&mut self, node_id: String, group: u64) -> Dispatch {
        let node = self.graph.node(&node_id).expect("queued node exists").clone();

        if node.is_subflow() && self.enforcer.call_depth_exceeded(self.call_context.depth()) {
            let err = NodeError::CallDepthExceeded {
                depth: self.call_context.depth(),
                limit: self.enforcer.limits().max_call_depth,
            };
            self.resolve_without_dispatch(&node_id, err);
            return Dispatch::Resolved;
        }

        // Inputs are fixed here; later pool writes cannot leak in.
        let snapshot = self.pool.snapshot(ScopeId::ROOT);
        let mut inputs = HashMap::new();
        for (name, selector) in &node.inputs {
            match snapshot.get(selector) {
                Some(value) => {
                    inputs.insert(name.clone(), value.clone());
                }
                None => {
                    let err = NodeError::VariableNotFound(format!(
                        "{}.{}",
                        selector.node_id(),
                        selector.variable_name()
                    ));
                    self.resolve_without_dispatch(&node_id, err);
                    return Dispatch::Resolved;
                }
            }
        }

        let execution_id = self.context.id_generator.next_id();
        let task = if node.is_subflow() {
            self.subflow_task(&node, inputs.clone())
        } else {
            self.runner_task(&node, inputs.clone())
        };

        if let Err(err) = self.workers.try_submit(&execution_id, &node_id, task) {
            tracing::debug!(run_id = %self.run.id, node_id = %node_id, error = %err, "worker pool saturated, re-queueing");
            self.ready_queue.push_front(node_id);
            return Dispatch::Requeued;
        }

        self.sequence += 1;
        let mut record = NodeExecutionRecord::queued(
            self.run.id.clone(),
            node_id.clone(),
            execution_id.clone(),
            self.sequence,
            inputs,
        );
        self.push_persist(PersistOp::CreateExec(record.clone()));
        record.status = NodeExecutionStatus::Running;
        record.started_at = Some(record_time(self.now()));
        self.push_persist(PersistOp::UpdateExec(record.clone()));

        let scope = self.pool.open_scope(ScopeId::ROOT);
        self.node_states
            .insert(node_id.clone(), NodeRunState::Dispatched);
        self.in_flight.insert(
            execution_id,
            InFlight {
                node_id,
                scope,
                group,
                record,
            },
        );
        Dispatch::Submitted
    }

    /// Fail a node that never made it to the worker pool (call-depth ceiling,
    /// unresolvable input). Not a completion: no step is counted.
    fn resolve_without_dispatch(&mut self, node_id: &str, err: NodeError) {
        tracing::debug!(run_id = %self.run.id, node_id = %node_id, error = %err, "node failed before dispatch");
        self.sequence += 1;
        let execution_id = self.context.id_generator.next_id();
        let mut record = NodeExecutionRecord::queued(
            self.run.id.clone(),
            node_id,
            execution_id,
            self.sequence,
            HashMap::new(),
        );
        self.push_persist(PersistOp::CreateExec(record.clone()));
        record.status = NodeExecutionStatus::Failed;
        record.error = Some(err.to_string());
        record.finished_at = Some(record_time(self.now()));
        self.push_persist(PersistOp::UpdateExec(record));
        self.node_states
            .insert(node_id.to_string(), NodeRunState::Failed);
        self.record_failure(err.to_string());
        self.skip_out_edges(node_id);
        self.propagate_skips();
    }

    fn record_failure(&mut self, error: String) {
        self.any_failed = true;
        if self.first_failure.is_none() {
            self.first_failure = Some(error.clone());
        }
        if self.enforcer.limits().error_mode == ErrorHandlingMode::FailFast
            && self.halt.is_none()
        {
            self.halt = Some(HaltCause::FailFast(error));
            self.workers.cancel_all();
        }
    }

    fn runner_task(&self, node: &GraphNode, inputs: HashMap<String, Value>) -> NodeTask {
        let runner = self.runner.clone();
        let invocation = NodeInvocation {
            run_id: self.run.id.clone(),
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            config: node.config.clone(),
            inputs,
        };
        Box::new(move |cancel| Box::pin(async move { runner.run(invocation, cancel).await }))
    }

    fn subflow_task(&self, node: &GraphNode, inputs: HashMap<String, Value>) -> NodeTask {
        let runner = self.runner.clone();
        let repository = self.repository.clone();
        let context = self.context.clone();
        let limits = self.enforcer.limits().clone();
        let call_context = self.call_context.child(self.run.id.clone(), node.id.clone());
        let config = node.config.clone();
        Box::new(move |cancel| {
            Box::pin(run_sub_workflow(
                runner, repository, context, limits, call_context, config, inputs, cancel,
            ))
        })
    }

    // --- completion ---

    fn handle_completion(&mut self, outcome: TaskOutcome) {
        let Some(mut flight) = self.in_flight.remove(&outcome.execution_id) else {
            return;
        };
        self.branch_context.complete_member(flight.group);
        flight.record.finished_at = Some(record_time(self.now()));

        match outcome.result {
            Ok(output) => self.complete_node_success(flight, output),
            Err(NodeError::Cancelled) => {
                // Cancelled before start: ends failed but is not a step.
                self.pool.discard_scope(flight.scope);
                flight.record.status = NodeExecutionStatus::Failed;
                flight.record.error = Some(NodeError::Cancelled.to_string());
                self.node_states
                    .insert(flight.node_id.clone(), NodeRunState::Failed);
                self.push_persist(PersistOp::UpdateExec(flight.record.clone()));
                self.skip_out_edges(&flight.node_id);
                self.propagate_skips();
            }
            Err(err) => self.complete_node_failure(flight, err),
        }
    }

    fn complete_node_success(&mut self, mut flight: InFlight, output: NodeOutput) {
        let node = self
            .graph
            .node(&flight.node_id)
            .expect("known node")
            .clone();

        let branch = if node.is_branch() {
            match &output.branch {
                Some(b) if node.branches.iter().any(|x| x == b) => Some(b.clone()),
                Some(b) => {
                    return self
                        .complete_node_failure(flight, NodeError::UnknownBranchHandle(b.clone()));
                }
                None => {
                    return self.complete_node_failure(flight, NodeError::MissingBranchHandle);
                }
            }
        } else {
            None
        };

        if let Err(err) = self
            .pool
            .set_node_outputs(flight.scope, &flight.node_id, &output.outputs)
        {
            self.pool.discard_scope(flight.scope);
            return self.complete_node_failure(flight, err);
        }
        // Branch completion order decides merge order.
        self.pool.close_scope(flight.scope);

        flight.record.status = NodeExecutionStatus::Succeeded;
        flight.record.outputs = output.outputs;
        self.node_states
            .insert(flight.node_id.clone(), NodeRunState::Succeeded);
        self.run.steps_executed += 1;
        self.push_persist(PersistOp::UpdateExec(flight.record.clone()));
        self.push_persist(PersistOp::UpdateRun(self.run.clone()));
        self.take_out_edges(&flight.node_id, branch.as_deref());
        self.propagate_skips();
    }

    fn complete_node_failure(&mut self, mut flight: InFlight, err: NodeError) {
        self.pool.discard_scope(flight.scope);
        flight.record.status = NodeExecutionStatus::Failed;
        flight.record.error = Some(err.to_string());
        self.node_states
            .insert(flight.node_id.clone(), NodeRunState::Failed);
        self.run.steps_executed += 1;
        self.push_persist(PersistOp::UpdateExec(flight.record.clone()));
        self.push_persist(PersistOp::UpdateRun(self.run.clone()));
        self.record_failure(err.to_string());
        self.skip_out_edges(&flight.node_id);
        self.propagate_skips();
    }

    // --- termination ---

    async fn finalize(mut self) -> RunRecord {
        self.run.finished_at = Some(record_time(self.now()));
        self.run.outputs = std::mem::take(&mut self.final_outputs);
        match self.halt.take() {
            Some(HaltCause::Limit(reason)) => {
                self.run.status = RunStatus::ExceededLimit;
                self.run.limit_reason = Some(reason);
            }
            Some(HaltCause::Cancelled(reason)) => {
                self.run.status = RunStatus::Stopped;
                self.run.error = Some(reason);
            }
            Some(HaltCause::FailFast(error)) => {
                self.run.status = RunStatus::Failed;
                self.run.error = Some(error);
            }
            None => {
                let succeeded = self.terminal_reached
                    || (self.graph.end_node_ids().is_empty() && !self.any_failed);
                if succeeded {
                    self.run.status = RunStatus::Succeeded;
                } else {
                    self.run.status = RunStatus::Failed;
                    self.run.error = self
                        .first_failure
                        .take()
                        .or_else(|| Some("terminal node not reached".to_string()));
                }
            }
        }

        self.push_persist(PersistOp::UpdateRun(self.run.clone()));
        for attempt in 0u64..5 {
            if self.flush_persists().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100 * (attempt + 1))).await;
        }
        if !self.pending_persists.is_empty() {
            tracing::warn!(
                run_id = %self.run.id,
                dropped = self.pending_persists.len(),
                "giving up on unpersisted transitions"
            );
        }

        let _ = self.status_tx.send(self.run.status);
        self.run
    }
}

/// Execute a sub-workflow node as a nested run sharing the parent's limits,
/// with the call stack extended by one frame.
#[allow(clippy::too_many_arguments)]
async fn run_sub_workflow(
    runner: Arc<dyn NodeRunner>,
    repository: Arc<dyn ExecutionRepository>,
    context: Arc<RuntimeContext>,
    limits: ExecutionLimits,
    call_context: CallContext,
    config: Value,
    inputs: HashMap<String, Value>,
    cancel: CancellationToken,
) -> NodeResult<NodeOutput> {
    let graph_value = config.get("graph").cloned().ok_or_else(|| {
        NodeError::ConfigError("sub-workflow node is missing its embedded graph".to_string())
    })?;
    let spec: GraphSpec = serde_json::from_value(graph_value)
        .map_err(|e| NodeError::ConfigError(format!("invalid sub-workflow graph: {}", e)))?;
    let graph =
        Graph::build(spec).map_err(|e| NodeError::ConfigError(e.to_string()))?;

    let child_run_id = context.id_generator.next_id();
    let mut child_run = RunRecord::new(
        child_run_id,
        record_time(context.time_provider.now_timestamp()),
    );
    child_run.call_depth = call_context.depth();
    repository
        .create_run(&child_run)
        .await
        .map_err(|e| NodeError::SubWorkflowFailed(e.to_string()))?;

    let mut pool = VariablePool::new(limits.max_variable_bytes);
    let start_id = graph.start_node_id().to_string();
    for (name, value) in inputs {
        pool.set(ScopeId::ROOT, &Selector::new(start_id.clone(), name), value)?;
    }

    let (status_tx, _status_rx) = watch::channel(RunStatus::Pending);
    let (_command_tx, command_rx) = mpsc::channel(1);
    let scheduler = ExecutionScheduler::new(SchedulerParams {
        graph: Arc::new(graph),
        runner,
        repository,
        limits,
        context,
        run: child_run,
        pool,
        call_context,
        status_tx,
        command_rx,
        external_cancel: cancel,
    });

    let finished = scheduler.run().await;
    match finished.status {
        RunStatus::Succeeded => Ok(NodeOutput::with_outputs(finished.outputs)),
        status => Err(NodeError::SubWorkflowFailed(format!(
            "nested run {} ended {}: {}",
            finished.id,
            status,
            finished.error.unwrap_or_default()
        ))),
    }
}
