//! Host-facing engine facade.
//!
//! [`WorkflowEngine`] owns the collaborator seams (NodeRunner, repository) and
//! spawns one [`ExecutionScheduler`](crate::core::ExecutionScheduler) task per
//! run. The durable run record is the authoritative status surface; the
//! in-memory [`RunHandle`] adds live status watching and cancellation for
//! runs started by this process.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::ExecutionLimits;
use crate::core::context::{CallContext, RuntimeContext};
use crate::core::node_runner::NodeRunner;
use crate::core::scheduler::{Command, ExecutionScheduler, SchedulerParams};
use crate::core::variable_pool::{ScopeId, Selector, VariablePool};
use crate::error::{WorkflowError, WorkflowResult};
use crate::graph::{Graph, GraphSpec};
use crate::repository::records::record_time;
use crate::repository::{ExecutionRepository, NodeExecutionRecord, RunRecord, RunStatus};

/// Live view of a run started by this process.
#[derive(Clone)]
pub struct RunHandle {
    run_id: String,
    status_rx: watch::Receiver<RunStatus>,
    command_tx: mpsc::Sender<Command>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Current status, non-blocking.
    pub fn status(&self) -> RunStatus {
        *self.status_rx.borrow()
    }

    /// Block until the run reaches a terminal status.
    pub async fn wait(&self) -> RunStatus {
        let mut rx = self.status_rx.clone();
        loop {
            let status = *rx.borrow();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    /// Request cooperative cancellation.
    pub async fn cancel(&self, reason: Option<String>) {
        let _ = self.command_tx.send(Command::Cancel { reason }).await;
    }
}

/// The workflow execution engine.
pub struct WorkflowEngine {
    runner: Arc<dyn NodeRunner>,
    repository: Arc<dyn ExecutionRepository>,
    context: Arc<RuntimeContext>,
    runs: DashMap<String, RunHandle>,
}

impl WorkflowEngine {
    pub fn new(runner: Arc<dyn NodeRunner>, repository: Arc<dyn ExecutionRepository>) -> Self {
        WorkflowEngine {
            runner,
            repository,
            context: Arc::new(RuntimeContext::default()),
            runs: DashMap::new(),
        }
    }

    pub fn with_context(mut self, context: Arc<RuntimeContext>) -> Self {
        self.context = context;
        self
    }

    pub fn repository(&self) -> Arc<dyn ExecutionRepository> {
        self.repository.clone()
    }

    /// Validate the graph, persist a pending run record and spawn its
    /// scheduler. Returns the new run id; malformed graphs and oversized
    /// initial variables are rejected before anything is scheduled.
    pub async fn start_run(
        &self,
        spec: GraphSpec,
        initial_variables: HashMap<String, Value>,
        limits: ExecutionLimits,
    ) -> WorkflowResult<String> {
        let graph = Graph::build(spec)?;

        let mut pool = VariablePool::new(limits.max_variable_bytes);
        let start_id = graph.start_node_id().to_string();
        for (name, value) in initial_variables {
            pool.set(ScopeId::ROOT, &Selector::new(start_id.clone(), name), value)?;
        }

        let run_id = self.context.id_generator.next_id();
        let run = RunRecord::new(
            run_id.clone(),
            record_time(self.context.time_provider.now_timestamp()),
        );
        self.repository.create_run(&run).await?;

        let (status_tx, status_rx) = watch::channel(RunStatus::Pending);
        let (command_tx, command_rx) = mpsc::channel(8);

        let scheduler = ExecutionScheduler::new(SchedulerParams {
            graph: Arc::new(graph),
            runner: self.runner.clone(),
            repository: self.repository.clone(),
            limits,
            context: self.context.clone(),
            run,
            pool,
            call_context: CallContext::default(),
            status_tx,
            command_rx,
            external_cancel: CancellationToken::new(),
        });

        let handle = RunHandle {
            run_id: run_id.clone(),
            status_rx,
            command_tx,
        };
        self.runs.insert(run_id.clone(), handle);

        tokio::spawn(async move {
            let finished = scheduler.run().await;
            tracing::debug!(run_id = %finished.id, status = %finished.status, "run finished");
        });

        Ok(run_id)
    }

    /// Cancel a run. Live runs are cancelled cooperatively; a non-terminal
    /// run with no in-memory scheduler (crashed host) is marked `stopped`.
    pub async fn cancel_run(&self, run_id: &str) -> WorkflowResult<()> {
        let live = self.runs.get(run_id).map(|h| h.clone());
        if let Some(handle) = live {
            let _ = handle.command_tx.send(Command::Cancel { reason: None }).await;
            return Ok(());
        }
        match self.mark_stranded_stopped(run_id).await? {
            true => Ok(()),
            false => Err(WorkflowError::RunAlreadyTerminal(run_id.to_string())),
        }
    }

    /// Durable run status, queryable across process restarts.
    pub async fn run_status(&self, run_id: &str) -> WorkflowResult<RunRecord> {
        self.repository
            .get_run(run_id)
            .await?
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.to_string()))
    }

    /// Full node-execution history of a run, ordered by sequence.
    pub async fn list_node_executions(
        &self,
        run_id: &str,
    ) -> WorkflowResult<Vec<NodeExecutionRecord>> {
        Ok(self.repository.list_node_executions(run_id).await?)
    }

    /// Recover a run left over from a crashed host: a persisted non-terminal
    /// run with no live scheduler surfaces as `stopped`, never silently
    /// resumed. Returns whether the record was transitioned.
    pub async fn recover_run(&self, run_id: &str) -> WorkflowResult<bool> {
        if self.runs.contains_key(run_id) {
            return Ok(false);
        }
        self.mark_stranded_stopped(run_id).await
    }

    async fn mark_stranded_stopped(&self, run_id: &str) -> WorkflowResult<bool> {
        let mut run = self.run_status(run_id).await?;
        if run.status.is_terminal() {
            return Ok(false);
        }
        run.status = RunStatus::Stopped;
        run.error = Some("in-memory scheduling state lost".to_string());
        run.finished_at = Some(record_time(self.context.time_provider.now_timestamp()));
        self.repository.update_run(&run).await?;
        tracing::warn!(run_id = %run_id, "stranded run marked stopped");
        Ok(true)
    }

    /// Live handle for a run started by this process, if any.
    pub fn run_handle(&self, run_id: &str) -> Option<RunHandle> {
        self.runs.get(run_id).map(|h| h.clone())
    }
}
