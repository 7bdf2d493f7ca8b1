//! Bounded concurrency primitive for node-run tasks.
//!
//! Submissions are capped at a configured ceiling; `try_submit` refuses work
//! beyond it, which is the engine's sole backpressure mechanism against
//! unbounded fan-out. Each task wraps exactly one NodeRunner invocation plus
//! a child cancellation token, yields exactly one completion through
//! [`join_next`](WorkerPool::join_next), and is never started once its token
//! was cancelled beforehand.

use std::collections::HashMap;

use futures::future::BoxFuture;
use tokio::task::{AbortHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::core::node_runner::NodeOutput;
use crate::error::{NodeError, NodeResult, WorkflowError, WorkflowResult};

/// A deferred node-run task: handed its cancellation token at spawn time.
/// Boxed so runner invocations and nested sub-workflow runs share one type.
pub type NodeTask =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, NodeResult<NodeOutput>> + Send>;

/// Completion of one submitted task.
#[derive(Debug)]
pub struct TaskOutcome {
    pub execution_id: String,
    pub node_id: String,
    pub result: NodeResult<NodeOutput>,
}

/// Bounded pool executing node-run tasks on the tokio runtime.
pub struct WorkerPool {
    max_submit_count: usize,
    join_set: JoinSet<TaskOutcome>,
    running: HashMap<String, AbortHandle>,
    cancel_root: CancellationToken,
}

impl WorkerPool {
    pub fn new(max_submit_count: usize) -> Self {
        WorkerPool {
            max_submit_count: max_submit_count.max(1),
            join_set: JoinSet::new(),
            running: HashMap::new(),
            cancel_root: CancellationToken::new(),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.join_set.len()
    }

    pub fn is_idle(&self) -> bool {
        self.join_set.is_empty()
    }

    pub fn has_capacity(&self) -> bool {
        self.join_set.len() < self.max_submit_count
    }

    /// Submit one node-run task. Returns [`WorkflowError::PoolSaturated`]
    /// when outstanding submissions are at the ceiling; the caller re-queues
    /// and retries after draining a completion.
    pub fn try_submit<F>(
        &mut self,
        execution_id: &str,
        node_id: &str,
        task: F,
    ) -> WorkflowResult<()>
    where
        F: FnOnce(CancellationToken) -> BoxFuture<'static, NodeResult<NodeOutput>>,
    {
        if !self.has_capacity() {
            return Err(WorkflowError::PoolSaturated {
                outstanding: self.join_set.len(),
                limit: self.max_submit_count,
            });
        }

        let token = self.cancel_root.child_token();
        let execution_id = execution_id.to_string();
        let node_id = node_id.to_string();
        let fut = task(token.clone());

        let outcome_execution_id = execution_id.clone();
        let abort_handle = self.join_set.spawn(async move {
            let result = if token.is_cancelled() {
                // Cancelled before start: the runner invocation is skipped.
                Err(NodeError::Cancelled)
            } else {
                fut.await
            };
            TaskOutcome {
                execution_id: outcome_execution_id,
                node_id,
                result,
            }
        });
        self.running.insert(execution_id, abort_handle);
        Ok(())
    }

    /// Wait for the next completion. Each submitted task is yielded exactly
    /// once; aborted tasks surface as [`NodeError::Cancelled`].
    pub async fn join_next(&mut self) -> Option<TaskOutcome> {
        loop {
            let joined = self.join_set.join_next().await?;
            match joined {
                Ok(outcome) => {
                    self.running.remove(&outcome.execution_id);
                    return Some(outcome);
                }
                Err(join_error) if join_error.is_cancelled() => continue,
                Err(join_error) => {
                    tracing::error!(error = %join_error, "node task panicked");
                    continue;
                }
            }
        }
    }

    /// Cooperative cancellation: running tasks may finish their current node
    /// execution, queued-but-unstarted ones will never invoke the runner.
    pub fn cancel_all(&self) {
        self.cancel_root.cancel();
    }

    /// Hard abort of a single task by execution id.
    pub fn abort(&mut self, execution_id: &str) {
        if let Some(handle) = self.running.remove(execution_id) {
            handle.abort();
        }
    }
}
