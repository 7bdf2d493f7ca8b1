//! Direct-to-relational repository variant: every write is a single row
//! update against the relational seam, reads are direct queries.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::backend::RelationalStore;
use super::records::{NodeExecutionRecord, RunRecord};
use super::{ExecutionRepository, RepositoryError};

const RUNS_TABLE: &str = "workflow_runs";
const EXECUTIONS_TABLE: &str = "workflow_node_executions";

pub struct RdbmsExecutionRepository {
    store: Arc<dyn RelationalStore>,
}

impl RdbmsExecutionRepository {
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }
}

fn to_row<T: serde::Serialize>(record: &T) -> Result<Value, RepositoryError> {
    serde_json::to_value(record).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

fn from_row<T: serde::de::DeserializeOwned>(row: Value) -> Result<T, RepositoryError> {
    serde_json::from_value(row).map_err(|e| RepositoryError::Corrupted(e.to_string()))
}

/// Whether an incoming update may overwrite the stored execution row.
///
/// Terminal rows are immutable: re-delivery of the same terminal state is a
/// no-op, a conflicting one is dropped with a warning. Both leave the stored
/// record intact, which is what makes retried delivery idempotent.
pub(super) fn should_apply_update(
    stored: &NodeExecutionRecord,
    incoming: &NodeExecutionRecord,
) -> bool {
    if !stored.status.is_terminal() {
        return true;
    }
    if stored.status != incoming.status {
        tracing::warn!(
            run_id = %incoming.run_id,
            node_id = %incoming.node_id,
            stored = ?stored.status,
            incoming = ?incoming.status,
            "dropping conflicting update to terminal node execution"
        );
    }
    false
}

#[async_trait]
impl ExecutionRepository for RdbmsExecutionRepository {
    async fn create_run(&self, run: &RunRecord) -> Result<(), RepositoryError> {
        self.store.put(RUNS_TABLE, &run.id, to_row(run)?).await
    }

    async fn update_run(&self, run: &RunRecord) -> Result<(), RepositoryError> {
        self.store.put(RUNS_TABLE, &run.id, to_row(run)?).await
    }

    async fn create_node_execution(
        &self,
        execution: &NodeExecutionRecord,
    ) -> Result<(), RepositoryError> {
        let key = NodeExecutionRecord::storage_key(
            &execution.run_id,
            execution.sequence,
            &execution.execution_id,
        );
        self.store.put(EXECUTIONS_TABLE, &key, to_row(execution)?).await
    }

    async fn update_node_execution(
        &self,
        execution: &NodeExecutionRecord,
    ) -> Result<(), RepositoryError> {
        let key = NodeExecutionRecord::storage_key(
            &execution.run_id,
            execution.sequence,
            &execution.execution_id,
        );
        if let Some(row) = self.store.get(EXECUTIONS_TABLE, &key).await? {
            let stored: NodeExecutionRecord = from_row(row)?;
            if !should_apply_update(&stored, execution) {
                return Ok(());
            }
        }
        self.store.put(EXECUTIONS_TABLE, &key, to_row(execution)?).await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, RepositoryError> {
        match self.store.get(RUNS_TABLE, run_id).await? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    }

    async fn list_node_executions(
        &self,
        run_id: &str,
    ) -> Result<Vec<NodeExecutionRecord>, RepositoryError> {
        let prefix = format!("{}/", run_id);
        let rows = self.store.scan_prefix(EXECUTIONS_TABLE, &prefix).await?;
        rows.into_iter().map(|(_, row)| from_row(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::backend::MemoryRelationalStore;
    use crate::repository::records::{record_time, NodeExecutionStatus, RunStatus};

    fn repo() -> RdbmsExecutionRepository {
        RdbmsExecutionRepository::new(Arc::new(MemoryRelationalStore::new()))
    }

    fn execution(run_id: &str, node_id: &str, sequence: u64) -> NodeExecutionRecord {
        NodeExecutionRecord::queued(run_id, node_id, format!("exec-{}", sequence), sequence, Default::default())
    }

    #[tokio::test]
    async fn test_run_roundtrip() {
        let repo = repo();
        let mut run = RunRecord::new("run-1", record_time(1_700_000_000));
        repo.create_run(&run).await.unwrap();

        run.status = RunStatus::Running;
        repo.update_run(&run).await.unwrap();

        let loaded = repo.get_run("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert!(repo.get_run("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_ordered_by_sequence() {
        let repo = repo();
        for sequence in [3u64, 1, 2] {
            repo.create_node_execution(&execution("run-1", &format!("n{}", sequence), sequence))
                .await
                .unwrap();
        }
        repo.create_node_execution(&execution("run-2", "x", 1)).await.unwrap();

        let listed = repo.list_node_executions("run-1").await.unwrap();
        let sequences: Vec<u64> = listed.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_terminal_update_is_idempotent() {
        let repo = repo();
        let mut exec = execution("run-1", "a", 1);
        repo.create_node_execution(&exec).await.unwrap();

        exec.status = NodeExecutionStatus::Succeeded;
        exec.outputs.insert("v".into(), serde_json::json!(1));
        repo.update_node_execution(&exec).await.unwrap();
        // Retried delivery of the same terminal state.
        repo.update_node_execution(&exec).await.unwrap();

        let listed = repo.list_node_executions("run-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, NodeExecutionStatus::Succeeded);
        assert_eq!(listed[0].outputs["v"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn test_conflicting_terminal_update_dropped() {
        let repo = repo();
        let mut exec = execution("run-1", "a", 1);
        repo.create_node_execution(&exec).await.unwrap();

        exec.status = NodeExecutionStatus::Succeeded;
        repo.update_node_execution(&exec).await.unwrap();

        let mut conflicting = exec.clone();
        conflicting.status = NodeExecutionStatus::Failed;
        conflicting.error = Some("late failure".into());
        repo.update_node_execution(&conflicting).await.unwrap();

        let listed = repo.list_node_executions("run-1").await.unwrap();
        assert_eq!(listed[0].status, NodeExecutionStatus::Succeeded);
        assert!(listed[0].error.is_none());
    }
}
