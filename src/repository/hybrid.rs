//! Hybrid repository variant.
//!
//! Node-execution writes go to an append-only object-storage record plus a
//! slim relational index row, keeping hot relational tables small for
//! high-volume executions while staying queryable. Reads merge the index with
//! object content: the index row is the source of truth for status and
//! timing, the object for payloads (inputs/outputs). When the object is not
//! yet visible the record is served from the index alone with empty payloads
//! (bounded staleness, no read repair). Run records are low-volume and stay
//! relational.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::backend::{ObjectStore, RelationalStore};
use super::rdbms::should_apply_update;
use super::records::{NodeExecutionRecord, NodeExecutionStatus, RunRecord};
use super::{ExecutionRepository, RepositoryError};

const RUNS_TABLE: &str = "workflow_runs";
const INDEX_TABLE: &str = "workflow_node_executions_idx";

/// Slim relational index row for one node execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExecutionIndexRow {
    run_id: String,
    node_id: String,
    execution_id: String,
    sequence: u64,
    status: NodeExecutionStatus,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl ExecutionIndexRow {
    fn from_record(record: &NodeExecutionRecord) -> Self {
        ExecutionIndexRow {
            run_id: record.run_id.clone(),
            node_id: record.node_id.clone(),
            execution_id: record.execution_id.clone(),
            sequence: record.sequence,
            status: record.status,
            error: record.error.clone(),
            started_at: record.started_at,
            finished_at: record.finished_at,
        }
    }

    fn into_record(self) -> NodeExecutionRecord {
        NodeExecutionRecord {
            run_id: self.run_id,
            node_id: self.node_id,
            execution_id: self.execution_id,
            sequence: self.sequence,
            status: self.status,
            inputs: Default::default(),
            outputs: Default::default(),
            error: self.error,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

pub struct HybridExecutionRepository {
    index: Arc<dyn RelationalStore>,
    objects: Arc<dyn ObjectStore>,
}

impl HybridExecutionRepository {
    pub fn new(index: Arc<dyn RelationalStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { index, objects }
    }

    fn object_key(record: &NodeExecutionRecord) -> String {
        format!(
            "runs/{}/executions/{:010}-{}.json",
            record.run_id, record.sequence, record.execution_id
        )
    }

    async fn write_execution(
        &self,
        execution: &NodeExecutionRecord,
    ) -> Result<(), RepositoryError> {
        let bytes = serde_json::to_vec(execution)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        self.objects.put(&Self::object_key(execution), bytes).await?;

        let index_key = NodeExecutionRecord::storage_key(
            &execution.run_id,
            execution.sequence,
            &execution.execution_id,
        );
        let row = serde_json::to_value(ExecutionIndexRow::from_record(execution))
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        self.index.put(INDEX_TABLE, &index_key, row).await
    }

    async fn merge_row(&self, row: ExecutionIndexRow) -> Result<NodeExecutionRecord, RepositoryError> {
        let slim = row.into_record();
        match self.objects.get(&Self::object_key(&slim)).await {
            Ok(Some(bytes)) => {
                let full: NodeExecutionRecord = serde_json::from_slice(&bytes)
                    .map_err(|e| RepositoryError::Corrupted(e.to_string()))?;
                // Index wins on status/timing, object wins on payloads.
                Ok(NodeExecutionRecord {
                    status: slim.status,
                    error: slim.error.clone().or(full.error),
                    started_at: slim.started_at,
                    finished_at: slim.finished_at,
                    ..full
                })
            }
            Ok(None) => Ok(slim),
            Err(e) => {
                tracing::warn!(error = %e, "object read failed, serving index-only record");
                Ok(slim)
            }
        }
    }
}

#[async_trait]
impl ExecutionRepository for HybridExecutionRepository {
    async fn create_run(&self, run: &RunRecord) -> Result<(), RepositoryError> {
        let row = serde_json::to_value(run)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        self.index.put(RUNS_TABLE, &run.id, row).await
    }

    async fn update_run(&self, run: &RunRecord) -> Result<(), RepositoryError> {
        let row = serde_json::to_value(run)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        self.index.put(RUNS_TABLE, &run.id, row).await
    }

    async fn create_node_execution(
        &self,
        execution: &NodeExecutionRecord,
    ) -> Result<(), RepositoryError> {
        self.write_execution(execution).await
    }

    async fn update_node_execution(
        &self,
        execution: &NodeExecutionRecord,
    ) -> Result<(), RepositoryError> {
        let index_key = NodeExecutionRecord::storage_key(
            &execution.run_id,
            execution.sequence,
            &execution.execution_id,
        );
        if let Some(row) = self.index.get(INDEX_TABLE, &index_key).await? {
            let stored: ExecutionIndexRow = serde_json::from_value(row)
                .map_err(|e| RepositoryError::Corrupted(e.to_string()))?;
            if !should_apply_update(&stored.into_record(), execution) {
                return Ok(());
            }
        }
        self.write_execution(execution).await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, RepositoryError> {
        match self.index.get(RUNS_TABLE, run_id).await? {
            Some(row) => Ok(Some(
                serde_json::from_value(row)
                    .map_err(|e| RepositoryError::Corrupted(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn list_node_executions(
        &self,
        run_id: &str,
    ) -> Result<Vec<NodeExecutionRecord>, RepositoryError> {
        let prefix = format!("{}/", run_id);
        let rows = self.index.scan_prefix(INDEX_TABLE, &prefix).await?;
        let mut executions = Vec::with_capacity(rows.len());
        for (_, row) in rows {
            let index_row: ExecutionIndexRow = serde_json::from_value(row)
                .map_err(|e| RepositoryError::Corrupted(e.to_string()))?;
            executions.push(self.merge_row(index_row).await?);
        }
        Ok(executions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::backend::{MemoryObjectStore, MemoryRelationalStore};
    use crate::repository::records::record_time;
    use serde_json::json;

    fn repo() -> (HybridExecutionRepository, Arc<MemoryObjectStore>) {
        let objects = Arc::new(MemoryObjectStore::new());
        let repo = HybridExecutionRepository::new(
            Arc::new(MemoryRelationalStore::new()),
            objects.clone(),
        );
        (repo, objects)
    }

    fn execution(sequence: u64) -> NodeExecutionRecord {
        let mut exec = NodeExecutionRecord::queued(
            "run-1",
            format!("n{}", sequence),
            format!("exec-{}", sequence),
            sequence,
            Default::default(),
        );
        exec.inputs.insert("in".into(), json!("payload"));
        exec
    }

    #[tokio::test]
    async fn test_merged_read_has_payloads() {
        let (repo, _) = repo();
        let mut exec = execution(1);
        repo.create_node_execution(&exec).await.unwrap();

        exec.status = NodeExecutionStatus::Succeeded;
        exec.outputs.insert("out".into(), json!(42));
        repo.update_node_execution(&exec).await.unwrap();

        let listed = repo.list_node_executions("run-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, NodeExecutionStatus::Succeeded);
        assert_eq!(listed[0].inputs["in"], json!("payload"));
        assert_eq!(listed[0].outputs["out"], json!(42));
    }

    #[tokio::test]
    async fn test_index_only_fallback_when_object_invisible() {
        let (repo, objects) = repo();
        let exec = execution(1);
        repo.create_node_execution(&exec).await.unwrap();

        // Simulate the eventual-visibility window: object vanished.
        objects.clear().await;

        let listed = repo.list_node_executions("run-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].node_id, "n1");
        assert_eq!(listed[0].status, NodeExecutionStatus::Queued);
        assert!(listed[0].inputs.is_empty());
    }

    #[tokio::test]
    async fn test_terminal_update_idempotent() {
        let (repo, _) = repo();
        let mut exec = execution(1);
        repo.create_node_execution(&exec).await.unwrap();

        exec.status = NodeExecutionStatus::Failed;
        exec.error = Some("boom".into());
        repo.update_node_execution(&exec).await.unwrap();
        repo.update_node_execution(&exec).await.unwrap();

        let mut conflicting = exec.clone();
        conflicting.status = NodeExecutionStatus::Succeeded;
        repo.update_node_execution(&conflicting).await.unwrap();

        let listed = repo.list_node_executions("run-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, NodeExecutionStatus::Failed);
        assert_eq!(listed[0].error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_run_records_stay_relational() {
        let (repo, objects) = repo();
        let run = RunRecord::new("run-1", record_time(1_700_000_000));
        repo.create_run(&run).await.unwrap();
        assert!(repo.get_run("run-1").await.unwrap().is_some());
        assert!(objects.is_empty().await);
    }
}
