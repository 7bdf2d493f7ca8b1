//! Durable execution-state storage.
//!
//! One capability set ([`ExecutionRepository`]), two variants selected at
//! construction time via [`StorageMode`]: direct-to-relational
//! ([`RdbmsExecutionRepository`]) and hybrid write-through to object storage
//! with a relational index ([`HybridExecutionRepository`]). The storage
//! drivers themselves are external collaborators behind the
//! [`RelationalStore`] and [`ObjectStore`] seams.

pub mod backend;
pub mod hybrid;
pub mod rdbms;
pub mod records;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StorageMode;

pub use backend::{FileObjectStore, MemoryObjectStore, MemoryRelationalStore, ObjectStore, RelationalStore};
pub use hybrid::HybridExecutionRepository;
pub use rdbms::RdbmsExecutionRepository;
pub use records::{NodeExecutionRecord, NodeExecutionStatus, RunRecord, RunStatus};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Record corrupted: {0}")]
    Corrupted(String),
}

/// Durable record of a workflow run and of each node's execution.
///
/// `update_node_execution` must be idempotent under retried delivery:
/// re-applying an already-applied terminal state leaves the stored record
/// unchanged.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn create_run(&self, run: &RunRecord) -> Result<(), RepositoryError>;
    async fn update_run(&self, run: &RunRecord) -> Result<(), RepositoryError>;
    async fn create_node_execution(
        &self,
        execution: &NodeExecutionRecord,
    ) -> Result<(), RepositoryError>;
    async fn update_node_execution(
        &self,
        execution: &NodeExecutionRecord,
    ) -> Result<(), RepositoryError>;
    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, RepositoryError>;
    /// Node executions of a run, ordered by sequence index.
    async fn list_node_executions(
        &self,
        run_id: &str,
    ) -> Result<Vec<NodeExecutionRecord>, RepositoryError>;
}

/// Construct the repository variant selected by `mode`.
pub fn build_repository(
    mode: StorageMode,
    relational: Arc<dyn RelationalStore>,
    objects: Arc<dyn ObjectStore>,
) -> Arc<dyn ExecutionRepository> {
    match mode {
        StorageMode::Rdbms => Arc::new(RdbmsExecutionRepository::new(relational)),
        StorageMode::Hybrid => Arc::new(HybridExecutionRepository::new(relational, objects)),
    }
}
