//! # graphrun — a graph-based workflow execution engine
//!
//! `graphrun` runs user-authored directed graphs of computation nodes under
//! strict resource, depth, and time limits, durably recording per-node
//! execution state through a storage-agnostic repository abstraction.
//!
//! - **Graph model**: validated, immutable DAGs with branch-labeled edges and
//!   a single designated start node.
//! - **Limit enforcement**: step count, wall-clock time, sub-workflow call
//!   depth, parallel-branch depth, per-variable size, and a bounded worker
//!   pool, mirroring the host platform's environment knobs.
//! - **Pluggable persistence**: one repository capability set, two variants
//!   (`rdbms` and `hybrid`), selected at construction time.
//! - **Two-level failure model**: node failures are recorded per execution
//!   and only fail the run when the terminal node becomes unreachable.
//!
//! Concrete node implementations stay outside the engine behind the
//! [`NodeRunner`] trait; storage drivers stay behind the
//! [`RelationalStore`](repository::RelationalStore) and
//! [`ObjectStore`](repository::ObjectStore) seams.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use graphrun::repository::{build_repository, MemoryObjectStore, MemoryRelationalStore};
//! use graphrun::{ExecutionLimits, GraphSpec, StorageMode, WorkflowEngine};
//!
//! # async fn example(runner: Arc<dyn graphrun::NodeRunner>, spec: GraphSpec) {
//! let repository = build_repository(
//!     StorageMode::Rdbms,
//!     Arc::new(MemoryRelationalStore::new()),
//!     Arc::new(MemoryObjectStore::new()),
//! );
//! let engine = WorkflowEngine::new(runner, repository);
//! let run_id = engine
//!     .start_run(spec, HashMap::new(), ExecutionLimits::from_env())
//!     .await
//!     .unwrap();
//! let status = engine.run_handle(&run_id).unwrap().wait().await;
//! println!("{status}");
//! # }
//! ```

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod graph;
pub mod repository;

pub use crate::core::{
    LimitEnforcer, LimitReason, NodeInvocation, NodeOutput, NodeRunner, RuntimeContext, ScopeId,
    Selector, VariablePool, WorkerPool,
};
pub use config::{ErrorHandlingMode, ExecutionLimits, StorageMode};
pub use engine::{RunHandle, WorkflowEngine};
pub use error::{NodeError, NodeResult, WorkflowError, WorkflowResult};
pub use graph::{EdgeSpec, Graph, GraphSpec, NodeSpec};
pub use repository::{
    build_repository, ExecutionRepository, NodeExecutionRecord, NodeExecutionStatus,
    RepositoryError, RunRecord, RunStatus,
};
