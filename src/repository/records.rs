//! Persisted record layout: the durable state of a run.
//!
//! These records must remain queryable after a process restart; everything a
//! host needs to reconstruct in-flight run status lives here.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::limits::LimitReason;

/// Run lifecycle status. All terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Stopped,
    ExceededLimit,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Stopped => "stopped",
            RunStatus::ExceededLimit => "exceeded-limit",
        };
        write!(f, "{}", s)
    }
}

/// One execution of a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub status: RunStatus,
    /// Which ceiling halted the run, when status is `exceeded-limit`.
    pub limit_reason: Option<LimitReason>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps_executed: i64,
    pub call_depth: usize,
    pub parallel_depth: usize,
    /// Terminal-node outputs collected when the run succeeds.
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
}

impl RunRecord {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        RunRecord {
            id: id.into(),
            status: RunStatus::Pending,
            limit_reason: None,
            error: None,
            created_at,
            started_at: None,
            finished_at: None,
            steps_executed: 0,
            call_depth: 0,
            parallel_depth: 1,
            outputs: HashMap::new(),
        }
    }
}

/// Node execution lifecycle. `queued → running → {succeeded|failed|skipped}`;
/// the three terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeExecutionStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeExecutionStatus::Succeeded
                | NodeExecutionStatus::Failed
                | NodeExecutionStatus::Skipped
        )
    }
}

/// One execution of one node within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecutionRecord {
    pub run_id: String,
    pub node_id: String,
    pub execution_id: String,
    /// Dispatch order within the run; stable across identical re-runs.
    pub sequence: u64,
    pub status: NodeExecutionStatus,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeExecutionRecord {
    pub fn queued(
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        execution_id: impl Into<String>,
        sequence: u64,
        inputs: HashMap<String, Value>,
    ) -> Self {
        NodeExecutionRecord {
            run_id: run_id.into(),
            node_id: node_id.into(),
            execution_id: execution_id.into(),
            sequence,
            status: NodeExecutionStatus::Queued,
            inputs,
            outputs: HashMap::new(),
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Storage key ordering executions by sequence within a run.
    pub fn storage_key(run_id: &str, sequence: u64, execution_id: &str) -> String {
        format!("{}/{:010}/{}", run_id, sequence, execution_id)
    }
}

/// Convert a provider timestamp into the record timestamp type.
pub fn record_time(unix_secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(unix_secs, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde_kebab() {
        assert_eq!(
            serde_json::to_string(&RunStatus::ExceededLimit).unwrap(),
            "\"exceeded-limit\""
        );
        assert_eq!(
            serde_json::to_string(&NodeExecutionStatus::Succeeded).unwrap(),
            "\"succeeded\""
        );
        let status: RunStatus = serde_json::from_str("\"stopped\"").unwrap();
        assert_eq!(status, RunStatus::Stopped);
    }

    #[test]
    fn test_terminal_classification() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::ExceededLimit.is_terminal());

        assert!(!NodeExecutionStatus::Queued.is_terminal());
        assert!(!NodeExecutionStatus::Running.is_terminal());
        assert!(NodeExecutionStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_storage_key_orders_by_sequence() {
        let a = NodeExecutionRecord::storage_key("run", 2, "e2");
        let b = NodeExecutionRecord::storage_key("run", 10, "e10");
        assert!(a < b);
    }

    #[test]
    fn test_run_record_roundtrip() {
        let run = RunRecord::new("run-1", record_time(1_700_000_000));
        let json = serde_json::to_string(&run).unwrap();
        let back: RunRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "run-1");
        assert_eq!(back.status, RunStatus::Pending);
        assert_eq!(back.parallel_depth, 1);
    }
}
