//! Engine limit configuration.
//!
//! Every field mirrors one of the host platform's documented environment
//! knobs; [`ExecutionLimits::from_env`] reads them with the platform defaults.

use serde::{Deserialize, Serialize};

/// Storage mode selector for the execution repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Every record lives in the relational store.
    #[default]
    Rdbms,
    /// Records are written through to object storage with a slim relational
    /// index row; reads merge both.
    Hybrid,
}

impl StorageMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rdbms" => Some(StorageMode::Rdbms),
            "hybrid" => Some(StorageMode::Hybrid),
            _ => None,
        }
    }
}

/// How the scheduler reacts to a node failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorHandlingMode {
    /// Branches with no data dependency on the failed node keep running; the
    /// run fails only if the terminal node becomes unreachable.
    #[default]
    ContinueOnFailure,
    /// First node failure cancels the run.
    FailFast,
}

/// Resource ceilings for a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Maximum node completions before the run halts with `exceeded-limit`.
    pub max_steps: i64,
    /// Wall-clock ceiling in seconds.
    pub max_execution_time_secs: u64,
    /// Maximum sub-workflow nesting depth.
    pub max_call_depth: usize,
    /// Maximum nesting of concurrently open parallel branches. The root
    /// execution lane counts as one, so `1` forces fully sequential dispatch.
    pub max_parallel_depth: usize,
    /// Maximum serialized size of a single variable, in bytes.
    pub max_variable_bytes: usize,
    /// Maximum outstanding worker-pool submissions.
    pub max_submit_count: usize,
    /// Which execution repository variant to construct.
    pub storage_mode: StorageMode,
    /// Node-failure policy; not an environment knob.
    #[serde(default)]
    pub error_mode: ErrorHandlingMode,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        ExecutionLimits {
            max_steps: 500,
            max_execution_time_secs: 1200,
            max_call_depth: 5,
            max_parallel_depth: 3,
            max_variable_bytes: 200 * 1024,
            max_submit_count: 100,
            storage_mode: StorageMode::Rdbms,
            error_mode: ErrorHandlingMode::ContinueOnFailure,
        }
    }
}

impl ExecutionLimits {
    /// Load limits from the documented environment variables, falling back to
    /// the defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut limits = ExecutionLimits::default();
        read_env("WORKFLOW_MAX_EXECUTION_STEPS", &mut limits.max_steps);
        read_env(
            "WORKFLOW_MAX_EXECUTION_TIME",
            &mut limits.max_execution_time_secs,
        );
        read_env("WORKFLOW_CALL_MAX_DEPTH", &mut limits.max_call_depth);
        read_env(
            "WORKFLOW_PARALLEL_DEPTH_LIMIT",
            &mut limits.max_parallel_depth,
        );
        read_env("MAX_VARIABLE_SIZE", &mut limits.max_variable_bytes);
        read_env("MAX_SUBMIT_COUNT", &mut limits.max_submit_count);

        if let Ok(raw) = std::env::var("WORKFLOW_NODE_EXECUTION_STORAGE") {
            match StorageMode::parse(&raw) {
                Some(mode) => limits.storage_mode = mode,
                None => {
                    tracing::warn!(value = %raw, "unknown storage mode, keeping default");
                }
            }
        }

        limits
    }
}

fn read_env<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "unparseable limit value, keeping default");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.max_steps, 500);
        assert_eq!(limits.max_execution_time_secs, 1200);
        assert_eq!(limits.max_call_depth, 5);
        assert_eq!(limits.max_parallel_depth, 3);
        assert_eq!(limits.max_submit_count, 100);
        assert_eq!(limits.storage_mode, StorageMode::Rdbms);
    }

    #[test]
    fn test_storage_mode_parse() {
        assert_eq!(StorageMode::parse("rdbms"), Some(StorageMode::Rdbms));
        assert_eq!(StorageMode::parse(" Hybrid "), Some(StorageMode::Hybrid));
        assert_eq!(StorageMode::parse("s3"), None);
    }

    #[test]
    fn test_limits_roundtrip() {
        let limits = ExecutionLimits {
            max_steps: 10,
            storage_mode: StorageMode::Hybrid,
            ..Default::default()
        };
        let json = serde_json::to_string(&limits).unwrap();
        let back: ExecutionLimits = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_steps, 10);
        assert_eq!(back.storage_mode, StorageMode::Hybrid);
    }
}
