//! Stateless limit policy checks.
//!
//! The enforcer never holds run state; the scheduler passes its counters in
//! before every dispatch and once per scheduling tick. Step and time ceilings
//! halt the run; the call-depth ceiling fails the dispatching node only; the
//! parallel-depth ceiling degrades fan-out to sequential dispatch instead of
//! failing anything.

use serde::{Deserialize, Serialize};

use crate::config::ExecutionLimits;

/// Why a run was halted with `exceeded-limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LimitReason {
    StepLimit,
    TimeLimit,
}

impl std::fmt::Display for LimitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitReason::StepLimit => write!(f, "step-limit"),
            LimitReason::TimeLimit => write!(f, "time-limit"),
        }
    }
}

/// Evaluates run counters against the configured ceilings.
#[derive(Debug, Clone)]
pub struct LimitEnforcer {
    limits: ExecutionLimits,
}

impl LimitEnforcer {
    pub fn new(limits: ExecutionLimits) -> Self {
        LimitEnforcer { limits }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Halt verdict for the run-level ceilings. Step limit is checked first
    /// so a run that trips both reports the step ceiling.
    pub fn halt_reason(
        &self,
        steps_executed: i64,
        started_at: i64,
        now: i64,
    ) -> Option<LimitReason> {
        if steps_executed >= self.limits.max_steps {
            return Some(LimitReason::StepLimit);
        }
        let elapsed = now.saturating_sub(started_at).max(0) as u64;
        if elapsed >= self.limits.max_execution_time_secs {
            return Some(LimitReason::TimeLimit);
        }
        None
    }

    /// Whether dispatching a sub-workflow node at `depth` open call frames
    /// would exceed the ceiling.
    pub fn call_depth_exceeded(&self, depth: usize) -> bool {
        depth >= self.limits.max_call_depth
    }

    /// Whether a new concurrent branch group may open on top of
    /// `open_branches` already-open ones. When this returns false the fan-out
    /// is queued sequentially rather than failed.
    pub fn allow_concurrent_branch(&self, open_branches: usize) -> bool {
        open_branches < self.limits.max_parallel_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enforcer(max_steps: i64, max_secs: u64) -> LimitEnforcer {
        LimitEnforcer::new(ExecutionLimits {
            max_steps,
            max_execution_time_secs: max_secs,
            ..Default::default()
        })
    }

    #[test]
    fn test_step_ceiling() {
        let enforcer = enforcer(3, 600);
        assert_eq!(enforcer.halt_reason(2, 0, 1), None);
        assert_eq!(enforcer.halt_reason(3, 0, 1), Some(LimitReason::StepLimit));
        assert_eq!(enforcer.halt_reason(4, 0, 1), Some(LimitReason::StepLimit));
    }

    #[test]
    fn test_time_ceiling() {
        let enforcer = enforcer(100, 10);
        assert_eq!(enforcer.halt_reason(0, 100, 105), None);
        assert_eq!(
            enforcer.halt_reason(0, 100, 110),
            Some(LimitReason::TimeLimit)
        );
    }

    #[test]
    fn test_step_limit_reported_before_time_limit() {
        let enforcer = enforcer(1, 1);
        assert_eq!(enforcer.halt_reason(1, 0, 50), Some(LimitReason::StepLimit));
    }

    #[test]
    fn test_call_depth() {
        let enforcer = LimitEnforcer::new(ExecutionLimits {
            max_call_depth: 2,
            ..Default::default()
        });
        assert!(!enforcer.call_depth_exceeded(0));
        assert!(!enforcer.call_depth_exceeded(1));
        assert!(enforcer.call_depth_exceeded(2));

        let zero = LimitEnforcer::new(ExecutionLimits {
            max_call_depth: 0,
            ..Default::default()
        });
        assert!(zero.call_depth_exceeded(0));
    }

    #[test]
    fn test_parallel_depth() {
        let enforcer = LimitEnforcer::new(ExecutionLimits {
            max_parallel_depth: 1,
            ..Default::default()
        });
        // The root lane is already open: no concurrent fan-out allowed.
        assert!(!enforcer.allow_concurrent_branch(1));

        let deeper = LimitEnforcer::new(ExecutionLimits {
            max_parallel_depth: 2,
            ..Default::default()
        });
        assert!(deeper.allow_concurrent_branch(1));
        assert!(!deeper.allow_concurrent_branch(2));
    }

    #[test]
    fn test_limit_reason_serde() {
        assert_eq!(
            serde_json::to_string(&LimitReason::StepLimit).unwrap(),
            "\"step-limit\""
        );
        assert_eq!(LimitReason::TimeLimit.to_string(), "time-limit");
    }
}
