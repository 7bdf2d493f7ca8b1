pub mod context;
pub mod limits;
pub mod node_runner;
pub mod scheduler;
pub mod variable_pool;
pub mod worker_pool;

pub use context::{
    BranchContext, CallContext, CallFrame, FakeIdGenerator, FakeTimeProvider, IdGenerator,
    RealIdGenerator, RealTimeProvider, RuntimeContext, TimeProvider,
};
pub use limits::{LimitEnforcer, LimitReason};
pub use node_runner::{NodeInvocation, NodeOutput, NodeRunner};
pub use scheduler::{Command, ExecutionScheduler};
pub use variable_pool::{ScopeId, Selector, VariablePool, VariableSnapshot};
pub use worker_pool::{NodeTask, TaskOutcome, WorkerPool};
