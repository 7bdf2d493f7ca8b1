//! Runtime context and the explicit depth-tracking stacks.
//!
//! Time and id generation sit behind traits so limit logic can be driven by a
//! fixed clock in tests. [`CallContext`] and [`BranchContext`] are plain
//! index-based stacks; depth ceilings are length comparisons and the state
//! serializes trivially.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Runtime context providing time and id generation.
#[derive(Clone)]
pub struct RuntimeContext {
    pub time_provider: Arc<dyn TimeProvider>,
    pub id_generator: Arc<dyn IdGenerator>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            time_provider: Arc::new(RealTimeProvider),
            id_generator: Arc::new(RealIdGenerator),
        }
    }
}

pub trait TimeProvider: Send + Sync {
    fn now_timestamp(&self) -> i64;
    fn elapsed_secs(&self, since: i64) -> u64;
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

// --- Real implementations ---

pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now_timestamp(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    fn elapsed_secs(&self, since: i64) -> u64 {
        let now = self.now_timestamp();
        if now >= since {
            (now - since) as u64
        } else {
            0
        }
    }
}

pub struct RealIdGenerator;

impl IdGenerator for RealIdGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

// --- Fake implementations ---

pub struct FakeTimeProvider {
    timestamp: std::sync::atomic::AtomicI64,
}

impl FakeTimeProvider {
    pub fn new(fixed_timestamp: i64) -> Self {
        Self {
            timestamp: std::sync::atomic::AtomicI64::new(fixed_timestamp),
        }
    }

    pub fn advance(&self, secs: i64) {
        self.timestamp.fetch_add(secs, Ordering::SeqCst);
    }
}

impl TimeProvider for FakeTimeProvider {
    fn now_timestamp(&self) -> i64 {
        self.timestamp.load(Ordering::SeqCst)
    }

    fn elapsed_secs(&self, since: i64) -> u64 {
        let now = self.now_timestamp();
        if now >= since {
            (now - since) as u64
        } else {
            0
        }
    }
}

pub struct FakeIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl FakeIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for FakeIdGenerator {
    fn next_id(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, id)
    }
}

// --- Depth stacks ---

/// One nested sub-workflow invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    pub parent_run_id: String,
    pub node_id: String,
}

/// Stack of nested sub-workflow invocations; its length is the call depth.
/// The root run has an empty stack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallContext {
    frames: Vec<CallFrame>,
}

impl CallContext {
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// Stack for a child run invoked from `node_id` of `parent_run_id`.
    pub fn child(&self, parent_run_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        let mut frames = self.frames.clone();
        frames.push(CallFrame {
            parent_run_id: parent_run_id.into(),
            node_id: node_id.into(),
        });
        CallContext { frames }
    }
}

#[derive(Debug, Clone)]
struct BranchGroup {
    id: u64,
    remaining: usize,
}

/// Stack of concurrently open parallel branch groups.
///
/// The root execution lane counts as the first open group, so depth starts at
/// one. A group closes when its immediate fan-out members have all completed.
#[derive(Debug, Clone)]
pub struct BranchContext {
    groups: Vec<BranchGroup>,
    next_id: u64,
}

impl Default for BranchContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BranchContext {
    pub fn new() -> Self {
        BranchContext {
            // Group 0 is the root lane; it never closes.
            groups: vec![BranchGroup {
                id: 0,
                remaining: usize::MAX,
            }],
            next_id: 1,
        }
    }

    /// Number of concurrently open branch groups, root lane included.
    pub fn depth(&self) -> usize {
        self.groups.len()
    }

    /// Open a group covering `members` concurrent branches; returns its id.
    pub fn open(&mut self, members: usize) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.groups.push(BranchGroup {
            id,
            remaining: members,
        });
        id
    }

    /// Record completion of one member of `group`; closes it at zero.
    pub fn complete_member(&mut self, group: u64) {
        if group == 0 {
            return;
        }
        if let Some(entry) = self.groups.iter_mut().find(|g| g.id == group) {
            entry.remaining = entry.remaining.saturating_sub(1);
        }
        self.groups.retain(|g| g.id == 0 || g.remaining > 0);
    }
}
