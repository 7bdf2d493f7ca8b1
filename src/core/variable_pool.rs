//! Scoped variable pool shared by the node executions of one run.
//!
//! Variables are addressed by a two-part [`Selector`] `(node_id, name)`.
//! Scopes nest: a child scope (parallel branch, sub-workflow) reads through to
//! its parent, while writes stay local until the scheduler closes the scope
//! and merges them upward. Across parallel branches the merge is
//! last-writer-wins per selector, in branch completion order.

use std::collections::HashMap;

use compact_str::CompactString;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{NodeError, NodeResult};

/// A two-part variable address: `(node_id, variable_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    node_id: String,
    variable_name: String,
}

impl Selector {
    pub fn new(node_id: impl Into<String>, variable_name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            variable_name: variable_name.into(),
        }
    }

    /// Parse `"node.var"` into a selector.
    pub fn parse_str(selector: &str) -> Option<Self> {
        let (node_id, variable_name) = selector.split_once('.')?;
        if node_id.is_empty() || variable_name.is_empty() {
            return None;
        }
        Some(Self::new(node_id, variable_name))
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn variable_name(&self) -> &str {
        &self.variable_name
    }

    pub(crate) fn pool_key(&self) -> CompactString {
        let mut key = CompactString::with_capacity(self.node_id.len() + 1 + self.variable_name.len());
        key.push_str(&self.node_id);
        key.push(':');
        key.push_str(&self.variable_name);
        key
    }
}

impl Serialize for Selector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        [self.node_id.as_str(), self.variable_name.as_str()].serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let parts = Vec::<String>::deserialize(deserializer)?;
        match parts.as_slice() {
            [node_id, variable_name] if !node_id.is_empty() && !variable_name.is_empty() => {
                Ok(Selector::new(node_id.clone(), variable_name.clone()))
            }
            _ => Err(serde::de::Error::custom(
                "selector must be a [node_id, variable_name] pair",
            )),
        }
    }
}

/// Handle to a scope frame inside a [`VariablePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(usize);

impl ScopeId {
    pub const ROOT: ScopeId = ScopeId(0);
}

#[derive(Debug, Clone, Default)]
struct ScopeFrame {
    parent: Option<ScopeId>,
    variables: HashMap<CompactString, Value>,
    open: bool,
}

/// Runtime values produced and consumed by nodes, with a per-variable
/// serialized-size ceiling.
#[derive(Debug, Clone)]
pub struct VariablePool {
    frames: Vec<ScopeFrame>,
    max_variable_bytes: usize,
}

impl VariablePool {
    pub fn new(max_variable_bytes: usize) -> Self {
        VariablePool {
            frames: vec![ScopeFrame {
                parent: None,
                variables: HashMap::new(),
                open: true,
            }],
            max_variable_bytes,
        }
    }

    pub fn max_variable_bytes(&self) -> usize {
        self.max_variable_bytes
    }

    /// Open a child scope under `parent`.
    pub fn open_scope(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.frames.len());
        self.frames.push(ScopeFrame {
            parent: Some(parent),
            variables: HashMap::new(),
            open: true,
        });
        id
    }

    /// Close a scope, merging its local writes into the parent frame.
    /// Per-selector the child value overwrites the parent's: with multiple
    /// sibling scopes the caller's close order decides the winner.
    pub fn close_scope(&mut self, scope: ScopeId) {
        if scope == ScopeId::ROOT || !self.frames[scope.0].open {
            return;
        }
        let frame = std::mem::take(&mut self.frames[scope.0]);
        let parent = frame.parent.unwrap_or(ScopeId::ROOT);
        self.frames[parent.0].variables.extend(frame.variables);
    }

    /// Drop a scope without merging; its local writes are lost.
    pub fn discard_scope(&mut self, scope: ScopeId) {
        if scope != ScopeId::ROOT {
            self.frames[scope.0] = ScopeFrame::default();
        }
    }

    /// Set a variable in `scope`. Fails with [`NodeError::VariableTooLarge`]
    /// when the serialized size exceeds the ceiling; the value is not stored.
    pub fn set(&mut self, scope: ScopeId, selector: &Selector, value: Value) -> NodeResult<()> {
        let size = serialized_size(&value)?;
        if size > self.max_variable_bytes {
            return Err(NodeError::VariableTooLarge {
                name: format!("{}.{}", selector.node_id(), selector.variable_name()),
                size,
                limit: self.max_variable_bytes,
            });
        }
        self.frames[scope.0]
            .variables
            .insert(selector.pool_key(), value);
        Ok(())
    }

    /// Set all outputs of a node in one pass. Stops at the first oversized
    /// value; earlier entries of the same batch remain visible.
    pub fn set_node_outputs(
        &mut self,
        scope: ScopeId,
        node_id: &str,
        outputs: &HashMap<String, Value>,
    ) -> NodeResult<()> {
        for (name, value) in outputs {
            let selector = Selector::new(node_id, name.clone());
            self.set(scope, &selector, value.clone())?;
        }
        Ok(())
    }

    /// Read a variable, walking up the scope chain.
    pub fn get(&self, scope: ScopeId, selector: &Selector) -> Option<&Value> {
        let key = selector.pool_key();
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            let frame = &self.frames[id.0];
            if let Some(value) = frame.variables.get(&key) {
                return Some(value);
            }
            cursor = frame.parent;
        }
        None
    }

    pub fn has(&self, scope: ScopeId, selector: &Selector) -> bool {
        self.get(scope, selector).is_some()
    }

    /// Immutable flattened view of everything visible from `scope`; used to
    /// fix a node's inputs at dispatch time.
    pub fn snapshot(&self, scope: ScopeId) -> VariableSnapshot {
        let mut chain = Vec::new();
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            chain.push(id);
            cursor = self.frames[id.0].parent;
        }

        let mut variables = HashMap::new();
        for id in chain.into_iter().rev() {
            for (key, value) in &self.frames[id.0].variables {
                variables.insert(key.clone(), value.clone());
            }
        }
        VariableSnapshot { variables }
    }
}

/// Immutable copy of the variables visible from one scope.
#[derive(Debug, Clone, Default)]
pub struct VariableSnapshot {
    variables: HashMap<CompactString, Value>,
}

impl VariableSnapshot {
    pub fn get(&self, selector: &Selector) -> Option<&Value> {
        self.variables.get(&selector.pool_key())
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

fn serialized_size(value: &Value) -> NodeResult<usize> {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len())
        .map_err(|e| NodeError::SerializationError(e.to_string()))
}
