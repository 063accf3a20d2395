use super::{ExecutionId, ExecutionTree};
use crate::error::PvmError;
use crate::events::RuntimeEvent;
use serde_json::Value;
use std::collections::BTreeMap;

/// Variables visible from an execution, keyed by name.
pub type Variables = BTreeMap<String, Value>;

// Lookups walk the parent chain; a variable lives in the outermost
// execution that declared it. Unknown executions read as empty.
impl ExecutionTree {
    pub fn get_variable(&self, id: ExecutionId, name: &str) -> Option<Value> {
        let mut current = Some(id);
        while let Some(cid) = current {
            let node = self.nodes.get(&cid)?;
            if let Some(value) = node.variables.get(name) {
                return Some(value.clone());
            }
            current = node.parent;
        }
        None
    }

    pub fn has_variable(&self, id: ExecutionId, name: &str) -> bool {
        self.get_variable(id, name).is_some()
    }

    pub fn get_variable_local(&self, id: ExecutionId, name: &str) -> Option<Value> {
        self.nodes.get(&id)?.variables.get(name).cloned()
    }

    /// All visible variables; inner declarations shadow outer ones.
    pub fn get_variables(&self, id: ExecutionId) -> Variables {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(cid) = current {
            let Some(node) = self.nodes.get(&cid) else {
                break;
            };
            chain.push(node);
            current = node.parent;
        }
        let mut variables = Variables::new();
        for node in chain.into_iter().rev() {
            variables.extend(node.variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        variables
    }

    /// Update the execution that owns `name`, or create it on the root of
    /// the chain when nobody does.
    pub fn set_variable(&mut self, id: ExecutionId, name: &str, value: Value) -> Result<(), PvmError> {
        let mut owner = id;
        loop {
            let node = self.node(owner)?;
            if node.variables.contains_key(name) {
                break;
            }
            match node.parent {
                Some(parent) => owner = parent,
                None => break,
            }
        }
        self.set_variable_local(owner, name, value)
    }

    pub fn set_variable_local(&mut self, id: ExecutionId, name: &str, value: Value) -> Result<(), PvmError> {
        self.node_mut(id)?.variables.insert(name.to_string(), value);
        self.record(
            id,
            RuntimeEvent::VariableSet {
                execution: id.as_uuid(),
                name: name.to_string(),
            },
        );
        Ok(())
    }

    pub fn set_variables(&mut self, id: ExecutionId, variables: Variables) -> Result<(), PvmError> {
        for (name, value) in variables {
            self.set_variable(id, &name, value)?;
        }
        Ok(())
    }

    pub fn remove_variable_local(&mut self, id: ExecutionId, name: &str) -> Result<Option<Value>, PvmError> {
        Ok(self.node_mut(id)?.variables.remove(name))
    }
}
