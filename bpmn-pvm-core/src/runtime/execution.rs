//! Behavior-facing views of an execution.
//!
//! Behaviors, listeners and call activities never touch the
//! [`ExecutionTree`] directly. They get an [`ExecutionMut`] handle through
//! one of the capability traits below, scoped to the single execution the
//! operation runs on.

use super::{ExecutionId, ExecutionTree, Variables};
use crate::definition::{ActivityId, EventSource, ListenerEvent, ProcessDefinition, TransitionId};
use crate::error::PvmError;
use crate::events::RuntimeEvent;
use serde_json::Value;
use std::sync::Arc;

pub trait VariableScope {
    fn get_variable(&self, name: &str) -> Option<Value>;
    fn has_variable(&self, name: &str) -> bool;
    fn get_variable_local(&self, name: &str) -> Option<Value>;
    fn get_variables(&self) -> Variables;
    fn set_variable(&mut self, name: &str, value: Value) -> Result<(), PvmError>;
    fn set_variable_local(&mut self, name: &str, value: Value) -> Result<(), PvmError>;
}

/// What an execution listener may see and do.
pub trait EventListenerExecution: VariableScope {
    fn id(&self) -> ExecutionId;
    fn definition(&self) -> Arc<ProcessDefinition>;
    fn activity(&self) -> Option<ActivityId>;
    /// `start`, `end` or `take` while a listener runs.
    fn event_name(&self) -> Option<ListenerEvent>;
    fn event_source(&self) -> Option<EventSource>;
    fn process_instance(&self) -> ExecutionId;
    fn business_key(&self) -> Option<String>;
}

/// What an activity behavior may see and do.
pub trait ActivityExecution: VariableScope {
    fn id(&self) -> ExecutionId;
    fn definition(&self) -> Arc<ProcessDefinition>;
    fn activity(&self) -> Option<ActivityId>;
    fn parent(&self) -> Option<ExecutionId>;
    fn process_instance(&self) -> ExecutionId;

    fn is_active(&self) -> bool;
    fn is_scope(&self) -> bool;
    fn is_concurrent(&self) -> bool;
    fn is_ended(&self) -> bool;
    fn is_process_instance(&self) -> bool;

    fn set_active(&mut self, active: bool);

    fn inactivate(&mut self) {
        self.set_active(false);
    }

    fn create_execution(&mut self) -> Result<ExecutionId, PvmError>;
    fn take(&mut self, transition: TransitionId) -> Result<(), PvmError>;

    /// Leave via `transitions`, joining the `recyclable` executions.
    fn take_all(&mut self, transitions: &[TransitionId], recyclable: &[ExecutionId]) -> Result<(), PvmError>;
    fn execute_activity(&mut self, activity: ActivityId) -> Result<(), PvmError>;
    fn end(&mut self) -> Result<(), PvmError>;

    fn find_inactive_concurrent_executions(&self, activity: ActivityId) -> Result<Vec<ExecutionId>, PvmError>;

    /// Activities of the other active executions sharing this execution's concurrent root.
    fn active_concurrent_activities(&self) -> Result<Vec<ActivityId>, PvmError>;

    /// Latest deployed definition with the given key.
    fn resolve_definition(&self, key: &str) -> Result<Arc<ProcessDefinition>, PvmError>;
    fn create_sub_process_instance(&mut self, definition: Arc<ProcessDefinition>) -> Result<ExecutionId, PvmError>;

    /// Seed the sub process instance with `variables` and start it.
    fn start_sub_process_instance(&mut self, sub_instance: ExecutionId, variables: Variables) -> Result<(), PvmError>;

    /// Delete the whole process instance this execution belongs to.
    fn delete_process_instance(&mut self, reason: &str) -> Result<(), PvmError>;
    fn record_event(&mut self, event: RuntimeEvent);
}

/// Mutable handle on one execution of a tree.
pub struct ExecutionMut<'t> {
    tree: &'t mut ExecutionTree,
    id: ExecutionId,
    definition: Arc<ProcessDefinition>,
}

impl<'t> ExecutionMut<'t> {
    pub(crate) fn new(tree: &'t mut ExecutionTree, id: ExecutionId) -> Result<Self, PvmError> {
        let definition = tree.node(id)?.definition.clone();
        Ok(Self { tree, id, definition })
    }

    pub fn tree(&self) -> &ExecutionTree {
        &*self.tree
    }

    fn flag(&self, f: impl Fn(&super::ExecutionNode) -> bool) -> bool {
        self.tree.get(self.id).is_some_and(f)
    }
}

impl VariableScope for ExecutionMut<'_> {
    fn get_variable(&self, name: &str) -> Option<Value> {
        self.tree.get_variable(self.id, name)
    }

    fn has_variable(&self, name: &str) -> bool {
        self.tree.has_variable(self.id, name)
    }

    fn get_variable_local(&self, name: &str) -> Option<Value> {
        self.tree.get_variable_local(self.id, name)
    }

    fn get_variables(&self) -> Variables {
        self.tree.get_variables(self.id)
    }

    fn set_variable(&mut self, name: &str, value: Value) -> Result<(), PvmError> {
        self.tree.set_variable(self.id, name, value)
    }

    fn set_variable_local(&mut self, name: &str, value: Value) -> Result<(), PvmError> {
        self.tree.set_variable_local(self.id, name, value)
    }
}

impl EventListenerExecution for ExecutionMut<'_> {
    fn id(&self) -> ExecutionId {
        self.id
    }

    fn definition(&self) -> Arc<ProcessDefinition> {
        self.definition.clone()
    }

    fn activity(&self) -> Option<ActivityId> {
        self.tree.get(self.id).and_then(|n| n.activity)
    }

    fn event_name(&self) -> Option<ListenerEvent> {
        self.tree.get(self.id).and_then(|n| n.event).map(|(e, _)| e)
    }

    fn event_source(&self) -> Option<EventSource> {
        self.tree.get(self.id).and_then(|n| n.event).map(|(_, s)| s)
    }

    fn process_instance(&self) -> ExecutionId {
        self.tree.get(self.id).map_or(self.id, |n| n.process_instance)
    }

    fn business_key(&self) -> Option<String> {
        let instance = EventListenerExecution::process_instance(self);
        self.tree
            .get(instance)
            .and_then(|n| n.business_key.clone())
    }
}

impl ActivityExecution for ExecutionMut<'_> {
    fn id(&self) -> ExecutionId {
        self.id
    }

    fn definition(&self) -> Arc<ProcessDefinition> {
        self.definition.clone()
    }

    fn activity(&self) -> Option<ActivityId> {
        self.tree.get(self.id).and_then(|n| n.activity)
    }

    fn parent(&self) -> Option<ExecutionId> {
        self.tree.get(self.id).and_then(|n| n.parent)
    }

    fn process_instance(&self) -> ExecutionId {
        self.tree.get(self.id).map_or(self.id, |n| n.process_instance)
    }

    fn is_active(&self) -> bool {
        self.flag(|n| n.active)
    }

    fn is_scope(&self) -> bool {
        self.flag(|n| n.scope)
    }

    fn is_concurrent(&self) -> bool {
        self.flag(|n| n.concurrent)
    }

    fn is_ended(&self) -> bool {
        self.flag(|n| n.ended)
    }

    fn is_process_instance(&self) -> bool {
        self.flag(|n| n.is_process_instance())
    }

    fn set_active(&mut self, active: bool) {
        if let Some(node) = self.tree.nodes.get_mut(&self.id) {
            node.active = active;
        }
    }

    fn create_execution(&mut self) -> Result<ExecutionId, PvmError> {
        self.tree.create_execution(self.id)
    }

    fn take(&mut self, transition: TransitionId) -> Result<(), PvmError> {
        self.tree.take(self.id, transition)
    }

    fn take_all(&mut self, transitions: &[TransitionId], recyclable: &[ExecutionId]) -> Result<(), PvmError> {
        self.tree.take_all(self.id, transitions, recyclable)
    }

    fn execute_activity(&mut self, activity: ActivityId) -> Result<(), PvmError> {
        self.tree.execute_activity(self.id, activity)
    }

    fn end(&mut self) -> Result<(), PvmError> {
        self.tree.end(self.id)
    }

    fn find_inactive_concurrent_executions(&self, activity: ActivityId) -> Result<Vec<ExecutionId>, PvmError> {
        self.tree.find_inactive_concurrent_executions(self.id, activity)
    }

    fn active_concurrent_activities(&self) -> Result<Vec<ActivityId>, PvmError> {
        self.tree.active_concurrent_activities(self.id)
    }

    fn resolve_definition(&self, key: &str) -> Result<Arc<ProcessDefinition>, PvmError> {
        self.tree.resolve_definition(key)
    }

    fn create_sub_process_instance(&mut self, definition: Arc<ProcessDefinition>) -> Result<ExecutionId, PvmError> {
        self.tree.create_sub_process_instance(self.id, definition)
    }

    fn start_sub_process_instance(&mut self, sub_instance: ExecutionId, variables: Variables) -> Result<(), PvmError> {
        for (name, value) in variables {
            self.tree.set_variable_local(sub_instance, &name, value)?;
        }
        self.tree.start(sub_instance)
    }

    fn delete_process_instance(&mut self, reason: &str) -> Result<(), PvmError> {
        let instance = ActivityExecution::process_instance(self);
        self.tree.delete_cascade(instance, reason)
    }

    fn record_event(&mut self, event: RuntimeEvent) {
        self.tree.record(self.id, event);
    }
}
