use super::{leave, HandlerRegistry, TaskHandler};
use crate::behavior::{ActivityBehavior, SignallableActivityBehavior};
use crate::error::{BehaviorError, DefinitionError};
use crate::events::RuntimeEvent;
use crate::runtime::ActivityExecution;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Passes straight through: start events, manual tasks, plain tasks.
#[derive(Debug, Default, Clone, Copy)]
pub struct Automatic;

impl ActivityBehavior for Automatic {
    fn execute(&self, execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError> {
        leave(execution)
    }
}

/// Waits for any signal, then leaves. Used for receive tasks.
#[derive(Debug, Default, Clone, Copy)]
pub struct WaitState;

impl ActivityBehavior for WaitState {
    fn execute(&self, _execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError> {
        Ok(())
    }

    fn as_signallable(&self) -> Option<&dyn SignallableActivityBehavior> {
        Some(self)
    }
}

impl SignallableActivityBehavior for WaitState {
    fn signal(
        &self,
        execution: &mut dyn ActivityExecution,
        _signal_name: &str,
        _data: Option<&Value>,
    ) -> Result<(), BehaviorError> {
        leave(execution)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoneEndEvent;

impl ActivityBehavior for NoneEndEvent {
    fn execute(&self, execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError> {
        Ok(execution.end()?)
    }
}

/// Ends the whole process instance, whatever else is still running.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminateEndEvent;

pub const TERMINATED: &str = "terminated";

impl ActivityBehavior for TerminateEndEvent {
    fn execute(&self, execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError> {
        debug!(execution = %execution.id(), "terminate end event reached");
        Ok(execution.delete_process_instance(TERMINATED)?)
    }
}

/// Human task: records a task and waits for completion.
#[derive(Debug, Default, Clone)]
pub struct UserTask {
    pub assignee: Option<String>,
    pub candidate_group: Option<String>,
}

impl ActivityBehavior for UserTask {
    fn execute(&self, execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError> {
        let definition = execution.definition();
        let activity_id = execution
            .activity()
            .map(|a| definition.activity(a).id().to_string())
            .unwrap_or_default();
        let event = RuntimeEvent::TaskCreated {
            execution: execution.id().as_uuid(),
            activity_id,
            assignee: self.assignee.clone(),
            candidate_group: self.candidate_group.clone(),
        };
        execution.record_event(event);
        Ok(())
    }

    fn as_signallable(&self) -> Option<&dyn SignallableActivityBehavior> {
        Some(self)
    }
}

impl SignallableActivityBehavior for UserTask {
    fn signal(
        &self,
        execution: &mut dyn ActivityExecution,
        _signal_name: &str,
        _data: Option<&Value>,
    ) -> Result<(), BehaviorError> {
        leave(execution)
    }
}

/// Runs a registered [`TaskHandler`] and merges its output into the variables.
#[derive(Clone)]
pub struct ServiceTask {
    name: String,
    handler: Arc<dyn TaskHandler>,
}

impl ServiceTask {
    pub fn new(name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }

    pub fn from_registry(registry: &HandlerRegistry, name: &str) -> Result<Self, DefinitionError> {
        registry
            .get(name)
            .map(|handler| Self::new(name, handler))
            .ok_or_else(|| DefinitionError::UnknownHandler(name.to_string()))
    }

    pub fn handler_name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ServiceTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTask").field("name", &self.name).finish()
    }
}

impl ActivityBehavior for ServiceTask {
    fn execute(&self, execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError> {
        let input = execution.get_variables();
        let output = self.handler.execute(&input)?;
        debug!(handler = %self.name, outputs = output.len(), "service task completed");
        for (name, value) in output {
            execution.set_variable(&name, value)?;
        }
        leave(execution)
    }
}
