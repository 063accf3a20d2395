use super::leave;
use crate::behavior::{ActivityBehavior, CompositeActivityBehavior, SubProcessActivityBehavior};
use crate::error::{BehaviorError, PvmError};
use crate::runtime::{ActivityExecution, Variables};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Scope activity running its nested activities from their initial one.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedSubProcess;

impl ActivityBehavior for EmbeddedSubProcess {
    fn execute(&self, execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError> {
        let definition = execution.definition();
        let activity = execution.activity().ok_or(PvmError::NoCurrentActivity {
            execution: execution.id(),
        })?;
        let initial = definition.activity(activity).initial().ok_or_else(|| {
            BehaviorError::failed(format!(
                "sub process '{}' has no initial activity",
                definition.activity(activity).id()
            ))
        })?;
        Ok(execution.execute_activity(initial)?)
    }

    fn as_composite(&self) -> Option<&dyn CompositeActivityBehavior> {
        Some(self)
    }
}

impl CompositeActivityBehavior for EmbeddedSubProcess {
    fn last_execution_ended(&self, execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError> {
        leave(execution)
    }
}

/// Copies a variable from `source` to `target` across a call activity boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableMapping {
    pub source: String,
    pub target: String,
}

impl VariableMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Starts the latest deployed definition of `called_element` as a sub process
/// instance and continues once it ends.
#[derive(Clone, Debug, Default)]
pub struct CallActivity {
    pub called_element: String,
    pub inputs: Vec<VariableMapping>,
    pub outputs: Vec<VariableMapping>,
}

impl CallActivity {
    pub fn new(called_element: impl Into<String>) -> Self {
        Self {
            called_element: called_element.into(),
            ..Default::default()
        }
    }

    pub fn input(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.inputs.push(VariableMapping::new(source, target));
        self
    }

    pub fn output(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.outputs.push(VariableMapping::new(source, target));
        self
    }
}

impl ActivityBehavior for CallActivity {
    fn execute(&self, execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError> {
        let definition = execution.resolve_definition(&self.called_element)?;
        let mut variables = Variables::new();
        for mapping in &self.inputs {
            if let Some(value) = execution.get_variable(&mapping.source) {
                variables.insert(mapping.target.clone(), value);
            }
        }
        debug!(
            called_element = %self.called_element,
            definition = %definition.id(),
            inputs = variables.len(),
            "starting sub process instance"
        );
        let sub_instance = execution.create_sub_process_instance(definition)?;
        execution.start_sub_process_instance(sub_instance, variables)?;
        Ok(())
    }

    fn as_sub_process(&self) -> Option<&dyn SubProcessActivityBehavior> {
        Some(self)
    }
}

impl SubProcessActivityBehavior for CallActivity {
    fn completing(
        &self,
        execution: &mut dyn ActivityExecution,
        sub_instance_variables: &Variables,
    ) -> Result<(), BehaviorError> {
        for mapping in &self.outputs {
            if let Some(value) = sub_instance_variables.get(&mapping.source) {
                execution.set_variable(&mapping.target, value.clone())?;
            }
        }
        Ok(())
    }

    fn completed(&self, execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError> {
        leave(execution)
    }
}
