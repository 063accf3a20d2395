//! Built-in BPMN activity behaviors.

mod activities;
mod condition;
mod gateways;
mod handler;
mod subprocess;

pub use activities::{Automatic, NoneEndEvent, ServiceTask, TerminateEndEvent, UserTask, WaitState};
pub use condition::{CompareOp, VariableCondition};
pub use gateways::{ExclusiveGateway, InclusiveGateway, ParallelGateway};
pub use handler::{HandlerRegistry, TaskHandler};
pub use subprocess::{CallActivity, EmbeddedSubProcess, VariableMapping};

use crate::definition::{Activity, ProcessDefinition, TransitionId};
use crate::error::{BehaviorError, PvmError};
use crate::runtime::{ActivityExecution, Variables};

/// Activity property naming the default outgoing transition.
pub const DEFAULT_FLOW: &str = "default";
pub const ASSIGNEE: &str = "assignee";
pub const CANDIDATE_GROUP: &str = "candidateGroup";

fn default_flow(definition: &ProcessDefinition, activity: &Activity) -> Option<TransitionId> {
    activity
        .property(DEFAULT_FLOW)
        .and_then(|id| definition.find_transition(id))
}

/// Outgoing transitions whose condition holds, in definition order, falling
/// back to the default flow when none does.
fn select_outgoing(
    definition: &ProcessDefinition,
    activity: &Activity,
    variables: &Variables,
) -> Result<Vec<TransitionId>, BehaviorError> {
    let default = default_flow(definition, activity);
    let mut selected = Vec::new();
    for &t in activity.outgoing() {
        if Some(t) == default {
            continue;
        }
        let holds = match definition.transition(t).condition() {
            Some(condition) => condition.evaluate(variables)?,
            None => true,
        };
        if holds {
            selected.push(t);
        }
    }
    if selected.is_empty() {
        selected.extend(default);
    }
    Ok(selected)
}

/// Default leaving behavior of an activity: one selected transition is
/// taken directly, several fork, none ends the execution.
pub(crate) fn leave(execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError> {
    let definition = execution.definition();
    let activity = execution.activity().ok_or(PvmError::NoCurrentActivity {
        execution: execution.id(),
    })?;
    let activity = definition.activity(activity);
    let variables = execution.get_variables();
    let selected = select_outgoing(&definition, activity, &variables)?;

    match selected.as_slice() {
        [] if activity.outgoing().is_empty() => execution.end()?,
        [] => {
            return Err(BehaviorError::failed(format!(
                "no outgoing sequence flow of '{}' could be selected",
                activity.id()
            )))
        }
        [single] => execution.take(*single)?,
        many => {
            execution.inactivate();
            let id = execution.id();
            execution.take_all(many, &[id])?;
        }
    }
    Ok(())
}
