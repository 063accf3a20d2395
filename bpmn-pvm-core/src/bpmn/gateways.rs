use super::{default_flow, select_outgoing};
use crate::behavior::ActivityBehavior;
use crate::error::{BehaviorError, PvmError};
use crate::runtime::ActivityExecution;
use tracing::debug;

/// Takes the first outgoing transition whose condition holds, else the default flow.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExclusiveGateway;

impl ActivityBehavior for ExclusiveGateway {
    fn execute(&self, execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError> {
        let definition = execution.definition();
        let activity = execution.activity().ok_or(PvmError::NoCurrentActivity {
            execution: execution.id(),
        })?;
        let activity = definition.activity(activity);
        let default = default_flow(&definition, activity);
        let variables = execution.get_variables();

        for &t in activity.outgoing() {
            if Some(t) == default {
                continue;
            }
            let holds = match definition.transition(t).condition() {
                Some(condition) => condition.evaluate(&variables)?,
                None => true,
            };
            if holds {
                debug!(gateway = activity.id(), flow = definition.transition(t).id(), "exclusive gateway decision");
                return Ok(execution.take(t)?);
            }
        }
        match default {
            Some(t) => Ok(execution.take(t)?),
            None => Err(BehaviorError::failed(format!(
                "no outgoing sequence flow for exclusive gateway '{}' could be selected",
                activity.id()
            ))),
        }
    }
}

/// Forks into every outgoing transition once all incoming ones have arrived.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParallelGateway;

impl ActivityBehavior for ParallelGateway {
    fn execute(&self, execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError> {
        let definition = execution.definition();
        let activity = execution.activity().ok_or(PvmError::NoCurrentActivity {
            execution: execution.id(),
        })?;
        execution.inactivate();

        let joined = execution.find_inactive_concurrent_executions(activity)?;
        let incoming = definition.activity(activity).incoming().len().max(1);
        if joined.len() == incoming {
            debug!(gateway = definition.activity(activity).id(), joined = joined.len(), "parallel gateway fires");
            let outgoing = definition.activity(activity).outgoing().to_vec();
            execution.take_all(&outgoing, &joined)?;
        } else {
            debug!(
                gateway = definition.activity(activity).id(),
                joined = joined.len(),
                incoming,
                "parallel gateway waiting"
            );
        }
        Ok(())
    }
}

/// Fires when no other active execution can still reach the gateway, then
/// takes every outgoing transition whose condition holds.
#[derive(Debug, Default, Clone, Copy)]
pub struct InclusiveGateway;

impl ActivityBehavior for InclusiveGateway {
    fn execute(&self, execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError> {
        let definition = execution.definition();
        let activity_id = execution.activity().ok_or(PvmError::NoCurrentActivity {
            execution: execution.id(),
        })?;
        let activity = definition.activity(activity_id);
        execution.inactivate();

        let pending = execution
            .active_concurrent_activities()?
            .into_iter()
            .any(|a| definition.is_reachable(a, activity_id));
        if pending {
            debug!(gateway = activity.id(), "inclusive gateway waiting for upstream executions");
            return Ok(());
        }

        let joined = execution.find_inactive_concurrent_executions(activity_id)?;
        let variables = execution.get_variables();
        let selected = select_outgoing(&definition, activity, &variables)?;
        if selected.is_empty() {
            return Err(BehaviorError::failed(format!(
                "no outgoing sequence flow for inclusive gateway '{}' could be selected",
                activity.id()
            )));
        }
        execution.take_all(&selected, &joined)?;
        Ok(())
    }
}
