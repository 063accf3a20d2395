//! Contracts between the interpreter and the code attached to a definition:
//! activity behaviors, execution listeners and transition conditions.
//!
//! Behaviors only ever see an execution through the narrow capability traits
//! in [`crate::runtime`] ([`ActivityExecution`], [`EventListenerExecution`]),
//! never the tree itself.

use crate::error::BehaviorError;
use crate::runtime::{ActivityExecution, EventListenerExecution, Variables};
use serde_json::Value;

/// What an activity does when an execution arrives at it.
pub trait ActivityBehavior: Send + Sync {
    fn execute(&self, execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError>;

    /// Wait states accept external signals.
    fn as_signallable(&self) -> Option<&dyn SignallableActivityBehavior> {
        None
    }

    /// Scopes that react when their last nested execution ends.
    fn as_composite(&self) -> Option<&dyn CompositeActivityBehavior> {
        None
    }

    /// Activities that wait for a sub process instance to complete.
    fn as_sub_process(&self) -> Option<&dyn SubProcessActivityBehavior> {
        None
    }
}

pub trait SignallableActivityBehavior: Send + Sync {
    fn signal(
        &self,
        execution: &mut dyn ActivityExecution,
        signal_name: &str,
        data: Option<&Value>,
    ) -> Result<(), BehaviorError>;
}

pub trait CompositeActivityBehavior: Send + Sync {
    fn last_execution_ended(&self, execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError>;
}

pub trait SubProcessActivityBehavior: Send + Sync {
    /// Called before the sub process instance is destroyed, with its variables.
    fn completing(
        &self,
        execution: &mut dyn ActivityExecution,
        sub_instance_variables: &Variables,
    ) -> Result<(), BehaviorError>;

    /// Called once the sub process instance is gone.
    fn completed(&self, execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError>;
}

/// Notified on `start`/`end` of activities and the process, and on `take` of transitions.
pub trait ExecutionListener: Send + Sync {
    fn notify(&self, execution: &mut dyn EventListenerExecution) -> Result<(), BehaviorError>;
}

impl<F> ExecutionListener for F
where
    F: Fn(&mut dyn EventListenerExecution) -> Result<(), BehaviorError> + Send + Sync,
{
    fn notify(&self, execution: &mut dyn EventListenerExecution) -> Result<(), BehaviorError> {
        self(execution)
    }
}

/// Guard on a transition, evaluated against the visible variables.
pub trait Condition: Send + Sync {
    fn evaluate(&self, variables: &Variables) -> Result<bool, BehaviorError>;
}
