use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Runtime events, the durable audit trail of every process instance.
///
/// Events are recorded by the execution tree while atomic operations run and
/// are handed to the store together with the execution change set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RuntimeEvent {
    ProcessStarted {
        process_instance: Uuid,
        definition_id: String,
        business_key: Option<String>,
        super_execution: Option<Uuid>,
    },
    ProcessEnded {
        process_instance: Uuid,
        delete_reason: Option<String>,
    },
    ActivityStarted {
        execution: Uuid,
        activity_id: String,
        kind: String,
    },
    ActivityEnded {
        execution: Uuid,
        activity_id: String,
    },
    TransitionTaken {
        execution: Uuid,
        transition_id: String,
        source: String,
        destination: String,
    },
    ExecutionCreated {
        execution: Uuid,
        parent: Uuid,
    },
    /// A concurrent execution was removed while joining or collapsing.
    ExecutionPruned {
        execution: Uuid,
        replaced_by: Option<Uuid>,
    },
    SubProcessInstanceCreated {
        super_execution: Uuid,
        process_instance: Uuid,
        definition_id: String,
    },
    Signalled {
        execution: Uuid,
        activity_id: String,
        signal_name: String,
    },
    TaskCreated {
        execution: Uuid,
        activity_id: String,
        assignee: Option<String>,
        candidate_group: Option<String>,
    },
    VariableSet {
        execution: Uuid,
        name: String,
    },
}

impl RuntimeEvent {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeEvent::ProcessStarted { .. } => "process_started",
            RuntimeEvent::ProcessEnded { .. } => "process_ended",
            RuntimeEvent::ActivityStarted { .. } => "activity_started",
            RuntimeEvent::ActivityEnded { .. } => "activity_ended",
            RuntimeEvent::TransitionTaken { .. } => "transition_taken",
            RuntimeEvent::ExecutionCreated { .. } => "execution_created",
            RuntimeEvent::ExecutionPruned { .. } => "execution_pruned",
            RuntimeEvent::SubProcessInstanceCreated { .. } => "sub_process_instance_created",
            RuntimeEvent::Signalled { .. } => "signalled",
            RuntimeEvent::TaskCreated { .. } => "task_created",
            RuntimeEvent::VariableSet { .. } => "variable_set",
        }
    }
}
