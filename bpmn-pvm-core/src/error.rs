//! Error taxonomy for the process virtual machine and the engine around it.
//!
//! ```text
//! PvmError        usage / configuration errors of the interpreter (fatal, non-retryable)
//! BehaviorError   what activity behaviors and listeners return
//! DefinitionError building or parsing a process definition
//! StoreError      persistence failures, including optimistic-lock conflicts (retryable)
//! EngineError     top-level error of the async engine facade
//! ```

use crate::definition::{ActivityId, TransitionId};
use crate::runtime::ExecutionId;

/// Errors raised by the execution tree and its atomic operations.
#[derive(Debug, thiserror::Error)]
pub enum PvmError {
    #[error("execution {execution} is already taking a transition")]
    AlreadyTakingTransition { execution: ExecutionId },

    #[error("transition {transition} does not belong to process definition '{definition}'")]
    UnknownTransition {
        transition: TransitionId,
        definition: String,
    },

    #[error("activity {activity} does not belong to process definition '{definition}'")]
    UnknownActivity {
        activity: ActivityId,
        definition: String,
    },

    #[error("execution {execution} is not positioned at an activity")]
    NoCurrentActivity { execution: ExecutionId },

    #[error("activity '{activity_id}' does not accept signals")]
    NotSignallable { activity_id: String },

    #[error("no behavior specified for activity '{activity_id}'")]
    NoBehavior { activity_id: String },

    #[error("activity '{activity_id}' cannot complete a sub process instance")]
    NotCallable { activity_id: String },

    #[error("joining scope executions is not allowed")]
    ScopeJoin,

    #[error("unknown execution {0}")]
    UnknownExecution(ExecutionId),

    #[error("execution {0} has been removed from its tree")]
    ExecutionRemoved(ExecutionId),

    #[error("execution {0} has no parent execution")]
    NoParent(ExecutionId),

    #[error("execution {0} is not a process instance")]
    NotProcessInstance(ExecutionId),

    #[error("process definition '{0}' not found")]
    DefinitionNotFound(String),

    #[error("call activity nesting exceeds {max} levels")]
    CallDepthExceeded { max: usize },

    /// A checked failure from behavior or listener code, wrapped with context.
    #[error("{}", behavior_message(.activity_id, .signal, .source))]
    Behavior {
        activity_id: String,
        signal: Option<String>,
        #[source]
        source: anyhow::Error,
    },
}

fn behavior_message(activity_id: &str, signal: &Option<String>, source: &anyhow::Error) -> String {
    match signal {
        Some(name) => format!(
            "couldn't process signal '{name}' on activity '{activity_id}': {source}"
        ),
        None => format!("couldn't execute activity '{activity_id}': {source}"),
    }
}

/// Result type returned by behaviors, listeners and conditions.
///
/// `Engine` errors are interpreter errors raised while the behavior drove the
/// tree further; they propagate unchanged. `Failed` errors come from the
/// behavior's own logic and get wrapped into [`PvmError::Behavior`].
#[derive(Debug, thiserror::Error)]
pub enum BehaviorError {
    #[error(transparent)]
    Engine(#[from] PvmError),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl BehaviorError {
    /// Convenience constructor for a checked failure with a plain message.
    pub fn failed(message: impl std::fmt::Display) -> Self {
        BehaviorError::Failed(anyhow::anyhow!("{message}"))
    }

    pub(crate) fn into_pvm(self, activity_id: &str, signal: Option<&str>) -> PvmError {
        match self {
            BehaviorError::Engine(e) => e,
            BehaviorError::Failed(source) => PvmError::Behavior {
                activity_id: activity_id.to_string(),
                signal: signal.map(str::to_string),
                source,
            },
        }
    }
}

/// Errors raised while building, parsing or validating a process definition.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("duplicate activity id '{0}'")]
    DuplicateActivity(String),

    #[error("transition '{transition}' references unknown activity '{activity}'")]
    UnknownDestination { transition: String, activity: String },

    #[error("process definition '{0}' has no initial activity")]
    MissingInitial(String),

    #[error("end_activity() called without a matching create_activity()")]
    UnbalancedBuilder,

    #[error("no service task handler registered under '{0}'")]
    UnknownHandler(String),

    #[error("invalid condition expression '{0}'")]
    InvalidCondition(String),

    #[error("model validation failed:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),

    #[error("failed to parse process model: {0}")]
    Parse(String),
}

/// Errors raised by a [`ProcessStore`](crate::store::ProcessStore) when applying a change set.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The row was modified by another unit of work since it was loaded.
    #[error("execution {execution_id} was updated by another transaction (expected revision {revision})")]
    OptimisticLock {
        execution_id: uuid::Uuid,
        revision: u32,
    },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Top-level error of [`ProcessEngine`](crate::engine::ProcessEngine) commands.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Pvm(#[from] PvmError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("execution {0} not found")]
    ExecutionNotFound(uuid::Uuid),

    #[error("process instance {0} not found")]
    ProcessInstanceNotFound(uuid::Uuid),

    #[error("no deployed process definition with key '{0}'")]
    UnknownProcessKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// True only for optimistic-lock conflicts: the caller may reload and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Store(StoreError::OptimisticLock { .. }))
    }
}
