//! bpmn-pvm-core - process virtual machine for BPMN 2.0
//!
//! Process definitions are graphs of activities and transitions with pluggable
//! behaviors. Running instances are execution trees driven by atomic
//! operations, persisted through a [`ProcessStore`] one unit of work at a time.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bpmn_pvm_core::{EngineConfig, HandlerRegistry, MemoryStore, ProcessEngine, Variables};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), bpmn_pvm_core::EngineError> {
//! let engine = ProcessEngine::new(
//!     Arc::new(MemoryStore::new()),
//!     HandlerRegistry::new(),
//!     EngineConfig::default(),
//! );
//! engine
//!     .deploy_yaml(
//!         r#"
//! id: review
//! nodes:
//!   - { kind: StartEvent, id: start }
//!   - { kind: UserTask, id: approve }
//!   - { kind: EndEvent, id: end }
//! flows:
//!   - { from: start, to: approve }
//!   - { from: approve, to: end }
//! "#,
//!     )
//!     .await?;
//! let pi = engine
//!     .start_process_instance_by_key("review", None, Variables::new())
//!     .await?;
//! for task in engine.tasks(pi).await? {
//!     engine.complete_task(task.execution_id, Variables::new()).await?;
//! }
//! assert!(engine.process_instance_ended(pi).await?);
//! # Ok(())
//! # }
//! ```

// Errors for every layer
pub mod error;

// Static process graph and the behavior contracts plugged into it
pub mod behavior;
pub mod definition;

// Execution tree and atomic operations
pub mod events;
pub mod runtime;

// BPMN activity, gateway and sub-process behaviors
pub mod bpmn;

// Authoring: YAML / BPMN XML models, validation, compilation
pub mod model;

// Persistence
pub mod session;
pub mod store;
pub mod store_memory;

pub mod config;
pub mod deployment;
pub mod engine;

pub use behavior::{
    ActivityBehavior, CompositeActivityBehavior, Condition, ExecutionListener, SignallableActivityBehavior,
    SubProcessActivityBehavior,
};
pub use bpmn::{HandlerRegistry, TaskHandler};
pub use config::EngineConfig;
pub use definition::{ActivityId, ListenerEvent, ProcessDefinition, ProcessDefinitionBuilder, TransitionId};
pub use deployment::DeploymentCache;
pub use engine::{ProcessEngine, TaskView};
pub use error::{BehaviorError, DefinitionError, EngineError, PvmError, StoreError};
pub use events::RuntimeEvent;
pub use runtime::{ActivityExecution, ExecutionId, ExecutionTree, VariableScope, Variables};
pub use session::PersistenceSession;
pub use store::{ExecutionRecord, ModelFormat, ProcessStore};
pub use store_memory::MemoryStore;
