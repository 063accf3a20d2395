//! The runtime execution tree.
//!
//! An [`ExecutionTree`] owns every execution node of one call hierarchy (a
//! process instance, its concurrent and scope children, and any sub process
//! instances started by call activities). Nodes reference each other by
//! [`ExecutionId`]; there are no shared pointers between nodes.
//!
//! All state changes are driven by [atomic operations](AtomicOperation)
//! queued per node and drained by a single dispatch loop.

mod execution;
mod operation;
mod persist;
mod take_all;
mod variables;

pub use execution::{ActivityExecution, EventListenerExecution, ExecutionMut, VariableScope};
pub use operation::AtomicOperation;
pub use variables::Variables;

use crate::definition::{ActivityId, EventSource, ListenerEvent, ProcessDefinition, TransitionId};
use crate::deployment::DeploymentCache;
use crate::error::PvmError;
use crate::events::RuntimeEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Default limit for nested call activities.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 16;

// ─── Identity ─────────────────────────────────────────────────

/// Stable identity of an execution node, assigned when the node is created.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for ExecutionId {
    fn from(id: Uuid) -> Self {
        ExecutionId(id)
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExecutionId({})", self.0)
    }
}

/// Source of execution ids. The persistence session hands its generator to
/// the trees it loads so that ids are known before the first flush.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Uuid;
}

/// Time-ordered UUID v7 ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV7Generator;

impl IdGenerator for UuidV7Generator {
    fn next_id(&self) -> Uuid {
        Uuid::now_v7()
    }
}

// ─── Execution node ───────────────────────────────────────────

/// One node of the execution tree.
#[derive(Debug)]
pub struct ExecutionNode {
    pub(crate) id: ExecutionId,
    pub(crate) revision: u32,
    pub(crate) persisted: bool,
    pub(crate) definition: Arc<ProcessDefinition>,
    pub(crate) activity: Option<ActivityId>,
    pub(crate) transition: Option<TransitionId>,
    pub(crate) parent: Option<ExecutionId>,
    pub(crate) children: Vec<ExecutionId>,
    pub(crate) process_instance: ExecutionId,
    pub(crate) super_execution: Option<ExecutionId>,
    pub(crate) sub_process_instance: Option<ExecutionId>,
    pub(crate) replaced_by: Option<ExecutionId>,
    pub(crate) active: bool,
    pub(crate) scope: bool,
    pub(crate) concurrent: bool,
    pub(crate) ended: bool,
    pub(crate) removed: bool,
    pub(crate) delete_root: bool,
    pub(crate) delete_reason: Option<String>,
    pub(crate) business_key: Option<String>,
    pub(crate) variables: Variables,
    pub(crate) starting_initial: Option<ActivityId>,
    pub(crate) event: Option<(ListenerEvent, EventSource)>,
    pub(crate) next_operation: Option<AtomicOperation>,
    pub(crate) operating: bool,
}

impl ExecutionNode {
    fn new(id: ExecutionId, definition: Arc<ProcessDefinition>, process_instance: ExecutionId) -> Self {
        Self {
            id,
            revision: 0,
            persisted: false,
            definition,
            activity: None,
            transition: None,
            parent: None,
            children: Vec::new(),
            process_instance,
            super_execution: None,
            sub_process_instance: None,
            replaced_by: None,
            active: true,
            scope: true,
            concurrent: false,
            ended: false,
            removed: false,
            delete_root: false,
            delete_reason: None,
            business_key: None,
            variables: Variables::new(),
            starting_initial: None,
            event: None,
            next_operation: None,
            operating: false,
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    /// Revision last read from the store; 0 for transient nodes.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// False until the node has been flushed to a store once.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn definition(&self) -> &Arc<ProcessDefinition> {
        &self.definition
    }

    pub fn activity(&self) -> Option<ActivityId> {
        self.activity
    }

    pub fn activity_id(&self) -> Option<&str> {
        self.activity.map(|a| self.definition.activity(a).id())
    }

    pub fn transition(&self) -> Option<TransitionId> {
        self.transition
    }

    pub fn parent(&self) -> Option<ExecutionId> {
        self.parent
    }

    pub fn children(&self) -> &[ExecutionId] {
        &self.children
    }

    pub fn process_instance(&self) -> ExecutionId {
        self.process_instance
    }

    pub fn is_process_instance(&self) -> bool {
        self.parent.is_none() && self.process_instance == self.id
    }

    pub fn super_execution(&self) -> Option<ExecutionId> {
        self.super_execution
    }

    pub fn sub_process_instance(&self) -> Option<ExecutionId> {
        self.sub_process_instance
    }

    /// Set when this concurrent execution was merged into its parent.
    pub fn replaced_by(&self) -> Option<ExecutionId> {
        self.replaced_by
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_scope(&self) -> bool {
        self.scope
    }

    pub fn is_concurrent(&self) -> bool {
        self.concurrent
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Detached from its parent by `remove`.
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn is_delete_root(&self) -> bool {
        self.delete_root
    }

    pub fn delete_reason(&self) -> Option<&str> {
        self.delete_reason.as_deref()
    }

    pub fn business_key(&self) -> Option<&str> {
        self.business_key.as_deref()
    }

    pub fn variables_local(&self) -> &Variables {
        &self.variables
    }

    /// True while the dispatch loop of this node is running.
    pub fn is_operating(&self) -> bool {
        self.operating
    }

    pub fn next_operation(&self) -> Option<AtomicOperation> {
        self.next_operation
    }
}

// ─── Execution tree ───────────────────────────────────────────

/// Owner of all execution nodes of one call hierarchy.
pub struct ExecutionTree {
    nodes: BTreeMap<ExecutionId, ExecutionNode>,
    id_generator: Arc<dyn IdGenerator>,
    deployments: Option<Arc<DeploymentCache>>,
    events: Vec<(Uuid, RuntimeEvent)>,
    max_call_depth: usize,
}

impl Default for ExecutionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionTree")
            .field("nodes", &self.nodes.len())
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl ExecutionTree {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            id_generator: Arc::new(UuidV7Generator),
            deployments: None,
            events: Vec::new(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    /// Definitions available to call activities.
    pub fn with_deployments(mut self, deployments: Arc<DeploymentCache>) -> Self {
        self.deployments = Some(deployments);
        self
    }

    pub fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    // ── Lookup ──

    pub fn get(&self, id: ExecutionId) -> Option<&ExecutionNode> {
        self.nodes.get(&id)
    }

    pub fn node(&self, id: ExecutionId) -> Result<&ExecutionNode, PvmError> {
        self.nodes.get(&id).ok_or(PvmError::UnknownExecution(id))
    }

    pub(crate) fn node_mut(&mut self, id: ExecutionId) -> Result<&mut ExecutionNode, PvmError> {
        self.nodes.get_mut(&id).ok_or(PvmError::UnknownExecution(id))
    }

    /// Like [`node`](Self::node) but rejects nodes detached by `remove`.
    fn live_node(&self, id: ExecutionId) -> Result<&ExecutionNode, PvmError> {
        let node = self.node(id)?;
        if node.removed {
            return Err(PvmError::ExecutionRemoved(id));
        }
        Ok(node)
    }

    pub(crate) fn parent_of(&self, id: ExecutionId) -> Result<ExecutionId, PvmError> {
        self.node(id)?.parent.ok_or(PvmError::NoParent(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ExecutionNode> {
        self.nodes.values()
    }

    /// Root executions of every process instance in the tree.
    pub fn process_instances(&self) -> Vec<ExecutionId> {
        self.nodes
            .values()
            .filter(|n| n.is_process_instance())
            .map(|n| n.id)
            .collect()
    }

    /// A handle exposing the behavior-facing capability traits.
    pub fn execution_mut(&mut self, id: ExecutionId) -> Result<ExecutionMut<'_>, PvmError> {
        ExecutionMut::new(self, id)
    }

    // ── Events ──

    pub(crate) fn record(&mut self, id: ExecutionId, event: RuntimeEvent) {
        let instance = self
            .nodes
            .get(&id)
            .map(|n| n.process_instance.as_uuid())
            .unwrap_or_else(|| id.as_uuid());
        tracing::trace!(execution = %id, event = event.name(), "runtime event");
        self.events.push((instance, event));
    }

    /// Events recorded since the tree was created, tagged with their process instance.
    pub fn events(&self) -> &[(Uuid, RuntimeEvent)] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<(Uuid, RuntimeEvent)> {
        std::mem::take(&mut self.events)
    }

    // ── Structure ──

    fn insert_root(&mut self, definition: Arc<ProcessDefinition>) -> ExecutionId {
        let id = ExecutionId(self.id_generator.next_id());
        self.nodes.insert(id, ExecutionNode::new(id, definition, id));
        id
    }

    /// New process instance positioned before the definition's initial activity.
    pub fn create_process_instance(
        &mut self,
        definition: Arc<ProcessDefinition>,
        business_key: Option<String>,
    ) -> ExecutionId {
        let initial = definition.initial();
        let id = self.insert_root(definition);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.business_key = business_key;
            node.starting_initial = Some(initial);
        }
        debug!(process_instance = %id, "created process instance");
        id
    }

    /// New process instance that starts at `initial` instead of the
    /// definition's initial activity. Scopes enclosing `initial` are entered
    /// on the way down when the instance starts.
    pub fn create_process_instance_for_initial(
        &mut self,
        definition: Arc<ProcessDefinition>,
        initial: ActivityId,
        business_key: Option<String>,
    ) -> Result<ExecutionId, PvmError> {
        if definition.try_activity(initial).is_none() {
            return Err(PvmError::UnknownActivity {
                activity: initial,
                definition: definition.id(),
            });
        }
        let id = self.create_process_instance(definition, business_key);
        self.node_mut(id)?.starting_initial = Some(initial);
        Ok(id)
    }

    /// New child execution appended to `parent`'s children. The child
    /// shares the parent's definition, process instance and activity and
    /// starts active and scoped.
    pub fn create_execution(&mut self, parent: ExecutionId) -> Result<ExecutionId, PvmError> {
        let (definition, instance, activity) = {
            let p = self.live_node(parent)?;
            (p.definition.clone(), p.process_instance, p.activity)
        };
        let id = ExecutionId(self.id_generator.next_id());
        let mut child = ExecutionNode::new(id, definition, instance);
        child.parent = Some(parent);
        child.activity = activity;
        self.nodes.insert(id, child);
        self.node_mut(parent)?.children.push(id);
        self.record(
            id,
            RuntimeEvent::ExecutionCreated {
                execution: id.as_uuid(),
                parent: parent.as_uuid(),
            },
        );
        debug!(execution = %id, parent = %parent, "created child execution");
        Ok(id)
    }

    /// New process instance of `definition` whose super execution is `super_execution`.
    pub fn create_sub_process_instance(
        &mut self,
        super_execution: ExecutionId,
        definition: Arc<ProcessDefinition>,
    ) -> Result<ExecutionId, PvmError> {
        self.live_node(super_execution)?;
        let depth = self.call_depth(super_execution)?;
        if depth >= self.max_call_depth {
            return Err(PvmError::CallDepthExceeded {
                max: self.max_call_depth,
            });
        }
        let definition_id = definition.id();
        let sub = self.create_process_instance(definition, None);
        let previous = self.node_mut(super_execution)?.sub_process_instance.replace(sub);
        if let Some(previous) = previous {
            if let Some(old) = self.nodes.get_mut(&previous) {
                old.super_execution = None;
            }
        }
        self.node_mut(sub)?.super_execution = Some(super_execution);
        self.record(
            super_execution,
            RuntimeEvent::SubProcessInstanceCreated {
                super_execution: super_execution.as_uuid(),
                process_instance: sub.as_uuid(),
                definition_id,
            },
        );
        Ok(sub)
    }

    /// Number of call activities between `id` and the top of the call hierarchy.
    pub fn call_depth(&self, id: ExecutionId) -> Result<usize, PvmError> {
        let mut depth = 0;
        let mut instance = self.node(id)?.process_instance;
        while let Some(super_execution) = self.node(instance)?.super_execution {
            depth += 1;
            instance = self.node(super_execution)?.process_instance;
        }
        Ok(depth)
    }

    /// Detach `id` from its parent's children. No-op for roots and for
    /// nodes that are already detached.
    pub fn remove(&mut self, id: ExecutionId) -> Result<(), PvmError> {
        let node = self.node_mut(id)?;
        if node.removed {
            return Ok(());
        }
        let Some(parent) = node.parent else {
            return Ok(());
        };
        node.removed = true;
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != id);
        }
        Ok(())
    }

    /// Leaving a scope drops its local variables.
    pub(crate) fn destroy(&mut self, id: ExecutionId) -> Result<(), PvmError> {
        let node = self.node_mut(id)?;
        node.variables.clear();
        node.scope = false;
        Ok(())
    }

    /// Move `id` from its current parent to the end of `new_parent`'s children.
    pub(crate) fn reparent(&mut self, id: ExecutionId, new_parent: ExecutionId) -> Result<(), PvmError> {
        if let Some(old) = self.node(id)?.parent {
            self.node_mut(old)?.children.retain(|c| *c != id);
        }
        self.node_mut(new_parent)?.children.push(id);
        self.node_mut(id)?.parent = Some(new_parent);
        Ok(())
    }

    /// Merge the last concurrent child `last` into the concurrent root
    /// `root`: the root takes over its activity, active flag, local
    /// variables and children, and `last` is removed.
    pub(crate) fn prune_last_concurrent(&mut self, last: ExecutionId, root: ExecutionId) -> Result<(), PvmError> {
        let (activity, active, variables, children) = {
            let node = self.node_mut(last)?;
            (
                node.activity,
                node.active,
                std::mem::take(&mut node.variables),
                node.children.clone(),
            )
        };
        for child in children {
            self.reparent(child, root)?;
        }
        {
            let r = self.node_mut(root)?;
            r.activity = activity;
            r.active = active;
            r.variables.extend(variables);
        }
        self.node_mut(last)?.replaced_by = Some(root);
        self.remove(last)?;
        self.record(
            last,
            RuntimeEvent::ExecutionPruned {
                execution: last.as_uuid(),
                replaced_by: Some(root.as_uuid()),
            },
        );
        debug!(execution = %last, concurrent_root = %root, "merged last concurrent execution into root");
        Ok(())
    }

    /// Follow `replaced_by` links to the execution that carries on for `id`.
    pub(crate) fn resolve_replacement(&self, mut id: ExecutionId) -> ExecutionId {
        while let Some(next) = self.nodes.get(&id).and_then(|n| n.replaced_by) {
            if next == id {
                break;
            }
            id = next;
        }
        id
    }

    /// The parent for a non-scope concurrent child, the execution itself otherwise.
    pub(crate) fn concurrent_root(&self, id: ExecutionId) -> Result<ExecutionId, PvmError> {
        let node = self.node(id)?;
        if node.concurrent && !node.scope {
            node.parent.ok_or(PvmError::NoParent(id))
        } else {
            Ok(id)
        }
    }

    // ── Commands ──

    /// Start a process instance created by `create_process_instance*`.
    pub fn start(&mut self, id: ExecutionId) -> Result<(), PvmError> {
        if !self.live_node(id)?.is_process_instance() {
            return Err(PvmError::NotProcessInstance(id));
        }
        self.perform_operation(id, AtomicOperation::ProcessStart)
    }

    /// Deliver an external signal to the behavior of the current activity.
    pub fn signal(&mut self, id: ExecutionId, signal_name: &str, data: Option<Value>) -> Result<(), PvmError> {
        let node = self.live_node(id)?;
        let definition = node.definition.clone();
        let activity = node.activity.ok_or(PvmError::NoCurrentActivity { execution: id })?;
        let activity_id = definition.activity(activity).id().to_string();
        let behavior = definition
            .activity(activity)
            .behavior()
            .cloned()
            .ok_or_else(|| PvmError::NoBehavior {
                activity_id: activity_id.clone(),
            })?;
        let signallable = behavior.as_signallable().ok_or_else(|| PvmError::NotSignallable {
            activity_id: activity_id.clone(),
        })?;
        self.record(
            id,
            RuntimeEvent::Signalled {
                execution: id.as_uuid(),
                activity_id: activity_id.clone(),
                signal_name: signal_name.to_string(),
            },
        );
        debug!(execution = %id, activity = %activity_id, signal = signal_name, "signal");
        let mut execution = ExecutionMut::new(self, id)?;
        signallable
            .signal(&mut execution, signal_name, data.as_ref())
            .map_err(|e| e.into_pvm(&activity_id, Some(signal_name)))
    }

    /// Leave the current activity via `transition`.
    pub fn take(&mut self, id: ExecutionId, transition: TransitionId) -> Result<(), PvmError> {
        let node = self.live_node(id)?;
        if node.transition.is_some() {
            return Err(PvmError::AlreadyTakingTransition { execution: id });
        }
        if node.definition.try_transition(transition).is_none() {
            return Err(PvmError::UnknownTransition {
                transition,
                definition: node.definition.id(),
            });
        }
        self.node_mut(id)?.transition = Some(transition);
        self.perform_operation(id, AtomicOperation::TransitionNotifyListenerEnd)
    }

    /// Position on `activity` and run it (start listeners, then behavior).
    pub fn execute_activity(&mut self, id: ExecutionId, activity: ActivityId) -> Result<(), PvmError> {
        let node = self.live_node(id)?;
        if node.definition.try_activity(activity).is_none() {
            return Err(PvmError::UnknownActivity {
                activity,
                definition: node.definition.id(),
            });
        }
        self.node_mut(id)?.activity = Some(activity);
        self.perform_operation(id, AtomicOperation::ActivityStart)
    }

    pub fn set_active(&mut self, id: ExecutionId, active: bool) -> Result<(), PvmError> {
        self.node_mut(id)?.active = active;
        Ok(())
    }

    /// End this execution in its current activity.
    pub fn end(&mut self, id: ExecutionId) -> Result<(), PvmError> {
        let node = self.node_mut(id)?;
        node.active = false;
        node.ended = true;
        self.perform_operation(id, AtomicOperation::ActivityEnd)
    }

    /// Delete `id` and everything below it, firing `end` listeners leaf first.
    pub fn delete_cascade(&mut self, id: ExecutionId, reason: &str) -> Result<(), PvmError> {
        let node = self.node_mut(id)?;
        node.delete_reason = Some(reason.to_string());
        node.delete_root = true;
        debug!(execution = %id, reason, "delete cascade");
        self.perform_operation(id, AtomicOperation::DeleteCascade)
    }

    // ── Queries ──

    /// First execution at or below `id` positioned at the activity with the given id.
    pub fn find_execution(&self, id: ExecutionId, activity_id: &str) -> Option<ExecutionId> {
        let node = self.nodes.get(&id)?;
        if node.activity_id() == Some(activity_id) {
            return Some(id);
        }
        node.children
            .iter()
            .find_map(|child| self.find_execution(*child, activity_id))
    }

    /// Activity ids of all active executions at or below `id`.
    pub fn find_active_activity_ids(&self, id: ExecutionId) -> Vec<String> {
        let mut ids = Vec::new();
        self.collect_active_activity_ids(id, &mut ids);
        ids
    }

    fn collect_active_activity_ids(&self, id: ExecutionId, ids: &mut Vec<String>) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if node.active {
            if let Some(activity_id) = node.activity_id() {
                ids.push(activity_id.to_string());
            }
        }
        for child in &node.children {
            self.collect_active_activity_ids(*child, ids);
        }
    }

    /// Inactive executions parked at `activity`: the inactive concurrent
    /// siblings of a concurrent execution, or the execution itself.
    pub fn find_inactive_concurrent_executions(
        &self,
        id: ExecutionId,
        activity: ActivityId,
    ) -> Result<Vec<ExecutionId>, PvmError> {
        let node = self.node(id)?;
        if node.concurrent {
            let parent = self.node(node.parent.ok_or(PvmError::NoParent(id))?)?;
            Ok(parent
                .children
                .iter()
                .filter_map(|c| self.nodes.get(c))
                .filter(|c| c.activity == Some(activity) && !c.active)
                .map(|c| c.id)
                .collect())
        } else if !node.active {
            Ok(vec![id])
        } else {
            Ok(Vec::new())
        }
    }

    /// Activities of the other active executions under `id`'s concurrent root.
    pub fn active_concurrent_activities(&self, id: ExecutionId) -> Result<Vec<ActivityId>, PvmError> {
        let root = self.concurrent_root(id)?;
        let mut activities = Vec::new();
        for child in &self.node(root)?.children {
            if *child != id {
                self.collect_active_activities(*child, &mut activities);
            }
        }
        Ok(activities)
    }

    fn collect_active_activities(&self, id: ExecutionId, activities: &mut Vec<ActivityId>) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if node.active {
            if let Some(activity) = node.activity {
                activities.push(activity);
            }
        }
        for child in &node.children {
            self.collect_active_activities(*child, activities);
        }
    }

    pub fn resolve_definition(&self, key: &str) -> Result<Arc<ProcessDefinition>, PvmError> {
        self.deployments
            .as_ref()
            .and_then(|d| d.latest(key).ok().flatten())
            .ok_or_else(|| PvmError::DefinitionNotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests;
