//! Atomic operations and the dispatch loop that drains them.
//!
//! Every state transition of an execution is one [`AtomicOperation`].
//! Operations never call each other directly: they queue the next operation
//! on a node with [`ExecutionTree::perform_operation`]. If that node's loop
//! is already running the operation is picked up when the current one
//! returns; otherwise a loop is started for the node. This keeps arbitrarily
//! long automatic paths from growing the native stack.

use super::{ExecutionId, ExecutionMut, ExecutionTree};
use crate::definition::{ActivityId, EventSource, ListenerEvent, ProcessDefinition};
use crate::error::PvmError;
use crate::events::RuntimeEvent;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtomicOperation {
    ProcessStart,
    ProcessStartInitial,
    ProcessEnd,
    ActivityStart,
    ActivityExecute,
    ActivityEnd,
    TransitionNotifyListenerEnd,
    TransitionDestroyScope,
    TransitionNotifyListenerTake,
    TransitionCreateScope,
    TransitionNotifyListenerStart,
    DeleteCascade,
    DeleteCascadeFireActivityEnd,
}

impl AtomicOperation {
    pub fn name(&self) -> &'static str {
        match self {
            AtomicOperation::ProcessStart => "process-start",
            AtomicOperation::ProcessStartInitial => "process-start-initial",
            AtomicOperation::ProcessEnd => "process-end",
            AtomicOperation::ActivityStart => "activity-start",
            AtomicOperation::ActivityExecute => "activity-execute",
            AtomicOperation::ActivityEnd => "activity-end",
            AtomicOperation::TransitionNotifyListenerEnd => "transition-notify-listener-end",
            AtomicOperation::TransitionDestroyScope => "transition-destroy-scope",
            AtomicOperation::TransitionNotifyListenerTake => "transition-notify-listener-take",
            AtomicOperation::TransitionCreateScope => "transition-create-scope",
            AtomicOperation::TransitionNotifyListenerStart => "transition-notify-listener-start",
            AtomicOperation::DeleteCascade => "delete-cascade",
            AtomicOperation::DeleteCascadeFireActivityEnd => "delete-cascade-fire-activity-end",
        }
    }

    fn execute(self, tree: &mut ExecutionTree, id: ExecutionId) -> Result<(), PvmError> {
        match self {
            AtomicOperation::ProcessStart => process_start(tree, id),
            AtomicOperation::ProcessStartInitial => process_start_initial(tree, id),
            AtomicOperation::ProcessEnd => process_end(tree, id),
            AtomicOperation::ActivityStart => activity_start(tree, id),
            AtomicOperation::ActivityExecute => activity_execute(tree, id),
            AtomicOperation::ActivityEnd => activity_end(tree, id),
            AtomicOperation::TransitionNotifyListenerEnd => transition_notify_listener_end(tree, id),
            AtomicOperation::TransitionDestroyScope => transition_destroy_scope(tree, id),
            AtomicOperation::TransitionNotifyListenerTake => transition_notify_listener_take(tree, id),
            AtomicOperation::TransitionCreateScope => transition_create_scope(tree, id),
            AtomicOperation::TransitionNotifyListenerStart => transition_notify_listener_start(tree, id),
            AtomicOperation::DeleteCascade => delete_cascade(tree, id),
            AtomicOperation::DeleteCascadeFireActivityEnd => delete_cascade_fire_activity_end(tree, id),
        }
    }
}

// ─── Dispatch ─────────────────────────────────────────────────

/// Clears the operating flag of a node when its loop exits, including on error.
struct OperatingGuard<'t> {
    tree: &'t mut ExecutionTree,
    id: ExecutionId,
}

impl OperatingGuard<'_> {
    fn run(&mut self) -> Result<(), PvmError> {
        while let Some(operation) = self
            .tree
            .nodes
            .get_mut(&self.id)
            .and_then(|n| n.next_operation.take())
        {
            trace!(execution = %self.id, operation = operation.name(), "atomic operation");
            operation.execute(self.tree, self.id)?;
        }
        Ok(())
    }
}

impl Drop for OperatingGuard<'_> {
    fn drop(&mut self) {
        if let Some(node) = self.tree.nodes.get_mut(&self.id) {
            node.operating = false;
            node.next_operation = None;
        }
    }
}

impl ExecutionTree {
    /// Queue `operation` on `id` and run the node's loop unless it is already running.
    pub(crate) fn perform_operation(&mut self, id: ExecutionId, operation: AtomicOperation) -> Result<(), PvmError> {
        let node = self.node_mut(id)?;
        node.next_operation = Some(operation);
        if node.operating {
            return Ok(());
        }
        node.operating = true;
        let mut guard = OperatingGuard { tree: self, id };
        guard.run()
    }
}

// ─── Helpers ──────────────────────────────────────────────────

fn current_activity(tree: &ExecutionTree, id: ExecutionId) -> Result<(Arc<ProcessDefinition>, ActivityId), PvmError> {
    let node = tree.node(id)?;
    let activity = node.activity.ok_or(PvmError::NoCurrentActivity { execution: id })?;
    Ok((node.definition.clone(), activity))
}

/// Notify every listener registered for `event` on `source`, in order.
fn fire_listeners(
    tree: &mut ExecutionTree,
    id: ExecutionId,
    source: EventSource,
    event: ListenerEvent,
) -> Result<(), PvmError> {
    let definition = tree.node(id)?.definition.clone();
    let listeners = definition.listeners(source, event);
    if listeners.is_empty() {
        return Ok(());
    }
    let element_id = match source {
        EventSource::Process => definition.key().to_string(),
        EventSource::Activity(a) => definition.activity(a).id().to_string(),
        EventSource::Transition(t) => definition.transition(t).id().to_string(),
    };
    tree.node_mut(id)?.event = Some((event, source));
    let mut result = Ok(());
    for listener in listeners {
        let mut execution = ExecutionMut::new(tree, id)?;
        if let Err(err) = listener.notify(&mut execution) {
            result = Err(err.into_pvm(&element_id, None));
            break;
        }
    }
    if let Some(node) = tree.nodes.get_mut(&id) {
        node.event = None;
    }
    result
}

fn record_activity_ended(tree: &mut ExecutionTree, id: ExecutionId, definition: &ProcessDefinition, activity: ActivityId) {
    tree.record(
        id,
        RuntimeEvent::ActivityEnded {
            execution: id.as_uuid(),
            activity_id: definition.activity(activity).id().to_string(),
        },
    );
}

// ─── Process ──────────────────────────────────────────────────

fn process_start(tree: &mut ExecutionTree, id: ExecutionId) -> Result<(), PvmError> {
    let (definition, initial, event) = {
        let node = tree.node(id)?;
        let definition = node.definition.clone();
        let initial = node.starting_initial.unwrap_or(definition.initial());
        let super_execution = node.super_execution.map(|s| s.as_uuid());
        let event = RuntimeEvent::ProcessStarted {
            process_instance: id.as_uuid(),
            definition_id: definition.id(),
            business_key: node.business_key.clone(),
            super_execution,
        };
        (definition, initial, event)
    };
    tree.record(id, event);
    fire_listeners(tree, id, EventSource::Process, ListenerEvent::Start)?;

    let stack = definition.initial_activity_stack(initial);
    tree.node_mut(id)?.activity = stack.first().copied();
    tree.perform_operation(id, AtomicOperation::ProcessStartInitial)
}

fn process_start_initial(tree: &mut ExecutionTree, id: ExecutionId) -> Result<(), PvmError> {
    let (definition, activity) = current_activity(tree, id)?;
    let instance = tree.node(id)?.process_instance;
    let initial = tree
        .node(instance)?
        .starting_initial
        .unwrap_or(definition.initial());

    let target = if definition.activity(activity).is_scope() {
        let child = tree.create_execution(id)?;
        let parent = tree.node_mut(id)?;
        parent.activity = None;
        parent.active = false;
        child
    } else {
        id
    };
    fire_listeners(tree, target, EventSource::Activity(activity), ListenerEvent::Start)?;

    if activity == initial {
        tree.node_mut(instance)?.starting_initial = None;
        return tree.perform_operation(target, AtomicOperation::ActivityExecute);
    }
    let stack = definition.initial_activity_stack(initial);
    let next = stack
        .iter()
        .position(|a| *a == activity)
        .and_then(|i| stack.get(i + 1))
        .copied()
        .ok_or_else(|| PvmError::UnknownActivity {
            activity,
            definition: definition.id(),
        })?;
    tree.node_mut(target)?.activity = Some(next);
    tree.perform_operation(target, AtomicOperation::ProcessStartInitial)
}

fn process_end(tree: &mut ExecutionTree, id: ExecutionId) -> Result<(), PvmError> {
    fire_listeners(tree, id, EventSource::Process, ListenerEvent::End)?;

    let super_execution = tree.node(id)?.super_execution;
    let sub_process_behavior = match super_execution {
        Some(super_id) => {
            let (definition, activity) = current_activity(tree, super_id)?;
            let activity = definition.activity(activity);
            let behavior = activity
                .behavior()
                .filter(|b| b.as_sub_process().is_some())
                .cloned()
                .ok_or_else(|| PvmError::NotCallable {
                    activity_id: activity.id().to_string(),
                })?;
            let variables = tree.get_variables(id);
            if let Some(sub_process) = behavior.as_sub_process() {
                let mut execution = ExecutionMut::new(tree, super_id)?;
                sub_process
                    .completing(&mut execution, &variables)
                    .map_err(|e| e.into_pvm(activity.id(), None))?;
            }
            Some((super_id, behavior, activity.id().to_string()))
        }
        None => None,
    };

    {
        let node = tree.node_mut(id)?;
        node.active = false;
        node.ended = true;
    }
    tree.remove(id)?;
    let delete_reason = tree.node(id)?.delete_reason.clone();
    tree.record(
        id,
        RuntimeEvent::ProcessEnded {
            process_instance: id.as_uuid(),
            delete_reason,
        },
    );
    debug!(process_instance = %id, "process instance ended");

    if let Some((super_id, behavior, activity_id)) = sub_process_behavior {
        tree.node_mut(super_id)?.sub_process_instance = None;
        if let Some(sub_process) = behavior.as_sub_process() {
            let mut execution = ExecutionMut::new(tree, super_id)?;
            sub_process
                .completed(&mut execution)
                .map_err(|e| e.into_pvm(&activity_id, None))?;
        }
    }
    Ok(())
}

// ─── Activity ─────────────────────────────────────────────────

fn activity_start(tree: &mut ExecutionTree, id: ExecutionId) -> Result<(), PvmError> {
    let (_, activity) = current_activity(tree, id)?;
    fire_listeners(tree, id, EventSource::Activity(activity), ListenerEvent::Start)?;
    tree.perform_operation(id, AtomicOperation::ActivityExecute)
}

fn activity_execute(tree: &mut ExecutionTree, id: ExecutionId) -> Result<(), PvmError> {
    let (definition, activity) = current_activity(tree, id)?;
    let activity = definition.activity(activity);
    let behavior = activity
        .behavior()
        .cloned()
        .ok_or_else(|| PvmError::NoBehavior {
            activity_id: activity.id().to_string(),
        })?;
    tree.record(
        id,
        RuntimeEvent::ActivityStarted {
            execution: id.as_uuid(),
            activity_id: activity.id().to_string(),
            kind: activity.kind().to_string(),
        },
    );
    let mut execution = ExecutionMut::new(tree, id)?;
    behavior
        .execute(&mut execution)
        .map_err(|e| e.into_pvm(activity.id(), None))
}

fn activity_end(tree: &mut ExecutionTree, id: ExecutionId) -> Result<(), PvmError> {
    let (definition, activity) = current_activity(tree, id)?;
    fire_listeners(tree, id, EventSource::Activity(activity), ListenerEvent::End)?;
    record_activity_ended(tree, id, &definition, activity);

    let parent_activity = definition.activity(activity).parent();
    if let Some(parent_activity) = parent_activity {
        if !definition.activity(parent_activity).is_scope() {
            tree.node_mut(id)?.activity = Some(parent_activity);
            return tree.perform_operation(id, AtomicOperation::ActivityEnd);
        }
    }

    let (is_instance, scope) = {
        let node = tree.node(id)?;
        (node.is_process_instance(), node.scope)
    };
    if is_instance {
        return tree.perform_operation(id, AtomicOperation::ProcessEnd);
    }

    if scope {
        let composite = parent_activity.and_then(|pa| {
            definition
                .activity(pa)
                .behavior()
                .filter(|b| b.as_composite().is_some())
                .cloned()
                .map(|b| (pa, b))
        });
        if let Some((parent_activity, behavior)) = composite {
            let ended = definition.activity(activity);
            let target = if ended.is_scope() && ended.outgoing().is_empty() {
                let parent = tree.parent_of(id)?;
                tree.destroy(id)?;
                tree.remove(id)?;
                tree.node_mut(parent)?.activity = Some(parent_activity);
                parent
            } else {
                tree.node_mut(id)?.activity = Some(parent_activity);
                id
            };
            if let Some(composite) = behavior.as_composite() {
                let mut execution = ExecutionMut::new(tree, target)?;
                composite
                    .last_execution_ended(&mut execution)
                    .map_err(|e| e.into_pvm(definition.activity(parent_activity).id(), None))?;
            }
            return Ok(());
        }

        // the scope is done: continue ending the enclosing scope execution
        let parent = tree.parent_of(id)?;
        tree.destroy(id)?;
        tree.remove(id)?;
        if let Some(parent_activity) = parent_activity {
            tree.node_mut(parent)?.activity = Some(parent_activity);
            return tree.perform_operation(parent, AtomicOperation::ActivityEnd);
        }
        if tree.node(parent)?.is_process_instance() {
            return tree.perform_operation(parent, AtomicOperation::ProcessEnd);
        }
        tree.node_mut(parent)?.activity = Some(activity);
        return tree.perform_operation(parent, AtomicOperation::ActivityEnd);
    }

    // concurrent execution: drop it and collapse the root onto a single survivor
    let root = tree.parent_of(id)?;
    tree.remove(id)?;
    let remaining = tree.node(root)?.children.clone();
    if let [last] = remaining.as_slice() {
        if tree.node(*last)?.scope {
            tree.node_mut(*last)?.concurrent = false;
        } else {
            tree.prune_last_concurrent(*last, root)?;
        }
    }
    Ok(())
}

// ─── Transitions ──────────────────────────────────────────────

fn transition_notify_listener_end(tree: &mut ExecutionTree, id: ExecutionId) -> Result<(), PvmError> {
    let (definition, activity) = current_activity(tree, id)?;
    fire_listeners(tree, id, EventSource::Activity(activity), ListenerEvent::End)?;
    record_activity_ended(tree, id, &definition, activity);
    tree.perform_operation(id, AtomicOperation::TransitionDestroyScope)
}

fn transition_destroy_scope(tree: &mut ExecutionTree, id: ExecutionId) -> Result<(), PvmError> {
    let (definition, activity) = current_activity(tree, id)?;

    let propagating = if definition.activity(activity).is_scope() {
        let (concurrent, scope, transition) = {
            let node = tree.node(id)?;
            (node.concurrent, node.scope, node.transition)
        };
        if concurrent && !scope {
            // a concurrent execution crossing a scope boundary moves one level up
            let concurrent_root = tree.parent_of(id)?;
            let parent_scope = tree.parent_of(concurrent_root)?;
            debug!(execution = %id, parent = %parent_scope, "moving concurrent execution one scope up");
            let siblings = tree.node(parent_scope)?.children.clone();
            if let [only] = siblings.as_slice() {
                tree.node_mut(*only)?.concurrent = true;
            }
            tree.reparent(id, parent_scope)?;
            tree.node_mut(id)?.activity = Some(activity);

            let remaining = tree.node(concurrent_root)?.children.clone();
            if let [last] = remaining.as_slice() {
                if tree.node(*last)?.scope {
                    tree.node_mut(*last)?.concurrent = false;
                } else {
                    tree.prune_last_concurrent(*last, concurrent_root)?;
                }
            }
            id
        } else if concurrent && scope {
            debug!(execution = %id, "scoped concurrent execution stays under its parent");
            tree.destroy(id)?;
            id
        } else {
            let parent = tree.parent_of(id)?;
            {
                let p = tree.node_mut(parent)?;
                p.activity = Some(activity);
                p.transition = transition;
                p.active = true;
            }
            debug!(execution = %id, parent = %parent, "scope execution continues as parent");
            tree.destroy(id)?;
            tree.remove(id)?;
            parent
        }
    } else {
        id
    };

    let transition = tree
        .node(propagating)?
        .transition
        .ok_or(PvmError::NoCurrentActivity { execution: propagating })?;
    let destination = definition.transition(transition).destination();
    let next_outer = definition.activity(activity).parent();
    if !definition.contains(next_outer, destination) {
        // also leaving the enclosing scope: end it first
        tree.node_mut(propagating)?.activity = next_outer;
        tree.perform_operation(propagating, AtomicOperation::TransitionNotifyListenerEnd)
    } else {
        tree.perform_operation(propagating, AtomicOperation::TransitionNotifyListenerTake)
    }
}

fn transition_notify_listener_take(tree: &mut ExecutionTree, id: ExecutionId) -> Result<(), PvmError> {
    let (definition, activity) = current_activity(tree, id)?;
    let transition_id = tree
        .node(id)?
        .transition
        .ok_or(PvmError::NoCurrentActivity { execution: id })?;
    fire_listeners(tree, id, EventSource::Transition(transition_id), ListenerEvent::Take)?;

    let transition = definition.transition(transition_id);
    tree.record(
        id,
        RuntimeEvent::TransitionTaken {
            execution: id.as_uuid(),
            transition_id: transition.id().to_string(),
            source: definition.activity(transition.source()).id().to_string(),
            destination: definition.activity(transition.destination()).id().to_string(),
        },
    );
    let next_scope = definition.find_next_scope(definition.activity(activity).parent(), transition.destination());
    tree.node_mut(id)?.activity = Some(next_scope);
    tree.perform_operation(id, AtomicOperation::TransitionCreateScope)
}

fn transition_create_scope(tree: &mut ExecutionTree, id: ExecutionId) -> Result<(), PvmError> {
    let (definition, activity) = current_activity(tree, id)?;
    let propagating = if definition.activity(activity).is_scope() {
        let child = tree.create_execution(id)?;
        let transition = {
            let parent = tree.node_mut(id)?;
            let transition = parent.transition.take();
            parent.activity = None;
            parent.active = false;
            transition
        };
        let c = tree.node_mut(child)?;
        c.activity = Some(activity);
        c.transition = transition;
        debug!(execution = %id, scope_execution = %child, "entering scope");
        child
    } else {
        id
    };
    tree.perform_operation(propagating, AtomicOperation::TransitionNotifyListenerStart)
}

fn transition_notify_listener_start(tree: &mut ExecutionTree, id: ExecutionId) -> Result<(), PvmError> {
    let (definition, activity) = current_activity(tree, id)?;
    fire_listeners(tree, id, EventSource::Activity(activity), ListenerEvent::Start)?;

    let destination = tree
        .node(id)?
        .transition
        .map(|t| definition.transition(t).destination())
        .unwrap_or(activity);
    if activity != destination {
        let next_scope = definition.find_next_scope(Some(activity), destination);
        tree.node_mut(id)?.activity = Some(next_scope);
        tree.perform_operation(id, AtomicOperation::TransitionCreateScope)
    } else {
        let node = tree.node_mut(id)?;
        node.transition = None;
        node.activity = Some(destination);
        tree.perform_operation(id, AtomicOperation::ActivityExecute)
    }
}

// ─── Deletion ─────────────────────────────────────────────────

fn first_leaf(tree: &ExecutionTree, mut id: ExecutionId) -> Result<ExecutionId, PvmError> {
    while let Some(first) = tree.node(id)?.children.first() {
        id = *first;
    }
    Ok(id)
}

fn delete_cascade(tree: &mut ExecutionTree, id: ExecutionId) -> Result<(), PvmError> {
    let reason = tree.node(id)?.delete_reason.clone();
    let leaf = first_leaf(tree, id)?;
    if leaf != id {
        tree.node_mut(leaf)?.delete_reason = reason.clone();
    }
    if let Some(sub_instance) = tree.node(leaf)?.sub_process_instance {
        tree.delete_cascade(sub_instance, reason.as_deref().unwrap_or_default())?;
        tree.node_mut(leaf)?.sub_process_instance = None;
    }
    tree.perform_operation(leaf, AtomicOperation::DeleteCascadeFireActivityEnd)
}

fn delete_cascade_fire_activity_end(tree: &mut ExecutionTree, id: ExecutionId) -> Result<(), PvmError> {
    let (definition, activity, scope, is_instance) = {
        let node = tree.node(id)?;
        (node.definition.clone(), node.activity, node.scope, node.is_process_instance())
    };
    match activity {
        Some(a) => {
            fire_listeners(tree, id, EventSource::Activity(a), ListenerEvent::End)?;
            record_activity_ended(tree, id, &definition, a);
        }
        None if is_instance => fire_listeners(tree, id, EventSource::Process, ListenerEvent::End)?,
        None => {}
    }

    if let Some(a) = activity {
        if scope && !definition.activity(a).is_scope() {
            tree.node_mut(id)?.activity = definition.activity(a).parent();
            return tree.perform_operation(id, AtomicOperation::DeleteCascadeFireActivityEnd);
        }
    }

    if scope && !is_instance {
        tree.destroy(id)?;
    }
    tree.remove(id)?;
    let (delete_root, parent, reason) = {
        let node = tree.node_mut(id)?;
        node.active = false;
        node.ended = true;
        (node.delete_root, node.parent, node.delete_reason.clone())
    };
    if is_instance {
        if let Some(super_execution) = tree.node(id)?.super_execution {
            if let Some(s) = tree.nodes.get_mut(&super_execution) {
                if s.sub_process_instance == Some(id) {
                    s.sub_process_instance = None;
                }
            }
        }
        tree.record(
            id,
            RuntimeEvent::ProcessEnded {
                process_instance: id.as_uuid(),
                delete_reason: reason,
            },
        );
    }
    if !delete_root {
        if let Some(parent) = parent {
            return tree.perform_operation(parent, AtomicOperation::DeleteCascade);
        }
    }
    Ok(())
}
