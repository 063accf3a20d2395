//! Immutable process definition graph.
//!
//! A [`ProcessDefinition`] is compiled once per deployment and shared through
//! an `Arc` by every execution of every instance of that version. Activities
//! and transitions live in flat arenas addressed by [`ActivityId`] and
//! [`TransitionId`]; nesting (sub-processes) is expressed through parent links.

use crate::behavior::{ActivityBehavior, Condition, ExecutionListener};
use crate::error::DefinitionError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

// ─── Handles ──────────────────────────────────────────────────

/// Index of an activity inside its process definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivityId(pub(crate) usize);

/// Index of a transition inside its process definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransitionId(pub(crate) usize);

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "activity#{}", self.0)
    }
}

impl fmt::Display for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transition#{}", self.0)
    }
}

/// Listener event names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerEvent {
    Start,
    End,
    Take,
}

impl ListenerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerEvent::Start => "start",
            ListenerEvent::End => "end",
            ListenerEvent::Take => "take",
        }
    }
}

/// The element a listener is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventSource {
    Process,
    Activity(ActivityId),
    Transition(TransitionId),
}

type Listeners = Vec<(ListenerEvent, Arc<dyn ExecutionListener>)>;

fn listeners_for(listeners: &Listeners, event: ListenerEvent) -> Vec<Arc<dyn ExecutionListener>> {
    listeners
        .iter()
        .filter(|(e, _)| *e == event)
        .map(|(_, l)| l.clone())
        .collect()
}

// ─── Activity ─────────────────────────────────────────────────

/// A node of the definition graph.
pub struct Activity {
    id: String,
    kind: String,
    parent: Option<ActivityId>,
    scope: bool,
    behavior: Option<Arc<dyn ActivityBehavior>>,
    outgoing: Vec<TransitionId>,
    incoming: Vec<TransitionId>,
    activities: Vec<ActivityId>,
    initial: Option<ActivityId>,
    listeners: Listeners,
    properties: BTreeMap<String, String>,
}

impl Activity {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Type name of the activity, e.g. `userTask` or `parallelGateway`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Enclosing activity, `None` for top-level activities.
    pub fn parent(&self) -> Option<ActivityId> {
        self.parent
    }

    /// Scope activities get their own scope execution when entered.
    pub fn is_scope(&self) -> bool {
        self.scope
    }

    pub fn behavior(&self) -> Option<&Arc<dyn ActivityBehavior>> {
        self.behavior.as_ref()
    }

    pub fn outgoing(&self) -> &[TransitionId] {
        &self.outgoing
    }

    pub fn incoming(&self) -> &[TransitionId] {
        &self.incoming
    }

    /// Directly nested activities.
    pub fn activities(&self) -> &[ActivityId] {
        &self.activities
    }

    /// Initial activity of a nested scope (sub-process start event).
    pub fn initial(&self) -> Option<ActivityId> {
        self.initial
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("parent", &self.parent)
            .field("scope", &self.scope)
            .field("outgoing", &self.outgoing)
            .field("incoming", &self.incoming)
            .finish_non_exhaustive()
    }
}

// ─── Transition ───────────────────────────────────────────────

/// A directed edge (sequence flow) between two activities.
pub struct Transition {
    id: String,
    source: ActivityId,
    destination: ActivityId,
    condition: Option<Arc<dyn Condition>>,
    listeners: Vec<Arc<dyn ExecutionListener>>,
}

impl Transition {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> ActivityId {
        self.source
    }

    pub fn destination(&self) -> ActivityId {
        self.destination
    }

    pub fn condition(&self) -> Option<&Arc<dyn Condition>> {
        self.condition.as_ref()
    }

    /// Listeners notified with the `take` event.
    pub fn listeners(&self) -> &[Arc<dyn ExecutionListener>] {
        &self.listeners
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("conditional", &self.condition.is_some())
            .finish_non_exhaustive()
    }
}

// ─── ProcessDefinition ────────────────────────────────────────

/// Immutable, shareable process graph.
pub struct ProcessDefinition {
    key: String,
    version: u32,
    name: Option<String>,
    activities: Vec<Activity>,
    transitions: Vec<Transition>,
    top_level: Vec<ActivityId>,
    initial: ActivityId,
    listeners: Listeners,
    index: HashMap<String, ActivityId>,
    checksum: Option<String>,
}

impl ProcessDefinition {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Deployment-unique id, `key:version`.
    pub fn id(&self) -> String {
        format!("{}:{}", self.key, self.version)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Hex SHA-256 of the source the definition was compiled from, if any.
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    pub fn initial(&self) -> ActivityId {
        self.initial
    }

    /// Panics on a handle from a different definition; use
    /// [`try_activity`](Self::try_activity) for unchecked input.
    pub fn activity(&self, id: ActivityId) -> &Activity {
        &self.activities[id.0]
    }

    pub fn try_activity(&self, id: ActivityId) -> Option<&Activity> {
        self.activities.get(id.0)
    }

    pub fn transition(&self, id: TransitionId) -> &Transition {
        &self.transitions[id.0]
    }

    pub fn try_transition(&self, id: TransitionId) -> Option<&Transition> {
        self.transitions.get(id.0)
    }

    pub fn find_activity(&self, id: &str) -> Option<ActivityId> {
        self.index.get(id).copied()
    }

    pub fn find_transition(&self, id: &str) -> Option<TransitionId> {
        self.transitions
            .iter()
            .position(|t| t.id == id)
            .map(TransitionId)
    }

    pub fn activities(&self) -> impl Iterator<Item = (ActivityId, &Activity)> {
        self.activities
            .iter()
            .enumerate()
            .map(|(i, a)| (ActivityId(i), a))
    }

    pub fn top_level_activities(&self) -> &[ActivityId] {
        &self.top_level
    }

    /// Listeners registered on the process itself or on an activity.
    pub(crate) fn listeners(
        &self,
        source: EventSource,
        event: ListenerEvent,
    ) -> Vec<Arc<dyn ExecutionListener>> {
        match source {
            EventSource::Process => listeners_for(&self.listeners, event),
            EventSource::Activity(a) => listeners_for(&self.activity(a).listeners, event),
            EventSource::Transition(t) => self.transition(t).listeners.clone(),
        }
    }

    /// Activities from the top level down to (and including) `initial`.
    pub fn initial_activity_stack(&self, initial: ActivityId) -> Vec<ActivityId> {
        let mut stack = vec![initial];
        let mut current = self.activity(initial).parent;
        while let Some(parent) = current {
            stack.push(parent);
            current = self.activity(parent).parent;
        }
        stack.reverse();
        stack
    }

    /// Whether `activity` is nested (at any depth) inside `scope`.
    /// `None` stands for the process itself, which contains everything.
    pub fn contains(&self, scope: Option<ActivityId>, activity: ActivityId) -> bool {
        let Some(scope) = scope else {
            return true;
        };
        let mut current = self.activity(activity).parent;
        while let Some(parent) = current {
            if parent == scope {
                return true;
            }
            current = self.activity(parent).parent;
        }
        false
    }

    /// The outermost activity on the path from `outer` down to `destination`.
    pub fn find_next_scope(&self, outer: Option<ActivityId>, destination: ActivityId) -> ActivityId {
        let mut next = destination;
        while let Some(parent) = self.activity(next).parent {
            if Some(parent) == outer {
                break;
            }
            next = parent;
        }
        next
    }

    /// Whether `target` can be reached from `source` following outgoing
    /// transitions and the initial activities of nested scopes.
    pub fn is_reachable(&self, source: ActivityId, target: ActivityId) -> bool {
        let mut seen = HashSet::new();
        let mut pending = vec![source];
        while let Some(current) = pending.pop() {
            if !seen.insert(current) {
                continue;
            }
            let activity = self.activity(current);
            for &t in &activity.outgoing {
                let dest = self.transition(t).destination;
                if dest == target {
                    return true;
                }
                pending.push(dest);
            }
            if let Some(inner) = activity.initial {
                if inner == target {
                    return true;
                }
                pending.push(inner);
            }
            // leaving a nested scope continues with the scope's own outgoing flows
            if activity.outgoing.is_empty() {
                if let Some(parent) = activity.parent {
                    pending.push(parent);
                }
            }
        }
        false
    }

    pub(crate) fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub(crate) fn with_checksum(mut self, checksum: String) -> Self {
        self.checksum = Some(checksum);
        self
    }
}

impl fmt::Debug for ProcessDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessDefinition")
            .field("key", &self.key)
            .field("version", &self.version)
            .field("activities", &self.activities.len())
            .field("transitions", &self.transitions.len())
            .finish_non_exhaustive()
    }
}

// ─── Builder ──────────────────────────────────────────────────

struct PendingTransition {
    id: String,
    source: ActivityId,
    destination: String,
    condition: Option<Arc<dyn Condition>>,
    listeners: Vec<Arc<dyn ExecutionListener>>,
}

/// Fluent builder mirroring the nesting of the process:
///
/// ```ignore
/// let definition = ProcessDefinitionBuilder::new("order")
///     .create_activity("start").initial().behavior(Automatic).transition("review").end_activity()
///     .create_activity("review").behavior(WaitState).transition("end").end_activity()
///     .create_activity("end").behavior(NoneEndEvent).end_activity()
///     .build()?;
/// ```
///
/// Errors are collected while building and reported by [`build`](Self::build).
pub struct ProcessDefinitionBuilder {
    key: String,
    name: Option<String>,
    activities: Vec<Activity>,
    transitions: Vec<PendingTransition>,
    stack: Vec<ActivityId>,
    top_level: Vec<ActivityId>,
    initial: Option<ActivityId>,
    listeners: Listeners,
    index: HashMap<String, ActivityId>,
    error: Option<DefinitionError>,
}

impl ProcessDefinitionBuilder {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            activities: Vec::new(),
            transitions: Vec::new(),
            stack: Vec::new(),
            top_level: Vec::new(),
            initial: None,
            listeners: Vec::new(),
            index: HashMap::new(),
            error: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Open a new activity nested in the currently open one.
    pub fn create_activity(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        let handle = ActivityId(self.activities.len());
        if self.index.insert(id.clone(), handle).is_some() {
            self.fail(DefinitionError::DuplicateActivity(id.clone()));
        }
        let parent = self.stack.last().copied();
        match parent {
            Some(p) => self.activities[p.0].activities.push(handle),
            None => self.top_level.push(handle),
        }
        self.activities.push(Activity {
            id,
            kind: "activity".to_string(),
            parent,
            scope: false,
            behavior: None,
            outgoing: Vec::new(),
            incoming: Vec::new(),
            activities: Vec::new(),
            initial: None,
            listeners: Vec::new(),
            properties: BTreeMap::new(),
        });
        self.stack.push(handle);
        self
    }

    /// Close the currently open activity.
    pub fn end_activity(mut self) -> Self {
        if self.stack.pop().is_none() {
            self.fail(DefinitionError::UnbalancedBuilder);
        }
        self
    }

    /// Mark the open activity as the initial activity of its enclosing scope.
    pub fn initial(mut self) -> Self {
        if let Some(current) = self.stack.last().copied() {
            match self.activities[current.0].parent {
                Some(parent) => self.activities[parent.0].initial = Some(current),
                None => self.initial = Some(current),
            }
        }
        self
    }

    pub fn scope(mut self) -> Self {
        if let Some(activity) = self.current_mut() {
            activity.scope = true;
        }
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        if let Some(activity) = self.current_mut() {
            activity.kind = kind.into();
        }
        self
    }

    pub fn behavior(self, behavior: impl ActivityBehavior + 'static) -> Self {
        self.behavior_arc(Arc::new(behavior))
    }

    pub fn behavior_arc(mut self, behavior: Arc<dyn ActivityBehavior>) -> Self {
        if let Some(activity) = self.current_mut() {
            activity.behavior = Some(behavior);
        }
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(activity) = self.current_mut() {
            activity.properties.insert(name.into(), value.into());
        }
        self
    }

    /// Outgoing transition from the open activity; the destination is
    /// resolved by id when the definition is built.
    pub fn transition(self, destination: impl Into<String>) -> Self {
        let destination = destination.into();
        let id = match self.stack.last() {
            Some(a) => format!("{}->{}", self.activities[a.0].id, destination),
            None => format!("->{destination}"),
        };
        self.transition_with_id(id, destination)
    }

    pub fn transition_with_id(mut self, id: impl Into<String>, destination: impl Into<String>) -> Self {
        match self.stack.last().copied() {
            Some(source) => self.transitions.push(PendingTransition {
                id: id.into(),
                source,
                destination: destination.into(),
                condition: None,
                listeners: Vec::new(),
            }),
            None => self.fail(DefinitionError::UnbalancedBuilder),
        }
        self
    }

    /// Guard the most recently declared transition.
    pub fn condition(self, condition: impl Condition + 'static) -> Self {
        self.condition_arc(Arc::new(condition))
    }

    pub fn condition_arc(mut self, condition: Arc<dyn Condition>) -> Self {
        if let Some(t) = self.transitions.last_mut() {
            t.condition = Some(condition);
        }
        self
    }

    /// `take` listener on the most recently declared transition.
    pub fn take_listener(mut self, listener: impl ExecutionListener + 'static) -> Self {
        if let Some(t) = self.transitions.last_mut() {
            t.listeners.push(Arc::new(listener));
        }
        self
    }

    /// Listener on the open activity, or on the process when no activity is open.
    pub fn listener(self, event: ListenerEvent, listener: impl ExecutionListener + 'static) -> Self {
        self.listener_arc(event, Arc::new(listener))
    }

    pub fn listener_arc(mut self, event: ListenerEvent, listener: Arc<dyn ExecutionListener>) -> Self {
        match self.stack.last().copied() {
            Some(a) => self.activities[a.0].listeners.push((event, listener)),
            None => self.listeners.push((event, listener)),
        }
        self
    }

    pub fn build(mut self) -> Result<ProcessDefinition, DefinitionError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        if !self.stack.is_empty() {
            return Err(DefinitionError::UnbalancedBuilder);
        }
        let initial = self
            .initial
            .ok_or_else(|| DefinitionError::MissingInitial(self.key.clone()))?;

        let mut transitions = Vec::with_capacity(self.transitions.len());
        for (i, pending) in self.transitions.into_iter().enumerate() {
            let destination = *self.index.get(&pending.destination).ok_or_else(|| {
                DefinitionError::UnknownDestination {
                    transition: pending.id.clone(),
                    activity: pending.destination.clone(),
                }
            })?;
            let handle = TransitionId(i);
            self.activities[pending.source.0].outgoing.push(handle);
            self.activities[destination.0].incoming.push(handle);
            transitions.push(Transition {
                id: pending.id,
                source: pending.source,
                destination,
                condition: pending.condition,
                listeners: pending.listeners,
            });
        }

        Ok(ProcessDefinition {
            key: self.key,
            version: 1,
            name: self.name,
            activities: self.activities,
            transitions,
            top_level: self.top_level,
            initial,
            listeners: self.listeners,
            index: self.index,
            checksum: None,
        })
    }

    fn current_mut(&mut self) -> Option<&mut Activity> {
        let current = self.stack.last().copied()?;
        self.activities.get_mut(current.0)
    }

    fn fail(&mut self, err: DefinitionError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}
