use super::*;
use crate::behavior::{ActivityBehavior, ExecutionListener};
use crate::bpmn::{
    Automatic, CallActivity, EmbeddedSubProcess, NoneEndEvent, ParallelGateway, WaitState,
};
use crate::definition::ProcessDefinitionBuilder;
use crate::error::BehaviorError;
use serde_json::json;
use std::sync::Mutex;

type Log = Arc<Mutex<Vec<String>>>;

fn recorder(log: &Log, label: &str) -> impl ExecutionListener + 'static {
    let log = log.clone();
    let label = label.to_string();
    move |execution: &mut dyn EventListenerExecution| -> Result<(), BehaviorError> {
        let event = execution.event_name().map_or("?", |e| e.as_str());
        log.lock().unwrap().push(format!("{label}:{event}"));
        Ok(())
    }
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn sequential() -> Arc<ProcessDefinition> {
    Arc::new(
        ProcessDefinitionBuilder::new("sequential")
            .create_activity("start")
            .initial()
            .behavior(Automatic)
            .transition("review")
            .end_activity()
            .create_activity("review")
            .behavior(WaitState)
            .transition("end")
            .end_activity()
            .create_activity("end")
            .behavior(NoneEndEvent)
            .end_activity()
            .build()
            .unwrap(),
    )
}

fn nested(log: &Log) -> Arc<ProcessDefinition> {
    Arc::new(
        ProcessDefinitionBuilder::new("nested")
            .listener(ListenerEvent::End, recorder(log, "process"))
            .create_activity("start")
            .initial()
            .behavior(Automatic)
            .transition("sub")
            .end_activity()
            .create_activity("sub")
            .scope()
            .behavior(EmbeddedSubProcess)
            .listener(ListenerEvent::Start, recorder(log, "sub"))
            .listener(ListenerEvent::End, recorder(log, "sub"))
            .create_activity("sub_start")
            .initial()
            .behavior(Automatic)
            .transition("inner")
            .end_activity()
            .create_activity("inner")
            .behavior(WaitState)
            .listener(ListenerEvent::End, recorder(log, "inner"))
            .end_activity()
            .transition("end")
            .end_activity()
            .create_activity("end")
            .behavior(NoneEndEvent)
            .end_activity()
            .build()
            .unwrap(),
    )
}

/// `start` forks into `a` and `b`, both waiting, joined before `end`.
fn fork_join() -> Arc<ProcessDefinition> {
    Arc::new(
        ProcessDefinitionBuilder::new("fork_join")
            .create_activity("start")
            .initial()
            .behavior(Automatic)
            .transition("fork")
            .end_activity()
            .create_activity("fork")
            .behavior(ParallelGateway)
            .transition("a")
            .transition("b")
            .end_activity()
            .create_activity("a")
            .behavior(WaitState)
            .transition("join")
            .end_activity()
            .create_activity("b")
            .behavior(WaitState)
            .transition("join")
            .end_activity()
            .create_activity("join")
            .behavior(ParallelGateway)
            .transition("end")
            .end_activity()
            .create_activity("end")
            .behavior(NoneEndEvent)
            .end_activity()
            .build()
            .unwrap(),
    )
}

/// Wait state `g` with three outgoing flows to wait states `x`, `y`, `z`;
/// `x` leads on to `p` and `q`.
fn branching() -> Arc<ProcessDefinition> {
    let mut builder = ProcessDefinitionBuilder::new("branching")
        .create_activity("g")
        .initial()
        .behavior(WaitState)
        .transition("x")
        .transition("y")
        .transition("z")
        .end_activity()
        .create_activity("x")
        .behavior(WaitState)
        .transition("p")
        .transition("q")
        .end_activity();
    for id in ["y", "z", "p", "q"] {
        builder = builder.create_activity(id).behavior(WaitState).end_activity();
    }
    Arc::new(builder.build().unwrap())
}

fn transition(def: &ProcessDefinition, id: &str) -> TransitionId {
    def.find_transition(id).unwrap()
}

fn activity_of(tree: &ExecutionTree, id: ExecutionId) -> Option<String> {
    tree.node(id).unwrap().activity_id().map(str::to_string)
}

/// Instance of [`branching`] fanned out into `x`, `y` and `z`.
fn fanned_out() -> (ExecutionTree, Arc<ProcessDefinition>, ExecutionId, Vec<ExecutionId>) {
    let def = branching();
    let mut tree = ExecutionTree::new();
    let root = tree.create_process_instance(def.clone(), None);
    tree.start(root).unwrap();
    let out = [
        transition(&def, "g->x"),
        transition(&def, "g->y"),
        transition(&def, "g->z"),
    ];
    tree.take_all(root, &out, &[root]).unwrap();
    let children = tree.node(root).unwrap().children().to_vec();
    (tree, def, root, children)
}

struct Failing;

impl ActivityBehavior for Failing {
    fn execute(&self, _execution: &mut dyn ActivityExecution) -> Result<(), BehaviorError> {
        Err(BehaviorError::failed("boom"))
    }
}

// ─── Sequential flow ──────────────────────────────────────────

#[test]
fn test_sequential_flow_waits_then_ends() {
    let mut tree = ExecutionTree::new();
    let root = tree.create_process_instance(sequential(), Some("order-7".into()));
    tree.start(root).unwrap();

    assert_eq!(activity_of(&tree, root).as_deref(), Some("review"));
    assert_eq!(tree.find_active_activity_ids(root), vec!["review".to_string()]);
    assert!(!tree.node(root).unwrap().is_ended());

    tree.signal(root, "continue", None).unwrap();
    let node = tree.node(root).unwrap();
    assert!(node.is_ended());
    assert!(!node.is_active());
    assert!(tree
        .events()
        .iter()
        .any(|(_, e)| matches!(e, RuntimeEvent::ProcessEnded { delete_reason: None, .. })));
}

#[test]
fn test_listener_order_along_a_path() {
    let log: Log = Arc::default();
    let def = Arc::new(
        ProcessDefinitionBuilder::new("listeners")
            .listener(ListenerEvent::Start, recorder(&log, "process"))
            .listener(ListenerEvent::End, recorder(&log, "process"))
            .create_activity("start")
            .initial()
            .behavior(Automatic)
            .listener(ListenerEvent::Start, recorder(&log, "start"))
            .listener(ListenerEvent::End, recorder(&log, "start"))
            .transition("end")
            .take_listener(recorder(&log, "flow"))
            .end_activity()
            .create_activity("end")
            .behavior(NoneEndEvent)
            .listener(ListenerEvent::Start, recorder(&log, "end"))
            .listener(ListenerEvent::End, recorder(&log, "end"))
            .end_activity()
            .build()
            .unwrap(),
    );
    let mut tree = ExecutionTree::new();
    let root = tree.create_process_instance(def, None);
    tree.start(root).unwrap();

    assert_eq!(
        entries(&log),
        vec![
            "process:start",
            "start:start",
            "start:end",
            "flow:take",
            "end:start",
            "end:end",
            "process:end",
        ]
    );
    assert!(tree.node(root).unwrap().is_ended());
}

#[test]
fn test_long_automatic_chain_runs_in_one_loop() {
    let mut builder = ProcessDefinitionBuilder::new("chain");
    for i in 0..2000 {
        builder = builder.create_activity(format!("a{i}")).behavior(Automatic);
        if i == 0 {
            builder = builder.initial();
        }
        builder = builder.transition(format!("a{}", i + 1)).end_activity();
    }
    let def = Arc::new(
        builder
            .create_activity("a2000")
            .behavior(NoneEndEvent)
            .end_activity()
            .build()
            .unwrap(),
    );
    let mut tree = ExecutionTree::new();
    let root = tree.create_process_instance(def, None);
    tree.start(root).unwrap();
    assert!(tree.node(root).unwrap().is_ended());
}

// ─── Scopes ───────────────────────────────────────────────────

#[test]
fn test_embedded_sub_process_creates_and_destroys_scope() {
    let log: Log = Arc::default();
    let mut tree = ExecutionTree::new();
    let root = tree.create_process_instance(nested(&log), None);
    tree.start(root).unwrap();

    let root_node = tree.node(root).unwrap();
    assert!(!root_node.is_active());
    assert_eq!(root_node.activity(), None);
    let [scope] = root_node.children() else {
        panic!("expected one scope execution");
    };
    let scope = *scope;
    assert!(tree.node(scope).unwrap().is_scope());
    assert_eq!(activity_of(&tree, scope).as_deref(), Some("inner"));
    assert_eq!(tree.find_active_activity_ids(root), vec!["inner".to_string()]);

    tree.set_variable_local(scope, "draft", json!(true)).unwrap();
    tree.signal(scope, "done", None).unwrap();

    assert!(tree.node(scope).unwrap().is_removed());
    assert!(tree.node(scope).unwrap().variables_local().is_empty());
    assert!(tree.node(root).unwrap().is_ended());
    assert_eq!(entries(&log), vec!["sub:start", "inner:end", "sub:end", "process:end"]);
}

#[test]
fn test_start_at_nested_initial_enters_scopes() {
    let log: Log = Arc::default();
    let def = nested(&log);
    let inner = def.find_activity("inner").unwrap();
    let mut tree = ExecutionTree::new();
    let root = tree
        .create_process_instance_for_initial(def, inner, None)
        .unwrap();
    tree.start(root).unwrap();

    let scope = tree.node(root).unwrap().children()[0];
    assert_eq!(activity_of(&tree, scope).as_deref(), Some("inner"));
    assert_eq!(entries(&log), vec!["sub:start"]);
}

// ─── takeAll ──────────────────────────────────────────────────

#[test]
fn test_parallel_fork_and_join() {
    let def = fork_join();
    let mut tree = ExecutionTree::new();
    let root = tree.create_process_instance(def, None);
    tree.start(root).unwrap();

    let children = tree.node(root).unwrap().children().to_vec();
    assert_eq!(children.len(), 2);
    assert!(!tree.node(root).unwrap().is_active());
    for child in &children {
        let node = tree.node(*child).unwrap();
        assert!(node.is_concurrent() && node.is_active() && !node.is_scope());
    }
    assert_eq!(tree.find_active_activity_ids(root), vec!["a".to_string(), "b".to_string()]);

    tree.signal(children[0], "done", None).unwrap();
    assert_eq!(activity_of(&tree, children[0]).as_deref(), Some("join"));
    assert!(!tree.node(children[0]).unwrap().is_active());
    assert!(!tree.node(root).unwrap().is_ended());

    tree.signal(children[1], "done", None).unwrap();
    assert!(tree.node(root).unwrap().is_ended());
    assert!(tree.node(root).unwrap().children().is_empty());
    let pruned = tree
        .events()
        .iter()
        .filter(|(_, e)| matches!(e, RuntimeEvent::ExecutionPruned { .. }))
        .count();
    assert_eq!(pruned, 2);

    let err = tree.signal(children[0], "again", None).unwrap_err();
    assert!(matches!(err, PvmError::ExecutionRemoved(id) if id == children[0]));
}

#[test]
fn test_fan_out_creates_one_execution_per_transition() {
    let (tree, _, root, children) = fanned_out();
    assert_eq!(children.len(), 3);
    let root_node = tree.node(root).unwrap();
    assert!(!root_node.is_active());
    assert!(!root_node.is_concurrent());
    let activities: Vec<_> = children.iter().map(|c| activity_of(&tree, *c).unwrap()).collect();
    assert_eq!(activities, vec!["x", "y", "z"]);
    for child in children {
        let node = tree.node(child).unwrap();
        assert!(node.is_concurrent() && node.is_active());
        assert_eq!(node.parent(), Some(root));
    }
}

#[test]
fn test_recyclables_are_reused_before_creating() {
    let (mut tree, def, root, children) = fanned_out();
    let (cx, cy, cz) = (children[0], children[1], children[2]);
    let out = [transition(&def, "x->p"), transition(&def, "x->q")];
    tree.take_all(cx, &out, &[cx, cy]).unwrap();

    assert_eq!(tree.node(root).unwrap().children(), &[cx, cy, cz]);
    assert_eq!(activity_of(&tree, cx).as_deref(), Some("p"));
    assert_eq!(activity_of(&tree, cy).as_deref(), Some("q"));
    assert_eq!(activity_of(&tree, cz).as_deref(), Some("z"));
}

#[test]
fn test_surplus_recyclables_end() {
    let (mut tree, def, root, children) = fanned_out();
    let (cx, cy, cz) = (children[0], children[1], children[2]);
    tree.take_all(cx, &[transition(&def, "x->p")], &[cx, cy]).unwrap();

    assert_eq!(tree.node(root).unwrap().children(), &[cx, cz]);
    assert_eq!(activity_of(&tree, cx).as_deref(), Some("p"));
    let surplus = tree.node(cy).unwrap();
    assert!(surplus.is_removed() && surplus.is_ended());
    assert!(!tree.node(root).unwrap().is_active());
}

#[test]
fn test_fewer_recyclables_than_transitions_creates_the_rest() {
    let (mut tree, def, root, children) = fanned_out();
    let (cx, cy, cz) = (children[0], children[1], children[2]);
    let events_before = tree.events().len();
    let out = [transition(&def, "x->p"), transition(&def, "x->q")];
    tree.take_all(cx, &out, &[cy]).unwrap();

    let now = tree.node(root).unwrap().children().to_vec();
    assert_eq!(now.len(), 4);
    assert_eq!(&now[..3], &[cx, cy, cz]);
    assert_eq!(activity_of(&tree, cy).as_deref(), Some("p"));
    assert_eq!(activity_of(&tree, now[3]).as_deref(), Some("q"));
    let created = tree.node(now[3]).unwrap();
    assert!(created.is_concurrent() && created.is_active() && !created.is_scope());
    // the caller was not offered for reuse and stays where it was
    assert_eq!(activity_of(&tree, cx).as_deref(), Some("x"));
    assert!(!tree
        .events()
        .iter()
        .skip(events_before)
        .any(|(_, e)| matches!(e, RuntimeEvent::ExecutionPruned { .. })));
}

#[test]
fn test_ended_recyclable_is_not_reused() {
    let (mut tree, def, root, children) = fanned_out();
    let (cx, cy, cz) = (children[0], children[1], children[2]);
    {
        let node = tree.node_mut(cy).unwrap();
        node.active = false;
        node.ended = true;
    }
    let out = [transition(&def, "x->p"), transition(&def, "x->q")];
    tree.take_all(cx, &out, &[cx, cy]).unwrap();

    let now = tree.node(root).unwrap().children().to_vec();
    assert_eq!(now.len(), 3);
    assert_eq!(&now[..2], &[cx, cz]);
    assert!(tree.node(cy).unwrap().is_removed());
    assert_eq!(activity_of(&tree, cx).as_deref(), Some("p"));
    assert_eq!(activity_of(&tree, now[2]).as_deref(), Some("q"));
    let mut active = tree.find_active_activity_ids(root);
    active.sort();
    assert_eq!(active, vec!["p".to_string(), "q".to_string(), "z".to_string()]);
    assert!(tree.events().iter().any(|(_, e)| matches!(
        e,
        RuntimeEvent::ExecutionPruned { execution, replaced_by: None } if *execution == cy.as_uuid()
    )));
}

#[test]
fn test_zero_transitions_end_every_recyclable() {
    let (mut tree, _, root, children) = fanned_out();
    let (cx, cy) = (children[0], children[1]);
    tree.take_all(cx, &[], &[cx, cy]).unwrap();

    assert!(tree.node(cx).unwrap().is_ended());
    assert!(tree.node(cy).unwrap().is_ended());
    assert!(!tree.node(root).unwrap().is_ended());
    assert_eq!(tree.find_active_activity_ids(root), vec!["z".to_string()]);
}

#[test]
fn test_join_from_caller_outside_recyclables_collapses_when_alone() {
    let def = branching();
    let mut tree = ExecutionTree::new();
    let root = tree.create_process_instance(def.clone(), None);
    tree.start(root).unwrap();
    tree.take_all(root, &[transition(&def, "g->x"), transition(&def, "g->y")], &[root])
        .unwrap();
    let children = tree.node(root).unwrap().children().to_vec();
    let (arriving, parked) = (children[0], children[1]);
    tree.set_active(parked, false).unwrap();

    tree.take_all(arriving, &[transition(&def, "x->p")], &[parked]).unwrap();

    let root_node = tree.node(root).unwrap();
    assert!(root_node.children().is_empty());
    assert!(root_node.is_active() && !root_node.is_concurrent());
    assert_eq!(activity_of(&tree, root).as_deref(), Some("p"));
    for c in [arriving, parked] {
        let node = tree.node(c).unwrap();
        assert!(node.is_removed() && node.is_ended());
    }
}

#[test]
fn test_join_from_caller_outside_recyclables_fans_out_while_others_active() {
    let (mut tree, def, root, children) = fanned_out();
    let (cx, cy, cz) = (children[0], children[1], children[2]);
    tree.set_active(cy, false).unwrap();

    tree.take_all(cx, &[transition(&def, "x->p")], &[cy]).unwrap();

    assert_eq!(tree.node(root).unwrap().children(), &[cx, cy, cz]);
    assert!(!tree.node(root).unwrap().is_active());
    assert_eq!(activity_of(&tree, cy).as_deref(), Some("p"));
    assert!(tree.node(cy).unwrap().is_concurrent() && tree.node(cy).unwrap().is_active());
    assert_eq!(activity_of(&tree, cx).as_deref(), Some("x"));
    assert_eq!(activity_of(&tree, cz).as_deref(), Some("z"));
}

#[test]
fn test_single_transition_with_others_active_keeps_concurrency() {
    let (mut tree, def, root, children) = fanned_out();
    let cx = children[0];
    tree.take_all(cx, &[transition(&def, "x->p")], &[cx]).unwrap();

    assert_eq!(tree.node(root).unwrap().children().len(), 3);
    assert!(!tree.node(root).unwrap().is_active());
    assert!(tree.node(cx).unwrap().is_concurrent());
    assert_eq!(activity_of(&tree, cx).as_deref(), Some("p"));
}

#[test]
fn test_single_transition_without_others_collapses_into_root() {
    let (mut tree, def, root, children) = fanned_out();
    let (cx, cy, cz) = (children[0], children[1], children[2]);
    tree.set_active(cy, false).unwrap();
    tree.set_active(cz, false).unwrap();
    tree.take_all(cx, &[transition(&def, "x->p")], &[cx, cy, cz]).unwrap();

    let root_node = tree.node(root).unwrap();
    assert!(root_node.children().is_empty());
    assert!(root_node.is_active() && !root_node.is_concurrent());
    assert_eq!(activity_of(&tree, root).as_deref(), Some("p"));
    for c in [cx, cy, cz] {
        let node = tree.node(c).unwrap();
        assert!(node.is_removed() && node.is_ended());
    }
}

#[test]
fn test_joining_scope_executions_is_rejected_without_mutation() {
    let (mut tree, def, root, children) = fanned_out();
    let (cx, cy) = (children[0], children[1]);
    tree.node_mut(cy).unwrap().scope = true;
    let events_before = tree.events().len();

    let err = tree
        .take_all(cx, &[transition(&def, "x->p")], &[cx, cy])
        .unwrap_err();
    assert!(matches!(err, PvmError::ScopeJoin));
    assert_eq!(tree.node(root).unwrap().children(), children.as_slice());
    assert_eq!(activity_of(&tree, cx).as_deref(), Some("x"));
    assert_eq!(activity_of(&tree, cy).as_deref(), Some("y"));
    assert!(tree.node(cx).unwrap().is_active());
    assert_eq!(tree.events().len(), events_before);
}

#[test]
fn test_unknown_transition_is_rejected() {
    let (mut tree, _, _, children) = fanned_out();
    let err = tree
        .take_all(children[0], &[TransitionId(99)], &[children[0]])
        .unwrap_err();
    assert!(matches!(err, PvmError::UnknownTransition { .. }));
    let err = tree.take(children[0], TransitionId(99)).unwrap_err();
    assert!(matches!(err, PvmError::UnknownTransition { .. }));
}

// ─── Deletion ─────────────────────────────────────────────────

#[test]
fn test_delete_cascade_fires_end_listeners_leaf_first() {
    let log: Log = Arc::default();
    let mut tree = ExecutionTree::new();
    let root = tree.create_process_instance(nested(&log), None);
    tree.start(root).unwrap();
    let scope = tree.node(root).unwrap().children()[0];
    log.lock().unwrap().clear();

    tree.delete_cascade(root, "cancelled").unwrap();

    assert_eq!(entries(&log), vec!["inner:end", "sub:end", "process:end"]);
    let root_node = tree.node(root).unwrap();
    assert!(root_node.is_ended());
    assert_eq!(root_node.delete_reason(), Some("cancelled"));
    assert!(root_node.children().is_empty());
    assert!(tree.node(scope).unwrap().is_removed());
    assert!(tree.events().iter().any(|(_, e)| matches!(
        e,
        RuntimeEvent::ProcessEnded { delete_reason: Some(r), .. } if r == "cancelled"
    )));
}

#[test]
fn test_delete_cascade_removes_concurrent_children() {
    let (mut tree, _, root, children) = fanned_out();
    tree.delete_cascade(root, "deleted").unwrap();
    assert!(tree.node(root).unwrap().is_ended());
    for child in children {
        assert!(tree.node(child).unwrap().is_removed());
    }
}

// ─── Call activities ──────────────────────────────────────────

fn called() -> ProcessDefinition {
    ProcessDefinitionBuilder::new("child")
        .create_activity("task")
        .initial()
        .behavior(WaitState)
        .transition("done")
        .end_activity()
        .create_activity("done")
        .behavior(NoneEndEvent)
        .end_activity()
        .build()
        .unwrap()
}

fn calling() -> Arc<ProcessDefinition> {
    Arc::new(
        ProcessDefinitionBuilder::new("parent")
            .create_activity("call")
            .initial()
            .behavior(CallActivity::new("child").input("amount", "amount").output("result", "result"))
            .transition("after")
            .end_activity()
            .create_activity("after")
            .behavior(WaitState)
            .end_activity()
            .build()
            .unwrap(),
    )
}

#[test]
fn test_call_activity_maps_variables_both_ways() {
    let deployments = Arc::new(DeploymentCache::new());
    deployments.deploy(called()).unwrap();
    let mut tree = ExecutionTree::new().with_deployments(deployments);
    let root = tree.create_process_instance(calling(), None);
    tree.set_variable_local(root, "amount", json!(5)).unwrap();
    tree.start(root).unwrap();

    let sub = tree.node(root).unwrap().sub_process_instance().unwrap();
    assert_eq!(tree.node(sub).unwrap().super_execution(), Some(root));
    assert_eq!(tree.get_variable(sub, "amount"), Some(json!(5)));
    assert_eq!(tree.call_depth(sub).unwrap(), 1);

    tree.set_variable(sub, "result", json!(10)).unwrap();
    tree.signal(sub, "done", None).unwrap();

    assert!(tree.node(sub).unwrap().is_ended());
    assert_eq!(tree.node(root).unwrap().sub_process_instance(), None);
    assert_eq!(tree.get_variable(root, "result"), Some(json!(10)));
    assert_eq!(activity_of(&tree, root).as_deref(), Some("after"));
}

#[test]
fn test_call_depth_is_bounded() {
    let deployments = Arc::new(DeploymentCache::new());
    deployments.deploy(called()).unwrap();
    let mut tree = ExecutionTree::new()
        .with_deployments(deployments)
        .with_max_call_depth(0);
    let root = tree.create_process_instance(calling(), None);
    let err = tree.start(root).unwrap_err();
    assert!(matches!(err, PvmError::CallDepthExceeded { max: 0 }));
}

#[test]
fn test_unknown_called_element() {
    let mut tree = ExecutionTree::new();
    let root = tree.create_process_instance(calling(), None);
    let err = tree.start(root).unwrap_err();
    assert!(matches!(err, PvmError::DefinitionNotFound(key) if key == "child"));
}

// ─── Errors and dispatch ──────────────────────────────────────

#[test]
fn test_dispatch_state_is_reset_after_a_failing_behavior() {
    let def = Arc::new(
        ProcessDefinitionBuilder::new("failing")
            .create_activity("start")
            .initial()
            .behavior(Automatic)
            .transition("bad")
            .end_activity()
            .create_activity("bad")
            .behavior(Failing)
            .end_activity()
            .build()
            .unwrap(),
    );
    let mut tree = ExecutionTree::new();
    let root = tree.create_process_instance(def, None);
    let err = tree.start(root).unwrap_err();
    assert!(matches!(&err, PvmError::Behavior { activity_id, .. } if activity_id == "bad"));

    let node = tree.node(root).unwrap();
    assert!(!node.is_operating());
    assert_eq!(node.next_operation(), None);
}

#[test]
fn test_take_while_taking_is_rejected() {
    let def = sequential();
    let mut tree = ExecutionTree::new();
    let root = tree.create_process_instance(def.clone(), None);
    tree.start(root).unwrap();
    let t = transition(&def, "review->end");
    tree.node_mut(root).unwrap().transition = Some(t);
    let err = tree.take(root, t).unwrap_err();
    assert!(matches!(err, PvmError::AlreadyTakingTransition { execution } if execution == root));
}

#[test]
fn test_signal_errors() {
    let def = sequential();
    let mut tree = ExecutionTree::new();
    let root = tree.create_process_instance(def.clone(), None);

    let err = tree.signal(root, "early", None).unwrap_err();
    assert!(matches!(err, PvmError::NoCurrentActivity { .. }));

    tree.node_mut(root).unwrap().activity = def.find_activity("start");
    let err = tree.signal(root, "wrong", None).unwrap_err();
    assert!(matches!(err, PvmError::NotSignallable { activity_id } if activity_id == "start"));

    let err = tree.signal(ExecutionId::from(Uuid::nil()), "nobody", None).unwrap_err();
    assert!(matches!(err, PvmError::UnknownExecution(_)));
}

#[test]
fn test_start_requires_a_process_instance() {
    let (mut tree, _, _, children) = fanned_out();
    let err = tree.start(children[0]).unwrap_err();
    assert!(matches!(err, PvmError::NotProcessInstance(_)));
}

#[test]
fn test_create_then_remove_restores_children() {
    let (mut tree, _, root, children) = fanned_out();
    let child = tree.create_execution(root).unwrap();
    assert_eq!(tree.node(child).unwrap().parent(), Some(root));
    assert_eq!(tree.node(child).unwrap().process_instance(), root);

    tree.remove(child).unwrap();
    assert_eq!(tree.node(root).unwrap().children(), children.as_slice());
    assert!(tree.node(child).unwrap().is_removed());
    // removing twice is a no-op
    tree.remove(child).unwrap();
    assert_eq!(tree.node(root).unwrap().children(), children.as_slice());
}
