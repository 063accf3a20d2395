mod common;

use bpmn_pvm_core::{
    EngineError, ExecutionId, ExecutionTree, MemoryStore, PersistenceSession, ProcessEngine, ProcessStore, StoreError,
    Variables,
};
use common::*;
use std::sync::Arc;
use uuid::Uuid;

async fn load(engine: &ProcessEngine, store: &MemoryStore, pi: Uuid) -> ExecutionTree {
    let records = store.find_executions_by_process_instance(pi).await.unwrap();
    let deployments = engine.deployments().clone();
    ExecutionTree::from_records(records, |id| deployments.get(id).ok().flatten())
        .unwrap()
        .with_deployments(deployments.clone())
}

async fn start_fork_join(store: &Arc<MemoryStore>) -> (ProcessEngine, Uuid) {
    let engine = engine(store.clone());
    engine.deploy_yaml(FORK_JOIN).await.unwrap();
    let pi = engine
        .start_process_instance_by_key("fork_join", None, Variables::new())
        .await
        .unwrap();
    (engine, pi)
}

#[tokio::test]
async fn test_second_writer_of_same_instance_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let (engine, pi) = start_fork_join(&store).await;
    let root = ExecutionId::from(pi);

    let mut first = load(&engine, &store, pi).await;
    let mut second = load(&engine, &store, pi).await;
    let a = first.find_execution(root, "a").unwrap();
    let b = second.find_execution(root, "b").unwrap();
    first.signal(a, "complete", None).unwrap();
    second.signal(b, "complete", None).unwrap();

    let mut session = PersistenceSession::new(store.clone());
    session.flush(&mut first);
    session.commit().await.unwrap();

    let mut stale = PersistenceSession::new(store.clone());
    stale.flush(&mut second);
    let err = stale.commit().await.unwrap_err();
    assert!(matches!(err, StoreError::OptimisticLock { .. }), "{err}");

    // the rejected change set left nothing behind
    assert_eq!(store.execution_count(), 3);
    let mut active = engine.active_activity_ids(pi).await.unwrap();
    active.sort();
    assert_eq!(active, vec!["b".to_string()]);
}

#[tokio::test]
async fn test_conflict_is_retryable_and_retry_sees_fresh_state() {
    let store = Arc::new(MemoryStore::new());
    let (engine, pi) = start_fork_join(&store).await;
    let root = ExecutionId::from(pi);

    // a competing unit of work completes branch `a` after our snapshot was taken
    let mut snapshot = load(&engine, &store, pi).await;
    let mut competing = load(&engine, &store, pi).await;
    let a = competing.find_execution(root, "a").unwrap();
    competing.signal(a, "complete", None).unwrap();
    let mut session = PersistenceSession::new(store.clone());
    session.flush(&mut competing);
    session.commit().await.unwrap();

    let b = snapshot.find_execution(root, "b").unwrap();
    snapshot.signal(b, "complete", None).unwrap();
    let mut stale = PersistenceSession::new(store.clone());
    stale.flush(&mut snapshot);
    let err = EngineError::from(stale.commit().await.unwrap_err());
    assert!(err.is_retryable());

    // the engine reloads on every command, so retrying through it succeeds
    engine.complete_task(b.as_uuid(), Variables::new()).await.unwrap();
    assert_eq!(engine.active_activity_ids(pi).await.unwrap(), vec!["after".to_string()]);
}

#[tokio::test]
async fn test_other_errors_are_not_retryable() {
    let store = Arc::new(MemoryStore::new());
    let (engine, pi) = start_fork_join(&store).await;
    let err = engine.signal(pi, "go", None).await.unwrap_err();
    // the root waits at the fork and a parallel gateway cannot be signalled
    assert!(matches!(err, EngineError::Pvm(_)), "{err}");
    assert!(!err.is_retryable());
}
