#![allow(dead_code)]

use bpmn_pvm_core::{EngineConfig, HandlerRegistry, MemoryStore, ProcessEngine, Variables};
use serde_json::Value;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Log to the test writer; `RUST_LOG=bpmn_pvm_core=debug` shows the engine's trace.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

pub fn engine(store: Arc<MemoryStore>) -> ProcessEngine {
    engine_with(store, HandlerRegistry::new())
}

pub fn engine_with(store: Arc<MemoryStore>, handlers: HandlerRegistry) -> ProcessEngine {
    init_tracing();
    ProcessEngine::new(store, handlers, EngineConfig::default())
}

pub fn vars(pairs: &[(&str, Value)]) -> Variables {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub async fn sorted_activities(engine: &ProcessEngine, pi: uuid::Uuid) -> Vec<String> {
    let mut ids = engine.active_activity_ids(pi).await.unwrap();
    ids.sort();
    ids
}

pub const FORK_JOIN: &str = r#"
id: fork_join
nodes:
  - { kind: StartEvent, id: start }
  - { kind: ParallelGateway, id: fork }
  - { kind: UserTask, id: a }
  - { kind: UserTask, id: b }
  - { kind: ParallelGateway, id: join }
  - { kind: UserTask, id: after }
  - { kind: EndEvent, id: end }
flows:
  - { from: start, to: fork }
  - { from: fork, to: a }
  - { from: fork, to: b }
  - { from: a, to: join }
  - { from: b, to: join }
  - { from: join, to: after }
  - { from: after, to: end }
"#;
