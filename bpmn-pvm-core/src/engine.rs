//! Async facade over deployments, the execution tree and the store.
//!
//! Every command is one unit of work: load the whole call hierarchy the
//! target execution belongs to, run the command on the in-memory tree, flush
//! the tree into a [`PersistenceSession`] and commit it. A failing command
//! commits nothing. Optimistic-lock conflicts surface as
//! [`EngineError::Store`]; [`EngineError::is_retryable`] tells callers when
//! re-running the command makes sense.

use crate::bpmn::{HandlerRegistry, ASSIGNEE, CANDIDATE_GROUP};
use crate::config::{model_format, EngineConfig};
use crate::definition::ProcessDefinition;
use crate::deployment::DeploymentCache;
use crate::error::{EngineError, StoreError};
use crate::events::RuntimeEvent;
use crate::model::compile_source;
use crate::runtime::{ExecutionId, ExecutionTree, IdGenerator, UuidV7Generator, Variables};
use crate::session::PersistenceSession;
use crate::store::{now_millis, DeploymentRecord, ModelFormat, ProcessStore};
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// An active user task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub execution_id: Uuid,
    pub process_instance_id: Uuid,
    pub activity_id: String,
    pub assignee: Option<String>,
    pub candidate_group: Option<String>,
}

pub struct ProcessEngine {
    store: Arc<dyn ProcessStore>,
    deployments: Arc<DeploymentCache>,
    handlers: HandlerRegistry,
    config: EngineConfig,
    id_generator: Arc<dyn IdGenerator>,
}

impl ProcessEngine {
    pub fn new(store: Arc<dyn ProcessStore>, handlers: HandlerRegistry, config: EngineConfig) -> Self {
        Self {
            store,
            deployments: Arc::new(DeploymentCache::new()),
            handlers,
            config,
            id_generator: Arc::new(UuidV7Generator),
        }
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn store(&self) -> &Arc<dyn ProcessStore> {
        &self.store
    }

    pub fn deployments(&self) -> &Arc<DeploymentCache> {
        &self.deployments
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ─── Deployment ───────────────────────────────────────────

    /// Register a definition built in code. It lives in this engine's cache
    /// only and has to be deployed again after a restart.
    pub fn deploy_definition(&self, definition: ProcessDefinition) -> Result<Arc<ProcessDefinition>, EngineError> {
        let deployed = self.deployments.deploy(definition)?;
        info!(definition = %deployed.definition.id(), "deployed definition");
        Ok(deployed.definition)
    }

    pub async fn deploy_yaml(&self, source: &str) -> Result<Arc<ProcessDefinition>, EngineError> {
        self.deploy_source(ModelFormat::Yaml, source).await
    }

    pub async fn deploy_bpmn_xml(&self, source: &str) -> Result<Arc<ProcessDefinition>, EngineError> {
        self.deploy_source(ModelFormat::BpmnXml, source).await
    }

    async fn deploy_source(&self, format: ModelFormat, source: &str) -> Result<Arc<ProcessDefinition>, EngineError> {
        let definition = compile_source(format, source, &self.handlers)?;
        let deployed = self.deployments.deploy(definition)?;
        let definition = deployed.definition;
        if deployed.is_new {
            self.store
                .save_deployment(&DeploymentRecord {
                    key: definition.key().to_string(),
                    version: definition.version(),
                    checksum: definition.checksum().unwrap_or_default().to_string(),
                    format,
                    source: source.to_string(),
                    deployed_at: now_millis(),
                })
                .await?;
            info!(definition = %definition.id(), ?format, "deployed process model");
        } else {
            debug!(definition = %definition.id(), "model unchanged, reusing deployed version");
        }
        Ok(definition)
    }

    /// Restore every deployment recorded in the store, then deploy the
    /// model files listed in the configuration.
    pub async fn bootstrap(&self) -> Result<Vec<Arc<ProcessDefinition>>, EngineError> {
        let records = self.store.list_deployments().await?;
        for record in &records {
            let definition =
                compile_source(record.format, &record.source, &self.handlers)?.with_version(record.version);
            self.deployments.restore(definition)?;
        }

        let mut deployed = Vec::with_capacity(self.config.deployments.len());
        for path in &self.config.deployments {
            let format = model_format(path)
                .ok_or_else(|| anyhow!("unsupported process model file {}", path.display()))?;
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("reading process model {}", path.display()))?;
            deployed.push(self.deploy_source(format, &source).await?);
        }
        info!(
            restored = records.len(),
            deployed = deployed.len(),
            "engine bootstrapped"
        );
        Ok(deployed)
    }

    // ─── Units of work ────────────────────────────────────────

    fn session(&self) -> PersistenceSession {
        PersistenceSession::new(self.store.clone())
            .with_history(self.config.history_enabled)
            .with_id_generator(self.id_generator.clone())
    }

    fn prepare(&self, tree: ExecutionTree) -> ExecutionTree {
        tree.with_id_generator(self.id_generator.clone())
            .with_deployments(self.deployments.clone())
            .with_max_call_depth(self.config.max_call_depth)
    }

    async fn commit(&self, mut tree: ExecutionTree, command: &str) -> Result<(), EngineError> {
        let mut session = self.session();
        session.flush(&mut tree);
        session.commit().await.map_err(|err| {
            if let StoreError::OptimisticLock { execution_id, revision } = &err {
                warn!(command, execution = %execution_id, revision, "optimistic lock conflict");
            }
            EngineError::from(err)
        })
    }

    /// Load the whole call hierarchy `execution_id` belongs to.
    async fn load_tree(&self, execution_id: Uuid) -> Result<ExecutionTree, EngineError> {
        let record = self
            .store
            .find_execution(execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;

        let mut top = record.process_instance_id;
        for _ in 0..=self.config.max_call_depth {
            let root = self
                .store
                .find_execution(top)
                .await?
                .ok_or(EngineError::ProcessInstanceNotFound(top))?;
            let Some(super_id) = root.super_execution_id else {
                break;
            };
            top = self
                .store
                .find_execution(super_id)
                .await?
                .ok_or(EngineError::ExecutionNotFound(super_id))?
                .process_instance_id;
        }

        let mut records = Vec::new();
        let mut pending = vec![top];
        while let Some(instance) = pending.pop() {
            let instance_records = self.store.find_executions_by_process_instance(instance).await?;
            for r in &instance_records {
                if let Some(sub) = self.store.find_sub_process_instance(r.id).await? {
                    pending.push(sub.id);
                }
            }
            records.extend(instance_records);
        }
        debug!(execution = %execution_id, top = %top, records = records.len(), "loaded execution tree");

        let deployments = self.deployments.clone();
        let tree = ExecutionTree::from_records(records, |id| deployments.get(id).ok().flatten())?;
        Ok(self.prepare(tree))
    }

    async fn load_instance(&self, process_instance_id: Uuid) -> Result<(ExecutionTree, ExecutionId), EngineError> {
        let tree = self.load_tree(process_instance_id).await.map_err(|e| match e {
            EngineError::ExecutionNotFound(id) if id == process_instance_id => {
                EngineError::ProcessInstanceNotFound(id)
            }
            other => other,
        })?;
        let id = ExecutionId::from(process_instance_id);
        if !tree.node(id)?.is_process_instance() {
            return Err(EngineError::ProcessInstanceNotFound(process_instance_id));
        }
        Ok((tree, id))
    }

    // ─── Commands ─────────────────────────────────────────────

    pub async fn start_process_instance_by_key(
        &self,
        key: &str,
        business_key: Option<String>,
        variables: Variables,
    ) -> Result<Uuid, EngineError> {
        let definition = self
            .deployments
            .latest(key)?
            .ok_or_else(|| EngineError::UnknownProcessKey(key.to_string()))?;
        let definition_id = definition.id();

        let mut tree = self.prepare(ExecutionTree::new());
        let instance = tree.create_process_instance(definition, business_key);
        tree.set_variables(instance, variables)?;
        tree.start(instance)?;
        self.commit(tree, "start_process_instance").await?;

        info!(process_instance = %instance, definition = %definition_id, "started process instance");
        Ok(instance.as_uuid())
    }

    pub async fn signal(&self, execution_id: Uuid, signal_name: &str, data: Option<Value>) -> Result<(), EngineError> {
        let mut tree = self.load_tree(execution_id).await?;
        tree.signal(ExecutionId::from(execution_id), signal_name, data)?;
        self.commit(tree, "signal").await?;
        info!(execution = %execution_id, signal = signal_name, "signalled execution");
        Ok(())
    }

    /// Set `variables` on the task's execution and let it continue.
    pub async fn complete_task(&self, execution_id: Uuid, variables: Variables) -> Result<(), EngineError> {
        let mut tree = self.load_tree(execution_id).await?;
        let id = ExecutionId::from(execution_id);
        tree.set_variables(id, variables)?;
        tree.signal(id, "complete", None)?;
        self.commit(tree, "complete_task").await?;
        info!(execution = %execution_id, "completed task");
        Ok(())
    }

    pub async fn set_variables(&self, execution_id: Uuid, variables: Variables) -> Result<(), EngineError> {
        let mut tree = self.load_tree(execution_id).await?;
        tree.set_variables(ExecutionId::from(execution_id), variables)?;
        self.commit(tree, "set_variables").await
    }

    /// Variables visible from the execution, inner scopes shadowing outer ones.
    pub async fn get_variables(&self, execution_id: Uuid) -> Result<Variables, EngineError> {
        let tree = self.load_tree(execution_id).await?;
        Ok(tree.get_variables(ExecutionId::from(execution_id)))
    }

    pub async fn get_variable(&self, execution_id: Uuid, name: &str) -> Result<Option<Value>, EngineError> {
        let tree = self.load_tree(execution_id).await?;
        Ok(tree.get_variable(ExecutionId::from(execution_id), name))
    }

    /// Delete the process instance, firing `end` listeners leaf first.
    pub async fn delete_process_instance(
        &self,
        process_instance_id: Uuid,
        reason: Option<&str>,
    ) -> Result<(), EngineError> {
        let (mut tree, id) = self.load_instance(process_instance_id).await?;
        let reason = reason.unwrap_or(&self.config.default_delete_reason);
        tree.delete_cascade(id, reason)?;
        self.commit(tree, "delete_process_instance").await?;
        info!(process_instance = %process_instance_id, reason, "deleted process instance");
        Ok(())
    }

    // ─── Queries ──────────────────────────────────────────────

    /// Execution of the process instance positioned at `activity_id`.
    pub async fn find_execution(&self, process_instance_id: Uuid, activity_id: &str) -> Result<Option<Uuid>, EngineError> {
        let (tree, id) = self.load_instance(process_instance_id).await?;
        Ok(tree.find_execution(id, activity_id).map(|e| e.as_uuid()))
    }

    pub async fn active_activity_ids(&self, process_instance_id: Uuid) -> Result<Vec<String>, EngineError> {
        let (tree, id) = self.load_instance(process_instance_id).await?;
        Ok(tree.find_active_activity_ids(id))
    }

    pub async fn tasks(&self, process_instance_id: Uuid) -> Result<Vec<TaskView>, EngineError> {
        let (tree, id) = self.load_instance(process_instance_id).await?;
        let tasks = tree
            .nodes()
            .filter(|n| n.process_instance() == id && n.is_active())
            .filter_map(|n| {
                let activity = n.definition().activity(n.activity()?);
                (activity.kind() == "userTask").then(|| TaskView {
                    execution_id: n.id().as_uuid(),
                    process_instance_id,
                    activity_id: activity.id().to_string(),
                    assignee: activity.property(ASSIGNEE).map(str::to_string),
                    candidate_group: activity.property(CANDIDATE_GROUP).map(str::to_string),
                })
            })
            .collect();
        Ok(tasks)
    }

    /// The event log of the process instance, in recording order.
    pub async fn events(&self, process_instance_id: Uuid) -> Result<Vec<(u64, RuntimeEvent)>, EngineError> {
        Ok(self.store.read_events(process_instance_id, 0).await?)
    }

    /// True once the instance has ended or was deleted.
    pub async fn process_instance_ended(&self, process_instance_id: Uuid) -> Result<bool, EngineError> {
        Ok(self.store.find_execution(process_instance_id).await?.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_memory::MemoryStore;
    use serde_json::json;

    const REVIEW: &str = r#"
id: review
nodes:
  - { kind: StartEvent, id: start }
  - { kind: UserTask, id: approve, assignee: kermit, candidate_group: management }
  - { kind: EndEvent, id: end }
flows:
  - { from: start, to: approve }
  - { from: approve, to: end }
"#;

    fn engine(store: Arc<MemoryStore>) -> ProcessEngine {
        ProcessEngine::new(store, HandlerRegistry::new(), EngineConfig::default())
    }

    #[tokio::test]
    async fn test_user_task_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        engine.deploy_yaml(REVIEW).await.unwrap();

        let pi = engine
            .start_process_instance_by_key("review", Some("b-1".into()), Variables::new())
            .await
            .unwrap();
        let tasks = engine.tasks(pi).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].activity_id, "approve");
        assert_eq!(tasks[0].assignee.as_deref(), Some("kermit"));
        assert_eq!(tasks[0].candidate_group.as_deref(), Some("management"));

        engine
            .complete_task(tasks[0].execution_id, Variables::from([("ok".to_string(), json!(true))]))
            .await
            .unwrap();
        assert!(engine.process_instance_ended(pi).await.unwrap());
        assert_eq!(store.execution_count(), 0);

        let names: Vec<_> = engine
            .events(pi)
            .await
            .unwrap()
            .into_iter()
            .map(|(_, e)| e.name())
            .collect();
        assert_eq!(names.first(), Some(&"process_started"));
        assert!(names.contains(&"task_created"));
        assert_eq!(names.last(), Some(&"process_ended"));
    }

    #[tokio::test]
    async fn test_redeploying_identical_source_keeps_version() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let v1 = engine.deploy_yaml(REVIEW).await.unwrap();
        let again = engine.deploy_yaml(REVIEW).await.unwrap();
        assert_eq!(v1.id(), again.id());
        assert_eq!(store.list_deployments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_restores_persisted_deployments() {
        let store = Arc::new(MemoryStore::new());
        engine(store.clone()).deploy_yaml(REVIEW).await.unwrap();

        let restarted = engine(store.clone());
        restarted.bootstrap().await.unwrap();
        let latest = restarted.deployments().latest("review").unwrap().unwrap();
        assert_eq!(latest.id(), "review:1");
        let pi = restarted
            .start_process_instance_by_key("review", None, Variables::new())
            .await
            .unwrap();
        assert_eq!(restarted.active_activity_ids(pi).await.unwrap(), vec!["approve".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_key_and_instance() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let err = engine
            .start_process_instance_by_key("nope", None, Variables::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownProcessKey(_)));

        let missing = Uuid::now_v7();
        let err = engine.active_activity_ids(missing).await.unwrap_err();
        assert!(matches!(err, EngineError::ProcessInstanceNotFound(id) if id == missing));
        let err = engine.signal(missing, "go", None).await.unwrap_err();
        assert!(matches!(err, EngineError::ExecutionNotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_command_commits_nothing() {
        let store = Arc::new(MemoryStore::new());
        let mut handlers = HandlerRegistry::new();
        handlers.register("charge", |_: &Variables| -> anyhow::Result<Variables> {
            Err(anyhow!("card declined"))
        });
        let engine = ProcessEngine::new(store.clone(), handlers, EngineConfig::default());
        engine
            .deploy_yaml(
                r#"
id: payment
nodes:
  - { kind: StartEvent, id: start }
  - { kind: ReceiveTask, id: wait }
  - { kind: ServiceTask, id: charge, handler: charge }
  - { kind: EndEvent, id: end }
flows:
  - { from: start, to: wait }
  - { from: wait, to: charge }
  - { from: charge, to: end }
"#,
            )
            .await
            .unwrap();
        let pi = engine
            .start_process_instance_by_key("payment", None, Variables::new())
            .await
            .unwrap();
        let before = store.find_execution(pi).await.unwrap().unwrap();
        assert_eq!(before.activity_id.as_deref(), Some("wait"));

        let err = engine.signal(pi, "go", None).await.unwrap_err();
        assert!(err.to_string().contains("card declined"), "{err}");
        assert!(!err.is_retryable());
        assert_eq!(store.find_execution(pi).await.unwrap().unwrap(), before);
        assert_eq!(engine.active_activity_ids(pi).await.unwrap(), vec!["wait".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_uses_default_reason() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        engine.deploy_yaml(REVIEW).await.unwrap();
        let pi = engine
            .start_process_instance_by_key("review", None, Variables::new())
            .await
            .unwrap();
        engine.delete_process_instance(pi, None).await.unwrap();
        assert!(engine.process_instance_ended(pi).await.unwrap());
        let ended = engine.events(pi).await.unwrap().into_iter().any(|(_, e)| {
            matches!(e, RuntimeEvent::ProcessEnded { delete_reason: Some(r), .. } if r == "deleted")
        });
        assert!(ended);
    }
}
