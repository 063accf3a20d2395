use crate::error::StoreError;
use crate::events::RuntimeEvent;
use crate::runtime::Variables;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

pub fn now_millis() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

// ─── Records ──────────────────────────────────────────────────

/// Flat persisted form of one execution node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    /// Incremented by the store on every update.
    pub revision: u32,
    pub process_instance_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub super_execution_id: Option<Uuid>,
    /// `key:version` of the process definition.
    pub process_definition_id: String,
    pub activity_id: Option<String>,
    pub business_key: Option<String>,
    pub is_active: bool,
    pub is_scope: bool,
    pub is_concurrent: bool,
    pub is_ended: bool,
    pub delete_reason: Option<String>,
    /// Index in the parent's child list.
    pub position: u32,
    pub variables: Variables,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFormat {
    Yaml,
    BpmnXml,
}

/// A deployed process model source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub key: String,
    pub version: u32,
    pub checksum: String,
    pub format: ModelFormat,
    pub source: String,
    pub deployed_at: Timestamp,
}

/// Everything one unit of work writes, applied atomically by the store.
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    pub inserts: Vec<ExecutionRecord>,
    /// Records carry the revision they were loaded with.
    pub updates: Vec<ExecutionRecord>,
    /// `(id, revision loaded)`.
    pub deletes: Vec<(Uuid, u32)>,
    /// `(process instance, event)`.
    pub events: Vec<(Uuid, RuntimeEvent)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty() && self.events.is_empty()
    }
}

// ─── Store contract ───────────────────────────────────────────

/// Persistence contract of the engine.
///
/// The interpreter itself never talks to a store: the engine loads a tree
/// through the finder methods, runs the command, and hands the resulting
/// [`ChangeSet`] to [`apply`](Self::apply).
#[async_trait]
pub trait ProcessStore: Send + Sync {
    // ── Executions ──

    /// Apply a change set atomically. Updates and deletes are checked
    /// against the stored revision; any mismatch rejects the whole set with
    /// [`StoreError::OptimisticLock`].
    async fn apply(&self, changes: &ChangeSet) -> std::result::Result<(), StoreError>;

    async fn find_execution(&self, id: Uuid) -> Result<Option<ExecutionRecord>>;
    async fn find_child_executions(&self, parent_id: Uuid) -> Result<Vec<ExecutionRecord>>;
    async fn find_executions_by_process_instance(&self, process_instance_id: Uuid) -> Result<Vec<ExecutionRecord>>;
    async fn find_sub_process_instance(&self, super_execution_id: Uuid) -> Result<Option<ExecutionRecord>>;

    // ── Deployments ──

    async fn save_deployment(&self, deployment: &DeploymentRecord) -> Result<()>;
    async fn latest_deployment(&self, key: &str) -> Result<Option<DeploymentRecord>>;
    async fn list_deployments(&self) -> Result<Vec<DeploymentRecord>>;

    // ── Event log (append-only, written through apply) ──

    async fn read_events(&self, process_instance_id: Uuid, from_seq: u64) -> Result<Vec<(u64, RuntimeEvent)>>;
}
