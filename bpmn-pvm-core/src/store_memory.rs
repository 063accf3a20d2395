use crate::error::StoreError;
use crate::events::RuntimeEvent;
use crate::store::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    executions: HashMap<Uuid, ExecutionRecord>,
    deployments: Vec<DeploymentRecord>,
    events: Vec<(u64, Uuid, RuntimeEvent)>,
    next_seq: u64,
}

/// In-memory [`ProcessStore`] for tests and embedded use.
///
/// Revisions start at 1 on insert and are bumped on every update; a change
/// set whose updates or deletes were loaded at an older revision is rejected
/// as a whole.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Number of stored executions.
    pub fn execution_count(&self) -> usize {
        self.inner.read().map(|i| i.executions.len()).unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_revision(inner: &Inner, id: Uuid, revision: u32) -> std::result::Result<(), StoreError> {
    match inner.executions.get(&id) {
        Some(stored) if stored.revision == revision => Ok(()),
        _ => Err(StoreError::OptimisticLock {
            execution_id: id,
            revision,
        }),
    }
}

#[async_trait]
impl ProcessStore for MemoryStore {
    // ── Executions ──

    async fn apply(&self, changes: &ChangeSet) -> std::result::Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;

        for record in &changes.inserts {
            if inner.executions.contains_key(&record.id) {
                return Err(StoreError::Backend(anyhow!("execution {} already exists", record.id)));
            }
        }
        for record in &changes.updates {
            check_revision(&inner, record.id, record.revision)?;
        }
        for (id, revision) in &changes.deletes {
            check_revision(&inner, *id, *revision)?;
        }

        for record in &changes.inserts {
            let mut record = record.clone();
            record.revision = 1;
            inner.executions.insert(record.id, record);
        }
        for record in &changes.updates {
            let mut record = record.clone();
            record.revision += 1;
            inner.executions.insert(record.id, record);
        }
        for (id, _) in &changes.deletes {
            inner.executions.remove(id);
        }
        for (instance, event) in &changes.events {
            inner.next_seq += 1;
            let seq = inner.next_seq;
            inner.events.push((seq, *instance, event.clone()));
        }
        Ok(())
    }

    async fn find_execution(&self, id: Uuid) -> Result<Option<ExecutionRecord>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(inner.executions.get(&id).cloned())
    }

    async fn find_child_executions(&self, parent_id: Uuid) -> Result<Vec<ExecutionRecord>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        let mut children: Vec<_> = inner
            .executions
            .values()
            .filter(|r| r.parent_id == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by_key(|r| r.position);
        Ok(children)
    }

    async fn find_executions_by_process_instance(&self, process_instance_id: Uuid) -> Result<Vec<ExecutionRecord>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        let mut records: Vec<_> = inner
            .executions
            .values()
            .filter(|r| r.process_instance_id == process_instance_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn find_sub_process_instance(&self, super_execution_id: Uuid) -> Result<Option<ExecutionRecord>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(inner
            .executions
            .values()
            .find(|r| r.super_execution_id == Some(super_execution_id))
            .cloned())
    }

    // ── Deployments ──

    async fn save_deployment(&self, deployment: &DeploymentRecord) -> Result<()> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        if inner
            .deployments
            .iter()
            .any(|d| d.key == deployment.key && d.version == deployment.version)
        {
            return Err(anyhow!(
                "deployment {}:{} already exists",
                deployment.key,
                deployment.version
            ));
        }
        inner.deployments.push(deployment.clone());
        Ok(())
    }

    async fn latest_deployment(&self, key: &str) -> Result<Option<DeploymentRecord>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(inner
            .deployments
            .iter()
            .filter(|d| d.key == key)
            .max_by_key(|d| d.version)
            .cloned())
    }

    async fn list_deployments(&self) -> Result<Vec<DeploymentRecord>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        let mut deployments = inner.deployments.clone();
        deployments.sort_by(|a, b| a.key.cmp(&b.key).then(a.version.cmp(&b.version)));
        Ok(deployments)
    }

    // ── Event log ──

    async fn read_events(&self, process_instance_id: Uuid, from_seq: u64) -> Result<Vec<(u64, RuntimeEvent)>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(inner
            .events
            .iter()
            .filter(|(seq, instance, _)| *instance == process_instance_id && *seq >= from_seq)
            .map(|(seq, _, event)| (*seq, event.clone()))
            .collect())
    }
}
