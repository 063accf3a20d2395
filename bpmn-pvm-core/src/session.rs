use crate::error::StoreError;
use crate::events::RuntimeEvent;
use crate::runtime::{ExecutionTree, IdGenerator, UuidV7Generator};
use crate::store::{ChangeSet, ExecutionRecord, ProcessStore};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Unit of work against a [`ProcessStore`].
///
/// Changes are staged in memory and written by [`commit`](Self::commit) in
/// one atomic [`ProcessStore::apply`]. Dropping the session (or calling
/// [`rollback`](Self::rollback)) discards them.
pub struct PersistenceSession {
    store: Arc<dyn ProcessStore>,
    id_generator: Arc<dyn IdGenerator>,
    changes: ChangeSet,
    history_enabled: bool,
}

impl PersistenceSession {
    pub fn new(store: Arc<dyn ProcessStore>) -> Self {
        Self {
            store,
            id_generator: Arc::new(UuidV7Generator),
            changes: ChangeSet::default(),
            history_enabled: true,
        }
    }

    /// Whether runtime events are appended to the event log on commit.
    pub fn with_history(mut self, enabled: bool) -> Self {
        self.history_enabled = enabled;
        self
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn id_generator(&self) -> Arc<dyn IdGenerator> {
        self.id_generator.clone()
    }

    pub fn store(&self) -> &Arc<dyn ProcessStore> {
        &self.store
    }

    /// Empty tree whose new executions get ids from this session.
    pub fn new_tree(&self) -> ExecutionTree {
        ExecutionTree::new().with_id_generator(self.id_generator.clone())
    }

    pub fn insert(&mut self, record: ExecutionRecord) {
        self.changes.inserts.push(record);
    }

    pub fn update(&mut self, record: ExecutionRecord) {
        self.changes.updates.push(record);
    }

    pub fn delete(&mut self, id: Uuid, revision: u32) {
        self.changes.deletes.push((id, revision));
    }

    pub fn record_event(&mut self, process_instance: Uuid, event: RuntimeEvent) {
        if self.history_enabled {
            self.changes.events.push((process_instance, event));
        }
    }

    /// Stage the tree's inserts, updates, deletes and events.
    pub fn flush(&mut self, tree: &mut ExecutionTree) {
        tree.flush_into(&mut self.changes, self.history_enabled);
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        let mut changes = self.changes;

        // an execution inserted and deleted in the same unit of work never reaches the store
        let inserted: HashSet<Uuid> = changes.inserts.iter().map(|r| r.id).collect();
        let deleted: HashSet<Uuid> = changes.deletes.iter().map(|(id, _)| *id).collect();
        changes.inserts.retain(|r| !deleted.contains(&r.id));
        changes.updates.retain(|r| !deleted.contains(&r.id));
        changes.deletes.retain(|(id, _)| !inserted.contains(id));

        if changes.is_empty() {
            return Ok(());
        }
        debug!(
            inserts = changes.inserts.len(),
            updates = changes.updates.len(),
            deletes = changes.deletes.len(),
            events = changes.events.len(),
            "commit"
        );
        self.store.apply(&changes).await
    }

    pub fn rollback(self) {
        debug!(
            staged = self.changes.inserts.len() + self.changes.updates.len() + self.changes.deletes.len(),
            "rollback"
        );
    }
}
