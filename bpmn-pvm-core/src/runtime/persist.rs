//! Conversion between an [`ExecutionTree`] and flat [`ExecutionRecord`]s.

use super::{ExecutionId, ExecutionNode, ExecutionTree};
use crate::definition::ProcessDefinition;
use crate::error::PvmError;
use crate::store::{ChangeSet, ExecutionRecord};
use std::collections::HashMap;
use std::sync::Arc;

impl ExecutionNode {
    fn to_record(&self, position: u32) -> ExecutionRecord {
        ExecutionRecord {
            id: self.id.as_uuid(),
            revision: self.revision,
            process_instance_id: self.process_instance.as_uuid(),
            parent_id: self.parent.map(|p| p.as_uuid()),
            super_execution_id: self.super_execution.map(|s| s.as_uuid()),
            process_definition_id: self.definition.id(),
            activity_id: self.activity_id().map(str::to_string),
            business_key: self.business_key.clone(),
            is_active: self.active,
            is_scope: self.scope,
            is_concurrent: self.concurrent,
            is_ended: self.ended,
            delete_reason: self.delete_reason.clone(),
            position,
            variables: self.variables.clone(),
        }
    }
}

impl ExecutionTree {
    /// Rebuild a fully populated tree from the records of a call hierarchy.
    /// `resolve` maps a definition id (`key:version`) to the deployed definition.
    pub fn from_records<F>(records: Vec<ExecutionRecord>, resolve: F) -> Result<Self, PvmError>
    where
        F: Fn(&str) -> Option<Arc<ProcessDefinition>>,
    {
        let mut tree = ExecutionTree::new();
        let mut definitions: HashMap<String, Arc<ProcessDefinition>> = HashMap::new();
        let mut links = Vec::with_capacity(records.len());

        for record in records {
            let definition = match definitions.get(&record.process_definition_id) {
                Some(d) => d.clone(),
                None => {
                    let d = resolve(&record.process_definition_id)
                        .ok_or_else(|| PvmError::DefinitionNotFound(record.process_definition_id.clone()))?;
                    definitions.insert(record.process_definition_id.clone(), d.clone());
                    d
                }
            };
            let activity = match &record.activity_id {
                Some(activity_id) => Some(definition.find_activity(activity_id).ok_or_else(|| {
                    PvmError::DefinitionNotFound(format!(
                        "{} (activity '{}')",
                        record.process_definition_id, activity_id
                    ))
                })?),
                None => None,
            };
            let id = ExecutionId(record.id);
            let mut node = ExecutionNode::new(id, definition, ExecutionId(record.process_instance_id));
            node.revision = record.revision;
            node.persisted = true;
            node.activity = activity;
            node.parent = record.parent_id.map(ExecutionId);
            node.super_execution = record.super_execution_id.map(ExecutionId);
            node.business_key = record.business_key;
            node.active = record.is_active;
            node.scope = record.is_scope;
            node.concurrent = record.is_concurrent;
            node.ended = record.is_ended;
            node.delete_reason = record.delete_reason;
            node.variables = record.variables;
            links.push((id, node.parent, node.super_execution, record.position));
            tree.nodes.insert(id, node);
        }

        links.sort_by_key(|(_, _, _, position)| *position);
        for (id, parent, super_execution, _) in links {
            if let Some(parent) = parent {
                if let Some(p) = tree.nodes.get_mut(&parent) {
                    p.children.push(id);
                }
            }
            if let Some(super_execution) = super_execution {
                if let Some(s) = tree.nodes.get_mut(&super_execution) {
                    s.sub_process_instance = Some(id);
                }
            }
        }
        Ok(tree)
    }

    /// Stage every change since the tree was loaded into `changes`.
    ///
    /// Removed nodes and all nodes of ended process instances are deleted;
    /// transient nodes are inserted, persisted ones updated.
    pub(crate) fn flush_into(&mut self, changes: &mut ChangeSet, with_events: bool) {
        for node in self.nodes.values() {
            let instance_ended = self
                .nodes
                .get(&node.process_instance)
                .is_some_and(|root| root.ended);
            let gone = node.removed || instance_ended;
            match (gone, node.persisted) {
                (true, true) => changes.deletes.push((node.id.as_uuid(), node.revision)),
                (true, false) => {}
                (false, persisted) => {
                    let position = node
                        .parent
                        .and_then(|p| self.nodes.get(&p))
                        .and_then(|p| p.children.iter().position(|c| *c == node.id))
                        .unwrap_or(0) as u32;
                    let record = node.to_record(position);
                    if persisted {
                        changes.updates.push(record);
                    } else {
                        changes.inserts.push(record);
                    }
                }
            }
        }
        let events = self.drain_events();
        if with_events {
            changes.events.extend(events);
        }
    }
}
