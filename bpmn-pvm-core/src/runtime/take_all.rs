//! Leaving an activity through several transitions at once, joining the
//! executions that arrived at it.
//!
//! Two outcomes:
//!
//! * **collapse**: exactly one transition and no other active concurrent
//!   execution. The recyclable executions are pruned and the concurrent root
//!   itself continues through the transition as a non-concurrent execution.
//! * **fan-out**: otherwise. One concurrent child per transition, reusing
//!   recyclable executions before creating new ones; surplus recyclables end.

use super::{ExecutionId, ExecutionTree};
use crate::definition::TransitionId;
use crate::error::PvmError;
use crate::events::RuntimeEvent;
use tracing::debug;

impl ExecutionTree {
    pub fn take_all(
        &mut self,
        id: ExecutionId,
        transitions: &[TransitionId],
        recyclable: &[ExecutionId],
    ) -> Result<(), PvmError> {
        let transitions = transitions.to_vec();
        let mut recyclable = recyclable.to_vec();

        {
            let definition = &self.live_node(id)?.definition;
            if let Some(bad) = transitions
                .iter()
                .find(|t| definition.try_transition(**t).is_none())
            {
                return Err(PvmError::UnknownTransition {
                    transition: *bad,
                    definition: definition.id(),
                });
            }
        }
        for r in &recyclable {
            self.node(*r)?;
        }
        if recyclable.len() > 1
            && recyclable
                .iter()
                .any(|r| self.nodes.get(r).is_some_and(|n| n.scope))
        {
            return Err(PvmError::ScopeJoin);
        }

        let concurrent_root = self.concurrent_root(id)?;
        let active_others: Vec<ExecutionId> = self
            .node(concurrent_root)?
            .children
            .iter()
            .copied()
            .filter(|c| *c != id && self.nodes.get(c).is_some_and(|n| n.active))
            .collect();

        debug!(
            execution = %id,
            concurrent_root = %concurrent_root,
            transitions = ?transitions,
            active_concurrent = ?active_others,
            recyclable = ?recyclable,
            "take all"
        );

        if let ([transition], true) = (transitions.as_slice(), active_others.is_empty()) {
            let mut pruned = recyclable;
            if concurrent_root != id && !pruned.contains(&id) {
                pruned.push(id);
            }
            for p in pruned {
                if p == concurrent_root || self.node(p)?.removed {
                    continue;
                }
                let node = self.node_mut(p)?;
                node.active = false;
                node.ended = true;
                self.remove(p)?;
                self.record(
                    p,
                    RuntimeEvent::ExecutionPruned {
                        execution: p.as_uuid(),
                        replaced_by: Some(concurrent_root.as_uuid()),
                    },
                );
                debug!(execution = %p, "pruned on collapse");
            }
            let activity = self.node(id)?.activity;
            let root = self.node_mut(concurrent_root)?;
            root.active = true;
            root.concurrent = false;
            root.activity = activity;
            return self.take(concurrent_root, *transition);
        }

        let activity = self.node(id)?.activity;
        recyclable.retain(|r| *r != concurrent_root);
        // executions that already ended cannot carry a branch
        let (live, dead): (Vec<_>, Vec<_>) = recyclable
            .into_iter()
            .partition(|r| self.nodes.get(r).is_some_and(|n| !n.ended && !n.removed));
        for d in dead {
            if self.node(d)?.removed {
                continue;
            }
            self.remove(d)?;
            self.record(
                d,
                RuntimeEvent::ExecutionPruned {
                    execution: d.as_uuid(),
                    replaced_by: None,
                },
            );
            debug!(execution = %d, "pruned ended recyclable execution");
        }
        let mut recyclable = live.into_iter();
        let mut outgoing = Vec::with_capacity(transitions.len());
        for transition in transitions {
            let execution = match recyclable.next() {
                Some(reused) => reused,
                None => self.create_execution(concurrent_root)?,
            };
            let node = self.node_mut(execution)?;
            node.activity = activity;
            node.active = true;
            node.scope = false;
            node.concurrent = true;
            outgoing.push((execution, transition));
        }
        self.node_mut(concurrent_root)?.active = false;

        for surplus in recyclable {
            debug!(execution = %surplus, "pruning surplus recyclable execution");
            self.end(surplus)?;
        }

        // every outgoing execution is live here, so a dead one was ended or
        // deleted by an earlier branch
        for (execution, transition) in outgoing {
            let execution = self.resolve_replacement(execution);
            let node = self.node(execution)?;
            if node.delete_root || node.removed || node.ended {
                continue;
            }
            self.take(execution, transition)?;
        }
        Ok(())
    }
}
