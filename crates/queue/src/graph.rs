//! Dependency graph of admitted activities.
//!
//! Nodes are keyed by [`InstanceKey`]; edges are key sets on both ends, so
//! traversal never holds references into nodes that retirement mutates.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use actq_core::{ActivityId, InstanceKey};
use tracing::debug;

use crate::activity::{Arrival, QueuedActivity};
use crate::error::{QueueError, Result};

/// All in-flight activities: the executing set plus everything chained behind it.
#[derive(Default)]
pub(crate) struct ActivityGraph {
    nodes: HashMap<InstanceKey, QueuedActivity>,
    by_id: HashMap<ActivityId, InstanceKey>,
    executing: BTreeSet<InstanceKey>,
}

impl ActivityGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add an admitted activity. It joins the executing set only via [`Self::start_executing`].
    pub(crate) fn insert(&mut self, node: QueuedActivity) -> Result<()> {
        let key = node.key;
        if let Some(existing) = self.by_id.get(&key.id()) {
            return Err(QueueError::internal(format!(
                "activity {} admitted while {} is in flight",
                key, existing
            )));
        }
        self.by_id.insert(key.id(), key);
        self.nodes.insert(key, node);
        Ok(())
    }

    pub(crate) fn get(&self, key: InstanceKey) -> Result<&QueuedActivity> {
        self.nodes
            .get(&key)
            .ok_or_else(|| QueueError::internal(format!("activity {} is not in the graph", key)))
    }

    pub(crate) fn get_mut(&mut self, key: InstanceKey) -> Result<&mut QueuedActivity> {
        self.nodes
            .get_mut(&key)
            .ok_or_else(|| QueueError::internal(format!("activity {} is not in the graph", key)))
    }

    /// In-flight instance carrying `id`, if any.
    pub(crate) fn in_flight_by_id(&self, id: ActivityId) -> Option<InstanceKey> {
        self.by_id.get(&id).copied()
    }

    pub(crate) fn start_executing(&mut self, key: InstanceKey) -> Result<()> {
        if !self.get(key)?.depends_on.is_empty() {
            return Err(QueueError::internal(format!(
                "activity {} has unresolved dependencies",
                key
            )));
        }
        self.executing.insert(key);
        Ok(())
    }

    pub(crate) fn executing(&self) -> Vec<InstanceKey> {
        self.executing.iter().copied().collect()
    }

    pub(crate) fn executing_len(&self) -> usize {
        self.executing.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Register `dependent` as waiting for `dependency`. Idempotent.
    pub(crate) fn mark_dependency(
        &mut self,
        dependent: InstanceKey,
        dependency: InstanceKey,
    ) -> Result<bool> {
        if dependent == dependency {
            return Err(QueueError::internal(format!("activity {} depends on itself", dependent)));
        }
        self.get(dependency)?;
        let added = self.get_mut(dependent)?.depends_on.insert(dependency);
        self.get_mut(dependency)?.dependents.insert(dependent);
        if added {
            debug!(activity = %dependent, depends_on = %dependency, "dependency made");
        }
        Ok(added)
    }

    /// Remove the edge between `dependent` and the finished `dependency` in
    /// both directions. Idempotent; the dependency node may already be gone.
    ///
    /// Returns whether `dependent` is now free of dependencies.
    pub(crate) fn resolve_dependency(
        &mut self,
        dependent: InstanceKey,
        dependency: InstanceKey,
    ) -> Result<bool> {
        if let Some(node) = self.nodes.get_mut(&dependency) {
            node.dependents.remove(&dependent);
        }
        let node = self.get_mut(dependent)?;
        node.depends_on.remove(&dependency);
        Ok(node.depends_on.is_empty())
    }

    /// Record `duplicate` on the in-flight `primary`.
    pub(crate) fn attach(&mut self, primary: InstanceKey, duplicate: Arrival) -> Result<()> {
        debug!(activity = %duplicate.key, primary = %primary, "activity attached to another one");
        self.get_mut(primary)?.attach(duplicate);
        Ok(())
    }

    /// Every in-flight activity reachable from the executing set through
    /// `dependents` edges, breadth first, each at most once.
    pub(crate) fn in_flight_chains(&self) -> Vec<InstanceKey> {
        let mut seen: HashSet<InstanceKey> = HashSet::new();
        let mut queue: VecDeque<InstanceKey> = self.executing.iter().copied().collect();
        let mut ordered = Vec::with_capacity(self.nodes.len());

        while let Some(key) = queue.pop_front() {
            if !seen.insert(key) {
                continue;
            }
            ordered.push(key);
            if let Some(node) = self.nodes.get(&key) {
                queue.extend(node.dependents.iter().copied());
            }
        }
        ordered
    }

    /// Take a finished node out of the graph.
    ///
    /// Its `dependents` are kept on the returned node so the caller can
    /// resolve them.
    pub(crate) fn remove(&mut self, key: InstanceKey) -> Result<QueuedActivity> {
        let node = self
            .nodes
            .remove(&key)
            .ok_or_else(|| QueueError::internal(format!("activity {} is not in the graph", key)))?;
        self.executing.remove(&key);
        if self.by_id.get(&key.id()) == Some(&key) {
            self.by_id.remove(&key.id());
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Activity, Completer};
    use actq_core::{ActivityBody, ActivityRecord, Outcome};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct Noop;

    #[async_trait]
    impl ActivityBody for Noop {
        async fn run(&self, _record: &ActivityRecord, _cancel: CancellationToken) -> Outcome {
            Ok(())
        }
    }

    fn key(id: u64) -> InstanceKey {
        InstanceKey::new(ActivityId::new(id), id)
    }

    fn arrival(id: u64, seq: u64) -> Arrival {
        let key = InstanceKey::new(ActivityId::new(id), seq);
        let (completer, _handle) = Completer::pair(key);
        Arrival {
            key,
            activity: Activity::new(ActivityRecord::new(id, "test"), Arc::new(Noop)),
            completer,
        }
    }

    fn graph_with(ids: &[u64]) -> ActivityGraph {
        let mut graph = ActivityGraph::new();
        for &id in ids {
            graph.insert(QueuedActivity::new(arrival(id, id))).unwrap();
        }
        graph
    }

    #[test]
    fn test_mark_dependency_is_idempotent_and_bidirectional() {
        let mut graph = graph_with(&[1, 2]);
        assert!(graph.mark_dependency(key(2), key(1)).unwrap());
        assert!(!graph.mark_dependency(key(2), key(1)).unwrap());

        assert_eq!(graph.get(key(2)).unwrap().depends_on.len(), 1);
        assert_eq!(graph.get(key(1)).unwrap().dependents.len(), 1);
        assert!(graph.mark_dependency(key(1), key(1)).is_err());
    }

    #[test]
    fn test_resolve_dependency_frees_dependent() {
        let mut graph = graph_with(&[1, 2, 3]);
        graph.mark_dependency(key(3), key(1)).unwrap();
        graph.mark_dependency(key(3), key(2)).unwrap();

        assert!(!graph.resolve_dependency(key(3), key(1)).unwrap());
        assert!(!graph.resolve_dependency(key(3), key(1)).unwrap());
        assert!(graph.resolve_dependency(key(3), key(2)).unwrap());
        assert!(graph.get(key(2)).unwrap().dependents.is_empty());
    }

    #[test]
    fn test_in_flight_chains_follow_dependents_once() {
        // 1 <- 2 <- 4, 1 <- 3 <- 4 (diamond), 5 independent
        let mut graph = graph_with(&[1, 2, 3, 4, 5]);
        graph.start_executing(key(1)).unwrap();
        graph.start_executing(key(5)).unwrap();
        graph.mark_dependency(key(2), key(1)).unwrap();
        graph.mark_dependency(key(3), key(1)).unwrap();
        graph.mark_dependency(key(4), key(2)).unwrap();
        graph.mark_dependency(key(4), key(3)).unwrap();

        let chains = graph.in_flight_chains();
        assert_eq!(chains.len(), 5);
        assert_eq!(&chains[..2], &[key(1), key(5)]);
        assert_eq!(chains.last(), Some(&key(4)));
    }

    #[test]
    fn test_blocked_node_cannot_execute() {
        let mut graph = graph_with(&[1, 2]);
        graph.mark_dependency(key(2), key(1)).unwrap();
        assert!(graph.start_executing(key(2)).is_err());
        assert_eq!(graph.executing_len(), 0);
    }

    #[test]
    fn test_duplicate_id_insert_is_a_fault() {
        let mut graph = graph_with(&[7]);
        let err = graph.insert(QueuedActivity::new(arrival(7, 99))).unwrap_err();
        assert!(matches!(err, QueueError::Internal(_)));
    }

    #[test]
    fn test_remove_clears_indexes() {
        let mut graph = graph_with(&[1, 2]);
        graph.start_executing(key(1)).unwrap();
        graph.mark_dependency(key(2), key(1)).unwrap();
        graph.attach(key(1), arrival(1, 50)).unwrap();

        let removed = graph.remove(key(1)).unwrap();
        assert_eq!(removed.dependents.iter().copied().collect::<Vec<_>>(), vec![key(2)]);
        assert_eq!(removed.attachment_count(), 1);
        assert_eq!(graph.in_flight_by_id(ActivityId::new(1)), None);
        assert_eq!(graph.executing_len(), 0);
        assert_eq!(graph.len(), 1);
        assert!(graph.remove(key(1)).is_err());
    }
}
