//! Dependency discovery against the current execution frontier.

use actq_core::InstanceKey;
use std::sync::Arc;

use crate::error::Result;
use crate::graph::ActivityGraph;

/// Outcome of dependency discovery for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Discovery {
    /// No in-flight activity blocks the candidate
    Ready,
    /// Waits for these in-flight activities
    Blocked(Vec<InstanceKey>),
}

/// Evaluates the candidate's dependency predicate against every in-flight activity.
#[derive(Debug, Default)]
pub(crate) struct DependencyResolver;

impl DependencyResolver {
    /// Create a new resolver.
    pub(crate) fn new() -> Self {
        Self
    }

    /// Discover and record the wait edges of an already inserted candidate.
    ///
    /// The frontier is walked from the executing roots along `dependents`,
    /// so activities that are themselves blocked are seen too.
    pub(crate) fn discover(
        &self,
        graph: &mut ActivityGraph,
        candidate: InstanceKey,
    ) -> Result<Discovery> {
        let (record, body) = {
            let node = graph.get(candidate)?;
            (node.record.clone(), Arc::clone(&node.body))
        };

        let mut blockers = Vec::new();
        for in_flight in graph.in_flight_chains() {
            if in_flight == candidate {
                continue;
            }
            if body.depends_on(&record, &graph.get(in_flight)?.record) {
                blockers.push(in_flight);
            }
        }

        for &blocker in &blockers {
            graph.mark_dependency(candidate, blocker)?;
        }

        if blockers.is_empty() {
            Ok(Discovery::Ready)
        } else {
            Ok(Discovery::Blocked(blockers))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Activity, Arrival, Completer, QueuedActivity};
    use actq_core::{ActivityBody, ActivityId, ActivityRecord, Outcome};
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    /// Waits for the direct predecessor id.
    struct Chained;

    #[async_trait]
    impl ActivityBody for Chained {
        fn depends_on(&self, candidate: &ActivityRecord, in_flight: &ActivityRecord) -> bool {
            in_flight.id.next() == candidate.id
        }

        async fn run(&self, _record: &ActivityRecord, _cancel: CancellationToken) -> Outcome {
            Ok(())
        }
    }

    fn key(id: u64) -> InstanceKey {
        InstanceKey::new(ActivityId::new(id), id)
    }

    fn admit(graph: &mut ActivityGraph, resolver: &DependencyResolver, id: u64) -> Discovery {
        let (completer, _handle) = Completer::pair(key(id));
        let arrival = Arrival {
            key: key(id),
            activity: Activity::new(ActivityRecord::new(id, "chained"), Arc::new(Chained)),
            completer,
        };
        graph.insert(QueuedActivity::new(arrival)).unwrap();
        let discovery = resolver.discover(graph, key(id)).unwrap();
        if discovery == Discovery::Ready {
            graph.start_executing(key(id)).unwrap();
        }
        discovery
    }

    #[test]
    fn test_transitive_chain_is_discovered_through_blocked_nodes() {
        let mut graph = ActivityGraph::new();
        let resolver = DependencyResolver::new();

        assert_eq!(admit(&mut graph, &resolver, 1), Discovery::Ready);
        assert_eq!(admit(&mut graph, &resolver, 2), Discovery::Blocked(vec![key(1)]));
        // 2 is blocked, yet 3 must still find it.
        assert_eq!(admit(&mut graph, &resolver, 3), Discovery::Blocked(vec![key(2)]));
        assert_eq!(graph.executing(), vec![key(1)]);
    }

    #[test]
    fn test_unrelated_activity_is_ready() {
        let mut graph = ActivityGraph::new();
        let resolver = DependencyResolver::new();

        admit(&mut graph, &resolver, 1);
        assert_eq!(admit(&mut graph, &resolver, 5), Discovery::Ready);
        assert_eq!(graph.executing(), vec![key(1), key(5)]);
    }
}
