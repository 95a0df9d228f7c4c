//! Dependency graph and startup ordering
//!
//! Pure edge-set bookkeeping with no I/O. Edges point from a service to
//! the service it depends on; the set is kept acyclic at insertion time,
//! so `startup_order` should never see a cycle in practice.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::{OverseerError, OverseerResult};
use crate::model::{DependencyEdge, ServiceId};

/// In-memory "depends-on" edge set for a workspace
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// service -> services it depends on
    edges: HashMap<ServiceId, BTreeSet<ServiceId>>,
    /// service -> services depending on it
    reverse: HashMap<ServiceId, BTreeSet<ServiceId>>,
    /// full edge records keyed by (service, dependency)
    records: HashMap<(ServiceId, ServiceId), DependencyEdge>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from stored edges, re-validating acyclicity
    pub fn from_edges(edges: Vec<DependencyEdge>) -> OverseerResult<Self> {
        let mut graph = Self::new();
        for edge in edges {
            graph.add_edge(edge)?;
        }
        Ok(graph)
    }

    /// Add one edge. Fails with CycleDetected if a depends-on path already
    /// runs from the dependency back to the service; the graph is left
    /// unchanged on any failure.
    pub fn add_edge(&mut self, edge: DependencyEdge) -> OverseerResult<()> {
        let key = (edge.service_id.clone(), edge.depends_on_id.clone());

        if edge.service_id == edge.depends_on_id {
            return Err(OverseerError::CycleDetected {
                service_id: edge.service_id.to_string(),
                depends_on_id: edge.depends_on_id.to_string(),
            });
        }
        if self.records.contains_key(&key) {
            return Err(OverseerError::validation(format!(
                "duplicate dependency edge {} -> {}",
                edge.service_id, edge.depends_on_id
            )));
        }
        if self.reachable(&edge.depends_on_id, &edge.service_id) {
            return Err(OverseerError::CycleDetected {
                service_id: edge.service_id.to_string(),
                depends_on_id: edge.depends_on_id.to_string(),
            });
        }

        self.edges
            .entry(edge.service_id.clone())
            .or_default()
            .insert(edge.depends_on_id.clone());
        self.reverse
            .entry(edge.depends_on_id.clone())
            .or_default()
            .insert(edge.service_id.clone());
        self.records.insert(key, edge);
        Ok(())
    }

    pub fn remove_edge(&mut self, service_id: &ServiceId, depends_on_id: &ServiceId) {
        let key = (service_id.clone(), depends_on_id.clone());
        if self.records.remove(&key).is_none() {
            return;
        }
        if let Some(deps) = self.edges.get_mut(service_id) {
            deps.remove(depends_on_id);
            if deps.is_empty() {
                self.edges.remove(service_id);
            }
        }
        if let Some(rev) = self.reverse.get_mut(depends_on_id) {
            rev.remove(service_id);
            if rev.is_empty() {
                self.reverse.remove(depends_on_id);
            }
        }
    }

    /// Services `service_id` directly depends on
    pub fn dependencies_of(&self, service_id: &ServiceId) -> Vec<ServiceId> {
        self.edges
            .get(service_id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Services directly depending on `service_id`
    pub fn dependents_of(&self, service_id: &ServiceId) -> Vec<ServiceId> {
        self.reverse
            .get(service_id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Full edge record for one (service, dependency) pair
    pub fn edge(&self, service_id: &ServiceId, depends_on_id: &ServiceId) -> Option<&DependencyEdge> {
        self.records
            .get(&(service_id.clone(), depends_on_id.clone()))
    }

    /// All edge records declared on `service_id`
    pub fn edges_of(&self, service_id: &ServiceId) -> Vec<&DependencyEdge> {
        self.edges
            .get(service_id)
            .map(|deps| {
                deps.iter()
                    .filter_map(|dep| self.records.get(&(service_id.clone(), dep.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Adjacency snapshot (service -> dependencies) for visualization
    pub fn adjacency(&self) -> BTreeMap<ServiceId, Vec<ServiceId>> {
        self.edges
            .iter()
            .map(|(id, deps)| (id.clone(), deps.iter().cloned().collect()))
            .collect()
    }

    /// Kahn's algorithm over the induced subgraph. Every dependency
    /// precedes all of its dependents in the result; ties are broken by
    /// id ordering so the output is deterministic.
    pub fn startup_order(&self, service_ids: &[ServiceId]) -> OverseerResult<Vec<ServiceId>> {
        let subset: HashSet<&ServiceId> = service_ids.iter().collect();

        // in-degree = number of dependencies inside the subset
        let mut in_degree: HashMap<&ServiceId, usize> = HashMap::new();
        for id in &subset {
            let count = self
                .edges
                .get(*id)
                .map(|deps| deps.iter().filter(|d| subset.contains(d)).count())
                .unwrap_or(0);
            in_degree.insert(*id, count);
        }

        let mut ready: BTreeSet<&ServiceId> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(service_ids.len());
        while let Some(next) = ready.iter().next().cloned() {
            ready.remove(next);
            order.push(next.clone());

            if let Some(dependents) = self.reverse.get(next) {
                for dependent in dependents {
                    if let Some((key, deg)) = in_degree.get_key_value(dependent).map(|(k, v)| (*k, *v)) {
                        let deg = deg.saturating_sub(1);
                        in_degree.insert(key, deg);
                        if deg == 0 {
                            ready.insert(key);
                        }
                    }
                }
            }
        }

        // Unreachable given add_edge's guard, but Kahn detects it for free.
        if order.len() != subset.len() {
            let stuck = subset
                .iter()
                .find(|id| !order.contains(**id))
                .map(|id| id.to_string())
                .unwrap_or_default();
            return Err(OverseerError::CycleDetected {
                service_id: stuck.clone(),
                depends_on_id: stuck,
            });
        }

        Ok(order)
    }

    /// True iff a depends-on path runs from `from` to `to`
    fn reachable(&self, from: &ServiceId, to: &ServiceId) -> bool {
        let mut stack = vec![from];
        let mut seen: HashSet<&ServiceId> = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            if let Some(deps) = self.edges.get(node) {
                stack.extend(deps.iter());
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(from: &str, to: &str) -> DependencyEdge {
        DependencyEdge::new(ServiceId::from(from), ServiceId::from(to))
    }

    fn ids(names: &[&str]) -> Vec<ServiceId> {
        names.iter().map(|n| ServiceId::from(*n)).collect()
    }

    #[test]
    fn chain_orders_dependencies_first() {
        // A depends on B depends on C => start C, B, A
        let mut graph = DependencyGraph::new();
        graph.add_edge(edge("a", "b")).unwrap();
        graph.add_edge(edge("b", "c")).unwrap();

        let order = graph.startup_order(&ids(&["a", "b", "c"])).unwrap();
        assert_eq!(order, ids(&["c", "b", "a"]));
    }

    #[test]
    fn independent_services_order_by_id() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(edge("web", "db")).unwrap();

        let order = graph
            .startup_order(&ids(&["web", "db", "cache", "api"]))
            .unwrap();
        assert_eq!(order, ids(&["api", "cache", "db", "web"]));
    }

    #[test]
    fn every_dependency_precedes_its_dependents() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(edge("api", "db")).unwrap();
        graph.add_edge(edge("api", "cache")).unwrap();
        graph.add_edge(edge("web", "api")).unwrap();
        graph.add_edge(edge("worker", "db")).unwrap();

        let all = ids(&["api", "cache", "db", "web", "worker"]);
        let order = graph.startup_order(&all).unwrap();
        assert_eq!(order.len(), all.len());

        let pos = |id: &ServiceId| order.iter().position(|o| o == id).unwrap();
        for service in &all {
            for dep in graph.dependencies_of(service) {
                assert!(
                    pos(&dep) < pos(service),
                    "{dep} must start before {service}"
                );
            }
        }
    }

    #[test]
    fn cycle_is_rejected_and_graph_unchanged() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(edge("a", "b")).unwrap();
        graph.add_edge(edge("b", "c")).unwrap();

        let err = graph.add_edge(edge("c", "a")).unwrap_err();
        assert!(matches!(err, OverseerError::CycleDetected { .. }));

        // The rejected edge left no trace
        assert!(graph.edge(&ServiceId::from("c"), &ServiceId::from("a")).is_none());
        assert!(graph.dependencies_of(&ServiceId::from("c")).is_empty());
        assert_eq!(
            graph.startup_order(&ids(&["a", "b", "c"])).unwrap(),
            ids(&["c", "b", "a"])
        );
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        let err = graph.add_edge(edge("a", "a")).unwrap_err();
        assert!(matches!(err, OverseerError::CycleDetected { .. }));
    }

    #[test]
    fn duplicate_edge_is_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(edge("a", "b")).unwrap();
        let err = graph.add_edge(edge("a", "b")).unwrap_err();
        assert!(matches!(err, OverseerError::Validation { .. }));
    }

    #[test]
    fn remove_edge_reopens_the_path() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(edge("a", "b")).unwrap();
        graph.add_edge(edge("b", "c")).unwrap();

        graph.remove_edge(&ServiceId::from("a"), &ServiceId::from("b"));
        // c -> a no longer closes a cycle
        graph.add_edge(edge("c", "a")).unwrap();
    }

    #[test]
    fn dependents_and_dependencies_lookups() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(edge("web", "db")).unwrap();
        graph.add_edge(edge("api", "db")).unwrap();

        assert_eq!(
            graph.dependents_of(&ServiceId::from("db")),
            ids(&["api", "web"])
        );
        assert_eq!(graph.dependencies_of(&ServiceId::from("web")), ids(&["db"]));
        assert!(graph.dependencies_of(&ServiceId::from("db")).is_empty());
    }

    #[test]
    fn startup_order_only_considers_requested_subset() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(edge("web", "db")).unwrap();

        // db not in the requested set: web has no in-subset dependencies
        let order = graph.startup_order(&ids(&["web"])).unwrap();
        assert_eq!(order, ids(&["web"]));
    }

    #[test]
    fn adjacency_snapshot_is_sorted() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(edge("web", "db")).unwrap();
        graph.add_edge(edge("web", "cache")).unwrap();

        let adj = graph.adjacency();
        assert_eq!(
            adj.get(&ServiceId::from("web")).unwrap(),
            &ids(&["cache", "db"])
        );
    }
}
