//! Topological ordering of resources.
//!
//! Kahn's algorithm over the dependency DAG. Among resources that are ready
//! at the same time, the one with the lowest `(kind, name)` goes first, so
//! the order is a pure function of the graph.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use tracing::debug;

use super::diff::DiffEngine;
use super::plan::Changeset;
use crate::error::CycleError;
use crate::graph::{Graph, ResourceId, ResourceKind};
use crate::state::ResourceRecord;

/// Orders every resource of a graph for creation.
///
/// The result holds one create per resource, each after all resources it
/// depends on.
///
/// # Errors
///
/// Returns a [`CycleError`] if the graph is not acyclic.
pub fn plan(graph: &Graph) -> Result<Changeset, CycleError> {
    let operations = DiffEngine::new().upserts(graph, &BTreeMap::new())?;
    Ok(Changeset { operations })
}

/// Dependency relation between resources: each node maps to the nodes it
/// requires.
#[derive(Debug, Clone, Default)]
pub struct DependencyDag {
    nodes: BTreeMap<ResourceId, DagNode>,
}

#[derive(Debug, Clone)]
struct DagNode {
    kind: ResourceKind,
    requires: BTreeSet<ResourceId>,
}

impl DependencyDag {
    /// Builds the relation from a desired graph.
    #[must_use]
    pub fn from_graph(graph: &Graph) -> Self {
        let deps = graph.dependency_map();
        let nodes = graph
            .resources()
            .map(|resource| {
                let requires = deps.get(&resource.id).cloned().unwrap_or_default();
                (
                    resource.id.clone(),
                    DagNode {
                        kind: resource.kind(),
                        requires,
                    },
                )
            })
            .collect();
        Self { nodes }
    }

    /// Builds the relation from recorded state. Dependencies on identities
    /// that are not recorded are dropped.
    #[must_use]
    pub fn from_records<'r>(records: impl IntoIterator<Item = &'r ResourceRecord>) -> Self {
        let records: Vec<&ResourceRecord> = records.into_iter().collect();
        let known: BTreeSet<&ResourceId> = records.iter().map(|r| &r.id).collect();
        let nodes = records
            .iter()
            .map(|record| {
                let requires = record
                    .depends_on
                    .iter()
                    .filter(|d| known.contains(d))
                    .cloned()
                    .collect();
                (
                    record.id.clone(),
                    DagNode {
                        kind: record.kind,
                        requires,
                    },
                )
            })
            .collect();
        Self { nodes }
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if there are no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns a creation order: every node after everything it requires.
    ///
    /// # Errors
    ///
    /// Returns a [`CycleError`] naming the nodes that could not be ordered.
    pub fn creation_order(&self) -> Result<Vec<ResourceId>, CycleError> {
        let mut pending: BTreeMap<&ResourceId, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&ResourceId, Vec<&ResourceId>> = BTreeMap::new();
        let mut ready = BinaryHeap::new();

        for (id, node) in &self.nodes {
            pending.insert(id, node.requires.len());
            for required in &node.requires {
                dependents.entry(required).or_default().push(id);
            }
            if node.requires.is_empty() {
                ready.push(Reverse((node.kind, id)));
            }
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            order.push(id.clone());
            for dependent in dependents.get(id).into_iter().flatten() {
                let Some(count) = pending.get_mut(dependent) else {
                    continue;
                };
                *count -= 1;
                if *count == 0 {
                    if let Some(node) = self.nodes.get(*dependent) {
                        ready.push(Reverse((node.kind, *dependent)));
                    }
                }
            }
        }

        if order.len() < self.nodes.len() {
            let stuck: Vec<ResourceId> = pending
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .map(|(id, _)| id.clone())
                .collect();
            debug!("Ordering stopped with {} nodes in a cycle", stuck.len());
            return Err(CycleError { nodes: stuck });
        }

        Ok(order)
    }

    /// Every node `id` requires, directly or transitively.
    #[must_use]
    pub fn ancestors(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        self.walk(id, |node_id| {
            self.nodes
                .get(node_id)
                .map(|n| n.requires.iter().collect())
                .unwrap_or_default()
        })
    }

    /// Every node that requires `id`, directly or transitively.
    #[must_use]
    pub fn descendants(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        self.walk(id, |node_id| {
            self.nodes
                .iter()
                .filter(|(_, n)| n.requires.contains(node_id))
                .map(|(other, _)| other)
                .collect()
        })
    }

    fn walk<'s, F>(&'s self, start: &ResourceId, next: F) -> BTreeSet<ResourceId>
    where
        F: Fn(&ResourceId) -> Vec<&'s ResourceId>,
    {
        let mut seen = BTreeSet::new();
        let mut queue = next(start);
        while let Some(id) = queue.pop() {
            if id != start && seen.insert(id.clone()) {
                queue.extend(next(id));
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, TopologyConfig};
    use crate::graph::build;
    use crate::planner::Action;

    fn photoview() -> TopologyConfig {
        ConfigParser::new()
            .parse_yaml(include_str!("../../templates/topoplan.yaml"), None)
            .expect("template parses")
    }

    fn ids(changeset: &Changeset) -> Vec<&str> {
        changeset.operations.iter().map(|o| o.id.as_str()).collect()
    }

    #[test]
    fn test_plan_photoview_order() {
        let graph = build(&photoview()).expect("graph builds");
        let changeset = plan(&graph).expect("plan");

        assert_eq!(
            ids(&changeset),
            vec![
                "main",
                "Application",
                "Database",
                "Ingress",
                "svc.test.local",
                "photos",
                "database-task",
                "photoview-task",
                "database",
                "photoview",
            ]
        );
        assert!(changeset.operations.iter().all(|o| o.action == Action::Create));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let graph = build(&photoview()).expect("graph builds");
        let first = serde_json::to_string(&plan(&graph).expect("plan")).expect("json");
        let second = serde_json::to_string(&plan(&build(&photoview()).expect("graph")).expect("plan"))
            .expect("json");
        assert_eq!(first, second);
    }

    #[test]
    fn test_creates_follow_their_dependencies() {
        let graph = build(&photoview()).expect("graph builds");
        let changeset = plan(&graph).expect("plan");

        for (i, operation) in changeset.operations.iter().enumerate() {
            for dep in graph.dependencies_of(&operation.id) {
                let dep_index = changeset.position(dep.as_str()).expect("dependency planned");
                assert!(dep_index < i, "{} planned before {}", operation.id, dep);
                assert!(operation.requires.contains(&dep_index));
            }
        }
    }

    #[test]
    fn test_cycle_error_when_validation_bypassed() {
        let mut config = photoview();
        config.services[0].depends_on = vec![String::from("database")];
        config.services[1].depends_on = vec![String::from("photoview")];
        let graph = build(&config).expect("graph builds");

        let err = plan(&graph).unwrap_err();
        assert_eq!(err.nodes, vec![ResourceId::from("database"), ResourceId::from("photoview")]);
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let graph = build(&photoview()).expect("graph builds");
        let dag = DependencyDag::from_graph(&graph);

        let ancestors = dag.ancestors(&ResourceId::from("photos"));
        assert_eq!(
            ancestors.into_iter().collect::<Vec<_>>(),
            vec![ResourceId::from("main"), ResourceId::from("svc.test.local")]
        );

        let descendants = dag.descendants(&ResourceId::from("database"));
        assert_eq!(descendants.into_iter().collect::<Vec<_>>(), vec![ResourceId::from("photoview")]);
    }
}
