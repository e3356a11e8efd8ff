//! Diff engine for comparing desired vs recorded state.
//!
//! This module computes the changeset that moves a recorded snapshot to a
//! desired graph. Unchanged resources produce no operation. Creates and
//! updates come first in dependency order; deletes follow in reverse
//! dependency order of the recorded state.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::plan::{Action, Changeset, Operation};
use super::topo::DependencyDag;
use crate::config::ConfigHasher;
use crate::error::{ConflictError, CycleError, KindConflict, Result};
use crate::graph::{Graph, ResourceId, ResourceSpec};
use crate::state::{ResourceRecord, StateSnapshot};

/// Engine for computing changesets between desired and recorded states.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine {
    /// Fingerprint hasher.
    hasher: ConfigHasher,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Computes the changeset from `prior` to `desired`.
    ///
    /// # Errors
    ///
    /// Returns a conflict error if an identity changed kind, or a cycle
    /// error if either side cannot be ordered.
    pub fn diff(&self, desired: &Graph, prior: &StateSnapshot) -> Result<Changeset> {
        self.diff_resources(desired, &prior.resources)
    }

    /// Computes the changeset that removes every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns a cycle error if the recorded dependencies cannot be ordered.
    pub fn teardown(&self, prior: &StateSnapshot) -> Result<Changeset> {
        self.diff_resources(&Graph::empty(), &prior.resources)
    }

    /// Computes the changeset from a set of records to `desired`.
    ///
    /// # Errors
    ///
    /// See [`DiffEngine::diff`].
    pub fn diff_resources(
        &self,
        desired: &Graph,
        prior: &BTreeMap<ResourceId, ResourceRecord>,
    ) -> Result<Changeset> {
        let conflicts: Vec<KindConflict> = desired
            .resources()
            .filter_map(|resource| {
                prior
                    .get(&resource.id)
                    .filter(|record| record.kind != resource.kind())
                    .map(|record| KindConflict {
                        id: resource.id.clone(),
                        prior: record.kind,
                        desired: resource.kind(),
                    })
            })
            .collect();
        if !conflicts.is_empty() {
            return Err(ConflictError { conflicts }.into());
        }

        let mut operations = self.upserts(desired, prior)?;
        let deletes = Self::deletes(desired, prior, operations.len())?;
        operations.extend(deletes);

        debug!(
            "Diff: {} operations over {} desired and {} recorded resources",
            operations.len(),
            desired.len(),
            prior.len()
        );
        Ok(Changeset { operations })
    }

    /// Creates and updates for `desired`, in creation order.
    pub(crate) fn upserts(
        &self,
        desired: &Graph,
        prior: &BTreeMap<ResourceId, ResourceRecord>,
    ) -> std::result::Result<Vec<Operation>, CycleError> {
        let dag = DependencyDag::from_graph(desired);
        let order = dag.creation_order()?;

        let mut operations: Vec<Operation> = Vec::new();
        let mut index: BTreeMap<ResourceId, usize> = BTreeMap::new();

        for id in order {
            let Some(resource) = desired.get(&id) else {
                continue;
            };
            let depends_on = desired.dependencies_of(&id);
            let record = prior.get(&id);

            let (action, changed_fields) = match record {
                None => (Action::Create, Vec::new()),
                Some(record) => {
                    let fingerprint = self.hasher.fingerprint(&resource.spec, &depends_on);
                    if ConfigHasher::hashes_match(&record.fingerprint, &fingerprint) {
                        debug!("Resource '{}' unchanged", id);
                        continue;
                    }
                    let fields =
                        changed_fields(&record.spec, &resource.spec, &record.depends_on, &depends_on);
                    (Action::Update, fields)
                }
            };

            let requires: Vec<usize> = dag
                .ancestors(&id)
                .iter()
                .filter_map(|ancestor| index.get(ancestor).copied())
                .collect::<BTreeSet<usize>>()
                .into_iter()
                .collect();

            index.insert(id.clone(), operations.len());
            operations.push(Operation {
                action,
                kind: resource.kind(),
                desired: Some(resource.spec.clone()),
                prior: record.cloned(),
                depends_on,
                requires,
                changed_fields,
                id,
            });
        }

        Ok(operations)
    }

    /// Deletes for recorded resources absent from `desired`, dependents
    /// first. Every delete waits for all `upsert_count` earlier operations.
    fn deletes(
        desired: &Graph,
        prior: &BTreeMap<ResourceId, ResourceRecord>,
        upsert_count: usize,
    ) -> std::result::Result<Vec<Operation>, CycleError> {
        let doomed: BTreeSet<&ResourceId> = prior
            .keys()
            .filter(|id| desired.get(*id).is_none())
            .collect();
        if doomed.is_empty() {
            return Ok(Vec::new());
        }

        let dag = DependencyDag::from_records(prior.values());
        let mut order = dag.creation_order()?;
        order.reverse();

        let mut operations: Vec<Operation> = Vec::new();
        let mut index: BTreeMap<ResourceId, usize> = BTreeMap::new();

        for id in order {
            if !doomed.contains(&id) {
                continue;
            }
            let Some(record) = prior.get(&id) else {
                continue;
            };

            let dependents: BTreeSet<usize> = dag
                .descendants(&id)
                .iter()
                .filter_map(|dependent| index.get(dependent).copied())
                .collect();
            let requires: Vec<usize> = (0..upsert_count).chain(dependents).collect();

            index.insert(id.clone(), upsert_count + operations.len());
            operations.push(Operation {
                action: Action::Delete,
                kind: record.kind,
                desired: None,
                prior: Some(record.clone()),
                depends_on: record.depends_on.clone(),
                requires,
                changed_fields: Vec::new(),
                id,
            });
        }

        Ok(operations)
    }
}

/// Names the top-level attributes that differ between two specs of the
/// same kind, plus `depends_on` when the dependency lists differ.
fn changed_fields(
    before: &ResourceSpec,
    after: &ResourceSpec,
    before_deps: &[ResourceId],
    after_deps: &[ResourceId],
) -> Vec<String> {
    let before = serde_json::to_value(before).unwrap_or_default();
    let after = serde_json::to_value(after).unwrap_or_default();

    let mut fields = BTreeSet::new();
    if let (Some(b), Some(a)) = (before.as_object(), after.as_object()) {
        for key in b.keys().chain(a.keys()) {
            if key != "kind" && b.get(key) != a.get(key) {
                fields.insert(key.clone());
            }
        }
    }
    if before_deps != after_deps {
        fields.insert(String::from("depends_on"));
    }
    fields.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, TopologyConfig};
    use crate::error::TopoplanError;
    use crate::graph::{ResourceKind, build};
    use chrono::Utc;

    fn photoview() -> TopologyConfig {
        ConfigParser::new()
            .parse_yaml(include_str!("../../templates/topoplan.yaml"), None)
            .expect("template parses")
    }

    /// Records every resource of `graph` as if it had been applied.
    fn applied(graph: &Graph) -> BTreeMap<ResourceId, ResourceRecord> {
        let hasher = ConfigHasher::new();
        graph
            .resources()
            .map(|resource| {
                let depends_on = graph.dependencies_of(&resource.id);
                let record = ResourceRecord {
                    id: resource.id.clone(),
                    kind: resource.kind(),
                    spec: resource.spec.clone(),
                    fingerprint: hasher.fingerprint(&resource.spec, &depends_on),
                    depends_on,
                    physical_id: format!("{}-0001", resource.kind()),
                    outputs: BTreeMap::new(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                };
                (resource.id.clone(), record)
            })
            .collect()
    }

    fn summary(changeset: &Changeset) -> Vec<(Action, &str)> {
        changeset
            .operations
            .iter()
            .map(|o| (o.action, o.id.as_str()))
            .collect()
    }

    #[test]
    fn test_empty_state_creates_everything() {
        let graph = build(&photoview()).expect("graph builds");
        let changeset = DiffEngine::new()
            .diff(&graph, &StateSnapshot::new("photoview", "test"))
            .expect("diff");

        assert_eq!(changeset.len(), 10);
        assert_eq!(changeset.count(Action::Create), 10);
        assert_eq!(changeset.ready_operations().len(), 3);
    }

    #[test]
    fn test_no_changes_after_apply() {
        let graph = build(&photoview()).expect("graph builds");
        let changeset = DiffEngine::new()
            .diff_resources(&graph, &applied(&graph))
            .expect("diff");

        assert!(changeset.is_empty());
        assert_eq!(changeset.to_string(), "No changes required");
    }

    #[test]
    fn test_update_lists_changed_fields() {
        let config = photoview();
        let prior = applied(&build(&config).expect("graph builds"));

        let mut changed = config;
        changed.services[0].image = String::from("viktorstrate/photoview:2");
        changed.services[0].cpu = 512;
        let graph = build(&changed).expect("graph builds");

        let changeset = DiffEngine::new().diff_resources(&graph, &prior).expect("diff");
        assert_eq!(summary(&changeset), vec![(Action::Update, "photoview-task")]);

        let operation = &changeset.operations[0];
        assert_eq!(operation.changed_fields, vec!["cpu", "image"]);
        assert!(operation.prior.is_some());
        assert!(operation.desired.is_some());
        assert!(operation.requires.is_empty());
    }

    #[test]
    fn test_dependency_change_is_an_update() {
        let config = photoview();
        let prior = applied(&build(&config).expect("graph builds"));

        let mut changed = config;
        changed.services[0].depends_on = vec![String::from("database")];
        let graph = build(&changed).expect("graph builds");

        // photoview already depends on database through discovery
        let changeset = DiffEngine::new().diff_resources(&graph, &prior).expect("diff");
        assert_eq!(summary(&changeset), vec![(Action::Update, "photoview")]);
        assert_eq!(changeset.operations[0].changed_fields, vec!["depends_on"]);
    }

    #[test]
    fn test_removed_service_deleted_dependents_first() {
        let config = photoview();
        let prior = applied(&build(&config).expect("graph builds"));

        let mut reduced = config;
        reduced.services.retain(|s| s.name == "database");
        let graph = build(&reduced).expect("graph builds");

        let changeset = DiffEngine::new().diff_resources(&graph, &prior).expect("diff");
        assert_eq!(
            summary(&changeset),
            vec![(Action::Delete, "photoview"), (Action::Delete, "photoview-task")]
        );
        assert_eq!(changeset.operations[1].requires, vec![0]);
        assert_eq!(changeset.operations[0].kind, ResourceKind::Service);
        assert!(changeset.operations[0].desired.is_none());
    }

    #[test]
    fn test_teardown_reverses_creation_order() {
        let graph = build(&photoview()).expect("graph builds");
        let mut snapshot = StateSnapshot::new("photoview", "test");
        snapshot.resources = applied(&graph);

        let changeset = DiffEngine::new().teardown(&snapshot).expect("teardown");
        let ids: Vec<&str> = changeset.operations.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "photoview",
                "database",
                "photoview-task",
                "database-task",
                "photos",
                "svc.test.local",
                "Ingress",
                "Database",
                "Application",
                "main",
            ]
        );
        assert_eq!(changeset.count(Action::Delete), 10);

        let main = changeset.position("main").expect("main deleted");
        assert_eq!(changeset.operations[main].requires.len(), 9);
    }

    #[test]
    fn test_deletes_wait_for_upserts() {
        let config = photoview();
        let prior = applied(&build(&config).expect("graph builds"));

        let mut changed = config;
        changed.services[1].image = String::from("mariadb:10.6");
        changed.services[0].load_balancer = None;
        changed.networks[0].subnets.retain(|s| s.name != "Database");
        let graph = build(&changed).expect("graph builds");

        let changeset = DiffEngine::new().diff_resources(&graph, &prior).expect("diff");
        assert_eq!(
            summary(&changeset),
            vec![
                (Action::Update, "database-task"),
                (Action::Update, "photoview"),
                (Action::Delete, "Database"),
            ]
        );
        assert_eq!(changeset.operations[2].requires, vec![0, 1]);
    }

    #[test]
    fn test_kind_conflict_rejected() {
        let config = photoview();
        let mut prior = applied(&build(&config).expect("graph builds"));
        if let Some(record) = prior.get_mut("photos") {
            record.kind = ResourceKind::Namespace;
        }

        let graph = build(&config).expect("graph builds");
        let err = DiffEngine::new().diff_resources(&graph, &prior).unwrap_err();
        match err {
            TopoplanError::Conflict(conflict) => {
                assert_eq!(conflict.conflicts.len(), 1);
                assert_eq!(conflict.conflicts[0].id.as_str(), "photos");
                assert_eq!(conflict.conflicts[0].prior, ResourceKind::Namespace);
                assert_eq!(conflict.conflicts[0].desired, ResourceKind::Cluster);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_reserved_subnet_redeclared_as_cluster_conflicts() {
        let config = photoview();
        let prior = applied(&build(&config).expect("graph builds"));
        assert!(matches!(
            prior.get("Database").map(|r| &r.spec),
            Some(crate::graph::ResourceSpec::Subnet(subnet)) if subnet.reserved
        ));

        let mut desired = config;
        desired.networks[0].subnets.retain(|s| s.name != "Database");
        let mut cluster = desired.clusters[0].clone();
        cluster.name = String::from("Database");
        desired.clusters.push(cluster);

        let graph = build(&desired).expect("graph builds");
        let err = DiffEngine::new().diff_resources(&graph, &prior).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_CONFLICT);
        match err {
            TopoplanError::Conflict(conflict) => {
                assert_eq!(conflict.conflicts.len(), 1);
                assert_eq!(conflict.conflicts[0].id.as_str(), "Database");
                assert_eq!(conflict.conflicts[0].prior, ResourceKind::Subnet);
                assert_eq!(conflict.conflicts[0].desired, ResourceKind::Cluster);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_changed_fields_ignores_kind_tag() {
        let graph = build(&photoview()).expect("graph builds");
        let spec = &graph.get("main").expect("main exists").spec;
        assert!(changed_fields(spec, spec, &[], &[]).is_empty());
    }
}
