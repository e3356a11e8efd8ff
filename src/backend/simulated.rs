//! In-memory provisioning backend.
//!
//! Materializes operations into a map of live resources and hands out
//! physical identifiers of the form `<kind>-<8 hex chars>`. Failures can be
//! injected per resource for exercising retries and partial runs.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::adapter::{AppliedState, ProvisioningBackend};
use crate::error::BackendError;
use crate::graph::{ResourceId, ResourceSpec};
use crate::planner::{Action, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InjectedFailure {
    Transient { remaining: u32 },
    Permanent,
}

#[derive(Debug, Default)]
struct Inner {
    live: BTreeMap<ResourceId, AppliedState>,
    failures: BTreeMap<ResourceId, InjectedFailure>,
    calls: Vec<(Action, ResourceId)>,
}

/// Backend that keeps resources in memory.
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    inner: Mutex<Inner>,
}

impl SimulatedBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes operations on `id` fail retryably `times` times, then succeed.
    #[must_use]
    pub fn with_transient_failure(mut self, id: &str, times: u32) -> Self {
        self.inner
            .get_mut()
            .failures
            .insert(ResourceId::from(id), InjectedFailure::Transient { remaining: times });
        self
    }

    /// Makes every operation on `id` fail permanently.
    #[must_use]
    pub fn with_permanent_failure(mut self, id: &str) -> Self {
        self.inner
            .get_mut()
            .failures
            .insert(ResourceId::from(id), InjectedFailure::Permanent);
        self
    }

    /// Identities currently materialized.
    pub async fn live_resources(&self) -> Vec<ResourceId> {
        self.inner.lock().await.live.keys().cloned().collect()
    }

    /// Every call received, in arrival order, failed ones included.
    pub async fn calls(&self) -> Vec<(Action, ResourceId)> {
        self.inner.lock().await.calls.clone()
    }

    fn injected_failure(inner: &mut Inner, operation: &Operation) -> Option<BackendError> {
        let failure = inner.failures.get_mut(&operation.id)?;
        match failure {
            InjectedFailure::Permanent => Some(BackendError::permanent(
                operation.description(),
                "injected permanent failure",
            )),
            InjectedFailure::Transient { remaining } if *remaining > 0 => {
                *remaining -= 1;
                Some(BackendError::transient(
                    operation.description(),
                    "injected transient failure",
                ))
            }
            InjectedFailure::Transient { .. } => None,
        }
    }
}

/// Generates a physical identifier for a resource kind.
fn physical_id(operation: &Operation) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("{}-{suffix}", operation.kind)
}

/// Outputs a real backend would report for `spec`.
fn outputs_for(physical_id: &str, spec: &ResourceSpec) -> AppliedState {
    let state = AppliedState::new(physical_id);
    match spec {
        ResourceSpec::Network(network) => state.with_output("cidr", network.cidr.to_string()),
        ResourceSpec::Subnet(subnet) => state
            .with_output("cidr", subnet.cidr.to_string())
            .with_output("visibility", subnet.visibility.to_string()),
        ResourceSpec::Namespace(_) => state,
        ResourceSpec::Cluster(cluster) => {
            state.with_output("instance_type", cluster.capacity.instance_type.clone())
        }
        ResourceSpec::Task(task) => state.with_output("image", task.image.clone()),
        ResourceSpec::Service(service) => {
            let mut state = state;
            if let Some(discovery) = &service.discovery {
                state = state.with_output("dns_name", discovery.qualified_name());
            }
            if let Some(lb) = service.load_balancer {
                let scheme = if lb.public { "internet-facing" } else { "internal" };
                state = state.with_output("load_balancer", scheme);
            }
            state
        }
    }
}

#[async_trait]
impl ProvisioningBackend for SimulatedBackend {
    async fn apply(&self, operation: &Operation) -> Result<AppliedState, BackendError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push((operation.action, operation.id.clone()));

        if let Some(err) = Self::injected_failure(&mut inner, operation) {
            debug!("Simulated failure for {}", operation.description());
            return Err(err);
        }

        match operation.action {
            Action::Create | Action::Update => {
                let Some(spec) = &operation.desired else {
                    return Err(BackendError::permanent(
                        operation.description(),
                        "no desired state",
                    ));
                };
                if operation.action == Action::Create && inner.live.contains_key(&operation.id) {
                    return Err(BackendError::permanent(
                        operation.description(),
                        "resource already exists",
                    ));
                }
                // Updates keep the physical identity, also across processes.
                let id = inner
                    .live
                    .get(&operation.id)
                    .map(|s| s.physical_id.clone())
                    .or_else(|| operation.prior.as_ref().map(|p| p.physical_id.clone()))
                    .unwrap_or_else(|| physical_id(operation));
                let applied = outputs_for(&id, spec);
                inner.live.insert(operation.id.clone(), applied.clone());
                debug!("Simulated {} -> {}", operation.description(), id);
                Ok(applied)
            }
            Action::Delete => {
                let removed = inner.live.remove(&operation.id);
                let id = removed
                    .map(|s| s.physical_id)
                    .or_else(|| operation.prior.as_ref().map(|p| p.physical_id.clone()))
                    .unwrap_or_default();
                debug!("Simulated {} ({})", operation.description(), id);
                Ok(AppliedState::new(id))
            }
        }
    }

    fn backend_type(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::graph::build;
    use crate::planner::plan;

    fn photoview_plan() -> crate::planner::Changeset {
        let config = ConfigParser::new()
            .parse_yaml(include_str!("../../templates/topoplan.yaml"), None)
            .expect("template parses");
        plan(&build(&config).expect("graph builds")).expect("plan")
    }

    fn operation(changeset: &crate::planner::Changeset, id: &str) -> Operation {
        let index = changeset.position(id).expect("operation planned");
        changeset.operations[index].clone()
    }

    #[tokio::test]
    async fn test_create_assigns_physical_id_and_outputs() {
        let backend = SimulatedBackend::new();
        let changeset = photoview_plan();

        let applied = backend
            .apply(&operation(&changeset, "database"))
            .await
            .expect("create succeeds");
        assert!(applied.physical_id.starts_with("service-"));
        assert_eq!(applied.physical_id.len(), "service-".len() + 8);
        assert_eq!(
            applied.outputs.get("dns_name").map(String::as_str),
            Some("db.svc.test.local")
        );

        let network = backend
            .apply(&operation(&changeset, "main"))
            .await
            .expect("create succeeds");
        assert_eq!(network.outputs.get("cidr").map(String::as_str), Some("10.0.0.0/21"));
        assert_eq!(backend.live_resources().await.len(), 2);
    }

    #[tokio::test]
    async fn test_create_twice_is_rejected() {
        let backend = SimulatedBackend::new();
        let create = operation(&photoview_plan(), "main");

        tokio_test::assert_ok!(backend.apply(&create).await);
        let err = backend.apply(&create).await.unwrap_err();
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_update_keeps_physical_id() {
        let backend = SimulatedBackend::new();
        let mut op = operation(&photoview_plan(), "photos");
        let created = backend.apply(&op).await.expect("create succeeds");

        op.action = Action::Update;
        let updated = backend.apply(&op).await.expect("update succeeds");
        assert_eq!(created.physical_id, updated.physical_id);
    }

    #[tokio::test]
    async fn test_delete_removes_live_resource() {
        let backend = SimulatedBackend::new();
        let mut op = operation(&photoview_plan(), "main");
        backend.apply(&op).await.expect("create succeeds");

        op.action = Action::Delete;
        op.desired = None;
        backend.apply(&op).await.expect("delete succeeds");
        assert!(backend.live_resources().await.is_empty());
        assert_eq!(
            backend.calls().await,
            vec![
                (Action::Create, ResourceId::from("main")),
                (Action::Delete, ResourceId::from("main")),
            ]
        );
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let backend = SimulatedBackend::new()
            .with_transient_failure("main", 1)
            .with_permanent_failure("photos");
        let changeset = photoview_plan();

        let first = backend.apply(&operation(&changeset, "main")).await.unwrap_err();
        assert!(first.retryable);
        tokio_test::assert_ok!(backend.apply(&operation(&changeset, "main")).await);

        for _ in 0..2 {
            let err = backend.apply(&operation(&changeset, "photos")).await.unwrap_err();
            assert!(!err.retryable);
        }
        assert_eq!(backend.backend_type(), "simulated");
    }
}
