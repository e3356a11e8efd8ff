//! Reconciler driving whole runs.
//!
//! This module ties the pipeline together: build and validate the graph,
//! diff it against the recorded snapshot, execute the changeset and write
//! the resulting snapshot. Apply and destroy hold the state lock for their
//! whole duration and release it on every exit path.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{ProvisioningBackend, RetryPolicy};
use crate::config::{ConfigHasher, TopologyConfig};
use crate::error::{EXIT_HARD_FAILURE, EXIT_OK, EXIT_PARTIAL, Result, StateError, TopoplanError};
use crate::graph::{Graph, build, validate};
use crate::planner::{Changeset, DiffEngine, ExecutionReport, PlanExecutor};
use crate::state::{HistoryEntry, RunOperation, StateSnapshot, StateStore, generate_holder_id};

/// Reconciler for one declaration and one state store.
pub struct Reconciler<'a, S: StateStore> {
    /// Declaration.
    config: &'a TopologyConfig,
    /// State store.
    state_store: &'a S,
    /// Executor for changesets.
    executor: PlanExecutor,
    /// Declaration hasher.
    hasher: ConfigHasher,
    /// Diff engine.
    diff_engine: DiffEngine,
    /// Lock holder identity.
    holder: String,
}

/// Result of an apply or destroy run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Type of run.
    pub operation: RunOperation,
    /// The changeset the run planned.
    pub changeset: Changeset,
    /// What execution achieved. `None` when nothing was executed.
    pub execution: Option<ExecutionReport>,
}

impl RunReport {
    /// Returns true if every planned operation was applied.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.execution
            .as_ref()
            .is_none_or(ExecutionReport::is_complete)
    }

    /// Exit code for this run: 0 when complete, 5 when nothing succeeded,
    /// 4 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match &self.execution {
            Some(report) if report.is_hard_failure() => EXIT_HARD_FAILURE,
            Some(report) if !report.is_complete() => EXIT_PARTIAL,
            _ => EXIT_OK,
        }
    }
}

impl<'a, S: StateStore> Reconciler<'a, S> {
    /// Creates a new reconciler.
    ///
    /// Concurrency and retries come from the declaration's `execution`
    /// section.
    #[must_use]
    pub fn new(
        config: &'a TopologyConfig,
        state_store: &'a S,
        backend: Arc<dyn ProvisioningBackend>,
    ) -> Self {
        let executor = PlanExecutor::new(backend)
            .with_max_parallel(config.execution.max_parallel)
            .with_retry(RetryPolicy::from(&config.execution.retry));
        Self {
            config,
            state_store,
            executor,
            hasher: ConfigHasher::new(),
            diff_engine: DiffEngine::new(),
            holder: generate_holder_id(),
        }
    }

    /// Overrides the concurrency bound.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.executor = self.executor.with_max_parallel(max_parallel);
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.executor = self.executor.with_retry(retry);
        self
    }

    /// Builds and validates the resource graph.
    ///
    /// # Errors
    ///
    /// Returns a schema error for malformed declarations and a validation
    /// error listing every structural violation.
    pub fn compile(&self) -> Result<Graph> {
        let graph = build(self.config)?;
        validate(&graph)?;
        debug!("Compiled graph with {} resources", graph.len());
        Ok(graph)
    }

    /// Plans the changeset against the recorded snapshot. Writes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails, the snapshot cannot be read,
    /// or an identity changed kind.
    pub async fn plan(&self) -> Result<Changeset> {
        let graph = self.compile()?;
        let snapshot = self.load_snapshot().await?;
        self.diff_engine.diff(&graph, &snapshot)
    }

    /// Plans the teardown of every recorded resource. Writes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read or ordered.
    pub async fn plan_destroy(&self) -> Result<Changeset> {
        let snapshot = self.load_snapshot().await?;
        self.diff_engine.teardown(&snapshot)
    }

    /// Plans and executes the changeset, then records the outcome.
    ///
    /// Planning errors leave the snapshot untouched. A run that stops
    /// part-way writes a `partial` snapshot holding exactly the operations
    /// that succeeded.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken, planning fails, or
    /// the snapshot cannot be written.
    pub async fn apply(&self) -> Result<RunReport> {
        info!(
            "Applying {} ({} resources declared)",
            self.config.qualified_name(),
            self.config.resource_count()
        );
        let lock = self.state_store.acquire_lock(&self.holder, "apply").await?;
        let result = self.apply_locked(None).await;
        self.release(&lock.lock_id).await;
        result
    }

    /// Like [`Self::apply`], but only executes if the changeset planned
    /// under the lock equals `approved`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::StaleChangeset`] without touching the snapshot
    /// if the recorded state moved since `approved` was planned, plus the
    /// errors of [`Self::apply`].
    pub async fn apply_approved(&self, approved: &Changeset) -> Result<RunReport> {
        info!(
            "Applying approved changeset for {} ({} operations)",
            self.config.qualified_name(),
            approved.len()
        );
        let lock = self.state_store.acquire_lock(&self.holder, "apply").await?;
        let result = self.apply_locked(Some(approved)).await;
        self.release(&lock.lock_id).await;
        result
    }

    /// Removes every recorded resource, dependents first.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken, the snapshot cannot be
    /// read, or the snapshot cannot be written.
    pub async fn destroy(&self) -> Result<RunReport> {
        info!("Destroying {}", self.config.qualified_name());
        let lock = self.state_store.acquire_lock(&self.holder, "destroy").await?;
        let result = self.destroy_locked(None).await;
        self.release(&lock.lock_id).await;
        result
    }

    /// Like [`Self::destroy`], but only executes if the teardown planned
    /// under the lock equals `approved`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::StaleChangeset`] if the recorded state moved
    /// since `approved` was planned, plus the errors of [`Self::destroy`].
    pub async fn destroy_approved(&self, approved: &Changeset) -> Result<RunReport> {
        info!("Destroying {} as approved", self.config.qualified_name());
        let lock = self.state_store.acquire_lock(&self.holder, "destroy").await?;
        let result = self.destroy_locked(Some(approved)).await;
        self.release(&lock.lock_id).await;
        result
    }

    async fn apply_locked(&self, approved: Option<&Changeset>) -> Result<RunReport> {
        let graph = self.compile()?;
        let mut snapshot = self.load_snapshot().await?;
        let changeset = self.diff_engine.diff(&graph, &snapshot)?;
        ensure_approved(approved, &changeset)?;
        let config_hash = self.hasher.hash_config(self.config);

        if changeset.is_empty() {
            info!("No changes required, state is converged");
            if snapshot.is_partial() || snapshot.config_hash != config_hash {
                snapshot.mark_complete(&config_hash);
                self.state_store.save(&snapshot).await?;
            }
            return Ok(RunReport {
                operation: RunOperation::Apply,
                changeset,
                execution: None,
            });
        }

        self.execute(RunOperation::Apply, changeset, snapshot, &config_hash)
            .await
    }

    async fn destroy_locked(&self, approved: Option<&Changeset>) -> Result<RunReport> {
        let snapshot = self.load_snapshot().await?;
        let changeset = self.diff_engine.teardown(&snapshot)?;
        ensure_approved(approved, &changeset)?;

        if changeset.is_empty() {
            info!("Nothing recorded, nothing to destroy");
            return Ok(RunReport {
                operation: RunOperation::Destroy,
                changeset,
                execution: None,
            });
        }

        self.execute(RunOperation::Destroy, changeset, snapshot, "")
            .await
    }

    async fn execute(
        &self,
        operation: RunOperation,
        changeset: Changeset,
        mut snapshot: StateSnapshot,
        config_hash: &str,
    ) -> Result<RunReport> {
        let report = self.executor.execute(&changeset, &mut snapshot).await;

        if report.is_complete() {
            snapshot.mark_complete(config_hash);
        } else {
            warn!(
                "Run stopped with {} operations outstanding, writing partial state",
                report.pending()
            );
            snapshot.mark_partial(report.failed.clone(), report.not_attempted.clone());
        }

        let recorded_hash = if report.is_complete() {
            config_hash.to_string()
        } else {
            snapshot.config_hash.clone()
        };
        snapshot.add_history(HistoryEntry::new(
            operation,
            &recorded_hash,
            report.applied.len(),
            report.pending(),
        ));
        self.state_store.save(&snapshot).await?;
        info!("State saved ({} resources recorded)", snapshot.resources.len());

        Ok(RunReport {
            operation,
            changeset,
            execution: Some(report),
        })
    }

    async fn load_snapshot(&self) -> Result<StateSnapshot> {
        let snapshot = self.state_store.load().await?.unwrap_or_else(|| {
            StateSnapshot::new(&self.config.project.name, &self.config.project.environment)
        });
        if snapshot.is_partial() {
            info!(
                "Resuming from partial state ({} operations outstanding)",
                snapshot.failed.len() + snapshot.not_attempted.len()
            );
        }
        Ok(snapshot)
    }

    async fn release(&self, lock_id: &str) {
        if let Err(err) = self.state_store.release_lock(lock_id).await {
            warn!("Failed to release state lock: {}", err);
        }
    }
}

fn ensure_approved(approved: Option<&Changeset>, current: &Changeset) -> Result<()> {
    match approved {
        Some(approved) if approved != current => {
            warn!(
                "Approved changeset is stale: {} operations approved, {} planned",
                approved.len(),
                current.len()
            );
            Err(TopoplanError::State(StateError::StaleChangeset {
                approved: approved.len(),
                current: current.len(),
            }))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::config::ConfigParser;
    use crate::planner::Action;
    use crate::state::{LocalStateStore, SnapshotStatus};
    use std::time::Duration;
    use tempfile::TempDir;

    fn photoview() -> TopologyConfig {
        ConfigParser::new()
            .parse_yaml(include_str!("../templates/topoplan.yaml"), None)
            .expect("template parses")
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2), 2.0)
    }

    #[tokio::test]
    async fn test_apply_then_plan_is_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::in_dir(temp_dir.path());
        let config = photoview();
        let reconciler = Reconciler::new(&config, &store, Arc::new(SimulatedBackend::new()));

        let report = reconciler.apply().await.expect("apply succeeds");
        assert!(report.is_complete());
        assert_eq!(report.exit_code(), EXIT_OK);
        assert_eq!(report.changeset.count(Action::Create), 10);

        let snapshot = store.load().await.expect("load").expect("snapshot written");
        assert_eq!(snapshot.status, SnapshotStatus::Complete);
        assert_eq!(snapshot.resources.len(), 10);
        assert_eq!(snapshot.config_hash, ConfigHasher::new().hash_config(&config));
        assert_eq!(snapshot.history.len(), 1);

        let changeset = reconciler.plan().await.expect("plan");
        assert!(changeset.is_empty());
        assert!(store.get_lock_info().await.expect("lock info").is_none());
    }

    #[tokio::test]
    async fn test_validation_error_writes_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::in_dir(temp_dir.path());
        let mut config = photoview();
        config.services[0].depends_on = vec![String::from("database")];
        config.services[1].depends_on = vec![String::from("photoview")];

        let reconciler = Reconciler::new(&config, &store, Arc::new(SimulatedBackend::new()));
        let err = reconciler.apply().await.unwrap_err();

        assert!(matches!(err, TopoplanError::Validation(_)));
        assert!(store.load().await.expect("load").is_none());
        assert!(store.get_lock_info().await.expect("lock info").is_none());
    }

    #[tokio::test]
    async fn test_partial_apply_then_resume() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::in_dir(temp_dir.path());
        let config = photoview();

        let failing = Arc::new(SimulatedBackend::new().with_permanent_failure("photos"));
        let report = Reconciler::new(&config, &store, failing)
            .with_max_parallel(1)
            .with_retry(fast_retry())
            .apply()
            .await
            .expect("run completes");

        assert_eq!(report.exit_code(), EXIT_PARTIAL);
        let snapshot = store.load().await.expect("load").expect("snapshot written");
        assert_eq!(snapshot.status, SnapshotStatus::Partial);
        assert_eq!(snapshot.resources.len(), 5);
        assert_eq!(snapshot.failed.len(), 1);
        assert_eq!(snapshot.not_attempted.len(), 4);
        assert!(snapshot.config_hash.is_empty());
        assert_eq!(snapshot.history.last().map(|h| h.success), Some(false));

        let reconciler = Reconciler::new(&config, &store, Arc::new(SimulatedBackend::new()));
        let remaining = reconciler.plan().await.expect("plan");
        let remaining_ids: Vec<&str> = remaining.operations.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(
            remaining_ids,
            vec!["photos", "database-task", "photoview-task", "database", "photoview"]
        );

        let resumed = reconciler.apply().await.expect("apply succeeds");
        assert!(resumed.is_complete());
        let snapshot = store.load().await.expect("load").expect("snapshot written");
        assert_eq!(snapshot.status, SnapshotStatus::Complete);
        assert_eq!(snapshot.resources.len(), 10);
        assert!(snapshot.failed.is_empty());
    }

    #[tokio::test]
    async fn test_hard_failure_exit_code() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::in_dir(temp_dir.path());
        let config = photoview();

        let failing = Arc::new(SimulatedBackend::new().with_permanent_failure("main"));
        let report = Reconciler::new(&config, &store, failing)
            .with_max_parallel(1)
            .apply()
            .await
            .expect("run completes");

        assert_eq!(report.exit_code(), EXIT_HARD_FAILURE);
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn test_destroy_tears_down_in_reverse() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::in_dir(temp_dir.path());
        let config = photoview();
        let backend = Arc::new(SimulatedBackend::new());
        let reconciler = Reconciler::new(&config, &store, backend.clone());
        reconciler.apply().await.expect("apply succeeds");

        let dry_run = reconciler.plan_destroy().await.expect("plan destroy");
        assert_eq!(dry_run.count(Action::Delete), 10);

        let report = reconciler.destroy().await.expect("destroy succeeds");
        assert!(report.is_complete());
        let order: Vec<&str> = report.changeset.operations.iter().map(|o| o.id.as_str()).collect();
        let service = order.iter().position(|id| *id == "photoview").expect("service deleted");
        let cluster = order.iter().position(|id| *id == "photos").expect("cluster deleted");
        let network = order.iter().position(|id| *id == "main").expect("network deleted");
        assert!(service < cluster && cluster < network);

        let snapshot = store.load().await.expect("load").expect("snapshot written");
        assert!(snapshot.resources.is_empty());
        assert!(backend.live_resources().await.is_empty());

        let again = reconciler.destroy().await.expect("destroy succeeds");
        assert!(again.changeset.is_empty());
        assert!(again.execution.is_none());
    }

    #[tokio::test]
    async fn test_apply_refused_while_locked() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::in_dir(temp_dir.path());
        let config = photoview();
        store
            .acquire_lock("someone-else", "apply")
            .await
            .expect("lock acquired");

        let reconciler = Reconciler::new(&config, &store, Arc::new(SimulatedBackend::new()));
        let err = reconciler.apply().await.unwrap_err();

        assert!(matches!(
            err,
            TopoplanError::State(StateError::LockedByOther { .. })
        ));
        assert!(store.load().await.expect("load").is_none());
    }

    #[tokio::test]
    async fn test_stale_approval_is_refused() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::in_dir(temp_dir.path());
        let config = photoview();
        let reconciler = Reconciler::new(&config, &store, Arc::new(SimulatedBackend::new()));

        let approved = reconciler.plan().await.expect("plan");
        assert_eq!(approved.len(), 10);

        // Another run lands between approval and execution.
        let other = Reconciler::new(&config, &store, Arc::new(SimulatedBackend::new()));
        other.apply().await.expect("concurrent apply");
        let before = store.load().await.expect("load").expect("snapshot written");

        let err = reconciler.apply_approved(&approved).await.unwrap_err();
        assert!(matches!(
            err,
            TopoplanError::State(StateError::StaleChangeset {
                approved: 10,
                current: 0
            })
        ));

        let after = store.load().await.expect("load").expect("snapshot kept");
        assert_eq!(after.history.len(), before.history.len());
        assert!(store.get_lock_info().await.expect("lock info").is_none());
    }

    #[tokio::test]
    async fn test_matching_approval_is_applied() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::in_dir(temp_dir.path());
        let config = photoview();
        let reconciler = Reconciler::new(&config, &store, Arc::new(SimulatedBackend::new()));

        let approved = reconciler.plan().await.expect("plan");
        let report = reconciler.apply_approved(&approved).await.expect("apply");
        assert!(report.is_complete());
        assert_eq!(report.changeset, approved);

        let teardown = reconciler.plan_destroy().await.expect("plan destroy");
        let report = reconciler.destroy_approved(&teardown).await.expect("destroy");
        assert_eq!(report.changeset.count(Action::Delete), 10);
    }
}
