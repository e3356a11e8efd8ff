//! Plan executor for applying changesets.
//!
//! Operations are dispatched to the backend on a bounded pool of tokio
//! tasks. An operation starts only after every operation it requires has
//! succeeded. The first failure stops dispatch: operations already in
//! flight finish, nothing new starts.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::plan::{Action, Changeset, Operation};
use crate::backend::{AppliedState, ProvisioningBackend, RetryPolicy};
use crate::config::ConfigHasher;
use crate::error::BackendError;
use crate::graph::ResourceId;
use crate::state::{PendingOperation, ResourceRecord, StateSnapshot};

/// Default number of operations in flight.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Executor for changesets.
#[derive(Clone)]
pub struct PlanExecutor {
    /// Backend receiving operations.
    backend: Arc<dyn ProvisioningBackend>,
    /// Upper bound of concurrent operations.
    max_parallel: usize,
    /// Retry policy for retryable failures.
    retry: RetryPolicy,
}

/// Outcome of executing a changeset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    /// Identities of operations that succeeded, in completion order.
    pub applied: Vec<ResourceId>,
    /// Operations that failed, in changeset order.
    pub failed: Vec<PendingOperation>,
    /// Operations never dispatched, in changeset order.
    pub not_attempted: Vec<PendingOperation>,
}

impl ExecutionReport {
    /// Returns true if every operation succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.not_attempted.is_empty()
    }

    /// Returns true if operations failed and none succeeded.
    #[must_use]
    pub fn is_hard_failure(&self) -> bool {
        self.applied.is_empty() && !self.failed.is_empty()
    }

    /// Number of operations not applied.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.failed.len() + self.not_attempted.len()
    }
}

impl std::fmt::Debug for PlanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("backend", &self.backend.backend_type())
            .field("max_parallel", &self.max_parallel)
            .field("retry", &self.retry)
            .finish()
    }
}

impl PlanExecutor {
    /// Creates a new plan executor with default concurrency and retries.
    #[must_use]
    pub fn new(backend: Arc<dyn ProvisioningBackend>) -> Self {
        Self {
            backend,
            max_parallel: DEFAULT_MAX_PARALLEL,
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the concurrency bound. Values below one are raised to one.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Executes a changeset, recording every success into `snapshot`.
    ///
    /// On return `snapshot` reflects exactly the operations that succeeded.
    pub async fn execute(&self, changeset: &Changeset, snapshot: &mut StateSnapshot) -> ExecutionReport {
        let operations = &changeset.operations;
        info!(
            "Executing changeset with {} operations (max {} in flight)",
            operations.len(),
            self.max_parallel
        );

        let mut report = ExecutionReport::default();
        if operations.is_empty() {
            return report;
        }

        let mut started = vec![false; operations.len()];
        let mut succeeded = vec![false; operations.len()];
        let mut errors: Vec<Option<String>> = vec![None; operations.len()];
        let mut stopped = false;
        let mut in_flight: JoinSet<(usize, Result<AppliedState, BackendError>)> = JoinSet::new();

        loop {
            if !stopped {
                self.dispatch(operations, &mut started, &succeeded, &mut in_flight);
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            match joined {
                Ok((index, Ok(applied))) => {
                    let Some(operation) = operations.get(index) else {
                        continue;
                    };
                    debug!("Applied {}", operation.description());
                    succeeded[index] = true;
                    record(operation, applied, snapshot);
                    report.applied.push(operation.id.clone());
                }
                Ok((index, Err(err))) => {
                    error!("Operation failed: {}", err);
                    errors[index] = Some(err.to_string());
                    stopped = true;
                }
                Err(join_err) => {
                    error!("Worker task aborted: {}", join_err);
                    stopped = true;
                }
            }
        }

        for (index, operation) in operations.iter().enumerate() {
            if succeeded[index] {
                continue;
            }
            if started[index] {
                let message = errors[index]
                    .take()
                    .unwrap_or_else(|| String::from("worker task aborted"));
                report.failed.push(pending(operation, Some(message)));
            } else {
                report.not_attempted.push(pending(operation, None));
            }
        }

        if report.is_complete() {
            info!("Changeset applied: {} operations", report.applied.len());
        } else {
            error!(
                "Changeset stopped: {} applied, {} failed, {} not attempted",
                report.applied.len(),
                report.failed.len(),
                report.not_attempted.len()
            );
        }
        report
    }

    /// Spawns every ready operation while capacity remains.
    fn dispatch(
        &self,
        operations: &[Operation],
        started: &mut [bool],
        succeeded: &[bool],
        in_flight: &mut JoinSet<(usize, Result<AppliedState, BackendError>)>,
    ) {
        for (index, operation) in operations.iter().enumerate() {
            if in_flight.len() >= self.max_parallel {
                break;
            }
            if started[index] {
                continue;
            }
            let ready = operation
                .requires
                .iter()
                .all(|r| succeeded.get(*r).copied().unwrap_or(false));
            if !ready {
                continue;
            }

            started[index] = true;
            debug!("Dispatching {}", operation.description());
            let backend = Arc::clone(&self.backend);
            let retry = self.retry.clone();
            let operation = operation.clone();
            in_flight.spawn(async move {
                let result = retry.apply(backend.as_ref(), &operation).await;
                (index, result)
            });
        }
    }
}

fn pending(operation: &Operation, error: Option<String>) -> PendingOperation {
    PendingOperation {
        action: operation.action,
        id: operation.id.clone(),
        kind: operation.kind,
        error,
    }
}

/// Folds one successful operation into the snapshot.
fn record(operation: &Operation, applied: AppliedState, snapshot: &mut StateSnapshot) {
    match operation.action {
        Action::Delete => {
            snapshot.remove_record(operation.id.as_str());
        }
        Action::Create | Action::Update => {
            let Some(spec) = operation.desired.clone() else {
                return;
            };
            let now = Utc::now();
            let created_at = snapshot
                .get(operation.id.as_str())
                .map_or(now, |existing| existing.created_at);
            let fingerprint = ConfigHasher::new().fingerprint(&spec, &operation.depends_on);
            snapshot.set_record(ResourceRecord {
                id: operation.id.clone(),
                kind: operation.kind,
                spec,
                fingerprint,
                depends_on: operation.depends_on.clone(),
                physical_id: applied.physical_id,
                outputs: applied.outputs,
                created_at,
                updated_at: now,
            });
        }
    }
}
