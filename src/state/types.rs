//! State snapshot types.
//!
//! A snapshot records the last applied state of every resource. It is the
//! read-only "prior" input of the diff engine and is replaced wholesale at
//! the end of each run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::graph::{ResourceId, ResourceKind, ResourceSpec};
use crate::planner::Action;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept in a snapshot.
const MAX_HISTORY: usize = 100;

/// The complete state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the declaration last applied in full.
    pub config_hash: String,
    /// Whether the last run completed its changeset.
    pub status: SnapshotStatus,
    /// Operations that failed in the last (partial) run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<PendingOperation>,
    /// Operations the last (partial) run never attempted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_attempted: Vec<PendingOperation>,
    /// Applied resources by identity.
    pub resources: BTreeMap<ResourceId, ResourceRecord>,
    /// When the snapshot was last updated.
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Completion status of the run that wrote a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    /// Every operation of the changeset was applied.
    #[default]
    Complete,
    /// Only some operations were applied; see `failed` and `not_attempted`.
    Partial,
}

/// Recorded state of one applied resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Identity.
    pub id: ResourceId,
    /// Kind at the time it was applied.
    pub kind: ResourceKind,
    /// Attributes as applied.
    pub spec: ResourceSpec,
    /// Fingerprint of `spec` and `depends_on`.
    pub fingerprint: String,
    /// Direct dependencies as applied; drives teardown order.
    #[serde(default)]
    pub depends_on: Vec<ResourceId>,
    /// Identifier assigned by the backend.
    pub physical_id: String,
    /// Backend-reported outputs.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last updated.
    pub updated_at: DateTime<Utc>,
}

/// An operation left over by a partial run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// What was to be done.
    pub action: Action,
    /// Target resource.
    pub id: ResourceId,
    /// Target kind.
    pub kind: ResourceKind,
    /// Failure message, for failed operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: RunOperation,
    /// Declaration hash of the run.
    pub config_hash: String,
    /// Number of operations applied.
    pub applied: usize,
    /// Number of operations failed or never attempted.
    pub pending: usize,
    /// Whether the run completed.
    pub success: bool,
}

/// Types of runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Apply of a declaration.
    Apply,
    /// Full teardown.
    Destroy,
}

impl StateSnapshot {
    /// Creates a new empty snapshot.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            config_hash: String::new(),
            status: SnapshotStatus::Complete,
            failed: Vec::new(),
            not_attempted: Vec::new(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a record by identity.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceRecord> {
        self.resources.get(id)
    }

    /// Adds or replaces a record.
    pub fn set_record(&mut self, record: ResourceRecord) {
        self.resources.insert(record.id.clone(), record);
        self.last_updated = Utc::now();
    }

    /// Removes a record by identity.
    pub fn remove_record(&mut self, id: &str) -> Option<ResourceRecord> {
        let result = self.resources.remove(id);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Returns true if the last run stopped part-way.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.status == SnapshotStatus::Partial
    }

    /// Marks the snapshot as reflecting a fully applied declaration.
    pub fn mark_complete(&mut self, config_hash: &str) {
        self.status = SnapshotStatus::Complete;
        self.config_hash = config_hash.to_string();
        self.failed.clear();
        self.not_attempted.clear();
        self.last_updated = Utc::now();
    }

    /// Marks the snapshot as partial, listing the work still outstanding.
    ///
    /// The declaration hash is left untouched: it names the last declaration
    /// that was applied in full.
    pub fn mark_partial(&mut self, failed: Vec<PendingOperation>, not_attempted: Vec<PendingOperation>) {
        self.status = SnapshotStatus::Partial;
        self.failed = failed;
        self.not_attempted = not_attempted;
        self.last_updated = Utc::now();
    }

    /// Adds a history entry, dropping the oldest beyond the limit.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }
}

impl HistoryEntry {
    /// Creates a new history entry.
    #[must_use]
    pub fn new(operation: RunOperation, config_hash: &str, applied: usize, pending: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            applied,
            pending,
            success: pending == 0,
        }
    }
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
        };
        write!(f, "{status}")
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}
