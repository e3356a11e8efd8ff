//! Error types for the topoplan compiler.
//!
//! The planning taxonomy mirrors the pipeline stages: malformed input
//! ([`SchemaError`]), broken structural invariants ([`ValidationError`]),
//! a cycle that slipped past validation ([`CycleError`]), identity/kind
//! mismatches against recorded state ([`ConflictError`]) and execution-time
//! failures ([`BackendError`]). Configuration and state file problems get
//! their own enums.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::graph::{ResourceId, ResourceKind};

/// Exit code for a successful run.
pub const EXIT_OK: u8 = 0;

/// Exit code for errors outside the planning taxonomy (I/O, schema, locks).
pub const EXIT_FAILURE: u8 = 1;

/// Exit code for a validation (or cycle) failure.
pub const EXIT_VALIDATION: u8 = 2;

/// Exit code for a diff conflict.
pub const EXIT_CONFLICT: u8 = 3;

/// Exit code for an apply that completed only part of its changeset.
pub const EXIT_PARTIAL: u8 = 4;

/// Exit code for an apply where no operation succeeded.
pub const EXIT_HARD_FAILURE: u8 = 5;

/// The main error type for topoplan.
#[derive(Debug, Error)]
pub enum TopoplanError {
    /// Configuration file errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed declaration.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Structural invariant violated.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Dependency cycle detected while ordering.
    #[error("Planning error: {0}")]
    Cycle(#[from] CycleError),

    /// Identity/kind mismatch between desired and recorded state.
    #[error("Diff conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be read.
    #[error("Failed to read {path}: {message}")]
    Unreadable {
        /// Path to the file.
        path: PathBuf,
        /// Underlying error description.
        message: String,
    },

    /// An environment override carried an unusable value.
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar {
        /// Name of the variable.
        name: String,
        /// The rejected value.
        value: String,
    },
}

/// Malformed declaration input. No graph is produced when this is returned.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The document could not be parsed.
    #[error("Failed to parse declaration: {message}")]
    Parse {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// A CIDR block could not be parsed.
    #[error("Invalid CIDR block '{value}' at {field}: {reason}")]
    InvalidCidr {
        /// Field path of the block.
        field: String,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A field carries an out-of-range or malformed value.
    #[error("Invalid value at {field}: {message}")]
    InvalidField {
        /// Field path.
        field: String,
        /// Description of the problem.
        message: String,
    },

    /// Two resources share one identity.
    #[error("Duplicate resource name '{name}' (declared as {first} and {second})")]
    DuplicateIdentity {
        /// The duplicated name.
        name: String,
        /// Kind of the first declaration.
        first: ResourceKind,
        /// Kind of the second declaration.
        second: ResourceKind,
    },

    /// A reference names a resource that is not declared.
    #[error("{field} references unknown {expected} '{target}'")]
    UnknownReference {
        /// Field path holding the reference.
        field: String,
        /// The missing name.
        target: String,
        /// Kind the reference expects.
        expected: ResourceKind,
    },
}

/// Category of a structural violation, in validation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ViolationKind {
    /// Address layout: containment, overlap, reserved or foreign placement.
    AddressLayout,
    /// Host port claimed twice within one cluster.
    PortConflict,
    /// Dependency cycle.
    DependencyCycle,
    /// Discovery reference unresolved or ambiguous.
    DiscoveryResolution,
}

/// A single structural violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Nodes involved, in a meaningful order (cycle order for cycles).
    pub nodes: Vec<ResourceId>,
    /// Human-readable description.
    pub message: String,
}

/// All violations of the first failing validation category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The failing category.
    pub kind: ViolationKind,
    /// Every violation found in that category.
    pub violations: Vec<Violation>,
}

/// A dependency cycle found by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Dependency cycle among: {}", join_ids(.nodes))]
pub struct CycleError {
    /// Nodes that could not be ordered.
    pub nodes: Vec<ResourceId>,
}

/// A resource identity whose kind differs between prior and desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindConflict {
    /// The reused identity.
    pub id: ResourceId,
    /// Kind recorded in the prior state.
    pub prior: ResourceKind,
    /// Kind in the desired graph.
    pub desired: ResourceKind,
}

/// Identities reused across kinds. Resolving requires an explicit
/// delete-then-create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictError {
    /// Every conflicting identity.
    pub conflicts: Vec<KindConflict>,
}

/// Failure reported by a provisioning backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation}: {message}{}", retry_suffix(.retryable))]
pub struct BackendError {
    /// Operation description, e.g. `create db`.
    pub operation: String,
    /// Description of the failure.
    pub message: String,
    /// Whether retrying the same operation may succeed.
    pub retryable: bool,
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Writing the state file failed.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// The changeset planned under the lock differs from the one approved.
    #[error(
        "State changed since the changeset was approved ({approved} operations approved, {current} planned now); plan again"
    )]
    StaleChangeset {
        /// Operations in the approved changeset.
        approved: usize,
        /// Operations planned under the lock.
        current: usize,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Result type alias for topoplan operations.
pub type Result<T> = std::result::Result<T, TopoplanError>;

impl TopoplanError {
    /// Returns the process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Cycle(_) => EXIT_VALIDATION,
            Self::Conflict(_) => EXIT_CONFLICT,
            _ => EXIT_FAILURE,
        }
    }
}

impl SchemaError {
    /// Creates an invalid-field error.
    #[must_use]
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl ValidationError {
    /// Creates a validation error for one category.
    #[must_use]
    pub const fn new(kind: ViolationKind, violations: Vec<Violation>) -> Self {
        Self { kind, violations }
    }

    /// Returns every offending node id, deduplicated, in first-seen order.
    #[must_use]
    pub fn offending_node_ids(&self) -> Vec<&ResourceId> {
        let mut seen = Vec::new();
        for id in self.violations.iter().flat_map(|v| v.nodes.iter()) {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
        seen
    }
}

impl BackendError {
    /// Creates a retryable backend error.
    #[must_use]
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable backend error.
    #[must_use]
    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AddressLayout => "address layout",
            Self::PortConflict => "port conflict",
            Self::DependencyCycle => "dependency cycle",
            Self::DiscoveryResolution => "discovery resolution",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.message, join_ids(&self.nodes))
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} violation", self.kind, self.violations.len())?;
        if self.violations.len() != 1 {
            write!(f, "s")?;
        }
        write!(f, ")")?;
        for violation in &self.violations {
            write!(f, "\n  - {violation}")?;
        }
        Ok(())
    }
}

impl fmt::Display for KindConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' was a {} and is now declared as a {}",
            self.id, self.prior, self.desired
        )
    }
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource kind changed; delete and recreate explicitly")?;
        for conflict in &self.conflicts {
            write!(f, "\n  - {conflict}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

impl std::error::Error for ConflictError {}

const fn retry_suffix(retryable: &bool) -> &'static str {
    if *retryable { " (retryable)" } else { "" }
}

fn join_ids(ids: &[ResourceId]) -> String {
    ids.iter()
        .map(ResourceId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let validation = TopoplanError::Validation(ValidationError::new(
            ViolationKind::PortConflict,
            vec![],
        ));
        assert_eq!(validation.exit_code(), EXIT_VALIDATION);

        let conflict = TopoplanError::Conflict(ConflictError { conflicts: vec![] });
        assert_eq!(conflict.exit_code(), EXIT_CONFLICT);

        let schema = TopoplanError::Schema(SchemaError::field("services[0].cpu", "must be positive"));
        assert_eq!(schema.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_offending_ids_deduplicated() {
        let err = ValidationError::new(
            ViolationKind::PortConflict,
            vec![
                Violation {
                    nodes: vec![ResourceId::from("web"), ResourceId::from("api")],
                    message: String::from("host port 24"),
                },
                Violation {
                    nodes: vec![ResourceId::from("api"), ResourceId::from("db")],
                    message: String::from("host port 80"),
                },
            ],
        );
        let ids: Vec<&str> = err.offending_node_ids().into_iter().map(ResourceId::as_str).collect();
        assert_eq!(ids, vec!["web", "api", "db"]);
    }

    #[test]
    fn test_backend_error_retryable() {
        let err = BackendError::transient("create db", "throttled");
        assert!(err.retryable);
        assert!(err.to_string().contains("(retryable)"));

        let err = BackendError::permanent("create db", "quota");
        assert!(!err.retryable);
        assert!(!err.to_string().contains("(retryable)"));
    }
}
