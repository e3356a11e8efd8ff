//! Changeset types.
//!
//! A [`Changeset`] is the ordered list of operations that moves recorded
//! state to desired state. It carries no timestamps, so planning the same
//! input twice yields byte-identical output.

use serde::{Deserialize, Serialize};

use crate::graph::{ResourceId, ResourceKind, ResourceSpec};
use crate::state::ResourceRecord;

/// An ordered, dependency-resolved changeset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    /// Operations in execution order.
    pub operations: Vec<Operation>,
}

/// A single planned operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// What to do.
    pub action: Action,
    /// Target identity.
    pub id: ResourceId,
    /// Target kind.
    pub kind: ResourceKind,
    /// Full desired state, for creates and updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<ResourceSpec>,
    /// Recorded prior state, for updates and deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<ResourceRecord>,
    /// Direct dependencies of the target (desired for creates and updates,
    /// recorded for deletes).
    pub depends_on: Vec<ResourceId>,
    /// Indices of earlier operations that must succeed first.
    pub requires: Vec<usize>,
    /// Top-level attributes that differ, for updates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_fields: Vec<String>,
}

/// Types of operations in a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Create a new resource.
    Create,
    /// Update a resource in place.
    Update,
    /// Delete a resource.
    Delete,
}

impl Changeset {
    /// Returns true if the changeset is empty (no changes).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns the number of operations.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns the number of operations with the given action.
    #[must_use]
    pub fn count(&self, action: Action) -> usize {
        self.operations.iter().filter(|o| o.action == action).count()
    }

    /// Returns operations that can start immediately.
    #[must_use]
    pub fn ready_operations(&self) -> Vec<&Operation> {
        self.operations
            .iter()
            .filter(|o| o.requires.is_empty())
            .collect()
    }

    /// Returns the position of the operation on `id`, if any.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.operations.iter().position(|o| o.id.as_str() == id)
    }
}

impl Operation {
    /// Returns a human-readable description of the operation.
    #[must_use]
    pub fn description(&self) -> String {
        format!("{} {} '{}'", self.action, self.kind, self.id)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.action, self.kind, self.id)?;
        if !self.changed_fields.is_empty() {
            write!(f, " ({})", self.changed_fields.join(", "))?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Changeset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.operations.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(
            f,
            "Changeset ({} to create, {} to update, {} to delete):",
            self.count(Action::Create),
            self.count(Action::Update),
            self.count(Action::Delete)
        )?;
        for (i, operation) in self.operations.iter().enumerate() {
            writeln!(f, "  {i}. {operation}")?;
        }
        Ok(())
    }
}
