//! Planning module for topology changes.
//!
//! This module orders the resource graph, computes the changeset between
//! recorded and desired state, and executes changesets against a backend.

mod diff;
mod executor;
mod plan;
mod topo;

pub use diff::DiffEngine;
pub use executor::{DEFAULT_MAX_PARALLEL, ExecutionReport, PlanExecutor};
pub use plan::{Action, Changeset, Operation};
pub use topo::{DependencyDag, plan};
