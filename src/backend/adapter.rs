//! Provisioning backend trait definition.
//!
//! The executor hands every planned operation to a [`ProvisioningBackend`].
//! Nothing else in the crate talks to real infrastructure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::BackendError;
use crate::planner::Operation;

/// What a backend reports after materializing an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedState {
    /// Identifier assigned by the backend.
    pub physical_id: String,
    /// Backend-reported outputs (addresses, DNS names, ...).
    pub outputs: BTreeMap<String, String>,
}

impl AppliedState {
    /// Creates an applied state with no outputs.
    #[must_use]
    pub fn new(physical_id: impl Into<String>) -> Self {
        Self {
            physical_id: physical_id.into(),
            outputs: BTreeMap::new(),
        }
    }

    /// Adds an output.
    #[must_use]
    pub fn with_output(mut self, key: &str, value: impl Into<String>) -> Self {
        self.outputs.insert(key.to_string(), value.into());
        self
    }
}

/// Backend that materializes planned operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Applies a single operation.
    ///
    /// For deletes the returned state is ignored.
    async fn apply(&self, operation: &Operation) -> Result<AppliedState, BackendError>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
