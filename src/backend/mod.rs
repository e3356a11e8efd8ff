//! Provisioning backends.
//!
//! This module contains the seam between planning and real infrastructure:
//! - The [`ProvisioningBackend`] trait the executor calls
//! - Retry with exponential backoff ([`RetryPolicy`])
//! - An in-memory implementation ([`SimulatedBackend`])

mod adapter;
mod retry;
mod simulated;

pub use adapter::{AppliedState, ProvisioningBackend};
pub use retry::RetryPolicy;
pub use simulated::SimulatedBackend;

#[cfg(test)]
pub(crate) use adapter::MockProvisioningBackend;
