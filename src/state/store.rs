//! State store trait definition.
//!
//! This module defines the common interface for snapshot storage backends.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::StateSnapshot;
use crate::error::Result;

/// Trait for snapshot storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the snapshot.
    ///
    /// Returns `None` if no snapshot exists yet.
    async fn load(&self) -> Result<Option<StateSnapshot>>;

    /// Replaces the snapshot atomically.
    async fn save(&self, snapshot: &StateSnapshot) -> Result<()>;

    /// Acquires the state lock for `operation`.
    ///
    /// Fails with [`crate::error::StateError::LockedByOther`] while another
    /// holder's lock is live. An expired lock is taken over.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Releases the lock if `lock_id` still owns it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes the lock regardless of owner.
    async fn force_unlock(&self) -> Result<Option<LockInfo>>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;
}
