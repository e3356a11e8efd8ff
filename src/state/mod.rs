//! State management module.
//!
//! This module provides persistent snapshot storage for tracking applied
//! resources, including physical identifiers, fingerprints and run history.

mod local;
mod lock;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use store::StateStore;
pub use types::{
    HistoryEntry, PendingOperation, ResourceRecord, RunOperation, STATE_VERSION, SnapshotStatus,
    StateSnapshot,
};
