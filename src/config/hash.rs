//! Hashing for change detection.
//!
//! Declarations and resource specs are hashed over their canonical JSON
//! encoding. Every map in these types is ordered, so equal values always
//! produce equal hashes.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::spec::TopologyConfig;
use crate::graph::{ResourceId, ResourceSpec};

/// Hasher for declarations and resource fingerprints.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire declaration.
    #[must_use]
    pub fn hash_config(&self, config: &TopologyConfig) -> String {
        Self::digest(config)
    }

    /// Computes the fingerprint of a resource: its spec plus its direct
    /// dependencies.
    ///
    /// Dependencies are part of the fingerprint so that a recorded state
    /// always carries the edges teardown ordering relies on.
    #[must_use]
    pub fn fingerprint(&self, spec: &ResourceSpec, depends_on: &[ResourceId]) -> String {
        Self::digest(&(spec, depends_on))
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    fn digest<T: Serialize + ?Sized>(value: &T) -> String {
        // Serializing these types cannot fail: no non-string map keys.
        let bytes = serde_json::to_vec(value).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}
