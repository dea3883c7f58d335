//! Shared second cache tier
//!
//! A [`CacheTier`] mirrors the local client's keyspace and is consulted on
//! a local miss before falling through to the adapter. It is eventually
//! consistent (staleness is bounded by the poll interval, because every
//! poll pushes the same invalidations to it) and it is never authoritative
//! over the adapter: everything read from it is still checked against the
//! session's snapshot.

use crate::local::{CacheKey, LocalClient};
use riverbed_core::ObjectState;

/// Contract for a cache tier shared between stores or processes
pub trait CacheTier: Send + Sync {
    /// Fetch a revision
    fn get(&self, key: &CacheKey) -> Option<ObjectState>;

    /// Insert or replace a revision
    fn set(&self, key: CacheKey, state: ObjectState);

    /// Remove a revision if present
    fn delete(&self, key: &CacheKey);

    /// Drop everything
    fn flush(&self);
}

/// In-process shared tier
///
/// Wraps a [`LocalClient`] so several stores in one process can share hot
/// state. A networked tier (memcached-style) implements the same trait
/// outside this workspace.
pub struct SharedTier {
    client: LocalClient,
}

impl SharedTier {
    /// Create a shared tier with the given byte ceiling
    pub fn new(limit: usize) -> Self {
        SharedTier {
            client: LocalClient::new(limit),
        }
    }

    /// Entries currently held (diagnostics)
    pub fn len(&self) -> usize {
        self.client.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.client.is_empty()
    }
}

impl CacheTier for SharedTier {
    fn get(&self, key: &CacheKey) -> Option<ObjectState> {
        self.client.get(key)
    }

    fn set(&self, key: CacheKey, state: ObjectState) {
        self.client.set(key, state);
    }

    fn delete(&self, key: &CacheKey) {
        self.client.delete(key);
    }

    fn flush(&self) {
        self.client.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riverbed_core::{Oid, Tid};

    #[test]
    fn test_shared_tier_roundtrip() {
        let tier = SharedTier::new(1 << 20);
        let key = CacheKey::Frozen {
            oid: Oid::from_u64(5),
        };
        let state = ObjectState::new(Oid::from_u64(5), Tid::from_u64(9), None, b"s".to_vec());
        tier.set(key, state.clone());
        assert_eq!(tier.get(&key), Some(state));
        tier.delete(&key);
        assert!(tier.get(&key).is_none());
        assert!(tier.is_empty());
    }
}
