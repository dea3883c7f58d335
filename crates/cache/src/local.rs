//! Local in-process byte store
//!
//! [`LocalClient`] is the first cache tier: a concurrent map from cache key
//! to object revision with a byte-size ceiling and approximate-LRU
//! eviction. Values are idempotent per key: a populate race simply writes
//! the same revision twice, and the last writer wins without corruption.

use dashmap::DashMap;
use riverbed_core::{ObjectState, Oid, Tid};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Fixed per-entry overhead charged against the size ceiling, on top of the
/// payload bytes
const ENTRY_OVERHEAD: usize = 64;

/// Eviction drains to 7/8 of the ceiling so every overflow doesn't trigger
/// another sweep immediately
const DRAIN_NUMERATOR: usize = 7;

/// Key space shared by every cache tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Exact revision: valid only for (oid, tid) lookups
    Exact {
        /// Object
        oid: Oid,
        /// Revision
        tid: Tid,
    },
    /// Frozen entry: the most recent known state of `oid` at or below the
    /// cache's cp1 checkpoint
    Frozen {
        /// Object
        oid: Oid,
    },
}

struct Entry {
    state: ObjectState,
    stamp: AtomicU64,
}

impl Entry {
    fn cost(&self) -> usize {
        self.state.len() + ENTRY_OVERHEAD
    }
}

/// Bounded concurrent object-state store
pub struct LocalClient {
    entries: DashMap<CacheKey, Entry>,
    bytes: AtomicUsize,
    limit: usize,
    clock: AtomicU64,
}

impl LocalClient {
    /// Create a store with the given byte ceiling
    pub fn new(limit: usize) -> Self {
        LocalClient {
            entries: DashMap::new(),
            bytes: AtomicUsize::new(0),
            limit: limit.max(ENTRY_OVERHEAD),
            clock: AtomicU64::new(0),
        }
    }

    /// Fetch a revision, refreshing its eviction stamp
    pub fn get(&self, key: &CacheKey) -> Option<ObjectState> {
        let entry = self.entries.get(key)?;
        entry
            .stamp
            .store(self.clock.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
        Some(entry.state.clone())
    }

    /// Insert or replace a revision
    pub fn set(&self, key: CacheKey, state: ObjectState) {
        let entry = Entry {
            state,
            stamp: AtomicU64::new(self.clock.fetch_add(1, Ordering::Relaxed)),
        };
        let added = entry.cost();
        let removed = self
            .entries
            .insert(key, entry)
            .map(|old| old.cost())
            .unwrap_or(0);
        let total = self.bytes.fetch_add(added, Ordering::Relaxed) + added;
        if removed > 0 {
            self.bytes.fetch_sub(removed, Ordering::Relaxed);
        }
        if total.saturating_sub(removed) > self.limit {
            self.evict();
        }
    }

    /// Remove a revision if present
    pub fn delete(&self, key: &CacheKey) {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.bytes.fetch_sub(entry.cost(), Ordering::Relaxed);
        }
    }

    /// Drop everything
    pub fn flush(&self) {
        self.entries.clear();
        self.bytes.store(0, Ordering::Relaxed);
    }

    /// Entries currently held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Approximate bytes currently held
    pub fn size(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Byte ceiling
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Evict least-recently-stamped entries until under the drain mark
    ///
    /// The scan is O(entries); the store is sized so eviction is rare
    /// relative to hits, and approximate recency is all the engine needs.
    fn evict(&self) {
        let target = self.limit / 8 * DRAIN_NUMERATOR;
        let mut stamped: Vec<(CacheKey, u64)> = self
            .entries
            .iter()
            .map(|e| (*e.key(), e.value().stamp.load(Ordering::Relaxed)))
            .collect();
        stamped.sort_unstable_by_key(|&(_, stamp)| stamp);
        for (key, _) in stamped {
            if self.size() <= target {
                break;
            }
            self.delete(&key);
        }
        tracing::debug!(
            entries = self.len(),
            bytes = self.size(),
            "cache eviction pass finished"
        );
    }
}
