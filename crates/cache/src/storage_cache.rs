//! Snapshot-consistent object-state cache
//!
//! [`StorageCache`] serves current-revision loads with minimal backend
//! round-trips while preserving per-session MVCC visibility. Freshness is
//! tracked with a checkpoint pair `(cp0 <= cp1)` and a delta map:
//!
//! - entries with `tid <= cp1` are *frozen* and cached by oid alone; a
//!   frozen entry is the most recent known state of its oid and may serve
//!   any session pinned at or above `cp1`
//! - oids changed in `(cp1, current_tid]` appear in the *delta* map, which
//!   records their most recent change tid; their bytes are cached under
//!   exact `(oid, tid)` keys only
//!
//! When the delta map outgrows the configured window, the checkpoints
//! slide forward and now-frozen delta entries are consolidated into the
//! frozen keyspace.
//!
//! Every hit is bounds-checked against the session's pinned snapshot at a
//! single choke point, so no path can return a state newer than the
//! session's view, regardless of how polls and loads interleave.

use crate::local::{CacheKey, LocalClient};
use crate::tier::CacheTier;
use dashmap::DashMap;
use parking_lot::RwLock;
use riverbed_core::{Error, LoadSession, ObjectState, Oid, Options, Result, Tid};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct Window {
    /// `(cp0, cp1)`; None until the first poll
    checkpoints: Option<(Tid, Tid)>,
    /// Highest tid whose changes are reflected in the delta map
    current_tid: Tid,
}

/// Checkpoint-windowed object-state cache
pub struct StorageCache {
    local: LocalClient,
    shared: Option<Arc<dyn CacheTier>>,
    delta: DashMap<Oid, Tid>,
    window: RwLock<Window>,
    delta_limit: usize,
}

impl StorageCache {
    /// Create a cache sized from `options`, optionally backed by a shared
    /// second tier
    pub fn new(options: &Options, shared: Option<Arc<dyn CacheTier>>) -> Self {
        StorageCache {
            local: LocalClient::new(options.cache_local_bytes),
            shared,
            delta: DashMap::new(),
            window: RwLock::new(Window {
                checkpoints: None,
                current_tid: Tid::ZERO,
            }),
            delta_limit: options.cache_delta_limit.max(1),
        }
    }

    /// Highest tid whose changes this cache has absorbed
    pub fn current_tid(&self) -> Tid {
        self.window.read().current_tid
    }

    /// The checkpoint pair, None before the first poll
    pub fn checkpoints(&self) -> Option<(Tid, Tid)> {
        self.window.read().checkpoints
    }

    /// Oids currently tracked in the delta window (diagnostics)
    pub fn delta_len(&self) -> usize {
        self.delta.len()
    }

    /// Entries held by the local tier (diagnostics)
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// Load the current revision of `oid` as of the session's snapshot
    ///
    /// Resolution order: delta-exact entry, frozen entry, shared tier,
    /// adapter. The result is byte-identical to a direct adapter load; a
    /// backend answer from a future transaction surfaces as `ReadConflict`,
    /// and an answer contradicting the delta map as `CacheInconsistency`.
    pub fn load(&self, session: &dyn LoadSession, oid: Oid) -> Result<Option<ObjectState>> {
        let view = session.ceiling();
        let (checkpoints, current) = {
            let w = self.window.read();
            (w.checkpoints, w.current_tid)
        };

        // Before the first poll, or when the session is pinned past what we
        // have absorbed, the cache cannot vouch for anything.
        let Some((_cp0, cp1)) = checkpoints else {
            return session.load_current(oid);
        };
        if view > current {
            return session.load_current(oid);
        }

        match self.delta.get(&oid).map(|e| *e.value()) {
            // Changed recently, and that change is visible to this session:
            // the exact key is the only valid location.
            Some(dtid) if dtid <= view => {
                let key = CacheKey::Exact { oid, tid: dtid };
                if let Some(state) = self.local.get(&key) {
                    return Ok(Some(state));
                }
                if let Some(state) = self.shared_get(&key, |s| s.tid == dtid) {
                    return Ok(Some(state));
                }
                let state = session.load_current(oid)?.ok_or_else(|| {
                    Error::CacheInconsistency(format!(
                        "delta map records change {dtid} for {oid} but the backend has no revision"
                    ))
                })?;
                self.check_tid_after_load(oid, state.tid, Some(dtid), view)?;
                self.populate(key, &state);
                Ok(Some(state))
            }

            // Changed after this session's snapshot: neither the frozen
            // entry nor the delta hint applies. Load directly; the exact
            // revision is still cacheable for other old-snapshot readers.
            Some(_) => {
                let state = session.load_current(oid)?;
                if let Some(state) = &state {
                    self.check_tid_after_load(oid, state.tid, None, view)?;
                    self.local
                        .set(CacheKey::Exact { oid, tid: state.tid }, state.clone());
                }
                Ok(state)
            }

            // Unchanged since cp1: the frozen entry serves any session at
            // or above cp1.
            None if view >= cp1 => {
                let key = CacheKey::Frozen { oid };
                if let Some(state) = self.local.get(&key) {
                    if state.tid <= view {
                        return Ok(Some(state));
                    }
                    // A checkpoint slide consolidated a newer revision than
                    // this older snapshot may see.
                }
                if let Some(state) = self.shared_get(&key, |s| s.tid <= cp1.min(view)) {
                    return Ok(Some(state));
                }
                let state = session.load_current(oid)?;
                if let Some(state) = &state {
                    self.check_tid_after_load(oid, state.tid, None, view)?;
                    if state.tid > cp1 {
                        return Err(Error::CacheInconsistency(format!(
                            "backend reports change {} for {} inside the delta window, \
                             but the delta map never saw it",
                            state.tid, oid
                        )));
                    }
                    self.populate(key, state);
                }
                Ok(state)
            }

            // Session pinned below the frozen boundary: serve directly and
            // keep only the exact revision.
            None => {
                let state = session.load_current(oid)?;
                if let Some(state) = &state {
                    self.check_tid_after_load(oid, state.tid, None, view)?;
                    self.local
                        .set(CacheKey::Exact { oid, tid: state.tid }, state.clone());
                }
                Ok(state)
            }
        }
    }

    /// Absorb a transaction this process just committed
    ///
    /// Exact entries become immediately servable; the frozen entries the
    /// commit superseded are evicted. The poller will report the same
    /// change again, which is harmless.
    pub fn after_commit(&self, tid: Tid, states: &[ObjectState]) {
        let polled = self.window.read().checkpoints.is_some();
        for state in states {
            debug_assert_eq!(state.tid, tid);
            let oid = state.oid;
            let key = CacheKey::Exact { oid, tid };
            self.local.set(key, state.clone());
            if let Some(tier) = &self.shared {
                tier.set(key, state.clone());
            }
            if polled {
                self.bump_delta(oid, tid);
            }
            self.evict_frozen(oid);
        }
    }

    /// Absorb one poll cycle
    ///
    /// `changes` lists `(oid, tid)` for every transaction committed after
    /// the previous poll up to `new_tid`; None means the span could not be
    /// enumerated, in which case incremental invalidation can no longer be
    /// trusted and the cache is cleared wholesale.
    pub fn after_poll(&self, new_tid: Tid, changes: Option<&[(Oid, Tid)]>) {
        let mut w = self.window.write();
        let Some((_, cp1)) = w.checkpoints else {
            self.delta.clear();
            w.checkpoints = Some((new_tid, new_tid));
            w.current_tid = new_tid;
            tracing::debug!(tid = new_tid.as_u64(), "initialized cache checkpoints");
            return;
        };

        let Some(changes) = changes else {
            self.local.flush();
            if let Some(tier) = &self.shared {
                tier.flush();
            }
            self.delta.clear();
            w.checkpoints = Some((new_tid, new_tid));
            w.current_tid = new_tid;
            tracing::warn!(
                tid = new_tid.as_u64(),
                "change span not enumerable; cleared object cache"
            );
            return;
        };

        for &(oid, ctid) in changes {
            if ctid <= cp1 {
                // Already below the frozen boundary; nothing it could
                // invalidate survives there anyway.
                continue;
            }
            if let Some(old) = self.bump_delta(oid, ctid) {
                // The superseded exact entry is unreachable now.
                self.local.delete(&CacheKey::Exact { oid, tid: old });
            }
            self.evict_frozen(oid);
        }
        w.current_tid = w.current_tid.max(new_tid);

        if self.delta.len() >= self.delta_limit && w.current_tid > cp1 {
            self.slide_checkpoints(&mut w, cp1);
        }
    }

    /// Drop all cached state and freshness tracking
    pub fn clear(&self) {
        self.local.flush();
        if let Some(tier) = &self.shared {
            tier.flush();
        }
        self.delta.clear();
        let mut w = self.window.write();
        w.checkpoints = None;
        w.current_tid = Tid::ZERO;
    }

    /// Slide `cp1` up to `current_tid`, consolidating the delta window
    ///
    /// Every delta entry whose exact bytes are cached becomes the oid's
    /// frozen entry; the rest lose their (stale) frozen entries. Both
    /// outcomes leave the frozen keyspace holding nothing older than the
    /// delta map knew.
    fn slide_checkpoints(&self, w: &mut Window, old_cp1: Tid) {
        let new_cp1 = w.current_tid;
        for entry in self.delta.iter() {
            let (oid, dtid) = (*entry.key(), *entry.value());
            let exact = CacheKey::Exact { oid, tid: dtid };
            let frozen = CacheKey::Frozen { oid };
            match self.local.get(&exact) {
                Some(state) => {
                    self.local.set(frozen, state.clone());
                    if let Some(tier) = &self.shared {
                        tier.set(frozen, state);
                    }
                }
                None => self.evict_frozen(oid),
            }
        }
        self.delta.clear();
        w.checkpoints = Some((old_cp1, new_cp1));
        tracing::debug!(
            cp0 = old_cp1.as_u64(),
            cp1 = new_cp1.as_u64(),
            "checkpoints shifted"
        );
    }

    /// Record a change, returning the previous delta tid it superseded
    fn bump_delta(&self, oid: Oid, tid: Tid) -> Option<Tid> {
        let mut superseded = None;
        self.delta
            .entry(oid)
            .and_modify(|t| {
                if tid > *t {
                    superseded = Some(*t);
                    *t = tid;
                }
            })
            .or_insert(tid);
        superseded
    }

    fn evict_frozen(&self, oid: Oid) {
        let key = CacheKey::Frozen { oid };
        self.local.delete(&key);
        if let Some(tier) = &self.shared {
            tier.delete(&key);
        }
    }

    /// Write a revision into the local tier, mirroring it into the shared
    /// tier when one is configured
    fn populate(&self, key: CacheKey, state: &ObjectState) {
        self.local.set(key, state.clone());
        if let Some(tier) = &self.shared {
            tier.set(key, state.clone());
        }
    }

    fn shared_get(
        &self,
        key: &CacheKey,
        acceptable: impl Fn(&ObjectState) -> bool,
    ) -> Option<ObjectState> {
        let tier = self.shared.as_ref()?;
        let state = tier.get(key)?;
        if acceptable(&state) {
            self.local.set(*key, state.clone());
            Some(state)
        } else {
            // Not authoritative: a stale or foreign entry is simply dropped.
            tier.delete(key);
            None
        }
    }

    /// Sanity-check a tid that just came back from the backend
    fn check_tid_after_load(
        &self,
        oid: Oid,
        actual: Tid,
        expected: Option<Tid>,
        view: Tid,
    ) -> Result<()> {
        if actual > view {
            // The backend served data from a future transaction; the
            // snapshot guarantee is broken for this session.
            return Err(Error::ReadConflict {
                oid,
                requested: view,
            });
        }
        if let Some(expected) = expected {
            if actual != expected {
                return Err(Error::CacheInconsistency(format!(
                    "loaded {oid} at tid {actual} but the delta map expected {expected}; \
                     verify the backend provides snapshot views and a shared commit lock"
                )));
            }
        }
        Ok(())
    }
}
