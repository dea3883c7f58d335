//! Embedded reference adapter
//!
//! [`MemoryAdapter`] implements the full [`Adapter`] contract over
//! in-process tables: per-oid revision chains, a committed-transaction log,
//! and a blob mapping table. It is the backend the test suites run against
//! and a faithful model of what the SQL adapters must provide: snapshot
//! reads, row locking, a serialized commit window, and incremental packing.
//!
//! # Design
//!
//! - DashMap of revision chains: lock-free reads, per-oid write sharding
//! - Chains store revisions newest-first; snapshot reads scan for the
//!   first revision at or below the ceiling
//! - The transaction log is an ordered map so change listing and iteration
//!   are range scans
//! - Commit applies object rows first, then the transaction record, then
//!   bumps `last_committed`; readers pin their ceiling from
//!   `last_committed`, so a half-applied commit is never visible

use crate::locker::{CommitLock, HolderId, LockTable};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use riverbed_core::{
    Adapter, BlobRef, Error, Flavor, LoadSession, ObjectState, Oid, PackBatch, Result,
    RevisionInfo, StoreSession, Tid, TidAllocator, TransactionMetadata, TransactionRecord,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Revision chain for one oid, newest first
///
/// Strictly tid-ordered; `push` enforces the ordering because commits are
/// serialized by the commit lock and tids are allocated monotonically.
#[derive(Debug, Default)]
struct Chain {
    revisions: VecDeque<ObjectState>,
}

impl Chain {
    /// Caller guarantees `state.tid` is newer than the head; commits are
    /// serialized by the commit lock and pre-validated, so this holds.
    fn push(&mut self, state: ObjectState) {
        debug_assert!(self.revisions.front().map_or(true, |h| state.tid > h.tid));
        self.revisions.push_front(state);
    }

    /// Newest revision with tid at or below `ceiling`
    fn at_or_below(&self, ceiling: Tid) -> Option<&ObjectState> {
        self.revisions.iter().find(|s| s.tid <= ceiling)
    }

    /// Newest revision with tid strictly below `bound`
    fn strictly_before(&self, bound: Tid) -> Option<&ObjectState> {
        self.revisions.iter().find(|s| s.tid < bound)
    }

    fn head_tid(&self) -> Option<Tid> {
        self.revisions.front().map(|s| s.tid)
    }

    /// Oldest surviving revision; its `prev_tid` tells whether older
    /// revisions ever existed (and were packed away)
    fn oldest(&self) -> Option<&ObjectState> {
        self.revisions.back()
    }
}

/// Resumable pack position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PackCursor {
    pack_tid: Tid,
    /// Next batch starts strictly after this oid
    after: Option<Oid>,
}

/// Tables shared by the adapter and its sessions
struct Tables {
    flavor: Flavor,
    objects: DashMap<Oid, Chain>,
    txns: RwLock<BTreeMap<Tid, TransactionRecord>>,
    blobs: DashMap<(Oid, Tid), BlobRef>,
    next_oid: AtomicU64,
    next_session: AtomicU64,
    tids: TidAllocator,
    last_committed: AtomicU64,
    locks: LockTable,
    commit_lock: CommitLock,
    pack_cursor: Mutex<Option<PackCursor>>,
    /// Change spans at or below this tid can no longer be enumerated
    retained_floor: AtomicU64,
}

impl Tables {
    fn last_committed(&self) -> Tid {
        Tid::from_u64(self.last_committed.load(Ordering::SeqCst))
    }

    fn current_tid_of(&self, oid: Oid) -> Tid {
        self.objects
            .get(&oid)
            .and_then(|chain| chain.head_tid())
            .unwrap_or(Tid::ZERO)
    }
}

/// In-process reference backend
///
/// Cheap to clone via `Arc`; construct one per logical store.
pub struct MemoryAdapter {
    tables: Arc<Tables>,
}

impl MemoryAdapter {
    /// Create an empty store for the given backend flavor
    pub fn new(flavor: Flavor) -> Self {
        MemoryAdapter {
            tables: Arc::new(Tables {
                flavor,
                objects: DashMap::new(),
                txns: RwLock::new(BTreeMap::new()),
                blobs: DashMap::new(),
                next_oid: AtomicU64::new(0),
                next_session: AtomicU64::new(0),
                tids: TidAllocator::new(Tid::ZERO, flavor.tid_quantum_micros()),
                last_committed: AtomicU64::new(0),
                locks: LockTable::new(),
                commit_lock: CommitLock::new(),
                pack_cursor: Mutex::new(None),
                retained_floor: AtomicU64::new(0),
            }),
        }
    }

    /// Total surviving revisions across all objects (diagnostics)
    pub fn revision_count(&self) -> usize {
        self.tables
            .objects
            .iter()
            .map(|chain| chain.revisions.len())
            .sum()
    }
}

impl Adapter for MemoryAdapter {
    fn flavor(&self) -> Flavor {
        self.tables.flavor
    }

    fn new_oid(&self) -> Result<Oid> {
        Ok(Oid::from_u64(
            self.tables.next_oid.fetch_add(1, Ordering::SeqCst) + 1,
        ))
    }

    fn open_load(&self) -> Result<Box<dyn LoadSession>> {
        Ok(Box::new(MemoryLoadSession {
            tables: Arc::clone(&self.tables),
            ceiling: self.tables.last_committed(),
        }))
    }

    fn open_store(&self) -> Result<Box<dyn StoreSession>> {
        Ok(Box::new(MemoryStoreSession {
            tables: Arc::clone(&self.tables),
            holder: self.tables.next_session.fetch_add(1, Ordering::SeqCst) + 1,
            staged: Vec::new(),
            staged_blobs: Vec::new(),
            tid: None,
            finished: false,
        }))
    }

    fn last_committed(&self) -> Result<Tid> {
        Ok(self.tables.last_committed())
    }

    fn list_changes(&self, after: Tid, last: Tid) -> Result<Option<Vec<(Oid, Tid)>>> {
        let floor = Tid::from_u64(self.tables.retained_floor.load(Ordering::SeqCst));
        if after < floor {
            // Packing discarded part of the span; it cannot be enumerated.
            return Ok(None);
        }
        if after >= last {
            return Ok(Some(Vec::new()));
        }
        let txns = self.tables.txns.read();
        let mut changes = Vec::new();
        for (&tid, record) in txns.range(after.next()..=last) {
            for &oid in &record.changed {
                changes.push((oid, tid));
            }
        }
        Ok(Some(changes))
    }

    fn history(&self, oid: Oid) -> Result<Vec<RevisionInfo>> {
        Ok(self
            .tables
            .objects
            .get(&oid)
            .map(|chain| {
                chain
                    .revisions
                    .iter()
                    .map(|s| RevisionInfo {
                        tid: s.tid,
                        len: s.len(),
                        prev_tid: s.prev_tid,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn iterate(&self, start: Tid, stop: Tid) -> Result<Vec<TransactionRecord>> {
        let txns = self.tables.txns.read();
        Ok(txns.range(start..=stop).map(|(_, r)| r.clone()).collect())
    }

    fn pack_batch(&self, pack_tid: Tid, max_oids: usize) -> Result<PackBatch> {
        let tables = &self.tables;
        let mut cursor_slot = tables.pack_cursor.lock();
        let cursor = match *cursor_slot {
            Some(c) if c.pack_tid == pack_tid => c,
            _ => PackCursor {
                pack_tid,
                after: None,
            },
        };

        // The object table is unordered; materialize and sort the keyspace
        // so the cursor is meaningful across calls.
        let mut oids: Vec<Oid> = tables.objects.iter().map(|e| *e.key()).collect();
        oids.sort_unstable();
        let batch: Vec<Oid> = oids
            .into_iter()
            .filter(|&oid| cursor.after.map_or(true, |a| oid > a))
            .take(max_oids.max(1))
            .collect();

        let mut outcome = PackBatch::default();
        for &oid in &batch {
            if let Some(mut chain) = tables.objects.get_mut(&oid) {
                outcome.examined += 1;
                let keeper = match chain.at_or_below(pack_tid) {
                    Some(state) => state.tid,
                    // Every revision is newer than the pack target.
                    None => continue,
                };
                while let Some(oldest) = chain.oldest() {
                    if oldest.tid >= keeper {
                        break;
                    }
                    let victim = oldest.tid;
                    chain.revisions.pop_back();
                    tables.blobs.remove(&(oid, victim));
                    outcome.deleted += 1;
                }
            }
        }

        outcome.done = batch.len() < max_oids.max(1);
        if outcome.done {
            // Transaction records below the pack point survive only while
            // some object still carries a revision they committed.
            let mut live = rustc_hash::FxHashSet::default();
            for chain in tables.objects.iter() {
                for state in &chain.revisions {
                    if state.tid <= pack_tid {
                        live.insert(state.tid);
                    }
                }
            }
            tables
                .txns
                .write()
                .retain(|&tid, _| tid > pack_tid || live.contains(&tid));
            // Spans beyond what has actually committed are still intact, so
            // the enumeration floor never moves past the commit horizon.
            let floor = pack_tid.min(tables.last_committed());
            tables
                .retained_floor
                .fetch_max(floor.as_u64(), Ordering::SeqCst);
            *cursor_slot = None;
        } else {
            *cursor_slot = Some(PackCursor {
                pack_tid,
                after: batch.last().copied(),
            });
        }
        Ok(outcome)
    }

    fn blob_ref(&self, oid: Oid, tid: Tid) -> Result<Option<BlobRef>> {
        Ok(self.tables.blobs.get(&(oid, tid)).map(|r| r.clone()))
    }
}

/// Load session over the in-process tables
struct MemoryLoadSession {
    tables: Arc<Tables>,
    ceiling: Tid,
}

impl MemoryLoadSession {
    /// Distinguish "object does not exist yet in this snapshot" from "the
    /// revision this snapshot needs was packed away".
    fn miss(&self, oid: Oid, chain: Option<&Chain>, bound: Tid) -> Result<Option<ObjectState>> {
        if let Some(chain) = chain {
            if let Some(oldest) = chain.oldest() {
                if oldest.tid >= bound && oldest.prev_tid.is_some() {
                    return Err(Error::ReadConflict {
                        oid,
                        requested: bound,
                    });
                }
            }
        }
        Ok(None)
    }
}

impl LoadSession for MemoryLoadSession {
    fn ceiling(&self) -> Tid {
        self.ceiling
    }

    fn load_current(&self, oid: Oid) -> Result<Option<ObjectState>> {
        match self.tables.objects.get(&oid) {
            Some(chain) => match chain.at_or_below(self.ceiling) {
                Some(state) => Ok(Some(state.clone())),
                None => self.miss(oid, Some(&*chain), self.ceiling.next()),
            },
            None => Ok(None),
        }
    }

    fn load_before(&self, oid: Oid, tid: Tid) -> Result<Option<ObjectState>> {
        match self.tables.objects.get(&oid) {
            Some(chain) => match chain.strictly_before(tid) {
                Some(state) => Ok(Some(state.clone())),
                None => self.miss(oid, Some(&*chain), tid),
            },
            None => Ok(None),
        }
    }

    fn restart(&mut self) -> Result<()> {
        self.ceiling = self.tables.last_committed();
        Ok(())
    }

    fn is_alive(&self) -> bool {
        true
    }
}

/// Store session: one backend transaction over the in-process tables
struct MemoryStoreSession {
    tables: Arc<Tables>,
    holder: HolderId,
    staged: Vec<ObjectState>,
    staged_blobs: Vec<(Oid, BlobRef)>,
    tid: Option<Tid>,
    finished: bool,
}

impl MemoryStoreSession {
    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(Error::invalid_state(
                "store session already committed or rolled back",
            ));
        }
        Ok(())
    }

    fn release_locks(&mut self) {
        self.tables.locks.release_all(self.holder);
        self.tables.commit_lock.release(self.holder);
    }
}

impl StoreSession for MemoryStoreSession {
    fn lock_and_check(&mut self, oid: Oid, expected_prev: Tid, wait: Duration) -> Result<()> {
        self.ensure_open()?;
        self.tables
            .locks
            .acquire(oid, self.holder, wait, self.tables.flavor.lock_nowait())?;
        let actual = self.tables.current_tid_of(oid);
        if actual != expected_prev {
            return Err(Error::Conflict {
                oid,
                expected: expected_prev,
                actual,
            });
        }
        Ok(())
    }

    fn allocate_tid(&mut self, wait: Duration) -> Result<Tid> {
        self.ensure_open()?;
        if let Some(tid) = self.tid {
            return Ok(tid);
        }
        // Commit lock first: tid allocation order must equal publication
        // order, so nobody else may allocate until we commit or roll back.
        self.tables.commit_lock.acquire(self.holder, wait)?;
        let tid = self.tables.tids.allocate();
        self.tid = Some(tid);
        Ok(tid)
    }

    fn write(&mut self, state: ObjectState) -> Result<()> {
        self.ensure_open()?;
        match self.tid {
            Some(tid) if tid == state.tid => {
                self.staged.push(state);
                Ok(())
            }
            Some(tid) => Err(Error::invalid_state(format!(
                "revision tid {} does not match reserved tid {}",
                state.tid, tid
            ))),
            None => Err(Error::invalid_state("write before tid allocation")),
        }
    }

    fn write_blob_ref(&mut self, oid: Oid, blob: BlobRef) -> Result<()> {
        self.ensure_open()?;
        self.staged_blobs.push((oid, blob));
        Ok(())
    }

    fn commit(&mut self, metadata: TransactionMetadata) -> Result<TransactionRecord> {
        self.ensure_open()?;
        let tid = self
            .tid
            .ok_or_else(|| Error::invalid_state("commit before tid allocation"))?;

        let mut changed: Vec<Oid> = self.staged.iter().map(|s| s.oid).collect();
        changed.sort_unstable();
        changed.dedup();

        // Validate every row before touching any table so a refused commit
        // leaves nothing half-applied.
        for &oid in &changed {
            let head = self.tables.current_tid_of(oid);
            if head >= tid {
                let _ = self.rollback();
                return Err(Error::storage(format!(
                    "commit tid {tid} not newer than current tid {head} of {oid}"
                )));
            }
        }

        // Object rows first, then the transaction record, then the
        // last-committed bump that makes the whole thing visible.
        for state in self.staged.drain(..) {
            self.tables.objects.entry(state.oid).or_default().push(state);
        }
        for (oid, blob) in self.staged_blobs.drain(..) {
            self.tables.blobs.insert((oid, tid), blob);
        }
        let record = TransactionRecord {
            tid,
            metadata,
            changed,
        };
        self.tables.txns.write().insert(tid, record.clone());
        self.tables
            .last_committed
            .fetch_max(tid.as_u64(), Ordering::SeqCst);

        self.release_locks();
        self.finished = true;
        tracing::debug!(tid = tid.as_u64(), oids = record.changed.len(), "committed");
        Ok(record)
    }

    fn rollback(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.staged.clear();
        self.staged_blobs.clear();
        self.tid = None;
        self.release_locks();
        self.finished = true;
        Ok(())
    }

    fn restart(&mut self) -> Result<()> {
        self.rollback()?;
        self.finished = false;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        true
    }
}

impl Drop for MemoryStoreSession {
    fn drop(&mut self) {
        // A leaked session must not strand its locks.
        if !self.finished {
            self.release_locks();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit_one(
        adapter: &MemoryAdapter,
        oid: Oid,
        expected_prev: Tid,
        data: &[u8],
    ) -> Result<TransactionRecord> {
        let mut session = adapter.open_store()?;
        session.lock_and_check(oid, expected_prev, Duration::from_millis(100))?;
        let tid = session.allocate_tid(Duration::from_secs(10))?;
        let prev = if expected_prev.is_zero() {
            None
        } else {
            Some(expected_prev)
        };
        session.write(ObjectState::new(oid, tid, prev, data.to_vec()))?;
        session.commit(TransactionMetadata::default())
    }

    #[test]
    fn test_new_oid_never_repeats() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let a = adapter.new_oid().unwrap();
        let b = adapter.new_oid().unwrap();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_commit_then_load_current() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let oid = adapter.new_oid().unwrap();
        let record = commit_one(&adapter, oid, Tid::ZERO, b"first").unwrap();

        let load = adapter.open_load().unwrap();
        let state = load.load_current(oid).unwrap().unwrap();
        assert_eq!(state.tid, record.tid);
        assert_eq!(&state.data[..], b"first");
        assert_eq!(state.prev_tid, None);
        assert_eq!(adapter.last_committed().unwrap(), record.tid);
    }

    #[test]
    fn test_load_session_does_not_see_later_commits() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let oid = adapter.new_oid().unwrap();
        let first = commit_one(&adapter, oid, Tid::ZERO, b"v1").unwrap();

        let pinned = adapter.open_load().unwrap();
        let second = commit_one(&adapter, oid, first.tid, b"v2").unwrap();
        assert!(second.tid > first.tid);

        // Pinned before the second commit: still sees v1.
        let state = pinned.load_current(oid).unwrap().unwrap();
        assert_eq!(state.tid, first.tid);

        // A fresh session sees v2.
        let fresh = adapter.open_load().unwrap();
        assert_eq!(fresh.load_current(oid).unwrap().unwrap().tid, second.tid);
    }

    #[test]
    fn test_restart_advances_ceiling() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let oid = adapter.new_oid().unwrap();
        let first = commit_one(&adapter, oid, Tid::ZERO, b"v1").unwrap();

        let mut session = adapter.open_load().unwrap();
        let second = commit_one(&adapter, oid, first.tid, b"v2").unwrap();
        assert_eq!(session.ceiling(), first.tid);
        session.restart().unwrap();
        assert_eq!(session.ceiling(), second.tid);
    }

    #[test]
    fn test_load_before_returns_previous_revision() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let oid = adapter.new_oid().unwrap();
        let first = commit_one(&adapter, oid, Tid::ZERO, b"v1").unwrap();
        let second = commit_one(&adapter, oid, first.tid, b"v2").unwrap();

        let load = adapter.open_load().unwrap();
        let before = load.load_before(oid, second.tid).unwrap().unwrap();
        assert_eq!(before.tid, first.tid);
        assert_eq!(&before.data[..], b"v1");
        // Idempotent: asking again yields the same unique revision.
        assert_eq!(load.load_before(oid, second.tid).unwrap().unwrap(), before);
        // Before the first revision the object did not exist.
        assert!(load.load_before(oid, first.tid).unwrap().is_none());
    }

    #[test]
    fn test_conflict_reports_actual_tid() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let oid = adapter.new_oid().unwrap();
        let first = commit_one(&adapter, oid, Tid::ZERO, b"v1").unwrap();
        let second = commit_one(&adapter, oid, first.tid, b"v2").unwrap();

        // Built against the stale first revision.
        let err = commit_one(&adapter, oid, first.tid, b"v3").unwrap_err();
        match err {
            Error::Conflict {
                oid: conflicted,
                expected,
                actual,
            } => {
                assert_eq!(conflicted, oid);
                assert_eq!(expected, first.tid);
                assert_eq!(actual, second.tid);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_rollback_releases_locks_and_is_idempotent() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let oid = adapter.new_oid().unwrap();

        let mut session = adapter.open_store().unwrap();
        session
            .lock_and_check(oid, Tid::ZERO, Duration::from_millis(100))
            .unwrap();
        session.allocate_tid(Duration::from_secs(10)).unwrap();
        session.rollback().unwrap();
        session.rollback().unwrap();

        // Locks are free again.
        commit_one(&adapter, oid, Tid::ZERO, b"v1").unwrap();
    }

    #[test]
    fn test_dropped_session_frees_locks() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let oid = adapter.new_oid().unwrap();
        {
            let mut session = adapter.open_store().unwrap();
            session
                .lock_and_check(oid, Tid::ZERO, Duration::from_millis(100))
                .unwrap();
        }
        commit_one(&adapter, oid, Tid::ZERO, b"v1").unwrap();
    }

    #[test]
    fn test_list_changes_spans_commits_in_order() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let a = adapter.new_oid().unwrap();
        let b = adapter.new_oid().unwrap();
        let t0 = adapter.last_committed().unwrap();
        let first = commit_one(&adapter, a, Tid::ZERO, b"a1").unwrap();
        let second = commit_one(&adapter, b, Tid::ZERO, b"b1").unwrap();

        let changes = adapter.list_changes(t0, second.tid).unwrap().unwrap();
        assert_eq!(changes, vec![(a, first.tid), (b, second.tid)]);

        // Empty span.
        assert!(adapter
            .list_changes(second.tid, second.tid)
            .unwrap()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_history_is_newest_first() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let oid = adapter.new_oid().unwrap();
        let first = commit_one(&adapter, oid, Tid::ZERO, b"v1").unwrap();
        let second = commit_one(&adapter, oid, first.tid, b"longer-v2").unwrap();

        let history = adapter.history(oid).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].tid, second.tid);
        assert_eq!(history[0].prev_tid, Some(first.tid));
        assert_eq!(history[1].tid, first.tid);
        assert_eq!(history[1].prev_tid, None);
    }

    #[test]
    fn test_iterate_bounds_are_inclusive() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let oid = adapter.new_oid().unwrap();
        let first = commit_one(&adapter, oid, Tid::ZERO, b"v1").unwrap();
        let second = commit_one(&adapter, oid, first.tid, b"v2").unwrap();

        let records = adapter.iterate(first.tid, second.tid).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tid, first.tid);
        assert_eq!(records[1].tid, second.tid);
    }

    #[test]
    fn test_pack_keeps_newest_at_or_below_target() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let oid = adapter.new_oid().unwrap();
        let first = commit_one(&adapter, oid, Tid::ZERO, b"v1").unwrap();
        let second = commit_one(&adapter, oid, first.tid, b"v2").unwrap();
        let third = commit_one(&adapter, oid, second.tid, b"v3").unwrap();

        // Pack to the middle revision: v1 goes, v2 (keeper) and v3 stay.
        let outcome = adapter.pack_batch(second.tid, 100).unwrap();
        assert!(outcome.done);
        assert_eq!(outcome.deleted, 1);

        let history = adapter.history(oid).unwrap();
        assert_eq!(
            history.iter().map(|r| r.tid).collect::<Vec<_>>(),
            vec![third.tid, second.tid]
        );
    }

    #[test]
    fn test_pack_never_deletes_sole_revision() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let oid = adapter.new_oid().unwrap();
        let only = commit_one(&adapter, oid, Tid::ZERO, b"v1").unwrap();

        let outcome = adapter.pack_batch(only.tid.next(), 100).unwrap();
        assert_eq!(outcome.deleted, 0);
        assert_eq!(adapter.history(oid).unwrap().len(), 1);
    }

    #[test]
    fn test_pack_cursor_resumes_across_batches() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let mut last_tids = Vec::new();
        for _ in 0..6 {
            let oid = adapter.new_oid().unwrap();
            let first = commit_one(&adapter, oid, Tid::ZERO, b"v1").unwrap();
            let second = commit_one(&adapter, oid, first.tid, b"v2").unwrap();
            last_tids.push((oid, second.tid));
        }
        let pack_tid = adapter.last_committed().unwrap();

        // Two-oid batches: the six objects take several calls, and every
        // call commits its deletions independently.
        let mut total = 0;
        let mut batches = 0;
        loop {
            let outcome = adapter.pack_batch(pack_tid, 2).unwrap();
            total += outcome.deleted;
            batches += 1;
            if outcome.done {
                break;
            }
        }
        assert_eq!(total, 6);
        assert!(batches >= 3);
        for (oid, last) in last_tids {
            let history = adapter.history(oid).unwrap();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].tid, last);
        }
    }

    #[test]
    fn test_packed_span_cannot_be_enumerated() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let oid = adapter.new_oid().unwrap();
        let first = commit_one(&adapter, oid, Tid::ZERO, b"v1").unwrap();
        let second = commit_one(&adapter, oid, first.tid, b"v2").unwrap();

        let outcome = adapter.pack_batch(second.tid, 100).unwrap();
        assert!(outcome.done);

        // A poller that slept through the pack cannot trust the span.
        assert!(adapter.list_changes(first.tid, second.tid).unwrap().is_none());
        // Spans starting at the pack point still enumerate.
        assert!(adapter.list_changes(second.tid, second.tid).unwrap().is_some());
    }

    #[test]
    fn test_packed_revision_read_is_a_read_conflict() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let oid = adapter.new_oid().unwrap();
        let first = commit_one(&adapter, oid, Tid::ZERO, b"v1").unwrap();
        let second = commit_one(&adapter, oid, first.tid, b"v2").unwrap();
        adapter.pack_batch(second.tid, 100).unwrap();

        let load = adapter.open_load().unwrap();
        let err = load.load_before(oid, second.tid).unwrap_err();
        assert!(matches!(err, Error::ReadConflict { .. }));
    }

    #[test]
    fn test_blob_ref_mapping_row() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let oid = adapter.new_oid().unwrap();

        let mut session = adapter.open_store().unwrap();
        session
            .lock_and_check(oid, Tid::ZERO, Duration::from_millis(100))
            .unwrap();
        let tid = session.allocate_tid(Duration::from_secs(10)).unwrap();
        session
            .write(ObjectState::new(oid, tid, None, b"x".to_vec()))
            .unwrap();
        session
            .write_blob_ref(
                oid,
                BlobRef {
                    locator: "blobs/0001".into(),
                    len: 4096,
                },
            )
            .unwrap();
        session.commit(TransactionMetadata::default()).unwrap();

        let blob = adapter.blob_ref(oid, tid).unwrap().unwrap();
        assert_eq!(blob.locator, "blobs/0001");
        assert!(adapter.blob_ref(oid, tid.next()).unwrap().is_none());
    }

    #[test]
    fn test_commit_records_metadata() {
        let adapter = MemoryAdapter::new(Flavor::PostgresLike);
        let oid = adapter.new_oid().unwrap();

        let mut session = adapter.open_store().unwrap();
        session
            .lock_and_check(oid, Tid::ZERO, Duration::from_millis(100))
            .unwrap();
        let tid = session.allocate_tid(Duration::from_secs(10)).unwrap();
        session
            .write(ObjectState::new(oid, tid, None, b"x".to_vec()))
            .unwrap();
        let record = session
            .commit(TransactionMetadata::described("import"))
            .unwrap();

        assert_eq!(record.changed, vec![oid]);
        let iterated = adapter.iterate(tid, tid).unwrap();
        assert_eq!(iterated[0].metadata.description, "import");
    }
}
