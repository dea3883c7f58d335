//! Storage facade
//!
//! [`Store`] wires the adapter, connection pools, cache, poller, and packer
//! into one lifetime-scoped service object, constructed once and cloned
//! (cheaply) wherever needed; there are no implicit singletons. [`Session`]
//! is the read side: a leased load connection pinned to a snapshot, served
//! through the cache. Writes go through [`Transaction`]s obtained from
//! [`Store::begin`].

use crate::health::Health;
use crate::packer::{PackSummary, Packer};
use crate::poller::{PollObserver, Poller, PollerHandle};
use parking_lot::Mutex;
use riverbed_adapter::{LoadLease, SessionPools};
use riverbed_cache::{CacheTier, StorageCache};
use riverbed_core::{
    Adapter, BlobRef, ObjectState, Oid, Options, Result, RevisionInfo, Tid, TransactionRecord,
};
use riverbed_txn::{CommitSink, Transaction};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Publishes commits to the cache and triggers the immediate poll that
/// informs every other session
struct EngineSink {
    cache: Arc<StorageCache>,
    poller: Arc<Poller>,
}

impl CommitSink for EngineSink {
    fn after_commit(&self, tid: Tid, states: &[ObjectState]) {
        self.cache.after_commit(tid, states);
        match self.poller.poll() {
            Ok(_) => {}
            Err(error) if error.is_transient() => {
                tracing::warn!(%error, "post-commit poll failed; next cycle will catch up");
            }
            Err(error) => {
                // Poisoning already happened inside the poller; the commit
                // itself is durable.
                tracing::error!(%error, "post-commit poll failed fatally");
            }
        }
    }
}

struct Inner {
    adapter: Arc<dyn Adapter>,
    pools: Arc<SessionPools>,
    cache: Arc<StorageCache>,
    poller: Arc<Poller>,
    health: Arc<Health>,
    packer: Packer,
    pack_stop: AtomicBool,
    sink: Arc<EngineSink>,
    options: Options,
    /// Snapshot ceilings of open sessions, for the pack keep floor
    pinned: Mutex<BTreeMap<u64, Tid>>,
    next_session: AtomicU64,
}

/// MVCC object store over a relational backend
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Open a store over `adapter` with the given options
    pub fn open(adapter: Arc<dyn Adapter>, options: Options) -> Store {
        Self::build(adapter, options, None)
    }

    /// Open a store that also consults a shared cache tier on local misses
    pub fn open_with_tier(
        adapter: Arc<dyn Adapter>,
        options: Options,
        tier: Arc<dyn CacheTier>,
    ) -> Store {
        Self::build(adapter, options, Some(tier))
    }

    fn build(
        adapter: Arc<dyn Adapter>,
        options: Options,
        tier: Option<Arc<dyn CacheTier>>,
    ) -> Store {
        let cache = Arc::new(StorageCache::new(&options, tier));
        let health = Arc::new(Health::new());
        let poller = Arc::new(Poller::new(
            Arc::clone(&adapter),
            Arc::clone(&cache),
            Arc::clone(&health),
        ));
        let sink = Arc::new(EngineSink {
            cache: Arc::clone(&cache),
            poller: Arc::clone(&poller),
        });
        Store {
            inner: Arc::new(Inner {
                pools: SessionPools::new(Arc::clone(&adapter)),
                packer: Packer::new(Arc::clone(&adapter), options.pack_batch_size),
                pack_stop: AtomicBool::new(false),
                adapter,
                cache,
                poller,
                health,
                sink,
                options,
                pinned: Mutex::new(BTreeMap::new()),
                next_session: AtomicU64::new(0),
            }),
        }
    }

    /// Allocate an oid for a new object
    pub fn new_oid(&self) -> Result<Oid> {
        self.inner.adapter.new_oid()
    }

    /// Open a read session pinned to the current snapshot
    ///
    /// Polls on demand after pinning, so the cache has absorbed everything
    /// the session can see. A transient poll failure degrades to direct
    /// backend reads rather than failing the session.
    pub fn session(&self) -> Result<Session> {
        let lease = self.inner.pools.lease_load()?;
        match self.inner.poller.poll() {
            Ok(_) => {}
            Err(error) if error.is_transient() => {
                tracing::warn!(%error, "poll before session open failed; serving without cache");
            }
            Err(error) => return Err(error),
        }

        let ceiling = lease.session().ceiling();
        let id = self.inner.next_session.fetch_add(1, Ordering::SeqCst);
        self.inner.pinned.lock().insert(id, ceiling);
        Ok(Session {
            inner: Arc::clone(&self.inner),
            lease,
            id,
            ceiling,
        })
    }

    /// Begin a write transaction
    ///
    /// Refused once the store is poisoned by a tid regression.
    pub fn begin(&self) -> Result<Transaction> {
        self.inner.health.check()?;
        let sink: Arc<dyn CommitSink> = self.inner.sink.clone();
        Transaction::begin(&self.inner.pools, sink, &self.inner.options)
    }

    /// Revision summaries for `oid`, newest first
    pub fn history(&self, oid: Oid) -> Result<Vec<RevisionInfo>> {
        self.inner.adapter.history(oid)
    }

    /// Committed transaction records with `start <= tid <= stop`
    pub fn iterate(&self, start: Tid, stop: Tid) -> Result<Vec<TransactionRecord>> {
        self.inner.adapter.iterate(start, stop)
    }

    /// The highest committed tid
    pub fn last_committed(&self) -> Result<Tid> {
        self.inner.adapter.last_committed()
    }

    /// The blob mapping row for a revision, if any
    pub fn blob_ref(&self, oid: Oid, tid: Tid) -> Result<Option<BlobRef>> {
        self.inner.adapter.blob_ref(oid, tid)
    }

    /// Garbage-collect history up to `pack_tid`
    ///
    /// The target is clamped by the oldest open snapshot so no pinned
    /// revision disappears. Deletion commits batch by batch; a concurrent
    /// [`Store::interrupt_pack`] stops the run between batches, and a rerun
    /// resumes from the adapter's cursor.
    pub fn pack(&self, pack_tid: Tid) -> Result<PackSummary> {
        self.inner.health.check()?;
        self.inner.pack_stop.store(false, Ordering::Relaxed);
        let floor = self
            .inner
            .pinned
            .lock()
            .values()
            .min()
            .copied()
            .unwrap_or(Tid::MAX);
        self.inner.packer.pack(pack_tid, floor, &self.inner.pack_stop)
    }

    /// Ask a running pack to stop after its current batch
    pub fn interrupt_pack(&self) {
        self.inner.pack_stop.store(true, Ordering::Relaxed);
    }

    /// Garbage-collect history committed before a wall-clock instant
    ///
    /// Convenience over [`Store::pack`] using the clock correlation of
    /// tids.
    pub fn pack_before(&self, when: chrono::DateTime<chrono::Utc>) -> Result<PackSummary> {
        self.pack(Tid::at_time(when))
    }

    /// Run one poll cycle now
    pub fn poll(&self) -> Result<Tid> {
        self.inner.poller.poll()
    }

    /// Start background polling at the configured interval
    pub fn start_poller(&self) -> PollerHandle {
        self.inner.poller.spawn(self.inner.options.poll_interval())
    }

    /// Register a poll observer
    pub fn subscribe(&self, observer: &Arc<dyn PollObserver>) {
        self.inner.poller.subscribe(observer);
    }

    /// True once a tid regression poisoned the store
    pub fn is_poisoned(&self) -> bool {
        self.inner.health.is_poisoned()
    }

    /// The options this store was opened with
    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// The object-state cache (diagnostics and tests)
    pub fn cache(&self) -> &Arc<StorageCache> {
        &self.inner.cache
    }
}

/// Read session pinned to one snapshot
///
/// Every load answers as of the pinned tid; the snapshot never moves for
/// the session's lifetime. Dropping the session releases its connection
/// back to the pool and unpins the snapshot for the packer.
pub struct Session {
    inner: Arc<Inner>,
    lease: LoadLease,
    id: u64,
    ceiling: Tid,
}

impl Session {
    /// The pinned snapshot tid
    pub fn ceiling(&self) -> Tid {
        self.ceiling
    }

    /// Load the current revision of `oid` as of this snapshot
    ///
    /// Served from the cache when possible; byte-identical to a direct
    /// backend load either way.
    pub fn load(&self, oid: Oid) -> Result<Option<ObjectState>> {
        self.inner.cache.load(self.lease.session(), oid)
    }

    /// Load the newest revision of `oid` strictly before `tid`
    pub fn load_before(&self, oid: Oid, tid: Tid) -> Result<Option<ObjectState>> {
        self.lease.session().load_before(oid, tid)
    }

    /// True when `oid` exists in this snapshot
    pub fn exists(&self, oid: Oid) -> Result<bool> {
        Ok(self.load(oid)?.is_some())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inner.pinned.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riverbed_adapter::MemoryAdapter;
    use riverbed_core::{Flavor, TransactionMetadata};

    fn store() -> Store {
        Store::open(
            Arc::new(MemoryAdapter::new(Flavor::PostgresLike)),
            Options::default(),
        )
    }

    fn commit(store: &Store, oid: Oid, prev: Tid, data: &[u8]) -> Tid {
        let mut txn = store.begin().unwrap();
        txn.store(oid, prev, data.to_vec()).unwrap();
        txn.vote().unwrap();
        txn.finish(TransactionMetadata::default()).unwrap()
    }

    #[test]
    fn test_store_and_load_roundtrip() {
        let store = store();
        let oid = store.new_oid().unwrap();
        let tid = commit(&store, oid, Tid::ZERO, b"payload");

        let session = store.session().unwrap();
        let state = session.load(oid).unwrap().unwrap();
        assert_eq!(state.tid, tid);
        assert_eq!(&state.data[..], b"payload");
        assert!(session.exists(oid).unwrap());
        assert!(!session.exists(store.new_oid().unwrap()).unwrap());
    }

    #[test]
    fn test_session_snapshot_is_stable() {
        let store = store();
        let oid = store.new_oid().unwrap();
        let t1 = commit(&store, oid, Tid::ZERO, b"v1");

        let session = store.session().unwrap();
        let t2 = commit(&store, oid, t1, b"v2");

        // The pinned session still reads v1; a new session reads v2.
        assert_eq!(session.load(oid).unwrap().unwrap().tid, t1);
        let fresh = store.session().unwrap();
        assert_eq!(fresh.load(oid).unwrap().unwrap().tid, t2);
        assert!(fresh.ceiling() >= t2);
    }

    #[test]
    fn test_load_before_walks_history() {
        let store = store();
        let oid = store.new_oid().unwrap();
        let t1 = commit(&store, oid, Tid::ZERO, b"v1");
        let t2 = commit(&store, oid, t1, b"v2");

        let session = store.session().unwrap();
        assert_eq!(session.load_before(oid, t2).unwrap().unwrap().tid, t1);
        assert!(session.load_before(oid, t1).unwrap().is_none());
    }

    #[test]
    fn test_open_session_pins_the_pack_floor() {
        let store = store();
        let oid = store.new_oid().unwrap();
        let t1 = commit(&store, oid, Tid::ZERO, b"v1");
        let t2 = commit(&store, oid, t1, b"v2");

        let pinned = store.session().unwrap();
        assert_eq!(pinned.ceiling(), t2);
        let t3 = commit(&store, oid, t2, b"v3");
        let summary = store.pack(t3).unwrap();
        // Clamped to the session's ceiling t2: v1 deleted, v2 kept.
        assert_eq!(summary.packed_to, t2);
        assert_eq!(summary.deleted, 1);
        assert_eq!(pinned.load(oid).unwrap().unwrap().tid, t2);

        drop(pinned);
        let summary = store.pack(t3).unwrap();
        assert_eq!(summary.packed_to, t3);
        assert_eq!(store.history(oid).unwrap().len(), 1);
    }

    #[test]
    fn test_pack_before_uses_the_clock_correlation() {
        let store = store();
        let oid = store.new_oid().unwrap();
        let t1 = commit(&store, oid, Tid::ZERO, b"v1");
        commit(&store, oid, t1, b"v2");

        // Everything so far was committed before "now + a while".
        let when = chrono::Utc::now() + chrono::Duration::seconds(60);
        let summary = store.pack_before(when).unwrap();
        assert!(summary.completed);
        assert_eq!(summary.deleted, 1);
        assert_eq!(store.history(oid).unwrap().len(), 1);
    }

    #[test]
    fn test_poisoned_store_refuses_begin() {
        let store = store();
        store
            .inner
            .health
            .poison(Tid::from_u64(5), Tid::from_u64(4));
        assert!(store.is_poisoned());
        assert!(store.begin().is_err());
        assert!(store.pack(Tid::MAX).is_err());
    }

    #[test]
    fn test_history_and_iterate_surface_records() {
        let store = store();
        let oid = store.new_oid().unwrap();
        let t1 = commit(&store, oid, Tid::ZERO, b"v1");
        let t2 = commit(&store, oid, t1, b"v2");

        let history = store.history(oid).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].tid, t2);

        let records = store.iterate(t1, t2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].changed, vec![oid]);
        assert_eq!(store.last_committed().unwrap(), t2);
    }
}
