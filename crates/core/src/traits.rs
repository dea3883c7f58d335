//! Adapter and session contracts
//!
//! The [`Adapter`] trait is the seam between the engine and a concrete
//! relational backend. An adapter is constructed once for a fixed
//! [`Flavor`](crate::types::Flavor); everything above it is
//! backend-agnostic. Implementations must be safe to share across threads.
//!
//! Two session types carry the two connection roles:
//! - a [`LoadSession`] pins a snapshot ceiling tid at open (or restart) time
//!   and never observes transactions committed after it
//! - a [`StoreSession`] wraps one backend read-write transaction, from open
//!   to commit or rollback

use crate::error::Result;
use crate::state::{BlobRef, ObjectState, RevisionInfo, TransactionMetadata, TransactionRecord};
use crate::types::{Flavor, Oid, Tid};
use std::time::Duration;

/// Outcome of one pack batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackBatch {
    /// Oids examined in this batch
    pub examined: usize,
    /// Revisions deleted in this batch
    pub deleted: usize,
    /// True when the pack cursor reached the end of the object table
    pub done: bool,
}

/// Read-only session pinned to a snapshot
pub trait LoadSession: Send {
    /// The snapshot ceiling: no transaction committed after this tid is
    /// visible through this session
    fn ceiling(&self) -> Tid;

    /// Load the current revision of `oid` as of the ceiling
    ///
    /// Returns None when the object does not exist in this snapshot.
    fn load_current(&self, oid: Oid) -> Result<Option<ObjectState>>;

    /// Load the newest committed revision of `oid` strictly before `tid`
    ///
    /// Returns None when the object did not yet exist before `tid`. The
    /// result is independent of the session ceiling; this is the history
    /// read used for multi-version loads.
    fn load_before(&self, oid: Oid, tid: Tid) -> Result<Option<ObjectState>>;

    /// Re-pin the snapshot at the latest committed tid
    fn restart(&mut self) -> Result<()>;

    /// Liveness probe used by the pool before reuse
    fn is_alive(&self) -> bool;
}

/// Read-write session wrapping one backend transaction
///
/// Lock state is ephemeral: every lock taken through `lock_and_check` is
/// released by `commit` or `rollback`, and `rollback` must succeed in
/// releasing resources even after a partial failure.
pub trait StoreSession: Send {
    /// Acquire the row lock for `oid` and verify the optimistic token
    ///
    /// Fails with `Conflict` when the true current tid of `oid` differs
    /// from `expected_prev` (use `Tid::ZERO` for "object must not exist
    /// yet"), and with `CommitLockTimeout` when the lock cannot be acquired
    /// within `wait`. Either failure leaves the session consistent; the
    /// caller is expected to roll back.
    fn lock_and_check(&mut self, oid: Oid, expected_prev: Tid, wait: Duration) -> Result<()>;

    /// Reserve the commit tid, strictly greater than any tid previously
    /// issued against this backend
    ///
    /// Also acquires the backend commit lock, waiting at most `wait`; the
    /// lock is held until `commit` or `rollback`, which serializes tid
    /// publication order with tid allocation order.
    fn allocate_tid(&mut self, wait: Duration) -> Result<Tid>;

    /// Stage one revision for the commit
    fn write(&mut self, state: ObjectState) -> Result<()>;

    /// Stage a blob mapping row for a revision written in this transaction
    fn write_blob_ref(&mut self, oid: Oid, blob: BlobRef) -> Result<()>;

    /// Durably commit the backend transaction and release all locks
    fn commit(&mut self, metadata: TransactionMetadata) -> Result<TransactionRecord>;

    /// Roll back the backend transaction and release all locks
    ///
    /// Idempotent: calling it on an already-finished session is a no-op.
    fn rollback(&mut self) -> Result<()>;

    /// Discard any unfinished work and begin a fresh backend transaction
    ///
    /// Called by the pool when a session is leased again after a commit or
    /// rollback.
    fn restart(&mut self) -> Result<()>;

    /// Liveness probe used by the pool before reuse
    fn is_alive(&self) -> bool;
}

/// Backend-specific storage operations
pub trait Adapter: Send + Sync {
    /// The backend variant this adapter was constructed for
    fn flavor(&self) -> Flavor;

    /// Allocate an oid that has never been used in this store
    fn new_oid(&self) -> Result<Oid>;

    /// Open a load session pinned at the latest committed tid
    fn open_load(&self) -> Result<Box<dyn LoadSession>>;

    /// Open a store session (a backend read-write transaction)
    fn open_store(&self) -> Result<Box<dyn StoreSession>>;

    /// The highest committed tid
    fn last_committed(&self) -> Result<Tid>;

    /// List transactions committed after `after`, up to and including
    /// `last`, in commit order, with the oids each changed
    ///
    /// Returns None when the span can no longer be enumerated (for example
    /// because packing discarded part of it); callers must then treat all
    /// cached state as suspect.
    fn list_changes(&self, after: Tid, last: Tid) -> Result<Option<Vec<(Oid, Tid)>>>;

    /// Revision summaries for `oid`, newest first; empty when unknown
    fn history(&self, oid: Oid) -> Result<Vec<RevisionInfo>>;

    /// Transaction records with `start <= tid <= stop`, in commit order
    fn iterate(&self, start: Tid, stop: Tid) -> Result<Vec<TransactionRecord>>;

    /// Delete superseded revisions for the next batch of oids
    ///
    /// For each oid visited, removes revisions strictly older than the
    /// newest revision at or below `pack_tid`; the newest such revision and
    /// anything newer always survive. The cursor persists across calls (and
    /// across restarts of the caller), so an interrupted pack resumes where
    /// it stopped; a call with a different `pack_tid` restarts from the
    /// beginning. Each batch is committed independently.
    fn pack_batch(&self, pack_tid: Tid, max_oids: usize) -> Result<PackBatch>;

    /// Look up the blob mapping row for a revision
    fn blob_ref(&self, oid: Oid, tid: Tid) -> Result<Option<BlobRef>>;
}
