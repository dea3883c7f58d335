//! Transaction coordinator
//!
//! Implements the commit protocol as a small state machine:
//!
//! ```text
//! Begun --store()*--> Begun --vote()--> Voting --finish()--> Committed
//!   \                                     \
//!    +------------- abort() --------------+--> Aborted
//! ```
//!
//! `store` only buffers; nothing touches the backend until `vote`, which
//! acquires row locks in ascending oid order (a fixed global order, so two
//! transactions with overlapping write sets can never deadlock), re-checks
//! every optimistic token under its lock, and reserves the commit tid.
//! `finish` writes and durably commits; `abort` is callable from any
//! non-terminal state and always releases whatever was held.
//!
//! Conflicts are never retried here: a `Conflict` or `CommitLockTimeout`
//! aborts the transaction and propagates so the caller can restart against
//! a fresh snapshot.

use riverbed_adapter::{SessionPools, StoreLease};
use riverbed_core::{
    BlobRef, Error, ObjectState, Oid, Options, Result, Tid, TransactionMetadata,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Where committed state is published after the backend commit succeeds
///
/// The engine wires this to the storage cache and the poll observers; the
/// coordinator itself stays independent of both.
pub trait CommitSink: Send + Sync {
    /// Called exactly once per committed transaction, after durability
    fn after_commit(&self, tid: Tid, states: &[ObjectState]);
}

/// Sink that publishes nowhere; useful for tools and tests
pub struct NullSink;

impl CommitSink for NullSink {
    fn after_commit(&self, _tid: Tid, _states: &[ObjectState]) {}
}

/// Lifecycle state of a transaction
///
/// `Committed` and `Aborted` are terminal; no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Accepting buffered stores
    Begun,
    /// Locks held, tid reserved, awaiting finish
    Voting,
    /// Durably committed
    Committed,
    /// Rolled back; all resources released
    Aborted,
}

/// One buffered write
#[derive(Debug)]
struct Pending {
    /// Optimistic token: the tid the caller last observed for this oid
    expected_prev: Tid,
    data: Arc<[u8]>,
    blob: Option<BlobRef>,
}

/// A write transaction against one store
pub struct Transaction {
    lease: StoreLease,
    sink: Arc<dyn CommitSink>,
    lock_timeout: std::time::Duration,
    buffered: BTreeMap<Oid, Pending>,
    status: TransactionStatus,
    tid: Option<Tid>,
}

impl Transaction {
    /// Begin: lease a store connection and open a backend transaction
    pub fn begin(
        pools: &Arc<SessionPools>,
        sink: Arc<dyn CommitSink>,
        options: &Options,
    ) -> Result<Self> {
        Ok(Transaction {
            lease: pools.lease_store()?,
            sink,
            lock_timeout: options.commit_lock_timeout(),
            buffered: BTreeMap::new(),
            status: TransactionStatus::Begun,
            tid: None,
        })
    }

    /// Current lifecycle state
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// The reserved commit tid, Some only after a successful vote
    pub fn tid(&self) -> Option<Tid> {
        self.tid
    }

    /// Number of buffered writes
    pub fn pending(&self) -> usize {
        self.buffered.len()
    }

    /// Buffer a write
    ///
    /// `expected_prev` is the tid the caller last observed for `oid`
    /// (`Tid::ZERO` for a new object); it is validated under lock at vote
    /// time. Re-storing an oid replaces the buffered payload; nothing
    /// reaches the backend yet.
    pub fn store(&mut self, oid: Oid, expected_prev: Tid, data: impl Into<Arc<[u8]>>) -> Result<()> {
        self.ensure(TransactionStatus::Begun, "store")?;
        self.buffered.insert(
            oid,
            Pending {
                expected_prev,
                data: data.into(),
                blob: None,
            },
        );
        Ok(())
    }

    /// Attach a blob mapping row to a buffered write
    pub fn link_blob(&mut self, oid: Oid, blob: BlobRef) -> Result<()> {
        self.ensure(TransactionStatus::Begun, "link_blob")?;
        match self.buffered.get_mut(&oid) {
            Some(pending) => {
                pending.blob = Some(blob);
                Ok(())
            }
            None => Err(Error::invalid_state(format!(
                "no buffered store for {oid} to attach a blob to"
            ))),
        }
    }

    /// Vote: lock, validate, and reserve the commit tid
    ///
    /// Locks are taken in ascending oid order with a bounded wait. Any
    /// conflict or backend error aborts the whole transaction before
    /// propagating.
    pub fn vote(&mut self) -> Result<Tid> {
        self.ensure(TransactionStatus::Begun, "vote")?;
        self.status = TransactionStatus::Voting;

        // BTreeMap iteration is ascending by oid; combined with the bounded
        // wait this is the whole deadlock story.
        let checks: Vec<(Oid, Tid)> = self
            .buffered
            .iter()
            .map(|(&oid, p)| (oid, p.expected_prev))
            .collect();
        for (oid, expected_prev) in checks {
            if let Err(err) =
                self.lease
                    .session_mut()
                    .lock_and_check(oid, expected_prev, self.lock_timeout)
            {
                self.abort_after_failure(&err);
                return Err(err);
            }
        }

        match self.lease.session_mut().allocate_tid(self.lock_timeout) {
            Ok(tid) => {
                self.tid = Some(tid);
                Ok(tid)
            }
            Err(err) => {
                self.abort_after_failure(&err);
                Err(err)
            }
        }
    }

    /// Finish: write everything under the reserved tid and commit durably
    ///
    /// On success the new tid is published through the commit sink and
    /// returned. Any backend error aborts the whole transaction; no
    /// partial commit is ever visible.
    pub fn finish(&mut self, metadata: TransactionMetadata) -> Result<Tid> {
        self.ensure(TransactionStatus::Voting, "finish")?;
        let tid = self
            .tid
            .ok_or_else(|| Error::invalid_state("finish without a reserved tid"))?;

        let mut states = Vec::with_capacity(self.buffered.len());
        for (&oid, pending) in &self.buffered {
            let prev_tid = if pending.expected_prev.is_zero() {
                None
            } else {
                Some(pending.expected_prev)
            };
            states.push(ObjectState::new(oid, tid, prev_tid, pending.data.clone()));
        }

        for state in &states {
            if let Err(err) = self.lease.session_mut().write(state.clone()) {
                self.abort_after_failure(&err);
                return Err(err);
            }
        }
        for (&oid, pending) in &self.buffered {
            if let Some(blob) = &pending.blob {
                if let Err(err) = self.lease.session_mut().write_blob_ref(oid, blob.clone()) {
                    self.abort_after_failure(&err);
                    return Err(err);
                }
            }
        }

        if let Err(err) = self.lease.session_mut().commit(metadata) {
            self.abort_after_failure(&err);
            return Err(err);
        }

        self.status = TransactionStatus::Committed;
        self.buffered.clear();
        self.sink.after_commit(tid, &states);
        tracing::debug!(tid = tid.as_u64(), objects = states.len(), "transaction finished");
        Ok(tid)
    }

    /// Abort: roll back and release everything
    ///
    /// Legal from any non-terminal state; calling it again on an aborted
    /// transaction is a no-op. Aborting a committed transaction is an
    /// error.
    pub fn abort(&mut self) -> Result<()> {
        match self.status {
            TransactionStatus::Aborted => Ok(()),
            TransactionStatus::Committed => Err(Error::invalid_state(
                "cannot abort a committed transaction",
            )),
            TransactionStatus::Begun | TransactionStatus::Voting => {
                self.release();
                Ok(())
            }
        }
    }

    /// Abort after an internal failure, keeping the original error primary
    fn abort_after_failure(&mut self, cause: &Error) {
        if !cause.is_conflict() {
            tracing::warn!(%cause, "aborting transaction after backend failure");
        }
        self.release();
    }

    /// Release buffered state and backend resources; always succeeds
    fn release(&mut self) {
        if let Err(error) = self.lease.session_mut().rollback() {
            // The lease will be discarded by the pool's liveness check; the
            // backend's own transaction teardown reclaims its locks.
            tracing::warn!(%error, "rollback failed while aborting");
        }
        self.buffered.clear();
        self.tid = None;
        self.status = TransactionStatus::Aborted;
    }

    fn ensure(&self, wanted: TransactionStatus, op: &str) -> Result<()> {
        if self.status == wanted {
            Ok(())
        } else {
            Err(Error::invalid_state(format!(
                "{op} requires {wanted:?} state, transaction is {:?}",
                self.status
            )))
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if matches!(
            self.status,
            TransactionStatus::Begun | TransactionStatus::Voting
        ) {
            tracing::debug!("open transaction dropped; rolling back");
            self.release();
        }
    }
}
