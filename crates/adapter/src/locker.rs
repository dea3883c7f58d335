//! Commit-time locking
//!
//! Two lock structures back the vote/finish protocol:
//! - [`LockTable`]: per-oid row locks, acquired in ascending oid order by
//!   the coordinator during vote
//! - [`CommitLock`]: the single backend commit lock, held from tid
//!   allocation to finish/abort so tid publication order matches tid
//!   allocation order
//!
//! All waits are bounded. A timeout surfaces as `CommitLockTimeout`, which
//! callers treat as a retryable conflict; nothing here blocks indefinitely.

use parking_lot::{Condvar, Mutex};
use riverbed_core::{Error, Oid, Result};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::time::{Duration, Instant};

/// Identity of a lock holder: one store session
pub type HolderId = u64;

/// Per-oid row locks with bounded waits
///
/// Lock entries are ephemeral: they exist only between a session's vote and
/// its finish or abort, and `release_all` drops every entry a session
/// holds in one sweep.
#[derive(Debug, Default)]
pub struct LockTable {
    held: Mutex<FxHashMap<Oid, HolderId>>,
    released: Condvar,
}

impl LockTable {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `oid` on behalf of `holder`
    ///
    /// Re-acquiring a lock already held by the same session is a no-op.
    /// With `nowait` a contended lock fails immediately; otherwise the wait
    /// is bounded by `wait`.
    pub fn acquire(&self, oid: Oid, holder: HolderId, wait: Duration, nowait: bool) -> Result<()> {
        let deadline = Instant::now() + wait;
        let mut held = self.held.lock();
        loop {
            match held.get(&oid) {
                None => {
                    held.insert(oid, holder);
                    return Ok(());
                }
                Some(&owner) if owner == holder => return Ok(()),
                Some(_) if nowait => {
                    return Err(Error::CommitLockTimeout {
                        target: oid.to_string(),
                        waited_ms: 0,
                    });
                }
                Some(_) => {
                    let now = Instant::now();
                    if now >= deadline
                        || self
                            .released
                            .wait_for(&mut held, deadline - now)
                            .timed_out()
                    {
                        return Err(Error::CommitLockTimeout {
                            target: oid.to_string(),
                            waited_ms: wait.as_millis() as u64,
                        });
                    }
                }
            }
        }
    }

    /// Release every lock `holder` owns
    pub fn release_all(&self, holder: HolderId) {
        let mut held = self.held.lock();
        let owned: SmallVec<[Oid; 8]> = held
            .iter()
            .filter(|(_, &h)| h == holder)
            .map(|(&oid, _)| oid)
            .collect();
        if owned.is_empty() {
            return;
        }
        for oid in owned {
            held.remove(&oid);
        }
        self.released.notify_all();
    }

    /// Number of currently held locks
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

/// The single backend commit lock
///
/// Serializes the allocate-tid → write → commit window across store
/// sessions, which is what makes tid order equal commit order.
#[derive(Debug, Default)]
pub struct CommitLock {
    holder: Mutex<Option<HolderId>>,
    released: Condvar,
}

impl CommitLock {
    /// Create an unheld commit lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the commit lock on behalf of `holder`, waiting at most `wait`
    pub fn acquire(&self, holder: HolderId, wait: Duration) -> Result<()> {
        let deadline = Instant::now() + wait;
        let mut current = self.holder.lock();
        loop {
            match *current {
                None => {
                    *current = Some(holder);
                    return Ok(());
                }
                Some(owner) if owner == holder => return Ok(()),
                Some(_) => {
                    let now = Instant::now();
                    if now >= deadline
                        || self
                            .released
                            .wait_for(&mut current, deadline - now)
                            .timed_out()
                    {
                        return Err(Error::CommitLockTimeout {
                            target: "commit lock".to_string(),
                            waited_ms: wait.as_millis() as u64,
                        });
                    }
                }
            }
        }
    }

    /// Release the commit lock if `holder` owns it
    pub fn release(&self, holder: HolderId) {
        let mut current = self.holder.lock();
        if *current == Some(holder) {
            *current = None;
            self.released.notify_all();
        }
    }

    /// True while any session holds the lock
    pub fn is_held(&self) -> bool {
        self.holder.lock().is_some()
    }
}
