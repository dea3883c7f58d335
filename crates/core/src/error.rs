//! Error types shared across the engine
//!
//! One enum covers the whole taxonomy so every crate can use the same
//! `Result` alias. We use `thiserror` for the `Display` and `Error`
//! implementations.
//!
//! Propagation rules:
//! - conflicts (`Conflict`, `CommitLockTimeout`, `ReadConflict`) always
//!   surface to the caller unmodified; nothing retries them internally
//! - transient loss (`Disconnected`, `Poll`) may be retried locally by the
//!   pool or the next poll cycle
//! - `TidWentBackwards` is fatal: the store refuses further commits

use crate::types::{Oid, Tid};
use std::io;
use thiserror::Error;

/// Result type alias used throughout the engine
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the storage engine
#[derive(Debug, Error)]
pub enum Error {
    /// Optimistic check failed at vote: someone else committed the oid first
    #[error("conflict on {oid}: expected prev tid {expected}, backend has {actual}")]
    Conflict {
        /// Object that failed the check
        oid: Oid,
        /// Prev tid the transaction was built against
        expected: Tid,
        /// Tid actually current in the backend
        actual: Tid,
    },

    /// Bounded wait for a commit-time lock expired
    ///
    /// Surfaced as a retryable conflict: the caller restarts with a fresh
    /// snapshot exactly as for `Conflict`. The target is a row lock
    /// ("oid 0x…") or the backend commit lock ("commit lock").
    #[error("lock wait on {target} timed out after {waited_ms} ms")]
    CommitLockTimeout {
        /// What we were waiting for
        target: String,
        /// How long we waited
        waited_ms: u64,
    },

    /// The revision a pinned snapshot needs is unavailable
    ///
    /// Either it was packed away or the backend served data from a future
    /// transaction.
    #[error("no revision of {oid} readable for snapshot {requested}")]
    ReadConflict {
        /// Object being loaded
        oid: Oid,
        /// Snapshot tid the reader is pinned to
        requested: Tid,
    },

    /// Backend I/O failure; forces the surrounding transaction to abort
    #[error("storage backend error: {0}")]
    Storage(String),

    /// I/O error from the platform
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Backend unreachable during a poll cycle
    ///
    /// The prior cache state is retained and treated as possibly stale;
    /// the next cycle retries.
    #[error("poll failed: {0}")]
    Poll(String),

    /// A newly observed tid was not greater than the last known tid
    ///
    /// Indicates backend or clock corruption. Fatal: the store is poisoned
    /// and refuses further commits until rebuilt.
    #[error("tid went backwards: last known {last}, observed {observed}")]
    TidWentBackwards {
        /// Highest tid previously observed
        last: Tid,
        /// The regressing tid
        observed: Tid,
    },

    /// Cache contents contradict the backend
    ///
    /// Means the backend is not giving each session a true snapshot view,
    /// or two processes disagree about commit ordering.
    #[error("cache inconsistent with backend: {0}")]
    CacheInconsistency(String),

    /// Operation not legal for the transaction's current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Connection to the backend was lost
    #[error("backend connection lost")]
    Disconnected,
}

impl Error {
    /// True for errors the caller resolves by restarting with a fresh
    /// snapshot
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Conflict { .. } | Error::CommitLockTimeout { .. } | Error::ReadConflict { .. }
        )
    }

    /// True for errors that may clear up on their own
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Disconnected | Error::Poll(_))
    }

    /// True for errors after which the store must stop committing
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::TidWentBackwards { .. } | Error::CacheInconsistency(_)
        )
    }

    /// Wrap a backend error message
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Wrap an invalid-state message
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }
}
