//! Transaction coordination for the riverbed engine
//!
//! One module: the [`coordinator`] state machine driving
//! begin/store/vote/finish/abort with optimistic conflict detection and
//! ordered locking. The coordinator talks to the backend only through a
//! pooled store session and publishes commits through a [`CommitSink`],
//! so it depends on neither the cache nor the poller.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;

pub use coordinator::{CommitSink, NullSink, Transaction, TransactionStatus};
