//! The riverbed storage engine
//!
//! Ties the lower crates together behind one facade:
//! - [`Store`]: the service object owning adapter, pools, cache, poller,
//!   and packer
//! - [`Session`]: snapshot-pinned reads served through the cache
//! - [`Poller`]: change discovery driving cache invalidation and snapshot
//!   advancement
//! - [`Packer`]: resumable garbage collection of superseded revisions
//!
//! Write transactions come from [`Store::begin`] and follow the
//! begin/store/vote/finish/abort protocol implemented in `riverbed-txn`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod health;
pub mod packer;
pub mod poller;
pub mod storage;

pub use health::Health;
pub use packer::{PackSummary, Packer};
pub use poller::{PollObserver, Poller, PollerHandle};
pub use storage::{Session, Store};

// The write-side API is re-exported so engine users need only this crate.
pub use riverbed_txn::{Transaction, TransactionStatus};
