//! Riverbed: an MVCC transactional object store over a relational substrate
//!
//! Riverbed lets many concurrent sessions read consistent snapshots of an
//! evolving object graph while transactions commit atomic, conflict-checked
//! changes. An ACID relational backend (reached through the
//! [`Adapter`](riverbed_core::Adapter) contract) supplies durability and
//! row-level locking; riverbed supplies the commit protocol, the
//! snapshot-consistent cache, change polling, and history packing.
//!
//! # Quick start
//!
//! ```
//! use riverbed::{MemoryAdapter, Store};
//! use riverbed::{Flavor, Options, Tid, TransactionMetadata};
//! use std::sync::Arc;
//!
//! # fn main() -> riverbed::Result<()> {
//! let store = Store::open(
//!     Arc::new(MemoryAdapter::new(Flavor::PostgresLike)),
//!     Options::default(),
//! );
//!
//! // Write: begin / store / vote / finish.
//! let oid = store.new_oid()?;
//! let mut txn = store.begin()?;
//! txn.store(oid, Tid::ZERO, b"serialized object".to_vec())?;
//! txn.vote()?;
//! let tid = txn.finish(TransactionMetadata::described("first commit"))?;
//!
//! // Read: a session pinned to a consistent snapshot.
//! let session = store.session()?;
//! let state = session.load(oid)?.expect("just committed");
//! assert_eq!(state.tid, tid);
//! # Ok(())
//! # }
//! ```
//!
//! The serialized payloads are opaque here: object-graph traversal and the
//! serialization format belong to the persistence framework built on top.

// Re-export the public API from the engine and the supporting crates.
pub use riverbed_core::{
    BlobRef, Error, Flavor, ObjectState, Oid, Options, Result, RevisionInfo, Tid,
    TransactionMetadata, TransactionRecord,
};
pub use riverbed_adapter::MemoryAdapter;
pub use riverbed_cache::{CacheTier, SharedTier, StorageCache};
pub use riverbed_engine::{
    PackSummary, PollObserver, PollerHandle, Session, Store, Transaction, TransactionStatus,
};
