//! Backend adapters and connection management
//!
//! This crate supplies the concrete side of the adapter contract:
//! - commit-time locking ([`locker`]): per-oid row locks plus the single
//!   commit lock, all with bounded waits
//! - the embedded reference backend ([`memory`]), which models the tables
//!   and locking a SQL backend must provide
//! - the connection manager ([`pool`]): exclusive, liveness-checked leases
//!   over the two connection roles
//!
//! SQL dialect glue for real servers lives outside this workspace; anything
//! speaking the [`riverbed_core::Adapter`] contract plugs into the engine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod locker;
pub mod memory;
pub mod pool;

pub use locker::{CommitLock, LockTable};
pub use memory::MemoryAdapter;
pub use pool::{LoadLease, SessionPools, StoreLease};
