//! Core types and contracts for the riverbed storage engine
//!
//! This crate holds everything the other layers share: identifier types and
//! tid allocation, object revisions and transaction records, the error
//! taxonomy, configuration, and the adapter/session traits that abstract
//! the relational backend.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod state;
pub mod traits;
pub mod types;

pub use config::Options;
pub use error::{Error, Result};
pub use state::{BlobRef, ObjectState, RevisionInfo, TransactionMetadata, TransactionRecord};
pub use traits::{Adapter, LoadSession, PackBatch, StoreSession};
pub use types::{Flavor, Oid, Tid, TidAllocator};
