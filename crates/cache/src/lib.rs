//! Object-state caching for the riverbed engine
//!
//! Three pieces:
//! - [`LocalClient`]: the bounded in-process byte store
//! - [`CacheTier`]/[`SharedTier`]: the optional shared second tier
//! - [`StorageCache`]: checkpoint-based freshness tracking over both,
//!   fed by the transaction coordinator (`after_commit`) and the poller
//!   (`after_poll`)
//!
//! The cache is an explicit service object: one per store, constructed once
//! and handed to every component that needs it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod local;
pub mod storage_cache;
pub mod tier;

pub use local::{CacheKey, LocalClient};
pub use storage_cache::StorageCache;
pub use tier::{CacheTier, SharedTier};
