//! Engine configuration
//!
//! All tunables are threaded into components at construction; nothing reads
//! them from ambient state. Durations are carried as milliseconds so the
//! whole struct deserializes from plain config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunable knobs for one store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Ceiling on bytes held by the local object-state cache
    pub cache_local_bytes: usize,

    /// Checkpoint window width: the delta map is consolidated into the
    /// frozen map once it holds this many oids
    pub cache_delta_limit: usize,

    /// Background poll interval, milliseconds
    pub poll_interval_ms: u64,

    /// Bounded wait for commit-time locks, milliseconds
    pub commit_lock_timeout_ms: u64,

    /// Oids processed per pack batch; each batch commits independently
    pub pack_batch_size: usize,
}

impl Options {
    /// Poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Commit-lock timeout as a `Duration`
    pub fn commit_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_lock_timeout_ms)
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            cache_local_bytes: 64 * 1024 * 1024,
            cache_delta_limit: 10_000,
            poll_interval_ms: 3_000,
            commit_lock_timeout_ms: 10_000,
            pack_batch_size: 1_000,
        }
    }
}
