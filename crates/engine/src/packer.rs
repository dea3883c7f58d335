//! History packer
//!
//! Garbage-collects superseded revisions: for every object, everything
//! strictly older than the newest revision at or below the pack target is
//! deleted. Work proceeds in batches, each committed independently by the
//! adapter, so an interruption leaves a valid, merely partially-packed
//! store; the adapter's resumable cursor lets the next run continue where
//! the last one stopped.
//!
//! The caller supplies a keep floor (the oldest snapshot still open);
//! packing never proceeds past it, which is how still-pinned revisions
//! survive.

use riverbed_core::{Adapter, Result, Tid};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outcome of one `pack` run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackSummary {
    /// Tid actually packed to, after clamping by the keep floor
    pub packed_to: Tid,
    /// Oids examined
    pub examined: usize,
    /// Revisions deleted
    pub deleted: usize,
    /// Batches committed
    pub batches: usize,
    /// False when the run was interrupted before the cursor finished
    pub completed: bool,
}

/// Batch-driven revision garbage collector
pub struct Packer {
    adapter: Arc<dyn Adapter>,
    batch_size: usize,
}

impl Packer {
    /// Create a packer deleting at most `batch_size` oids' worth of history
    /// per committed batch
    pub fn new(adapter: Arc<dyn Adapter>, batch_size: usize) -> Self {
        Packer {
            adapter,
            batch_size: batch_size.max(1),
        }
    }

    /// Pack up to `min(pack_tid, keep_floor)`
    ///
    /// Checks `stop` between batches; when it flips, the run returns early
    /// with `completed = false` and everything already deleted stays
    /// deleted. A later run with the same target resumes from the
    /// adapter's cursor.
    pub fn pack(&self, pack_tid: Tid, keep_floor: Tid, stop: &AtomicBool) -> Result<PackSummary> {
        let effective = pack_tid.min(keep_floor);
        let mut summary = PackSummary {
            packed_to: effective,
            ..PackSummary::default()
        };
        if effective.is_zero() {
            summary.completed = true;
            return Ok(summary);
        }
        if effective < pack_tid {
            tracing::debug!(
                requested = pack_tid.as_u64(),
                effective = effective.as_u64(),
                "pack target clamped by an open snapshot"
            );
        }

        loop {
            if stop.load(Ordering::Relaxed) {
                tracing::warn!(
                    batches = summary.batches,
                    deleted = summary.deleted,
                    "pack interrupted; cursor persists for resume"
                );
                return Ok(summary);
            }
            let batch = self.adapter.pack_batch(effective, self.batch_size)?;
            summary.examined += batch.examined;
            summary.deleted += batch.deleted;
            summary.batches += 1;
            if batch.done {
                summary.completed = true;
                tracing::debug!(
                    packed_to = effective.as_u64(),
                    deleted = summary.deleted,
                    batches = summary.batches,
                    "pack complete"
                );
                return Ok(summary);
            }
        }
    }
}
