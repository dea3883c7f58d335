//! Core identifier types
//!
//! This module defines the foundational types:
//! - Oid: stable object identifier, unique for an object's entire lifetime
//! - Tid: transaction identifier defining commit order and snapshot boundaries
//! - TidAllocator: clock-correlated tid generation with collision bumping
//! - Flavor: closed set of relational backend variants

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable 64-bit object identifier
///
/// An Oid is allocated once when an object is created and is never reused,
/// even after the object is deleted and packed away. Displayed in hex
/// because object graphs tend to be inspected alongside serialized payloads.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Oid(u64);

impl Oid {
    /// The root object of a store. Allocated implicitly, rarely changes.
    pub const ROOT: Oid = Oid(0);

    /// Wrap a raw oid value
    pub const fn from_u64(raw: u64) -> Self {
        Oid(raw)
    }

    /// Raw value, for adapter-side table keys
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Number of low bits reserved for the collision-bump counter.
///
/// The encoding is part of the allocator contract, not a wire format:
/// the high bits carry quantized microseconds since the Unix epoch, the
/// low bits disambiguate tids allocated within the same quantum. Only the
/// ordering of tids is meaningful to the rest of the system.
const BUMP_BITS: u32 = 12;

/// 64-bit transaction identifier
///
/// Tids are strictly increasing across committed transactions; they define
/// both commit order and snapshot boundaries. A tid is derived from a
/// quantized wall clock so that commit times can be recovered approximately,
/// with a bump counter to keep allocation monotone when the clock stalls
/// or steps backwards.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Tid(u64);

impl Tid {
    /// Sentinel: "before any transaction". Doubles as the optimistic token
    /// an object creator passes for `expected_prev_tid`.
    pub const ZERO: Tid = Tid(0);

    /// Largest representable tid; useful as an unbounded ceiling.
    pub const MAX: Tid = Tid(u64::MAX);

    /// Wrap a raw tid value
    pub const fn from_u64(raw: u64) -> Self {
        Tid(raw)
    }

    /// Raw value, for adapter-side table keys
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// True for the `ZERO` sentinel
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// The smallest tid strictly greater than this one
    pub const fn next(self) -> Tid {
        Tid(self.0 + 1)
    }

    /// Microseconds since the Unix epoch encoded in this tid
    ///
    /// Approximate by construction: quantization and bumping both round.
    pub const fn epoch_micros(self) -> u64 {
        self.0 >> BUMP_BITS
    }

    /// Approximate wall-clock time this tid was allocated
    pub fn timestamp(self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp_micros(self.epoch_micros() as i64)
    }

    /// The tid boundary for a wall-clock instant
    ///
    /// Every tid allocated before `when` orders below the result, so it
    /// serves as a pack target for "collect history older than this time".
    pub fn at_time(when: chrono::DateTime<chrono::Utc>) -> Tid {
        let micros = when.timestamp_micros().max(0) as u64;
        Tid(micros << BUMP_BITS)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Clock-correlated tid allocation with collision bumping
///
/// Allocation is lock-free: a compare-exchange loop takes the maximum of
/// the quantized clock reading and `last + 1`, so the sequence is strictly
/// increasing even when many tids land in one quantum or the clock steps
/// backwards.
#[derive(Debug)]
pub struct TidAllocator {
    /// Last tid handed out
    last: AtomicU64,
    /// Clock quantum in microseconds, from the backend flavor
    quantum_micros: u64,
}

impl TidAllocator {
    /// Create an allocator that will never issue a tid at or below `floor`
    ///
    /// `floor` is typically the last committed tid read from the backend at
    /// startup.
    pub fn new(floor: Tid, quantum_micros: u64) -> Self {
        TidAllocator {
            last: AtomicU64::new(floor.as_u64()),
            quantum_micros: quantum_micros.max(1),
        }
    }

    /// Last tid issued (or the startup floor if none)
    pub fn last(&self) -> Tid {
        Tid(self.last.load(Ordering::SeqCst))
    }

    /// Raise the floor after observing a tid committed elsewhere
    ///
    /// Keeps allocation monotone across processes sharing one backend.
    pub fn observe(&self, tid: Tid) {
        self.last.fetch_max(tid.as_u64(), Ordering::SeqCst);
    }

    /// Allocate the next tid
    pub fn allocate(&self) -> Tid {
        let now = chrono::Utc::now().timestamp_micros().max(0) as u64;
        let quantized = now - now % self.quantum_micros;
        let base = quantized << BUMP_BITS;
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = base.max(last + 1);
            match self.last.compare_exchange_weak(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Tid(candidate),
                Err(observed) => last = observed,
            }
        }
    }
}

/// Closed set of relational backend variants
///
/// The variant is chosen once when an adapter is constructed and fixes the
/// backend-specific policies below; there is no runtime backend probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flavor {
    /// MySQL-family backends (InnoDB semantics assumed)
    MysqlLike,
    /// PostgreSQL-family backends
    PostgresLike,
    /// SQLite-family backends (single-writer)
    SqliteLike,
    /// Oracle-family backends
    OracleLike,
}

impl Flavor {
    /// Clock quantum used when deriving tids, in microseconds
    ///
    /// Backends whose timestamp columns are coarser get a coarser quantum so
    /// a tid's embedded time round-trips through the backend unchanged.
    pub const fn tid_quantum_micros(self) -> u64 {
        match self {
            Flavor::MysqlLike | Flavor::PostgresLike => 1,
            Flavor::SqliteLike => 1_000,
            Flavor::OracleLike => 1_000_000,
        }
    }

    /// Whether row locks are taken with immediate failure instead of a
    /// bounded wait
    ///
    /// Either way the caller sees a retryable conflict; this only controls
    /// how long the backend is allowed to block first.
    pub const fn lock_nowait(self) -> bool {
        matches!(self, Flavor::MysqlLike | Flavor::SqliteLike)
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Flavor::MysqlLike => "mysql",
            Flavor::PostgresLike => "postgresql",
            Flavor::SqliteLike => "sqlite",
            Flavor::OracleLike => "oracle",
        };
        f.write_str(name)
    }
}
