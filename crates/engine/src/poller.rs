//! Change poller
//!
//! Discovers newly committed transactions and keeps the cache and any
//! registered observers informed. A cycle captures the backend's latest
//! committed tid as its ceiling, enumerates the changes since the previous
//! ceiling, and feeds the cache; commits landing mid-cycle are simply
//! picked up by the next cycle.
//!
//! Runs on demand (before a session pins its snapshot, and right after a
//! commit) and optionally on a timer in a background thread with an atomic
//! shutdown flag.

use crate::health::Health;
use parking_lot::{Mutex, RwLock};
use riverbed_cache::StorageCache;
use riverbed_core::{Adapter, Error, Result, Tid};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Callback invoked with each new poll ceiling
pub trait PollObserver: Send + Sync {
    /// The poller observed commits up to and including `ceiling`
    fn on_poll(&self, ceiling: Tid);
}

/// Discovers new commits and drives cache invalidation
pub struct Poller {
    adapter: Arc<dyn Adapter>,
    cache: Arc<StorageCache>,
    health: Arc<Health>,
    /// Ceiling of the last successful cycle; the mutex also serializes
    /// cycles so changes are applied to the cache in order
    last: Mutex<Tid>,
    observers: RwLock<Vec<Weak<dyn PollObserver>>>,
}

impl Poller {
    /// Create a poller over `adapter` feeding `cache`
    pub fn new(adapter: Arc<dyn Adapter>, cache: Arc<StorageCache>, health: Arc<Health>) -> Self {
        Poller {
            adapter,
            cache,
            health,
            last: Mutex::new(Tid::ZERO),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Ceiling of the last successful cycle
    pub fn last_polled(&self) -> Tid {
        *self.last.lock()
    }

    /// Register an observer; held weakly, dropped observers are pruned
    pub fn subscribe(&self, observer: &Arc<dyn PollObserver>) {
        self.observers.write().push(Arc::downgrade(observer));
    }

    /// Run one poll cycle, returning the new ceiling
    ///
    /// Backend trouble surfaces as `Poll` (transient: prior cache state is
    /// retained as possibly stale and the next cycle retries). A tid
    /// regression poisons the store and surfaces as `TidWentBackwards`.
    pub fn poll(&self) -> Result<Tid> {
        let mut last = self.last.lock();
        let prev = *last;
        let ceiling = self
            .adapter
            .last_committed()
            .map_err(|e| Error::Poll(e.to_string()))?;

        if ceiling < prev {
            self.health.poison(prev, ceiling);
            return Err(Error::TidWentBackwards {
                last: prev,
                observed: ceiling,
            });
        }
        if ceiling == prev {
            return Ok(ceiling);
        }

        let changes = self
            .adapter
            .list_changes(prev, ceiling)
            .map_err(|e| Error::Poll(e.to_string()))?;
        if changes.is_none() {
            tracing::warn!(
                prev = prev.as_u64(),
                ceiling = ceiling.as_u64(),
                "change span not enumerable; cache will be cleared"
            );
        }
        self.cache.after_poll(ceiling, changes.as_deref());
        *last = ceiling;
        drop(last);

        self.notify(ceiling);
        tracing::debug!(ceiling = ceiling.as_u64(), "poll cycle complete");
        Ok(ceiling)
    }

    fn notify(&self, ceiling: Tid) {
        let mut observers = self.observers.write();
        observers.retain(|weak| match weak.upgrade() {
            Some(observer) => {
                observer.on_poll(ceiling);
                true
            }
            None => false,
        });
    }

    /// Start background polling on `interval`
    ///
    /// The thread logs and retries on transient failures, and exits on a
    /// poisoned store. Returns a handle whose `stop` joins the thread.
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> PollerHandle {
        let poller = Arc::clone(self);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                // Sleep in small slices so shutdown stays responsive.
                let slice = Duration::from_millis(50).min(interval);
                let mut slept = Duration::ZERO;
                while slept < interval {
                    if flag.load(Ordering::Relaxed) {
                        return;
                    }
                    thread::sleep(slice);
                    slept += slice;
                }

                match poller.poll() {
                    Ok(_) => {}
                    Err(error) if error.is_transient() => {
                        tracing::warn!(%error, "poll cycle failed; cache state may be stale");
                    }
                    Err(error) => {
                        tracing::error!(%error, "poller stopping");
                        return;
                    }
                }
            }
        });

        PollerHandle { shutdown, handle }
    }
}

/// Handle for a background polling thread
pub struct PollerHandle {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl PollerHandle {
    /// Signal shutdown and wait for the thread to exit
    pub fn stop(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.handle.join();
    }
}
