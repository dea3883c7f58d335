//! Connection manager
//!
//! Pools the two connection roles separately. A lease is exclusive: the
//! guard hands the session back when dropped, and the pool liveness-checks
//! every returned session before reuse; broken connections are dropped
//! with a warning and replaced lazily, never silently reused.
//!
//! Leasing re-pins load sessions (so a lease never starts on a stale
//! ceiling) and restarts store sessions (a fresh backend transaction per
//! lease). Each pooled session carries a uuid used in log fields.

use parking_lot::Mutex;
use riverbed_core::{Adapter, LoadSession, Result, StoreSession};
use std::sync::Arc;
use uuid::Uuid;

/// Idle sessions kept per role; excess returns are simply closed
const MAX_IDLE: usize = 8;

struct PooledLoad {
    id: Uuid,
    session: Box<dyn LoadSession>,
}

struct PooledStore {
    id: Uuid,
    session: Box<dyn StoreSession>,
}

/// Load and store session pools over one adapter
pub struct SessionPools {
    adapter: Arc<dyn Adapter>,
    load: Mutex<Vec<PooledLoad>>,
    store: Mutex<Vec<PooledStore>>,
}

impl SessionPools {
    /// Create empty pools over `adapter`
    pub fn new(adapter: Arc<dyn Adapter>) -> Arc<Self> {
        Arc::new(SessionPools {
            adapter,
            load: Mutex::new(Vec::new()),
            store: Mutex::new(Vec::new()),
        })
    }

    /// The adapter these pools lease sessions from
    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    /// Lease a load session, re-pinned at the latest committed tid
    pub fn lease_load(self: &Arc<Self>) -> Result<LoadLease> {
        loop {
            let pooled = self.load.lock().pop();
            let Some(mut pooled) = pooled else {
                return Ok(LoadLease {
                    inner: Some(PooledLoad {
                        id: Uuid::new_v4(),
                        session: self.adapter.open_load()?,
                    }),
                    pools: Arc::clone(self),
                });
            };
            if !pooled.session.is_alive() {
                tracing::warn!(conn = %pooled.id, "discarding dead load connection");
                continue;
            }
            if let Err(error) = pooled.session.restart() {
                tracing::warn!(conn = %pooled.id, %error, "discarding load connection that failed to re-pin");
                continue;
            }
            return Ok(LoadLease {
                inner: Some(pooled),
                pools: Arc::clone(self),
            });
        }
    }

    /// Lease a store session with a fresh backend transaction
    pub fn lease_store(self: &Arc<Self>) -> Result<StoreLease> {
        loop {
            let pooled = self.store.lock().pop();
            let Some(mut pooled) = pooled else {
                return Ok(StoreLease {
                    inner: Some(PooledStore {
                        id: Uuid::new_v4(),
                        session: self.adapter.open_store()?,
                    }),
                    pools: Arc::clone(self),
                });
            };
            if !pooled.session.is_alive() {
                tracing::warn!(conn = %pooled.id, "discarding dead store connection");
                continue;
            }
            if let Err(error) = pooled.session.restart() {
                tracing::warn!(conn = %pooled.id, %error, "discarding store connection that failed to restart");
                continue;
            }
            return Ok(StoreLease {
                inner: Some(pooled),
                pools: Arc::clone(self),
            });
        }
    }

    fn restore_load(&self, pooled: PooledLoad) {
        if !pooled.session.is_alive() {
            tracing::warn!(conn = %pooled.id, "dropping broken load connection on return");
            return;
        }
        let mut idle = self.load.lock();
        if idle.len() < MAX_IDLE {
            idle.push(pooled);
        }
    }

    fn restore_store(&self, mut pooled: PooledStore) {
        // Idempotent; guarantees no backend transaction is parked idle.
        if let Err(error) = pooled.session.rollback() {
            tracing::warn!(conn = %pooled.id, %error, "dropping store connection that failed rollback");
            return;
        }
        if !pooled.session.is_alive() {
            tracing::warn!(conn = %pooled.id, "dropping broken store connection on return");
            return;
        }
        let mut idle = self.store.lock();
        if idle.len() < MAX_IDLE {
            idle.push(pooled);
        }
    }

    /// Idle sessions currently pooled, per role (diagnostics)
    pub fn idle_counts(&self) -> (usize, usize) {
        (self.load.lock().len(), self.store.lock().len())
    }
}

/// Exclusive lease on a load session; returns it to the pool on drop
pub struct LoadLease {
    inner: Option<PooledLoad>,
    pools: Arc<SessionPools>,
}

impl LoadLease {
    /// The leased session
    pub fn session(&self) -> &dyn LoadSession {
        match &self.inner {
            Some(pooled) => pooled.session.as_ref(),
            None => unreachable!("lease emptied only on drop"),
        }
    }

    /// The leased session, mutably
    pub fn session_mut(&mut self) -> &mut dyn LoadSession {
        match &mut self.inner {
            Some(pooled) => pooled.session.as_mut(),
            None => unreachable!("lease emptied only on drop"),
        }
    }

    /// Pool-assigned connection identity, for log correlation
    pub fn id(&self) -> Uuid {
        match &self.inner {
            Some(pooled) => pooled.id,
            None => unreachable!("lease emptied only on drop"),
        }
    }
}

impl Drop for LoadLease {
    fn drop(&mut self) {
        if let Some(pooled) = self.inner.take() {
            self.pools.restore_load(pooled);
        }
    }
}

/// Exclusive lease on a store session; rolls back and returns it on drop
pub struct StoreLease {
    inner: Option<PooledStore>,
    pools: Arc<SessionPools>,
}

impl StoreLease {
    /// The leased session, mutably (store sessions are write-oriented)
    pub fn session_mut(&mut self) -> &mut dyn StoreSession {
        match &mut self.inner {
            Some(pooled) => pooled.session.as_mut(),
            None => unreachable!("lease emptied only on drop"),
        }
    }

    /// Pool-assigned connection identity, for log correlation
    pub fn id(&self) -> Uuid {
        match &self.inner {
            Some(pooled) => pooled.id,
            None => unreachable!("lease emptied only on drop"),
        }
    }
}

impl Drop for StoreLease {
    fn drop(&mut self) {
        if let Some(pooled) = self.inner.take() {
            self.pools.restore_store(pooled);
        }
    }
}
