//! Checkout pool handing one adapter instance to each unit of work.
//!
//! Adapters carry per-connection transaction state, so they are never shared
//! between callers; a caller checks one out, uses it through the returned
//! guard and gives it back by dropping the guard. A guard dropped with a
//! transaction still open rolls it back before the adapter is returned.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::adapter::Adapter;
use crate::types::{DbError, Result};

/// Capacity and idle count of a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    /// Adapters owned by the pool.
    pub capacity: usize,
    /// Adapters currently checked in.
    pub available: usize,
}

struct Shared<A> {
    idle: Mutex<Vec<A>>,
    returned: Condvar,
    capacity: usize,
}

/// Fixed set of adapters shared between threads.
pub struct AdapterPool<A> {
    shared: Arc<Shared<A>>,
}

impl<A> Clone for AdapterPool<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A: Adapter> AdapterPool<A> {
    /// Pool owning `adapters`.
    pub fn new(adapters: Vec<A>) -> Self {
        let capacity = adapters.len();
        Self {
            shared: Arc::new(Shared {
                idle: Mutex::new(adapters),
                returned: Condvar::new(),
                capacity,
            }),
        }
    }

    /// Blocks until an adapter is free.
    pub fn checkout(&self) -> Result<PooledAdapter<A>> {
        if self.shared.capacity == 0 {
            return Err(DbError::backend("adapter pool is empty"));
        }
        let mut idle = self.shared.idle.lock();
        loop {
            if let Some(adapter) = idle.pop() {
                return Ok(self.lease(adapter));
            }
            self.shared.returned.wait(&mut idle);
        }
    }

    /// Waits at most `timeout` for a free adapter; `Timeout` otherwise.
    pub fn checkout_timeout(&self, timeout: Duration) -> Result<PooledAdapter<A>> {
        let deadline = Instant::now() + timeout;
        let mut idle = self.shared.idle.lock();
        loop {
            if let Some(adapter) = idle.pop() {
                return Ok(self.lease(adapter));
            }
            if self.shared.returned.wait_until(&mut idle, deadline).timed_out() {
                warn!(capacity = self.shared.capacity, timeout_ms = timeout.as_millis() as u64, "adapter checkout timed out");
                return Err(DbError::timeout("no adapter became available"));
            }
        }
    }

    /// Takes a free adapter without waiting.
    pub fn try_checkout(&self) -> Option<PooledAdapter<A>> {
        let adapter = self.shared.idle.lock().pop()?;
        Some(self.lease(adapter))
    }

    /// Runs `f` on a checked-out adapter and returns it afterwards.
    pub fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut A) -> Result<T>,
    {
        let mut adapter = self.checkout()?;
        f(&mut adapter)
    }

    /// Current capacity and idle count.
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            capacity: self.shared.capacity,
            available: self.shared.idle.lock().len(),
        }
    }

    fn lease(&self, adapter: A) -> PooledAdapter<A> {
        debug!("adapter checked out");
        PooledAdapter {
            adapter: Some(adapter),
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Exclusive use of one pooled adapter.
pub struct PooledAdapter<A: Adapter> {
    adapter: Option<A>,
    shared: Arc<Shared<A>>,
}

impl<A: Adapter> PooledAdapter<A> {
    fn inner(&self) -> &A {
        self.adapter.as_ref().expect("adapter present until drop")
    }

    fn inner_mut(&mut self) -> &mut A {
        self.adapter.as_mut().expect("adapter present until drop")
    }
}

impl<A: Adapter> std::fmt::Debug for PooledAdapter<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledAdapter").finish_non_exhaustive()
    }
}

impl<A: Adapter> Deref for PooledAdapter<A> {
    type Target = A;

    fn deref(&self) -> &Self::Target {
        self.inner()
    }
}

impl<A: Adapter> DerefMut for PooledAdapter<A> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner_mut()
    }
}

impl<A: Adapter> Drop for PooledAdapter<A> {
    fn drop(&mut self) {
        let Some(mut adapter) = self.adapter.take() else {
            return;
        };
        let depth = adapter.transaction_depth();
        if depth > 0 {
            warn!(depth, "adapter returned with an open transaction; rolling back");
            while adapter.transaction_depth() > 0 {
                if let Err(err) = adapter.rollback_transaction() {
                    warn!(error = %err, "rollback on return failed");
                    break;
                }
            }
        }
        self.shared.idle.lock().push(adapter);
        self.shared.returned.notify_one();
        debug!("adapter checked in");
    }
}
