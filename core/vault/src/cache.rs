//! Single-slot read-through cache.
//!
//! Mirrors one backend value. A miss runs one load no matter how many
//! callers are waiting on it. Invalidation is an epoch bump: it never blocks
//! and always wins over a load or a write it races with.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use sessionvault_common::Result;

struct Slot<T> {
    /// `None` when nothing is cached, `Some(None)` when the backend was empty.
    entry: Option<Option<T>>,
    /// Epoch the entry was written in. Stale entries are ignored.
    epoch: u64,
    stamp: u64,
}

/// Receipt of a [`SessionCache::set`], used to roll it back.
#[must_use]
pub struct CacheWrite<T> {
    previous: Option<Option<T>>,
    stamp: u64,
}

/// Cache for a single optional value.
pub struct SessionCache<T> {
    slot: Mutex<Slot<T>>,
    epoch: AtomicU64,
    stamps: AtomicU64,
    loading: tokio::sync::Mutex<()>,
}

impl<T: Clone> SessionCache<T> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                entry: None,
                epoch: 0,
                stamp: 0,
            }),
            epoch: AtomicU64::new(0),
            stamps: AtomicU64::new(0),
            loading: tokio::sync::Mutex::new(()),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current entry, if one is cached and still valid.
    pub fn peek(&self) -> Option<Option<T>> {
        let slot = self.slot();
        if slot.epoch == self.epoch.load(Ordering::SeqCst) {
            slot.entry.clone()
        } else {
            None
        }
    }

    /// Return the cached value, or run `load` and cache its result.
    ///
    /// An empty result is cached too. Concurrent misses wait for the first
    /// load instead of starting their own. A load that races an
    /// invalidation returns its result without caching it.
    pub async fn get<F, Fut>(&self, load: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        if let Some(hit) = self.peek() {
            debug!("Session cache hit");
            return Ok(hit);
        }

        let _loading = self.loading.lock().await;
        if let Some(hit) = self.peek() {
            debug!("Session cache filled by concurrent load");
            return Ok(hit);
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        debug!("Session cache miss");
        let loaded = load().await?;

        let mut slot = self.slot();
        let written_meanwhile = slot.entry.is_some() && slot.epoch == epoch;
        if self.epoch.load(Ordering::SeqCst) == epoch && !written_meanwhile {
            *slot = Slot {
                entry: Some(loaded.clone()),
                epoch,
                stamp: self.stamps.fetch_add(1, Ordering::SeqCst) + 1,
            };
        }
        Ok(loaded)
    }

    /// Store `value`, replacing whatever is cached.
    pub fn set(&self, value: T) -> CacheWrite<T> {
        let mut slot = self.slot();
        let epoch = self.epoch.load(Ordering::SeqCst);
        let previous = if slot.epoch == epoch {
            slot.entry.take()
        } else {
            None
        };
        let stamp = self.stamps.fetch_add(1, Ordering::SeqCst) + 1;

        *slot = Slot {
            entry: Some(Some(value)),
            epoch,
            stamp,
        };
        CacheWrite { previous, stamp }
    }

    /// Undo `write`, unless another write or an invalidation came after it.
    pub fn restore(&self, write: CacheWrite<T>) {
        let mut slot = self.slot();
        if slot.stamp == write.stamp && slot.epoch == self.epoch.load(Ordering::SeqCst) {
            slot.entry = write.previous;
        }
    }

    /// Drop the cached entry. Never blocks.
    pub fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

impl<T: Clone> Default for SessionCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
