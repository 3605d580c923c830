//! # Synchronization Gate
//!
//! Exclusive access to the shared entity store.
//!
//! ## Architecture
//!
//! ```text
//!      ┌──────────────────────┐          ┌──────────────────────┐
//!      │  CRDT host context   │          │  Consumer context    │
//!      │  (applies commands)  │          │  (render/simulation) │
//!      └──────────┬───────────┘          └──────────┬───────────┘
//!                 │ acquire()                       │ read()
//!                 ▼                                 ▼
//!            ┌──────────────────────────────────────────┐
//!            │              SyncGate<World>             │
//!            │   one holder per update slice, FIFO-ish  │
//!            └──────────────────────────────────────────┘
//! ```
//!
//! A tick's mutations become visible to readers when the writer's guard
//! drops.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

/// Gate statistics.
#[derive(Debug, Default)]
pub struct GateStats {
    /// Total successful writer acquisitions.
    pub acquisitions: AtomicU64,
    /// Completed `read` calls. Not counted as acquisitions or slices.
    pub reads: AtomicU64,
    /// Acquisitions that had to wait for another holder.
    pub contended: AtomicU64,
    /// Timed acquisitions that gave up.
    pub timeouts: AtomicU64,
}

/// Exclusive-access primitive shared by the scene side and the consumer.
///
/// ## Usage
///
/// ```rust,ignore
/// let gate = SyncGate::new(World::new(4096));
///
/// // Writer: one acquisition per applied command buffer
/// {
///     let mut world = gate.acquire();
///     world.spawn(entity)?;
/// } // released here
///
/// // Reader
/// let alive = gate.read(|world| world.alive_count());
/// ```
pub struct SyncGate<T> {
    inner: Mutex<T>,
    stats: GateStats,
    slice: AtomicU64,
}

impl<T> SyncGate<T> {
    /// Wraps `value` in a new gate.
    #[must_use]
    pub fn new(value: T) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(value),
            stats: GateStats::default(),
            slice: AtomicU64::new(0),
        })
    }

    /// Returns the gate statistics.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &GateStats {
        &self.stats
    }

    /// Number of update slices completed (writer guards released).
    #[inline]
    #[must_use]
    pub fn slice_count(&self) -> u64 {
        self.slice.load(Ordering::Acquire)
    }

    /// Returns whether someone currently holds the gate.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Blocks until the gate is free and takes it.
    pub fn acquire(&self) -> GateGuard<'_, T> {
        let guard = match self.inner.try_lock() {
            Some(guard) => guard,
            None => {
                self.stats.contended.fetch_add(1, Ordering::Relaxed);
                self.inner.lock()
            }
        };
        self.stats.acquisitions.fetch_add(1, Ordering::Relaxed);
        GateGuard { guard, gate: self }
    }

    /// Takes the gate, giving up after `timeout`.
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<GateGuard<'_, T>> {
        if let Some(guard) = self.inner.try_lock() {
            self.stats.acquisitions.fetch_add(1, Ordering::Relaxed);
            return Some(GateGuard { guard, gate: self });
        }

        self.stats.contended.fetch_add(1, Ordering::Relaxed);
        if let Some(guard) = self.inner.try_lock_for(timeout) {
            self.stats.acquisitions.fetch_add(1, Ordering::Relaxed);
            Some(GateGuard { guard, gate: self })
        } else {
            self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
            trace!(?timeout, "gate acquisition timed out");
            None
        }
    }

    /// Runs `f` with shared access and releases the gate afterwards.
    ///
    /// Readers wait for the writer like anyone else but do not open an
    /// update slice.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = match self.inner.try_lock() {
            Some(guard) => guard,
            None => {
                self.stats.contended.fetch_add(1, Ordering::Relaxed);
                self.inner.lock()
            }
        };
        let result = f(&guard);
        drop(guard);
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        result
    }
}

/// Holder of the gate. Releases on drop.
pub struct GateGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    gate: &'a SyncGate<T>,
}

impl<T> Deref for GateGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for GateGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<T> Drop for GateGuard<'_, T> {
    fn drop(&mut self) {
        self.gate.slice.fetch_add(1, Ordering::AcqRel);
    }
}
