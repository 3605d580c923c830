//! # Buffer Pool
//!
//! Reusable byte buffers for CRDT payloads.
//!
//! The pool is an explicit object shared through `Arc`. Nothing here is
//! global: the codec, the protocol engine, the bridge and the outgoing
//! accumulator each receive the pool they rent from at construction.
//!
//! ```text
//!   rent(len) ──► PooledBuffer ──(drop)──► free list ──► rent(len) ...
//! ```
//!
//! A [`PooledBuffer`] gives its storage back when it is dropped, so a buffer
//! is returned exactly once on every exit path, error paths included.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::warn;

use crate::error::{PoolError, PoolResult};

/// Limits for a [`BufferPool`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Largest single buffer the pool will hand out, in bytes.
    pub max_buffer_len: usize,
    /// Upper bound on bytes rented and not yet returned.
    pub max_outstanding_bytes: usize,
    /// Number of returned buffers kept around for reuse.
    pub max_retained_buffers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_buffer_len: 16 * 1024 * 1024,
            max_outstanding_bytes: 256 * 1024 * 1024,
            max_retained_buffers: 1024,
        }
    }
}

impl PoolConfig {
    /// Sets the per-buffer size limit.
    #[must_use]
    pub fn with_max_buffer_len(mut self, len: usize) -> Self {
        self.max_buffer_len = len;
        self
    }

    /// Sets the outstanding byte budget.
    #[must_use]
    pub fn with_max_outstanding_bytes(mut self, bytes: usize) -> Self {
        self.max_outstanding_bytes = bytes;
        self
    }

    /// Sets how many returned buffers are retained.
    #[must_use]
    pub fn with_max_retained_buffers(mut self, count: usize) -> Self {
        self.max_retained_buffers = count;
        self
    }
}

/// Counters describing pool traffic.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Buffers handed out.
    pub rented: AtomicU64,
    /// Buffers given back.
    pub returned: AtomicU64,
    /// Rentals served from the free list instead of a fresh allocation.
    pub reused: AtomicU64,
    /// Rentals refused because of a limit.
    pub failures: AtomicU64,
}

/// Shared pool of byte buffers.
///
/// # Thread Safety
///
/// The free list sits behind a `parking_lot::Mutex` held only for the push
/// or pop; byte accounting is atomic. Rent from any thread.
///
/// # Example
///
/// ```rust,ignore
/// let pool = BufferPool::new(PoolConfig::default());
///
/// let mut payload = pool.rent(16)?;
/// payload.copy_from_slice(&[0u8; 16]);
///
/// drop(payload); // storage goes back to the free list
/// ```
pub struct BufferPool {
    config: PoolConfig,
    free: Mutex<Vec<Vec<u8>>>,
    outstanding_bytes: AtomicUsize,
    stats: PoolStats,
}

impl BufferPool {
    /// Creates a new pool.
    ///
    /// # Panics
    ///
    /// Panics if `max_buffer_len` is zero or larger than
    /// `max_outstanding_bytes`. These are wiring mistakes, not runtime
    /// conditions.
    #[must_use]
    pub fn new(config: PoolConfig) -> Arc<Self> {
        assert!(config.max_buffer_len > 0, "max_buffer_len must be greater than zero");
        assert!(
            config.max_buffer_len <= config.max_outstanding_bytes,
            "max_buffer_len cannot exceed max_outstanding_bytes"
        );

        let retained = config.max_retained_buffers;
        Arc::new(Self {
            config,
            free: Mutex::new(Vec::with_capacity(retained)),
            outstanding_bytes: AtomicUsize::new(0),
            stats: PoolStats::default(),
        })
    }

    /// Returns the configured limits.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns the traffic counters.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Bytes currently rented out.
    #[inline]
    #[must_use]
    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding_bytes.load(Ordering::Acquire)
    }

    /// Number of buffers waiting on the free list.
    #[must_use]
    pub fn retained_count(&self) -> usize {
        self.free.lock().len()
    }

    /// Rents a zeroed buffer of exactly `len` bytes.
    ///
    /// Zero-length rentals never touch the pool.
    ///
    /// # Errors
    ///
    /// [`PoolError::BufferTooLarge`] if `len` exceeds the per-buffer limit,
    /// [`PoolError::Exhausted`] if the outstanding byte budget would be
    /// exceeded.
    pub fn rent(self: &Arc<Self>, len: usize) -> PoolResult<PooledBuffer> {
        if len == 0 {
            return Ok(PooledBuffer::empty());
        }

        if len > self.config.max_buffer_len {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
            return Err(PoolError::BufferTooLarge {
                requested: len,
                max: self.config.max_buffer_len,
            });
        }

        self.reserve(len)?;

        let mut data = self.take_free(len).unwrap_or_else(|| Vec::with_capacity(len));
        data.clear();
        data.resize(len, 0);

        self.stats.rented.fetch_add(1, Ordering::Relaxed);

        Ok(PooledBuffer {
            data,
            pool: Some(Arc::clone(self)),
        })
    }

    /// Rents a buffer and fills it with `bytes`.
    ///
    /// # Errors
    ///
    /// Same as [`BufferPool::rent`].
    pub fn rent_copy(self: &Arc<Self>, bytes: &[u8]) -> PoolResult<PooledBuffer> {
        let mut buffer = self.rent(bytes.len())?;
        buffer.copy_from_slice(bytes);
        Ok(buffer)
    }

    fn reserve(&self, len: usize) -> PoolResult<()> {
        let limit = self.config.max_outstanding_bytes;
        let mut current = self.outstanding_bytes.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(len);
            if next > limit {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(requested = len, outstanding = current, limit, "buffer pool exhausted");
                return Err(PoolError::Exhausted {
                    requested: len,
                    outstanding: current,
                    limit,
                });
            }
            match self.outstanding_bytes.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn take_free(&self, len: usize) -> Option<Vec<u8>> {
        let mut free = self.free.lock();
        let index = free.iter().rposition(|buf| buf.capacity() >= len)?;
        self.stats.reused.fetch_add(1, Ordering::Relaxed);
        Some(free.swap_remove(index))
    }

    fn give_back(&self, data: Vec<u8>) {
        self.outstanding_bytes.fetch_sub(data.len(), Ordering::AcqRel);
        self.stats.returned.fetch_add(1, Ordering::Relaxed);

        if data.capacity() > self.config.max_buffer_len {
            return;
        }

        let mut free = self.free.lock();
        if free.len() < self.config.max_retained_buffers {
            free.push(data);
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("config", &self.config)
            .field("outstanding_bytes", &self.outstanding_bytes())
            .finish_non_exhaustive()
    }
}

/// A byte buffer rented from a [`BufferPool`].
///
/// The length is fixed at rent time. Dropping the buffer returns its
/// storage to the pool it came from.
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Option<Arc<BufferPool>>,
}

impl PooledBuffer {
    /// An empty buffer that owns no pool storage.
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            data: Vec::new(),
            pool: None,
        }
    }

    /// Returns the buffer length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer holds no bytes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Rents a second buffer from the same pool holding the same bytes.
    ///
    /// # Errors
    ///
    /// Propagates the pool's rent failure.
    pub fn try_clone(&self) -> PoolResult<Self> {
        match &self.pool {
            Some(pool) => pool.rent_copy(&self.data),
            None => Ok(Self::empty()),
        }
    }

    /// Copies the bytes into a plain `Vec`, leaving the pool untouched.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.clone()
    }
}

impl Default for PooledBuffer {
    fn default() -> Self {
        Self::empty()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl PartialEq for PooledBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for PooledBuffer {}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.data.len())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.give_back(std::mem::take(&mut self.data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool() -> Arc<BufferPool> {
        BufferPool::new(
            PoolConfig::default()
                .with_max_buffer_len(64)
                .with_max_outstanding_bytes(128)
                .with_max_retained_buffers(4),
        )
    }

    #[test]
    fn test_rent_returns_on_drop() {
        let pool = small_pool();

        let buf = pool.rent(32).unwrap();
        assert_eq!(buf.len(), 32);
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(pool.outstanding_bytes(), 32);

        drop(buf);
        assert_eq!(pool.outstanding_bytes(), 0);
        assert_eq!(pool.retained_count(), 1);
        assert_eq!(pool.stats().returned.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_reuse_zeroes_storage() {
        let pool = small_pool();

        let mut first = pool.rent(16).unwrap();
        first.copy_from_slice(&[0xAB; 16]);
        drop(first);

        let second = pool.rent(8).unwrap();
        assert_eq!(second.len(), 8);
        assert!(second.iter().all(|&b| b == 0));
        assert_eq!(pool.stats().reused.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_too_large() {
        let pool = small_pool();
        let err = pool.rent(65).unwrap_err();
        assert!(matches!(err, PoolError::BufferTooLarge { requested: 65, max: 64 }));
    }

    #[test]
    fn test_exhaustion_clears_after_release() {
        let pool = small_pool();

        let a = pool.rent(64).unwrap();
        let b = pool.rent(64).unwrap();
        assert!(matches!(pool.rent(1), Err(PoolError::Exhausted { .. })));

        drop(a);
        let c = pool.rent(1).unwrap();
        assert_eq!(pool.outstanding_bytes(), 65);
        drop(b);
        drop(c);
        assert_eq!(pool.outstanding_bytes(), 0);
    }

    #[test]
    fn test_empty_rent_skips_pool() {
        let pool = small_pool();
        let buf = pool.rent(0).unwrap();
        assert!(buf.is_empty());
        drop(buf);
        assert_eq!(pool.stats().rented.load(Ordering::Relaxed), 0);
        assert_eq!(pool.retained_count(), 0);
    }

    #[test]
    fn test_try_clone_is_independent() {
        let pool = small_pool();
        let original = pool.rent_copy(b"hello").unwrap();
        let copy = original.try_clone().unwrap();
        assert_eq!(original, copy);
        assert_eq!(pool.outstanding_bytes(), 10);

        drop(original);
        assert_eq!(copy.as_slice(), b"hello");
    }

    #[test]
    fn test_retained_limit() {
        let pool = small_pool();
        let buffers: Vec<_> = (0..6).map(|_| pool.rent(8).unwrap()).collect();
        drop(buffers);
        assert_eq!(pool.retained_count(), 4);
        assert_eq!(pool.outstanding_bytes(), 0);
    }
}
