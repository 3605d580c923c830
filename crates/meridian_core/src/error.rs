//! # Core Error Types
//!
//! Failures raised by the buffer pool and the entity store.

use thiserror::Error;

use crate::ecs::SceneEntity;

/// Errors raised when renting from a [`BufferPool`](crate::memory::BufferPool).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// A single buffer larger than the pool allows was requested.
    #[error("buffer of {requested} bytes exceeds the pool limit of {max} bytes")]
    BufferTooLarge {
        /// Requested length.
        requested: usize,
        /// Configured per-buffer limit.
        max: usize,
    },

    /// The outstanding byte budget is spent.
    #[error("buffer pool exhausted: requested {requested} bytes with {outstanding} of {limit} outstanding")]
    Exhausted {
        /// Requested length.
        requested: usize,
        /// Bytes rented at the time of the request.
        outstanding: usize,
        /// Configured budget.
        limit: usize,
    },
}

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors raised by an entity store when a mutation cannot be applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The entity was destroyed and cannot be written to again.
    #[error("entity {0} was destroyed")]
    EntityDestroyed(SceneEntity),

    /// The entity is not alive in the store.
    #[error("entity {0} is not alive")]
    EntityNotAlive(SceneEntity),

    /// The store has no free slot left.
    #[error("entity store full: capacity {capacity}")]
    CapacityReached {
        /// Store capacity.
        capacity: usize,
    },
}

/// Result type for entity store operations.
pub type StoreResult<T> = Result<T, StoreError>;
