//! # Memory Management
//!
//! Pooled byte buffers for CRDT payloads.
//!
//! ## Design Philosophy
//!
//! Payload storage is rented from an explicit pool and handed back on drop.
//! During a tick:
//! - No per-message heap allocation once the pool is warm
//! - Every rented buffer is returned exactly once
//! - Exhaustion fails the current batch, never the process

mod pool;

pub use pool::{BufferPool, PoolConfig, PoolStats, PooledBuffer};
