//! # MERIDIAN Core
//!
//! Shared foundations for the scene synchronization core:
//! - Pooled payload buffers with RAII rent/return
//! - The pre-allocated ECS world scene state is synchronized into
//! - The Synchronization Gate that keeps one writer per update slice
//!
//! ## Architecture Rules
//!
//! 1. **No per-message heap allocation in the hot path** - payloads are pooled
//! 2. **Explicit ownership** - pools and gates are passed in, never global
//! 3. **One writer** - the world is only mutated under the gate
//!
//! ## Example
//!
//! ```rust,ignore
//! use meridian_core::{BufferPool, PoolConfig, SyncGate, World};
//!
//! let pool = BufferPool::new(PoolConfig::default());
//! let world = SyncGate::new(World::new(4096));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod ecs;
pub mod error;
pub mod memory;
pub mod sync;

pub use ecs::{
    Component, ComponentId, ComponentStorage, ComponentValue, Entity, EntityId, SceneEntity,
    Transform, Visibility, World,
};
pub use error::{PoolError, PoolResult, StoreError, StoreResult};
pub use memory::{BufferPool, PoolConfig, PoolStats, PooledBuffer};
pub use sync::{GateGuard, GateStats, SyncGate};
