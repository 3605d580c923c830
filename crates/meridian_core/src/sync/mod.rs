//! # Synchronization Primitives
//!
//! ## The Problem
//!
//! ```text
//! Scene host:   WRITE reconciled scene state into the world
//! Consumer:     READ the world for rendering/physics
//!
//! Without synchronization: torn reads of half-applied ticks
//! ```
//!
//! ## The Solution: One Gate, One Writer Per Slice
//!
//! All byte-level work (decode, reconcile, component deserialization)
//! happens before the gate is taken. The writer then holds the gate for a
//! single pass over a prepared command buffer, so hold time is O(batch).

mod gate;

pub use gate::{GateGuard, GateStats, SyncGate};
