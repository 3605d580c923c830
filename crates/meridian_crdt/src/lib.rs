//! # MERIDIAN CRDT - Scene State Reconciliation
//!
//! Reconciles the state a sandboxed scene script produces with the entity
//! store the client renders from.
//!
//! ## Architecture
//!
//! - **Codec**: self-describing, length-prefixed little-endian records
//! - **Engine**: last-writer-wins per `(entity, component)`, versioned tombstones
//! - **Outgoing**: consumer-side writes queued until the next response
//! - **Bridge**: command buffers decoded off-gate, applied under the gate
//! - **Scene**: script thread and host worker joined by channels
//!
//! ## Data Flow
//!
//! ```text
//! SCENE THREAD                        HOST WORKER
//!   |                                     |
//!   |--- batch (bytes) ------------------>| decode -> reconcile -> stage
//!   |                                     | finalize -> apply under gate
//!   |<-- response (bytes) ----------------| outgoing writes, stamped
//!   |                                     |
//! ```
//!
//! The scene never touches engine or store. Delivery order does not matter:
//! the same messages in any order converge to the same state.
//!
//! ## Example
//!
//! ```rust,ignore
//! use meridian_crdt::{HostWorker, SceneConfig, SceneHost, SceneRunner};
//!
//! let config = SceneConfig::load("scene.toml")?;
//! let host = SceneHost::from_config(&config)?;
//! let gate = std::sync::Arc::clone(host.gate());
//!
//! let (worker, link) = HostWorker::spawn(host, config.channel_capacity)?;
//! let scene = SceneRunner::new(config)?.start(my_script, link)?;
//!
//! let alive = gate.read(|world| world.alive_count());
//! scene.stop()?;
//! worker.shutdown()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod bridge;
pub mod crdt;
pub mod error;
pub mod scene;

// Re-exports for convenience
pub use bridge::{
    ApplyReport, ComponentDecoder, ComponentRegistry, EntityStore, SyncCommand, SyncCommandBuffer,
    WorldSyncBridge,
};
pub use crdt::{
    serialize_processed, ComponentMessage, CrdtDeserializer, CrdtMessage, CrdtMessageKind, CrdtProtocol,
    CrdtSerializer, CrdtWriter, DecodeStats, DecodedBatch, OutgoingMessages, PendingMessage,
    ProcessedCrdtMessage, ProtocolConfig, ProtocolStats, ReconciliationEffect, ReconciliationResult,
    SerializationSyncBlock, StateChange, StateEntry,
};
pub use error::{
    CodecError, CodecResult, ConfigError, ConfigResult, SceneError, SceneResult, SyncError, SyncResult,
};
pub use scene::{
    HostRequest, HostWorker, SceneConfig, SceneHandle, SceneHost, SceneLink, SceneRunner, SceneScript,
    TickLoop, TickStats,
};

/// Default scene tick rate (ticks per second).
pub const DEFAULT_TICK_RATE: u32 = 30;
