//! # CRDT Reconciliation
//!
//! Wire codec, last-writer-wins engine and the outgoing accumulator.
//!
//! ```text
//! bytes ──▶ CrdtDeserializer ──▶ CrdtMessage ──▶ CrdtProtocol::process_message
//!                                                       │
//!                                        ReconciliationResult (change, effect)
//! ```

pub mod codec;
pub mod engine;
pub mod message;
pub mod outgoing;

pub use codec::{serialize_processed, CrdtDeserializer, CrdtSerializer, CrdtWriter, DecodeStats, DecodedBatch};
pub use engine::{CrdtProtocol, ProtocolConfig, ProtocolStats, StateEntry};
pub use message::{
    ComponentMessage, CrdtMessage, CrdtMessageKind, ProcessedCrdtMessage, ReconciliationEffect,
    ReconciliationResult, StateChange,
};
pub use outgoing::{OutgoingMessages, PendingMessage, SerializationSyncBlock};
