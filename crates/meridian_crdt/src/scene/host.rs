//! # Scene Host
//!
//! Owns everything on the host side of a scene and runs one batch through
//! the whole pipeline.
//!
//! ```text
//!  scene batch ─▶ decode ─▶ process ─▶ stage ─▶ finalize ─▶ apply (gate)
//!                                                              │
//!  response    ◀─ serialize ◀─ stamp + commit ◀─ outgoing block ┘
//! ```

use std::sync::Arc;

use meridian_core::{BufferPool, PoolResult, SyncGate, World};
use tracing::{debug, info, warn};

use super::config::SceneConfig;
use crate::bridge::{ComponentRegistry, EntityStore, WorldSyncBridge};
use crate::crdt::{
    CrdtDeserializer, CrdtMessage, CrdtMessageKind, CrdtProtocol, CrdtSerializer, DecodedBatch, OutgoingMessages,
    PendingMessage, ProcessedCrdtMessage, ProtocolConfig,
};
use crate::error::{SceneError, SceneResult};

/// Host-side state of one scene.
pub struct SceneHost<S: EntityStore = World> {
    pool: Arc<BufferPool>,
    deserializer: CrdtDeserializer,
    engine: CrdtProtocol,
    bridge: WorldSyncBridge<S>,
    registry: ComponentRegistry,
    outgoing: Arc<OutgoingMessages>,
    batches: u64,
}

impl SceneHost<World> {
    /// Builds a host with a fresh pool and world from `config`.
    ///
    /// # Errors
    ///
    /// [`SceneError::Config`] if the config does not validate.
    pub fn from_config(config: &SceneConfig) -> SceneResult<Self> {
        config.validate()?;
        let pool = BufferPool::new(config.pool.clone());
        let gate = SyncGate::new(World::new(config.entity_capacity));
        Ok(Self::new(pool, gate, config.protocol()))
    }
}

impl<S: EntityStore> SceneHost<S> {
    /// Creates a host writing into the store behind `gate`.
    #[must_use]
    pub fn new(pool: Arc<BufferPool>, gate: Arc<SyncGate<S>>, protocol: ProtocolConfig) -> Self {
        info!(
            max_entity_number = protocol.max_entity_number,
            max_payload_len = protocol.max_payload_len,
            "scene host created"
        );

        Self {
            deserializer: CrdtDeserializer::new(Arc::clone(&pool)),
            engine: CrdtProtocol::new(Arc::clone(&pool), protocol),
            bridge: WorldSyncBridge::new(gate, Arc::clone(&pool)),
            registry: ComponentRegistry::default(),
            outgoing: OutgoingMessages::new(Arc::clone(&pool)),
            pool,
            batches: 0,
        }
    }

    /// Replaces the component registry.
    #[must_use]
    pub fn with_registry(mut self, registry: ComponentRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Returns the gate the store lives behind.
    #[inline]
    #[must_use]
    pub fn gate(&self) -> &Arc<SyncGate<S>> {
        self.bridge.gate()
    }

    /// Returns the accumulator for consumer-originated writes.
    #[inline]
    #[must_use]
    pub fn outgoing(&self) -> &Arc<OutgoingMessages> {
        &self.outgoing
    }

    /// Returns the protocol engine.
    #[inline]
    #[must_use]
    pub const fn engine(&self) -> &CrdtProtocol {
        &self.engine
    }

    /// Returns the buffer pool.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Number of batches handled.
    #[inline]
    #[must_use]
    pub const fn batch_count(&self) -> u64 {
        self.batches
    }

    /// Reconciles one scene batch and returns the response batch.
    ///
    /// A message is staged for the store only once the engine has accepted
    /// it, and staging takes over the decoded payload, so the engine and
    /// the store never disagree about a message. Messages processed before
    /// a pool failure are still applied before the error is returned.
    ///
    /// # Errors
    ///
    /// [`SceneError::Pool`] if the pool runs dry, [`SceneError::Sync`] on
    /// command buffer misuse.
    pub fn handle_scene_batch(&mut self, bytes: &[u8]) -> SceneResult<Vec<u8>> {
        self.batches += 1;
        let DecodedBatch { messages, stats } = self.deserializer.deserialize_batch(bytes)?;
        let before = self.engine.stats();

        let mut buffer = self.bridge.get_sync_command_buffer();
        let mut failure: Option<SceneError> = None;
        for message in messages {
            let result = match self.engine.process_message(&message) {
                Ok(result) => result,
                Err(err) => {
                    failure = Some(err.into());
                    break;
                }
            };
            buffer.stage_crdt_message(message, result.effect)?;
        }

        buffer.finalize_and_deserialize(&self.registry)?;
        let report = self.bridge.apply_sync_command_buffer(buffer)?;

        let delta = self.engine.stats().since(&before);
        debug!(
            batch = self.batches,
            decoded = stats.decoded,
            skipped = stats.skipped,
            truncated_bytes = stats.truncated_bytes,
            accepted = delta.accepted,
            stale = delta.stale,
            tombstoned = delta.tombstoned,
            invalid = delta.invalid,
            applied = report.applied,
            "scene batch reconciled"
        );

        if let Some(err) = failure {
            return Err(err);
        }
        Ok(self.drain_outgoing())
    }

    /// Stamps, commits and serializes queued consumer writes.
    ///
    /// If the pool runs dry partway, the writes committed so far are sent
    /// and removed from the queue; the rest wait for the next batch.
    fn drain_outgoing(&mut self) -> Vec<u8> {
        let block = self.outgoing.get_serialization_sync_block();
        let mut messages = Vec::with_capacity(block.messages().len());
        let mut total = 0;
        let mut drained = 0;

        for pending in block.messages() {
            let committed = match (pending.kind, pending.component) {
                (CrdtMessageKind::PutComponent, Some(component)) => {
                    self.engine.create_put_message(pending.entity, component, &pending.payload)
                }
                (CrdtMessageKind::AppendComponent, Some(component)) => {
                    self.engine.create_append_message(pending.entity, component, &pending.payload)
                }
                (CrdtMessageKind::DeleteEntity, _) => Ok(self.engine.create_delete_entity_message(pending.entity)),
                (_, None) => Ok(None),
            };

            match committed {
                Ok(Some(message)) => {
                    let processed = ProcessedCrdtMessage::new(message);
                    total += processed.data_length;
                    messages.push(processed);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(%err, remaining = block.messages().len() - drained, "outgoing drain stopped early");
                    break;
                }
            }
            drained += 1;
        }

        block.commit_prefix(drained);
        if !messages.is_empty() {
            debug!(outgoing = messages.len(), bytes = total, "outgoing messages committed");
        }
        encode(&messages, total)
    }

    /// Serializes the full canonical state plus queued outgoing writes.
    ///
    /// Queued writes are stamped as they would be on the next batch but
    /// are neither committed nor removed from the queue.
    ///
    /// # Errors
    ///
    /// Fails if the pool cannot supply the payload copies.
    pub fn snapshot(&self) -> SceneResult<Vec<u8>> {
        let (mut messages, mut total) = self.engine.create_messages_from_the_current_state_vec()?;

        let block = self.outgoing.get_serialization_sync_block();
        messages.reserve(block.messages().len());
        for pending in block.messages() {
            if let Some(message) = self.preview(pending)? {
                let processed = ProcessedCrdtMessage::new(message);
                total += processed.data_length;
                messages.push(processed);
            }
        }
        drop(block);

        Ok(encode(&messages, total))
    }

    fn preview(&self, pending: &PendingMessage) -> PoolResult<Option<CrdtMessage>> {
        if self.engine.is_entity_deleted(pending.entity) {
            return Ok(None);
        }

        let component = match (pending.kind, pending.component) {
            (CrdtMessageKind::DeleteEntity, _) => return Ok(Some(CrdtMessage::delete_entity(pending.entity))),
            (_, Some(component)) => component,
            (_, None) => return Ok(None),
        };

        let timestamp = self
            .engine
            .get_state(pending.entity, component)
            .map_or(0, |state| state.timestamp.saturating_add(1));
        let payload = self.pool.rent_copy(&pending.payload)?;
        Ok(Some(if pending.kind == CrdtMessageKind::PutComponent {
            CrdtMessage::put(pending.entity, component, timestamp, payload)
        } else {
            CrdtMessage::append(pending.entity, component, timestamp, payload)
        }))
    }
}

/// Writes presized messages into one exactly-sized buffer.
fn encode(messages: &[ProcessedCrdtMessage], total: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(total);
    for processed in messages {
        CrdtSerializer::serialize(&processed.message, &mut bytes);
    }
    debug_assert_eq!(bytes.len(), total);
    bytes
}
