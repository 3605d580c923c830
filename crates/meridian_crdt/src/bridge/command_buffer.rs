//! # Sync Command Buffer
//!
//! Staging area between the engine and the entity store.
//!
//! ```text
//!   Open ──sync_crdt_message()*──▶ Open ──finalize_and_deserialize()──▶ Finalized
//!                                                                          │
//!                                         apply_sync_command_buffer() ◀────┘ (consumes)
//! ```
//!
//! Staging copies payload bytes into pooled buffers. Finalizing decodes
//! them into store values and releases the buffers, so the gate is only
//! held for plain store calls.

use std::sync::Arc;

use meridian_core::{BufferPool, ComponentId, ComponentValue, PooledBuffer, SceneEntity};
use tracing::warn;

use super::registry::ComponentRegistry;
use crate::crdt::{CrdtMessage, ReconciliationEffect};
use crate::error::{SyncError, SyncResult};

/// A decoded store mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncCommand {
    /// Replace a component value, creating the entity if needed.
    Set {
        /// Target entity.
        entity: SceneEntity,
        /// Decoded value.
        value: ComponentValue,
    },
    /// Append a component value, creating the entity if needed.
    Append {
        /// Target entity.
        entity: SceneEntity,
        /// Decoded value.
        value: ComponentValue,
    },
    /// Remove a component.
    Remove {
        /// Target entity.
        entity: SceneEntity,
        /// Component to remove.
        component: ComponentId,
    },
    /// Destroy an entity.
    Destroy {
        /// Target entity.
        entity: SceneEntity,
    },
}

impl SyncCommand {
    /// Returns the target entity.
    #[must_use]
    pub const fn entity(&self) -> SceneEntity {
        match self {
            Self::Set { entity, .. }
            | Self::Append { entity, .. }
            | Self::Remove { entity, .. }
            | Self::Destroy { entity } => *entity,
        }
    }
}

/// A staged mutation, payload still in wire bytes.
enum Staged {
    Set(SceneEntity, ComponentId, PooledBuffer),
    Append(SceneEntity, ComponentId, PooledBuffer),
    Remove(SceneEntity, ComponentId),
    Destroy(SceneEntity),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BufferState {
    Open,
    Finalized,
}

/// Ordered mutations for one batch.
pub struct SyncCommandBuffer {
    pool: Arc<BufferPool>,
    staged: Vec<Staged>,
    commands: Vec<SyncCommand>,
    decode_failures: usize,
    state: BufferState,
}

impl SyncCommandBuffer {
    pub(crate) fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            staged: Vec::new(),
            commands: Vec::new(),
            decode_failures: 0,
            state: BufferState::Open,
        }
    }

    /// Stages the store mutation for one processed message.
    ///
    /// Copies the payload from the bridge's pool and stages the copy as
    /// [`SyncCommandBuffer::stage_crdt_message`] does.
    ///
    /// # Errors
    ///
    /// [`SyncError::AlreadyFinalized`] after finalization,
    /// [`SyncError::Pool`] if the payload copy cannot be rented.
    pub fn sync_crdt_message(&mut self, message: &CrdtMessage, effect: ReconciliationEffect) -> SyncResult<()> {
        if self.state == BufferState::Finalized {
            return Err(SyncError::AlreadyFinalized);
        }
        if effect == ReconciliationEffect::NoOp {
            return Ok(());
        }

        let owned = match message {
            CrdtMessage::PutComponent(body) => CrdtMessage::put(
                body.entity,
                body.component,
                body.timestamp,
                self.pool.rent_copy(&body.payload)?,
            ),
            CrdtMessage::AppendComponent(body) => CrdtMessage::append(
                body.entity,
                body.component,
                body.timestamp,
                self.pool.rent_copy(&body.payload)?,
            ),
            CrdtMessage::DeleteEntity { entity } => CrdtMessage::delete_entity(*entity),
        };
        self.stage_crdt_message(owned, effect)
    }

    /// Stages the store mutation for one processed message, taking over
    /// its payload buffer. Never rents from the pool.
    ///
    /// `NoOp` effects stage nothing. A modification with an empty payload
    /// stages a component removal.
    ///
    /// # Errors
    ///
    /// [`SyncError::AlreadyFinalized`] after finalization.
    pub fn stage_crdt_message(&mut self, message: CrdtMessage, effect: ReconciliationEffect) -> SyncResult<()> {
        if self.state == BufferState::Finalized {
            return Err(SyncError::AlreadyFinalized);
        }

        let staged = match (effect, message) {
            (ReconciliationEffect::NoOp, _) => return Ok(()),
            (ReconciliationEffect::EntityDeleted, message) => Staged::Destroy(message.entity()),
            (
                ReconciliationEffect::ComponentModified,
                CrdtMessage::PutComponent(body) | CrdtMessage::AppendComponent(body),
            ) => {
                if body.payload.is_empty() {
                    Staged::Remove(body.entity, body.component)
                } else {
                    Staged::Set(body.entity, body.component, body.payload)
                }
            }
            (
                ReconciliationEffect::ComponentAppended,
                CrdtMessage::PutComponent(body) | CrdtMessage::AppendComponent(body),
            ) => Staged::Append(body.entity, body.component, body.payload),
            (
                ReconciliationEffect::ComponentModified | ReconciliationEffect::ComponentAppended,
                CrdtMessage::DeleteEntity { .. },
            ) => return Ok(()),
        };

        self.staged.push(staged);
        Ok(())
    }

    /// Decodes every staged payload and seals the buffer.
    ///
    /// Payloads the registry cannot decode are dropped with a warning.
    ///
    /// # Errors
    ///
    /// [`SyncError::AlreadyFinalized`] if called twice.
    pub fn finalize_and_deserialize(&mut self, registry: &ComponentRegistry) -> SyncResult<()> {
        if self.state == BufferState::Finalized {
            return Err(SyncError::AlreadyFinalized);
        }

        self.commands.reserve(self.staged.len());
        for staged in self.staged.drain(..) {
            let command = match staged {
                Staged::Set(entity, component, payload) => registry
                    .decode(component, &payload)
                    .map(|value| SyncCommand::Set { entity, value }),
                Staged::Append(entity, component, payload) => registry
                    .decode(component, &payload)
                    .map(|value| SyncCommand::Append { entity, value }),
                Staged::Remove(entity, component) => Some(SyncCommand::Remove { entity, component }),
                Staged::Destroy(entity) => Some(SyncCommand::Destroy { entity }),
            };

            match command {
                Some(command) => self.commands.push(command),
                None => {
                    self.decode_failures += 1;
                    warn!("undecodable component payload dropped from sync command buffer");
                }
            }
        }

        self.state = BufferState::Finalized;
        Ok(())
    }

    /// Returns true once `finalize_and_deserialize` has run.
    #[inline]
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.state == BufferState::Finalized
    }

    /// Number of staged or decoded mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.len() + self.commands.len()
    }

    /// Returns true if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decoded commands, in staging order. Empty until finalized.
    #[must_use]
    pub fn commands(&self) -> &[SyncCommand] {
        &self.commands
    }

    /// Payloads dropped during finalization.
    #[inline]
    #[must_use]
    pub const fn decode_failures(&self) -> usize {
        self.decode_failures
    }

    pub(crate) fn into_commands(self) -> SyncResult<Vec<SyncCommand>> {
        if self.state == BufferState::Open {
            return Err(SyncError::NotFinalized);
        }
        Ok(self.commands)
    }
}

impl std::fmt::Debug for SyncCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCommandBuffer")
            .field("state", &self.state)
            .field("staged", &self.staged.len())
            .field("commands", &self.commands.len())
            .finish_non_exhaustive()
    }
}
