//! # World Synchronization Bridge
//!
//! Turns reconciliation results into entity store mutations.
//!
//! ## Flow
//!
//! ```text
//!   CrdtProtocol ──(message, effect)──▶ SyncCommandBuffer::stage_crdt_message
//!                                              │
//!                                  finalize_and_deserialize(registry)
//!                                              │  decoding happens here,
//!                                              │  outside the gate
//!                                              ▼
//!                    apply_sync_command_buffer ── gate.acquire() ──▶ EntityStore
//! ```
//!
//! The store is written only by `apply_sync_command_buffer`, once per batch,
//! in staging order.

mod command_buffer;
mod registry;
mod store;

pub use command_buffer::{SyncCommand, SyncCommandBuffer};
pub use registry::{ComponentDecoder, ComponentRegistry};
pub use store::EntityStore;

use std::sync::Arc;

use meridian_core::{BufferPool, SceneEntity, StoreError, SyncGate};
use tracing::{debug, error};

use crate::error::SyncResult;

/// Outcome of applying one command buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Commands the store accepted.
    pub applied: usize,
    /// Entities created implicitly by a set or append.
    pub created: usize,
    /// Commands skipped (entity destroyed, not alive, or store full).
    pub skipped: usize,
}

/// Connects command buffers to a gated entity store.
pub struct WorldSyncBridge<S: EntityStore> {
    gate: Arc<SyncGate<S>>,
    pool: Arc<BufferPool>,
}

impl<S: EntityStore> WorldSyncBridge<S> {
    /// Creates a bridge writing into the store behind `gate`.
    #[must_use]
    pub fn new(gate: Arc<SyncGate<S>>, pool: Arc<BufferPool>) -> Self {
        Self { gate, pool }
    }

    /// Returns the gate the store lives behind.
    #[inline]
    #[must_use]
    pub fn gate(&self) -> &Arc<SyncGate<S>> {
        &self.gate
    }

    /// Returns an empty, open command buffer.
    #[must_use]
    pub fn get_sync_command_buffer(&self) -> SyncCommandBuffer {
        SyncCommandBuffer::new(Arc::clone(&self.pool))
    }

    /// Applies every command in `buffer` under a single gate acquisition.
    ///
    /// Store refusals are logged and skipped; the rest of the buffer still
    /// applies.
    ///
    /// # Errors
    ///
    /// [`crate::SyncError::NotFinalized`] if the buffer was never finalized.
    pub fn apply_sync_command_buffer(&self, buffer: SyncCommandBuffer) -> SyncResult<ApplyReport> {
        let commands = buffer.into_commands()?;
        let mut report = ApplyReport::default();
        if commands.is_empty() {
            return Ok(report);
        }

        let mut store = self.gate.acquire();
        for command in commands {
            let entity = command.entity();
            let outcome = match command {
                SyncCommand::Set { entity, value } => ensure_alive(&mut *store, entity, &mut report)
                    .and_then(|()| store.set_component(entity, value)),
                SyncCommand::Append { entity, value } => ensure_alive(&mut *store, entity, &mut report)
                    .and_then(|()| store.append_component(entity, value)),
                SyncCommand::Remove { entity, component } => store.remove_component(entity, component),
                SyncCommand::Destroy { entity } => store.destroy_entity(entity),
            };

            match outcome {
                Ok(()) => report.applied += 1,
                Err(StoreError::EntityNotAlive(_)) => {
                    // Remove/destroy for an entity the store never saw
                    debug!(%entity, "sync command for entity that is not alive skipped");
                    report.skipped += 1;
                }
                Err(err) => {
                    error!(%entity, %err, "entity store refused sync command");
                    report.skipped += 1;
                }
            }
        }
        drop(store);

        debug!(
            applied = report.applied,
            created = report.created,
            skipped = report.skipped,
            "sync command buffer applied"
        );
        Ok(report)
    }
}

fn ensure_alive<S: EntityStore>(
    store: &mut S,
    entity: SceneEntity,
    report: &mut ApplyReport,
) -> Result<(), StoreError> {
    if store.is_alive(entity) {
        return Ok(());
    }
    store.create_entity(entity)?;
    report.created += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::{CrdtMessage, ReconciliationEffect};
    use crate::error::SyncError;
    use meridian_core::{
        Component, ComponentId, ComponentValue, PoolConfig, SceneEntity, Transform, Visibility, World,
    };

    fn bridge() -> (Arc<BufferPool>, WorldSyncBridge<World>) {
        let pool = BufferPool::new(PoolConfig::default());
        let gate = SyncGate::new(World::new(64));
        (Arc::clone(&pool), WorldSyncBridge::new(gate, pool))
    }

    fn put_transform(pool: &Arc<BufferPool>, entity: SceneEntity, x: f32) -> CrdtMessage {
        let transform = Transform::from_position(x, 0.0, 0.0);
        CrdtMessage::put(entity, Transform::ID, 0, pool.rent_copy(bytemuck::bytes_of(&transform)).unwrap())
    }

    #[test]
    fn test_apply_creates_and_writes() {
        let (pool, bridge) = bridge();
        let entity = SceneEntity::new(512, 0);

        let mut buffer = bridge.get_sync_command_buffer();
        buffer
            .sync_crdt_message(&put_transform(&pool, entity, 3.0), ReconciliationEffect::ComponentModified)
            .unwrap();
        buffer.finalize_and_deserialize(&ComponentRegistry::default()).unwrap();

        let slices_before = bridge.gate().slice_count();
        let report = bridge.apply_sync_command_buffer(buffer).unwrap();
        assert_eq!(report, ApplyReport { applied: 1, created: 1, skipped: 0 });
        assert_eq!(bridge.gate().slice_count(), slices_before + 1);

        let transform = bridge.gate().read(|world| world.transform(entity)).unwrap();
        assert_eq!(transform.position, [3.0, 0.0, 0.0]);
    }

    #[test]
    fn test_destroyed_entity_skipped() {
        let (pool, bridge) = bridge();
        let entity = SceneEntity::new(512, 0);
        {
            let mut world = bridge.gate().acquire();
            world.spawn(entity).unwrap();
            world.despawn(entity).unwrap();
        }

        let mut buffer = bridge.get_sync_command_buffer();
        buffer
            .sync_crdt_message(&put_transform(&pool, entity, 1.0), ReconciliationEffect::ComponentModified)
            .unwrap();
        buffer
            .sync_crdt_message(&put_transform(&pool, SceneEntity::new(513, 0), 2.0), ReconciliationEffect::ComponentModified)
            .unwrap();
        buffer.finalize_and_deserialize(&ComponentRegistry::default()).unwrap();

        let report = bridge.apply_sync_command_buffer(buffer).unwrap();
        assert_eq!(report, ApplyReport { applied: 1, created: 1, skipped: 1 });
        assert!(!bridge.gate().read(|world| world.is_alive(entity)));
    }

    #[test]
    fn test_fifo_within_buffer() {
        let (pool, bridge) = bridge();
        let entity = SceneEntity::new(700, 0);
        let visible = pool.rent_copy(bytemuck::bytes_of(&Visibility { visible: 1 })).unwrap();

        let mut buffer = bridge.get_sync_command_buffer();
        buffer
            .sync_crdt_message(
                &CrdtMessage::put(entity, Visibility::ID, 0, visible),
                ReconciliationEffect::ComponentModified,
            )
            .unwrap();
        buffer
            .sync_crdt_message(&CrdtMessage::delete_entity(entity), ReconciliationEffect::EntityDeleted)
            .unwrap();
        buffer.finalize_and_deserialize(&ComponentRegistry::default()).unwrap();

        let report = bridge.apply_sync_command_buffer(buffer).unwrap();
        assert_eq!(report.applied, 2);
        assert!(bridge.gate().read(|world| world.is_destroyed(entity)));
    }

    #[test]
    fn test_opaque_append() {
        let (pool, bridge) = bridge();
        let entity = SceneEntity::new(800, 0);
        let event = CrdtMessage::append(entity, ComponentId(1063), 0, pool.rent_copy(b"click").unwrap());

        let mut buffer = bridge.get_sync_command_buffer();
        buffer.sync_crdt_message(&event, ReconciliationEffect::ComponentAppended).unwrap();
        buffer.finalize_and_deserialize(&ComponentRegistry::default()).unwrap();
        bridge.apply_sync_command_buffer(buffer).unwrap();

        let appended = bridge.gate().read(|world| world.appended(entity, ComponentId(1063)).to_vec());
        assert_eq!(
            appended,
            [ComponentValue::Opaque { component: ComponentId(1063), bytes: b"click".to_vec() }]
        );
    }

    #[test]
    fn test_unfinalized_buffer_rejected() {
        let (_pool, bridge) = bridge();
        let buffer = bridge.get_sync_command_buffer();
        assert_eq!(bridge.apply_sync_command_buffer(buffer), Err(SyncError::NotFinalized));
    }
}
