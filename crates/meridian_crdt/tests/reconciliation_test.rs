//! Integration tests for CRDT reconciliation.
//!
//! Convergence properties of the engine, and the path from wire bytes to
//! the entity store.

use std::sync::Arc;

use meridian_core::{BufferPool, ComponentId, PoolConfig, SceneEntity, SyncGate, Transform, World};
use meridian_crdt::{
    ComponentRegistry, CrdtDeserializer, CrdtMessage, CrdtProtocol, CrdtSerializer, ProtocolConfig,
    StateChange, SyncCommand, WorldSyncBridge,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const TRANSFORM: ComponentId = ComponentId(1);
const MATERIAL: ComponentId = ComponentId(1017);

fn pool() -> Arc<BufferPool> {
    BufferPool::new(PoolConfig::default())
}

fn engine(pool: &Arc<BufferPool>) -> CrdtProtocol {
    CrdtProtocol::new(Arc::clone(pool), ProtocolConfig::default())
}

fn put(pool: &Arc<BufferPool>, entity: SceneEntity, component: ComponentId, ts: u32, data: &[u8]) -> CrdtMessage {
    CrdtMessage::put(entity, component, ts, pool.rent_copy(data).unwrap())
}

/// Canonical state as comparable bytes.
fn snapshot_bytes(engine: &CrdtProtocol) -> Vec<u8> {
    let (messages, _) = engine.create_messages_from_the_current_state_vec().unwrap();
    let mut bytes = Vec::new();
    for processed in &messages {
        CrdtSerializer::serialize(&processed.message, &mut bytes);
    }
    bytes
}

/// Random messages over a small key space, distinct timestamps per key.
fn random_messages(pool: &Arc<BufferPool>, rng: &mut StdRng, count: usize) -> Vec<CrdtMessage> {
    let mut next_ts = std::collections::HashMap::new();
    (0..count)
        .map(|_| {
            let entity = SceneEntity::new(rng.gen_range(512..520), rng.gen_range(0..2));
            if rng.gen_ratio(1, 10) {
                return CrdtMessage::delete_entity(entity);
            }
            let component = if rng.gen_bool(0.5) { TRANSFORM } else { MATERIAL };
            let ts = next_ts.entry((entity, component)).or_insert(0u32);
            *ts += rng.gen_range(1..4);
            let data: Vec<u8> = (0..rng.gen_range(0..12)).map(|_| rng.gen()).collect();
            put(pool, entity, component, *ts, &data)
        })
        .collect()
}

#[test]
fn test_example_scenario() {
    let pool = pool();
    let mut engine = engine(&pool);
    let entity = SceneEntity::new(512, 0);

    let changes: Vec<_> = [(5, b"A"), (3, b"B"), (7, b"C")]
        .iter()
        .map(|(ts, data)| engine.process_message(&put(&pool, entity, TRANSFORM, *ts, *data)).unwrap().change)
        .collect();

    assert_eq!(changes, [StateChange::StateUpdated, StateChange::NoChange, StateChange::StateUpdated]);
    let state = engine.get_state(entity, TRANSFORM).unwrap();
    assert_eq!((state.timestamp, state.payload), (7, &b"C"[..]));
}

#[test]
fn test_commutativity_under_shuffle() {
    let pool = pool();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..20 {
        let messages = random_messages(&pool, &mut rng, 60);

        let mut reference = engine(&pool);
        for message in &messages {
            reference.process_message(message).unwrap();
        }
        let expected = snapshot_bytes(&reference);

        for _ in 0..5 {
            let mut order: Vec<&CrdtMessage> = messages.iter().collect();
            order.shuffle(&mut rng);

            let mut shuffled = engine(&pool);
            for message in order {
                shuffled.process_message(message).unwrap();
            }
            assert_eq!(snapshot_bytes(&shuffled), expected);
        }
    }
}

#[test]
fn test_two_writes_either_order() {
    let pool = pool();
    let entity = SceneEntity::new(512, 0);
    let older = put(&pool, entity, TRANSFORM, 2, b"older");
    let newer = put(&pool, entity, TRANSFORM, 9, b"newer");

    let mut forward = engine(&pool);
    forward.process_message(&older).unwrap();
    forward.process_message(&newer).unwrap();

    let mut backward = engine(&pool);
    backward.process_message(&newer).unwrap();
    backward.process_message(&older).unwrap();

    assert_eq!(forward.get_state(entity, TRANSFORM), backward.get_state(entity, TRANSFORM));
    assert_eq!(forward.get_state(entity, TRANSFORM).unwrap().payload, b"newer");
}

#[test]
fn test_idempotence() {
    let pool = pool();
    let mut rng = StdRng::seed_from_u64(7);
    let messages = random_messages(&pool, &mut rng, 40);

    let mut engine = engine(&pool);
    for message in &messages {
        engine.process_message(message).unwrap();
    }
    let once = snapshot_bytes(&engine);

    for message in &messages {
        let result = engine.process_message(message).unwrap();
        assert_eq!(result.change, StateChange::NoChange);
    }
    assert_eq!(snapshot_bytes(&engine), once);
}

#[test]
fn test_tombstone_precedence() {
    let pool = pool();
    let entity = SceneEntity::new(600, 0);
    let mut engine = engine(&pool);

    engine.process_message(&CrdtMessage::delete_entity(entity)).unwrap();
    for ts in [0, 1, 1000, u32::MAX] {
        let result = engine.process_message(&put(&pool, entity, TRANSFORM, ts, b"late")).unwrap();
        assert_eq!(result.change, StateChange::NoChange);
    }
    assert!(engine.get_state(entity, TRANSFORM).is_none());
    assert!(engine.is_entity_deleted(entity));
}

#[test]
fn test_round_trip_through_wire() {
    let pool = pool();
    let mut rng = StdRng::seed_from_u64(42);
    let messages = random_messages(&pool, &mut rng, 100);

    let mut bytes = Vec::new();
    for message in &messages {
        CrdtSerializer::serialize(message, &mut bytes);
    }

    let decoded = CrdtDeserializer::new(Arc::clone(&pool)).deserialize_batch(&bytes).unwrap();
    assert_eq!(decoded.messages, messages);
    assert_eq!(decoded.stats.decoded, messages.len());
}

#[test]
fn test_snapshot_rebuilds_state() {
    let pool = pool();
    let mut rng = StdRng::seed_from_u64(99);
    let messages = random_messages(&pool, &mut rng, 80);

    let mut source = engine(&pool);
    for message in &messages {
        source.process_message(message).unwrap();
    }

    let (snapshot, total) = source.create_messages_from_the_current_state_vec().unwrap();
    assert_eq!(snapshot.len(), source.get_messages_count());

    let wire = meridian_crdt::serialize_processed(&snapshot, total, &pool).unwrap();
    let decoded = CrdtDeserializer::new(Arc::clone(&pool)).deserialize_batch(&wire).unwrap();

    let mut rebuilt = engine(&pool);
    for message in &decoded.messages {
        rebuilt.process_message(message).unwrap();
    }
    assert_eq!(snapshot_bytes(&rebuilt), snapshot_bytes(&source));
}

#[test]
fn test_ordering_preserved_into_store() {
    let pool = pool();
    let mut engine = engine(&pool);
    let bridge = WorldSyncBridge::new(SyncGate::new(World::new(128)), Arc::clone(&pool));

    let entities: Vec<_> = (0..32u16).map(|i| SceneEntity::new(1000 - i * 7, 0)).collect();
    let mut buffer = bridge.get_sync_command_buffer();
    for (i, &entity) in entities.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let transform = Transform::from_position(i as f32, 0.0, 0.0);
        let message = put(&pool, entity, TRANSFORM, 0, bytemuck::bytes_of(&transform));
        let result = engine.process_message(&message).unwrap();
        buffer.sync_crdt_message(&message, result.effect).unwrap();
    }
    buffer.finalize_and_deserialize(&ComponentRegistry::default()).unwrap();

    let order: Vec<_> = buffer.commands().iter().map(SyncCommand::entity).collect();
    assert_eq!(order, entities);

    let report = bridge.apply_sync_command_buffer(buffer).unwrap();
    assert_eq!(report.applied, entities.len());
    bridge.gate().read(|world| {
        for (i, &entity) in entities.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let x = i as f32;
            assert_eq!(world.transform(entity).unwrap().position[0], x);
        }
    });
}

#[test]
fn test_delete_propagates_to_store() {
    let pool = pool();
    let mut engine = engine(&pool);
    let bridge = WorldSyncBridge::new(SyncGate::new(World::new(16)), Arc::clone(&pool));
    let entity = SceneEntity::new(512, 0);

    let batch = [
        put(&pool, entity, MATERIAL, 1, b"red"),
        CrdtMessage::delete_entity(entity),
        put(&pool, entity, MATERIAL, 2, b"blue"),
    ];

    let mut buffer = bridge.get_sync_command_buffer();
    for message in &batch {
        let result = engine.process_message(message).unwrap();
        buffer.sync_crdt_message(message, result.effect).unwrap();
    }
    buffer.finalize_and_deserialize(&ComponentRegistry::default()).unwrap();
    let report = bridge.apply_sync_command_buffer(buffer).unwrap();

    assert_eq!(report.applied, 2);
    assert!(bridge.gate().read(|world| world.is_destroyed(entity)));
    assert!(bridge.gate().read(|world| world.opaque(entity, MATERIAL).is_none()));
}
