//! # CRDT Protocol Engine
//!
//! Canonical last-writer-wins state for every `(entity, component)` pair.
//!
//! ## Rules
//!
//! ```text
//! PutComponent / AppendComponent
//!   entity tombstoned ............................ NoChange
//!   no stored entry, or timestamp > stored ....... StateUpdated
//!   timestamp <= stored .......................... NoChange
//!
//! DeleteEntity
//!   id already covered by a tombstone ............ NoChange
//!   otherwise .................................... StateUpdated, entries dropped
//! ```
//!
//! Tombstones are kept per entity number as the highest deleted version.
//! Any write for `(number, version)` with `version <= tombstone` is rejected
//! forever. A higher version of the same number is a new entity.
//!
//! Acceptance depends on timestamps only, so any arrival order of the same
//! messages converges to the same state.

use std::collections::BTreeMap;
use std::sync::Arc;

use meridian_core::{BufferPool, ComponentId, PoolResult, PooledBuffer, SceneEntity};

use super::message::{
    ComponentMessage, CrdtMessage, ProcessedCrdtMessage, ReconciliationEffect,
    ReconciliationResult,
};

/// Validation limits for incoming messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Highest entity number accepted.
    pub max_entity_number: u16,
    /// Largest payload accepted, in bytes.
    pub max_payload_len: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_entity_number: u16::MAX,
            max_payload_len: 1024 * 1024,
        }
    }
}

impl ProtocolConfig {
    /// Sets the highest accepted entity number.
    #[must_use]
    pub const fn with_max_entity_number(mut self, number: u16) -> Self {
        self.max_entity_number = number;
        self
    }

    /// Sets the largest accepted payload.
    #[must_use]
    pub const fn with_max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }
}

/// Processing counters, cumulative over the engine's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProtocolStats {
    /// Messages processed.
    pub processed: u64,
    /// Messages that changed canonical state.
    pub accepted: u64,
    /// Writes rejected for a lower or equal timestamp.
    pub stale: u64,
    /// Writes and repeated deletes rejected by a tombstone.
    pub tombstoned: u64,
    /// Messages rejected by validation.
    pub invalid: u64,
}

impl ProtocolStats {
    /// Messages that did not change state.
    #[inline]
    #[must_use]
    pub const fn rejected(&self) -> u64 {
        self.stale + self.tombstoned + self.invalid
    }

    /// Difference between two snapshots, for per-batch reporting.
    #[must_use]
    pub const fn since(&self, earlier: &Self) -> Self {
        Self {
            processed: self.processed - earlier.processed,
            accepted: self.accepted - earlier.accepted,
            stale: self.stale - earlier.stale,
            tombstoned: self.tombstoned - earlier.tombstoned,
            invalid: self.invalid - earlier.invalid,
        }
    }
}

/// Read view of one canonical entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateEntry<'a> {
    /// Timestamp of the winning write.
    pub timestamp: u32,
    /// Payload of the winning write.
    pub payload: &'a [u8],
}

struct StoredComponent {
    timestamp: u32,
    payload: PooledBuffer,
}

/// The reconciliation engine.
///
/// Owned by a single context; nothing here is shared.
pub struct CrdtProtocol {
    pool: Arc<BufferPool>,
    config: ProtocolConfig,
    state: BTreeMap<(SceneEntity, ComponentId), StoredComponent>,
    /// Entity number -> highest deleted version.
    tombstones: BTreeMap<u16, u16>,
    stats: ProtocolStats,
}

impl CrdtProtocol {
    /// Creates an empty engine that copies accepted payloads from `pool`.
    #[must_use]
    pub fn new(pool: Arc<BufferPool>, config: ProtocolConfig) -> Self {
        Self {
            pool,
            config,
            state: BTreeMap::new(),
            tombstones: BTreeMap::new(),
            stats: ProtocolStats::default(),
        }
    }

    /// Returns the validation limits.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Returns the cumulative counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> ProtocolStats {
        self.stats
    }

    /// Reconciles one message against canonical state.
    ///
    /// # Errors
    ///
    /// Fails only if the accepted payload cannot be copied from the pool.
    /// State is unchanged in that case.
    pub fn process_message(&mut self, message: &CrdtMessage) -> PoolResult<ReconciliationResult> {
        self.stats.processed += 1;

        let result = match message {
            CrdtMessage::DeleteEntity { entity } => self.delete_entity(*entity),
            CrdtMessage::PutComponent(body) => {
                self.write_component(body, ReconciliationEffect::ComponentModified)?
            }
            CrdtMessage::AppendComponent(body) => {
                self.write_component(body, ReconciliationEffect::ComponentAppended)?
            }
        };

        if result.is_updated() {
            self.stats.accepted += 1;
        }
        Ok(result)
    }

    fn delete_entity(&mut self, entity: SceneEntity) -> ReconciliationResult {
        if entity.number() > self.config.max_entity_number {
            self.stats.invalid += 1;
            return ReconciliationResult::NO_CHANGE;
        }
        if self.is_entity_deleted(entity) {
            self.stats.tombstoned += 1;
            return ReconciliationResult::NO_CHANGE;
        }

        self.tombstones.insert(entity.number(), entity.version());
        // Every older version of this number is covered by the new tombstone
        self.state.retain(|(stored, _), _| {
            stored.number() != entity.number() || stored.version() > entity.version()
        });
        ReconciliationResult::updated(ReconciliationEffect::EntityDeleted)
    }

    fn write_component(
        &mut self,
        body: &ComponentMessage,
        effect: ReconciliationEffect,
    ) -> PoolResult<ReconciliationResult> {
        if body.entity.number() > self.config.max_entity_number
            || body.payload.len() > self.config.max_payload_len
        {
            self.stats.invalid += 1;
            return Ok(ReconciliationResult::NO_CHANGE);
        }
        if self.is_entity_deleted(body.entity) {
            self.stats.tombstoned += 1;
            return Ok(ReconciliationResult::NO_CHANGE);
        }

        let key = (body.entity, body.component);
        if let Some(stored) = self.state.get(&key) {
            if body.timestamp <= stored.timestamp {
                self.stats.stale += 1;
                return Ok(ReconciliationResult::NO_CHANGE);
            }
        }

        let payload = self.pool.rent_copy(&body.payload)?;
        self.state.insert(
            key,
            StoredComponent {
                timestamp: body.timestamp,
                payload,
            },
        );
        Ok(ReconciliationResult::updated(effect))
    }

    /// Returns true if `entity` is covered by a tombstone.
    #[inline]
    #[must_use]
    pub fn is_entity_deleted(&self, entity: SceneEntity) -> bool {
        self.tombstones
            .get(&entity.number())
            .is_some_and(|&deleted| entity.version() <= deleted)
    }

    /// Returns the canonical entry for a pair.
    #[must_use]
    pub fn get_state(&self, entity: SceneEntity, component: ComponentId) -> Option<StateEntry<'_>> {
        self.state.get(&(entity, component)).map(|stored| StateEntry {
            timestamp: stored.timestamp,
            payload: stored.payload.as_slice(),
        })
    }

    /// Number of messages a snapshot emits: live entries plus tombstones.
    #[inline]
    #[must_use]
    pub fn get_messages_count(&self) -> usize {
        self.state.len() + self.tombstones.len()
    }

    /// Appends the full canonical state to `out`, returning its wire length.
    ///
    /// Emits one `DeleteEntity` per tombstone, then one put per entry, in
    /// `(entity, component)` order. Reserve `get_messages_count()` slots to
    /// avoid growing `out`.
    ///
    /// # Errors
    ///
    /// Fails if payload copies cannot be rented. `out` may hold a partial
    /// snapshot in that case.
    pub fn create_messages_from_the_current_state(
        &self,
        out: &mut Vec<ProcessedCrdtMessage>,
    ) -> PoolResult<usize> {
        let mut total = 0;

        for (&number, &version) in &self.tombstones {
            let processed =
                ProcessedCrdtMessage::new(CrdtMessage::delete_entity(SceneEntity::new(number, version)));
            total += processed.data_length;
            out.push(processed);
        }

        for (&(entity, component), stored) in &self.state {
            let message = CrdtMessage::put(entity, component, stored.timestamp, stored.payload.try_clone()?);
            let processed = ProcessedCrdtMessage::new(message);
            total += processed.data_length;
            out.push(processed);
        }

        Ok(total)
    }

    /// Snapshot into a freshly presized vector.
    ///
    /// # Errors
    ///
    /// Fails if payload copies cannot be rented.
    pub fn create_messages_from_the_current_state_vec(
        &self,
    ) -> PoolResult<(Vec<ProcessedCrdtMessage>, usize)> {
        let mut out = Vec::with_capacity(self.get_messages_count());
        let total = self.create_messages_from_the_current_state(&mut out)?;
        Ok((out, total))
    }

    /// Stamps and commits a locally originated put.
    ///
    /// Returns `None` if the entity is deleted, the write fails validation,
    /// or the timestamp space is exhausted.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be rented.
    pub fn create_put_message(
        &mut self,
        entity: SceneEntity,
        component: ComponentId,
        payload: &[u8],
    ) -> PoolResult<Option<CrdtMessage>> {
        self.create_component_message(entity, component, payload, CrdtMessage::put)
    }

    /// Stamps and commits a locally originated append.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be rented.
    pub fn create_append_message(
        &mut self,
        entity: SceneEntity,
        component: ComponentId,
        payload: &[u8],
    ) -> PoolResult<Option<CrdtMessage>> {
        self.create_component_message(entity, component, payload, CrdtMessage::append)
    }

    /// Commits a locally originated delete.
    ///
    /// Returns `None` if the entity was already deleted.
    pub fn create_delete_entity_message(&mut self, entity: SceneEntity) -> Option<CrdtMessage> {
        let message = CrdtMessage::delete_entity(entity);
        self.stats.processed += 1;
        let result = self.delete_entity(entity);
        if result.is_updated() {
            self.stats.accepted += 1;
            Some(message)
        } else {
            None
        }
    }

    fn create_component_message(
        &mut self,
        entity: SceneEntity,
        component: ComponentId,
        payload: &[u8],
        build: fn(SceneEntity, ComponentId, u32, PooledBuffer) -> CrdtMessage,
    ) -> PoolResult<Option<CrdtMessage>> {
        let timestamp = match self.state.get(&(entity, component)) {
            Some(stored) => match stored.timestamp.checked_add(1) {
                Some(next) => next,
                None => return Ok(None),
            },
            None => 0,
        };

        let message = build(entity, component, timestamp, self.pool.rent_copy(payload)?);
        let result = self.process_message(&message)?;
        Ok(result.is_updated().then_some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::message::StateChange;
    use meridian_core::PoolConfig;

    const ENTITY: SceneEntity = SceneEntity::new(512, 0);
    const TRANSFORM: ComponentId = ComponentId(1);

    fn engine() -> (Arc<BufferPool>, CrdtProtocol) {
        let pool = BufferPool::new(PoolConfig::default());
        let engine = CrdtProtocol::new(Arc::clone(&pool), ProtocolConfig::default());
        (pool, engine)
    }

    fn put(pool: &Arc<BufferPool>, entity: SceneEntity, ts: u32, data: &[u8]) -> CrdtMessage {
        CrdtMessage::put(entity, TRANSFORM, ts, pool.rent_copy(data).unwrap())
    }

    #[test]
    fn test_last_writer_wins_scenario() {
        let (pool, mut engine) = engine();

        let changes: Vec<_> = [(5, "A"), (3, "B"), (7, "C")]
            .iter()
            .map(|&(ts, data)| engine.process_message(&put(&pool, ENTITY, ts, data.as_bytes())).unwrap().change)
            .collect();

        assert_eq!(changes, [StateChange::StateUpdated, StateChange::NoChange, StateChange::StateUpdated]);
        let state = engine.get_state(ENTITY, TRANSFORM).unwrap();
        assert_eq!(state, StateEntry { timestamp: 7, payload: b"C" });
        assert_eq!(engine.stats().stale, 1);
    }

    #[test]
    fn test_equal_timestamp_keeps_existing() {
        let (pool, mut engine) = engine();
        engine.process_message(&put(&pool, ENTITY, 4, b"first")).unwrap();
        let result = engine.process_message(&put(&pool, ENTITY, 4, b"second")).unwrap();

        assert_eq!(result, ReconciliationResult::NO_CHANGE);
        assert_eq!(engine.get_state(ENTITY, TRANSFORM).unwrap().payload, b"first");
    }

    #[test]
    fn test_append_effect() {
        let (pool, mut engine) = engine();
        let message = CrdtMessage::append(ENTITY, ComponentId(1063), 0, pool.rent_copy(b"click").unwrap());
        let result = engine.process_message(&message).unwrap();
        assert_eq!(result, ReconciliationResult::updated(ReconciliationEffect::ComponentAppended));
    }

    #[test]
    fn test_delete_wins_over_later_writes() {
        let (pool, mut engine) = engine();
        engine.process_message(&put(&pool, ENTITY, 1, b"a")).unwrap();
        engine.process_message(&CrdtMessage::put(ENTITY, ComponentId(1081), 0, pool.rent_copy(&[1]).unwrap())).unwrap();

        let result = engine.process_message(&CrdtMessage::delete_entity(ENTITY)).unwrap();
        assert_eq!(result.effect, ReconciliationEffect::EntityDeleted);
        assert!(engine.get_state(ENTITY, TRANSFORM).is_none());
        assert!(engine.get_state(ENTITY, ComponentId(1081)).is_none());

        let late = engine.process_message(&put(&pool, ENTITY, 100, b"late")).unwrap();
        assert_eq!(late, ReconciliationResult::NO_CHANGE);
        assert_eq!(engine.stats().tombstoned, 1);

        let again = engine.process_message(&CrdtMessage::delete_entity(ENTITY)).unwrap();
        assert_eq!(again, ReconciliationResult::NO_CHANGE);
    }

    #[test]
    fn test_newer_version_is_new_entity() {
        let (pool, mut engine) = engine();
        engine.process_message(&CrdtMessage::delete_entity(SceneEntity::new(512, 1))).unwrap();

        assert!(engine.is_entity_deleted(SceneEntity::new(512, 0)));
        assert!(engine.is_entity_deleted(SceneEntity::new(512, 1)));
        assert!(!engine.is_entity_deleted(SceneEntity::new(512, 2)));

        let reborn = engine.process_message(&put(&pool, SceneEntity::new(512, 2), 0, b"x")).unwrap();
        assert!(reborn.is_updated());

        // Deleting an older version leaves the newer one alone
        let stale_delete = engine.process_message(&CrdtMessage::delete_entity(SceneEntity::new(512, 0))).unwrap();
        assert_eq!(stale_delete, ReconciliationResult::NO_CHANGE);
        assert!(engine.get_state(SceneEntity::new(512, 2), TRANSFORM).is_some());
    }

    #[test]
    fn test_validation_limits() {
        let pool = BufferPool::new(PoolConfig::default());
        let config = ProtocolConfig::default().with_max_entity_number(1000).with_max_payload_len(4);
        let mut engine = CrdtProtocol::new(Arc::clone(&pool), config);

        let far = engine.process_message(&put(&pool, SceneEntity::new(1001, 0), 0, b"a")).unwrap();
        let big = engine.process_message(&put(&pool, ENTITY, 0, b"12345")).unwrap();
        assert_eq!(far, ReconciliationResult::NO_CHANGE);
        assert_eq!(big, ReconciliationResult::NO_CHANGE);
        assert_eq!(engine.stats().invalid, 2);
        assert_eq!(engine.get_messages_count(), 0);
    }

    #[test]
    fn test_engine_owns_payload_copy() {
        let (pool, mut engine) = engine();
        let message = put(&pool, ENTITY, 0, b"owned");
        engine.process_message(&message).unwrap();
        drop(message);

        assert_eq!(engine.get_state(ENTITY, TRANSFORM).unwrap().payload, b"owned");
        assert_eq!(pool.outstanding_bytes(), 5);

        // Replaced buffers go back to the pool
        engine.process_message(&put(&pool, ENTITY, 1, b"new")).unwrap();
        assert_eq!(pool.outstanding_bytes(), 3);
    }

    #[test]
    fn test_snapshot_includes_tombstones() {
        let (pool, mut engine) = engine();
        engine.process_message(&put(&pool, SceneEntity::new(513, 0), 2, b"b")).unwrap();
        engine.process_message(&put(&pool, ENTITY, 1, b"a")).unwrap();
        engine.process_message(&CrdtMessage::delete_entity(SceneEntity::new(600, 0))).unwrap();

        assert_eq!(engine.get_messages_count(), 3);
        let (messages, total) = engine.create_messages_from_the_current_state_vec().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(total, messages.iter().map(|m| m.data_length).sum::<usize>());

        assert_eq!(messages[0].message, CrdtMessage::delete_entity(SceneEntity::new(600, 0)));
        assert_eq!(messages[1].message.entity(), ENTITY);
        assert_eq!(messages[2].message.entity(), SceneEntity::new(513, 0));
    }

    #[test]
    fn test_local_writes_stamp_next_timestamp() {
        let (pool, mut engine) = engine();
        let first = engine.create_put_message(ENTITY, TRANSFORM, b"a").unwrap().unwrap();
        assert_eq!(first.component_body().unwrap().timestamp, 0);

        engine.process_message(&put(&pool, ENTITY, 9, b"remote")).unwrap();
        let next = engine.create_put_message(ENTITY, TRANSFORM, b"local").unwrap().unwrap();
        assert_eq!(next.component_body().unwrap().timestamp, 10);
        assert_eq!(engine.get_state(ENTITY, TRANSFORM).unwrap().payload, b"local");

        assert!(engine.create_delete_entity_message(ENTITY).is_some());
        assert!(engine.create_delete_entity_message(ENTITY).is_none());
        assert!(engine.create_put_message(ENTITY, TRANSFORM, b"gone").unwrap().is_none());
    }

    #[test]
    fn test_timestamp_exhaustion_rejects_local_write() {
        let (pool, mut engine) = engine();
        engine.process_message(&put(&pool, ENTITY, u32::MAX, b"max")).unwrap();
        assert!(engine.create_put_message(ENTITY, TRANSFORM, b"x").unwrap().is_none());
    }
}
