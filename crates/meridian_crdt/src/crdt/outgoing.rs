//! # Outgoing Message Accumulator
//!
//! Collects writes that originate on the consumer side until the scene host
//! drains them into its next response.
//!
//! ```text
//!   producers (any thread)              host (serialization)
//!   ──────────────────────              ──────────────────────────────────────
//!   put_component ─────┐                block = get_serialization_sync_block()
//!   append_component ──┼─▶ [ queue ] ─▶   copied under the lock
//!   delete_entity ─────┘                serialize block.messages()
//!                                       block.commit()   clears copied entries
//! ```
//!
//! Producers only ever wait for the short copy, never for serialization.

use std::sync::Arc;

use meridian_core::{BufferPool, ComponentId, PoolResult, PooledBuffer, SceneEntity};
use parking_lot::Mutex;

use super::message::CrdtMessageKind;

/// One queued write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingMessage {
    /// Queue sequence number; higher was queued (or replaced) later.
    pub seq: u64,
    /// Write kind.
    pub kind: CrdtMessageKind,
    /// Target entity.
    pub entity: SceneEntity,
    /// Target component (`None` for deletes).
    pub component: Option<ComponentId>,
    /// Shared payload bytes.
    pub payload: Arc<PooledBuffer>,
}

#[derive(Default)]
struct Queue {
    entries: Vec<PendingMessage>,
    next_seq: u64,
}

impl Queue {
    fn push(&mut self, kind: CrdtMessageKind, entity: SceneEntity, component: Option<ComponentId>, payload: PooledBuffer) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(PendingMessage {
            seq,
            kind,
            entity,
            component,
            payload: Arc::new(payload),
        });
    }

    /// Index of a queued put that a newer put for the same key may replace.
    fn coalesce_target(&self, entity: SceneEntity, component: ComponentId) -> Option<usize> {
        for (index, entry) in self.entries.iter().enumerate().rev() {
            if entry.entity != entity {
                continue;
            }
            match entry.kind {
                CrdtMessageKind::DeleteEntity => return None,
                CrdtMessageKind::AppendComponent if entry.component == Some(component) => return None,
                CrdtMessageKind::PutComponent if entry.component == Some(component) => return Some(index),
                _ => {}
            }
        }
        None
    }
}

/// Thread-safe queue of consumer-originated writes.
pub struct OutgoingMessages {
    pool: Arc<BufferPool>,
    queue: Mutex<Queue>,
}

impl OutgoingMessages {
    /// Creates an empty accumulator renting payload copies from `pool`.
    #[must_use]
    pub fn new(pool: Arc<BufferPool>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            queue: Mutex::new(Queue::default()),
        })
    }

    /// Queues a put. Replaces a queued put for the same pair.
    ///
    /// # Errors
    ///
    /// Fails if the payload copy cannot be rented.
    pub fn put_component(&self, entity: SceneEntity, component: ComponentId, payload: &[u8]) -> PoolResult<()> {
        let payload = self.pool.rent_copy(payload)?;
        let mut queue = self.queue.lock();

        if let Some(index) = queue.coalesce_target(entity, component) {
            let seq = queue.next_seq;
            queue.next_seq += 1;
            let entry = &mut queue.entries[index];
            entry.seq = seq;
            entry.payload = Arc::new(payload);
            return Ok(());
        }

        queue.push(CrdtMessageKind::PutComponent, entity, Some(component), payload);
        Ok(())
    }

    /// Queues an append.
    ///
    /// # Errors
    ///
    /// Fails if the payload copy cannot be rented.
    pub fn append_component(&self, entity: SceneEntity, component: ComponentId, payload: &[u8]) -> PoolResult<()> {
        let payload = self.pool.rent_copy(payload)?;
        self.queue
            .lock()
            .push(CrdtMessageKind::AppendComponent, entity, Some(component), payload);
        Ok(())
    }

    /// Queues an entity deletion.
    pub fn delete_entity(&self, entity: SceneEntity) {
        self.queue
            .lock()
            .push(CrdtMessageKind::DeleteEntity, entity, None, PooledBuffer::empty());
    }

    /// Number of queued writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().entries.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().entries.is_empty()
    }

    /// Copies the current queue for serialization.
    ///
    /// Only [`SerializationSyncBlock::commit`] removes anything from the
    /// queue, and only the entries this block copied.
    #[must_use]
    pub fn get_serialization_sync_block(&self) -> SerializationSyncBlock<'_> {
        let messages = self.queue.lock().entries.clone();
        let high_seq = messages.iter().map(|m| m.seq).max();
        SerializationSyncBlock {
            owner: self,
            messages,
            high_seq,
        }
    }
}

/// A copy of the queue taken for one serialization pass.
pub struct SerializationSyncBlock<'a> {
    owner: &'a OutgoingMessages,
    messages: Vec<PendingMessage>,
    high_seq: Option<u64>,
}

impl SerializationSyncBlock<'_> {
    /// The copied writes, in queue order.
    #[inline]
    #[must_use]
    pub fn messages(&self) -> &[PendingMessage] {
        &self.messages
    }

    /// Removes the copied writes from the queue.
    ///
    /// Writes queued or replaced after the copy stay queued.
    pub fn commit(self) {
        if let Some(high) = self.high_seq {
            self.owner.queue.lock().entries.retain(|entry| entry.seq > high);
        }
    }

    /// Removes only the first `count` copied writes from the queue.
    ///
    /// Used when serialization stops partway; the rest stay queued for the
    /// next pass.
    pub fn commit_prefix(self, count: usize) {
        let done: Vec<u64> = self.messages.iter().take(count).map(|m| m.seq).collect();
        if done.is_empty() {
            return;
        }
        self.owner.queue.lock().entries.retain(|entry| !done.contains(&entry.seq));
    }
}
