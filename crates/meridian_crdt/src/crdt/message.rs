//! # CRDT Messages
//!
//! The atomic unit of scene state change, and the per-message outcome the
//! protocol engine reports.
//!
//! ## Wire Shape
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │ Header (8 bytes): length u32 │ kind u32                            │
//! ├────────────────────────────────────────────────────────────────────┤
//! │ Put/Append (16 + n): entity │ component │ timestamp │ len │ payload │
//! │ DeleteEntity (4):    entity                                        │
//! └────────────────────────────────────────────────────────────────────┘
//! ```

use meridian_core::{ComponentId, PoolResult, PooledBuffer, SceneEntity};

/// Bytes in every record header (length + kind).
pub const HEADER_LEN: usize = 8;

/// Fixed bytes in a component record body (before the payload).
pub const COMPONENT_BODY_LEN: usize = 16;

/// Bytes in a delete-entity record body.
pub const DELETE_BODY_LEN: usize = 4;

/// Message kind as carried in the record header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CrdtMessageKind {
    /// Replace a component's value.
    PutComponent = 1,
    /// Delete an entity and every component on it.
    DeleteEntity = 2,
    /// Append a value to a component.
    AppendComponent = 4,
}

impl CrdtMessageKind {
    /// Returns the wire tag.
    #[inline]
    #[must_use]
    pub const fn tag(self) -> u32 {
        self as u32
    }

    /// Parses a wire tag.
    #[inline]
    #[must_use]
    pub const fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(Self::PutComponent),
            2 => Some(Self::DeleteEntity),
            4 => Some(Self::AppendComponent),
            _ => None,
        }
    }
}

/// Body shared by put and append messages.
#[derive(Debug, PartialEq, Eq)]
pub struct ComponentMessage {
    /// Target entity.
    pub entity: SceneEntity,
    /// Target component.
    pub component: ComponentId,
    /// Logical per-(entity, component) counter.
    pub timestamp: u32,
    /// Serialized component value. Empty clears the component.
    pub payload: PooledBuffer,
}

impl ComponentMessage {
    /// Copies the message, renting a fresh payload buffer.
    ///
    /// # Errors
    ///
    /// Propagates the pool's rent failure.
    pub fn try_clone(&self) -> PoolResult<Self> {
        Ok(Self {
            entity: self.entity,
            component: self.component,
            timestamp: self.timestamp,
            payload: self.payload.try_clone()?,
        })
    }
}

/// A CRDT message.
#[derive(Debug, PartialEq, Eq)]
pub enum CrdtMessage {
    /// Last-writer-wins replace.
    PutComponent(ComponentMessage),
    /// Last-writer-wins append; stored like a put, reported as an append.
    AppendComponent(ComponentMessage),
    /// Entity deletion. Always wins over component writes.
    DeleteEntity {
        /// Entity to delete.
        entity: SceneEntity,
    },
}

impl CrdtMessage {
    /// Builds a put message.
    #[must_use]
    pub fn put(entity: SceneEntity, component: ComponentId, timestamp: u32, payload: PooledBuffer) -> Self {
        Self::PutComponent(ComponentMessage {
            entity,
            component,
            timestamp,
            payload,
        })
    }

    /// Builds an append message.
    #[must_use]
    pub fn append(entity: SceneEntity, component: ComponentId, timestamp: u32, payload: PooledBuffer) -> Self {
        Self::AppendComponent(ComponentMessage {
            entity,
            component,
            timestamp,
            payload,
        })
    }

    /// Builds a delete-entity message.
    #[must_use]
    pub const fn delete_entity(entity: SceneEntity) -> Self {
        Self::DeleteEntity { entity }
    }

    /// Returns the message kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> CrdtMessageKind {
        match self {
            Self::PutComponent(_) => CrdtMessageKind::PutComponent,
            Self::AppendComponent(_) => CrdtMessageKind::AppendComponent,
            Self::DeleteEntity { .. } => CrdtMessageKind::DeleteEntity,
        }
    }

    /// Returns the target entity.
    #[inline]
    #[must_use]
    pub const fn entity(&self) -> SceneEntity {
        match self {
            Self::PutComponent(body) | Self::AppendComponent(body) => body.entity,
            Self::DeleteEntity { entity } => *entity,
        }
    }

    /// Returns the component body for put and append messages.
    #[inline]
    #[must_use]
    pub const fn component_body(&self) -> Option<&ComponentMessage> {
        match self {
            Self::PutComponent(body) | Self::AppendComponent(body) => Some(body),
            Self::DeleteEntity { .. } => None,
        }
    }

    /// Returns the payload bytes (empty for deletes).
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.component_body().map_or(&[][..], |body| body.payload.as_slice())
    }

    /// Bytes this message occupies on the wire, header included.
    #[inline]
    #[must_use]
    pub fn data_length(&self) -> usize {
        HEADER_LEN
            + match self {
                Self::PutComponent(body) | Self::AppendComponent(body) => {
                    COMPONENT_BODY_LEN + body.payload.len()
                }
                Self::DeleteEntity { .. } => DELETE_BODY_LEN,
            }
    }

    /// Copies the message, renting a fresh payload buffer.
    ///
    /// # Errors
    ///
    /// Propagates the pool's rent failure.
    pub fn try_clone(&self) -> PoolResult<Self> {
        Ok(match self {
            Self::PutComponent(body) => Self::PutComponent(body.try_clone()?),
            Self::AppendComponent(body) => Self::AppendComponent(body.try_clone()?),
            Self::DeleteEntity { entity } => Self::DeleteEntity { entity: *entity },
        })
    }
}

/// A message paired with its serialized length, for presizing output.
#[derive(Debug, PartialEq, Eq)]
pub struct ProcessedCrdtMessage {
    /// The message.
    pub message: CrdtMessage,
    /// Bytes it occupies on the wire.
    pub data_length: usize,
}

impl ProcessedCrdtMessage {
    /// Wraps a message, computing its length.
    #[must_use]
    pub fn new(message: CrdtMessage) -> Self {
        let data_length = message.data_length();
        Self {
            message,
            data_length,
        }
    }
}

/// Whether processing a message changed canonical state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateChange {
    /// Canonical state changed.
    StateUpdated,
    /// Message was stale, duplicated, tombstoned or invalid.
    NoChange,
}

/// What a processed message means for the entity store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconciliationEffect {
    /// Component value replaced (or cleared, when the payload is empty).
    ComponentModified,
    /// Component value appended.
    ComponentAppended,
    /// Entity and all its components removed.
    EntityDeleted,
    /// Nothing to propagate.
    NoOp,
}

/// Outcome of processing one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconciliationResult {
    /// State change classification.
    pub change: StateChange,
    /// Effect to propagate downstream.
    pub effect: ReconciliationEffect,
}

impl ReconciliationResult {
    /// The outcome for a rejected message.
    pub const NO_CHANGE: Self = Self {
        change: StateChange::NoChange,
        effect: ReconciliationEffect::NoOp,
    };

    /// An accepted message with the given effect.
    #[inline]
    #[must_use]
    pub const fn updated(effect: ReconciliationEffect) -> Self {
        Self {
            change: StateChange::StateUpdated,
            effect,
        }
    }

    /// Returns true if canonical state changed.
    #[inline]
    #[must_use]
    pub const fn is_updated(self) -> bool {
        matches!(self.change, StateChange::StateUpdated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{BufferPool, PoolConfig};

    #[test]
    fn test_kind_tags() {
        for kind in [
            CrdtMessageKind::PutComponent,
            CrdtMessageKind::DeleteEntity,
            CrdtMessageKind::AppendComponent,
        ] {
            assert_eq!(CrdtMessageKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(CrdtMessageKind::from_tag(3), None);
    }

    #[test]
    fn test_data_length() {
        let pool = BufferPool::new(PoolConfig::default());
        let put = CrdtMessage::put(
            SceneEntity::new(512, 0),
            ComponentId(1),
            0,
            pool.rent_copy(&[1, 2, 3]).unwrap(),
        );
        assert_eq!(put.data_length(), HEADER_LEN + COMPONENT_BODY_LEN + 3);

        let delete = CrdtMessage::delete_entity(SceneEntity::new(512, 0));
        assert_eq!(delete.data_length(), 12);
        assert!(delete.payload().is_empty());
        assert_eq!(ProcessedCrdtMessage::new(delete).data_length, 12);
    }
}
