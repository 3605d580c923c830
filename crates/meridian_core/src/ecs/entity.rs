//! # Entity Management
//!
//! Two identifiers live side by side:
//! - [`SceneEntity`]: the id a scene script uses on the wire
//! - [`EntityId`]: the slot in the world's pre-allocated arrays

use std::fmt;

/// Entity identifier inside a scene's entity space.
///
/// The id is split into two parts:
/// - Lower 16 bits: entity number
/// - Upper 16 bits: version, bumped when a scene reuses a deleted number
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SceneEntity(u32);

impl SceneEntity {
    /// Creates a scene entity from number and version.
    #[inline]
    #[must_use]
    pub const fn new(number: u16, version: u16) -> Self {
        Self(((version as u32) << 16) | (number as u32))
    }

    /// Wraps a raw wire value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw wire value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns the entity number.
    #[inline]
    #[must_use]
    pub const fn number(self) -> u16 {
        self.0 as u16
    }

    /// Returns the version.
    #[inline]
    #[must_use]
    pub const fn version(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl fmt::Display for SceneEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.number(), self.version())
    }
}

/// Slot identifier for an entity in the [`World`](crate::World).
///
/// The ID is split into two parts:
/// - Lower 32 bits: Index into component arrays
/// - Upper 32 bits: Generation counter for detecting stale references
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Creates a new entity ID from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Null/invalid entity ID.
    pub const NULL: Self = Self(u64::MAX);

    /// Checks if this entity ID is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

/// An entity slot and the native components attached to it.
#[derive(Clone, Copy, Debug)]
pub struct Entity {
    /// Slot identifier.
    pub id: EntityId,
    /// The scene entity occupying this slot.
    pub scene: SceneEntity,
    /// Bitmask of attached native components (one bit per slot).
    pub component_mask: u64,
    /// Whether this entity slot is currently alive.
    pub alive: bool,
}

impl Entity {
    /// Creates a live entity.
    #[inline]
    #[must_use]
    pub const fn new(id: EntityId, scene: SceneEntity) -> Self {
        Self {
            id,
            scene,
            component_mask: 0,
            alive: true,
        }
    }

    /// Creates a dead/empty entity slot.
    #[inline]
    #[must_use]
    pub const fn dead() -> Self {
        Self {
            id: EntityId::NULL,
            scene: SceneEntity(0),
            component_mask: 0,
            alive: false,
        }
    }

    /// Checks if this entity has the component in `slot` (0-63).
    #[inline]
    #[must_use]
    pub const fn has_component(self, slot: u8) -> bool {
        (self.component_mask & (1 << slot)) != 0
    }

    /// Sets the flag for `slot`.
    #[inline]
    pub fn add_component(&mut self, slot: u8) {
        self.component_mask |= 1 << slot;
    }

    /// Clears the flag for `slot`.
    #[inline]
    pub fn remove_component(&mut self, slot: u8) {
        self.component_mask &= !(1 << slot);
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::dead()
    }
}
