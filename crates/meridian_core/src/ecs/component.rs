//! # Component System
//!
//! Native components the world stores in dense arrays, plus the
//! [`ComponentValue`] sum type the synchronization bridge hands to the store.

use std::fmt;

use bytemuck::{Pod, Zeroable};

/// Component type identifier shared with scene scripts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ComponentId(pub u32);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Marker trait for natively stored components.
///
/// Components must be:
/// - `Copy`: No heap allocations, bitwise copyable
/// - `Pod`: Plain old data, decodable straight from wire bytes
/// - `Zeroable`: Can be safely zeroed
/// - `Default`: Must have a default value for pre-allocation
pub trait Component: Copy + Pod + Zeroable + Default + Send + Sync + 'static {
    /// Identifier the scene uses for this component.
    const ID: ComponentId;

    /// Bit in [`Entity::component_mask`](crate::Entity) (0-63).
    const SLOT: u8;
}

/// Transform component.
///
/// Local position, rotation and scale relative to `parent`
/// (0 means the scene root). 44 bytes, the exact payload size on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Transform {
    /// Position in parent space.
    pub position: [f32; 3],
    /// Rotation quaternion (x, y, z, w).
    pub rotation: [f32; 4],
    /// Scale per axis.
    pub scale: [f32; 3],
    /// Raw scene entity id of the parent.
    pub parent: u32,
}

impl Component for Transform {
    const ID: ComponentId = ComponentId(1);
    const SLOT: u8 = 0;
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    /// Origin, no rotation, unit scale, parented to the root.
    pub const IDENTITY: Self = Self {
        position: [0.0; 3],
        rotation: [0.0, 0.0, 0.0, 1.0],
        scale: [1.0; 3],
        parent: 0,
    };

    /// Creates a transform at `position` with identity rotation and scale.
    #[inline]
    #[must_use]
    pub const fn from_position(x: f32, y: f32, z: f32) -> Self {
        Self {
            position: [x, y, z],
            ..Self::IDENTITY
        }
    }
}

/// Visibility component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Visibility {
    /// Non-zero when the entity is rendered.
    pub visible: u32,
}

impl Component for Visibility {
    const ID: ComponentId = ComponentId(1081);
    const SLOT: u8 = 1;
}

impl Default for Visibility {
    fn default() -> Self {
        Self { visible: 1 }
    }
}

impl Visibility {
    /// Returns whether the entity is visible.
    #[inline]
    #[must_use]
    pub const fn is_visible(self) -> bool {
        self.visible != 0
    }
}

/// A decoded component ready to be written into a store.
#[derive(Clone, Debug, PartialEq)]
pub enum ComponentValue {
    /// Native transform.
    Transform(Transform),
    /// Native visibility flag.
    Visibility(Visibility),
    /// A component the store keeps as raw bytes.
    Opaque {
        /// Component id.
        component: ComponentId,
        /// Serialized value.
        bytes: Vec<u8>,
    },
}

impl ComponentValue {
    /// Returns the component id this value belongs to.
    #[must_use]
    pub fn component_id(&self) -> ComponentId {
        match self {
            Self::Transform(_) => Transform::ID,
            Self::Visibility(_) => Visibility::ID,
            Self::Opaque { component, .. } => *component,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_sizes() {
        assert_eq!(std::mem::size_of::<Transform>(), 44);
        assert_eq!(std::mem::size_of::<Visibility>(), 4);
    }

    #[test]
    fn test_component_value_ids() {
        assert_eq!(ComponentValue::Transform(Transform::IDENTITY).component_id(), ComponentId(1));
        assert_eq!(
            ComponentValue::Opaque { component: ComponentId(9), bytes: vec![1] }.component_id(),
            ComponentId(9)
        );
    }
}
