//! Component decoders.
//!
//! Maps component ids to functions that turn payload bytes into the
//! store's native values. Unregistered ids pass through as opaque bytes.

use std::collections::HashMap;

use meridian_core::{Component, ComponentId, ComponentValue, Transform, Visibility};

/// Decodes one payload. `None` means the bytes do not fit the component.
pub type ComponentDecoder = fn(&[u8]) -> Option<ComponentValue>;

/// Reads a `Pod` component from unaligned bytes of exactly its size.
fn decode_pod<C: Component>(bytes: &[u8]) -> Option<C> {
    bytemuck::try_pod_read_unaligned(bytes).ok()
}

fn decode_transform(bytes: &[u8]) -> Option<ComponentValue> {
    decode_pod::<Transform>(bytes).map(ComponentValue::Transform)
}

fn decode_visibility(bytes: &[u8]) -> Option<ComponentValue> {
    decode_pod::<Visibility>(bytes).map(ComponentValue::Visibility)
}

/// Component id to decoder table.
#[derive(Clone)]
pub struct ComponentRegistry {
    decoders: HashMap<ComponentId, ComponentDecoder>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Transform::ID, decode_transform);
        registry.register(Visibility::ID, decode_visibility);
        registry
    }
}

impl ComponentRegistry {
    /// A registry with no decoders; everything stays opaque.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registers (or replaces) the decoder for `component`.
    pub fn register(&mut self, component: ComponentId, decoder: ComponentDecoder) {
        self.decoders.insert(component, decoder);
    }

    /// Returns true if `component` has a decoder.
    #[must_use]
    pub fn is_registered(&self, component: ComponentId) -> bool {
        self.decoders.contains_key(&component)
    }

    /// Decodes a payload into a store value.
    #[must_use]
    pub fn decode(&self, component: ComponentId, bytes: &[u8]) -> Option<ComponentValue> {
        match self.decoders.get(&component) {
            Some(decoder) => decoder(bytes),
            None => Some(ComponentValue::Opaque {
                component,
                bytes: bytes.to_vec(),
            }),
        }
    }
}
