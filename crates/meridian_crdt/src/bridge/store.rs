//! # Entity Store Contract
//!
//! What the bridge needs from the store it writes into. The store owner
//! implements this trait; the bridge never reaches past it.
//!
//! ```text
//! meridian_crdt defines:        store owner implements:
//! ┌────────────────────┐        ┌─────────────────────────┐
//! │ trait EntityStore  │  ◀──   │ impl EntityStore for .. │
//! └────────────────────┘        └─────────────────────────┘
//! ```

use meridian_core::{ComponentId, ComponentValue, SceneEntity, StoreResult, World};

/// Mutation interface of an entity store.
///
/// Every call is made while the bridge holds the synchronization gate.
pub trait EntityStore: Send {
    /// Creates `entity`. Creating an alive entity is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the entity was destroyed or the store is full.
    fn create_entity(&mut self, entity: SceneEntity) -> StoreResult<()>;

    /// Returns true if `entity` is alive.
    fn is_alive(&self, entity: SceneEntity) -> bool;

    /// Replaces a component value.
    ///
    /// # Errors
    ///
    /// Fails if the entity is not alive.
    fn set_component(&mut self, entity: SceneEntity, value: ComponentValue) -> StoreResult<()>;

    /// Appends a component value.
    ///
    /// # Errors
    ///
    /// Fails if the entity is not alive.
    fn append_component(&mut self, entity: SceneEntity, value: ComponentValue) -> StoreResult<()>;

    /// Removes a component.
    ///
    /// # Errors
    ///
    /// Fails if the entity is not alive.
    fn remove_component(&mut self, entity: SceneEntity, component: ComponentId) -> StoreResult<()>;

    /// Destroys `entity` and every component on it.
    ///
    /// # Errors
    ///
    /// Fails if the entity is not alive.
    fn destroy_entity(&mut self, entity: SceneEntity) -> StoreResult<()>;
}

impl EntityStore for World {
    fn create_entity(&mut self, entity: SceneEntity) -> StoreResult<()> {
        self.spawn(entity).map(|_| ())
    }

    fn is_alive(&self, entity: SceneEntity) -> bool {
        World::is_alive(self, entity)
    }

    fn set_component(&mut self, entity: SceneEntity, value: ComponentValue) -> StoreResult<()> {
        World::set_component(self, entity, value)
    }

    fn append_component(&mut self, entity: SceneEntity, value: ComponentValue) -> StoreResult<()> {
        World::append_component(self, entity, value)
    }

    fn remove_component(&mut self, entity: SceneEntity, component: ComponentId) -> StoreResult<()> {
        World::remove_component(self, entity, component)
    }

    fn destroy_entity(&mut self, entity: SceneEntity) -> StoreResult<()> {
        self.despawn(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{Component, StoreError, Transform};

    fn store() -> Box<dyn EntityStore> {
        Box::new(World::new(16))
    }

    #[test]
    fn test_world_through_trait() {
        let mut store = store();
        let entity = SceneEntity::new(512, 0);

        store.create_entity(entity).unwrap();
        store.create_entity(entity).unwrap();
        assert!(store.is_alive(entity));

        store
            .set_component(entity, ComponentValue::Transform(Transform::IDENTITY))
            .unwrap();
        store.remove_component(entity, Transform::ID).unwrap();
        store.destroy_entity(entity).unwrap();

        assert!(!store.is_alive(entity));
        assert_eq!(store.create_entity(entity), Err(StoreError::EntityDestroyed(entity)));
    }
}
