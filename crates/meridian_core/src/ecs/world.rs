//! # ECS World
//!
//! The entity store scene state is synchronized into.
//! Entity slots and native component arrays are pre-allocated at creation.

use std::collections::{BTreeMap, HashMap};

use super::component::{Component, ComponentId, ComponentValue, Transform, Visibility};
use super::entity::{Entity, EntityId, SceneEntity};
use super::storage::ComponentStorage;
use crate::error::{StoreError, StoreResult};

/// The ECS World - container for all synchronized scene state.
///
/// Scene entities are mapped onto pre-allocated slots. Native components
/// (`Transform`, `Visibility`) live in dense arrays; every other component
/// is kept as opaque bytes keyed by slot.
///
/// A scene entity that has been destroyed stays destroyed: the world keeps
/// the highest destroyed version per entity number and refuses to spawn
/// that version or an older one again.
///
/// # Example
///
/// ```rust,ignore
/// let mut world = World::new(4096);
///
/// let entity = SceneEntity::new(512, 0);
/// world.spawn(entity)?;
/// world.set_component(entity, ComponentValue::Transform(Transform::IDENTITY))?;
/// ```
pub struct World {
    /// All entity slots (pre-allocated).
    pub entities: Box<[Entity]>,
    free_indices: Vec<u32>,
    alive_count: usize,
    capacity: usize,
    scene_index: HashMap<SceneEntity, EntityId>,
    destroyed: HashMap<u16, u16>,

    /// Transform component storage.
    pub transforms: ComponentStorage<Transform>,
    /// Visibility component storage.
    pub visibility: ComponentStorage<Visibility>,
    opaque: BTreeMap<(u32, ComponentId), Vec<u8>>,
    appended: BTreeMap<(u32, ComponentId), Vec<ComponentValue>>,
}

impl World {
    /// Creates a new world with the specified entity capacity.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero or exceeds `u32::MAX`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");
        assert!(
            u32::try_from(capacity).is_ok(),
            "Capacity cannot exceed u32::MAX"
        );

        let entities = (0..capacity)
            .map(|_| Entity::dead())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        #[allow(clippy::cast_possible_truncation)]
        let free_indices: Vec<u32> = (0..capacity as u32).rev().collect();

        Self {
            entities,
            free_indices,
            alive_count: 0,
            capacity,
            scene_index: HashMap::with_capacity(capacity),
            destroyed: HashMap::new(),
            transforms: ComponentStorage::new(capacity),
            visibility: ComponentStorage::new(capacity),
            opaque: BTreeMap::new(),
            appended: BTreeMap::new(),
        }
    }

    /// Returns the maximum capacity of this world.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of currently alive entities.
    #[inline]
    #[must_use]
    pub const fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// Returns the slot id of a live scene entity.
    #[inline]
    #[must_use]
    pub fn entity_id(&self, scene: SceneEntity) -> Option<EntityId> {
        self.scene_index.get(&scene).copied()
    }

    /// Checks if a scene entity is alive.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, scene: SceneEntity) -> bool {
        self.scene_index.contains_key(&scene)
    }

    /// Checks if a scene entity (or a newer version of its number) was destroyed.
    #[inline]
    #[must_use]
    pub fn is_destroyed(&self, scene: SceneEntity) -> bool {
        self.destroyed
            .get(&scene.number())
            .is_some_and(|&version| scene.version() <= version)
    }

    /// Spawns a scene entity into a free slot.
    ///
    /// Spawning an entity that is already alive returns its existing slot.
    ///
    /// # Errors
    ///
    /// [`StoreError::EntityDestroyed`] if the entity was destroyed before,
    /// [`StoreError::CapacityReached`] if no slot is free.
    pub fn spawn(&mut self, scene: SceneEntity) -> StoreResult<EntityId> {
        if let Some(id) = self.entity_id(scene) {
            return Ok(id);
        }
        if self.is_destroyed(scene) {
            return Err(StoreError::EntityDestroyed(scene));
        }

        let Some(index) = self.free_indices.pop() else {
            return Err(StoreError::CapacityReached {
                capacity: self.capacity,
            });
        };

        let entity = &mut self.entities[index as usize];

        // Increment generation to invalidate old references
        let generation = entity.id.generation().wrapping_add(1);
        let id = EntityId::new(index, generation);

        *entity = Entity::new(id, scene);
        self.alive_count += 1;
        self.scene_index.insert(scene, id);

        Ok(id)
    }

    /// Despawns a scene entity and drops all of its components.
    ///
    /// # Errors
    ///
    /// [`StoreError::EntityNotAlive`] if the entity is not alive.
    pub fn despawn(&mut self, scene: SceneEntity) -> StoreResult<()> {
        let id = self
            .scene_index
            .remove(&scene)
            .ok_or(StoreError::EntityNotAlive(scene))?;

        let index = id.index();
        let idx = index as usize;
        let entity = &mut self.entities[idx];
        entity.alive = false;
        entity.component_mask = 0;
        self.alive_count -= 1;
        self.free_indices.push(index);

        self.transforms.reset(idx);
        self.visibility.reset(idx);
        remove_slot(&mut self.opaque, index);
        remove_slot(&mut self.appended, index);

        let version = self.destroyed.entry(scene.number()).or_insert(scene.version());
        *version = (*version).max(scene.version());

        Ok(())
    }

    /// Writes a component, replacing any previous value.
    ///
    /// # Errors
    ///
    /// [`StoreError::EntityNotAlive`] if the entity is not alive.
    pub fn set_component(&mut self, scene: SceneEntity, value: ComponentValue) -> StoreResult<()> {
        let id = self.entity_id(scene).ok_or(StoreError::EntityNotAlive(scene))?;
        let index = id.index();
        let idx = index as usize;

        match value {
            ComponentValue::Transform(transform) => {
                self.transforms.set(idx, transform);
                self.entities[idx].add_component(Transform::SLOT);
            }
            ComponentValue::Visibility(visibility) => {
                self.visibility.set(idx, visibility);
                self.entities[idx].add_component(Visibility::SLOT);
            }
            ComponentValue::Opaque { component, bytes } => {
                self.opaque.insert((index, component), bytes);
            }
        }
        Ok(())
    }

    /// Appends a value to a component's append log.
    ///
    /// # Errors
    ///
    /// [`StoreError::EntityNotAlive`] if the entity is not alive.
    pub fn append_component(&mut self, scene: SceneEntity, value: ComponentValue) -> StoreResult<()> {
        let id = self.entity_id(scene).ok_or(StoreError::EntityNotAlive(scene))?;
        self.appended
            .entry((id.index(), value.component_id()))
            .or_default()
            .push(value);
        Ok(())
    }

    /// Removes a component from an entity.
    ///
    /// # Errors
    ///
    /// [`StoreError::EntityNotAlive`] if the entity is not alive.
    pub fn remove_component(&mut self, scene: SceneEntity, component: ComponentId) -> StoreResult<()> {
        let id = self.entity_id(scene).ok_or(StoreError::EntityNotAlive(scene))?;
        let index = id.index();
        let idx = index as usize;

        if component == Transform::ID {
            self.transforms.reset(idx);
            self.entities[idx].remove_component(Transform::SLOT);
        } else if component == Visibility::ID {
            self.visibility.reset(idx);
            self.entities[idx].remove_component(Visibility::SLOT);
        } else {
            self.opaque.remove(&(index, component));
        }
        self.appended.remove(&(index, component));
        Ok(())
    }

    /// Returns an entity's transform, if it has one.
    #[must_use]
    pub fn transform(&self, scene: SceneEntity) -> Option<Transform> {
        self.native::<Transform>(scene, &self.transforms)
    }

    /// Returns an entity's visibility, if it has one.
    #[must_use]
    pub fn visibility(&self, scene: SceneEntity) -> Option<Visibility> {
        self.native::<Visibility>(scene, &self.visibility)
    }

    /// Returns the raw bytes of an opaque component.
    #[must_use]
    pub fn opaque(&self, scene: SceneEntity, component: ComponentId) -> Option<&[u8]> {
        let id = self.entity_id(scene)?;
        self.opaque.get(&(id.index(), component)).map(Vec::as_slice)
    }

    /// Returns the values appended to a component since the last drain.
    #[must_use]
    pub fn appended(&self, scene: SceneEntity, component: ComponentId) -> &[ComponentValue] {
        self.entity_id(scene)
            .and_then(|id| self.appended.get(&(id.index(), component)))
            .map_or(&[][..], Vec::as_slice)
    }

    /// Takes the values appended to a component, leaving the log empty.
    pub fn drain_appended(&mut self, scene: SceneEntity, component: ComponentId) -> Vec<ComponentValue> {
        self.entity_id(scene)
            .and_then(|id| self.appended.remove(&(id.index(), component)))
            .unwrap_or_default()
    }

    /// Iterates over all alive entities.
    pub fn iter_alive(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.alive)
    }

    fn native<C: Component>(&self, scene: SceneEntity, storage: &ComponentStorage<C>) -> Option<C> {
        let id = self.entity_id(scene)?;
        let idx = id.index() as usize;
        if !self.entities[idx].has_component(C::SLOT) {
            return None;
        }
        storage.get(idx).copied()
    }
}

fn remove_slot<V>(map: &mut BTreeMap<(u32, ComponentId), V>, index: u32) {
    let keys: Vec<_> = map
        .range((index, ComponentId(0))..=(index, ComponentId(u32::MAX)))
        .map(|(key, _)| *key)
        .collect();
    for key in keys {
        map.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_creation() {
        let world = World::new(1000);
        assert_eq!(world.capacity(), 1000);
        assert_eq!(world.alive_count(), 0);
    }

    #[test]
    fn test_spawn_despawn() {
        let mut world = World::new(100);
        let a = SceneEntity::new(512, 0);
        let b = SceneEntity::new(513, 0);

        let id_a = world.spawn(a).unwrap();
        assert!(world.is_alive(a));
        assert_eq!(world.spawn(a).unwrap(), id_a);
        assert_eq!(world.alive_count(), 1);

        world.spawn(b).unwrap();
        assert_eq!(world.alive_count(), 2);

        world.despawn(a).unwrap();
        assert!(!world.is_alive(a));
        assert!(world.is_destroyed(a));
        assert_eq!(world.alive_count(), 1);

        // Slot reuse bumps the generation
        let c = SceneEntity::new(514, 0);
        let id_c = world.spawn(c).unwrap();
        assert_eq!(id_c.index(), id_a.index());
        assert_ne!(id_c.generation(), id_a.generation());
    }

    #[test]
    fn test_destroyed_entity_cannot_respawn() {
        let mut world = World::new(10);
        let old = SceneEntity::new(600, 2);

        world.spawn(old).unwrap();
        world.despawn(old).unwrap();

        assert_eq!(world.spawn(old), Err(StoreError::EntityDestroyed(old)));
        assert_eq!(
            world.spawn(SceneEntity::new(600, 1)),
            Err(StoreError::EntityDestroyed(SceneEntity::new(600, 1)))
        );
        assert!(world.spawn(SceneEntity::new(600, 3)).is_ok());
    }

    #[test]
    fn test_capacity_reached() {
        let mut world = World::new(1);
        world.spawn(SceneEntity::new(1, 0)).unwrap();
        assert_eq!(
            world.spawn(SceneEntity::new(2, 0)),
            Err(StoreError::CapacityReached { capacity: 1 })
        );
    }

    #[test]
    fn test_components() {
        let mut world = World::new(10);
        let e = SceneEntity::new(700, 0);
        world.spawn(e).unwrap();

        assert!(world.transform(e).is_none());
        world
            .set_component(e, ComponentValue::Transform(Transform::from_position(1.0, 2.0, 3.0)))
            .unwrap();
        assert_eq!(world.transform(e).unwrap().position, [1.0, 2.0, 3.0]);

        let opaque = ComponentId(1018);
        world
            .set_component(e, ComponentValue::Opaque { component: opaque, bytes: vec![1, 2] })
            .unwrap();
        assert_eq!(world.opaque(e, opaque), Some(&[1u8, 2][..]));

        world.remove_component(e, Transform::ID).unwrap();
        assert!(world.transform(e).is_none());
        world.remove_component(e, opaque).unwrap();
        assert!(world.opaque(e, opaque).is_none());
    }

    #[test]
    fn test_append_log() {
        let mut world = World::new(10);
        let e = SceneEntity::new(700, 0);
        let results = ComponentId(1063);
        world.spawn(e).unwrap();

        for i in 0..3u8 {
            world
                .append_component(e, ComponentValue::Opaque { component: results, bytes: vec![i] })
                .unwrap();
        }
        assert_eq!(world.appended(e, results).len(), 3);

        let drained = world.drain_appended(e, results);
        assert_eq!(drained.len(), 3);
        assert!(world.appended(e, results).is_empty());
    }

    #[test]
    fn test_writes_to_dead_entity_fail() {
        let mut world = World::new(10);
        let e = SceneEntity::new(800, 0);
        assert_eq!(
            world.set_component(e, ComponentValue::Visibility(Visibility::default())),
            Err(StoreError::EntityNotAlive(e))
        );
        assert_eq!(world.despawn(e), Err(StoreError::EntityNotAlive(e)));
    }

    #[test]
    fn test_despawn_clears_components() {
        let mut world = World::new(10);
        let e = SceneEntity::new(900, 0);
        let opaque = ComponentId(1017);
        world.spawn(e).unwrap();
        world
            .set_component(e, ComponentValue::Opaque { component: opaque, bytes: vec![9] })
            .unwrap();
        world.despawn(e).unwrap();

        let fresh = SceneEntity::new(901, 0);
        world.spawn(fresh).unwrap();
        assert!(world.opaque(fresh, opaque).is_none());
        assert!(world.transform(fresh).is_none());
    }
}
