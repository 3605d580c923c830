//! # Entity Component System
//!
//! The concrete entity store scene state is synchronized into.
//!
//! ## Design Philosophy
//!
//! - Entity slots and native component arrays are pre-allocated
//! - Native components are `Pod` and decode straight from payload bytes
//! - Scene entity ids map onto slot ids with generation counters

mod component;
mod entity;
mod storage;
mod world;

pub use component::{Component, ComponentId, ComponentValue, Transform, Visibility};
pub use entity::{Entity, EntityId, SceneEntity};
pub use storage::ComponentStorage;
pub use world::World;
