//! Lattice ECS - sparse-set entity-component store with maintained indexes.
//!
//! An in-memory store for *entities* (numeric handles) carrying typed
//! *components*, with two query paths over them:
//!
//! - **Views** walk the component columns on every call.
//! - **Indexes** are precomputed record stores over every entity matching a
//!   type set, kept coherent by each mutation. A trie of type sets routes
//!   every entity change to exactly the indexes it affects, and reusable
//!   iterators expose coarse "membership changed" hints between passes.
//!
//! # Key Concepts
//!
//! - **Entity**: a numeric handle; ids are recycled through an interval pool
//! - **Component**: user data attached to at most one entity per type, with
//!   optional `added`/`removed`/`free` lifecycle hooks
//! - **Index**: a linearised `(entity, components...)` record store over one
//!   type set, iterated with a reusable cursor
//! - **Singleton**: a globally-unique component hosted on a reserved entity
//!
//! # Example
//!
//! ```
//! use lattice_ecs::{Component, IndexSpec, World};
//!
//! #[derive(Debug)]
//! struct Position { x: f32 }
//! impl Component for Position {}
//!
//! #[derive(Debug)]
//! struct Velocity { x: f32 }
//! impl Component for Velocity {}
//!
//! let mut world = World::new();
//! let e = world.create((Position { x: 0.0 }, Velocity { x: 1.0 }))?;
//!
//! let mut moving = world.index(
//!     IndexSpec::new().bind::<Position>("pos").bind::<Velocity>("vel"),
//! )?;
//! moving.start();
//! while moving.next() {
//!     let pos = moving.get::<Position>("pos").unwrap();
//!     let vel = moving.get::<Velocity>("vel").unwrap();
//!     pos.borrow_mut().x += vel.borrow().x;
//! }
//! assert_eq!(world.get::<Position>(e).unwrap().borrow().x, 1.0);
//! # Ok::<(), lattice_ecs::EcsError>(())
//! ```
//!
//! The store is single-threaded by contract: component values are shared
//! `Rc<RefCell<_>>` cells and nothing here locks.

mod component;
mod entity;
mod error;
mod index;
mod sparse;
mod trie;
mod view;
mod world;

pub use component::{Bundle, CompRef, Component, ComponentId, ComponentInfo, ComponentRegistry, Handle};
pub use entity::{Entity, EntityId, IdPool};
pub use error::{EcsError, EcsResult};
pub use index::{IndexBase, IndexIterator, IndexSpec};
pub use sparse::{MAX_CAPACITY, SparseSet};
pub use trie::{SubseqIter, Trie};
pub use view::{View, ViewTuple};
pub use world::{EntityTracker, World};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{Component, EcsError, EcsResult, Entity, Handle, IndexSpec, World};
}
