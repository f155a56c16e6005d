//! Component trait, type registry, and per-type storage.
//!
//! Components are user data records attached to at most one entity per type.
//! Values live in shared single-threaded cells (`Rc<RefCell<_>>`): the
//! per-type column holds one reference, and any index tracking the type holds
//! another, so index records always observe the component the world stores.
//!
//! Component identity is the Rust type, interned into a dense [`ComponentId`]
//! by the [`ComponentRegistry`].

use std::{
    any::{Any, TypeId, type_name},
    cell::{Ref, RefCell, RefMut},
    fmt,
    marker::PhantomData,
    rc::Rc,
};

use crate::{entity::Entity, error::EcsResult, sparse::SparseSet, world::World};

/// A data record attachable to entities.
///
/// The three lifecycle hooks default to no-ops. `added` and `removed` run
/// when the component is attached to or detached from an entity; `free` runs
/// during [`World::destroy`] after the entity has been scrubbed from every
/// storage and index, so it may safely call back into the world (including
/// destroying further entities).
pub trait Component: Any {
    /// Called after the component is attached to `entity`.
    fn added(&mut self, _entity: Entity) {}

    /// Called after the component is detached from `entity`.
    fn removed(&mut self, _entity: Entity) {}

    /// Called while `entity` is destroyed, after all storage cleanup.
    fn free(&mut self, _world: &mut World, _entity: Entity) {}
}

/// Shared reference to a type-erased component value.
pub type CompRef = Rc<RefCell<dyn Component>>;

/// Typed view over a [`CompRef`].
///
/// A handle is a strong reference: it keeps the component value alive even
/// after the world drops it. Borrows are checked at runtime.
pub struct Handle<T: Component> {
    cell: CompRef,
    _marker: PhantomData<T>,
}

impl<T: Component> Handle<T> {
    pub(crate) fn new(cell: CompRef) -> Self {
        debug_assert!(
            (&*cell.borrow() as &dyn Any).is::<T>(),
            "handle type does not match stored component"
        );
        Self {
            cell,
            _marker: PhantomData,
        }
    }

    /// Immutably borrow the component value.
    ///
    /// # Panics
    ///
    /// Panics if the value is mutably borrowed elsewhere.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, T> {
        Ref::map(self.cell.borrow(), |c| {
            let any: &dyn Any = c;
            any.downcast_ref::<T>().expect("component type mismatch")
        })
    }

    /// Mutably borrow the component value.
    ///
    /// # Panics
    ///
    /// Panics if the value is borrowed elsewhere.
    #[must_use]
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        RefMut::map(self.cell.borrow_mut(), |c| {
            let any: &mut dyn Any = c;
            any.downcast_mut::<T>().expect("component type mismatch")
        })
    }

    /// Check whether two handles refer to the same component value.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    /// The underlying type-erased reference.
    #[must_use]
    pub fn as_raw(&self) -> &CompRef {
        &self.cell
    }
}

impl<T: Component> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
            _marker: PhantomData,
        }
    }
}

impl<T: Component + fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&*self.borrow()).finish()
    }
}

/// Dense identifier for a registered component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u32);

impl ComponentId {
    /// Create a component id from a raw value.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

/// Metadata about a registered component type.
#[derive(Clone, Copy)]
pub struct ComponentInfo {
    id: ComponentId,
    type_name: &'static str,
}

impl ComponentInfo {
    /// The component id.
    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// The full Rust type name, for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Interns component types into dense [`ComponentId`]s.
#[derive(Default)]
pub struct ComponentRegistry {
    type_to_id: hashbrown::HashMap<TypeId, ComponentId>,
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component type, returning its id.
    ///
    /// Registration is idempotent: re-registering returns the existing id.
    pub fn register<T: Component>(&mut self) -> ComponentId {
        let type_id = TypeId::of::<T>();
        if let Some(&id) = self.type_to_id.get(&type_id) {
            return id;
        }
        let id = ComponentId(self.infos.len() as u32);
        self.type_to_id.insert(type_id, id);
        self.infos.push(ComponentInfo {
            id,
            type_name: type_name::<T>(),
        });
        id
    }

    /// Get the id of a type, if registered.
    #[must_use]
    pub fn get_id<T: Component>(&self) -> Option<ComponentId> {
        self.type_to_id.get(&TypeId::of::<T>()).copied()
    }

    /// Get the metadata for an id.
    ///
    /// # Panics
    ///
    /// Panics if the id was not issued by this registry.
    #[must_use]
    pub fn info(&self, id: ComponentId) -> &ComponentInfo {
        &self.infos[id.0 as usize]
    }

    /// Shorthand for the type name of an id.
    #[must_use]
    pub fn name(&self, id: ComponentId) -> &'static str {
        self.info(id).type_name
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Check if no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("count", &self.infos.len())
            .finish()
    }
}

/// Per-type component storage: a sparse set of entity keys with the
/// component values mirrored alongside the dense array.
///
/// Iteration order is the dense order, stable between mutations (removal
/// swaps the last pair into the hole).
#[derive(Default)]
pub(crate) struct ComponentColumn {
    keys: SparseSet,
    comps: Vec<CompRef>,
}

impl ComponentColumn {
    /// Attach a component under `key`. A later write for the same key wins.
    pub(crate) fn insert(&mut self, key: u32, comp: CompRef) -> EcsResult<()> {
        let index = self.keys.add(key)?;
        if index < self.comps.len() {
            self.comps[index] = comp;
        } else {
            debug_assert_eq!(index, self.comps.len());
            self.comps.push(comp);
        }
        Ok(())
    }

    pub(crate) fn get(&self, key: u32) -> Option<&CompRef> {
        self.keys.index_of(key).map(|index| &self.comps[index])
    }

    pub(crate) fn contains(&self, key: u32) -> bool {
        self.keys.contains(key)
    }

    /// Detach and return the component under `key`.
    pub(crate) fn remove(&mut self, key: u32) -> Option<CompRef> {
        let index = self.keys.index_of(key)?;
        self.keys.remove(key);
        Some(self.comps.swap_remove(index))
    }

    pub(crate) fn len(&self) -> usize {
        self.comps.len()
    }

    /// Iterate `(key, component)` pairs in dense order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (u32, &CompRef)> + '_ {
        self.keys.iter().zip(self.comps.iter())
    }
}

/// A set of components that can be attached to an entity in one call.
///
/// Implemented for tuples of up to eight components (and for `()`, the empty
/// bundle). Duplicate component types within one bundle are rejected by the
/// receiving world operation, not by the bundle itself.
pub trait Bundle {
    /// Register every component type and hand over the values.
    fn into_parts(self, registry: &mut ComponentRegistry, out: &mut Vec<(ComponentId, CompRef)>);
}

impl Bundle for () {
    fn into_parts(self, _registry: &mut ComponentRegistry, _out: &mut Vec<(ComponentId, CompRef)>) {}
}

macro_rules! impl_bundle {
    ($($name:ident),+) => {
        impl<$($name: Component),+> Bundle for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_parts(
                self,
                registry: &mut ComponentRegistry,
                out: &mut Vec<(ComponentId, CompRef)>,
            ) {
                let ($($name,)+) = self;
                $(out.push((registry.register::<$name>(), Rc::new(RefCell::new($name)) as CompRef));)+
            }
        }
    };
}

impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {}

    #[derive(Debug, PartialEq)]
    struct Velocity {
        x: f32,
        y: f32,
    }
    impl Component for Velocity {}

    fn cell<T: Component>(value: T) -> CompRef {
        Rc::new(RefCell::new(value))
    }

    #[test]
    fn test_registration_is_idempotent() {
        let mut registry = ComponentRegistry::new();
        let pos = registry.register::<Position>();
        let vel = registry.register::<Velocity>();
        assert_ne!(pos, vel);
        assert_eq!(registry.register::<Position>(), pos);
        assert_eq!(registry.get_id::<Position>(), Some(pos));
        assert_eq!(registry.len(), 2);
        assert!(registry.name(pos).ends_with("Position"));
    }

    #[test]
    fn test_handle_borrow_roundtrip() {
        let raw = cell(Position { x: 1.0, y: 2.0 });
        let handle: Handle<Position> = Handle::new(raw);
        assert_eq!(handle.borrow().x, 1.0);
        handle.borrow_mut().x = 5.0;
        assert_eq!(handle.borrow().x, 5.0);
        let other = handle.clone();
        assert!(handle.ptr_eq(&other));
    }

    #[test]
    fn test_column_insert_get_remove() {
        let mut column = ComponentColumn::default();
        column.insert(3, cell(Position { x: 1.0, y: 0.0 })).unwrap();
        column.insert(9, cell(Position { x: 2.0, y: 0.0 })).unwrap();
        assert!(column.contains(3));
        assert_eq!(column.len(), 2);

        let removed = column.remove(3).unwrap();
        let guard = removed.borrow();
        let any: &dyn Any = &*guard;
        assert_eq!(any.downcast_ref::<Position>().unwrap().x, 1.0);
        assert!(!column.contains(3));
        assert!(column.contains(9));
        assert!(column.remove(3).is_none());
    }

    #[test]
    fn test_column_later_write_wins() {
        let mut column = ComponentColumn::default();
        column.insert(4, cell(Position { x: 1.0, y: 0.0 })).unwrap();
        column.insert(4, cell(Position { x: 7.0, y: 0.0 })).unwrap();
        assert_eq!(column.len(), 1);
        let stored = column.get(4).unwrap();
        let guard = stored.borrow();
        let any: &dyn Any = &*guard;
        assert_eq!(any.downcast_ref::<Position>().unwrap().x, 7.0);
    }

    #[test]
    fn test_column_remove_keeps_pairing() {
        let mut column = ComponentColumn::default();
        for key in [1u32, 2, 3, 4] {
            column
                .insert(key, cell(Position { x: key as f32, y: 0.0 }))
                .unwrap();
        }
        column.remove(2);
        // Every surviving key still maps to its own component.
        for (key, comp) in column.iter() {
            let guard = comp.borrow();
            let any: &dyn Any = &*guard;
            assert_eq!(any.downcast_ref::<Position>().unwrap().x, key as f32);
        }
        assert_eq!(column.len(), 3);
    }

    #[test]
    fn test_bundle_extraction() {
        let mut registry = ComponentRegistry::new();
        let mut parts = Vec::new();
        (Position { x: 0.0, y: 0.0 }, Velocity { x: 1.0, y: 1.0 })
            .into_parts(&mut registry, &mut parts);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0, registry.get_id::<Position>().unwrap());
        assert_eq!(parts[1].0, registry.get_id::<Velocity>().unwrap());
    }
}
