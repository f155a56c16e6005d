//! World - the container for entities, component storage, and indexes.
//!
//! The world owns one [`ComponentColumn`] per component type and routes every
//! entity/component mutation to the registered indexes whose type set the
//! entity matches. Matching is done with a subsequence walk over a trie of
//! sorted type-id sequences, so a mutation touches exactly the indexes it
//! affects.
//!
//! Everything here is single-threaded by contract: component values are
//! shared `Rc<RefCell<_>>` cells, and no operation suspends or locks.

use std::{any::type_name, cell::RefCell, fmt, rc::Rc};

use tracing::debug;

use crate::{
    component::{Bundle, CompRef, Component, ComponentColumn, ComponentId, ComponentRegistry, Handle},
    entity::{Entity, IdPool},
    error::{EcsError, EcsResult},
    index::{IndexBase, IndexIterator, IndexSpec},
    sparse::SparseSet,
    trie::{SubseqIter, Trie},
    view::{View, ViewTuple},
};

/// Observer for entity lifecycle events.
///
/// Both methods default to no-ops. The tracker is notified after an entity
/// joins the world (`create`/`insert`) and after it is fully removed
/// (`destroy`).
pub trait EntityTracker {
    /// An entity joined the world.
    fn entity_added(&mut self, _entity: Entity) {}

    /// An entity was destroyed.
    fn entity_removed(&mut self, _entity: Entity) {}
}

/// The ECS world.
pub struct World {
    /// Keys of live entities (the singleton slot included, once used).
    entities: SparseSet,
    ids: IdPool,
    registry: ComponentRegistry,
    columns: hashbrown::HashMap<ComponentId, ComponentColumn>,
    /// Sorted type-id sequence -> index, for subsequence matching.
    index_by_types: Trie<ComponentId, Rc<RefCell<IndexBase>>>,
    /// Component type -> indexes tracking it, for emplace/remove routing.
    indexes_by_component: hashbrown::HashMap<ComponentId, Vec<Rc<RefCell<IndexBase>>>>,
    /// Reusable subsequence walker; owns no borrows between calls.
    sub_iter: SubseqIter,
    // Scratch buffers, valid only within one public call and empty between
    // calls (including error exits).
    scratch_parts: Vec<(ComponentId, CompRef)>,
    scratch_types: Vec<ComponentId>,
    scratch_comps: Vec<CompRef>,
    scratch_indexes: Vec<Rc<RefCell<IndexBase>>>,
    tracker: Option<Box<dyn EntityTracker>>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

/// Gather `key`'s components in `types` order into `out`.
///
/// Leaves `out` empty and returns `false` when any type is missing.
fn gather_comps(
    columns: &hashbrown::HashMap<ComponentId, ComponentColumn>,
    types: &[ComponentId],
    key: u32,
    out: &mut Vec<CompRef>,
) -> bool {
    out.clear();
    for id in types {
        match columns.get(id).and_then(|column| column.get(key)) {
            Some(comp) => out.push(Rc::clone(comp)),
            None => {
                out.clear();
                return false;
            }
        }
    }
    true
}

/// Collect every index whose type set is a subsequence of `types`.
fn collect_matches(
    sub_iter: &mut SubseqIter,
    trie: &Trie<ComponentId, Rc<RefCell<IndexBase>>>,
    types: &[ComponentId],
    out: &mut Vec<Rc<RefCell<IndexBase>>>,
) {
    out.clear();
    sub_iter.reset();
    while let Some(base) = sub_iter.next(trie, types) {
        out.push(Rc::clone(base));
    }
}

fn adjacent_duplicate(types: &[ComponentId]) -> Option<ComponentId> {
    types
        .windows(2)
        .find(|pair| pair[0] == pair[1])
        .map(|pair| pair[0])
}

impl World {
    /// Create an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: SparseSet::new(),
            ids: IdPool::new(),
            registry: ComponentRegistry::new(),
            columns: hashbrown::HashMap::new(),
            index_by_types: Trie::new(),
            indexes_by_component: hashbrown::HashMap::new(),
            sub_iter: SubseqIter::new(),
            scratch_parts: Vec::new(),
            scratch_types: Vec::new(),
            scratch_comps: Vec::new(),
            scratch_indexes: Vec::new(),
            tracker: None,
        }
    }

    /// Create a world with room for entity ids below `entity_capacity`.
    #[must_use]
    pub fn with_capacity(entity_capacity: usize) -> Self {
        Self {
            entities: SparseSet::with_capacity(entity_capacity + 2),
            ..Self::new()
        }
    }

    /// Install an entity lifecycle observer, replacing any previous one.
    pub fn set_tracker(&mut self, tracker: Box<dyn EntityTracker>) {
        self.tracker = Some(tracker);
    }

    // ==================== Entity Operations ====================

    /// Create an entity carrying the bundle's components.
    ///
    /// # Errors
    ///
    /// [`EcsError::DuplicateComponentType`] when the bundle repeats a type
    /// (nothing is created in that case); [`EcsError::SparseSetOverflow`]
    /// when the id space is exhausted past the storage cap.
    pub fn create<B: Bundle>(&mut self, bundle: B) -> EcsResult<Entity> {
        debug_assert!(self.scratch_parts.is_empty());
        bundle.into_parts(&mut self.registry, &mut self.scratch_parts);

        self.scratch_types.clear();
        self.scratch_types
            .extend(self.scratch_parts.iter().map(|&(id, _)| id));
        self.scratch_types.sort_unstable();
        if let Some(dup) = adjacent_duplicate(&self.scratch_types) {
            let type_name = self.registry.name(dup);
            self.clear_scratch();
            return Err(EcsError::DuplicateComponentType {
                type_name,
                context: "create",
            });
        }

        let entity = self.ids.reserve();
        if let Err(err) = self.entities.add(entity.key()) {
            self.ids.release(entity.raw());
            self.clear_scratch();
            return Err(err);
        }

        for (id, comp) in &self.scratch_parts {
            comp.borrow_mut().added(entity);
            self.columns
                .entry(*id)
                .or_default()
                .insert(entity.key(), Rc::clone(comp))
                .expect("key accepted by the live set fits every column");
        }

        self.route_into_indexes(entity);
        if let Some(tracker) = &mut self.tracker {
            tracker.entity_added(entity);
        }
        self.clear_scratch();
        Ok(entity)
    }

    /// Create or extend an entity with a caller-supplied id.
    ///
    /// Components of types outside the bundle are preserved. If the entity
    /// did not exist, its id is carved out of the allocator's free space.
    ///
    /// # Errors
    ///
    /// Same as [`World::create`].
    ///
    /// # Panics
    ///
    /// Panics when `entity` is not a positive id (the sentinels and id 0
    /// cannot be inserted).
    pub fn insert<B: Bundle>(&mut self, entity: Entity, bundle: B) -> EcsResult<Entity> {
        assert!(entity.raw() > 0, "insert requires a positive entity id");
        debug_assert!(self.scratch_parts.is_empty());
        bundle.into_parts(&mut self.registry, &mut self.scratch_parts);

        self.scratch_types.clear();
        self.scratch_types
            .extend(self.scratch_parts.iter().map(|&(id, _)| id));
        self.scratch_types.sort_unstable();
        if let Some(dup) = adjacent_duplicate(&self.scratch_types) {
            let type_name = self.registry.name(dup);
            self.clear_scratch();
            return Err(EcsError::DuplicateComponentType {
                type_name,
                context: "insert",
            });
        }

        let newly_live = !self.entities.contains(entity.key());
        if newly_live {
            if let Err(err) = self.entities.add(entity.key()) {
                self.clear_scratch();
                return Err(err);
            }
            self.ids.reserve_exact(entity.raw());
        }

        for (id, comp) in &self.scratch_parts {
            comp.borrow_mut().added(entity);
            self.columns
                .entry(*id)
                .or_default()
                .insert(entity.key(), Rc::clone(comp))
                .expect("key accepted by the live set fits every column");
        }

        // Route with the union of existing and supplied types: an index over
        // {old, new} must see the entity even though only `new` was supplied.
        self.scratch_types.clear();
        for (&id, column) in &self.columns {
            if column.contains(entity.key()) {
                self.scratch_types.push(id);
            }
        }
        self.scratch_types.sort_unstable();
        self.route_into_indexes(entity);

        if newly_live {
            if let Some(tracker) = &mut self.tracker {
                tracker.entity_added(entity);
            }
        }
        self.clear_scratch();
        Ok(entity)
    }

    /// Destroy an entity, detaching all of its components.
    ///
    /// `removed` hooks run while the components are collected; `free` hooks
    /// run last, after the entity has vanished from every storage and index,
    /// so they may call back into the world (including further `destroy`s).
    ///
    /// Returns `false` when the entity was not alive.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        if entity.raw() < -2 || !self.entities.remove(entity.key()) {
            return false;
        }

        debug_assert!(self.scratch_types.is_empty());
        let mut freed: Vec<CompRef> = Vec::new();
        for (&id, column) in &mut self.columns {
            if let Some(comp) = column.remove(entity.key()) {
                comp.borrow_mut().removed(entity);
                self.scratch_types.push(id);
                freed.push(comp);
            }
        }
        self.scratch_types.sort_unstable();

        collect_matches(
            &mut self.sub_iter,
            &self.index_by_types,
            &self.scratch_types,
            &mut self.scratch_indexes,
        );
        for base in &self.scratch_indexes {
            base.borrow_mut().remove(entity);
        }

        if let Some(tracker) = &mut self.tracker {
            tracker.entity_removed(entity);
        }

        // Scratch must be clean before user hooks run: `free` may re-enter.
        self.clear_scratch();
        for comp in &freed {
            comp.borrow_mut().free(self, entity);
        }
        self.ids.release(entity.raw());
        true
    }

    /// Destroy every entity (running its hooks) and reset the id space.
    pub fn clear(&mut self) {
        debug!("clearing world: {} entities", self.entities.len());
        // Snapshot first: destroy edits the live set while we walk it.
        let live: Vec<u32> = self.entities.values().to_vec();
        for key in live {
            self.destroy(Entity::from_key(key));
        }
        self.ids.reset();
    }

    /// Check whether an entity is alive.
    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        entity.raw() >= -2 && self.entities.contains(entity.key())
    }

    /// Number of live entities (the singleton slot is not counted).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len() - usize::from(self.entities.contains(Entity::SINGLETON.key()))
    }

    /// Check whether no entities are alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over live entities (the singleton slot is skipped).
    pub fn all(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities
            .iter()
            .filter(|&key| key != Entity::SINGLETON.key())
            .map(Entity::from_key)
    }

    // ==================== Component Operations ====================

    /// Attach a component to a live entity.
    ///
    /// A component of the same type already on the entity is replaced. Every
    /// index tracking the type is updated; an entity that now satisfies an
    /// index it was missing from is promoted into it.
    ///
    /// # Errors
    ///
    /// [`EcsError::DeadEntity`] when the entity is not alive.
    pub fn emplace<T: Component>(&mut self, entity: Entity, component: T) -> EcsResult<()> {
        if !self.contains(entity) {
            return Err(EcsError::DeadEntity {
                type_name: type_name::<T>(),
                entity,
            });
        }
        let id = self.registry.register::<T>();
        let comp: CompRef = Rc::new(RefCell::new(component));
        self.columns
            .entry(id)
            .or_default()
            .insert(entity.key(), Rc::clone(&comp))?;
        comp.borrow_mut().added(entity);

        let type_name = self.registry.name(id);
        if let Some(bases) = self.indexes_by_component.get(&id) {
            for shared in bases {
                let mut base = shared.borrow_mut();
                if base.emplace(entity, id, type_name, &comp)? {
                    continue;
                }
                // The entity was not in this index; promote it if the other
                // required types are all present now.
                if gather_comps(&self.columns, base.types(), entity.key(), &mut self.scratch_comps)
                {
                    base.add(entity, &self.scratch_comps);
                }
                self.scratch_comps.clear();
            }
        }
        Ok(())
    }

    /// Detach and return a component.
    ///
    /// The entity leaves every index tracking the type. The `removed` hook
    /// runs; `free` does not (ownership passes to the caller). Returns
    /// `None` - never an error - when the entity or component is absent.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Option<Handle<T>> {
        if entity.raw() < -2 {
            return None;
        }
        let id = self.registry.get_id::<T>()?;
        let comp = self.columns.get_mut(&id)?.remove(entity.key())?;
        comp.borrow_mut().removed(entity);
        if let Some(bases) = self.indexes_by_component.get(&id) {
            for shared in bases {
                shared.borrow_mut().remove(entity);
            }
        }
        Some(Handle::new(comp))
    }

    /// Get a handle to an entity's component. O(1); never errors.
    #[must_use]
    pub fn get<T: Component>(&self, entity: Entity) -> Option<Handle<T>> {
        if entity.raw() < -2 {
            return None;
        }
        let id = self.registry.get_id::<T>()?;
        let comp = self.columns.get(&id)?.get(entity.key())?;
        Some(Handle::new(Rc::clone(comp)))
    }

    /// Check whether an entity carries a component type. O(1).
    #[must_use]
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        entity.raw() >= -2
            && self
                .registry
                .get_id::<T>()
                .and_then(|id| self.columns.get(&id))
                .is_some_and(|column| column.contains(entity.key()))
    }

    // ==================== Queries ====================

    /// Get a reusable iterator over every entity carrying the spec's types.
    ///
    /// The backing index is created and seeded on first use; equivalent
    /// specs share it, and it is kept coherent by every later mutation.
    /// Each call returns an independent iterator.
    ///
    /// # Errors
    ///
    /// [`EcsError::DuplicateComponentType`] when the spec repeats a type.
    pub fn index(&mut self, spec: IndexSpec) -> EcsResult<IndexIterator> {
        let resolved = spec.resolve(&mut self.registry)?;
        if let Some(base) = self.index_by_types.get(&resolved.types) {
            return Ok(IndexIterator::new(Rc::clone(base), resolved.fields));
        }

        debug!("registering index over {:?}", resolved.names);
        let base = Rc::new(RefCell::new(IndexBase::new(
            resolved.types.clone(),
            resolved.names,
        )));
        self.index_by_types.insert(&resolved.types, Rc::clone(&base));
        for &id in &resolved.types {
            self.indexes_by_component
                .entry(id)
                .or_default()
                .push(Rc::clone(&base));
        }

        // Seed from the current population.
        {
            let mut seed = base.borrow_mut();
            for key in self.entities.iter() {
                if gather_comps(&self.columns, seed.types(), key, &mut self.scratch_comps) {
                    seed.add(Entity::from_key(key), &self.scratch_comps);
                }
            }
        }
        self.scratch_comps.clear();
        debug!("index ready: seeded {} entities", base.borrow().len());
        Ok(IndexIterator::new(base, resolved.fields))
    }

    /// Get a callback-style view over every entity carrying the tuple's
    /// types.
    ///
    /// Views walk the storages on every call and are cheap to construct; use
    /// [`World::index`] for queries that run often.
    #[must_use]
    pub fn view<B: ViewTuple>(&self) -> View<'_, B> {
        View::new(self)
    }

    // ==================== Singleton API ====================

    /// Attach a globally-unique component (hosted on the reserved singleton
    /// entity, which joins the live set on first use).
    ///
    /// # Errors
    ///
    /// Propagates storage errors; never [`EcsError::DeadEntity`].
    pub fn register_singleton<T: Component>(&mut self, component: T) -> EcsResult<()> {
        if !self.entities.contains(Entity::SINGLETON.key()) {
            self.entities.add(Entity::SINGLETON.key())?;
        }
        self.emplace(Entity::SINGLETON, component)
    }

    /// Get a handle to a singleton component.
    #[must_use]
    pub fn get_singleton<T: Component>(&self) -> Option<Handle<T>> {
        self.get(Entity::SINGLETON)
    }

    /// Detach and return a singleton component.
    pub fn remove_singleton<T: Component>(&mut self) -> Option<Handle<T>> {
        self.remove(Entity::SINGLETON)
    }

    // ==================== Internals ====================

    /// Add `entity` to every index matching the sorted type list in
    /// `scratch_types`. Components are gathered per index in type order.
    fn route_into_indexes(&mut self, entity: Entity) {
        collect_matches(
            &mut self.sub_iter,
            &self.index_by_types,
            &self.scratch_types,
            &mut self.scratch_indexes,
        );
        for shared in &self.scratch_indexes {
            let mut base = shared.borrow_mut();
            if gather_comps(&self.columns, base.types(), entity.key(), &mut self.scratch_comps) {
                base.add(entity, &self.scratch_comps);
            }
        }
    }

    fn clear_scratch(&mut self) {
        self.scratch_parts.clear();
        self.scratch_types.clear();
        self.scratch_comps.clear();
        self.scratch_indexes.clear();
    }

    pub(crate) fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub(crate) fn column(&self, id: ComponentId) -> Option<&ComponentColumn> {
        self.columns.get(&id)
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.len())
            .field("component_types", &self.registry.len())
            .field("indexes", &self.index_by_types.len())
            .finish()
    }
}
