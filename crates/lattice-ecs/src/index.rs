//! Multi-component indexes and their iterators.
//!
//! An [`IndexBase`] is a linearised record store over every entity whose
//! component set is a superset of the index's type set. Records are kept in
//! stable rows: removal tombstones a row instead of swapping, so a cursor
//! that is mid-walk never skips or repeats surviving records, and vacated
//! rows are recycled before the store grows. Coarse add/remove version
//! counters let iterators cheaply ask "did membership change since I last
//! looked?".
//!
//! [`IndexSpec`] is the user-facing description of an index: a list of
//! component types, each either *bound* to an alias (exposed on the
//! iterator) or merely *required* (the entity must carry the type, but no
//! field is exposed).

use std::{any::type_name, cell::RefCell, fmt, rc::Rc};

use smallvec::SmallVec;

use crate::{
    component::{CompRef, Component, ComponentId, ComponentRegistry, Handle},
    entity::Entity,
    error::{EcsError, EcsResult},
};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Exposure {
    Bound,
    Witness,
}

struct Term {
    alias: &'static str,
    type_name: &'static str,
    register: fn(&mut ComponentRegistry) -> ComponentId,
    exposure: Exposure,
}

/// Description of an index: which component types an entity must carry, and
/// which of them are exposed through the iterator.
#[derive(Default)]
pub struct IndexSpec {
    terms: Vec<Term>,
}

impl IndexSpec {
    /// Create an empty spec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require component `T` and expose it under `alias`.
    #[must_use]
    pub fn bind<T: Component>(mut self, alias: &'static str) -> Self {
        self.terms.push(Term {
            alias,
            type_name: type_name::<T>(),
            register: |registry| registry.register::<T>(),
            exposure: Exposure::Bound,
        });
        self
    }

    /// Require component `T` without exposing a field for it.
    #[must_use]
    pub fn require<T: Component>(mut self) -> Self {
        self.terms.push(Term {
            alias: type_name::<T>(),
            type_name: type_name::<T>(),
            register: |registry| registry.register::<T>(),
            exposure: Exposure::Witness,
        });
        self
    }

    /// Sort the terms by component id and reject duplicates.
    pub(crate) fn resolve(self, registry: &mut ComponentRegistry) -> EcsResult<ResolvedSpec> {
        let ordered: Vec<(ComponentId, Term)> = self
            .terms
            .into_iter()
            .map(|term| ((term.register)(registry), term))
            .collect();

        let mut types: SmallVec<[ComponentId; 8]> =
            ordered.iter().map(|&(id, _)| id).collect();
        types.sort_unstable();
        for pair in types.windows(2) {
            if pair[0] == pair[1] {
                return Err(EcsError::DuplicateComponentType {
                    type_name: registry.name(pair[0]),
                    context: "index",
                });
            }
        }

        let names: SmallVec<[&'static str; 8]> = types
            .iter()
            .map(|&id| registry.name(id))
            .collect();

        // Bound aliases keep the caller's order; each maps to its slot in
        // the sorted type list.
        let fields: Vec<(&'static str, usize)> = ordered
            .iter()
            .filter(|(_, term)| term.exposure == Exposure::Bound)
            .map(|(id, term)| {
                let pos = types.iter().position(|t| t == id).expect("id from own terms");
                (term.alias, pos)
            })
            .collect();

        Ok(ResolvedSpec {
            types,
            names,
            fields,
        })
    }
}

/// An [`IndexSpec`] after type registration, sorting, and duplicate checks.
#[derive(Debug)]
pub(crate) struct ResolvedSpec {
    pub(crate) types: SmallVec<[ComponentId; 8]>,
    pub(crate) names: SmallVec<[&'static str; 8]>,
    pub(crate) fields: Vec<(&'static str, usize)>,
}

/// One live record: the entity plus its components in index type order.
struct IndexRecord {
    entity: Entity,
    comps: SmallVec<[CompRef; 4]>,
}

/// Linearised record store over entities matching one type set.
pub struct IndexBase {
    /// Required component types, sorted, unique.
    types: SmallVec<[ComponentId; 8]>,
    /// Type names parallel to `types`, for diagnostics.
    names: SmallVec<[&'static str; 8]>,
    /// Record rows; `None` is a tombstone left by removal.
    rows: Vec<Option<IndexRecord>>,
    /// Entity key to row.
    row_by_entity: hashbrown::HashMap<u32, usize>,
    /// Tombstoned rows available for reuse.
    free_rows: Vec<usize>,
    add_ver: u32,
    rem_ver: u32,
    add_armed: bool,
    rem_armed: bool,
}

impl IndexBase {
    pub(crate) fn new(types: SmallVec<[ComponentId; 8]>, names: SmallVec<[&'static str; 8]>) -> Self {
        debug_assert_eq!(types.len(), names.len());
        debug_assert!(types.windows(2).all(|pair| pair[0] < pair[1]));
        Self {
            types,
            names,
            rows: Vec::new(),
            row_by_entity: hashbrown::HashMap::new(),
            free_rows: Vec::new(),
            add_ver: 0,
            rem_ver: 0,
            add_armed: false,
            rem_armed: false,
        }
    }

    /// The required component types (sorted).
    #[must_use]
    pub fn types(&self) -> &[ComponentId] {
        &self.types
    }

    /// Type names parallel to [`IndexBase::types`].
    #[must_use]
    pub fn type_names(&self) -> &[&'static str] {
        &self.names
    }

    /// Number of entities currently in the index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.row_by_entity.len()
    }

    /// Check if no entities are in the index.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.row_by_entity.is_empty()
    }

    /// Check if an entity is in the index.
    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.row_by_entity.contains_key(&entity.key())
    }

    /// Insert or refresh the record for `entity`.
    ///
    /// `comps` must hold the entity's components in the order of
    /// [`IndexBase::types`]. An existing row is rewritten in place; otherwise
    /// a tombstoned row is reused before the store grows.
    pub(crate) fn add(&mut self, entity: Entity, comps: &[CompRef]) {
        debug_assert_eq!(comps.len(), self.types.len());
        let record = IndexRecord {
            entity,
            comps: comps.iter().cloned().collect(),
        };
        if let Some(&row) = self.row_by_entity.get(&entity.key()) {
            self.rows[row] = Some(record);
        } else if let Some(row) = self.free_rows.pop() {
            debug_assert!(self.rows[row].is_none());
            self.rows[row] = Some(record);
            self.row_by_entity.insert(entity.key(), row);
        } else {
            self.rows.push(Some(record));
            self.row_by_entity.insert(entity.key(), self.rows.len() - 1);
        }
        if self.add_armed {
            self.add_ver = self.add_ver.wrapping_add(1);
            self.add_armed = false;
        }
    }

    /// Overwrite one component slot of an existing record.
    ///
    /// Returns `Ok(false)` when the entity is not (yet) in the index; the
    /// caller decides whether it can now be promoted via [`IndexBase::add`].
    ///
    /// # Errors
    ///
    /// [`EcsError::TypeNotInIndex`] when `type_id` is not one of this
    /// index's types.
    pub(crate) fn emplace(
        &mut self,
        entity: Entity,
        type_id: ComponentId,
        type_name: &'static str,
        comp: &CompRef,
    ) -> EcsResult<bool> {
        let Some(pos) = self.types.iter().position(|&t| t == type_id) else {
            return Err(EcsError::TypeNotInIndex {
                type_name,
                index_types: self.names.to_vec(),
            });
        };
        let Some(&row) = self.row_by_entity.get(&entity.key()) else {
            return Ok(false);
        };
        let record = self.rows[row].as_mut().expect("mapped row is live");
        record.comps[pos] = comp.clone();
        Ok(true)
    }

    /// Tombstone the record for `entity`.
    ///
    /// Returns `false` when the entity is not in the index. The row is kept
    /// in place (so in-progress cursors stay valid) and queued for reuse.
    pub(crate) fn remove(&mut self, entity: Entity) -> bool {
        let Some(row) = self.row_by_entity.remove(&entity.key()) else {
            return false;
        };
        self.rows[row] = None;
        self.free_rows.push(row);
        if self.rem_armed {
            self.rem_ver = self.rem_ver.wrapping_add(1);
            self.rem_armed = false;
        }
        true
    }

    /// Read the add-version counter and arm it so the next add bumps it.
    pub(crate) fn observe_add_ver(&mut self) -> u32 {
        self.add_armed = true;
        self.add_ver
    }

    /// Read the remove-version counter and arm it so the next removal bumps it.
    pub(crate) fn observe_rem_ver(&mut self) -> u32 {
        self.rem_armed = true;
        self.rem_ver
    }
}

impl fmt::Debug for IndexBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexBase")
            .field("types", &self.names)
            .field("len", &self.len())
            .field("rows", &self.rows.len())
            .finish()
    }
}

/// Reusable cursor over an [`IndexBase`].
///
/// Iteration idiom:
///
/// ```ignore
/// let mut it = world.index(IndexSpec::new().bind::<Pos>("pos").require::<Alive>())?;
/// it.start();
/// while it.next() {
///     let pos = it.get::<Pos>("pos").unwrap();
///     // ...
/// }
/// ```
///
/// The world must not be structurally mutated for the indexed types while a
/// walk is in progress; between walks the iterator may be kept and reused,
/// and [`IndexIterator::was_added_to`] / [`IndexIterator::was_removed_from`]
/// report whether membership changed since the previous observation.
pub struct IndexIterator {
    base: Rc<RefCell<IndexBase>>,
    /// Bound aliases in caller order, each with its slot in type order.
    fields: Vec<(&'static str, usize)>,
    /// Components of the current record, parallel to `fields`.
    current: Vec<Option<CompRef>>,
    cursor: usize,
    entity: Entity,
    add_seen: u32,
    rem_seen: u32,
}

impl IndexIterator {
    pub(crate) fn new(base: Rc<RefCell<IndexBase>>, fields: Vec<(&'static str, usize)>) -> Self {
        let (add_seen, rem_seen) = {
            let mut base = base.borrow_mut();
            (base.observe_add_ver(), base.observe_rem_ver())
        };
        let current = vec![None; fields.len()];
        Self {
            base,
            fields,
            current,
            cursor: 0,
            entity: Entity::NULL,
            add_seen,
            rem_seen,
        }
    }

    /// Rewind to before the first record and clear the exposed fields.
    pub fn start(&mut self) -> &mut Self {
        self.cursor = 0;
        self.entity = Entity::NULL;
        self.current.fill(None);
        self
    }

    /// Advance to the next live record.
    ///
    /// On a hit, [`IndexIterator::entity`] and the bound fields are loaded
    /// and `true` is returned. On exhaustion the fields are cleared and
    /// `false` is returned.
    pub fn next(&mut self) -> bool {
        let shared = Rc::clone(&self.base);
        let base = shared.borrow();
        while self.cursor < base.rows.len() {
            let row = self.cursor;
            self.cursor += 1;
            if let Some(record) = &base.rows[row] {
                self.entity = record.entity;
                for (slot, (_, pos)) in self.current.iter_mut().zip(self.fields.iter()) {
                    *slot = Some(record.comps[*pos].clone());
                }
                return true;
            }
        }
        self.entity = Entity::NULL;
        self.current.fill(None);
        false
    }

    /// Rewind and advance once; `true` when the index has at least one record.
    pub fn first(&mut self) -> bool {
        self.start().next()
    }

    /// Entity of the current record, or [`Entity::NULL`] outside a hit.
    #[must_use]
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Component of the current record bound under `alias`.
    ///
    /// Returns `None` outside a hit, for unknown aliases, and for
    /// witness-only terms.
    #[must_use]
    pub fn get<T: Component>(&self, alias: &str) -> Option<Handle<T>> {
        let index = self.fields.iter().position(|&(a, _)| a == alias)?;
        self.current[index].clone().map(Handle::new)
    }

    /// Check whether records were added since the last observation.
    ///
    /// The counters are snapshotted at construction, so the first call
    /// returns `false`. This is a coarse hint: an add-then-remove round trip
    /// between observations still reads as both added and removed.
    pub fn was_added_to(&mut self) -> bool {
        let version = self.base.borrow_mut().observe_add_ver();
        if version == self.add_seen {
            return false;
        }
        self.add_seen = version;
        true
    }

    /// Check whether records were removed since the last observation.
    pub fn was_removed_from(&mut self) -> bool {
        let version = self.base.borrow_mut().observe_rem_ver();
        if version == self.rem_seen {
            return false;
        }
        self.rem_seen = version;
        true
    }

    /// Check whether membership changed in either direction.
    pub fn was_changed(&mut self) -> bool {
        let added = self.was_added_to();
        let removed = self.was_removed_from();
        added || removed
    }
}

impl fmt::Debug for IndexIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexIterator")
            .field("entity", &self.entity)
            .field("cursor", &self.cursor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Pos(f32);
    impl Component for Pos {}

    #[derive(Debug)]
    struct Vel(f32);
    impl Component for Vel {}

    fn cell<T: Component>(value: T) -> CompRef {
        Rc::new(RefCell::new(value))
    }

    fn two_type_base(registry: &mut ComponentRegistry) -> IndexBase {
        let spec = IndexSpec::new().bind::<Pos>("pos").bind::<Vel>("vel");
        let resolved = spec.resolve(registry).unwrap();
        IndexBase::new(resolved.types, resolved.names)
    }

    #[test]
    fn test_spec_rejects_duplicates() {
        let mut registry = ComponentRegistry::new();
        let err = IndexSpec::new()
            .bind::<Pos>("a")
            .bind::<Pos>("b")
            .resolve(&mut registry)
            .unwrap_err();
        assert!(matches!(err, EcsError::DuplicateComponentType { context: "index", .. }));
    }

    #[test]
    fn test_spec_sorts_types_and_keeps_alias_order() {
        let mut registry = ComponentRegistry::new();
        // Register in reverse so the spec order disagrees with id order.
        registry.register::<Vel>();
        registry.register::<Pos>();
        let resolved = IndexSpec::new()
            .bind::<Pos>("pos")
            .bind::<Vel>("vel")
            .resolve(&mut registry)
            .unwrap();
        assert!(resolved.types[0] < resolved.types[1]);
        assert_eq!(resolved.fields[0].0, "pos");
        assert_eq!(resolved.fields[1].0, "vel");
        // Pos registered second, so it sits in the later type slot.
        assert_eq!(resolved.fields[0].1, 1);
        assert_eq!(resolved.fields[1].1, 0);
    }

    #[test]
    fn test_witness_terms_expose_no_field() {
        let mut registry = ComponentRegistry::new();
        let resolved = IndexSpec::new()
            .bind::<Pos>("pos")
            .require::<Vel>()
            .resolve(&mut registry)
            .unwrap();
        assert_eq!(resolved.types.len(), 2);
        assert_eq!(resolved.fields.len(), 1);
        assert_eq!(resolved.fields[0].0, "pos");
    }

    #[test]
    fn test_add_reuses_tombstoned_rows() {
        let mut registry = ComponentRegistry::new();
        let mut base = two_type_base(&mut registry);
        let comps = [cell(Pos(0.0)), cell(Vel(0.0))];
        for raw in 1..=3 {
            base.add(Entity::from_raw(raw), &comps);
        }
        assert_eq!(base.rows.len(), 3);
        base.remove(Entity::from_raw(2));
        assert_eq!(base.len(), 2);
        assert_eq!(base.rows.len(), 3);
        // The vacated middle row is reused before the store grows.
        base.add(Entity::from_raw(9), &comps);
        assert_eq!(base.rows.len(), 3);
        assert!(base.contains(Entity::from_raw(9)));
    }

    #[test]
    fn test_add_existing_rewrites_in_place() {
        let mut registry = ComponentRegistry::new();
        let mut base = two_type_base(&mut registry);
        let entity = Entity::from_raw(4);
        base.add(entity, &[cell(Pos(1.0)), cell(Vel(1.0))]);
        let row_count = base.rows.len();
        base.add(entity, &[cell(Pos(2.0)), cell(Vel(2.0))]);
        assert_eq!(base.rows.len(), row_count);
        assert_eq!(base.len(), 1);
    }

    #[test]
    fn test_emplace_overwrites_slot() {
        let mut registry = ComponentRegistry::new();
        let mut base = two_type_base(&mut registry);
        let entity = Entity::from_raw(1);
        base.add(entity, &[cell(Pos(1.0)), cell(Vel(1.0))]);

        let pos_id = registry.get_id::<Pos>().unwrap();
        let replacement = cell(Pos(42.0));
        assert!(base.emplace(entity, pos_id, "Pos", &replacement).unwrap());

        // Absent entity: no error, just `false`.
        assert!(!base
            .emplace(Entity::from_raw(8), pos_id, "Pos", &replacement)
            .unwrap());
    }

    #[test]
    fn test_emplace_foreign_type_is_an_error() {
        #[derive(Debug)]
        struct Stray;
        impl Component for Stray {}

        let mut registry = ComponentRegistry::new();
        let mut base = two_type_base(&mut registry);
        let stray_id = registry.register::<Stray>();
        let err = base
            .emplace(Entity::from_raw(1), stray_id, "Stray", &cell(Stray))
            .unwrap_err();
        assert!(matches!(err, EcsError::TypeNotInIndex { type_name: "Stray", .. }));
    }

    #[test]
    fn test_version_counters_arm_on_observe() {
        let mut registry = ComponentRegistry::new();
        let mut base = two_type_base(&mut registry);
        let comps = [cell(Pos(0.0)), cell(Vel(0.0))];

        // Unobserved counters do not move.
        base.add(Entity::from_raw(1), &comps);
        assert_eq!(base.observe_add_ver(), 0);

        // Armed counters move exactly once per observation cycle.
        base.add(Entity::from_raw(2), &comps);
        base.add(Entity::from_raw(3), &comps);
        assert_eq!(base.observe_add_ver(), 1);

        base.remove(Entity::from_raw(1));
        assert_eq!(base.observe_rem_ver(), 0);
        base.remove(Entity::from_raw(2));
        assert_eq!(base.observe_rem_ver(), 1);
    }

    fn iterator_over(base: &Rc<RefCell<IndexBase>>) -> IndexIterator {
        IndexIterator::new(Rc::clone(base), vec![("pos", 0), ("vel", 1)])
    }

    #[test]
    fn test_iterator_walks_live_records() {
        let mut registry = ComponentRegistry::new();
        let base = Rc::new(RefCell::new(two_type_base(&mut registry)));
        for raw in 1..=3 {
            base.borrow_mut()
                .add(Entity::from_raw(raw), &[cell(Pos(raw as f32)), cell(Vel(0.0))]);
        }
        base.borrow_mut().remove(Entity::from_raw(2));

        let mut it = iterator_over(&base);
        let mut seen = Vec::new();
        it.start();
        while it.next() {
            seen.push(it.entity().raw());
            let pos = it.get::<Pos>("pos").unwrap();
            assert_eq!(pos.borrow().0, it.entity().raw() as f32);
        }
        assert_eq!(seen, [1, 3]);
        assert!(it.entity().is_null());
        assert!(it.get::<Pos>("pos").is_none());
    }

    #[test]
    fn test_iterator_first_and_restart() {
        let mut registry = ComponentRegistry::new();
        let base = Rc::new(RefCell::new(two_type_base(&mut registry)));
        let mut it = iterator_over(&base);
        assert!(!it.first());

        base.borrow_mut()
            .add(Entity::from_raw(7), &[cell(Pos(0.0)), cell(Vel(0.0))]);
        assert!(it.first());
        assert_eq!(it.entity().raw(), 7);
        // A second full pass works on the same iterator.
        assert!(it.first());
        assert!(!it.next());
    }

    #[test]
    fn test_change_hints() {
        let mut registry = ComponentRegistry::new();
        let base = Rc::new(RefCell::new(two_type_base(&mut registry)));
        let mut it = iterator_over(&base);

        // Counters are snapshotted at construction.
        assert!(!it.was_added_to());
        assert!(!it.was_removed_from());

        base.borrow_mut()
            .add(Entity::from_raw(1), &[cell(Pos(0.0)), cell(Vel(0.0))]);
        assert!(it.was_added_to());
        assert!(!it.was_added_to());
        assert!(!it.was_removed_from());

        base.borrow_mut().remove(Entity::from_raw(1));
        assert!(it.was_removed_from());
        assert!(!it.was_removed_from());
    }

    #[test]
    fn test_unknown_alias_yields_none() {
        let mut registry = ComponentRegistry::new();
        let base = Rc::new(RefCell::new(two_type_base(&mut registry)));
        base.borrow_mut()
            .add(Entity::from_raw(1), &[cell(Pos(0.0)), cell(Vel(0.0))]);
        let mut it = iterator_over(&base);
        assert!(it.first());
        assert!(it.get::<Pos>("nope").is_none());
    }
}
