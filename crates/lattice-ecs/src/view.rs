//! Callback-style queries over component tuples.
//!
//! A [`View`] is the legacy query path: it walks the first tuple type's
//! column on every call and probes the remaining columns per candidate,
//! skipping entities that miss any type. The tuple of component types drives
//! a monomorphized inner loop; views are stateless and cheap to construct.
//! For hot queries, prefer [`World::index`], which maintains its record set
//! incrementally.

use std::{marker::PhantomData, rc::Rc};

use smallvec::SmallVec;

use crate::{
    component::{Component, ComponentId, Handle},
    entity::Entity,
    world::World,
};

/// A tuple of component types usable as a view shape.
///
/// Implemented for tuples of one through eight components. The empty tuple
/// is deliberately not a view: a query over zero types has no driving
/// column.
pub trait ViewTuple {
    /// One [`Handle`] per tuple type, in tuple order.
    type Handles;

    /// Component ids in tuple order, or `None` when any type has never been
    /// registered (such a view matches nothing).
    #[doc(hidden)]
    fn component_ids(world: &World) -> Option<SmallVec<[ComponentId; 8]>>;

    /// Handles for `key`'s components, or `None` when any type is missing.
    #[doc(hidden)]
    fn fetch(world: &World, ids: &[ComponentId], key: u32) -> Option<Self::Handles>;
}

macro_rules! impl_view_tuple {
    ($($t:ident),+) => {
        impl<$($t: Component),+> ViewTuple for ($($t,)+) {
            type Handles = ($(Handle<$t>,)+);

            fn component_ids(world: &World) -> Option<SmallVec<[ComponentId; 8]>> {
                let mut ids = SmallVec::new();
                $(ids.push(world.registry().get_id::<$t>()?);)+
                Some(ids)
            }

            fn fetch(world: &World, ids: &[ComponentId], key: u32) -> Option<Self::Handles> {
                let mut ids = ids.iter();
                Some(($(
                    {
                        let id = *ids.next()?;
                        let comp = world.column(id)?.get(key)?;
                        Handle::<$t>::new(Rc::clone(comp))
                    },
                )+))
            }
        }
    };
}

impl_view_tuple!(A);
impl_view_tuple!(A, B);
impl_view_tuple!(A, B, C);
impl_view_tuple!(A, B, C, D);
impl_view_tuple!(A, B, C, D, E);
impl_view_tuple!(A, B, C, D, E, F);
impl_view_tuple!(A, B, C, D, E, F, G);
impl_view_tuple!(A, B, C, D, E, F, G, H);

/// Callback-style query over entities carrying every type in `B`.
pub struct View<'w, B: ViewTuple> {
    world: &'w World,
    _marker: PhantomData<fn() -> B>,
}

impl<'w, B: ViewTuple> View<'w, B> {
    pub(crate) fn new(world: &'w World) -> Self {
        Self {
            world,
            _marker: PhantomData,
        }
    }

    /// Visit every matching entity.
    ///
    /// The world cannot be structurally mutated during the walk (the view
    /// borrows it), but component values stay mutable through their handles.
    pub fn each(&self, mut f: impl FnMut(Entity, B::Handles)) {
        self.each_while(|entity, handles| {
            f(entity, handles);
            true
        });
    }

    /// Visit matching entities until the callback returns `false`.
    pub fn each_while(&self, mut f: impl FnMut(Entity, B::Handles) -> bool) {
        let Some(ids) = B::component_ids(self.world) else {
            return;
        };
        let Some(driver) = self.world.column(ids[0]) else {
            return;
        };
        for (key, _) in driver.iter() {
            if let Some(handles) = B::fetch(self.world, &ids, key) {
                if !f(Entity::from_key(key), handles) {
                    return;
                }
            }
        }
    }

    /// Number of matching entities.
    #[must_use]
    pub fn count(&self) -> usize {
        let mut count = 0;
        self.each(|_, _| count += 1);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Fizz;
    impl Component for Fizz {}

    #[derive(Debug)]
    struct Buzz;
    impl Component for Buzz {}

    #[derive(Debug)]
    struct Number(u32);
    impl Component for Number {}

    #[test]
    fn test_fizzbuzz_view() {
        let mut world = World::new();
        for i in 0..100u32 {
            let entity = world.create((Number(i),)).unwrap();
            if i % 3 == 0 {
                world.emplace(entity, Fizz).unwrap();
            }
            if i % 5 == 0 {
                world.emplace(entity, Buzz).unwrap();
            }
        }

        let mut hits = Vec::new();
        world.view::<(Fizz, Buzz, Number)>().each(|_, (_, _, n)| {
            hits.push(n.borrow().0);
        });
        hits.sort_unstable();
        assert_eq!(hits, [0, 15, 30, 45, 60, 75, 90]);
        assert_eq!(world.view::<(Fizz, Buzz)>().count(), 7);
    }

    #[test]
    fn test_view_skips_partial_matches() {
        let mut world = World::new();
        let full = world.create((Fizz, Number(1))).unwrap();
        let _partial = world.create((Number(2),)).unwrap();

        let mut seen = Vec::new();
        world.view::<(Fizz, Number)>().each(|entity, _| seen.push(entity));
        assert_eq!(seen, [full]);
    }

    #[test]
    fn test_view_unregistered_type_matches_nothing() {
        let mut world = World::new();
        world.create((Number(1),)).unwrap();
        // Fizz was never attached to anything, so it is unregistered.
        assert_eq!(world.view::<(Number, Fizz)>().count(), 0);
    }

    #[test]
    fn test_each_while_stops_early() {
        let mut world = World::new();
        for i in 0..10 {
            world.create((Number(i),)).unwrap();
        }
        let mut visits = 0;
        world.view::<(Number,)>().each_while(|_, _| {
            visits += 1;
            visits < 3
        });
        assert_eq!(visits, 3);
    }

    #[test]
    fn test_view_handles_mutate_components() {
        let mut world = World::new();
        let entity = world.create((Number(1),)).unwrap();
        world.view::<(Number,)>().each(|_, (n,)| {
            n.borrow_mut().0 += 10;
        });
        assert_eq!(world.get::<Number>(entity).unwrap().borrow().0, 11);
    }
}
