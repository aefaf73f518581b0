//! Bundles: statically known groups of components inserted or removed as a
//! unit. A bundle type is registered once per world; registration resolves
//! the explicit component ids, expands required components transitively,
//! and assigns a [`BundleId`] that archetype edges key their transition
//! cache on.

use std::any::TypeId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::mem::ManuallyDrop;

use crate::ecs::archetype::{ArchetypeId, Archetypes, InsertBundleEdge};
use crate::ecs::component::{
    Component, ComponentId, Components, RequiredComponent, StorageKind,
};
use crate::ecs::storage::Tables;

/// Identifies a registered bundle type within one world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BundleId(u32);

impl BundleId {
    #[inline]
    const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Whether a bundle component lands on an entity that already had it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentStatus {
    Added,
    Existing,
}

/// What to do when an inserted component already exists on the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// Overwrite the existing value, bumping its changed tick.
    Replace,
    /// Keep the existing value and drop the incoming one.
    Keep,
}

/// A statically known set of components moved in and out of entities
/// together.
///
/// # Safety
/// `get_components` must call `func` exactly once per id yielded by
/// `component_ids`, in the same order, each time with a pointer to a valid
/// value of that component whose ownership transfers to the callee.
pub unsafe trait Bundle: 'static {
    /// Yield the explicit component ids in declaration order, registering
    /// them as needed.
    fn component_ids(components: &mut Components, ids: &mut impl FnMut(ComponentId));

    /// Move every component value out of `self`, in declaration order.
    fn get_components(self, func: &mut impl FnMut(*mut u8));
}

// SAFETY: yields exactly one id and one matching value.
unsafe impl<C: Component> Bundle for C {
    fn component_ids(components: &mut Components, ids: &mut impl FnMut(ComponentId)) {
        ids(components.register_component::<C>());
    }

    fn get_components(self, func: &mut impl FnMut(*mut u8)) {
        let mut value = ManuallyDrop::new(self);
        func((&raw mut value).cast());
    }
}

macro_rules! tuple_bundle {
    ($($name:ident),*) => {
        // SAFETY: each member is itself a bundle honoring the contract and
        // members are visited in declaration order both times.
        unsafe impl<$($name: Bundle),*> Bundle for ($($name,)*) {
            fn component_ids(components: &mut Components, ids: &mut impl FnMut(ComponentId)) {
                $($name::component_ids(components, ids);)*
            }

            #[allow(non_snake_case)]
            fn get_components(self, func: &mut impl FnMut(*mut u8)) {
                let ($($name,)*) = self;
                $($name.get_components(func);)*
            }
        }
    };
}

tuple_bundle!(B0);
tuple_bundle!(B0, B1);
tuple_bundle!(B0, B1, B2);
tuple_bundle!(B0, B1, B2, B3);
tuple_bundle!(B0, B1, B2, B3, B4);
tuple_bundle!(B0, B1, B2, B3, B4, B5);
tuple_bundle!(B0, B1, B2, B3, B4, B5, B6);
tuple_bundle!(B0, B1, B2, B3, B4, B5, B6, B7);

/// Resolved metadata for one bundle type: the explicit component ids in
/// declaration order, followed by the transitively required components.
#[derive(Debug)]
pub struct BundleInfo {
    id: BundleId,
    /// Explicit ids first (declaration order), then required ids ordered by
    /// (inheritance depth, id).
    component_ids: Vec<ComponentId>,
    explicit_len: usize,
    /// Constructors parallel to `component_ids[explicit_len..]`.
    required: Vec<RequiredComponent>,
}

impl BundleInfo {
    fn new(id: BundleId, components: &Components, explicit: Vec<ComponentId>) -> Self {
        let mut seen = HashSet::new();
        for &component_id in &explicit {
            let fresh = seen.insert(component_id);
            assert!(
                fresh,
                "bundle contains component {} more than once",
                components
                    .info(component_id)
                    .map(|info| info.name())
                    .unwrap_or("<unregistered>")
            );
        }

        // Breadth-first walk over direct requirements. Depth grows with
        // inheritance distance; the first (shallowest) constructor found for
        // an id wins and explicit members never get a constructor.
        let mut required: Vec<(u16, RequiredComponent)> = Vec::new();
        let mut found: HashSet<ComponentId> = seen.clone();
        let mut queue: VecDeque<(ComponentId, u16)> =
            explicit.iter().map(|&c| (c, 0)).collect();
        while let Some((component_id, depth)) = queue.pop_front() {
            let Some(info) = components.info(component_id) else {
                continue;
            };
            for requirement in info.required() {
                if found.insert(requirement.component_id) {
                    required.push((depth + 1, requirement.clone()));
                    queue.push_back((requirement.component_id, depth + 1));
                }
            }
        }
        required.sort_by_key(|&(depth, ref r)| (depth, r.component_id));

        let explicit_len = explicit.len();
        let mut component_ids = explicit;
        component_ids.extend(required.iter().map(|(_, r)| r.component_id));
        Self {
            id,
            component_ids,
            explicit_len,
            required: required.into_iter().map(|(_, r)| r).collect(),
        }
    }

    #[inline]
    pub fn id(&self) -> BundleId {
        self.id
    }

    /// Every component the bundle writes: explicit then required.
    #[inline]
    pub fn component_ids(&self) -> &[ComponentId] {
        &self.component_ids
    }

    /// The explicitly declared component ids, in declaration order.
    #[inline]
    pub fn explicit_ids(&self) -> &[ComponentId] {
        &self.component_ids[..self.explicit_len]
    }

    /// Required components appended after the explicit ones.
    #[inline]
    pub fn required(&self) -> &[RequiredComponent] {
        &self.required
    }

    /// Compute (and cache) the archetype an insert of this bundle leads to
    /// from `from`, along with per-component add/overwrite statuses.
    pub(crate) fn insert_into_archetype(
        &self,
        archetypes: &mut Archetypes,
        tables: &mut Tables,
        components: &Components,
        from: ArchetypeId,
    ) -> ArchetypeId {
        if let Some(edge) = archetypes
            .get(from)
            .and_then(|a| a.edges().get_insert_bundle(self.id))
        {
            return edge.archetype_id;
        }

        let source = archetypes
            .get(from)
            .unwrap_or_else(|| panic!("insert from missing archetype {from:?}"));
        let statuses: Vec<ComponentStatus> = self
            .component_ids
            .iter()
            .map(|&c| {
                if source.contains(c) {
                    ComponentStatus::Existing
                } else {
                    ComponentStatus::Added
                }
            })
            .collect();

        let mut table_components: Vec<ComponentId> = source.table_component_ids().collect();
        let mut sparse_components: Vec<ComponentId> = source.sparse_component_ids().collect();
        for (&component_id, status) in self.component_ids.iter().zip(&statuses) {
            if *status == ComponentStatus::Added {
                let info = components
                    .info(component_id)
                    .unwrap_or_else(|| panic!("bundle uses unregistered component {component_id:?}"));
                match info.storage() {
                    StorageKind::Table => table_components.push(component_id),
                    StorageKind::SparseSet => sparse_components.push(component_id),
                }
            }
        }
        table_components.sort_unstable();
        sparse_components.sort_unstable();

        let table_id = tables.get_id_or_insert(&table_components, components);
        let target = archetypes.get_id_or_insert(
            table_id,
            &table_components,
            &sparse_components,
            components,
        );
        let edges = archetypes
            .get_mut(from)
            .unwrap_or_else(|| panic!("insert from missing archetype {from:?}"))
            .edges_mut();
        edges.cache_insert_bundle(
            self.id,
            InsertBundleEdge {
                archetype_id: target,
                statuses,
            },
        );
        target
    }

    /// Compute (and cache) the archetype a removal of this bundle's explicit
    /// components leads to from `from`. With `intersection`, components the
    /// archetype lacks are skipped; without it, any missing component makes
    /// the whole removal a cached no-op (`None`).
    pub(crate) fn remove_from_archetype(
        &self,
        archetypes: &mut Archetypes,
        tables: &mut Tables,
        components: &Components,
        from: ArchetypeId,
        intersection: bool,
    ) -> Option<ArchetypeId> {
        let cached = if intersection {
            archetypes.get(from).and_then(|a| a.edges().get_remove_bundle(self.id))
        } else {
            archetypes.get(from).and_then(|a| a.edges().get_take_bundle(self.id))
        };
        if let Some(result) = cached {
            return result;
        }

        let source = archetypes
            .get(from)
            .unwrap_or_else(|| panic!("remove from missing archetype {from:?}"));
        let removed: HashSet<ComponentId> = self
            .explicit_ids()
            .iter()
            .copied()
            .filter(|&c| source.contains(c))
            .collect();
        let result = if !intersection && removed.len() != self.explicit_len {
            None
        } else {
            let table_components: Vec<ComponentId> = source
                .table_component_ids()
                .filter(|c| !removed.contains(c))
                .collect();
            let sparse_components: Vec<ComponentId> = source
                .sparse_component_ids()
                .filter(|c| !removed.contains(c))
                .collect();
            let table_id = tables.get_id_or_insert(&table_components, components);
            Some(archetypes.get_id_or_insert(
                table_id,
                &table_components,
                &sparse_components,
                components,
            ))
        };

        let edges = archetypes
            .get_mut(from)
            .unwrap_or_else(|| panic!("remove from missing archetype {from:?}"))
            .edges_mut();
        if intersection {
            edges.cache_remove_bundle(self.id, result);
        } else {
            edges.cache_take_bundle(self.id, result);
        }
        result
    }
}

/// All bundle types registered in a world.
#[derive(Debug, Default)]
pub struct Bundles {
    infos: Vec<BundleInfo>,
    by_type: HashMap<TypeId, BundleId>,
}

impl Bundles {
    /// Register `B`, or return its existing id. The required-component
    /// expansion is resolved here, so requirements registered later do not
    /// affect bundles that were already registered.
    pub fn register<B: Bundle>(&mut self, components: &mut Components) -> BundleId {
        if let Some(&id) = self.by_type.get(&TypeId::of::<B>()) {
            return id;
        }
        let mut explicit = Vec::new();
        B::component_ids(components, &mut |id| explicit.push(id));
        let id = BundleId::from_index(self.infos.len());
        self.infos.push(BundleInfo::new(id, components, explicit));
        self.by_type.insert(TypeId::of::<B>(), id);
        id
    }

    #[inline]
    pub fn get(&self, id: BundleId) -> Option<&BundleInfo> {
        self.infos.get(id.index())
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct A(#[allow(dead_code)] u32);
    impl Component for A {}
    struct B(#[allow(dead_code)] u32);
    impl Component for B {}
    struct C(#[allow(dead_code)] u32);
    impl Component for C {}

    fn ctor_noop() -> Arc<dyn Fn(*mut u8) + Send + Sync> {
        Arc::new(|ptr| unsafe { ptr.cast::<u32>().write(0) })
    }

    #[test]
    fn explicit_ids_in_declaration_order() {
        // Given a tuple bundle (B, A).
        let mut components = Components::default();
        let mut bundles = Bundles::default();
        // When registered.
        let id = bundles.register::<(B, A)>(&mut components);
        let info = bundles.get(id).unwrap();
        // Then explicit ids keep declaration order, not id order.
        let b = components.component_id::<B>().unwrap();
        let a = components.component_id::<A>().unwrap();
        assert_eq!(info.explicit_ids(), &[b, a]);
    }

    #[test]
    fn registration_is_idempotent() {
        let mut components = Components::default();
        let mut bundles = Bundles::default();
        let first = bundles.register::<(A, B)>(&mut components);
        let second = bundles.register::<(A, B)>(&mut components);
        assert_eq!(first, second);
    }

    #[test]
    #[should_panic(expected = "more than once")]
    fn duplicate_component_panics() {
        let mut components = Components::default();
        let mut bundles = Bundles::default();
        bundles.register::<(A, A)>(&mut components);
    }

    #[test]
    fn required_components_expand_transitively() {
        // Given A requires B and B requires C.
        let mut components = Components::default();
        let a = components.register_component::<A>();
        let b = components.register_component::<B>();
        let c = components.register_component::<C>();
        components.register_required(a, b, ctor_noop());
        components.register_required(b, c, ctor_noop());
        // When a bundle of just A is registered.
        let mut bundles = Bundles::default();
        let id = bundles.register::<A>(&mut components);
        let info = bundles.get(id).unwrap();
        // Then B (depth 1) and C (depth 2) ride along in depth order.
        assert_eq!(info.explicit_ids(), &[a]);
        assert_eq!(info.component_ids(), &[a, b, c]);
    }

    #[test]
    fn explicit_component_is_never_required() {
        // Given A requires B.
        let mut components = Components::default();
        let a = components.register_component::<A>();
        let b = components.register_component::<B>();
        components.register_required(a, b, ctor_noop());
        // When a bundle explicitly carries both.
        let mut bundles = Bundles::default();
        let id = bundles.register::<(A, B)>(&mut components);
        let info = bundles.get(id).unwrap();
        // Then no requirement entry is added for B.
        assert_eq!(info.component_ids(), &[a, b]);
        assert!(info.required().is_empty());
    }

    #[test]
    fn requirement_cycle_terminates() {
        // Given A requires B and B requires A.
        let mut components = Components::default();
        let a = components.register_component::<A>();
        let b = components.register_component::<B>();
        components.register_required(a, b, ctor_noop());
        components.register_required(b, a, ctor_noop());
        // When a bundle of A is registered, the walk visits each id once.
        let mut bundles = Bundles::default();
        let id = bundles.register::<A>(&mut components);
        let info = bundles.get(id).unwrap();
        assert_eq!(info.component_ids(), &[a, b]);
    }
}
