//! The world: one self-contained entity/component store.
//!
//! Everything below the public surface here is id-driven and type-erased;
//! this module is where typed requests (spawn this bundle, fetch that
//! resource) are translated into registry lookups, archetype transitions
//! and raw storage writes. The central invariant is three-way location
//! consistency: for every live entity, its allocator record, its
//! archetype's entity list and its table row agree at all times. Every
//! swap-remove in here patches all three before returning.

mod command;

pub use command::CommandQueue;

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use log::warn;
use thiserror::Error;

use crate::ecs::archetype::{ArchetypeFlags, ArchetypeId, Archetypes};
use crate::ecs::bundle::{Bundle, BundleId, Bundles, ComponentStatus, InsertMode};
use crate::ecs::component::{
    Component, ComponentHook, ComponentId, Components, HookContext, Hooks, RequiredConstructor,
    StorageKind,
};
use crate::ecs::entity::{Allocator, Entity};
use crate::ecs::resource::Resource;
use crate::ecs::storage::{ComponentTicks, Location, Row, Storages, TableId, Tick};

static WORLD_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Identifies a world within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id(usize);

impl Id {
    fn next() -> Self {
        Self(WORLD_COUNT.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn index(&self) -> usize {
        self.0
    }
}

/// The entity the operation named is not alive: it was never spawned, or
/// its index has since been reused under a newer generation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("entity {0} does not exist or has been despawned")]
pub struct StaleEntity(pub Entity);

/// A self-contained entity/component store.
pub struct World {
    id: Id,
    pub(crate) components: Components,
    pub(crate) storages: Storages,
    pub(crate) archetypes: Archetypes,
    pub(crate) bundles: Bundles,
    pub(crate) entities: Allocator,
    /// Deferred structural mutations, drained at sync points.
    command_queue: CommandQueue,
    change_tick: AtomicU32,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            id: Id::next(),
            components: Components::default(),
            storages: Storages::default(),
            archetypes: Archetypes::default(),
            bundles: Bundles::default(),
            entities: Allocator::new(),
            command_queue: CommandQueue::default(),
            change_tick: AtomicU32::new(1),
        }
    }

    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    #[inline]
    pub fn components(&self) -> &Components {
        &self.components
    }

    #[inline]
    pub fn archetypes(&self) -> &Archetypes {
        &self.archetypes
    }

    #[inline]
    pub fn storages(&self) -> &Storages {
        &self.storages
    }

    /// Current value of the change counter.
    #[inline]
    pub fn change_tick(&self) -> Tick {
        Tick::new(self.change_tick.load(Ordering::Acquire))
    }

    /// Advance the change counter, returning the tick mutations should be
    /// stamped with. Takes `&self` so condition closures and hooks can
    /// advance it too.
    #[inline]
    pub fn increment_change_tick(&self) -> Tick {
        Tick::new(self.change_tick.fetch_add(1, Ordering::AcqRel))
    }

    /// Clamp every stored tick so wrapping comparisons stay unambiguous.
    pub fn check_change_ticks(&mut self) {
        let now = self.change_tick();
        self.storages.check_ticks(now);
    }

    // ==================== Registration ====================

    pub fn register_component<C: Component>(&mut self) -> ComponentId {
        self.components.register_component::<C>()
    }

    pub fn register_resource<R: Resource>(&mut self) -> ComponentId {
        self.components.register_resource::<R>()
    }

    /// Lifecycle hooks for `C`, for registration. Panics if any archetype
    /// already contains `C`, since archetypes capture hook presence when
    /// they are created.
    pub fn register_hooks<C: Component>(&mut self) -> &mut Hooks {
        let id = self.components.register_component::<C>();
        assert!(
            self.archetypes.containing(id).is_empty(),
            "hooks for {} must be registered before the component is used",
            std::any::type_name::<C>()
        );
        self.components
            .hooks_mut(id)
            .unwrap_or_else(|| panic!("component {id:?} vanished from the registry"))
    }

    /// Declare that `C` requires `R`, constructed by `ctor` whenever `C` is
    /// inserted on an entity lacking `R`. Applies to bundles registered
    /// after this call. Panics if any archetype already contains `C`, since
    /// existing instances would never receive the requirement.
    pub fn register_required<C: Component, R: Component>(
        &mut self,
        ctor: impl Fn() -> R + Send + Sync + 'static,
    ) {
        let requiree = self.components.register_component::<C>();
        assert!(
            self.archetypes.containing(requiree).is_empty(),
            "requirements for {} must be registered before the component is used",
            std::any::type_name::<C>()
        );
        let required = self.components.register_component::<R>();
        let constructor: RequiredConstructor = std::sync::Arc::new(move |ptr| {
            // SAFETY: callers pass a slot sized and aligned for R.
            unsafe { ptr.cast::<R>().write(ctor()) };
        });
        self.components.register_required(requiree, required, constructor);
    }

    // ==================== Entities ====================

    /// Whether `entity` is alive.
    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.contains(entity)
    }

    /// Reserve an entity id without structural access. The entity becomes
    /// queryable after the next [`Self::flush`].
    pub fn reserve_entity(&self) -> Entity {
        self.entities.reserve()
    }

    /// Spawn an entity with no components.
    pub fn spawn_empty(&mut self) -> Entity {
        self.flush_entities();
        let entity = self.entities.alloc();
        let location = self.place_in_empty_archetype(entity);
        self.entities.set_location(entity, location);
        entity
    }

    /// Spawn an entity with `bundle`.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Entity {
        let entity = self.spawn_empty();
        // The entity was just created, so it cannot be stale.
        self.insert(entity, bundle)
            .unwrap_or_else(|_| panic!("freshly spawned entity {entity} is stale"));
        entity
    }

    /// Spawn one entity per bundle yielded by `iter`. The bundle type is
    /// registered once and every spawn after the first rides the cached
    /// archetype edge.
    pub fn spawn_batch<B, I>(&mut self, iter: I) -> Vec<Entity>
    where
        B: Bundle,
        I: IntoIterator<Item = B>,
    {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();
        let mut spawned = Vec::with_capacity(lower);
        for bundle in iter {
            spawned.push(self.spawn(bundle));
        }
        spawned
    }

    fn place_in_empty_archetype(&mut self, entity: Entity) -> Location {
        let table = self
            .storages
            .tables
            .get_mut(TableId::empty())
            .unwrap_or_else(|| panic!("empty table missing"));
        let table_row = table.allocate(entity, Tick::ZERO);
        let archetype = self
            .archetypes
            .get_mut(ArchetypeId::EMPTY)
            .unwrap_or_else(|| panic!("empty archetype missing"));
        let archetype_row = archetype.allocate(entity, table_row);
        Location {
            archetype_id: ArchetypeId::EMPTY,
            archetype_row,
            table_id: TableId::empty(),
            table_row,
        }
    }

    /// Materialize reserved entities into the empty archetype.
    fn flush_entities(&mut self) {
        if !self.entities.needs_flush() {
            return;
        }
        let Self {
            entities,
            archetypes,
            storages,
            ..
        } = self;
        let table = storages
            .tables
            .get_mut(TableId::empty())
            .unwrap_or_else(|| panic!("empty table missing"));
        let archetype = archetypes
            .get_mut(ArchetypeId::EMPTY)
            .unwrap_or_else(|| panic!("empty archetype missing"));
        entities.flush(|entity, location| {
            let table_row = table.allocate(entity, Tick::ZERO);
            let archetype_row = archetype.allocate(entity, table_row);
            *location = Location {
                archetype_id: ArchetypeId::EMPTY,
                archetype_row,
                table_id: TableId::empty(),
                table_row,
            };
        });
    }

    /// Despawn `entity`, dropping all its components. Returns false (with a
    /// warning) if the entity is not alive.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        self.flush_entities();
        let Some(location) = self.entities.get(entity) else {
            warn!("attempted to despawn stale entity {entity}");
            return false;
        };

        // Fire on_replace then on_remove for every component, while the
        // world is still intact.
        let archetype = self
            .archetypes
            .get(location.archetype_id)
            .unwrap_or_else(|| panic!("location points at missing archetype"));
        let flags = archetype.flags();
        if flags.intersects(ArchetypeFlags::ON_REPLACE_HOOK | ArchetypeFlags::ON_REMOVE_HOOK) {
            let ids: Vec<ComponentId> = archetype.component_ids().collect();
            self.trigger_hooks(entity, &ids, |hooks| hooks.on_replace);
            self.trigger_hooks(entity, &ids, |hooks| hooks.on_remove);
        }

        // Hooks must not structurally mutate the despawning entity.
        let location = self
            .entities
            .get(entity)
            .unwrap_or_else(|| panic!("entity {entity} vanished during despawn hooks"));
        let archetype = self
            .archetypes
            .get_mut(location.archetype_id)
            .unwrap_or_else(|| panic!("location points at missing archetype"));
        let sparse_ids: Vec<ComponentId> = archetype.sparse_component_ids().collect();
        if let Some(swapped) = archetype.swap_remove(location.archetype_row) {
            self.entities
                .update_location(swapped, |l| l.archetype_row = location.archetype_row);
        }
        let table = self
            .storages
            .tables
            .get_mut(location.table_id)
            .unwrap_or_else(|| panic!("location points at missing table"));
        if let Some(swapped) = table.swap_remove(location.table_row) {
            self.patch_swapped_table_row(swapped, location.table_row);
        }
        for component_id in sparse_ids {
            if let Some(set) = self.storages.sparse_sets.get_mut(component_id) {
                set.remove(entity);
            }
        }
        self.entities.free(entity);
        true
    }

    /// After a table swap-remove moved `swapped` into `row`, update both its
    /// allocator record and its archetype's entity list.
    fn patch_swapped_table_row(&mut self, swapped: Entity, row: Row) {
        let location = self
            .entities
            .get(swapped)
            .unwrap_or_else(|| panic!("swapped entity {swapped} has no location"));
        self.archetypes
            .get_mut(location.archetype_id)
            .unwrap_or_else(|| panic!("swapped entity archetype missing"))
            .set_entity_table_row(location.archetype_row, row);
        self.entities.update_location(swapped, |l| l.table_row = row);
    }

    // ==================== Bundle insertion ====================

    /// Insert `bundle` on `entity`, overwriting existing components.
    pub fn insert<B: Bundle>(&mut self, entity: Entity, bundle: B) -> Result<(), StaleEntity> {
        self.insert_with_mode(entity, bundle, InsertMode::Replace)
    }

    /// Insert `bundle` on `entity` with explicit overwrite semantics.
    pub fn insert_with_mode<B: Bundle>(
        &mut self,
        entity: Entity,
        bundle: B,
        mode: InsertMode,
    ) -> Result<(), StaleEntity> {
        self.flush_entities();
        let location = self.entities.get(entity).ok_or(StaleEntity(entity))?;
        let bundle_id = self.bundles.register::<B>(&mut self.components);
        let tick = self.change_tick();

        let target_id = self
            .bundles
            .get(bundle_id)
            .unwrap_or_else(|| panic!("bundle {bundle_id:?} vanished from the registry"))
            .insert_into_archetype(
                &mut self.archetypes,
                &mut self.storages.tables,
                &self.components,
                location.archetype_id,
            );
        let plan = self.build_write_plan(location.archetype_id, bundle_id);

        // on_replace before any value is overwritten.
        let replaced: Vec<ComponentId> = plan
            .iter()
            .filter(|p| p.status == ComponentStatus::Existing && !p.required())
            .filter(|_| mode == InsertMode::Replace)
            .map(|p| p.component_id)
            .collect();
        self.trigger_hooks(entity, &replaced, |hooks| hooks.on_replace);

        let location = if target_id == location.archetype_id {
            location
        } else {
            self.relocate(entity, location, target_id, tick)
        };
        self.write_bundle(entity, bundle, &plan, location, mode, tick);

        let added: Vec<ComponentId> = plan
            .iter()
            .filter(|p| p.status == ComponentStatus::Added)
            .map(|p| p.component_id)
            .collect();
        self.trigger_hooks(entity, &added, |hooks| hooks.on_add);
        let inserted: Vec<ComponentId> = match mode {
            InsertMode::Replace => plan
                .iter()
                .filter(|p| p.status == ComponentStatus::Added || !p.required())
                .map(|p| p.component_id)
                .collect(),
            InsertMode::Keep => added,
        };
        self.trigger_hooks(entity, &inserted, |hooks| hooks.on_insert);
        Ok(())
    }

    /// Remove the explicit components of `B` that the entity has.
    pub fn remove<B: Bundle>(&mut self, entity: Entity) -> Result<(), StaleEntity> {
        self.remove_with_intersection::<B>(entity, true).map(|_| ())
    }

    /// Remove the explicit components of `B` if the entity has all of them.
    /// Returns whether anything was removed; the all-or-nothing failure is
    /// cached on the archetype edge like any other transition.
    pub fn take<B: Bundle>(&mut self, entity: Entity) -> Result<bool, StaleEntity> {
        self.remove_with_intersection::<B>(entity, false)
    }

    fn remove_with_intersection<B: Bundle>(
        &mut self,
        entity: Entity,
        intersection: bool,
    ) -> Result<bool, StaleEntity> {
        self.flush_entities();
        let location = self.entities.get(entity).ok_or(StaleEntity(entity))?;
        let bundle_id = self.bundles.register::<B>(&mut self.components);
        let tick = self.change_tick();

        let info = self
            .bundles
            .get(bundle_id)
            .unwrap_or_else(|| panic!("bundle {bundle_id:?} vanished from the registry"));
        let Some(target_id) = info.remove_from_archetype(
            &mut self.archetypes,
            &mut self.storages.tables,
            &self.components,
            location.archetype_id,
            intersection,
        ) else {
            return Ok(false);
        };

        let source = self
            .archetypes
            .get(location.archetype_id)
            .unwrap_or_else(|| panic!("location points at missing archetype"));
        let removed: Vec<ComponentId> = self
            .bundles
            .get(bundle_id)
            .unwrap_or_else(|| panic!("bundle {bundle_id:?} vanished from the registry"))
            .explicit_ids()
            .iter()
            .copied()
            .filter(|&c| source.contains(c))
            .collect();
        if removed.is_empty() {
            return Ok(false);
        }
        let removed_sparse: Vec<ComponentId> = removed
            .iter()
            .copied()
            .filter(|&c| source.storage_of(c) == Some(StorageKind::SparseSet))
            .collect();

        // on_replace then on_remove, before anything is dropped.
        self.trigger_hooks(entity, &removed, |hooks| hooks.on_replace);
        self.trigger_hooks(entity, &removed, |hooks| hooks.on_remove);

        let location = self
            .entities
            .get(entity)
            .unwrap_or_else(|| panic!("entity {entity} vanished during remove hooks"));
        // The table move drops source-only column values; sparse values are
        // dropped explicitly.
        self.relocate(entity, location, target_id, tick);
        for component_id in removed_sparse {
            if let Some(set) = self.storages.sparse_sets.get_mut(component_id) {
                set.remove(entity);
            }
        }
        Ok(true)
    }

    /// Move `entity` from `location` into `target_id`, patching every
    /// swapped record, and store its new location. Column values shared by
    /// both tables move; source-only values are dropped; target-only slots
    /// are left for the caller to initialize.
    fn relocate(
        &mut self,
        entity: Entity,
        location: Location,
        target_id: ArchetypeId,
        tick: Tick,
    ) -> Location {
        let (source_arch, target_arch) =
            self.archetypes.get_2_mut(location.archetype_id, target_id);
        let target_table_id = target_arch.table_id();

        if let Some(swapped) = source_arch.swap_remove(location.archetype_row) {
            self.entities
                .update_location(swapped, |l| l.archetype_row = location.archetype_row);
        }

        let (table_row, swapped_table_entity) = if target_table_id == location.table_id {
            (location.table_row, None)
        } else {
            let (source_table, target_table) = self
                .storages
                .tables
                .get_2_mut(location.table_id, target_table_id);
            // SAFETY: the location's table row is live and the tables are
            // distinct.
            let result =
                unsafe { source_table.move_row_to(location.table_row, target_table, tick) };
            (result.new_row, result.swapped_entity)
        };

        let target_arch = self
            .archetypes
            .get_mut(target_id)
            .unwrap_or_else(|| panic!("target archetype {target_id:?} missing"));
        let archetype_row = target_arch.allocate(entity, table_row);
        let new_location = Location {
            archetype_id: target_id,
            archetype_row,
            table_id: target_table_id,
            table_row,
        };
        self.entities.set_location(entity, new_location);
        if let Some(swapped) = swapped_table_entity {
            self.patch_swapped_table_row(swapped, location.table_row);
        }
        new_location
    }

    fn build_write_plan(&self, source: ArchetypeId, bundle_id: BundleId) -> Vec<WritePlan> {
        let info = self
            .bundles
            .get(bundle_id)
            .unwrap_or_else(|| panic!("bundle {bundle_id:?} vanished from the registry"));
        let edge = self
            .archetypes
            .get(source)
            .and_then(|a| a.edges().get_insert_bundle(bundle_id))
            .unwrap_or_else(|| panic!("insert edge missing for bundle {bundle_id:?}"));
        let explicit_len = info.explicit_ids().len();
        info.component_ids()
            .iter()
            .zip(&edge.statuses)
            .enumerate()
            .map(|(i, (&component_id, &status))| WritePlan {
                component_id,
                status,
                kind: self
                    .components
                    .info(component_id)
                    .unwrap_or_else(|| panic!("unregistered component {component_id:?}"))
                    .storage(),
                constructor: (i >= explicit_len)
                    .then(|| info.required()[i - explicit_len].constructor.clone()),
            })
            .collect()
    }

    /// Write the bundle's values (and construct missing required ones) at
    /// the entity's final location.
    fn write_bundle<B: Bundle>(
        &mut self,
        entity: Entity,
        bundle: B,
        plan: &[WritePlan],
        location: Location,
        mode: InsertMode,
        tick: Tick,
    ) {
        let Self {
            components,
            storages,
            ..
        } = self;
        let components: &Components = components;
        let Storages {
            tables,
            sparse_sets,
            ..
        } = storages;
        let table = tables
            .get_mut(location.table_id)
            .unwrap_or_else(|| panic!("location points at missing table"));

        let mut index = 0;
        bundle.get_components(&mut |value| {
            let entry = &plan[index];
            index += 1;
            debug_assert!(!entry.required());
            match entry.kind {
                StorageKind::Table => {
                    let column = table
                        .column_mut(entry.component_id)
                        .unwrap_or_else(|| panic!("table lost column {:?}", entry.component_id));
                    match (entry.status, mode) {
                        // SAFETY: an added slot is freshly allocated and
                        // uninitialized; value ownership transfers here.
                        (ComponentStatus::Added, _) => unsafe {
                            column.initialize(location.table_row, value, ComponentTicks::new(tick));
                        },
                        // SAFETY: an existing slot holds a valid value.
                        (ComponentStatus::Existing, InsertMode::Replace) => unsafe {
                            column.replace(location.table_row, value, tick);
                        },
                        (ComponentStatus::Existing, InsertMode::Keep) => {
                            drop_erased(components, entry.component_id, value);
                        }
                    }
                }
                StorageKind::SparseSet => match (entry.status, mode) {
                    (ComponentStatus::Existing, InsertMode::Keep) => {
                        drop_erased(components, entry.component_id, value);
                    }
                    // SAFETY: value ownership transfers to the set.
                    _ => unsafe {
                        sparse_sets
                            .get_or_insert(entry.component_id, components)
                            .insert(entity, value, tick);
                    },
                },
            }
        });
        debug_assert_eq!(
            index,
            plan.iter().filter(|p| !p.required()).count(),
            "bundle yielded a different number of values than it declared"
        );

        // Required components the entity lacked get freshly constructed
        // values. Existing required components are left untouched.
        for entry in plan
            .iter()
            .filter(|p| p.required() && p.status == ComponentStatus::Added)
        {
            let info = components
                .info(entry.component_id)
                .unwrap_or_else(|| panic!("unregistered component {:?}", entry.component_id));
            let constructor = entry
                .constructor
                .as_ref()
                .unwrap_or_else(|| panic!("required component without a constructor"));
            construct_into(info.layout(), constructor, |value| match entry.kind {
                StorageKind::Table => {
                    let column = table
                        .column_mut(entry.component_id)
                        .unwrap_or_else(|| panic!("table lost column {:?}", entry.component_id));
                    // SAFETY: an added slot is freshly allocated and
                    // uninitialized; ownership of the constructed value
                    // transfers here.
                    unsafe {
                        column.initialize(location.table_row, value, ComponentTicks::new(tick));
                    }
                }
                // SAFETY: ownership of the constructed value transfers to
                // the set.
                StorageKind::SparseSet => unsafe {
                    sparse_sets
                        .get_or_insert(entry.component_id, components)
                        .insert(entity, value, tick);
                },
            });
        }
    }

    // ==================== Component access ====================

    /// Whether `entity` currently has component `C`.
    pub fn has<C: Component>(&self, entity: Entity) -> bool {
        let Some(location) = self.entities.get(entity) else {
            return false;
        };
        let Some(id) = self.components.component_id::<C>() else {
            return false;
        };
        self.archetypes
            .get(location.archetype_id)
            .is_some_and(|a| a.contains(id))
    }

    fn component_ptr(&self, entity: Entity, id: ComponentId) -> Option<*mut u8> {
        let location = self.entities.get(entity)?;
        let info = self.components.info(id)?;
        match info.storage() {
            StorageKind::Table => {
                let table = self.storages.tables.get(location.table_id)?;
                let column = table.column(id)?;
                if location.table_row.index() >= column.len() {
                    return None;
                }
                // SAFETY: a live location's table row is in bounds and
                // holds a valid value for every member column.
                Some(unsafe { column.get_unchecked(location.table_row) })
            }
            StorageKind::SparseSet => self.storages.sparse_sets.get(id)?.get(entity),
        }
    }

    /// Borrow `entity`'s value of component `C`.
    pub fn get<C: Component>(&self, entity: Entity) -> Option<&C> {
        let id = self.components.component_id::<C>()?;
        // SAFETY: the pointer comes from storage registered for C and
        // borrows &self.
        self.component_ptr(entity, id)
            .map(|ptr| unsafe { &*ptr.cast::<C>() })
    }

    /// Mutably borrow `entity`'s value of component `C`, stamping its
    /// changed tick.
    pub fn get_mut<C: Component>(&mut self, entity: Entity) -> Option<&mut C> {
        let id = self.components.component_id::<C>()?;
        let tick = self.change_tick();
        let location = self.entities.get(entity)?;
        let info = self.components.info(id)?;
        match info.storage() {
            StorageKind::Table => {
                let table = self.storages.tables.get_mut(location.table_id)?;
                let column = table.column_mut(id)?;
                if location.table_row.index() >= column.len() {
                    return None;
                }
                column.mark_changed(location.table_row, tick);
                // SAFETY: as in get, with a unique borrow of self.
                Some(unsafe { &mut *column.get_unchecked(location.table_row).cast::<C>() })
            }
            StorageKind::SparseSet => {
                let set = self.storages.sparse_sets.get_mut(id)?;
                set.mark_changed(entity, tick);
                // SAFETY: as in get, with a unique borrow of self.
                set.get(entity).map(|ptr| unsafe { &mut *ptr.cast::<C>() })
            }
        }
    }

    /// Added/changed ticks of `entity`'s value of component `C`.
    pub fn get_ticks<C: Component>(&self, entity: Entity) -> Option<ComponentTicks> {
        let id = self.components.component_id::<C>()?;
        let location = self.entities.get(entity)?;
        match self.components.info(id)?.storage() {
            StorageKind::Table => self
                .storages
                .tables
                .get(location.table_id)?
                .column(id)?
                .ticks(location.table_row),
            StorageKind::SparseSet => self.storages.sparse_sets.get(id)?.ticks(entity),
        }
    }

    // ==================== Resources ====================

    /// Insert or overwrite the `R` singleton.
    pub fn insert_resource<R: Resource>(&mut self, value: R) {
        let id = self.components.register_resource::<R>();
        let tick = self.change_tick();
        let info = self
            .components
            .info(id)
            .unwrap_or_else(|| panic!("resource {id:?} vanished from the registry"));
        let slot = self.storages.resources.get_or_insert(id, info);
        let mut value = std::mem::ManuallyDrop::new(value);
        // SAFETY: the slot was created for R; ownership transfers.
        unsafe { slot.insert((&raw mut value).cast(), tick) };
    }

    /// Borrow the `R` singleton, if present.
    pub fn get_resource<R: Resource>(&self) -> Option<&R> {
        let id = self.components.resource_id::<R>()?;
        // SAFETY: the slot stores values of R and borrows &self.
        self.storages
            .resources
            .get(id)?
            .get()
            .map(|ptr| unsafe { &*ptr.cast::<R>() })
    }

    /// Mutably borrow the `R` singleton, stamping its changed tick.
    pub fn get_resource_mut<R: Resource>(&mut self) -> Option<&mut R> {
        let id = self.components.resource_id::<R>()?;
        let tick = self.change_tick();
        let slot = self.storages.resources.get_mut(id)?;
        if slot.get().is_some() {
            slot.set_changed(tick);
        }
        // SAFETY: as in get_resource, with a unique borrow of self.
        slot.get().map(|ptr| unsafe { &mut *ptr.cast::<R>() })
    }

    /// Borrow the `R` singleton. Panics if absent.
    pub fn resource<R: Resource>(&self) -> &R {
        match self.get_resource::<R>() {
            Some(value) => value,
            None => panic!("resource {} is not present", std::any::type_name::<R>()),
        }
    }

    /// Mutably borrow the `R` singleton. Panics if absent.
    pub fn resource_mut<R: Resource>(&mut self) -> &mut R {
        match self.get_resource_mut::<R>() {
            Some(value) => value,
            None => panic!("resource {} is not present", std::any::type_name::<R>()),
        }
    }

    pub fn contains_resource<R: Resource>(&self) -> bool {
        self.components
            .resource_id::<R>()
            .and_then(|id| self.storages.resources.get(id))
            .is_some_and(|slot| slot.is_present())
    }

    /// Remove the `R` singleton and return it.
    pub fn remove_resource<R: Resource>(&mut self) -> Option<R> {
        let id = self.components.resource_id::<R>()?;
        let slot = self.storages.resources.get_mut(id)?;
        let mut value = std::mem::MaybeUninit::<R>::uninit();
        // SAFETY: the slot stores values of R; ownership moves into value.
        unsafe { slot.remove_to(value.as_mut_ptr().cast()) }
            .then(|| unsafe { value.assume_init() })
    }

    /// Resource added/changed ticks, if present.
    pub fn resource_ticks<R: Resource>(&self) -> Option<ComponentTicks> {
        let id = self.components.resource_id::<R>()?;
        self.storages.resources.get(id)?.ticks()
    }

    // ==================== Deferred commands ====================

    /// Queue a structural mutation to run at the next [`Self::flush`].
    /// Takes `&self` so systems, hooks and conditions can all queue.
    pub fn queue(&self, command: impl FnOnce(&mut World) + Send + 'static) {
        self.command_queue.push(command);
    }

    /// Materialize reserved entities and drain the command queue. Commands
    /// queued by commands run in the same flush.
    pub fn flush(&mut self) {
        self.flush_entities();
        while let Some(command) = self.command_queue.pop() {
            command(self);
            self.flush_entities();
        }
    }

    /// Dispatch a hook kind for each listed component that registered one.
    fn trigger_hooks(
        &mut self,
        entity: Entity,
        component_ids: &[ComponentId],
        select: impl Fn(&Hooks) -> Option<ComponentHook>,
    ) {
        let hooks: Vec<(ComponentHook, ComponentId)> = component_ids
            .iter()
            .filter_map(|&id| {
                let info = self.components.info(id)?;
                select(info.hooks()).map(|hook| (hook, id))
            })
            .collect();
        for (hook, component_id) in hooks {
            hook(
                self,
                HookContext {
                    entity,
                    component_id,
                },
            );
        }
    }
}

#[derive(Clone)]
struct WritePlan {
    component_id: ComponentId,
    status: ComponentStatus,
    kind: StorageKind,
    /// Present exactly for components appended by the required-component
    /// expansion.
    constructor: Option<RequiredConstructor>,
}

impl WritePlan {
    #[inline]
    fn required(&self) -> bool {
        self.constructor.is_some()
    }
}

fn drop_erased(components: &Components, component_id: ComponentId, value: *mut u8) {
    if let Some(drop) = components
        .info(component_id)
        .and_then(|info| info.drop())
    {
        // SAFETY: value points at a live value of this component's type.
        unsafe { drop(value) };
    }
}

/// Run `ctor` into an aligned scratch slot and hand the constructed value to
/// `write`, which takes ownership of it.
fn construct_into(
    layout: std::alloc::Layout,
    ctor: &RequiredConstructor,
    write: impl FnOnce(*mut u8),
) {
    if layout.size() == 0 {
        let ptr = std::ptr::NonNull::<u8>::dangling().as_ptr();
        ctor(ptr);
        write(ptr);
        return;
    }
    // SAFETY: the layout has non-zero size; ownership of the constructed
    // value leaves through `write` before the scratch is released.
    unsafe {
        let ptr = std::alloc::alloc(layout);
        if ptr.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        ctor(ptr);
        write(ptr);
        std::alloc::dealloc(ptr, layout);
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{Component as DeriveComponent, Resource as DeriveResource};

    #[derive(DeriveComponent, Debug, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(DeriveComponent, Debug, PartialEq)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    #[derive(DeriveComponent, Debug, PartialEq)]
    #[component(storage = "sparse")]
    struct Selected(u32);

    #[derive(DeriveComponent, Debug, PartialEq)]
    struct Team(u32);

    #[derive(DeriveResource, Debug, Default, PartialEq)]
    struct HookLog(Vec<&'static str>);

    fn pos(x: f32, y: f32) -> Position {
        Position { x, y }
    }

    #[test]
    fn spawn_and_get_components() {
        // Given
        let mut world = World::new();

        // When
        let entity = world.spawn((pos(1.0, 2.0), Velocity { x: 3.0, y: 4.0 }));

        // Then
        assert!(world.contains(entity));
        assert_eq!(world.get::<Position>(entity), Some(&pos(1.0, 2.0)));
        assert_eq!(
            world.get::<Velocity>(entity),
            Some(&Velocity { x: 3.0, y: 4.0 })
        );
        assert_eq!(world.get::<Team>(entity), None);
    }

    #[test]
    fn spawn_batch_shares_one_archetype() {
        // Given
        let mut world = World::new();

        // When
        let entities = world.spawn_batch((0..100u32).map(|i| (Team(i), pos(i as f32, 0.0))));

        // Then - every entity landed in the same archetype with its values
        assert_eq!(entities.len(), 100);
        let first = world.entities.get(entities[0]).unwrap();
        for (i, &entity) in entities.iter().enumerate() {
            let location = world.entities.get(entity).unwrap();
            assert_eq!(location.archetype_id, first.archetype_id);
            assert_eq!(world.get::<Team>(entity), Some(&Team(i as u32)));
        }
    }

    #[test]
    fn same_component_set_shares_one_archetype() {
        // Given
        let mut world = World::new();

        // When - two spawns with the same set in different declaration order
        let a = world.spawn((pos(0.0, 0.0), Velocity { x: 0.0, y: 0.0 }));
        let b = world.spawn((Velocity { x: 0.0, y: 0.0 }, pos(0.0, 0.0)));

        // Then
        let loc_a = world.entities.get(a).unwrap();
        let loc_b = world.entities.get(b).unwrap();
        assert_eq!(loc_a.archetype_id, loc_b.archetype_id);
        assert_eq!(loc_a.table_id, loc_b.table_id);
    }

    #[test]
    fn insert_moves_entity_and_keeps_values() {
        // Given
        let mut world = World::new();
        let entity = world.spawn(pos(1.0, 1.0));
        let before = world.entities.get(entity).unwrap();

        // When
        world.insert(entity, Velocity { x: 5.0, y: 0.0 }).unwrap();

        // Then - archetype changed, both values readable
        let after = world.entities.get(entity).unwrap();
        assert_ne!(before.archetype_id, after.archetype_id);
        assert_eq!(world.get::<Position>(entity), Some(&pos(1.0, 1.0)));
        assert_eq!(
            world.get::<Velocity>(entity),
            Some(&Velocity { x: 5.0, y: 0.0 })
        );
    }

    #[test]
    fn insert_replace_overwrites_and_keep_preserves() {
        // Given
        let mut world = World::new();
        let entity = world.spawn(Team(1));

        // When - keep mode on an existing component
        world
            .insert_with_mode(entity, Team(2), InsertMode::Keep)
            .unwrap();
        // Then - old value survives
        assert_eq!(world.get::<Team>(entity), Some(&Team(1)));

        // When - replace mode
        world.insert(entity, Team(3)).unwrap();
        // Then
        assert_eq!(world.get::<Team>(entity), Some(&Team(3)));
    }

    #[test]
    fn replace_preserves_added_tick_and_bumps_changed() {
        // Given
        let mut world = World::new();
        let entity = world.spawn(Team(1));
        let first = world.get_ticks::<Team>(entity).unwrap();

        // When
        for _ in 0..3 {
            world.increment_change_tick();
        }
        world.insert(entity, Team(2)).unwrap();

        // Then
        let second = world.get_ticks::<Team>(entity).unwrap();
        assert_eq!(second.added, first.added);
        assert!(second.changed.get() > first.changed.get());
    }

    #[test]
    fn despawn_patches_swapped_rows() {
        // Given - three entities in one table
        let mut world = World::new();
        let a = world.spawn(Team(10));
        let b = world.spawn(Team(20));
        let c = world.spawn(Team(30));

        // When - the first is despawned, the last backfills its row
        assert!(world.despawn(a));

        // Then - the survivors still resolve to their own values
        assert!(!world.contains(a));
        assert_eq!(world.get::<Team>(b), Some(&Team(20)));
        assert_eq!(world.get::<Team>(c), Some(&Team(30)));
        // And the archetype entity list agrees with the allocator.
        for entity in [b, c] {
            let location = world.entities.get(entity).unwrap();
            let archetype = world.archetypes.get(location.archetype_id).unwrap();
            let record = archetype.entities()[location.archetype_row.index()];
            assert_eq!(record.entity, entity);
            assert_eq!(record.table_row, location.table_row);
        }
    }

    #[test]
    fn operations_on_stale_entities_fail() {
        // Given
        let mut world = World::new();
        let entity = world.spawn(Team(1));
        world.despawn(entity);

        // Then
        assert_eq!(
            world.insert(entity, Team(2)),
            Err(StaleEntity(entity))
        );
        assert_eq!(world.remove::<Team>(entity), Err(StaleEntity(entity)));
        assert!(!world.despawn(entity));
        assert_eq!(world.get::<Team>(entity), None);
    }

    #[test]
    fn remove_takes_intersection_only() {
        // Given - an entity with Position but no Velocity
        let mut world = World::new();
        let entity = world.spawn((pos(1.0, 1.0), Team(1)));

        // When - removing a bundle it only partially has
        world.remove::<(Position, Velocity)>(entity).unwrap();

        // Then - the present component is gone, the rest untouched
        assert_eq!(world.get::<Position>(entity), None);
        assert_eq!(world.get::<Team>(entity), Some(&Team(1)));
    }

    #[test]
    fn take_is_all_or_nothing_and_cached() {
        // Given
        let mut world = World::new();
        let entity = world.spawn((pos(1.0, 1.0), Team(1)));
        let archetypes_before = world.archetypes.len();

        // When - taking a bundle with a missing component
        let taken = world.take::<(Position, Velocity)>(entity).unwrap();

        // Then - nothing was removed and the failure is cached on the edge
        assert!(!taken);
        assert_eq!(world.get::<Position>(entity), Some(&pos(1.0, 1.0)));
        assert_eq!(world.archetypes.len(), archetypes_before);
        assert!(!world.take::<(Position, Velocity)>(entity).unwrap());

        // When - taking a fully present bundle
        let taken = world.take::<(Position, Team)>(entity).unwrap();

        // Then
        assert!(taken);
        assert_eq!(world.get::<Position>(entity), None);
        assert_eq!(world.get::<Team>(entity), None);
    }

    #[test]
    fn repeated_transitions_reuse_cached_edges() {
        // Given - one entity bouncing between two archetypes
        let mut world = World::new();
        let entity = world.spawn(pos(0.0, 0.0));
        world.insert(entity, Team(0)).unwrap();
        world.remove::<Team>(entity).unwrap();
        let archetypes_before = world.archetypes.len();
        let tables_before = world.storages.tables.len();

        // When - the same transitions run many more times
        for i in 0..50 {
            world.insert(entity, Team(i)).unwrap();
            world.remove::<Team>(entity).unwrap();
        }

        // Then - no new archetypes or tables were created
        assert_eq!(world.archetypes.len(), archetypes_before);
        assert_eq!(world.storages.tables.len(), tables_before);
    }

    #[test]
    fn sparse_component_insert_keeps_table_row() {
        // Given
        let mut world = World::new();
        let entity = world.spawn(pos(1.0, 1.0));
        let before = world.entities.get(entity).unwrap();

        // When - a sparse component is added
        world.insert(entity, Selected(7)).unwrap();

        // Then - the archetype changes but the table row does not move
        let after = world.entities.get(entity).unwrap();
        assert_ne!(before.archetype_id, after.archetype_id);
        assert_eq!(before.table_id, after.table_id);
        assert_eq!(before.table_row, after.table_row);
        assert_eq!(world.get::<Selected>(entity), Some(&Selected(7)));

        // When - it is removed again
        world.remove::<Selected>(entity).unwrap();

        // Then
        assert_eq!(world.get::<Selected>(entity), None);
        assert_eq!(world.get::<Position>(entity), Some(&pos(1.0, 1.0)));
    }

    #[test]
    fn hooks_fire_in_contract_order() {
        // Given - a component with all four hooks appending to a log
        #[derive(DeriveComponent)]
        struct Hooked(u32);

        let mut world = World::new();
        world.insert_resource(HookLog::default());
        world
            .register_hooks::<Hooked>()
            .on_add(|world, _| world.resource_mut::<HookLog>().0.push("add"))
            .on_insert(|world, _| world.resource_mut::<HookLog>().0.push("insert"))
            .on_replace(|world, _| world.resource_mut::<HookLog>().0.push("replace"))
            .on_remove(|world, _| world.resource_mut::<HookLog>().0.push("remove"));

        // When - first insert
        let entity = world.spawn(Hooked(1));
        // Then - a new component fires add then insert
        assert_eq!(world.resource::<HookLog>().0, vec!["add", "insert"]);

        // When - overwrite
        world.insert(entity, Hooked(2)).unwrap();
        // Then - replace precedes the write, insert follows it, no add
        assert_eq!(
            world.resource::<HookLog>().0,
            vec!["add", "insert", "replace", "insert"]
        );

        // When - keep-mode insert on an existing value
        world
            .insert_with_mode(entity, Hooked(3), InsertMode::Keep)
            .unwrap();
        // Then - nothing fires; the value was not touched
        assert_eq!(world.resource::<HookLog>().0.len(), 4);

        // When - removal
        world.remove::<Hooked>(entity).unwrap();
        // Then - replace then remove, before the value is dropped
        assert_eq!(
            world.resource::<HookLog>().0,
            vec!["add", "insert", "replace", "insert", "replace", "remove"]
        );
    }

    #[test]
    fn despawn_fires_replace_then_remove() {
        #[derive(DeriveComponent)]
        struct Hooked;

        let mut world = World::new();
        world.insert_resource(HookLog::default());
        world
            .register_hooks::<Hooked>()
            .on_replace(|world, _| world.resource_mut::<HookLog>().0.push("replace"))
            .on_remove(|world, _| world.resource_mut::<HookLog>().0.push("remove"));
        let entity = world.spawn(Hooked);

        // When
        world.despawn(entity);

        // Then
        assert_eq!(world.resource::<HookLog>().0, vec!["replace", "remove"]);
    }

    #[test]
    #[should_panic(expected = "must be registered before")]
    fn late_hook_registration_panics() {
        let mut world = World::new();
        let _entity = world.spawn(Team(1));
        world.register_hooks::<Team>();
    }

    #[test]
    #[should_panic(expected = "must be registered before")]
    fn late_requirement_registration_panics() {
        let mut world = World::new();
        let _entity = world.spawn(pos(0.0, 0.0));
        world.register_required::<Position, Team>(|| Team(1));
    }

    #[test]
    fn required_components_ride_along() {
        // Given - Position requires Team(42)
        let mut world = World::new();
        world.register_required::<Position, Team>(|| Team(42));

        // When - spawning with just Position
        let entity = world.spawn(pos(0.0, 0.0));

        // Then - Team was constructed alongside
        assert_eq!(world.get::<Team>(entity), Some(&Team(42)));

        // When - an entity already has its own Team
        let other = world.spawn((Team(7), pos(0.0, 0.0)));

        // Then - the existing value wins
        assert_eq!(world.get::<Team>(other), Some(&Team(7)));
    }

    #[test]
    fn resources_insert_get_remove() {
        #[derive(DeriveResource, Debug, PartialEq)]
        struct Gravity(f32);

        let mut world = World::new();
        assert!(!world.contains_resource::<Gravity>());
        assert_eq!(world.get_resource::<Gravity>(), None);

        world.insert_resource(Gravity(-9.8));
        assert_eq!(world.resource::<Gravity>(), &Gravity(-9.8));

        world.resource_mut::<Gravity>().0 = -1.6;
        assert_eq!(world.remove_resource::<Gravity>(), Some(Gravity(-1.6)));
        assert!(!world.contains_resource::<Gravity>());
    }

    #[test]
    fn resource_overwrite_keeps_added_tick() {
        #[derive(DeriveResource)]
        struct Counter(u32);

        let mut world = World::new();
        world.insert_resource(Counter(0));
        let first = world.resource_ticks::<Counter>().unwrap();
        for _ in 0..3 {
            world.increment_change_tick();
        }
        world.insert_resource(Counter(1));
        let second = world.resource_ticks::<Counter>().unwrap();
        assert_eq!(second.added, first.added);
        assert!(second.changed.get() > first.changed.get());
        assert_eq!(world.resource::<Counter>().0, 1);
    }

    #[test]
    fn reserved_entities_materialize_on_flush() {
        // Given
        let mut world = World::new();
        let reserved = world.reserve_entity();
        assert!(!world.contains(reserved));

        // When
        world.flush();

        // Then - live in the empty archetype
        assert!(world.contains(reserved));
        let location = world.entities.get(reserved).unwrap();
        assert_eq!(location.archetype_id, ArchetypeId::EMPTY);
    }

    #[test]
    fn queued_commands_run_at_flush_in_order() {
        // Given
        let mut world = World::new();
        world.insert_resource(HookLog::default());
        world.queue(|world| world.resource_mut::<HookLog>().0.push("first"));
        world.queue(|world| {
            world.resource_mut::<HookLog>().0.push("second");
            // Commands may queue more commands; they run in the same flush.
            world.queue(|world| world.resource_mut::<HookLog>().0.push("nested"));
        });
        assert!(world.resource::<HookLog>().0.is_empty());

        // When
        world.flush();

        // Then
        assert_eq!(
            world.resource::<HookLog>().0,
            vec!["first", "second", "nested"]
        );
    }

    #[test]
    fn check_change_ticks_clamps_every_store() {
        use crate::ecs::storage::MAX_CHANGE_AGE;

        // Given - a table component, a sparse component and a resource all
        // stamped near tick 1.
        let mut world = World::new();
        let entity = world.spawn((Team(1), Selected(2)));
        world.insert_resource(HookLog::default());

        // When - the counter runs far past the maximum age and the health
        // check runs.
        world
            .change_tick
            .store(MAX_CHANGE_AGE.wrapping_add(100), Ordering::Release);
        let now = world.change_tick();
        world.check_change_ticks();

        // Then - stored ticks in every store were clamped to the maximum age.
        let table_ticks = world.get_ticks::<Team>(entity).unwrap();
        assert_eq!(table_ticks.added.age(now), MAX_CHANGE_AGE);
        assert_eq!(table_ticks.changed.age(now), MAX_CHANGE_AGE);
        let sparse_ticks = world.get_ticks::<Selected>(entity).unwrap();
        assert_eq!(sparse_ticks.added.age(now), MAX_CHANGE_AGE);
        assert_eq!(sparse_ticks.changed.age(now), MAX_CHANGE_AGE);
        let resource_ticks = world.resource_ticks::<HookLog>().unwrap();
        assert_eq!(resource_ticks.added.age(now), MAX_CHANGE_AGE);
        assert_eq!(resource_ticks.changed.age(now), MAX_CHANGE_AGE);

        // And clamped history reads as old, while a fresh write still reads
        // as changed.
        assert!(!table_ticks.changed.is_newer_than(Tick::ZERO, now));
        let last_run = world.change_tick();
        world.increment_change_tick();
        world.get_mut::<Team>(entity).unwrap().0 = 5;
        let after = world.get_ticks::<Team>(entity).unwrap();
        assert!(after.changed.is_newer_than(last_run, world.change_tick()));
    }

    #[test]
    fn get_mut_stamps_changed_tick() {
        let mut world = World::new();
        let entity = world.spawn(Team(1));
        let before = world.get_ticks::<Team>(entity).unwrap();
        for _ in 0..2 {
            world.increment_change_tick();
        }

        world.get_mut::<Team>(entity).unwrap().0 = 9;

        let after = world.get_ticks::<Team>(entity).unwrap();
        assert!(after.changed.get() > before.changed.get());
        assert_eq!(after.added, before.added);
    }
}
