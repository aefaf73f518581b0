use std::collections::HashMap;

use crate::ecs::component::{ComponentId, Components, Info};
use crate::ecs::entity::Entity;
use crate::ecs::storage::Row;
use crate::ecs::storage::change::{ComponentTicks, Tick};
use crate::ecs::storage::column::Column;

/// Per-component sparse storage: a dense value column indexed through a
/// sparse entity-index map. Values stay put when their entity changes
/// archetype, which makes insert and remove cheap at the cost of an extra
/// indirection on access.
#[derive(Debug)]
pub struct ComponentSparseSet {
    dense: Column,
    /// Entity owning each dense slot, parallel to `dense`.
    entities: Vec<Entity>,
    /// Entity index to dense slot. `None` for entities without the
    /// component.
    sparse: Vec<Option<u32>>,
}

impl ComponentSparseSet {
    pub fn new(info: &Info) -> Self {
        Self {
            dense: Column::new(info, 0),
            entities: Vec::new(),
            sparse: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.dense_row(entity).is_some()
    }

    fn dense_row(&self, entity: Entity) -> Option<Row> {
        let slot = (*self.sparse.get(entity.index() as usize)?)?;
        // A stale generation means the slot belongs to a previous
        // incarnation of this index.
        (self.entities[slot as usize] == entity).then(|| Row::new(slot as usize))
    }

    /// Insert a value for `entity`, taking ownership of the bytes at
    /// `value`. Overwrites (and drops) any existing value, keeping its
    /// added tick.
    ///
    /// # Safety
    /// `value` must point to a valid value of this set's component type.
    pub unsafe fn insert(&mut self, entity: Entity, value: *mut u8, tick: Tick) {
        if let Some(row) = self.dense_row(entity) {
            // SAFETY: row holds a valid value; ownership of the incoming
            // bytes transfers to the column.
            unsafe { self.dense.replace(row, value, tick) };
            return;
        }
        let index = entity.index() as usize;
        if index >= self.sparse.len() {
            self.sparse.resize(index + 1, None);
        }
        let row = self.dense.push_uninit(tick);
        // SAFETY: the slot was just allocated uninitialized.
        unsafe { self.dense.initialize(row, value, ComponentTicks::new(tick)) };
        self.entities.push(entity);
        self.sparse[index] = Some(row.index() as u32);
    }

    /// Pointer to the value for `entity`, if present.
    pub fn get(&self, entity: Entity) -> Option<*mut u8> {
        let row = self.dense_row(entity)?;
        // SAFETY: dense_row only returns in-bounds rows holding values.
        Some(unsafe { self.dense.get_unchecked(row) })
    }

    /// Stamp the changed tick of `entity`'s value, if present.
    pub fn mark_changed(&mut self, entity: Entity, tick: Tick) {
        if let Some(row) = self.dense_row(entity) {
            self.dense.mark_changed(row, tick);
        }
    }

    /// Ticks for the value of `entity`, if present.
    pub fn ticks(&self, entity: Entity) -> Option<ComponentTicks> {
        self.dense.ticks(self.dense_row(entity)?)
    }

    /// Remove and drop the value for `entity`. Returns whether a value was
    /// present.
    pub fn remove(&mut self, entity: Entity) -> bool {
        let Some(row) = self.dense_row(entity) else {
            return false;
        };
        // SAFETY: row came from dense_row.
        unsafe { self.dense.swap_remove_and_drop_unchecked(row) };
        self.entities.swap_remove(row.index());
        self.sparse[entity.index() as usize] = None;
        if let Some(&moved) = self.entities.get(row.index()) {
            self.sparse[moved.index() as usize] = Some(row.index() as u32);
        }
        true
    }

    /// Clamp all stored ticks against `now`.
    pub fn check_ticks(&mut self, now: Tick) {
        self.dense.check_ticks(now);
    }
}

/// All sparse-set component stores in a world, created lazily on first
/// insert of each sparse component.
#[derive(Debug, Default)]
pub struct SparseSets {
    sets: HashMap<ComponentId, ComponentSparseSet>,
}

impl SparseSets {
    pub fn get(&self, component_id: ComponentId) -> Option<&ComponentSparseSet> {
        self.sets.get(&component_id)
    }

    pub fn get_mut(&mut self, component_id: ComponentId) -> Option<&mut ComponentSparseSet> {
        self.sets.get_mut(&component_id)
    }

    pub(crate) fn get_or_insert(
        &mut self,
        component_id: ComponentId,
        components: &Components,
    ) -> &mut ComponentSparseSet {
        self.sets.entry(component_id).or_insert_with(|| {
            let info = components
                .info(component_id)
                .unwrap_or_else(|| panic!("sparse set for unregistered component {component_id:?}"));
            ComponentSparseSet::new(info)
        })
    }

    /// Clamp ticks in every set against `now`.
    pub fn check_ticks(&mut self, now: Tick) {
        for set in self.sets.values_mut() {
            set.check_ticks(now);
        }
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{Info, StorageKind};

    fn u32_info() -> Info {
        Info::new_for_tests::<u32>("Value", StorageKind::SparseSet)
    }

    fn insert_u32(set: &mut ComponentSparseSet, entity: Entity, value: u32, tick: Tick) {
        let mut value = std::mem::ManuallyDrop::new(value);
        // SAFETY: the set was built for u32.
        unsafe { set.insert(entity, (&raw mut value).cast(), tick) };
    }

    fn read_u32(set: &ComponentSparseSet, entity: Entity) -> Option<u32> {
        // SAFETY: the set was built for u32 and the pointer is live.
        set.get(entity).map(|ptr| unsafe { ptr.cast::<u32>().read() })
    }

    #[test]
    fn insert_get_remove() {
        // Given a sparse set with two entities.
        let mut set = ComponentSparseSet::new(&u32_info());
        let a = Entity::from_raw(0);
        let b = Entity::from_raw(5);
        insert_u32(&mut set, a, 10, Tick::new(1));
        insert_u32(&mut set, b, 20, Tick::new(1));
        // Then both values are reachable.
        assert_eq!(read_u32(&set, a), Some(10));
        assert_eq!(read_u32(&set, b), Some(20));
        // When one is removed.
        assert!(set.remove(a));
        // Then it is gone and the other is intact.
        assert_eq!(read_u32(&set, a), None);
        assert_eq!(read_u32(&set, b), Some(20));
        assert!(!set.remove(a));
    }

    #[test]
    fn overwrite_keeps_added_tick() {
        // Given a value inserted at tick 1.
        let mut set = ComponentSparseSet::new(&u32_info());
        let a = Entity::from_raw(0);
        insert_u32(&mut set, a, 1, Tick::new(1));
        // When overwritten at tick 5.
        insert_u32(&mut set, a, 2, Tick::new(5));
        // Then added is preserved and changed advances.
        let ticks = set.ticks(a).unwrap();
        assert_eq!(ticks.added, Tick::new(1));
        assert_eq!(ticks.changed, Tick::new(5));
        assert_eq!(read_u32(&set, a), Some(2));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn stale_generation_does_not_match() {
        // Given a value owned by generation 0 of index 3.
        let mut set = ComponentSparseSet::new(&u32_info());
        let old = Entity::from_raw(3);
        insert_u32(&mut set, old, 7, Tick::new(1));
        // When queried with a later generation of the same index.
        let new = Entity::from_raw_parts(3, 1);
        // Then no value is found.
        assert!(!set.contains(new));
        assert!(set.contains(old));
    }

    #[test]
    fn remove_patches_swapped_slot() {
        // Given three entities in dense order.
        let mut set = ComponentSparseSet::new(&u32_info());
        let entities: Vec<_> = (0..3).map(Entity::from_raw).collect();
        for (i, &entity) in entities.iter().enumerate() {
            insert_u32(&mut set, entity, i as u32 * 100, Tick::new(1));
        }
        // When the first is removed, the last backfills its dense slot.
        assert!(set.remove(entities[0]));
        // Then the swapped entity is still reachable through the sparse map.
        assert_eq!(read_u32(&set, entities[2]), Some(200));
        assert_eq!(read_u32(&set, entities[1]), Some(100));
    }
}
