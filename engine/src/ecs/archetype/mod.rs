//! Archetypes: one node per exact component set.
//!
//! Every live entity belongs to exactly one archetype. The archetype knows
//! which table backs its dense components, which sparse components ride
//! along, and caches the outcome of bundle transitions on its edges so the
//! set math for an insert or remove runs once per (archetype, bundle) pair.
//!
//! ```text
//!        insert (Velocity)
//!   [Position] ----------------> [Position, Velocity]
//!        ^                              |
//!        +------------------------------+
//!              remove (Velocity)
//! ```

use std::collections::HashMap;

use bitflags::bitflags;

use crate::ecs::bundle::{BundleId, ComponentStatus};
use crate::ecs::component::{ComponentId, Components, StorageKind};
use crate::ecs::entity::Entity;
use crate::ecs::storage::{ArchetypeRow, Row, TableId};

/// Identifies an archetype within the world's archetype list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    /// The archetype of entities with no components.
    pub const EMPTY: Self = Self(0);
    /// A sentinel id used in invalid locations.
    pub const INVALID: Self = Self(u32::MAX);

    #[inline]
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    /// Which lifecycle hooks any component of an archetype carries, computed
    /// once at archetype creation so per-entity operations can skip hook
    /// dispatch entirely on hook-free archetypes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArchetypeFlags: u8 {
        const ON_ADD_HOOK     = 1 << 0;
        const ON_INSERT_HOOK  = 1 << 1;
        const ON_REPLACE_HOOK = 1 << 2;
        const ON_REMOVE_HOOK  = 1 << 3;
    }
}

/// A cached insert transition: where the bundle leads from one archetype,
/// and the add-or-overwrite status of every component the bundle writes
/// (explicit components first, then required ones).
#[derive(Debug, Clone)]
pub struct InsertBundleEdge {
    pub archetype_id: ArchetypeId,
    pub statuses: Vec<ComponentStatus>,
}

/// Cached bundle transitions out of one archetype.
#[derive(Debug, Default)]
pub struct Edges {
    insert_bundle: HashMap<BundleId, InsertBundleEdge>,
    /// `None` means the remove cannot proceed from this archetype (a bundle
    /// component is missing and intersection semantics were not requested).
    remove_bundle: HashMap<BundleId, Option<ArchetypeId>>,
    take_bundle: HashMap<BundleId, Option<ArchetypeId>>,
}

impl Edges {
    #[inline]
    pub fn get_insert_bundle(&self, bundle_id: BundleId) -> Option<&InsertBundleEdge> {
        self.insert_bundle.get(&bundle_id)
    }

    pub(crate) fn cache_insert_bundle(&mut self, bundle_id: BundleId, edge: InsertBundleEdge) {
        self.insert_bundle.insert(bundle_id, edge);
    }

    #[inline]
    pub fn get_remove_bundle(&self, bundle_id: BundleId) -> Option<Option<ArchetypeId>> {
        self.remove_bundle.get(&bundle_id).copied()
    }

    pub(crate) fn cache_remove_bundle(&mut self, bundle_id: BundleId, result: Option<ArchetypeId>) {
        self.remove_bundle.insert(bundle_id, result);
    }

    #[inline]
    pub fn get_take_bundle(&self, bundle_id: BundleId) -> Option<Option<ArchetypeId>> {
        self.take_bundle.get(&bundle_id).copied()
    }

    pub(crate) fn cache_take_bundle(&mut self, bundle_id: BundleId, result: Option<ArchetypeId>) {
        self.take_bundle.insert(bundle_id, result);
    }
}

/// An entity's membership record in its archetype.
#[derive(Debug, Clone, Copy)]
pub struct ArchetypeEntity {
    pub entity: Entity,
    /// The entity's row in the archetype's backing table.
    pub table_row: Row,
}

/// One archetype: its exact component set, the entities in it, and its
/// cached transition edges.
#[derive(Debug)]
pub struct Archetype {
    id: ArchetypeId,
    table_id: TableId,
    entities: Vec<ArchetypeEntity>,
    /// Sorted by component id, parallel storage kinds.
    components: Vec<(ComponentId, StorageKind)>,
    edges: Edges,
    flags: ArchetypeFlags,
}

impl Archetype {
    fn new(
        id: ArchetypeId,
        table_id: TableId,
        table_components: &[ComponentId],
        sparse_components: &[ComponentId],
        registry: &Components,
    ) -> Self {
        let mut components: Vec<(ComponentId, StorageKind)> = table_components
            .iter()
            .map(|&c| (c, StorageKind::Table))
            .chain(sparse_components.iter().map(|&c| (c, StorageKind::SparseSet)))
            .collect();
        components.sort_unstable_by_key(|&(c, _)| c);
        let mut flags = ArchetypeFlags::empty();
        for &(component_id, _) in &components {
            if let Some(info) = registry.info(component_id) {
                let hooks = info.hooks();
                if hooks.on_add.is_some() {
                    flags |= ArchetypeFlags::ON_ADD_HOOK;
                }
                if hooks.on_insert.is_some() {
                    flags |= ArchetypeFlags::ON_INSERT_HOOK;
                }
                if hooks.on_replace.is_some() {
                    flags |= ArchetypeFlags::ON_REPLACE_HOOK;
                }
                if hooks.on_remove.is_some() {
                    flags |= ArchetypeFlags::ON_REMOVE_HOOK;
                }
            }
        }
        Self {
            id,
            table_id,
            entities: Vec::new(),
            components,
            edges: Edges::default(),
            flags,
        }
    }

    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    #[inline]
    pub fn table_id(&self) -> TableId {
        self.table_id
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
    pub fn entities(&self) -> &[ArchetypeEntity] {
        &self.entities
    }

    #[inline]
    pub fn flags(&self) -> ArchetypeFlags {
        self.flags
    }

    #[inline]
    pub fn contains(&self, component_id: ComponentId) -> bool {
        self.components
            .binary_search_by_key(&component_id, |&(c, _)| c)
            .is_ok()
    }

    /// Storage kind of a member component.
    pub fn storage_of(&self, component_id: ComponentId) -> Option<StorageKind> {
        self.components
            .binary_search_by_key(&component_id, |&(c, _)| c)
            .ok()
            .map(|i| self.components[i].1)
    }

    /// All member component ids, sorted.
    pub fn component_ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.components.iter().map(|&(c, _)| c)
    }

    /// Member component ids stored in the backing table, sorted.
    pub fn table_component_ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.components
            .iter()
            .filter(|&&(_, kind)| kind == StorageKind::Table)
            .map(|&(c, _)| c)
    }

    /// Member component ids stored in sparse sets, sorted.
    pub fn sparse_component_ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.components
            .iter()
            .filter(|&&(_, kind)| kind == StorageKind::SparseSet)
            .map(|&(c, _)| c)
    }

    #[inline]
    pub fn edges(&self) -> &Edges {
        &self.edges
    }

    #[inline]
    pub(crate) fn edges_mut(&mut self) -> &mut Edges {
        &mut self.edges
    }

    /// Record `entity` as a member backed by `table_row`.
    pub(crate) fn allocate(&mut self, entity: Entity, table_row: Row) -> ArchetypeRow {
        let row = ArchetypeRow::new(self.entities.len());
        self.entities.push(ArchetypeEntity { entity, table_row });
        row
    }

    /// Remove the membership record at `row`. Returns the entity swapped
    /// into the vacated row, if any.
    pub(crate) fn swap_remove(&mut self, row: ArchetypeRow) -> Option<Entity> {
        debug_assert!(row.index() < self.entities.len());
        self.entities.swap_remove(row.index());
        self.entities.get(row.index()).map(|e| e.entity)
    }

    /// Table row of the member at `row`.
    #[inline]
    pub fn entity_table_row(&self, row: ArchetypeRow) -> Row {
        self.entities[row.index()].table_row
    }

    /// Patch the table row of the member at `row` after a table-level swap.
    pub(crate) fn set_entity_table_row(&mut self, row: ArchetypeRow, table_row: Row) {
        self.entities[row.index()].table_row = table_row;
    }
}

/// All archetypes in a world, deduplicated by exact component set.
/// Index 0 is always the empty archetype.
#[derive(Debug)]
pub struct Archetypes {
    archetypes: Vec<Archetype>,
    /// (backing table, sparse component set) to archetype. The table id
    /// already encodes the dense component set.
    by_identity: HashMap<(TableId, Box<[ComponentId]>), ArchetypeId>,
    /// Which archetypes contain each component.
    component_index: HashMap<ComponentId, Vec<ArchetypeId>>,
}

impl Default for Archetypes {
    fn default() -> Self {
        let empty = Archetype {
            id: ArchetypeId::EMPTY,
            table_id: TableId::empty(),
            entities: Vec::new(),
            components: Vec::new(),
            edges: Edges::default(),
            flags: ArchetypeFlags::empty(),
        };
        let mut by_identity = HashMap::new();
        by_identity.insert((TableId::empty(), Box::from([])), ArchetypeId::EMPTY);
        Self {
            archetypes: vec![empty],
            by_identity,
            component_index: HashMap::new(),
        }
    }
}

impl Archetypes {
    #[inline]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    #[inline]
    pub fn get(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.index())
    }

    #[inline]
    pub fn get_mut(&mut self, id: ArchetypeId) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id.index())
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Get mutable access to two distinct archetypes at once, for entity
    /// moves.
    pub(crate) fn get_2_mut(
        &mut self,
        a: ArchetypeId,
        b: ArchetypeId,
    ) -> (&mut Archetype, &mut Archetype) {
        assert!(a != b, "cannot move an entity within a single archetype");
        if a.index() < b.index() {
            let (low, high) = self.archetypes.split_at_mut(b.index());
            (&mut low[a.index()], &mut high[0])
        } else {
            let (low, high) = self.archetypes.split_at_mut(a.index());
            (&mut high[0], &mut low[b.index()])
        }
    }

    /// Archetypes containing `component_id`, in creation order.
    pub fn containing(&self, component_id: ComponentId) -> &[ArchetypeId] {
        self.component_index
            .get(&component_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Find or create the archetype for an exact component set. Both slices
    /// must be sorted and deduplicated; `table_id` must be the table for
    /// exactly `table_components`.
    pub(crate) fn get_id_or_insert(
        &mut self,
        table_id: TableId,
        table_components: &[ComponentId],
        sparse_components: &[ComponentId],
        registry: &Components,
    ) -> ArchetypeId {
        debug_assert!(table_components.is_sorted());
        debug_assert!(sparse_components.is_sorted());
        let identity = (table_id, Box::from(sparse_components));
        if let Some(&id) = self.by_identity.get(&identity) {
            return id;
        }
        let id = ArchetypeId::from_index(self.archetypes.len());
        let archetype = Archetype::new(id, table_id, table_components, sparse_components, registry);
        for component_id in archetype.component_ids() {
            self.component_index.entry(component_id).or_default().push(id);
        }
        self.archetypes.push(archetype);
        self.by_identity.insert(identity, id);
        id
    }
}
