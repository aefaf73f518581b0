use std::collections::HashMap;

use crate::ecs::component::{ComponentId, Components};
use crate::ecs::entity::Entity;
use crate::ecs::storage::Row;
use crate::ecs::storage::change::Tick;
use crate::ecs::storage::column::Column;

/// Identifies a table within the world's table list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(u32);

impl TableId {
    /// A sentinel id used in invalid locations.
    pub const INVALID: Self = Self(u32::MAX);

    /// The table with no columns, shared by every dense-component-free
    /// archetype.
    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Outcome of moving a row between tables.
pub struct TableMoveResult {
    /// Row the entity occupies in the destination table.
    pub new_row: Row,
    /// Entity that was swapped into the vacated source row, if any.
    pub swapped_entity: Option<Entity>,
}

/// Columnar storage for every entity sharing one exact set of dense
/// components. The entity list and every column stay row-aligned at all
/// times; removal is swap-remove, so row order is not stable.
#[derive(Debug)]
pub struct Table {
    /// Component ids sorted ascending, parallel to `columns`.
    component_ids: Vec<ComponentId>,
    columns: Vec<Column>,
    entities: Vec<Entity>,
}

impl Table {
    fn new(component_ids: Vec<ComponentId>, components: &Components) -> Self {
        debug_assert!(component_ids.is_sorted());
        let columns = component_ids
            .iter()
            .map(|&id| {
                let info = components
                    .info(id)
                    .unwrap_or_else(|| panic!("table built with unregistered component {id:?}"));
                Column::new(info, 0)
            })
            .collect();
        Self {
            component_ids,
            columns,
            entities: Vec::new(),
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
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[inline]
    pub fn component_ids(&self) -> &[ComponentId] {
        &self.component_ids
    }

    #[inline]
    pub fn has_column(&self, component_id: ComponentId) -> bool {
        self.component_ids.binary_search(&component_id).is_ok()
    }

    pub fn column(&self, component_id: ComponentId) -> Option<&Column> {
        let position = self.component_ids.binary_search(&component_id).ok()?;
        Some(&self.columns[position])
    }

    pub fn column_mut(&mut self, component_id: ComponentId) -> Option<&mut Column> {
        let position = self.component_ids.binary_search(&component_id).ok()?;
        Some(&mut self.columns[position])
    }

    /// Add a row for `entity`, leaving every column slot uninitialized and
    /// stamped with `tick`. The caller must initialize every column slot
    /// (or overwrite its bytes via a move) before the table is read.
    pub(crate) fn allocate(&mut self, entity: Entity, tick: Tick) -> Row {
        let row = Row::new(self.entities.len());
        self.entities.push(entity);
        for column in &mut self.columns {
            column.push_uninit(tick);
        }
        row
    }

    /// Remove the row, dropping every column value. Returns the entity that
    /// was swapped into the vacated row, if any.
    pub(crate) fn swap_remove(&mut self, row: Row) -> Option<Entity> {
        debug_assert!(row.index() < self.entities.len());
        for column in &mut self.columns {
            // SAFETY: columns are row-aligned with the entity list.
            unsafe { column.swap_remove_and_drop_unchecked(row) };
        }
        self.entities.swap_remove(row.index());
        self.entities.get(row.index()).copied()
    }

    /// Move the row to `target`: shared columns transfer their value and
    /// ticks by ownership, source-only columns drop their value, and
    /// target-only columns are left uninitialized for the caller to fill.
    ///
    /// # Safety
    /// `row` must be in bounds and `target` must be a different table.
    pub(crate) unsafe fn move_row_to(
        &mut self,
        row: Row,
        target: &mut Table,
        tick: Tick,
    ) -> TableMoveResult {
        debug_assert!(row.index() < self.entities.len());
        let entity = self.entities.swap_remove(row.index());
        let swapped_entity = self.entities.get(row.index()).copied();
        let new_row = target.allocate(entity, tick);
        for (&component_id, column) in self.component_ids.iter().zip(&mut self.columns) {
            match target.column_mut(component_id) {
                Some(target_column) => {
                    // SAFETY: the destination slot was just allocated and is
                    // uninitialized; the source slot holds a valid value.
                    let ticks = unsafe {
                        let dst = target_column.get_unchecked(new_row);
                        column.swap_remove_unchecked(row, dst)
                    };
                    target_column.set_ticks(new_row, ticks);
                }
                // SAFETY: the source slot holds a valid value.
                None => unsafe { column.swap_remove_and_drop_unchecked(row) },
            }
        }
        TableMoveResult {
            new_row,
            swapped_entity,
        }
    }

    /// Clamp all column ticks against `now`.
    pub fn check_ticks(&mut self, now: Tick) {
        for column in &mut self.columns {
            column.check_ticks(now);
        }
    }
}

/// All tables in a world, deduplicated by exact dense component set. Index 0
/// is always the empty table.
#[derive(Debug)]
pub struct Tables {
    tables: Vec<Table>,
    table_ids: HashMap<Box<[ComponentId]>, TableId>,
}

impl Default for Tables {
    fn default() -> Self {
        let empty = Table {
            component_ids: Vec::new(),
            columns: Vec::new(),
            entities: Vec::new(),
        };
        let mut table_ids = HashMap::new();
        table_ids.insert(Box::from([]), TableId::empty());
        Self {
            tables: vec![empty],
            table_ids,
        }
    }
}

impl Tables {
    #[inline]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[inline]
    pub fn get(&self, id: TableId) -> Option<&Table> {
        self.tables.get(id.index())
    }

    #[inline]
    pub fn get_mut(&mut self, id: TableId) -> Option<&mut Table> {
        self.tables.get_mut(id.index())
    }

    /// Get mutable access to two distinct tables at once, for row moves.
    pub(crate) fn get_2_mut(&mut self, a: TableId, b: TableId) -> (&mut Table, &mut Table) {
        assert!(a != b, "cannot move a row within a single table");
        if a.index() < b.index() {
            let (low, high) = self.tables.split_at_mut(b.index());
            (&mut low[a.index()], &mut high[0])
        } else {
            let (low, high) = self.tables.split_at_mut(a.index());
            (&mut high[0], &mut low[b.index()])
        }
    }

    /// Find or create the table for an exact set of dense component ids.
    /// `component_ids` must be sorted and deduplicated.
    pub(crate) fn get_id_or_insert(
        &mut self,
        component_ids: &[ComponentId],
        components: &Components,
    ) -> TableId {
        debug_assert!(component_ids.is_sorted());
        if let Some(&id) = self.table_ids.get(component_ids) {
            return id;
        }
        let id = TableId::from_index(self.tables.len());
        self.tables.push(Table::new(component_ids.to_vec(), components));
        self.table_ids.insert(Box::from(component_ids), id);
        id
    }

    /// Clamp ticks in every table against `now`.
    pub fn check_ticks(&mut self, now: Tick) {
        for table in &mut self.tables {
            table.check_ticks(now);
        }
    }
}
