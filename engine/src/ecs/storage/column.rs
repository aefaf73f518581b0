use crate::ecs::component::Info;
use crate::ecs::storage::Row;
use crate::ecs::storage::blob::BlobVec;
use crate::ecs::storage::change::{ComponentTicks, Tick};

/// One component's values for every entity in a table, stored densely and
/// parallel to the table's entity list. Added and changed ticks live in
/// plain vecs beside the type-erased data so they can be scanned without
/// touching component memory.
#[derive(Debug)]
pub struct Column {
    data: BlobVec,
    added: Vec<Tick>,
    changed: Vec<Tick>,
}

impl Column {
    /// Create an empty column for the described component.
    pub fn new(info: &Info, capacity: usize) -> Self {
        Self {
            data: BlobVec::new(info.layout(), info.drop(), capacity),
            added: Vec::with_capacity(capacity),
            changed: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append an uninitialized slot stamped with `tick`. The slot must be
    /// initialized via [`Self::initialize`] before the column is read.
    pub(super) fn push_uninit(&mut self, tick: Tick) -> Row {
        let row = Row::new(self.data.len());
        // SAFETY: the slot is written by initialize before any read.
        unsafe { self.data.push_uninit() };
        self.added.push(tick);
        self.changed.push(tick);
        row
    }

    /// Write a value into a slot created by [`Self::push_uninit`], taking
    /// ownership of the bytes at `value` and overriding the slot's ticks.
    ///
    /// # Safety
    /// `row` must be in bounds and its slot must be uninitialized. `value`
    /// must point to a valid value of this column's component type.
    pub unsafe fn initialize(&mut self, row: Row, value: *mut u8, ticks: ComponentTicks) {
        debug_assert!(row.index() < self.len());
        // SAFETY: row is in bounds; the previous contents are uninitialized
        // so nothing is dropped.
        unsafe {
            let dst = self.data.get_unchecked(row.index());
            std::ptr::copy_nonoverlapping(value, dst, self.data.item_layout().size());
        }
        self.added[row.index()] = ticks.added;
        self.changed[row.index()] = ticks.changed;
    }

    /// Overwrite an existing value, dropping the old one. The added tick is
    /// preserved; the changed tick becomes `tick`.
    ///
    /// # Safety
    /// `row` must be in bounds and hold a valid value. `value` as in
    /// [`Self::initialize`].
    pub unsafe fn replace(&mut self, row: Row, value: *mut u8, tick: Tick) {
        debug_assert!(row.index() < self.len());
        // SAFETY: forwarded invariants.
        unsafe { self.data.replace_unchecked(row.index(), value) };
        self.changed[row.index()] = tick;
    }

    /// Remove the value at `row` by moving its bytes into `dst`, returning
    /// its ticks. The last value backfills the hole.
    ///
    /// # Safety
    /// `row` must be in bounds; `dst` must have room for one value.
    pub unsafe fn swap_remove_unchecked(&mut self, row: Row, dst: *mut u8) -> ComponentTicks {
        // SAFETY: forwarded invariants.
        unsafe { self.data.swap_remove_unchecked(row.index(), dst) };
        ComponentTicks {
            added: self.added.swap_remove(row.index()),
            changed: self.changed.swap_remove(row.index()),
        }
    }

    /// Remove and drop the value at `row`. The last value backfills the
    /// hole.
    ///
    /// # Safety
    /// `row` must be in bounds.
    pub unsafe fn swap_remove_and_drop_unchecked(&mut self, row: Row) {
        // SAFETY: forwarded invariants.
        unsafe { self.data.swap_remove_and_drop_unchecked(row.index()) };
        self.added.swap_remove(row.index());
        self.changed.swap_remove(row.index());
    }

    /// Pointer to the value at `row`.
    ///
    /// # Safety
    /// `row` must be in bounds and hold a valid value.
    #[inline]
    pub unsafe fn get_unchecked(&self, row: Row) -> *mut u8 {
        unsafe { self.data.get_unchecked(row.index()) }
    }

    /// Override both ticks of an existing slot. Used when a value moves
    /// between tables and keeps its history.
    pub(super) fn set_ticks(&mut self, row: Row, ticks: ComponentTicks) {
        self.added[row.index()] = ticks.added;
        self.changed[row.index()] = ticks.changed;
    }

    /// Stamp the changed tick of the value at `row`.
    pub fn mark_changed(&mut self, row: Row, tick: Tick) {
        self.changed[row.index()] = tick;
    }

    /// Ticks for the value at `row`, if in bounds.
    pub fn ticks(&self, row: Row) -> Option<ComponentTicks> {
        Some(ComponentTicks {
            added: *self.added.get(row.index())?,
            changed: *self.changed.get(row.index())?,
        })
    }

    /// Clamp all stored ticks against `now`.
    pub fn check_ticks(&mut self, now: Tick) {
        for tick in self.added.iter_mut().chain(self.changed.iter_mut()) {
            tick.check(now);
        }
    }

    /// Drop all values.
    pub fn clear(&mut self) {
        self.data.clear();
        self.added.clear();
        self.changed.clear();
    }
}
