//! A type-erased, manually managed vector. Component columns store values of
//! a single runtime-described type; the layout and drop function come from
//! the component registry. Every method that touches element memory is
//! unsafe and documents the invariant the caller must uphold.

use std::alloc::{self, Layout, handle_alloc_error};
use std::ptr::NonNull;

/// Densely packed, type-erased storage for values sharing one layout.
pub struct BlobVec {
    item_layout: Layout,
    capacity: usize,
    len: usize,
    data: NonNull<u8>,
    /// Called on each element before its memory is reused or released.
    /// `None` for types that do not need dropping.
    drop: Option<unsafe fn(*mut u8)>,
}

impl std::fmt::Debug for BlobVec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobVec")
            .field("item_layout", &self.item_layout)
            .field("capacity", &self.capacity)
            .field("len", &self.len)
            .finish()
    }
}

impl BlobVec {
    /// Create an empty vec for items of the given layout.
    pub fn new(item_layout: Layout, drop: Option<unsafe fn(*mut u8)>, capacity: usize) -> Self {
        let mut vec = Self {
            item_layout,
            // Zero-sized items never allocate and have unbounded capacity.
            capacity: if item_layout.size() == 0 { usize::MAX } else { 0 },
            len: 0,
            data: NonNull::<u8>::dangling(),
            drop,
        };
        vec.reserve(capacity);
        vec
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn item_layout(&self) -> Layout {
        self.item_layout
    }

    /// Ensure room for at least `additional` more items.
    pub fn reserve(&mut self, additional: usize) {
        let needed = self.len + additional;
        if needed > self.capacity {
            let new_capacity = needed.next_power_of_two().max(4);
            self.grow(new_capacity);
        }
    }

    fn grow(&mut self, new_capacity: usize) {
        debug_assert!(self.item_layout.size() != 0);
        debug_assert!(new_capacity > self.capacity);
        let new_layout = array_layout(self.item_layout, new_capacity);
        let new_data = if self.capacity == 0 {
            // SAFETY: layout has non-zero size because item size is non-zero
            // and capacity is at least 4.
            unsafe { alloc::alloc(new_layout) }
        } else {
            let old_layout = array_layout(self.item_layout, self.capacity);
            // SAFETY: data was allocated with old_layout by this allocator.
            unsafe { alloc::realloc(self.data.as_ptr(), old_layout, new_layout.size()) }
        };
        self.data = NonNull::new(new_data).unwrap_or_else(|| handle_alloc_error(new_layout));
        self.capacity = new_capacity;
    }

    /// Pointer to the element at `index`.
    ///
    /// # Safety
    /// `index` must be less than `len`.
    #[inline]
    pub unsafe fn get_unchecked(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.len);
        unsafe { self.data.as_ptr().add(index * self.item_layout.size()) }
    }

    /// Append a value, taking ownership of the bytes at `value`.
    ///
    /// # Safety
    /// `value` must point to a valid item of this vec's layout. The caller
    /// must not drop or reuse the value afterwards.
    pub unsafe fn push(&mut self, value: *mut u8) {
        self.reserve(1);
        let index = self.len;
        self.len += 1;
        // SAFETY: index is within the freshly reserved capacity.
        unsafe {
            let dst = self.data.as_ptr().add(index * self.item_layout.size());
            std::ptr::copy_nonoverlapping(value, dst, self.item_layout.size());
        }
    }

    /// Append an uninitialized slot and return a pointer to it. The caller
    /// must write a valid value before the slot is read or dropped.
    ///
    /// # Safety
    /// The returned slot must be initialized before any operation that reads
    /// or drops elements runs.
    pub unsafe fn push_uninit(&mut self) -> *mut u8 {
        self.reserve(1);
        let index = self.len;
        self.len += 1;
        // SAFETY: index is within the freshly reserved capacity.
        unsafe { self.data.as_ptr().add(index * self.item_layout.size()) }
    }

    /// Overwrite the value at `index`, dropping the previous value and
    /// taking ownership of the bytes at `value`.
    ///
    /// # Safety
    /// `index` must be less than `len`; `value` as in [`Self::push`].
    pub unsafe fn replace_unchecked(&mut self, index: usize, value: *mut u8) {
        debug_assert!(index < self.len);
        // SAFETY: index is in bounds, slot holds a valid value.
        unsafe {
            let dst = self.get_unchecked(index);
            if let Some(drop) = self.drop {
                drop(dst);
            }
            std::ptr::copy_nonoverlapping(value, dst, self.item_layout.size());
        }
    }

    /// Remove the value at `index` by copying its bytes to `dst` and filling
    /// the hole with the last element. Ownership transfers to `dst`; nothing
    /// is dropped.
    ///
    /// # Safety
    /// `index` must be less than `len`; `dst` must have room for one item of
    /// this vec's layout and must not overlap the vec.
    pub unsafe fn swap_remove_unchecked(&mut self, index: usize, dst: *mut u8) {
        debug_assert!(index < self.len);
        let size = self.item_layout.size();
        // SAFETY: both indices are in bounds.
        unsafe {
            let removed = self.data.as_ptr().add(index * size);
            std::ptr::copy_nonoverlapping(removed, dst, size);
            let last = self.len - 1;
            if index != last {
                let src = self.data.as_ptr().add(last * size);
                std::ptr::copy_nonoverlapping(src, removed, size);
            }
        }
        self.len -= 1;
    }

    /// Remove and drop the value at `index`, filling the hole with the last
    /// element.
    ///
    /// # Safety
    /// `index` must be less than `len`.
    pub unsafe fn swap_remove_and_drop_unchecked(&mut self, index: usize) {
        debug_assert!(index < self.len);
        // SAFETY: index is in bounds, slot holds a valid value.
        unsafe {
            let removed = self.get_unchecked(index);
            if let Some(drop) = self.drop {
                drop(removed);
            }
            let last = self.len - 1;
            if index != last {
                let size = self.item_layout.size();
                let src = self.data.as_ptr().add(last * size);
                std::ptr::copy_nonoverlapping(src, removed, size);
            }
        }
        self.len -= 1;
    }

    /// Drop all values, keeping the allocation.
    pub fn clear(&mut self) {
        let len = self.len;
        // Set len first so a panicking drop cannot double-drop.
        self.len = 0;
        if let Some(drop) = self.drop {
            let size = self.item_layout.size();
            for i in 0..len {
                // SAFETY: i was within the previous len, each slot held a
                // valid value.
                unsafe { drop(self.data.as_ptr().add(i * size)) };
            }
        }
    }
}

impl Drop for BlobVec {
    fn drop(&mut self) {
        self.clear();
        if self.item_layout.size() != 0 && self.capacity != 0 {
            let layout = array_layout(self.item_layout, self.capacity);
            // SAFETY: data was allocated with this layout.
            unsafe { alloc::dealloc(self.data.as_ptr(), layout) };
        }
    }
}

/// Layout for an array of `n` items, assuming the item layout came from a
/// real Rust type (size is already a multiple of alignment).
fn array_layout(item: Layout, n: usize) -> Layout {
    let size = item
        .size()
        .checked_mul(n)
        .unwrap_or_else(|| panic!("column allocation overflows usize"));
    // SAFETY: alignment is valid since it came from item, size was checked.
    unsafe { Layout::from_size_align_unchecked(size, item.align()) }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    unsafe fn drop_as<T>(ptr: *mut u8) {
        unsafe { ptr.cast::<T>().drop_in_place() };
    }

    fn push_value<T>(vec: &mut BlobVec, value: T) {
        let mut value = std::mem::ManuallyDrop::new(value);
        // SAFETY: value matches the vec's layout by construction in tests.
        unsafe { vec.push((&raw mut value).cast()) };
    }

    unsafe fn read_value<T: Copy>(vec: &BlobVec, index: usize) -> T {
        unsafe { vec.get_unchecked(index).cast::<T>().read() }
    }

    #[test]
    fn push_and_read_back() {
        // Given a vec of u64.
        let mut vec = BlobVec::new(Layout::new::<u64>(), None, 0);
        // When several values are pushed.
        for i in 0..10u64 {
            push_value(&mut vec, i * 3);
        }
        // Then each reads back at its index.
        assert_eq!(vec.len(), 10);
        for i in 0..10usize {
            assert_eq!(unsafe { read_value::<u64>(&vec, i) }, i as u64 * 3);
        }
    }

    #[test]
    fn swap_remove_backfills_with_last() {
        // Given a vec of [10, 20, 30, 40].
        let mut vec = BlobVec::new(Layout::new::<u32>(), None, 4);
        for v in [10u32, 20, 30, 40] {
            push_value(&mut vec, v);
        }
        // When index 1 is swap-removed.
        let mut out = 0u32;
        unsafe { vec.swap_remove_unchecked(1, (&raw mut out).cast()) };
        // Then the removed value is moved out and the last backfills the
        // hole.
        assert_eq!(out, 20);
        assert_eq!(vec.len(), 3);
        assert_eq!(unsafe { read_value::<u32>(&vec, 1) }, 40);
    }

    #[test]
    fn drops_run_exactly_once() {
        // Given a vec of Rc clones tracked by strong count.
        let marker = Rc::new(());
        let mut vec = BlobVec::new(Layout::new::<Rc<()>>(), Some(drop_as::<Rc<()>>), 0);
        for _ in 0..4 {
            push_value(&mut vec, Rc::clone(&marker));
        }
        assert_eq!(Rc::strong_count(&marker), 5);
        // When one is swap-remove-dropped and the vec itself is dropped.
        unsafe { vec.swap_remove_and_drop_unchecked(0) };
        assert_eq!(Rc::strong_count(&marker), 4);
        drop(vec);
        // Then all clones were released exactly once.
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn zero_sized_items_track_len_only() {
        // Given a vec of unit values.
        let mut vec = BlobVec::new(Layout::new::<()>(), None, 0);
        for _ in 0..100 {
            push_value(&mut vec, ());
        }
        assert_eq!(vec.len(), 100);
        unsafe { vec.swap_remove_and_drop_unchecked(50) };
        assert_eq!(vec.len(), 99);
    }
}
