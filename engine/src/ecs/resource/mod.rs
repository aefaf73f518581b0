//! Resources: world-global singleton values. Each resource type gets a
//! [`ComponentId`](crate::ecs::component::ComponentId) from the shared
//! arena and a single type-erased slot with the same tick bookkeeping as a
//! component value.

use std::collections::HashMap;

use crate::ecs::component::{ComponentId, Info};
use crate::ecs::storage::blob::BlobVec;
use crate::ecs::storage::change::{ComponentTicks, Tick};

/// A world-global singleton. Usually implemented via `#[derive(Resource)]`.
pub trait Resource: Send + Sync + 'static {}

/// The slot for one resource: a blob vec that holds zero or one value.
#[derive(Debug)]
pub(crate) struct ResourceSlot {
    data: BlobVec,
    added: Tick,
    changed: Tick,
}

impl ResourceSlot {
    fn new(info: &Info) -> Self {
        Self {
            data: BlobVec::new(info.layout(), info.drop(), 1),
            added: Tick::ZERO,
            changed: Tick::ZERO,
        }
    }

    #[inline]
    pub fn is_present(&self) -> bool {
        !self.data.is_empty()
    }

    /// Insert or overwrite the value, taking ownership of the bytes at
    /// `value`.
    ///
    /// # Safety
    /// `value` must point to a valid value of this slot's resource type.
    pub unsafe fn insert(&mut self, value: *mut u8, tick: Tick) {
        if self.is_present() {
            // SAFETY: slot 0 holds a valid value.
            unsafe { self.data.replace_unchecked(0, value) };
        } else {
            // SAFETY: forwarded from the caller.
            unsafe { self.data.push(value) };
            self.added = tick;
        }
        self.changed = tick;
    }

    /// Pointer to the value, if present.
    pub fn get(&self) -> Option<*mut u8> {
        // SAFETY: the slot is non-empty, so index 0 holds a valid value.
        self.is_present().then(|| unsafe { self.data.get_unchecked(0) })
    }

    pub fn ticks(&self) -> Option<ComponentTicks> {
        self.is_present().then_some(ComponentTicks {
            added: self.added,
            changed: self.changed,
        })
    }

    /// Mark the value as written at `tick`.
    pub fn set_changed(&mut self, tick: Tick) {
        self.changed = tick;
    }

    /// Remove the value, moving its bytes to `dst`. Returns false if the
    /// slot was empty.
    ///
    /// # Safety
    /// `dst` must have room for one value of this slot's resource type.
    pub unsafe fn remove_to(&mut self, dst: *mut u8) -> bool {
        if !self.is_present() {
            return false;
        }
        // SAFETY: slot 0 holds a valid value; ownership moves to dst.
        unsafe { self.data.swap_remove_unchecked(0, dst) };
        true
    }
}

/// All resource slots in a world, created lazily per resource id.
#[derive(Debug, Default)]
pub struct Resources {
    slots: HashMap<ComponentId, ResourceSlot>,
}

impl Resources {
    pub(crate) fn get(&self, id: ComponentId) -> Option<&ResourceSlot> {
        self.slots.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ComponentId) -> Option<&mut ResourceSlot> {
        self.slots.get_mut(&id)
    }

    pub(crate) fn get_or_insert(&mut self, id: ComponentId, info: &Info) -> &mut ResourceSlot {
        debug_assert_eq!(info.id(), id);
        self.slots.entry(id).or_insert_with(|| ResourceSlot::new(info))
    }

    /// Clamp ticks in every occupied slot against `now`.
    pub fn check_ticks(&mut self, now: Tick) {
        for slot in self.slots.values_mut() {
            if slot.is_present() {
                slot.added.check(now);
                slot.changed.check(now);
            }
        }
    }
}
