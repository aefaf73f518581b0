//! Entity identifiers and the allocator that issues them.
//!
//! An [`Entity`] is a lightweight handle combining a recycled `index` with a
//! `generation` counter. The index addresses per-entity bookkeeping (the
//! allocator's meta table, sparse-set stores); the generation invalidates
//! stale handles once an index has been freed and reissued. Neither half is
//! meaningful without the other.
//!
//! # Reservation vs allocation
//!
//! The [`Allocator`] supports two paths:
//!
//! - [`Allocator::alloc`] hands out an entity immediately; the caller is
//!   expected to give it a storage [`Location`] right away.
//! - [`Allocator::reserve`] is lock-free and only promises a unique handle.
//!   Reserved entities have no backing storage until [`Allocator::flush`]
//!   materializes them. This is what lets a deferred command queue hand out
//!   entity ids before the world can be mutated.
//!
//! Every mutating operation checks that no reservations are pending; calling
//! `alloc` or `free` on an unflushed allocator is a programming error and
//! panics.
//!
//! # Generation wraparound
//!
//! Generations are a finite counter. When an index has been freed `u32::MAX`
//! times its generation wraps back to zero and a stale handle could alias a
//! live one. This is logged as a warning and otherwise ignored; the caller
//! accepts the risk.

use std::sync::atomic::{AtomicI64, Ordering};

use log::warn;

use crate::ecs::storage::Location;

/// A handle to an entity in the world.
///
/// Compact (8 bytes), `Copy`, and safe to store across frames: if the entity
/// is despawned the generation check makes lookups fail instead of returning
/// another entity's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entity {
    /// Index into per-entity storage. Recycled after `free`.
    index: u32,

    /// Number of times `index` has been reissued.
    generation: u32,
}

impl Entity {
    /// A sentinel entity that is never allocated.
    ///
    /// Useful as a "not yet assigned" placeholder in components that will be
    /// patched with a real entity later.
    pub const PLACEHOLDER: Self = Self {
        index: u32::MAX,
        generation: u32::MAX,
    };

    /// Construct an entity from raw parts. Only storage internals should do
    /// this; handles obtained anywhere else come from the allocator.
    #[inline]
    pub(crate) const fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Construct a first-generation entity. Primarily used in tests.
    #[inline]
    #[cfg(test)]
    pub(crate) const fn from_raw(index: u32) -> Self {
        Self::from_raw_parts(index, 0)
    }

    /// The index of this entity.
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// The generation of this entity.
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Pack this entity into a single `u64`, generation in the high bits.
    #[inline]
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Reconstruct an entity from [`Entity::to_bits`].
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl PartialOrd for Entity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.index, self.generation).cmp(&(other.index, other.generation))
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Per-index bookkeeping, one entry for every index ever allocated.
#[derive(Debug, Clone, Copy)]
pub struct Meta {
    /// Current generation for this index. A handle is live only if its
    /// generation matches.
    pub generation: u32,

    /// Where the entity's row lives. [`Location::INVALID`] while freed or
    /// reserved-but-not-flushed.
    pub location: Location,
}

impl Meta {
    const EMPTY: Self = Self {
        generation: 0,
        location: Location::INVALID,
    };
}

/// Issues and recycles entity handles.
///
/// Owns the meta table mapping every index to its generation and storage
/// location. Freed indices go on a pending list and are reused
/// (most-recently-freed first) before fresh indices are minted.
#[derive(Debug, Default)]
pub struct Allocator {
    /// One entry per index ever allocated.
    meta: Vec<Meta>,

    /// Indices available for reuse. Entries below `free_cursor` are truly
    /// free; entries at or above it have been handed out by `reserve` and
    /// are waiting for `flush`.
    pending: Vec<u32>,

    /// Signed cursor into `pending`. Negative values count reservations of
    /// brand-new indices past the end of `meta`.
    free_cursor: AtomicI64,
}

impl Allocator {
    /// Construct an empty allocator.
    #[inline]
    pub const fn new() -> Self {
        Self {
            meta: Vec::new(),
            pending: Vec::new(),
            free_cursor: AtomicI64::new(0),
        }
    }

    /// Number of indices ever allocated (live, freed, or reserved).
    #[inline]
    pub fn total_len(&self) -> usize {
        self.meta.len()
    }

    /// `true` if reservations are outstanding and [`Allocator::flush`] must
    /// run before the next structural operation.
    #[inline]
    pub fn needs_flush(&self) -> bool {
        self.free_cursor.load(Ordering::Relaxed) != self.pending.len() as i64
    }

    fn verify_flushed(&self) {
        assert!(
            !self.needs_flush(),
            "entity allocator has pending reservations; flush before allocating or freeing"
        );
    }

    /// Reserve a unique entity handle without backing storage.
    ///
    /// Lock-free: takes `&self` so it can be called from contexts that only
    /// hold a shared borrow (e.g. a command queue being filled inside a
    /// running system). The handle is a valid key immediately but resolves
    /// to no data until [`Allocator::flush`] runs.
    pub fn reserve(&self) -> Entity {
        let n = self.free_cursor.fetch_sub(1, Ordering::Relaxed);
        if n > 0 {
            // Reuse a freed index; its generation was already bumped on free.
            let index = self.pending[(n - 1) as usize];
            Entity::from_raw_parts(index, self.meta[index as usize].generation)
        } else {
            // Mint a brand-new index past the end of the meta table. The
            // meta entry is created by `flush`.
            let index = self.meta.len() as i64 - n;
            let index = u32::try_from(index)
                .unwrap_or_else(|_| panic!("entity index space exhausted"));
            Entity::from_raw_parts(index, 0)
        }
    }

    /// Allocate an entity immediately.
    ///
    /// The caller must give the returned entity a real [`Location`] before
    /// anything can look it up (the world does this by placing it in the
    /// empty archetype).
    ///
    /// # Panics
    /// - if reservations are pending (flush first)
    pub fn alloc(&mut self) -> Entity {
        self.verify_flushed();
        if let Some(index) = self.pending.pop() {
            *self.free_cursor.get_mut() = self.pending.len() as i64;
            Entity::from_raw_parts(index, self.meta[index as usize].generation)
        } else {
            let index = u32::try_from(self.meta.len())
                .unwrap_or_else(|_| panic!("entity index space exhausted"));
            self.meta.push(Meta::EMPTY);
            Entity::from_raw_parts(index, 0)
        }
    }

    /// Free an entity, returning its prior location so the caller can remove
    /// the physical row.
    ///
    /// Returns `None` (and does nothing) if the handle is stale — its
    /// generation does not match the current one for that index.
    ///
    /// # Panics
    /// - if reservations are pending (flush first)
    pub fn free(&mut self, entity: Entity) -> Option<Location> {
        self.verify_flushed();

        let meta = self.meta.get_mut(entity.index as usize)?;
        if meta.generation != entity.generation {
            return None;
        }

        meta.generation = meta.generation.wrapping_add(1);
        if meta.generation == 0 {
            // Stale handles for this index can now alias a future entity.
            warn!(
                "entity index {} generation wrapped; stale handles may alias",
                entity.index
            );
        }

        let location = std::mem::replace(&mut meta.location, Location::INVALID);
        self.pending.push(entity.index);
        *self.free_cursor.get_mut() = self.pending.len() as i64;
        Some(location)
    }

    /// Materialize every reserved entity, calling `init` with the entity and
    /// a mutable slot for its location.
    ///
    /// `init` is expected to place the entity somewhere real (the world puts
    /// it in the empty archetype) and write the resulting location into the
    /// slot. Idempotent when nothing is reserved.
    pub fn flush(&mut self, mut init: impl FnMut(Entity, &mut Location)) {
        let free_cursor = self.free_cursor.get_mut();
        let current = *free_cursor;
        if current < 0 {
            // Reservations ran past the pending list into fresh indices.
            let old_len = self.meta.len();
            let new_len = old_len + (-current) as usize;
            self.meta.resize(new_len, Meta::EMPTY);
            for index in old_len..new_len {
                let entity = Entity::from_raw_parts(index as u32, 0);
                init(entity, &mut self.meta[index].location);
            }
            *free_cursor = 0;
        }

        // Reused indices sit between the cursor and the end of pending.
        let cursor = (*free_cursor).max(0) as usize;
        for index in self.pending.drain(cursor..) {
            let meta = &mut self.meta[index as usize];
            init(
                Entity::from_raw_parts(index, meta.generation),
                &mut meta.location,
            );
        }
        *self.free_cursor.get_mut() = self.pending.len() as i64;
    }

    /// Look up the meta entry for a live entity. Returns `None` for stale or
    /// never-allocated handles.
    #[inline]
    pub fn get(&self, entity: Entity) -> Option<Location> {
        let meta = self.meta.get(entity.index as usize)?;
        if meta.generation != entity.generation || meta.location == Location::INVALID {
            return None;
        }
        Some(meta.location)
    }

    /// `true` if this handle currently refers to a live, flushed entity.
    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.get(entity).is_some()
    }

    /// Overwrite the cached location for a live entity.
    ///
    /// # Panics
    /// - if the index was never allocated
    #[inline]
    pub fn set_location(&mut self, entity: Entity, location: Location) {
        self.meta[entity.index as usize].location = location;
    }

    /// Patch part of the cached location for a live entity, after a
    /// swap-remove moved its row.
    ///
    /// # Panics
    /// - if the index was never allocated
    #[inline]
    pub fn update_location(&mut self, entity: Entity, patch: impl FnOnce(&mut Location)) {
        patch(&mut self.meta[entity.index as usize].location);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::archetype::ArchetypeId;
    use crate::ecs::storage::{ArchetypeRow, Location, Row, TableId};

    fn dummy_location() -> Location {
        Location {
            archetype_id: ArchetypeId::EMPTY,
            archetype_row: ArchetypeRow::new(0),
            table_id: TableId::empty(),
            table_row: Row::new(0),
        }
    }

    #[test]
    fn alloc_issues_unique_entities() {
        // Given
        let mut allocator = Allocator::new();

        // When
        let mut entities: Vec<_> = (0..200).map(|_| allocator.alloc()).collect();

        // Then - no duplicates
        let before = entities.len();
        entities.sort();
        entities.dedup();
        assert_eq!(before, entities.len());
    }

    #[test]
    fn free_bumps_generation_and_reuses_index() {
        // Given
        let mut allocator = Allocator::new();
        let entity = allocator.alloc();
        allocator.set_location(entity, dummy_location());

        // When
        let prior = allocator.free(entity);
        let reused = allocator.alloc();

        // Then
        assert_eq!(prior, Some(dummy_location()));
        assert_eq!(reused.index(), entity.index());
        assert_eq!(reused.generation(), entity.generation() + 1);
        assert!(!allocator.contains(entity));
    }

    #[test]
    fn free_stale_handle_is_rejected() {
        // Given
        let mut allocator = Allocator::new();
        let entity = allocator.alloc();
        allocator.set_location(entity, dummy_location());
        allocator.free(entity);
        let _reused = allocator.alloc();

        // When - free with the old generation again
        let result = allocator.free(entity);

        // Then
        assert_eq!(result, None);
    }

    #[test]
    fn reserve_then_flush_materializes() {
        // Given
        let mut allocator = Allocator::new();
        let reserved = allocator.reserve();
        assert!(allocator.needs_flush());
        assert!(!allocator.contains(reserved));

        // When
        let mut flushed = Vec::new();
        allocator.flush(|entity, location| {
            *location = dummy_location();
            flushed.push(entity);
        });

        // Then
        assert!(!allocator.needs_flush());
        assert_eq!(flushed, vec![reserved]);
        assert!(allocator.contains(reserved));
    }

    #[test]
    fn reserve_reuses_freed_indices() {
        // Given
        let mut allocator = Allocator::new();
        let entity = allocator.alloc();
        allocator.set_location(entity, dummy_location());
        allocator.free(entity);

        // When
        let reserved = allocator.reserve();

        // Then - same index, next generation
        assert_eq!(reserved.index(), entity.index());
        assert_eq!(reserved.generation(), entity.generation() + 1);
    }

    #[test]
    #[should_panic(expected = "pending reservations")]
    fn alloc_while_unflushed_panics() {
        // Given
        let mut allocator = Allocator::new();
        let _reserved = allocator.reserve();

        // When
        let _ = allocator.alloc();
    }

    #[test]
    fn flush_with_nothing_reserved_is_noop() {
        // Given
        let mut allocator = Allocator::new();
        let _entity = allocator.alloc();

        // When
        let mut called = 0;
        allocator.flush(|_, _| called += 1);

        // Then
        assert_eq!(called, 0);
    }

    #[test]
    fn bits_round_trip() {
        // Given
        let cases = [
            Entity::from_raw_parts(0, 0),
            Entity::from_raw_parts(42, 7),
            Entity::from_raw_parts(u32::MAX, 0),
            Entity::from_raw_parts(0, u32::MAX),
            Entity::from_raw_parts(u32::MAX, u32::MAX),
            Entity::PLACEHOLDER,
        ];

        // Then
        for entity in cases {
            assert_eq!(Entity::from_bits(entity.to_bits()), entity);
        }
    }

    #[test]
    fn ordering_is_index_then_generation() {
        // Given
        let a = Entity::from_raw(1);
        let b = Entity::from_raw(2);
        let a_next = Entity::from_raw_parts(1, 1);

        // Then
        assert!(a < b);
        assert!(a < a_next);
        assert!(a_next < b);
    }
}
