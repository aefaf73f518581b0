//! Declared data access. Every system owns an [`Access`] describing which
//! component and resource ids it reads and writes; the schedule builder
//! compares pairs of accesses to find conflicts. Sets are invertible so
//! "everything except these" (an exclusive system, or a wildcard read) is
//! representable without enumerating the arena, and component filters are
//! kept in disjunctive normal form so statically disjoint queries can be
//! proven compatible even when their column accesses collide.

use fixedbitset::FixedBitSet;

use crate::ecs::component::ComponentId;

fn grow_and_insert(set: &mut FixedBitSet, index: usize) {
    set.grow(index + 1);
    set.insert(index);
}

fn grow_and_remove(set: &mut FixedBitSet, index: usize) {
    set.grow(index + 1);
    set.remove(index);
}

/// Intersection of two possibly-inverted bit sets. `None` means the result
/// is cofinite (unboundedly many members).
fn intersection(
    a: &FixedBitSet,
    a_inverted: bool,
    b: &FixedBitSet,
    b_inverted: bool,
) -> Option<FixedBitSet> {
    match (a_inverted, b_inverted) {
        (false, false) => {
            let mut out = a.clone();
            out.grow(b.len());
            out.intersect_with(b);
            Some(out)
        }
        (false, true) => Some(a.difference(b).collect()),
        (true, false) => Some(b.difference(a).collect()),
        // Both sets are cofinite, so their intersection is too.
        (true, true) => None,
    }
}

/// Union of two possibly-inverted bit sets, as (stored bits, inverted).
fn union(
    a: &FixedBitSet,
    a_inverted: bool,
    b: &FixedBitSet,
    b_inverted: bool,
) -> (FixedBitSet, bool) {
    match (a_inverted, b_inverted) {
        (false, false) => {
            let mut out = a.clone();
            out.union_with(b);
            (out, false)
        }
        // The union excludes an id only if one side excludes it and the
        // other does not contain it.
        (false, true) => (b.difference(a).collect(), true),
        (true, false) => (a.difference(b).collect(), true),
        (true, true) => {
            let mut out = a.clone();
            out.grow(b.len());
            out.intersect_with(b);
            (out, true)
        }
    }
}

/// The set of component and resource ids a party reads and writes.
///
/// Components and resources draw ids from one arena but are tracked in
/// separate classes: a system writing resource `T` does not conflict with
/// one reading component `T`, should a type be registered as both. The
/// archetypal set records presence-only interest that never conflicts with
/// anything.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Access {
    component_read_and_writes: FixedBitSet,
    component_writes: FixedBitSet,
    resource_read_and_writes: FixedBitSet,
    resource_writes: FixedBitSet,
    /// When set, the stored bits name the ids NOT in the set.
    component_read_and_writes_inverted: bool,
    component_writes_inverted: bool,
    resource_read_and_writes_inverted: bool,
    resource_writes_inverted: bool,
    archetypal: FixedBitSet,
}

impl Access {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_component_read(&mut self, id: ComponentId) {
        if self.component_read_and_writes_inverted {
            grow_and_remove(&mut self.component_read_and_writes, id.index());
        } else {
            grow_and_insert(&mut self.component_read_and_writes, id.index());
        }
    }

    pub fn add_component_write(&mut self, id: ComponentId) {
        self.add_component_read(id);
        if self.component_writes_inverted {
            grow_and_remove(&mut self.component_writes, id.index());
        } else {
            grow_and_insert(&mut self.component_writes, id.index());
        }
    }

    pub fn add_resource_read(&mut self, id: ComponentId) {
        if self.resource_read_and_writes_inverted {
            grow_and_remove(&mut self.resource_read_and_writes, id.index());
        } else {
            grow_and_insert(&mut self.resource_read_and_writes, id.index());
        }
    }

    pub fn add_resource_write(&mut self, id: ComponentId) {
        self.add_resource_read(id);
        if self.resource_writes_inverted {
            grow_and_remove(&mut self.resource_writes, id.index());
        } else {
            grow_and_insert(&mut self.resource_writes, id.index());
        }
    }

    /// Record presence-only interest in a component. Archetypal access
    /// never conflicts.
    pub fn add_archetypal(&mut self, id: ComponentId) {
        grow_and_insert(&mut self.archetypal, id.index());
    }

    pub fn has_component_read(&self, id: ComponentId) -> bool {
        self.component_read_and_writes.contains(id.index())
            != self.component_read_and_writes_inverted
    }

    pub fn has_component_write(&self, id: ComponentId) -> bool {
        self.component_writes.contains(id.index()) != self.component_writes_inverted
    }

    pub fn has_resource_read(&self, id: ComponentId) -> bool {
        self.resource_read_and_writes.contains(id.index())
            != self.resource_read_and_writes_inverted
    }

    pub fn has_resource_write(&self, id: ComponentId) -> bool {
        self.resource_writes.contains(id.index()) != self.resource_writes_inverted
    }

    pub fn has_archetypal(&self, id: ComponentId) -> bool {
        self.archetypal.contains(id.index())
    }

    /// Declare reads of every component, present and future.
    pub fn read_all_components(&mut self) {
        self.component_read_and_writes_inverted = true;
        self.component_read_and_writes.clear();
    }

    /// Declare writes of every component, present and future.
    pub fn write_all_components(&mut self) {
        self.read_all_components();
        self.component_writes_inverted = true;
        self.component_writes.clear();
    }

    /// Declare reads of every resource, present and future.
    pub fn read_all_resources(&mut self) {
        self.resource_read_and_writes_inverted = true;
        self.resource_read_and_writes.clear();
    }

    /// Declare writes of every resource, present and future.
    pub fn write_all_resources(&mut self) {
        self.read_all_resources();
        self.resource_writes_inverted = true;
        self.resource_writes.clear();
    }

    /// Declare reads and writes of everything. The access of an exclusive
    /// system.
    pub fn write_all(&mut self) {
        self.write_all_components();
        self.write_all_resources();
    }

    pub fn has_any_component_write(&self) -> bool {
        self.component_writes_inverted || !self.component_writes.is_clear()
    }

    pub fn has_any_resource_write(&self) -> bool {
        self.resource_writes_inverted || !self.resource_writes.is_clear()
    }

    /// Fold `other` into `self` so the result covers both.
    pub fn extend(&mut self, other: &Access) {
        let (rw, rw_inv) = union(
            &self.component_read_and_writes,
            self.component_read_and_writes_inverted,
            &other.component_read_and_writes,
            other.component_read_and_writes_inverted,
        );
        self.component_read_and_writes = rw;
        self.component_read_and_writes_inverted = rw_inv;

        let (w, w_inv) = union(
            &self.component_writes,
            self.component_writes_inverted,
            &other.component_writes,
            other.component_writes_inverted,
        );
        self.component_writes = w;
        self.component_writes_inverted = w_inv;

        let (rrw, rrw_inv) = union(
            &self.resource_read_and_writes,
            self.resource_read_and_writes_inverted,
            &other.resource_read_and_writes,
            other.resource_read_and_writes_inverted,
        );
        self.resource_read_and_writes = rrw;
        self.resource_read_and_writes_inverted = rrw_inv;

        let (rw2, rw2_inv) = union(
            &self.resource_writes,
            self.resource_writes_inverted,
            &other.resource_writes,
            other.resource_writes_inverted,
        );
        self.resource_writes = rw2;
        self.resource_writes_inverted = rw2_inv;

        self.archetypal.grow(other.archetypal.len());
        self.archetypal.union_with(&other.archetypal);
    }

    /// Whether the two accesses could run concurrently without one
    /// observing the other's writes mid-flight.
    pub fn is_compatible(&self, other: &Access) -> bool {
        self.get_conflicts(other).is_empty()
    }

    /// Every id on which the two accesses collide (a write meeting any
    /// access). Symmetric in its arguments.
    pub fn get_conflicts(&self, other: &Access) -> AccessConflicts {
        let mut conflicts = AccessConflicts::empty();
        for (writes, writes_inv, reads, reads_inv) in [
            (
                &self.component_writes,
                self.component_writes_inverted,
                &other.component_read_and_writes,
                other.component_read_and_writes_inverted,
            ),
            (
                &other.component_writes,
                other.component_writes_inverted,
                &self.component_read_and_writes,
                self.component_read_and_writes_inverted,
            ),
            (
                &self.resource_writes,
                self.resource_writes_inverted,
                &other.resource_read_and_writes,
                other.resource_read_and_writes_inverted,
            ),
            (
                &other.resource_writes,
                other.resource_writes_inverted,
                &self.resource_read_and_writes,
                self.resource_read_and_writes_inverted,
            ),
        ] {
            match intersection(writes, writes_inv, reads, reads_inv) {
                Some(set) => conflicts.add_set(&set),
                None => return AccessConflicts::All,
            }
        }
        conflicts
    }
}

/// The ids two accesses collide on. `All` arises when both sides hold
/// inverted (cofinite) sets, where no finite list can name the overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessConflicts {
    All,
    Individual(FixedBitSet),
}

impl AccessConflicts {
    pub fn empty() -> Self {
        Self::Individual(FixedBitSet::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::All => false,
            Self::Individual(set) => set.is_clear(),
        }
    }

    fn add_set(&mut self, other: &FixedBitSet) {
        if let Self::Individual(set) = self {
            set.grow(other.len());
            set.union_with(other);
        }
    }

    /// The conflicting ids, if enumerable.
    pub fn ids(&self) -> Option<Vec<ComponentId>> {
        match self {
            Self::All => None,
            Self::Individual(set) => {
                Some(set.ones().map(ComponentId::from_index).collect())
            }
        }
    }
}

/// One conjunctive filter clause: entities must have every `with` id and
/// lack every `without` id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct AccessFilters {
    with: FixedBitSet,
    without: FixedBitSet,
}

impl AccessFilters {
    /// Whether no entity can satisfy both clauses at once.
    fn is_ruled_out_by(&self, other: &Self) -> bool {
        self.with.intersection(&other.without).next().is_some()
            || self.without.intersection(&other.with).next().is_some()
    }
}

/// An [`Access`] paired with a filter expression in disjunctive normal
/// form. Two filtered accesses with colliding column access are still
/// compatible when every pair of their clauses is mutually exclusive,
/// since no entity can then be visible to both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredAccess {
    access: Access,
    /// Ids an entity must have for this access to touch it at all.
    required: FixedBitSet,
    /// DNF clauses: the filter matches if any clause matches.
    filter_sets: Vec<AccessFilters>,
}

impl Default for FilteredAccess {
    fn default() -> Self {
        Self {
            access: Access::new(),
            required: FixedBitSet::new(),
            // One empty clause: matches everything.
            filter_sets: vec![AccessFilters::default()],
        }
    }
}

impl FilteredAccess {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn access(&self) -> &Access {
        &self.access
    }

    #[inline]
    pub fn access_mut(&mut self) -> &mut Access {
        &mut self.access
    }

    /// Read a component's column and require its presence.
    pub fn add_component_read(&mut self, id: ComponentId) {
        self.access.add_component_read(id);
        grow_and_insert(&mut self.required, id.index());
        self.and_with(id);
    }

    /// Write a component's column and require its presence.
    pub fn add_component_write(&mut self, id: ComponentId) {
        self.access.add_component_write(id);
        grow_and_insert(&mut self.required, id.index());
        self.and_with(id);
    }

    /// AND a `with` constraint into every clause.
    pub fn and_with(&mut self, id: ComponentId) {
        for clause in &mut self.filter_sets {
            grow_and_insert(&mut clause.with, id.index());
        }
    }

    /// AND a `without` constraint into every clause.
    pub fn and_without(&mut self, id: ComponentId) {
        for clause in &mut self.filter_sets {
            grow_and_insert(&mut clause.without, id.index());
        }
    }

    /// OR another filtered access's clauses into this one.
    pub fn append_or(&mut self, other: &FilteredAccess) {
        self.filter_sets.extend(other.filter_sets.iter().cloned());
    }

    /// AND-compose with `other`: union the accesses and cross-product the
    /// clause lists.
    pub fn extend(&mut self, other: &FilteredAccess) {
        self.access.extend(&other.access);
        self.required.grow(other.required.len());
        self.required.union_with(&other.required);

        if other.filter_sets.len() == 1 {
            for clause in &mut self.filter_sets {
                clause.with.grow(other.filter_sets[0].with.len());
                clause.with.union_with(&other.filter_sets[0].with);
                clause.without.grow(other.filter_sets[0].without.len());
                clause.without.union_with(&other.filter_sets[0].without);
            }
            return;
        }
        let mut crossed = Vec::with_capacity(self.filter_sets.len() * other.filter_sets.len());
        for own in &self.filter_sets {
            for theirs in &other.filter_sets {
                let mut clause = own.clone();
                clause.with.grow(theirs.with.len());
                clause.with.union_with(&theirs.with);
                clause.without.grow(theirs.without.len());
                clause.without.union_with(&theirs.without);
                crossed.push(clause);
            }
        }
        self.filter_sets = crossed;
    }

    /// Whether the two accesses can observe a common entity with
    /// conflicting column access.
    pub fn is_compatible(&self, other: &FilteredAccess) -> bool {
        if self.access.is_compatible(&other.access) {
            return true;
        }
        // Column access collides, but disjoint filters may still keep the
        // two from ever seeing the same entity. Every clause pair must be
        // mutually exclusive.
        self.filter_sets.iter().all(|own| {
            other
                .filter_sets
                .iter()
                .all(|theirs| own.is_ruled_out_by(theirs))
        })
    }

    /// Conflicting ids, empty when compatible.
    pub fn get_conflicts(&self, other: &FilteredAccess) -> AccessConflicts {
        if self.is_compatible(other) {
            AccessConflicts::empty()
        } else {
            self.access.get_conflicts(&other.access)
        }
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    fn id(index: usize) -> ComponentId {
        ComponentId::from_index(index)
    }

    #[test]
    fn reads_never_conflict() {
        // Given two accesses reading the same component.
        let mut a = Access::new();
        a.add_component_read(id(1));
        let mut b = Access::new();
        b.add_component_read(id(1));
        // Then they are compatible.
        assert!(a.is_compatible(&b));
    }

    #[test]
    fn write_conflicts_with_read_symmetrically() {
        // Given a writer and a reader of the same component.
        let mut writer = Access::new();
        writer.add_component_write(id(3));
        let mut reader = Access::new();
        reader.add_component_read(id(3));
        // Then the conflict is detected in both directions with the same
        // ids.
        let forward = writer.get_conflicts(&reader);
        let backward = reader.get_conflicts(&writer);
        assert_eq!(forward, backward);
        assert_eq!(forward.ids().unwrap(), vec![id(3)]);
    }

    #[test]
    fn disjoint_component_writes_are_compatible() {
        let mut a = Access::new();
        a.add_component_write(id(0));
        let mut b = Access::new();
        b.add_component_write(id(1));
        assert!(a.is_compatible(&b));
    }

    #[test]
    fn component_and_resource_classes_are_independent() {
        // Given a component write and a resource read of the same raw id.
        let mut a = Access::new();
        a.add_component_write(id(2));
        let mut b = Access::new();
        b.add_resource_read(id(2));
        // Then they do not conflict.
        assert!(a.is_compatible(&b));
    }

    #[test]
    fn read_all_conflicts_with_any_write() {
        // Given a wildcard component reader.
        let mut all = Access::new();
        all.read_all_components();
        // Then any writer, even of an id registered later, conflicts.
        let mut writer = Access::new();
        writer.add_component_write(id(100));
        let conflicts = all.get_conflicts(&writer);
        assert_eq!(conflicts.ids().unwrap(), vec![id(100)]);
    }

    #[test]
    fn two_exclusive_accesses_conflict_on_everything() {
        let mut a = Access::new();
        a.write_all();
        let mut b = Access::new();
        b.write_all();
        assert_eq!(a.get_conflicts(&b), AccessConflicts::All);
    }

    #[test]
    fn inverted_set_readds_individual_ids() {
        // Given a wildcard reader that then also writes one id.
        let mut access = Access::new();
        access.read_all_components();
        access.add_component_write(id(4));
        // Then membership reflects both.
        assert!(access.has_component_read(id(999)));
        assert!(access.has_component_write(id(4)));
        assert!(!access.has_component_write(id(5)));
    }

    #[test]
    fn extend_unions_inverted_and_plain_sets() {
        // Given a wildcard reader and a plain writer.
        let mut all = Access::new();
        all.read_all_components();
        let mut writer = Access::new();
        writer.add_component_write(id(7));
        // When folded together.
        all.extend(&writer);
        // Then the result reads everything and writes exactly id 7.
        assert!(all.has_component_read(id(12345)));
        assert!(all.has_component_write(id(7)));
        assert!(!all.has_component_write(id(8)));
    }

    #[test]
    fn disjoint_filters_make_colliding_writes_compatible() {
        // Given two writers of the same component with complementary
        // With/Without filters.
        let mut a = FilteredAccess::new();
        a.add_component_write(id(0));
        a.and_with(id(1));
        let mut b = FilteredAccess::new();
        b.add_component_write(id(0));
        b.and_without(id(1));
        // Then no entity can be seen by both, so they are compatible.
        assert!(a.is_compatible(&b));
        assert!(a.get_conflicts(&b).is_empty());
    }

    #[test]
    fn overlapping_filters_still_conflict() {
        let mut a = FilteredAccess::new();
        a.add_component_write(id(0));
        a.and_with(id(1));
        let mut b = FilteredAccess::new();
        b.add_component_write(id(0));
        b.and_with(id(1));
        assert!(!a.is_compatible(&b));
        assert_eq!(a.get_conflicts(&b).ids().unwrap(), vec![id(0)]);
    }

    #[test]
    fn or_clauses_conflict_when_any_pair_overlaps() {
        // Given a writer filtered to (With(1)) OR (With(2)).
        let mut a = FilteredAccess::new();
        a.add_component_write(id(0));
        a.and_with(id(1));
        let mut alternative = FilteredAccess::new();
        alternative.and_with(id(2));
        a.append_or(&alternative);
        // And a writer excluded from 1 but not 2.
        let mut b = FilteredAccess::new();
        b.add_component_write(id(0));
        b.and_without(id(1));
        // Then the second clause pair overlaps, so they conflict.
        assert!(!a.is_compatible(&b));
    }
}
