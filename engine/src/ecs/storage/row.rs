/// A table row. A simple index into a table's entity and column vecs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Row(usize);

impl From<usize> for Row {
    /// Get a row from a usize index.
    fn from(value: usize) -> Self {
        Self::new(value)
    }
}

impl Row {
    /// A sentinel row used in invalid locations.
    pub const INVALID: Self = Self(usize::MAX);

    /// Construct a new table row from an index.
    #[inline]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the index used in the storage vecs.
    #[inline]
    pub const fn index(&self) -> usize {
        self.0
    }
}

/// An archetype-local row: the position of an entity in its archetype's
/// entity list. Distinct from [`Row`] because multiple archetypes can share
/// one table only in the degenerate empty case, but an entity's archetype
/// row and table row still diverge whenever sparse-set components are in
/// play.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchetypeRow(usize);

impl ArchetypeRow {
    /// A sentinel row used in invalid locations.
    pub const INVALID: Self = Self(usize::MAX);

    /// Construct a new archetype row from an index.
    #[inline]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the index into the archetype's entity list.
    #[inline]
    pub const fn index(&self) -> usize {
        self.0
    }
}
