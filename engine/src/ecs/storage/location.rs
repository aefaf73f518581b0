use crate::ecs::archetype::ArchetypeId;
use crate::ecs::storage::{ArchetypeRow, Row, TableId};

/// The full storage address of a live entity: which archetype it belongs to,
/// where it sits in that archetype's entity list, and which table row holds
/// its dense component data. All four fields are patched together whenever an
/// entity moves; a location is never half-updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Archetype the entity currently belongs to.
    pub archetype_id: ArchetypeId,
    /// Position in the archetype's entity list.
    pub archetype_row: ArchetypeRow,
    /// Table backing the archetype.
    pub table_id: TableId,
    /// Row in the table holding the entity's dense components.
    pub table_row: Row,
}

impl Location {
    /// Location of an entity that has been reserved or freed but not placed
    /// in any archetype.
    pub const INVALID: Self = Self {
        archetype_id: ArchetypeId::INVALID,
        archetype_row: ArchetypeRow::INVALID,
        table_id: TableId::INVALID,
        table_row: Row::INVALID,
    };

    /// Whether this location points into real storage.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.archetype_id != ArchetypeId::INVALID
    }
}
