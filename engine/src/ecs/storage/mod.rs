//! Raw storage for component data.
//!
//! Three stores back a world, split by access pattern:
//!
//!   - [`Tables`]: dense columnar storage. One table per exact set of
//!     table-storage components; every column is row-aligned with the
//!     table's entity list and removal is swap-remove.
//!   - [`SparseSets`]: per-component entity-indexed storage for components
//!     that change often enough that moving table rows would dominate.
//!   - [`Resources`]: one singleton slot per registered resource.
//!
//! ```text
//!      Table (Position, Velocity)            SparseSet (Selected)
//!   row | entity | Position | Velocity      entity -> dense slot
//!     0 |  4v0   |  (0,0)   |  (1,0)          4v0  ->  value
//!     1 |  7v2   |  (3,1)   |  (0,2)          9v0  ->  value
//! ```
//!
//! Everything in here is type-erased and unsafe at the edges; the world
//! layer above pairs each pointer with the component registry's layout and
//! drop metadata and never lets a raw pointer escape.

pub(crate) mod blob;
pub mod change;
pub mod column;
mod location;
mod row;
pub mod sparse;
pub mod table;

pub use change::{ComponentTicks, MAX_CHANGE_AGE, Tick};
pub use column::Column;
pub use location::Location;
pub use row::{ArchetypeRow, Row};
pub use sparse::{ComponentSparseSet, SparseSets};
pub use table::{Table, TableId, TableMoveResult, Tables};

use crate::ecs::resource::Resources;

/// The full storage of one world.
#[derive(Debug, Default)]
pub struct Storages {
    pub tables: Tables,
    pub sparse_sets: SparseSets,
    pub resources: Resources,
}

impl Storages {
    /// Clamp every stored tick against `now`.
    pub fn check_ticks(&mut self, now: Tick) {
        self.tables.check_ticks(now);
        self.sparse_sets.check_ticks(now);
        self.resources.check_ticks(now);
    }
}
