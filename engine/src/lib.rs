//! Tessera: an archetype-based entity/component data engine with a
//! dependency-aware schedule builder and executor.
//!
//! The crate is organized around three layers:
//!
//! - **Storage** ([`ecs::storage`], [`ecs::archetype`], [`ecs::bundle`]):
//!   columnar tables and sparse sets, deduplicated archetypes, and the
//!   transition planner that moves entities between them.
//! - **Access** ([`ecs::access`]): compact read/write footprints used to
//!   prove that two systems can or cannot observe each other's effects.
//! - **Scheduling** ([`ecs::schedule`]): a graph builder that turns systems
//!   plus ordering constraints into a validated, deterministically ordered
//!   execution plan with automatically inserted synchronization points.
//!
//! [`ecs::World`] ties the storage layers together behind a single facade.

// Allow the derive macros to resolve `::tessera_engine::...` paths from
// within this crate's own tests.
extern crate self as tessera_engine;

pub mod ecs;
