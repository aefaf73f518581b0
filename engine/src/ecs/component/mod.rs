//! Component registration. Every component type used in a world is
//! registered once into an id arena; the resulting [`ComponentId`] is the
//! currency the storage, archetype and access layers trade in. Resources
//! share the same arena under a separate type-id namespace, so a single
//! type can act as both a component and a resource with distinct ids.

mod info;
mod registry;

pub use info::{ComponentId, Info, RequiredComponent, RequiredConstructor};
pub use registry::Components;

use crate::ecs::entity::Entity;
use crate::ecs::world::World;

/// Where a component's values live.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Dense columnar table storage. Fast iteration, rows move on archetype
    /// change.
    #[default]
    Table,
    /// Sparse-set storage. Values stay put across archetype changes.
    SparseSet,
}

/// A type attachable to entities. Usually implemented via
/// `#[derive(Component)]`, which also reads the optional
/// `#[component(storage = "sparse")]` attribute.
pub trait Component: Send + Sync + 'static {
    /// Storage strategy for values of this component.
    const STORAGE: StorageKind = StorageKind::Table;
}

/// Payload handed to every component lifecycle hook.
#[derive(Debug, Clone, Copy)]
pub struct HookContext {
    pub entity: Entity,
    pub component_id: ComponentId,
}

/// A component lifecycle hook. Hooks run at points where the world is
/// structurally consistent; they must not structurally mutate the entity
/// they fire for.
pub type ComponentHook = fn(&mut World, HookContext);

/// Lifecycle hooks for one component type, at most one per kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct Hooks {
    /// Runs after a value is added to an entity that lacked it.
    pub on_add: Option<ComponentHook>,
    /// Runs after a value is written, whether added or replaced.
    pub on_insert: Option<ComponentHook>,
    /// Runs before an existing value is overwritten or removed.
    pub on_replace: Option<ComponentHook>,
    /// Runs before a value is removed, after `on_replace`.
    pub on_remove: Option<ComponentHook>,
}

impl Hooks {
    /// Set the `on_add` hook. Panics if one is already set.
    pub fn on_add(&mut self, hook: ComponentHook) -> &mut Self {
        assert!(self.on_add.is_none(), "on_add hook already registered");
        self.on_add = Some(hook);
        self
    }

    /// Set the `on_insert` hook. Panics if one is already set.
    pub fn on_insert(&mut self, hook: ComponentHook) -> &mut Self {
        assert!(self.on_insert.is_none(), "on_insert hook already registered");
        self.on_insert = Some(hook);
        self
    }

    /// Set the `on_replace` hook. Panics if one is already set.
    pub fn on_replace(&mut self, hook: ComponentHook) -> &mut Self {
        assert!(self.on_replace.is_none(), "on_replace hook already registered");
        self.on_replace = Some(hook);
        self
    }

    /// Set the `on_remove` hook. Panics if one is already set.
    pub fn on_remove(&mut self, hook: ComponentHook) -> &mut Self {
        assert!(self.on_remove.is_none(), "on_remove hook already registered");
        self.on_remove = Some(hook);
        self
    }
}
