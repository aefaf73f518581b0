use std::alloc::Layout;
use std::any::TypeId;
use std::borrow::Cow;
use std::sync::Arc;

use crate::ecs::component::{Hooks, StorageKind};

/// Identifies a registered component (or resource) within one world.
/// Ids are dense and allocated in registration order, which lets the access
/// layer use them directly as bit indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(usize);

impl ComponentId {
    #[inline]
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(&self) -> usize {
        self.0
    }
}

/// Writes a default-constructed value of a required component into an
/// uninitialized slot of the right layout.
pub type RequiredConstructor = Arc<dyn Fn(*mut u8) + Send + Sync>;

/// A directly required component: inserting the requiring component also
/// inserts this one (constructed by `constructor`) unless the entity
/// already has it.
#[derive(Clone)]
pub struct RequiredComponent {
    pub component_id: ComponentId,
    pub constructor: RequiredConstructor,
}

impl std::fmt::Debug for RequiredComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequiredComponent")
            .field("component_id", &self.component_id)
            .finish()
    }
}

/// Registration-time metadata for one component type: layout and drop glue
/// for the type-erased stores, the storage strategy, lifecycle hooks, and
/// the directly required components.
#[derive(Debug)]
pub struct Info {
    id: ComponentId,
    name: Cow<'static, str>,
    type_id: Option<TypeId>,
    layout: Layout,
    drop: Option<unsafe fn(*mut u8)>,
    storage: StorageKind,
    pub(super) hooks: Hooks,
    pub(super) required: Vec<RequiredComponent>,
}

impl Info {
    pub(super) fn new(
        id: ComponentId,
        name: Cow<'static, str>,
        type_id: Option<TypeId>,
        layout: Layout,
        drop: Option<unsafe fn(*mut u8)>,
        storage: StorageKind,
    ) -> Self {
        Self {
            id,
            name,
            type_id,
            layout,
            drop,
            storage,
            hooks: Hooks::default(),
            required: Vec::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> ComponentId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[inline]
    pub fn drop(&self) -> Option<unsafe fn(*mut u8)> {
        self.drop
    }

    #[inline]
    pub fn storage(&self) -> StorageKind {
        self.storage
    }

    #[inline]
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Directly required components, in registration order.
    #[inline]
    pub fn required(&self) -> &[RequiredComponent] {
        &self.required
    }

    /// Build an info for a concrete Rust type without going through a
    /// registry, for storage-level tests.
    #[cfg(test)]
    pub fn new_for_tests<T: 'static>(name: &'static str, storage: StorageKind) -> Self {
        Self::new(
            ComponentId::from_index(0),
            Cow::Borrowed(name),
            Some(TypeId::of::<T>()),
            Layout::new::<T>(),
            crate::ecs::component::registry::drop_fn_for::<T>(),
            storage,
        )
    }
}
