use std::alloc::Layout;
use std::any::TypeId;
use std::borrow::Cow;
use std::sync::Arc;

use dashmap::DashMap;

use crate::ecs::component::{
    Component, ComponentId, Hooks, Info, RequiredComponent, StorageKind,
};
use crate::ecs::resource::Resource;

/// Drop glue for `T`, or `None` when dropping is a no-op.
pub(crate) fn drop_fn_for<T>() -> Option<unsafe fn(*mut u8)> {
    unsafe fn drop_as<T>(ptr: *mut u8) {
        // SAFETY: callers only pass pointers to valid values of T.
        unsafe { ptr.cast::<T>().drop_in_place() };
    }
    std::mem::needs_drop::<T>().then_some(drop_as::<T> as unsafe fn(*mut u8))
}

/// The component id arena for one world. Components and resources draw ids
/// from the same sequence but are looked up through separate type maps, so
/// a type registered as both gets two distinct ids.
///
/// The type maps are sharded concurrent maps: id lookups take `&self` and
/// stay lock-free, so query and access code can resolve ids without
/// threading a mutable borrow of the registry through.
#[derive(Debug, Default)]
pub struct Components {
    infos: Vec<Info>,
    components_by_type: DashMap<TypeId, ComponentId>,
    resources_by_type: DashMap<TypeId, ComponentId>,
}

impl Components {
    /// Number of registered ids, components and resources combined.
    #[inline]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Metadata for a registered id.
    #[inline]
    pub fn info(&self, id: ComponentId) -> Option<&Info> {
        self.infos.get(id.index())
    }

    /// Id of `C` if it has been registered as a component. Lock-free read.
    pub fn component_id<C: Component>(&self) -> Option<ComponentId> {
        self.components_by_type
            .get(&TypeId::of::<C>())
            .map(|id| *id)
    }

    /// Id of `R` if it has been registered as a resource. Lock-free read.
    pub fn resource_id<R: Resource>(&self) -> Option<ComponentId> {
        self.resources_by_type.get(&TypeId::of::<R>()).map(|id| *id)
    }

    /// Register `C` as a component, or return its existing id.
    pub fn register_component<C: Component>(&mut self) -> ComponentId {
        if let Some(id) = self.component_id::<C>() {
            return id;
        }
        let id = self.push_info::<C>(C::STORAGE);
        self.components_by_type.insert(TypeId::of::<C>(), id);
        id
    }

    /// Register `R` as a resource, or return its existing id. Resources are
    /// always effectively table-like single slots; the storage kind is
    /// unused for them.
    pub fn register_resource<R: Resource>(&mut self) -> ComponentId {
        if let Some(id) = self.resource_id::<R>() {
            return id;
        }
        let id = self.push_info::<R>(StorageKind::Table);
        self.resources_by_type.insert(TypeId::of::<R>(), id);
        id
    }

    fn push_info<T: 'static>(&mut self, storage: StorageKind) -> ComponentId {
        let id = ComponentId::from_index(self.infos.len());
        self.infos.push(Info::new(
            id,
            Cow::Borrowed(std::any::type_name::<T>()),
            Some(TypeId::of::<T>()),
            Layout::new::<T>(),
            drop_fn_for::<T>(),
            storage,
        ));
        id
    }

    /// Lifecycle hooks for a registered component, for mutation.
    pub fn hooks_mut(&mut self, id: ComponentId) -> Option<&mut Hooks> {
        self.infos.get_mut(id.index()).map(|info| &mut info.hooks)
    }

    /// Declare that `requiree` directly requires `required`, constructed by
    /// `constructor` when missing at insert time. Requirements are walked
    /// transitively when a bundle is first registered; the walk visits each
    /// id once, so a cycle between requirements is harmless.
    ///
    /// Panics if the pair is already registered.
    pub fn register_required(
        &mut self,
        requiree: ComponentId,
        required: ComponentId,
        constructor: Arc<dyn Fn(*mut u8) + Send + Sync>,
    ) {
        assert!(requiree != required, "a component cannot require itself");
        let info = &mut self.infos[requiree.index()];
        assert!(
            !info.required.iter().any(|r| r.component_id == required),
            "requirement already registered for {}",
            info.name()
        );
        info.required.push(RequiredComponent {
            component_id: required,
            constructor,
        });
    }
}
