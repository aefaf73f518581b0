//! Systems: units of work the schedule runs against a world.
//!
//! A system pairs a run function with the [`FilteredAccess`] it declares
//! over component and resource ids. The declared access is what the
//! schedule builder feeds its ambiguity detection; the single-threaded
//! executor does not enforce it at runtime. Access is resolved against a
//! world once, in [`System::initialize`], because component ids do not
//! exist until registration.

use std::borrow::Cow;

use crate::ecs::access::FilteredAccess;
use crate::ecs::component::Component;
use crate::ecs::resource::Resource;
use crate::ecs::world::World;

/// A schedulable unit of work.
pub trait System: Send + Sync + 'static {
    /// Name used in schedule diagnostics.
    fn name(&self) -> Cow<'static, str>;

    /// The access this system declared. Only meaningful after
    /// [`System::initialize`].
    fn access(&self) -> &FilteredAccess;

    /// Resolve declared access against the world. Runs once before the
    /// first execution.
    fn initialize(&mut self, world: &mut World);

    /// Execute against the world.
    fn run(&mut self, world: &mut World);

    /// Whether this system queues deferred work that a sync point must
    /// apply before later systems can observe it.
    fn has_deferred(&self) -> bool {
        false
    }

    /// Whether this system is a sync point inserted to apply deferred work.
    fn is_sync_point(&self) -> bool {
        false
    }
}

pub type BoxedSystem = Box<dyn System>;

/// Conversion into a boxed system. The `Marker` parameter only
/// disambiguates the blanket impls.
pub trait IntoSystem<Marker> {
    fn into_system(self) -> BoxedSystem;
}

impl<S: System> IntoSystem<()> for S {
    fn into_system(self) -> BoxedSystem {
        Box::new(self)
    }
}

#[doc(hidden)]
pub struct FunctionMarker;

/// Bare closures become exclusive systems: their access is "everything",
/// which orders correctly but conflicts with all other systems unless
/// ordered explicitly. Declare narrower access through [`FuncSystem`] when
/// the schedule should be free to interleave.
impl<F> IntoSystem<FunctionMarker> for F
where
    F: FnMut(&mut World) + Send + Sync + 'static,
{
    fn into_system(self) -> BoxedSystem {
        Box::new(FuncSystem::exclusive(std::any::type_name::<F>(), self))
    }
}

type AccessDecl = Box<dyn Fn(&mut World, &mut FilteredAccess) + Send + Sync>;

/// A system built from a closure plus an explicit access declaration.
pub struct FuncSystem {
    name: Cow<'static, str>,
    func: Box<dyn FnMut(&mut World) + Send + Sync>,
    decls: Vec<AccessDecl>,
    access: FilteredAccess,
    deferred: bool,
    exclusive: bool,
}

impl FuncSystem {
    /// A system with the given name and no declared access. Chain the
    /// `reads_*`/`writes_*` builders to declare what it touches.
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        func: impl FnMut(&mut World) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Box::new(func),
            decls: Vec::new(),
            access: FilteredAccess::new(),
            deferred: false,
            exclusive: false,
        }
    }

    /// A system that may touch anything.
    pub fn exclusive(
        name: impl Into<Cow<'static, str>>,
        func: impl FnMut(&mut World) + Send + Sync + 'static,
    ) -> Self {
        let mut system = Self::new(name, func);
        system.exclusive = true;
        system
    }

    pub fn reads_component<C: Component>(mut self) -> Self {
        self.decls.push(Box::new(|world, access| {
            let id = world.register_component::<C>();
            access.add_component_read(id);
        }));
        self
    }

    pub fn writes_component<C: Component>(mut self) -> Self {
        self.decls.push(Box::new(|world, access| {
            let id = world.register_component::<C>();
            access.add_component_write(id);
        }));
        self
    }

    /// Constrain the declared component access to entities with `C`.
    pub fn with_filter<C: Component>(mut self) -> Self {
        self.decls.push(Box::new(|world, access| {
            let id = world.register_component::<C>();
            access.and_with(id);
        }));
        self
    }

    /// Constrain the declared component access to entities without `C`.
    pub fn without_filter<C: Component>(mut self) -> Self {
        self.decls.push(Box::new(|world, access| {
            let id = world.register_component::<C>();
            access.and_without(id);
        }));
        self
    }

    pub fn reads_resource<R: Resource>(mut self) -> Self {
        self.decls.push(Box::new(|world, access| {
            let id = world.register_resource::<R>();
            access.access_mut().add_resource_read(id);
        }));
        self
    }

    pub fn writes_resource<R: Resource>(mut self) -> Self {
        self.decls.push(Box::new(|world, access| {
            let id = world.register_resource::<R>();
            access.access_mut().add_resource_write(id);
        }));
        self
    }

    /// Mark this system as queueing deferred work, so the schedule inserts
    /// a sync point between it and systems ordered after it.
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }
}

impl System for FuncSystem {
    fn name(&self) -> Cow<'static, str> {
        self.name.clone()
    }

    fn access(&self) -> &FilteredAccess {
        &self.access
    }

    fn initialize(&mut self, world: &mut World) {
        let mut access = FilteredAccess::new();
        if self.exclusive {
            access.access_mut().write_all();
        }
        for decl in &self.decls {
            decl(world, &mut access);
        }
        self.access = access;
    }

    fn run(&mut self, world: &mut World) {
        (self.func)(world);
    }

    fn has_deferred(&self) -> bool {
        self.deferred
    }
}

/// The sync point system: applies all deferred work queued so far by
/// flushing the world. Instances are inserted automatically between a
/// deferred system and its dependents.
pub struct ApplyDeferred {
    access: FilteredAccess,
}

impl Default for ApplyDeferred {
    fn default() -> Self {
        let mut access = FilteredAccess::new();
        access.access_mut().write_all();
        Self { access }
    }
}

impl System for ApplyDeferred {
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("apply_deferred")
    }

    fn access(&self) -> &FilteredAccess {
        &self.access
    }

    fn initialize(&mut self, _world: &mut World) {}

    fn run(&mut self, world: &mut World) {
        world.flush();
    }

    fn is_sync_point(&self) -> bool {
        true
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::Resource as DeriveResource;

    #[derive(DeriveResource, Default)]
    struct Counter(u32);

    #[test]
    fn func_system_resolves_access_at_initialize() {
        // Given
        let mut world = World::new();
        let mut system = FuncSystem::new("count", |world: &mut World| {
            world.resource_mut::<Counter>().0 += 1;
        })
        .writes_resource::<Counter>();

        // When
        system.initialize(&mut world);

        // Then - the declared resource id is in the access
        let id = world.components().resource_id::<Counter>().unwrap();
        assert!(system.access().access().has_resource_write(id));
        assert!(!system.access().access().has_resource_write(
            crate::ecs::component::ComponentId::from_index(id.index() + 1)
        ));
    }

    #[test]
    fn func_system_runs_against_world() {
        let mut world = World::new();
        world.insert_resource(Counter::default());
        let mut system = FuncSystem::new("count", |world: &mut World| {
            world.resource_mut::<Counter>().0 += 1;
        });
        system.initialize(&mut world);

        system.run(&mut world);
        system.run(&mut world);

        assert_eq!(world.resource::<Counter>().0, 2);
    }

    #[test]
    fn apply_deferred_flushes_queued_commands() {
        let mut world = World::new();
        world.insert_resource(Counter::default());
        world.queue(|world| world.resource_mut::<Counter>().0 = 10);

        let mut sync = ApplyDeferred::default();
        sync.run(&mut world);

        assert_eq!(world.resource::<Counter>().0, 10);
        assert!(sync.is_sync_point());
    }
}
