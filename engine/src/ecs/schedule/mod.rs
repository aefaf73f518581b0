//! Schedules: an unordered collection of systems plus ordering
//! constraints, compiled into a deterministic, cycle-free execution plan.
//!
//! Systems and system sets form two graphs. The *hierarchy* graph records
//! set membership (a set contains systems and other sets); the
//! *dependency* graph records before/after edges. [`Schedule::run`]
//! validates both, flattens sets away, inserts sync points between
//! deferred work and its dependents, checks unordered pairs for access
//! conflicts, and then executes the compiled plan single-threaded.
//!
//! Ordering targets are [`SetLabel`]s: a unit struct implementing the
//! trait names a set by type, a `&'static str` names one by value, and
//! [`SystemRef`] targets the implicit one-member set every system gets.

mod build;
mod executor;
mod graph;

use std::any::{TypeId, type_name};
use std::borrow::Cow;

use thiserror::Error;

use crate::ecs::system::{BoxedSystem, IntoSystem};
use crate::ecs::world::{Id as WorldId, World};

pub use build::ScheduleGraph;
pub use executor::ExecutablePlan;
pub use graph::{CheckGraphResults, DiGraph, NodeId, UnGraph, check_graph};

use executor::SingleThreadedExecutor;

// ==================== Labels ====================

/// Identity of a system set. Two labels with the same key refer to the
/// same set regardless of which value produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SetKey {
    /// A set named by a label type.
    Typed(TypeId, &'static str),
    /// A set named by string value.
    Named(Cow<'static, str>),
    /// The implicit set holding every system sharing one name. Ordering
    /// against it targets that system directly.
    System(Cow<'static, str>),
}

impl SetKey {
    pub fn name(&self) -> &str {
        match self {
            SetKey::Typed(_, name) => name,
            SetKey::Named(name) | SetKey::System(name) => name,
        }
    }

    pub fn is_system_set(&self) -> bool {
        matches!(self, SetKey::System(_))
    }
}

/// A value naming a system set. Implement it on a unit struct to get a
/// typed label; `&'static str` works out of the box.
pub trait SetLabel: Send + Sync + 'static {
    fn key(&self) -> SetKey
    where
        Self: Sized,
    {
        SetKey::Typed(TypeId::of::<Self>(), type_name::<Self>())
    }
}

impl SetLabel for &'static str {
    fn key(&self) -> SetKey {
        SetKey::Named(Cow::Borrowed(self))
    }
}

/// Targets the implicit set of the system with this name, for ordering
/// against one specific system rather than a declared set.
pub struct SystemRef(pub &'static str);

impl SetLabel for SystemRef {
    fn key(&self) -> SetKey {
        SetKey::System(Cow::Borrowed(self.0))
    }
}

// ==================== Conditions ====================

/// A run condition: evaluated immediately before its system or set, with
/// read-only world access. `false` skips without counting as an error.
pub type BoxedCondition = Box<dyn FnMut(&World) -> bool + Send + Sync>;

// ==================== Configs ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DependencyKind {
    Before,
    After,
    /// `Before`, without a sync point on the edge.
    BeforeNoSync,
    /// `After`, without a sync point on the edge.
    AfterNoSync,
}

/// One system plus everything declared about it before it joins a
/// schedule.
pub struct SystemConfig {
    pub(crate) system: BoxedSystem,
    pub(crate) conditions: Vec<BoxedCondition>,
    pub(crate) sets: Vec<SetKey>,
    pub(crate) dependencies: Vec<(DependencyKind, SetKey)>,
    pub(crate) ambiguous_with: Vec<SetKey>,
    pub(crate) ambiguous_with_all: bool,
}

impl SystemConfig {
    fn new(system: BoxedSystem) -> Self {
        Self {
            system,
            conditions: Vec::new(),
            sets: Vec::new(),
            dependencies: Vec::new(),
            ambiguous_with: Vec::new(),
            ambiguous_with_all: false,
        }
    }
}

/// One or more system configs, added to a schedule as a unit.
pub struct SystemConfigs {
    pub(crate) configs: Vec<SystemConfig>,
    pub(crate) chained: bool,
}

impl SystemConfigs {
    pub fn in_set(mut self, set: impl SetLabel) -> Self {
        let key = set.key();
        assert!(
            !key.is_system_set(),
            "systems cannot be added to the implicit set of another system"
        );
        for config in &mut self.configs {
            config.sets.push(key.clone());
        }
        self
    }

    pub fn before(mut self, target: impl SetLabel) -> Self {
        let key = target.key();
        for config in &mut self.configs {
            config
                .dependencies
                .push((DependencyKind::Before, key.clone()));
        }
        self
    }

    pub fn after(mut self, target: impl SetLabel) -> Self {
        let key = target.key();
        for config in &mut self.configs {
            config
                .dependencies
                .push((DependencyKind::After, key.clone()));
        }
        self
    }

    /// [`Self::before`], opting this edge out of automatic sync points.
    pub fn before_ignore_deferred(mut self, target: impl SetLabel) -> Self {
        let key = target.key();
        for config in &mut self.configs {
            config
                .dependencies
                .push((DependencyKind::BeforeNoSync, key.clone()));
        }
        self
    }

    /// [`Self::after`], opting this edge out of automatic sync points.
    pub fn after_ignore_deferred(mut self, target: impl SetLabel) -> Self {
        let key = target.key();
        for config in &mut self.configs {
            config
                .dependencies
                .push((DependencyKind::AfterNoSync, key.clone()));
        }
        self
    }

    /// Skip this system on runs where `condition` returns false.
    pub fn run_if(
        mut self,
        condition: impl FnMut(&World) -> bool + Send + Sync + 'static,
    ) -> Self {
        // The closure is not Clone, so it cannot be distributed over a
        // tuple of systems. Shared conditions go on a set.
        assert!(
            self.configs.len() == 1,
            "run_if applies to a single system; configure a set for shared conditions"
        );
        self.configs[0].conditions.push(Box::new(condition));
        self
    }

    /// Suppress ambiguity reports between these systems and `target`.
    pub fn ambiguous_with(mut self, target: impl SetLabel) -> Self {
        let key = target.key();
        for config in &mut self.configs {
            config.ambiguous_with.push(key.clone());
        }
        self
    }

    /// Suppress all ambiguity reports involving these systems.
    pub fn ambiguous_with_all(mut self) -> Self {
        for config in &mut self.configs {
            config.ambiguous_with_all = true;
        }
        self
    }

    /// Run the members in declaration order: each depends on the previous.
    pub fn chain(mut self) -> Self {
        self.chained = true;
        self
    }
}

#[doc(hidden)]
pub struct SystemConfigMarker;

#[doc(hidden)]
pub struct TupleConfigMarker;

/// Conversion into [`SystemConfigs`]. The `Marker` parameter only
/// disambiguates the blanket impls.
pub trait IntoSystemConfigs<Marker> {
    fn into_configs(self) -> SystemConfigs;

    fn in_set(self, set: impl SetLabel) -> SystemConfigs
    where
        Self: Sized,
    {
        self.into_configs().in_set(set)
    }

    fn before(self, target: impl SetLabel) -> SystemConfigs
    where
        Self: Sized,
    {
        self.into_configs().before(target)
    }

    fn after(self, target: impl SetLabel) -> SystemConfigs
    where
        Self: Sized,
    {
        self.into_configs().after(target)
    }

    fn before_ignore_deferred(self, target: impl SetLabel) -> SystemConfigs
    where
        Self: Sized,
    {
        self.into_configs().before_ignore_deferred(target)
    }

    fn after_ignore_deferred(self, target: impl SetLabel) -> SystemConfigs
    where
        Self: Sized,
    {
        self.into_configs().after_ignore_deferred(target)
    }

    fn run_if(
        self,
        condition: impl FnMut(&World) -> bool + Send + Sync + 'static,
    ) -> SystemConfigs
    where
        Self: Sized,
    {
        self.into_configs().run_if(condition)
    }

    fn ambiguous_with(self, target: impl SetLabel) -> SystemConfigs
    where
        Self: Sized,
    {
        self.into_configs().ambiguous_with(target)
    }

    fn ambiguous_with_all(self) -> SystemConfigs
    where
        Self: Sized,
    {
        self.into_configs().ambiguous_with_all()
    }

    fn chain(self) -> SystemConfigs
    where
        Self: Sized,
    {
        self.into_configs().chain()
    }
}

impl IntoSystemConfigs<()> for SystemConfigs {
    fn into_configs(self) -> SystemConfigs {
        self
    }
}

impl<Marker, S> IntoSystemConfigs<(SystemConfigMarker, Marker)> for S
where
    S: IntoSystem<Marker>,
{
    fn into_configs(self) -> SystemConfigs {
        SystemConfigs {
            configs: vec![SystemConfig::new(self.into_system())],
            chained: false,
        }
    }
}

macro_rules! tuple_system_configs {
    ($(($config:ident, $marker:ident)),*) => {
        impl<$($config, $marker),*> IntoSystemConfigs<(TupleConfigMarker, $($marker,)*)>
            for ($($config,)*)
        where
            $($config: IntoSystemConfigs<$marker>,)*
        {
            #[allow(non_snake_case)]
            fn into_configs(self) -> SystemConfigs {
                let ($($config,)*) = self;
                let mut configs = Vec::new();
                $(configs.extend($config.into_configs().configs);)*
                SystemConfigs {
                    configs,
                    chained: false,
                }
            }
        }
    };
}

tuple_system_configs!((C0, M0), (C1, M1));
tuple_system_configs!((C0, M0), (C1, M1), (C2, M2));
tuple_system_configs!((C0, M0), (C1, M1), (C2, M2), (C3, M3));
tuple_system_configs!((C0, M0), (C1, M1), (C2, M2), (C3, M3), (C4, M4));
tuple_system_configs!((C0, M0), (C1, M1), (C2, M2), (C3, M3), (C4, M4), (C5, M5));
tuple_system_configs!(
    (C0, M0),
    (C1, M1),
    (C2, M2),
    (C3, M3),
    (C4, M4),
    (C5, M5),
    (C6, M6)
);
tuple_system_configs!(
    (C0, M0),
    (C1, M1),
    (C2, M2),
    (C3, M3),
    (C4, M4),
    (C5, M5),
    (C6, M6),
    (C7, M7)
);

/// Declared properties of a system set.
pub struct SetConfig {
    pub(crate) key: SetKey,
    pub(crate) conditions: Vec<BoxedCondition>,
    pub(crate) sets: Vec<SetKey>,
    pub(crate) dependencies: Vec<(DependencyKind, SetKey)>,
    pub(crate) ambiguous_with: Vec<SetKey>,
    pub(crate) ambiguous_with_all: bool,
}

impl SetConfig {
    fn new(key: SetKey) -> Self {
        assert!(
            !key.is_system_set(),
            "the implicit set of a system cannot be configured"
        );
        Self {
            key,
            conditions: Vec::new(),
            sets: Vec::new(),
            dependencies: Vec::new(),
            ambiguous_with: Vec::new(),
            ambiguous_with_all: false,
        }
    }
}

/// One or more set configs, applied to a schedule as a unit.
pub struct SetConfigs {
    pub(crate) configs: Vec<SetConfig>,
    pub(crate) chained: bool,
}

impl SetConfigs {
    pub fn in_set(mut self, set: impl SetLabel) -> Self {
        let key = set.key();
        assert!(
            !key.is_system_set(),
            "sets cannot be added to the implicit set of a system"
        );
        for config in &mut self.configs {
            config.sets.push(key.clone());
        }
        self
    }

    pub fn before(mut self, target: impl SetLabel) -> Self {
        let key = target.key();
        for config in &mut self.configs {
            config
                .dependencies
                .push((DependencyKind::Before, key.clone()));
        }
        self
    }

    pub fn after(mut self, target: impl SetLabel) -> Self {
        let key = target.key();
        for config in &mut self.configs {
            config
                .dependencies
                .push((DependencyKind::After, key.clone()));
        }
        self
    }

    pub fn before_ignore_deferred(mut self, target: impl SetLabel) -> Self {
        let key = target.key();
        for config in &mut self.configs {
            config
                .dependencies
                .push((DependencyKind::BeforeNoSync, key.clone()));
        }
        self
    }

    pub fn after_ignore_deferred(mut self, target: impl SetLabel) -> Self {
        let key = target.key();
        for config in &mut self.configs {
            config
                .dependencies
                .push((DependencyKind::AfterNoSync, key.clone()));
        }
        self
    }

    /// Skip every system under these sets on runs where `condition`
    /// returns false.
    pub fn run_if(
        mut self,
        condition: impl FnMut(&World) -> bool + Send + Sync + 'static,
    ) -> Self {
        assert!(self.configs.len() == 1, "run_if applies to a single set");
        self.configs[0].conditions.push(Box::new(condition));
        self
    }

    pub fn ambiguous_with(mut self, target: impl SetLabel) -> Self {
        let key = target.key();
        for config in &mut self.configs {
            config.ambiguous_with.push(key.clone());
        }
        self
    }

    pub fn ambiguous_with_all(mut self) -> Self {
        for config in &mut self.configs {
            config.ambiguous_with_all = true;
        }
        self
    }

    pub fn chain(mut self) -> Self {
        self.chained = true;
        self
    }
}

#[doc(hidden)]
pub struct SetLabelMarker;

/// Conversion into [`SetConfigs`].
pub trait IntoSetConfigs<Marker> {
    fn into_set_configs(self) -> SetConfigs;

    fn in_set(self, set: impl SetLabel) -> SetConfigs
    where
        Self: Sized,
    {
        self.into_set_configs().in_set(set)
    }

    fn before(self, target: impl SetLabel) -> SetConfigs
    where
        Self: Sized,
    {
        self.into_set_configs().before(target)
    }

    fn after(self, target: impl SetLabel) -> SetConfigs
    where
        Self: Sized,
    {
        self.into_set_configs().after(target)
    }

    fn before_ignore_deferred(self, target: impl SetLabel) -> SetConfigs
    where
        Self: Sized,
    {
        self.into_set_configs().before_ignore_deferred(target)
    }

    fn after_ignore_deferred(self, target: impl SetLabel) -> SetConfigs
    where
        Self: Sized,
    {
        self.into_set_configs().after_ignore_deferred(target)
    }

    fn run_if(
        self,
        condition: impl FnMut(&World) -> bool + Send + Sync + 'static,
    ) -> SetConfigs
    where
        Self: Sized,
    {
        self.into_set_configs().run_if(condition)
    }

    fn ambiguous_with(self, target: impl SetLabel) -> SetConfigs
    where
        Self: Sized,
    {
        self.into_set_configs().ambiguous_with(target)
    }

    fn ambiguous_with_all(self) -> SetConfigs
    where
        Self: Sized,
    {
        self.into_set_configs().ambiguous_with_all()
    }

    fn chain(self) -> SetConfigs
    where
        Self: Sized,
    {
        self.into_set_configs().chain()
    }
}

impl IntoSetConfigs<()> for SetConfigs {
    fn into_set_configs(self) -> SetConfigs {
        self
    }
}

impl<L: SetLabel> IntoSetConfigs<SetLabelMarker> for L {
    fn into_set_configs(self) -> SetConfigs {
        SetConfigs {
            configs: vec![SetConfig::new(self.key())],
            chained: false,
        }
    }
}

macro_rules! tuple_set_configs {
    ($(($config:ident, $marker:ident)),*) => {
        impl<$($config, $marker),*> IntoSetConfigs<(TupleConfigMarker, $($marker,)*)>
            for ($($config,)*)
        where
            $($config: IntoSetConfigs<$marker>,)*
        {
            #[allow(non_snake_case)]
            fn into_set_configs(self) -> SetConfigs {
                let ($($config,)*) = self;
                let mut configs = Vec::new();
                $(configs.extend($config.into_set_configs().configs);)*
                SetConfigs {
                    configs,
                    chained: false,
                }
            }
        }
    };
}

tuple_set_configs!((C0, M0), (C1, M1));
tuple_set_configs!((C0, M0), (C1, M1), (C2, M2));
tuple_set_configs!((C0, M0), (C1, M1), (C2, M2), (C3, M3));
tuple_set_configs!((C0, M0), (C1, M1), (C2, M2), (C3, M3), (C4, M4));

// ==================== Errors & settings ====================

/// A fatal problem found while compiling the schedule graphs. Build
/// errors surface before any system runs.
#[derive(Error, Debug)]
pub enum ScheduleBuildError {
    #[error("system set `{0}` contains itself")]
    HierarchyLoop(String),
    #[error("the hierarchy of system sets contains a cycle: {0}")]
    HierarchyCycle(String),
    #[error("the hierarchy of system sets contains redundant edges: {0}")]
    HierarchyRedundancy(String),
    #[error("`{0}` depends on itself")]
    DependencyLoop(String),
    #[error("the dependency graph contains a cycle: {0}")]
    DependencyCycle(String),
    #[error("`{0}` and `{1}` have both a hierarchy and a dependency relationship")]
    CrossDependency(String, String),
    #[error("sets `{0}` and `{1}` are ordered against each other but share systems")]
    SetsHaveOrderButIntersect(String, String),
    #[error("ordering against `{0}` is ambiguous: {1} systems share that name")]
    SystemOrderAmbiguity(String, usize),
    #[error("{0} pairs of systems with conflicting access have no order between them:{1}")]
    Ambiguity(usize, String),
}

/// How a detected (non-fatal by nature) problem should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Ignore,
    #[default]
    Warn,
    Error,
}

/// Knobs for the schedule build pipeline.
#[derive(Debug, Clone)]
pub struct ScheduleBuildSettings {
    /// Policy for unordered systems with conflicting access.
    pub ambiguity_detection: LogLevel,
    /// Policy for redundant hierarchy edges.
    pub hierarchy_detection: LogLevel,
    /// Insert sync points between deferred systems and their dependents.
    pub auto_insert_apply_deferred: bool,
    /// Include set names when reporting ambiguities.
    pub report_sets: bool,
}

impl Default for ScheduleBuildSettings {
    fn default() -> Self {
        Self {
            ambiguity_detection: LogLevel::Ignore,
            hierarchy_detection: LogLevel::Warn,
            auto_insert_apply_deferred: true,
            report_sets: true,
        }
    }
}

// ==================== Schedule ====================

/// A collection of systems and constraints, compiled on demand into an
/// [`ExecutablePlan`] and run by the single-threaded executor.
///
/// Mutating the schedule marks it dirty; the next [`Schedule::run`] or
/// [`Schedule::initialize`] rebuilds the plan. `run` panics on build
/// errors; call `initialize` first to handle them as values.
#[derive(Default)]
pub struct Schedule {
    graph: ScheduleGraph,
    plan: ExecutablePlan,
    executor: SingleThreadedExecutor,
    world_id: Option<WorldId>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_systems<M>(&mut self, systems: impl IntoSystemConfigs<M>) -> &mut Self {
        self.graph.add_systems(systems.into_configs());
        self
    }

    pub fn configure_sets<M>(&mut self, sets: impl IntoSetConfigs<M>) -> &mut Self {
        self.graph.configure_sets(sets.into_set_configs());
        self
    }

    pub fn set_build_settings(&mut self, settings: ScheduleBuildSettings) -> &mut Self {
        self.graph.settings = settings;
        self.graph.changed = true;
        self
    }

    /// Whether the trailing flush applies deferred work still buffered
    /// after the last system. Defaults to true.
    pub fn set_apply_final_deferred(&mut self, apply: bool) -> &mut Self {
        self.executor.apply_final_deferred = apply;
        self
    }

    pub fn graph(&self) -> &ScheduleGraph {
        &self.graph
    }

    /// Rebuild the plan if the graph changed since the last build.
    pub fn initialize(&mut self, world: &mut World) -> Result<(), ScheduleBuildError> {
        match self.world_id {
            None => self.world_id = Some(world.id()),
            Some(id) => assert!(
                id == world.id(),
                "schedule was initialized against world {:?} but run against {:?}",
                id,
                world.id()
            ),
        }
        if self.graph.changed {
            self.plan = self.graph.build(world)?;
            self.graph.changed = false;
        }
        Ok(())
    }

    /// Run one pass over all systems. Panics if the schedule fails to
    /// build.
    pub fn run(&mut self, world: &mut World) {
        if let Err(error) = self.initialize(world) {
            panic!("schedule failed to build: {error}");
        }
        world.check_change_ticks();
        self.executor.run(&mut self.graph, &self.plan, world);
    }
}
