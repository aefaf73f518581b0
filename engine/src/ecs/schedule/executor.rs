//! The single-threaded executor: walks the compiled plan in order,
//! evaluates set and system run conditions, and keeps going when a user
//! system panics.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use fixedbitset::FixedBitSet;
use log::error;

use crate::ecs::world::World;

use super::build::ScheduleGraph;

/// The compiled output of a schedule build: a topological system order
/// plus the dependency bookkeeping a parallel-capable executor needs to
/// know when a system becomes runnable.
#[derive(Debug, Default)]
pub struct ExecutablePlan {
    pub(crate) system_order: Vec<usize>,
    pub(crate) dependency_counts: Vec<usize>,
    pub(crate) dependents: Vec<Vec<usize>>,
    /// Sets carrying run conditions, outermost first, with the systems
    /// under each.
    pub(crate) sets_with_conditions: Vec<(usize, FixedBitSet)>,
}

impl ExecutablePlan {
    /// System indices in execution order.
    pub fn system_order(&self) -> &[usize] {
        &self.system_order
    }

    /// How many dependencies must complete before `system` may run.
    pub fn dependency_count(&self, system: usize) -> usize {
        self.dependency_counts[system]
    }

    /// The systems directly unblocked when `system` completes.
    pub fn dependents(&self, system: usize) -> &[usize] {
        &self.dependents[system]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ExecutorState {
    #[default]
    Idle,
    Running,
}

/// Runs a compiled plan start to finish. Systems with no path between
/// them execute in plan order; callers must not rely on it.
pub(super) struct SingleThreadedExecutor {
    /// Flush deferred work still buffered after the last system.
    pub(super) apply_final_deferred: bool,
    state: ExecutorState,
    evaluated_sets: FixedBitSet,
    skipped_systems: FixedBitSet,
    completed_systems: FixedBitSet,
    unapplied_systems: FixedBitSet,
}

impl Default for SingleThreadedExecutor {
    fn default() -> Self {
        Self {
            apply_final_deferred: true,
            state: ExecutorState::Idle,
            evaluated_sets: FixedBitSet::new(),
            skipped_systems: FixedBitSet::new(),
            completed_systems: FixedBitSet::new(),
            unapplied_systems: FixedBitSet::new(),
        }
    }
}

impl SingleThreadedExecutor {
    pub(super) fn run(
        &mut self,
        graph: &mut ScheduleGraph,
        plan: &ExecutablePlan,
        world: &mut World,
    ) {
        assert!(
            self.state == ExecutorState::Idle,
            "executor re-entered while running"
        );
        self.state = ExecutorState::Running;
        let system_count = graph.systems.len();
        self.evaluated_sets.clear();
        self.evaluated_sets.grow(graph.set_conditions.len());
        self.skipped_systems.clear();
        self.skipped_systems.grow(system_count);
        self.completed_systems.clear();
        self.completed_systems.grow(system_count);
        self.unapplied_systems.clear();
        self.unapplied_systems.grow(system_count);

        for &system_index in &plan.system_order {
            let mut should_run = !self.skipped_systems.contains(system_index);

            // A failing set condition skips every member at once; the set
            // is only evaluated when its first live member comes up.
            if should_run {
                for (set_index, members) in &plan.sets_with_conditions {
                    if self.evaluated_sets.contains(*set_index)
                        || !members.contains(system_index)
                    {
                        continue;
                    }
                    self.evaluated_sets.insert(*set_index);
                    let set_allows = graph.set_conditions[*set_index]
                        .iter_mut()
                        .all(|condition| condition(world));
                    if !set_allows {
                        self.skipped_systems.union_with(members);
                        should_run = false;
                    }
                }
            }

            if should_run {
                should_run = graph.systems[system_index]
                    .conditions
                    .iter_mut()
                    .all(|condition| condition(world));
                if !should_run {
                    self.skipped_systems.insert(system_index);
                }
            }

            if should_run {
                world.increment_change_tick();
                let system = &mut graph.systems[system_index].system;
                if system.is_sync_point() {
                    system.run(world);
                    self.unapplied_systems.clear();
                } else {
                    let result = catch_unwind(AssertUnwindSafe(|| system.run(world)));
                    if let Err(payload) = result {
                        error!(
                            "system `{}` panicked: {}",
                            system.name(),
                            payload_message(payload.as_ref())
                        );
                    }
                    if system.has_deferred() {
                        self.unapplied_systems.insert(system_index);
                    }
                }
            }
            self.completed_systems.insert(system_index);
        }

        if self.apply_final_deferred && !self.unapplied_systems.is_clear() {
            world.flush();
            self.unapplied_systems.clear();
        }
        self.state = ExecutorState::Idle;
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "opaque panic payload"
    }
}

// ==================== Tests ====================
