//! ECS microbenchmarks using Criterion.
//!
//! These benchmarks measure individual operations in isolation:
//! - Entity spawn/despawn
//! - Component add/remove (archetype migration)
//! - Schedule build and run overhead

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tessera_bench::components::*;
use tessera_engine::ecs::system::FuncSystem;
use tessera_engine::ecs::{IntoSystemConfigs, Schedule, SystemRef, World};

// =============================================================================
// Spawn Benchmarks
// =============================================================================

fn bench_spawn(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn");

    for count in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(
            BenchmarkId::new("single_component", count),
            &count,
            |b, &n| {
                b.iter(|| {
                    let mut world = World::new();
                    for _ in 0..n {
                        black_box(world.spawn(Position::default()));
                    }
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("four_components", count),
            &count,
            |b, &n| {
                b.iter(|| {
                    let mut world = World::new();
                    for _ in 0..n {
                        black_box(world.spawn((
                            Transform::default(),
                            Position::default(),
                            Rotation::default(),
                            Velocity::default(),
                        )));
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_despawn(c: &mut Criterion) {
    let mut group = c.benchmark_group("despawn");

    for count in [100, 1_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &n| {
            b.iter_batched(
                || {
                    let mut world = World::new();
                    let entities: Vec<_> = (0..n)
                        .map(|_| world.spawn((Position::default(), Velocity::default())))
                        .collect();
                    (world, entities)
                },
                |(mut world, entities)| {
                    for entity in entities {
                        black_box(world.despawn(entity));
                    }
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

// =============================================================================
// Migration Benchmarks
// =============================================================================

fn bench_migration(c: &mut Criterion) {
    let mut group = c.benchmark_group("migration");

    // Bounce one entity between two archetypes; the transition edge is
    // cached after the first lap, so this measures the row-move path.
    group.bench_function("add_remove_table_component", |b| {
        let mut world = World::new();
        let entity = world.spawn((Position::default(), Rotation::default()));
        b.iter(|| {
            world
                .insert(entity, Velocity::default())
                .unwrap_or_else(|stale| panic!("{stale}"));
            world
                .remove::<Velocity>(entity)
                .unwrap_or_else(|stale| panic!("{stale}"));
        });
    });

    // Sparse components toggle without changing the backing table row.
    group.bench_function("add_remove_sparse_component", |b| {
        let mut world = World::new();
        let entity = world.spawn(Position::default());
        b.iter(|| {
            world
                .insert(entity, Stunned)
                .unwrap_or_else(|stale| panic!("{stale}"));
            world
                .remove::<Stunned>(entity)
                .unwrap_or_else(|stale| panic!("{stale}"));
        });
    });

    group.finish();
}

// =============================================================================
// Schedule Benchmarks
// =============================================================================

/// Leaked system names, built once and shared by every schedule build so
/// repeated batch setups do not grow the leak.
fn system_names(count: usize) -> &'static [&'static str] {
    const MAX_SYSTEMS: usize = 64;
    static NAMES: std::sync::OnceLock<Vec<&'static str>> = std::sync::OnceLock::new();
    let names = NAMES.get_or_init(|| {
        (0..MAX_SYSTEMS)
            .map(|index| format!("system_{index}").leak() as &'static str)
            .collect()
    });
    &names[..count]
}

/// A world plus a fully chained schedule of `system_count` systems.
fn schedule_of(system_count: usize) -> (World, Schedule) {
    let names = system_names(system_count);
    let mut world = World::new();
    world.insert_resource(FrameCount::default());
    let mut schedule = Schedule::new();
    for (index, &name) in names.iter().enumerate() {
        let system = FuncSystem::new(name, |world: &mut World| {
            world.resource_mut::<FrameCount>().0 += 1;
        })
        .writes_resource::<FrameCount>();
        if index == 0 {
            schedule.add_systems(system);
        } else {
            schedule.add_systems(system.after(SystemRef(names[index - 1])));
        }
    }
    (world, schedule)
}

fn bench_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule");

    for count in [4, 16, 64] {
        group.bench_with_input(BenchmarkId::new("build", count), &count, |b, &n| {
            b.iter_batched(
                || schedule_of(n),
                |(mut world, mut schedule)| {
                    schedule
                        .initialize(&mut world)
                        .unwrap_or_else(|error| panic!("{error}"));
                },
                criterion::BatchSize::SmallInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("run", count), &count, |b, &n| {
            let (mut world, mut schedule) = schedule_of(n);
            schedule
                .initialize(&mut world)
                .unwrap_or_else(|error| panic!("{error}"));
            b.iter(|| schedule.run(&mut world));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_spawn,
    bench_despawn,
    bench_migration,
    bench_schedule
);
criterion_main!(benches);
