//! ECS benchmarks using criterion for historical comparison.

use std::hint::black_box;

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use paged_ecs::{ComponentBuffer, ComponentDesc, ComponentId, Entity, SpawnData, World};

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

fn setup() -> (World, ComponentId, ComponentId) {
    let mut world = World::new();
    let pos = world
        .register::<Position>(ComponentDesc::of::<Position>())
        .unwrap();
    let vel = world
        .register::<Velocity>(ComponentDesc::of::<Velocity>())
        .unwrap();
    (world, pos, vel)
}

fn positions(count: u64) -> ComponentBuffer {
    let mut buffer = ComponentBuffer::of::<Position>();
    for i in 0..count {
        buffer
            .push(&Position {
                x: i as f32,
                y: 0.0,
                z: 0.0,
            })
            .unwrap();
    }
    buffer
}

fn spawn_positions(world: &mut World, pos: ComponentId, count: u64) -> Vec<Entity> {
    let buffer = positions(count);
    world
        .spawn(None, count as usize, &[SpawnData::from_buffer(pos, &buffer)])
        .unwrap()
}

fn spawn_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn");

    for count in [1, 100, 1000, 10000] {
        group.throughput(Throughput::Elements(count));

        group.bench_with_input(BenchmarkId::new("bulk", count), &count, |b, &count| {
            let buffer = positions(count);
            b.iter(|| {
                let (mut world, pos, _) = setup();
                black_box(
                    world
                        .spawn(None, count as usize, &[SpawnData::from_buffer(pos, &buffer)])
                        .unwrap(),
                );
            });
        });

        group.bench_with_input(BenchmarkId::new("one_by_one", count), &count, |b, &count| {
            b.iter(|| {
                let (mut world, pos, _) = setup();
                for i in 0..count {
                    let value = Position {
                        x: i as f32,
                        y: 0.0,
                        z: 0.0,
                    };
                    black_box(
                        world
                            .spawn(None, 1, &[SpawnData::new(pos, bytemuck::bytes_of(&value))])
                            .unwrap(),
                    );
                }
            });
        });
    }

    group.finish();
}

fn component_access_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("component_access");

    for count in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(count));

        group.bench_with_input(BenchmarkId::new("get", count), &count, |b, &count| {
            let (mut world, pos, _) = setup();
            let entities = spawn_positions(&mut world, pos, count);

            b.iter(|| {
                for &entity in &entities {
                    black_box(world.get::<Position>(entity).unwrap());
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("write", count), &count, |b, &count| {
            let (mut world, pos, _) = setup();
            let entities = spawn_positions(&mut world, pos, count);

            b.iter(|| {
                for &entity in &entities {
                    let bytes = world.write(entity, pos).unwrap();
                    bytes[0] = bytes[0].wrapping_add(1);
                }
            });
        });
    }

    group.finish();
}

fn archetype_change_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("archetype_change");

    for count in [100, 1000] {
        group.throughput(Throughput::Elements(count));

        group.bench_with_input(
            BenchmarkId::new("insert_component", count),
            &count,
            |b, &count| {
                b.iter_batched(
                    || {
                        let (mut world, pos, _) = setup();
                        let entities = spawn_positions(&mut world, pos, count);
                        (world, entities)
                    },
                    |(mut world, entities)| {
                        for entity in entities {
                            world
                                .insert(
                                    entity,
                                    &Velocity {
                                        x: 1.0,
                                        y: 0.0,
                                        z: 0.0,
                                    },
                                )
                                .unwrap();
                        }
                    },
                    BatchSize::SmallInput,
                );
            },
        );

        group.bench_with_input(
            BenchmarkId::new("remove_component", count),
            &count,
            |b, &count| {
                b.iter_batched(
                    || {
                        let (mut world, pos, vel) = setup();
                        let entities = spawn_positions(&mut world, pos, count);
                        for &entity in &entities {
                            world.add_component(entity, vel, None).unwrap();
                        }
                        (world, entities)
                    },
                    |(mut world, entities)| {
                        for entity in entities {
                            black_box(world.remove::<Velocity>(entity).unwrap());
                        }
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

fn query_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    for count in [1000, 10000, 100_000] {
        group.throughput(Throughput::Elements(count));

        group.bench_with_input(BenchmarkId::new("integrate", count), &count, |b, &count| {
            let (mut world, pos, vel) = setup();
            let entities = spawn_positions(&mut world, pos, count);
            for &entity in &entities {
                world.add_component(entity, vel, None).unwrap();
            }
            let mut query = world.query().write(pos).read(vel).build().unwrap();

            b.iter(|| {
                query
                    .execute(&mut world, |row| {
                        let v: Velocity = row.get(1).unwrap();
                        let mut p: Position = row.get(0).unwrap();
                        p.x += v.x;
                        row.set(0, &p);
                    })
                    .unwrap()
            });
        });

        group.bench_with_input(
            BenchmarkId::new("modified_unchanged", count),
            &count,
            |b, &count| {
                let (mut world, pos, _) = setup();
                spawn_positions(&mut world, pos, count);
                let mut query = world.query().read(pos).modified(pos).build().unwrap();
                query.execute(&mut world, |_| {}).unwrap();

                b.iter(|| black_box(query.execute(&mut world, |_| {}).unwrap()));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    spawn_benchmarks,
    component_access_benchmarks,
    archetype_change_benchmarks,
    query_benchmarks,
);

criterion_main!(benches);
