// benches/bench_must_wait.rs
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::time::Duration;
use taxi_dispatch::control_system::traffic_light_controller::TrafficLightController;
use taxi_dispatch::simulation_engine::cell::{Cell, Direction};
use taxi_dispatch::simulation_engine::grid::RoadNetwork;
use taxi_dispatch::simulation_engine::map_loader::MapLayout;

fn bench_must_wait(c: &mut Criterion) {
    let network = RoadNetwork::from_layout(&MapLayout::fully_connected(80, 80))
        .expect("full grid is connected");
    let mut rng = SmallRng::seed_from_u64(1);
    let lights = TrafficLightController::initialize(&network, Duration::from_millis(300), &mut rng);

    // every (from, to) pair through one signaled crossing
    let centre = Cell::new(40, 40);
    let moves: Vec<(Cell, Cell)> = Direction::ALL
        .iter()
        .flat_map(|&from| Direction::ALL.iter().map(move |&to| (centre.step(from), centre.step(to))))
        .collect();

    let mut group = c.benchmark_group("must_wait");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("all_moves", |b| {
        b.iter(|| {
            for &(prev, next) in &moves {
                black_box(lights.must_wait(prev, centre, next));
            }
        });
    });
    group.bench_function("flip", |b| {
        b.iter(|| lights.flip());
    });
    group.finish();
}

criterion_group!(benches, bench_must_wait);
criterion_main!(benches);
