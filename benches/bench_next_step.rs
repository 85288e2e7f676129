// benches/bench_next_step.rs
use criterion::{black_box, criterion_group, criterion_main, AxisScale, Criterion, PlotConfiguration};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use taxi_dispatch::simulation_engine::cell::Cell;
use taxi_dispatch::simulation_engine::grid::RoadNetwork;
use taxi_dispatch::simulation_engine::map_loader::MapLayout;
use taxi_dispatch::simulation_engine::route_generation::Router;

fn create_router(size: usize) -> Router {
    let mut rng = SmallRng::seed_from_u64(size as u64);
    let layout = MapLayout::generate(size, size, &mut rng);
    let network = RoadNetwork::from_layout(&layout).expect("generated maps are connected");
    Router::new(Arc::new(network))
}

fn bench_next_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_step");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));
    group.warm_up_time(Duration::from_secs(2));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    // 80x80 is the default city size.
    for &size in [20, 40, 80].iter() {
        group.bench_function(format!("grid_{}", size), |b| {
            let router = create_router(size);
            let mut rng = SmallRng::seed_from_u64(7);
            let n = size as i32;
            b.iter(|| {
                let cur = Cell::new(rng.random_range(0..n), rng.random_range(0..n));
                let dest = Cell::new(rng.random_range(0..n), rng.random_range(0..n));
                if cur != dest {
                    black_box(router.next_step(cur, dest, &mut rng).ok());
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_next_step);
criterion_main!(benches);
