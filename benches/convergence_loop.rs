use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use trapline::domain::models::{tracking_guards, Config, LoopParams, Signal};
use trapline::infrastructure::simulator::SimInstrument;
use trapline::services::{ConvergenceLoop, GuardCheck};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn distance_move(target: f64) {
    let config = Config::default();
    let sim = SimInstrument::new(&config);
    sim.inspect(|s| s.load_beads(0)).await;
    let handles = sim.handles().await;
    let guard = GuardCheck::new(handles.telemetry.clone(), Duration::from_millis(300));
    let servo = ConvergenceLoop::new(handles.trap, handles.telemetry, handles.clock, guard);
    let params = LoopParams::new("goto_distance", Signal::Distance, target)
        .with_tolerance(0.2)
        .with_step(0.1)
        .with_poll_interval(Duration::from_millis(50))
        .with_budget(1_000);
    let report = servo.run(&params, &tracking_guards(2, 60.0)).await.unwrap();
    assert!(report.converged());
}

fn bench_distance_loop(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("goto_distance");
    for travel in [1.0f64, 4.0, 8.0] {
        group.bench_with_input(BenchmarkId::from_parameter(travel), &travel, |b, &travel| {
            b.to_async(&rt).iter(|| distance_move(12.0 + travel));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_distance_loop);
criterion_main!(benches);
