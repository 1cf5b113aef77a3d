use criterion::{criterion_group, criterion_main, Criterion};
use flowline_core::gen::constant;
use flowline_core::node::source::VariantCreator;
use flowline_core::sim::Simulation;

/// A saturated five-station line, the bread-and-butter workload: every
/// entity crosses four block/unblock boundaries.
fn line_simulation(horizon: f64) -> Simulation {
    let mut sim = Simulation::new(1);
    let variant = sim.add_variant("part", 400, 300, 1);
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(1.0));
    let mut prev = source;
    for i in 0..5 {
        let op = sim.add_operation(format!("op{i}"));
        sim.set_process_time(op, constant(1.5));
        sim.connect(prev, op, 1);
        prev = op;
    }
    let sink = sim.add_sink("sink");
    sim.connect(prev, sink, 1);
    sim.set_horizon(horizon);
    sim
}

fn bench_line(c: &mut Criterion) {
    c.bench_function("line_10k_seconds", |b| {
        b.iter(|| {
            let mut sim = line_simulation(10_000.0);
            sim.run();
            sim.outputs.last("sink.exits")
        })
    });
}

criterion_group!(benches, bench_line);
criterion_main!(benches);
