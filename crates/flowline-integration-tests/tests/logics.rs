//! Cross-cutting logics driving and gating the flow.

use flowline_core::gen::constant;
use flowline_core::logic::{Batch, Demand, Kanban, LogicKind, MaxWip};
use flowline_core::node::source::VariantCreator;
use flowline_core::node::NodeKind;
use flowline_core::sim::Simulation;

fn approx(actual: f64, expected: f64, eps: f64) {
    assert!(
        (actual - expected).abs() <= eps,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn kanban_caps_the_region_wip() {
    let (mut sim, _source, op, sink) = flowline_core::test_utils::source_op_sink(0.0, 5.0);
    let variant = flowline_core::test_utils::only_variant(&sim);

    let mut kanban = Kanban::new();
    kanban.add_variant_limit(variant, 1);
    let logic = sim.add_logic("cards", LogicKind::Kanban(kanban));
    sim.attach_enter_logic(op, logic, None);
    // The card frees when the entity leaves the region through the sink.
    sim.observe_node(sink, logic);

    sim.set_horizon(20.0);
    sim.run();

    // One card: one entity in op+sink at a time, one exit per five
    // seconds, starting at five.
    approx(sim.outputs.last("sink.exits").unwrap(), 4.0, 0.0);
}

#[test]
fn maxwip_caps_total_entities_in_the_area() {
    let mut sim = Simulation::new(5);
    let variant = sim.add_variant("bin", 300, 200, 1);
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(0.0));
    let buffer = sim.add_buffer("staging", 10);
    let op = sim.add_operation("op");
    sim.set_process_time(op, constant(2.0));
    let sink = sim.add_sink("sink");
    sim.connect(source, buffer, 1);
    sim.connect(buffer, op, 1);
    sim.connect(op, sink, 1);

    let logic = sim.add_logic("cap", LogicKind::MaxWip(MaxWip::new(3)));
    sim.attach_enter_logic(buffer, logic, None);
    sim.observe_node(op, logic);

    sim.set_horizon(20.0);
    sim.run();

    let peak = sim.outputs.last("cap.peak_wip").unwrap();
    assert!(peak <= 3.0, "peak WIP {peak} exceeds the cap");
    assert!(sim.outputs.last("sink.exits").unwrap() > 0.0);
}

#[test]
fn batch_releases_groups_of_three() {
    let mut sim = Simulation::new(5);
    let variant = sim.add_variant("bin", 300, 200, 1);
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(1.0));
    if let NodeKind::Source(s) = &mut sim.nodes[source].kind {
        s.limit = Some(6);
    }
    let staging = sim.add_buffer("staging", 10);
    let op = sim.add_operation("op");
    sim.set_process_time(op, constant(0.0));
    let sink = sim.add_sink("sink");
    sim.connect(source, staging, 1);
    sim.connect(staging, op, 1);
    sim.connect(op, sink, 1);

    let mut batch = Batch::new();
    batch.add_batch(variant, 3);
    let logic = sim.add_logic("batcher", LogicKind::Batch(batch));
    sim.attach_enter_logic(op, logic, None);
    sim.observe_node(op, logic);

    sim.set_horizon(10.0);
    sim.run();

    // Arrivals at 0..5; the first batch releases with the third arrival
    // at t=2, the second with the sixth at t=5.
    approx(sim.outputs.last("sink.exits").unwrap(), 6.0, 0.0);
    approx(sim.outputs.last("batcher.started_batches").unwrap(), 2.0, 0.0);
    approx(
        sim.outputs.last("batcher.completed_batches").unwrap(),
        2.0,
        0.0,
    );
}

#[test]
fn shift_calendar_suspends_the_station() {
    let mut sim = Simulation::new(5);
    let variant = sim.add_variant("bin", 300, 200, 1);
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(1.0));
    let op = sim.add_operation("op");
    sim.set_process_time(op, constant(0.0));
    let sink = sim.add_sink("sink");
    sim.connect(source, op, 1);
    sim.connect(op, sink, 1);

    // A five-second micro-shift at the start of every day.
    let calendar = sim.add_calendar("mini");
    let days = [true; 7];
    sim.calendars[calendar].add_shift("mini", 0.0, 5.0, days);
    let op_key = op;
    sim.calendars[calendar].add_node(op_key);

    sim.set_horizon(10.0);
    sim.run();

    // Work passes 0..5; the shift ends at five and the station goes
    // unplanned for the rest of the horizon.
    approx(sim.outputs.last("sink.exits").unwrap(), 5.0, 0.0);
    approx(sim.outputs.last("op.unplanned_time").unwrap(), 5.0, 1e-6);
}

#[test]
fn demand_consumes_stored_entities_and_tracks_backlog() {
    let mut sim = Simulation::new(5);
    let variant = sim.add_variant("bin", 300, 200, 1);
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(4.0));
    let store = sim.add_store("store", 10);
    sim.connect(source, store, 1);

    let mut demand = Demand::new(VariantCreator::Fixed(variant));
    demand.store = Some(store);
    demand.interval = Some(constant(2.0));
    let logic = sim.add_logic("orders", LogicKind::Demand(demand));

    sim.set_horizon(20.0);
    sim.run();

    // Demands every 2 s outpace supply every 4 s; half are served late or
    // not at all.
    let served = sim.outputs.last("orders.served").unwrap();
    let backlog = sim.outputs.last("orders.backlog").unwrap();
    assert!(served >= 4.0, "served {served}");
    assert!(backlog >= 3.0, "backlog {backlog}");
    assert!(sim.outputs.last("orders.tardiness").unwrap() > 0.0);
}

#[test]
fn shifting_bottleneck_finds_the_slow_station() {
    let mut sim = Simulation::new(5);
    let variant = sim.add_variant("bin", 300, 200, 1);
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(1.0));
    let slow = sim.add_operation("slow");
    sim.set_process_time(slow, constant(3.0));
    let mid = sim.add_buffer("mid", 5);
    let fast = sim.add_operation("fast");
    sim.set_process_time(fast, constant(1.0));
    let sink = sim.add_sink("sink");
    sim.connect(source, slow, 1);
    sim.connect(slow, mid, 1);
    sim.connect(mid, fast, 1);
    sim.connect(fast, sink, 1);

    sim.set_shifting_bottleneck_detection(true);
    sim.set_horizon(100.0);
    sim.run();

    let bottleneck = sim.bottleneck().expect("a bottleneck is detected");
    assert_eq!(sim.nodes[bottleneck].name, "slow");
    let total = sim.outputs.last("slow.total_bottleneck").unwrap();
    assert!(total > 50.0, "bottleneck total {total}");
}
