//! Conveyor transport and parallel-operation cells, end to end.

use flowline_core::gen::constant;
use flowline_core::node::source::VariantCreator;
use flowline_core::node::NodeKind;
use flowline_core::sim::Simulation;
use flowline_gen::Sequence;

fn approx(actual: f64, expected: f64, eps: f64) {
    assert!(
        (actual - expected).abs() <= eps,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn conveyor_transit_time_is_length_over_speed() {
    let mut sim = Simulation::new(3);
    // 200 mm long entities on a 1000 mm belt at 100 mm/s.
    let variant = sim.add_variant("tote", 200, 150, 1);
    let source = sim.add_source("inlet", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(10.0));
    if let NodeKind::Source(s) = &mut sim.nodes[source].kind {
        s.limit = Some(1);
    }
    let belt = sim.add_conveyor("belt", 1000.0, 100.0);
    let sink = sim.add_sink("outlet");
    sim.connect(source, belt, 1);
    sim.connect(belt, sink, 1);
    sim.set_horizon(20.0);
    sim.run();

    approx(sim.outputs.last("outlet.exits").unwrap(), 1.0, 0.0);
    // Entering occupies the first 200 mm; the head travels the remaining
    // 800 mm in 8 seconds.
    approx(sim.outputs.last("belt.cycle_time").unwrap(), 8.0, 1e-6);
}

#[test]
fn blocked_conveyor_head_waits_for_the_station() {
    let mut sim = Simulation::new(3);
    let variant = sim.add_variant("tote", 200, 150, 1);
    let source = sim.add_source("inlet", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(1.0));
    if let NodeKind::Source(s) = &mut sim.nodes[source].kind {
        s.limit = Some(2);
    }
    let belt = sim.add_conveyor("belt", 1000.0, 100.0);
    let station = sim.add_operation("station");
    sim.set_process_time(station, constant(30.0));
    let sink = sim.add_sink("outlet");
    sim.connect(source, belt, 1);
    sim.connect(belt, station, 1);
    sim.connect(station, sink, 1);
    sim.set_horizon(80.0);
    sim.run();

    // First tote: on the belt 0..8, station 8..38. Second: front at 9,
    // blocked until 38, station 38..68.
    approx(sim.outputs.last("outlet.exits").unwrap(), 2.0, 0.0);
    let blocked = sim.outputs.last("belt.blocked_time").unwrap();
    assert!(blocked > 20.0, "belt blocked for {blocked}, expected ~29");
}

#[test]
fn parallel_cell_processes_concurrently() {
    let mut sim = Simulation::new(3);
    let variant = sim.add_variant("frame", 400, 300, 1);
    let source = sim.add_source("inlet", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(0.0));
    let cell = sim.add_parallel_operation("cell", 2);
    sim.set_process_time(cell, constant(10.0));
    let sink = sim.add_sink("outlet");
    sim.connect(source, cell, 1);
    sim.connect(cell, sink, 1);
    sim.set_horizon(30.0);
    sim.run();

    // Two frames per ten-second wave.
    approx(sim.outputs.last("outlet.exits").unwrap(), 6.0, 0.0);
}

#[test]
fn synchronized_exits_release_together() {
    let mut sim = Simulation::new(3);
    let variant = sim.add_variant("frame", 400, 300, 1);
    let source = sim.add_source("inlet", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(0.0));
    if let NodeKind::Source(s) = &mut sim.nodes[source].kind {
        s.limit = Some(2);
    }
    let cell = sim.add_parallel_operation("cell", 2);
    // The two stations draw different processing times.
    sim.set_process_time(cell, Box::new(Sequence::new(vec![5.0, 9.0])));
    if let NodeKind::Parallel(p) = &mut sim.nodes[cell].kind {
        p.synchronize_exits = true;
    }
    let sink = sim.add_sink("outlet");
    sim.connect(source, cell, 1);
    sim.connect(cell, sink, 1);
    sim.set_horizon(9.0);
    sim.run();

    // The faster station finishes at 5 but holds until its sibling is
    // done at 9; both leave at the same instant.
    approx(sim.outputs.last("outlet.exits").unwrap(), 2.0, 0.0);
    approx(sim.outputs.last("cell[0].blocked_time").unwrap(), 4.0, 1e-6);
}

#[test]
fn disassembly_splits_a_composite() {
    let mut sim = Simulation::new(3);
    let carrier = sim.add_variant("carrier", 800, 600, 1);
    let bolt = sim.add_variant("bolt", 20, 20, 1);

    let carriers = sim.add_source("carriers", VariantCreator::Fixed(carrier));
    sim.set_process_time(carriers, constant(1.0));
    if let NodeKind::Source(s) = &mut sim.nodes[carriers].kind {
        s.limit = Some(1);
    }
    let bolts = sim.add_source("bolts", VariantCreator::Fixed(bolt));
    sim.set_process_time(bolts, constant(1.0));
    if let NodeKind::Source(s) = &mut sim.nodes[bolts].kind {
        s.limit = Some(1);
    }

    let asm = sim.add_assembly(
        "asm",
        flowline_core::node::AssemblySpec {
            container: Some(carrier),
            parts: vec![flowline_core::node::PartSpec {
                variant: bolt,
                count: 1,
                delete_on_assemble: false,
                use_units: false,
            }],
        },
        false,
    );
    let split = sim.add_disassembly("split", false);
    let sink = sim.add_sink("sink");
    sim.connect(carriers, asm, 1);
    sim.connect(bolts, asm, 1);
    sim.connect(asm, split, 1);
    sim.connect(split, sink, 1);

    sim.set_horizon(10.0);
    sim.run();

    // The composite enters the disassembly as one entity; carrier and
    // bolt leave it separately.
    approx(sim.outputs.last("split.entries").unwrap(), 1.0, 0.0);
    approx(sim.outputs.last("sink.exits").unwrap(), 2.0, 0.0);
    approx(sim.outputs.last("carrier.exits").unwrap(), 1.0, 0.0);
    approx(sim.outputs.last("bolt.exits").unwrap(), 1.0, 0.0);
}
