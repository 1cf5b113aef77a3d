//! End-to-end line models driven through the public kernel interface.

use flowline_core::failure::{FailureType, TimeReference};
use flowline_core::gen::constant;
use flowline_core::logic::{LogicKind, Takt};
use flowline_core::node::{AssemblySpec, NodeKind, PartSpec};
use flowline_core::node::source::VariantCreator;
use flowline_core::resource::ResourcePurpose;
use flowline_core::sim::Simulation;
use flowline_core::time::TOLERANCE;

fn approx(actual: f64, expected: f64, eps: f64) {
    assert!(
        (actual - expected).abs() <= eps,
        "expected {expected}, got {actual}"
    );
}

// ---------------------------------------------------------------------------
// Source -> Buffer -> Sink
// ---------------------------------------------------------------------------

#[test]
fn buffer_line_passes_ten_entities() {
    let mut sim = Simulation::new(7);
    let variant = sim.add_variant("plate", 400, 300, 1);
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(1.0));
    if let NodeKind::Source(s) = &mut sim.nodes[source].kind {
        s.limit = Some(10);
    }
    let buffer = sim.add_buffer("buffer", 2);
    let sink = sim.add_sink("sink");
    sim.connect(source, buffer, 1);
    sim.connect(buffer, sink, 1);
    sim.set_horizon(10.0);
    sim.run();

    approx(sim.outputs.last("sink.exits").unwrap(), 10.0, 0.0);
    assert!(sim.outputs.last("buffer.max_occupation").unwrap() <= 2.0);
    approx(sim.outputs.last("buffer.throughput").unwrap(), 1.0, 1e-9);
    approx(sim.outputs.last("plate.exits").unwrap(), 10.0, 0.0);
}

// ---------------------------------------------------------------------------
// Source -> Operation -> Sink, no buffer
// ---------------------------------------------------------------------------

#[test]
fn unbuffered_operation_line_throttles_the_source() {
    let mut sim = Simulation::new(7);
    let variant = sim.add_variant("plate", 400, 300, 1);
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(1.0));
    let op = sim.add_operation("op");
    sim.set_process_time(op, constant(3.0));
    let sink = sim.add_sink("sink");
    sim.connect(source, op, 1);
    sim.connect(op, sink, 1);
    sim.set_horizon(30.0);
    sim.run();

    approx(sim.outputs.last("sink.exits").unwrap(), 10.0, 0.0);
    // The operation never starves once primed.
    approx(sim.outputs.last("op.working_time").unwrap(), 30.0, 1e-6);
    // The source spends two thirds of its time blocked in steady state.
    assert!(sim.outputs.last("source.blocked_time").unwrap() > 15.0);
}

#[test]
fn state_times_sum_to_the_elapsed_window() {
    let mut sim = Simulation::new(7);
    let variant = sim.add_variant("plate", 400, 300, 1);
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(1.0));
    let op = sim.add_operation("op");
    sim.set_process_time(op, constant(3.0));
    let sink = sim.add_sink("sink");
    sim.connect(source, op, 1);
    sim.connect(op, sink, 1);
    sim.set_horizon(30.0);
    sim.run();

    for (_, node) in sim.nodes.iter() {
        let sum = node.base.state_time_sum();
        assert!(
            (sum - 30.0).abs() < TOLERANCE * 100.0,
            "state times of '{}' sum to {sum}, expected 30",
            node.name
        );
    }
}

// ---------------------------------------------------------------------------
// Takt across two operations
// ---------------------------------------------------------------------------

#[test]
fn takt_records_exceed_and_deceed_time() {
    let mut sim = Simulation::new(7);
    let variant = sim.add_variant("plate", 400, 300, 1);
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(0.0));
    let op_a = sim.add_operation("op_a");
    sim.set_process_time(op_a, constant(3.0));
    let op_b = sim.add_operation("op_b");
    sim.set_process_time(op_b, constant(7.0));
    let sink = sim.add_sink("sink");
    sim.connect(source, op_a, 1);
    sim.connect(op_a, op_b, 1);
    sim.connect(op_b, sink, 1);

    let mut takt = Takt::new(5.0);
    takt.add_node(op_a);
    takt.add_node(op_b);
    let logic = sim.add_logic("takt", LogicKind::Takt(takt));
    sim.attach_exit_logic(op_a, logic);
    sim.attach_exit_logic(op_b, logic);

    sim.set_horizon(26.0);
    sim.run();

    // First period completes early (the line is still filling); every
    // later period overruns by op_b's two extra seconds.
    approx(sim.outputs.last("takt.deceed_time").unwrap(), 2.0, 1e-6);
    approx(sim.outputs.last("takt.exceed_time").unwrap(), 6.0, 1e-6);
}

// ---------------------------------------------------------------------------
// Assembly with container-first starvation
// ---------------------------------------------------------------------------

#[test]
fn assembly_waits_for_its_container() {
    let mut sim = Simulation::new(7);
    let container = sim.add_variant("carrier", 800, 600, 1);
    let part = sim.add_variant("bolt", 20, 20, 1);

    let part_source = sim.add_source("bolts", VariantCreator::Fixed(part));
    sim.set_process_time(part_source, constant(1.0));
    if let NodeKind::Source(s) = &mut sim.nodes[part_source].kind {
        s.limit = Some(2);
    }
    let container_source = sim.add_source("carriers", VariantCreator::Fixed(container));
    sim.set_process_time(container_source, constant(1.0));
    if let NodeKind::Source(s) = &mut sim.nodes[container_source].kind {
        s.limit = Some(1);
        s.start_gen = Some(constant(5.0));
    }

    let asm = sim.add_assembly(
        "asm",
        AssemblySpec {
            container: Some(container),
            parts: vec![PartSpec {
                variant: part,
                count: 2,
                delete_on_assemble: false,
                use_units: false,
            }],
        },
        true,
    );
    let sink = sim.add_sink("sink");
    sim.connect(part_source, asm, 1);
    sim.connect(container_source, asm, 1);
    sim.connect(asm, sink, 1);

    sim.set_horizon(20.0);
    sim.run();

    // Two bolts wait until the carrier arrives at t=5; one composite
    // leaves, carrying both parts.
    approx(sim.outputs.last("asm.entries").unwrap(), 3.0, 0.0);
    approx(sim.outputs.last("sink.exits").unwrap(), 1.0, 0.0);
    approx(sim.outputs.last("carrier.exits").unwrap(), 1.0, 0.0);
    approx(sim.outputs.last("bolt.exits").unwrap(), 0.0, 0.0);
}

// ---------------------------------------------------------------------------
// Percent failure availability
// ---------------------------------------------------------------------------

#[test]
fn percent_failure_meets_its_availability() {
    let mut sim = Simulation::new(11);
    let variant = sim.add_variant("plate", 400, 300, 1);
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(0.0));
    let op = sim.add_operation("op");
    sim.set_process_time(op, constant(10.0));
    let sink = sim.add_sink("sink");
    sim.connect(source, op, 1);
    sim.connect(op, sink, 1);
    let fk = sim.add_failure(
        op,
        "wear",
        FailureType::Percent {
            availability: 0.9,
            mttr: 60.0,
        },
        TimeReference::Simulation,
    );

    let horizon = 500_000.0;
    sim.set_horizon(horizon);
    sim.run();

    let failed = sim.outputs.last("op.failed_time").unwrap();
    let fraction = failed / horizon;
    assert!(
        (fraction - 0.1).abs() < 0.01,
        "failed fraction {fraction}, expected about 0.1"
    );
    let activations = sim.failures[fk].activations as f64;
    assert!(activations > 100.0, "too few disruptions: {activations}");
    let mean_duration = failed / activations;
    assert!(
        (mean_duration - 60.0).abs() / 60.0 < 0.1,
        "mean repair {mean_duration}, expected about 60"
    );
}

// ---------------------------------------------------------------------------
// Resource response times
// ---------------------------------------------------------------------------

#[test]
fn resource_response_time_delays_processing() {
    let mut sim = Simulation::new(7);
    let variant = sim.add_variant("frame", 400, 300, 1);
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(0.0));
    if let NodeKind::Source(s) = &mut sim.nodes[source].kind {
        s.limit = Some(2);
    }
    let op = sim.add_operation("weld_station");
    sim.set_process_time(op, constant(5.0));
    let sink = sim.add_sink("sink");
    sim.connect(source, op, 1);
    sim.connect(op, sink, 1);

    let weld = sim.add_skill("weld");
    let manager = sim.add_manager("crew");
    sim.managers[manager].response_time = Some(constant(2.0));
    sim.add_resource(manager, "welder", vec![weld], 1.0);
    sim.connect_manager(op, manager);
    sim.require_skills(op, ResourcePurpose::Processing, 0, vec![weld]);

    sim.set_horizon(20.0);
    sim.run();

    // First entity: request at 0, ready at 2, out at 7. Second: request
    // at 7, ready at 9, out at 14.
    approx(sim.outputs.last("sink.exits").unwrap(), 2.0, 0.0);
    approx(
        sim.outputs.last("weld_station.cycle_time").unwrap(),
        7.0,
        1e-6,
    );
    approx(
        sim.outputs.last("crew.welder.utilization").unwrap(),
        14.0 / 20.0,
        1e-6,
    );
}

// ---------------------------------------------------------------------------
// Determinism and warmup
// ---------------------------------------------------------------------------

#[test]
fn identical_seeds_reproduce_identical_outputs() {
    let run = || {
        let mut sim = Simulation::new(99);
        let variant = sim.add_variant("plate", 400, 300, 1);
        let source = sim.add_source("source", VariantCreator::Fixed(variant));
        sim.set_process_time(source, constant(1.0));
        let op = sim.add_operation("op");
        sim.set_process_time(op, constant(3.0));
        let sink = sim.add_sink("sink");
        sim.connect(source, op, 1);
        sim.connect(op, sink, 1);
        let _ = sim.add_failure(
            op,
            "wear",
            FailureType::Percent {
                availability: 0.8,
                mttr: 10.0,
            },
            TimeReference::Simulation,
        );
        sim.set_horizon(1000.0);
        sim.run();
        (
            sim.outputs.last("sink.exits").unwrap(),
            sim.outputs.last("op.failed_time").unwrap(),
        )
    };
    assert_eq!(run(), run());
}

#[test]
fn warmup_reset_discards_prior_statistics() {
    let mut sim = Simulation::new(7);
    let variant = sim.add_variant("plate", 400, 300, 1);
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(1.0));
    if let NodeKind::Source(s) = &mut sim.nodes[source].kind {
        s.limit = Some(10);
    }
    let sink = sim.add_sink("sink");
    sim.connect(source, sink, 1);
    sim.set_horizon(10.0);
    sim.set_warmup(10.0);
    sim.run();

    // Everything happened during warmup; the measured window is empty.
    approx(sim.outputs.last("sink.exits").unwrap(), 0.0, 0.0);
}

// ---------------------------------------------------------------------------
// Replications
// ---------------------------------------------------------------------------

#[test]
fn replications_produce_one_output_value_each() {
    let mut sim = Simulation::new(7);
    let variant = sim.add_variant("plate", 400, 300, 1);
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(1.0));
    let sink = sim.add_sink("sink");
    sim.connect(source, sink, 1);
    sim.set_horizon(50.0);
    sim.set_replications(3);
    sim.run();

    let exits = sim.outputs.get("sink.exits").unwrap();
    assert_eq!(exits.len(), 3);
    assert!(exits.iter().all(|&e| e == exits[0]));
}
