//! Shared builders for tests.
//!
//! Small line models wired the way most tests need them: a variant, a
//! source with a constant creation interval, some middle nodes and a sink.

use crate::gen::constant;
use crate::id::{NodeKey, VariantKey};
use crate::node::source::VariantCreator;
use crate::sim::Simulation;

/// A simulation with one variant registered.
pub fn sim_with_variant() -> (Simulation, VariantKey) {
    let mut sim = Simulation::new(42);
    let variant = sim.add_variant("part", 400, 300, 1);
    (sim, variant)
}

/// Source(interval) -> Sink. Returns (sim, source, sink).
pub fn source_sink(interval: f64) -> (Simulation, NodeKey, NodeKey) {
    let (mut sim, variant) = sim_with_variant();
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(interval));
    let sink = sim.add_sink("sink");
    sim.connect(source, sink, 1);
    (sim, source, sink)
}

/// Source(interval) -> Operation(process) -> Sink.
/// Returns (sim, source, operation, sink).
pub fn source_op_sink(interval: f64, process: f64) -> (Simulation, NodeKey, NodeKey, NodeKey) {
    let (mut sim, variant) = sim_with_variant();
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(interval));
    let op = sim.add_operation("op");
    sim.set_process_time(op, constant(process));
    let sink = sim.add_sink("sink");
    sim.connect(source, op, 1);
    sim.connect(op, sink, 1);
    (sim, source, op, sink)
}

/// Source(interval) -> Buffer(capacity) -> Sink.
/// Returns (sim, source, buffer, sink).
pub fn source_buffer_sink(
    interval: f64,
    capacity: usize,
) -> (Simulation, NodeKey, NodeKey, NodeKey) {
    let (mut sim, variant) = sim_with_variant();
    let source = sim.add_source("source", VariantCreator::Fixed(variant));
    sim.set_process_time(source, constant(interval));
    let buffer = sim.add_buffer("buffer", capacity);
    let sink = sim.add_sink("sink");
    sim.connect(source, buffer, 1);
    sim.connect(buffer, sink, 1);
    (sim, source, buffer, sink)
}

/// The registered variant of a one-variant simulation.
pub fn only_variant(sim: &Simulation) -> VariantKey {
    sim.variants.keys().next().expect("a variant is registered")
}
