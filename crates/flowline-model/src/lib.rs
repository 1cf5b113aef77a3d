//! Declarative model descriptions.
//!
//! A [`ModelSpec`] is a plain serde-serializable description of a model:
//! variants, nodes, links, logics, calendars, resource pools and the
//! generator specs they reference, all by name. [`build`] validates the
//! description and instantiates a ready-to-run `Simulation`. The spec
//! types round-trip losslessly through serde, so a loaded-then-saved model
//! compares equal.

pub mod schema;

pub use schema::*;

use flowline_core::failure::{FailureType, TimeReference};
use flowline_core::gen::Generator;
use flowline_core::id::{LogicKey, NodeKey, VariantKey};
use flowline_core::logic::{Batch, CriticalWip, Demand, Kanban, LogicKind, MaxWip, Order, Takt};
use flowline_core::node::source::VariantCreator;
use flowline_core::node::{AssemblySpec, NodeKind, PartSpec};
use flowline_core::resource::ResourcePurpose;
use flowline_core::sim::Simulation;
use flowline_gen as gen;
use std::collections::HashMap;
use thiserror::Error;

/// Why a model description cannot be instantiated.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("duplicate name: {0}")]
    DuplicateName(String),
    #[error("unknown variant: {0}")]
    UnknownVariant(String),
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("unknown logic: {0}")]
    UnknownLogic(String),
    #[error("unknown skill: {0}")]
    UnknownSkill(String),
    #[error("invalid configuration: {0}")]
    BadConfig(String),
}

/// Instantiate a simulation from a model description.
pub fn build(spec: &ModelSpec) -> Result<Simulation, BuildError> {
    validate(spec)?;
    let mut sim = Simulation::new(spec.seed);
    sim.set_horizon(spec.horizon);
    sim.set_warmup(spec.warmup);
    sim.set_replications(spec.replications);
    sim.set_shifting_bottleneck_detection(spec.shifting_bottleneck_detection);

    for skill in &spec.skills {
        sim.add_skill(skill.clone());
    }

    let mut variants: HashMap<&str, VariantKey> = HashMap::new();
    for v in &spec.variants {
        let key = sim.add_variant(v.name.clone(), v.length, v.width, v.units);
        variants.insert(v.name.as_str(), key);
    }
    let variant_of = |variants: &HashMap<&str, VariantKey>, name: &str| {
        variants
            .get(name)
            .copied()
            .ok_or_else(|| BuildError::UnknownVariant(name.to_string()))
    };

    // Nodes first, links and logics after, so references resolve in any
    // declaration order.
    let mut nodes: HashMap<&str, NodeKey> = HashMap::new();
    for n in &spec.nodes {
        let key = match &n.kind {
            NodeKindSpec::Source { variant, limit } => {
                let v = variant_of(&variants, variant)?;
                let key = sim.add_fixed_source(n.name.clone(), v);
                if let NodeKind::Source(s) = &mut sim.nodes[key].kind {
                    s.limit = *limit;
                }
                key
            }
            NodeKindSpec::Sink => sim.add_sink(n.name.clone()),
            NodeKindSpec::Buffer { capacity } => sim.add_buffer(n.name.clone(), *capacity),
            NodeKindSpec::Store { capacity } => sim.add_store(n.name.clone(), *capacity),
            NodeKindSpec::Operation => sim.add_operation(n.name.clone()),
            NodeKindSpec::Assembly {
                container,
                parts,
                container_first,
            } => {
                let container = container
                    .as_deref()
                    .map(|name| variant_of(&variants, name))
                    .transpose()?;
                let parts = parts
                    .iter()
                    .map(|p| {
                        Ok(PartSpec {
                            variant: variant_of(&variants, &p.variant)?,
                            count: p.count,
                            delete_on_assemble: p.delete_on_assemble,
                            use_units: false,
                        })
                    })
                    .collect::<Result<Vec<_>, BuildError>>()?;
                sim.add_assembly(
                    n.name.clone(),
                    AssemblySpec { container, parts },
                    *container_first,
                )
            }
            NodeKindSpec::Disassembly { recursive } => {
                sim.add_disassembly(n.name.clone(), *recursive)
            }
            NodeKindSpec::Conveyor {
                length,
                speed,
                accumulating,
            } => {
                let key = sim.add_conveyor(n.name.clone(), *length, *speed);
                if let NodeKind::Conveyor(c) = &mut sim.nodes[key].kind {
                    c.accumulating = *accumulating;
                }
                key
            }
            NodeKindSpec::Facade => sim.add_facade(n.name.clone()),
            NodeKindSpec::Parallel {
                count,
                mixed_processing,
                synchronize_entries,
                synchronize_exits,
                failure_zone,
                entry_timeout,
            } => {
                let key = sim.add_parallel_operation(n.name.clone(), *count);
                {
                    let p = match &mut sim.nodes[key].kind {
                        NodeKind::Parallel(p) => p,
                        _ => unreachable!(),
                    };
                    p.mixed_processing = *mixed_processing;
                    p.synchronize_entries = *synchronize_entries;
                    p.synchronize_exits = *synchronize_exits;
                    p.entry_timeout = entry_timeout.as_ref().map(instantiate);
                }
                if *failure_zone {
                    sim.set_parallel_failure_zone(key, true);
                }
                key
            }
            NodeKindSpec::FailureZone { propagation_steps } => {
                sim.add_failure_zone(n.name.clone(), *propagation_steps)
            }
        };
        if nodes.insert(n.name.as_str(), key).is_some() {
            return Err(BuildError::DuplicateName(n.name.clone()));
        }
        if let Some(g) = &n.process_time {
            sim.set_process_time(key, instantiate(g));
        }
        if let Some(g) = &n.setup_time {
            sim.set_setup_time(key, instantiate(g));
        }
    }
    let node_of = |nodes: &HashMap<&str, NodeKey>, name: &str| {
        nodes
            .get(name)
            .copied()
            .ok_or_else(|| BuildError::UnknownNode(name.to_string()))
    };

    for link in &spec.links {
        let from = node_of(&nodes, &link.from)?;
        let to = node_of(&nodes, &link.to)?;
        sim.connect(from, to, link.weight);
    }

    // Resource pools.
    for m in &spec.managers {
        let manager = sim.add_manager(m.name.clone());
        if let Some(g) = &m.response_time {
            sim.managers[manager].response_time = Some(instantiate(g));
        }
        for r in &m.resources {
            let skills = r
                .skills
                .iter()
                .map(|s| {
                    sim.get_skill_id(s)
                        .ok_or_else(|| BuildError::UnknownSkill(s.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            sim.add_resource(manager, r.name.clone(), skills, r.execution_factor);
        }
        for node in &m.nodes {
            let key = node_of(&nodes, node)?;
            sim.connect_manager(key, manager);
        }
    }
    for n in &spec.nodes {
        let key = nodes[n.name.as_str()];
        for req in &n.requires {
            let skills = req
                .skills
                .iter()
                .map(|s| {
                    sim.get_skill_id(s)
                        .ok_or_else(|| BuildError::UnknownSkill(s.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let purpose = match req.purpose {
                PurposeSpec::Processing => ResourcePurpose::Processing,
                PurposeSpec::Repair => ResourcePurpose::Repair,
                PurposeSpec::Setup => ResourcePurpose::Setup,
            };
            sim.require_skills(key, purpose, req.priority, skills);
        }
    }

    // Logics.
    let mut logics: HashMap<&str, LogicKey> = HashMap::new();
    for l in &spec.logics {
        let (name, kind) = match l {
            LogicSpec::Kanban { name, limits } => {
                let mut kanban = Kanban::new();
                for (variant, limit) in limits {
                    kanban.add_variant_limit(variant_of(&variants, variant)?, *limit);
                }
                (name, LogicKind::Kanban(kanban))
            }
            LogicSpec::MaxWip { name, max } => (name, LogicKind::MaxWip(MaxWip::new(*max))),
            LogicSpec::CriticalWip {
                name,
                percent,
                storage,
            } => {
                let storage = node_of(&nodes, storage)?;
                (name, LogicKind::CriticalWip(CriticalWip::new(*percent, storage)))
            }
            LogicSpec::Order { name, variants: vs } => {
                let mut order = Order::new();
                for v in vs {
                    order.register_variant(variant_of(&variants, v)?);
                }
                (name, LogicKind::Order(order))
            }
            LogicSpec::Takt {
                name,
                takt_time,
                nodes: takt_nodes,
            } => {
                let mut takt = Takt::new(*takt_time);
                for node in takt_nodes {
                    takt.add_node(node_of(&nodes, node)?);
                }
                (name, LogicKind::Takt(takt))
            }
            LogicSpec::Batch {
                name,
                batches,
                start_incomplete,
                incomplete_timeout,
            } => {
                let mut batch = Batch::new();
                for (variant, size) in batches {
                    batch.add_batch(variant_of(&variants, variant)?, *size);
                }
                batch.start_incomplete = *start_incomplete;
                batch.incomplete_timeout = incomplete_timeout.as_ref().map(instantiate);
                (name, LogicKind::Batch(batch))
            }
            LogicSpec::Demand {
                name,
                store,
                variant,
                interval,
                use_units,
                delete_entity,
            } => {
                let mut demand =
                    Demand::new(VariantCreator::Fixed(variant_of(&variants, variant)?));
                demand.store = Some(node_of(&nodes, store)?);
                demand.interval = Some(instantiate(interval));
                demand.use_units = *use_units;
                demand.delete_entity = *delete_entity;
                (name, LogicKind::Demand(demand))
            }
        };
        let key = sim.add_logic(name.clone(), kind);
        if logics.insert(name.as_str(), key).is_some() {
            return Err(BuildError::DuplicateName(name.clone()));
        }
    }

    // Attachments.
    for a in &spec.attachments {
        let node = node_of(&nodes, &a.node)?;
        let logic = logics
            .get(a.logic.as_str())
            .copied()
            .ok_or_else(|| BuildError::UnknownLogic(a.logic.clone()))?;
        let variant = a
            .variant
            .as_deref()
            .map(|v| variant_of(&variants, v))
            .transpose()?;
        match a.role {
            AttachmentRole::Enter => sim.attach_enter_logic(node, logic, variant),
            AttachmentRole::Exit => sim.attach_exit_logic(node, logic),
            AttachmentRole::Observe => sim.observe_node(node, logic),
        }
    }

    // Failures.
    for f in &spec.failures {
        let node = node_of(&nodes, &f.node)?;
        let (ftype, reference) = match &f.kind {
            FailureKindSpec::Percent { availability, mttr } => (
                FailureType::Percent {
                    availability: *availability,
                    mttr: *mttr,
                },
                reference_of(f.reference),
            ),
            FailureKindSpec::Distributions { interval, duration } => {
                let fk_type = FailureType::Distributions;
                let key = sim.add_failure(node, f.name.clone(), fk_type, reference_of(f.reference));
                sim.failures[key].interval = Some(instantiate(interval));
                sim.failures[key].duration = Some(instantiate(duration));
                continue;
            }
            FailureKindSpec::Cycles { interval, duration } => {
                let key = sim.add_failure(
                    node,
                    f.name.clone(),
                    FailureType::Cycles,
                    reference_of(f.reference),
                );
                sim.failures[key].interval = Some(instantiate(interval));
                sim.failures[key].duration = Some(instantiate(duration));
                continue;
            }
        };
        sim.add_failure(node, f.name.clone(), ftype, reference);
    }

    // Calendars.
    for c in &spec.calendars {
        let calendar = sim.add_calendar(c.name.clone());
        for node in &c.nodes {
            let key = node_of(&nodes, node)?;
            sim.calendars[calendar].add_node(key);
        }
        for s in &c.shifts {
            let item =
                sim.calendars[calendar].add_shift(s.name.clone(), s.start, s.end, s.days);
            for b in &s.breaks {
                item.breaks.push(flowline_core::shift::BreakItem {
                    start: b.start,
                    end: b.end,
                });
            }
        }
    }

    Ok(sim)
}

fn reference_of(spec: ReferenceSpec) -> TimeReference {
    match spec {
        ReferenceSpec::Simulation => TimeReference::Simulation,
        ReferenceSpec::Processing => TimeReference::Processing,
        ReferenceSpec::Operational => TimeReference::Operational,
    }
}

/// Instantiate a generator from its spec.
pub fn instantiate(spec: &GenSpec) -> Generator {
    match spec {
        GenSpec::Constant { value } => Box::new(gen::Constant(*value)),
        GenSpec::Uniform { min, max } => Box::new(gen::UniformGen::new(*min, *max)),
        GenSpec::Exponential { mean } => Box::new(gen::Exponential::new(*mean)),
        GenSpec::Normal { mean, std_dev } => Box::new(gen::NormalGen::new(*mean, *std_dev)),
        GenSpec::Triangle { min, mode, max } => Box::new(gen::Triangle::new(*min, *mode, *max)),
        GenSpec::Erlang { k, rate } => Box::new(gen::Erlang::new(*k, *rate)),
        GenSpec::Weibull { scale, shape } => Box::new(gen::WeibullGen::new(*scale, *shape)),
        GenSpec::Sequence { values } => Box::new(gen::Sequence::new(values.clone())),
    }
}

/// Reject contradictory or impossible configurations before building.
fn validate(spec: &ModelSpec) -> Result<(), BuildError> {
    if spec.horizon <= 0.0 {
        return Err(BuildError::BadConfig("horizon must be positive".into()));
    }
    if spec.warmup < 0.0 || spec.warmup > spec.horizon {
        return Err(BuildError::BadConfig(
            "warmup must lie within the horizon".into(),
        ));
    }
    for n in &spec.nodes {
        match &n.kind {
            NodeKindSpec::Source { .. } => {
                // A source's process time is its creation interval; without
                // one it would create unboundedly at time zero.
                if n.process_time.is_none() {
                    return Err(BuildError::BadConfig(format!(
                        "source '{}' has no creation interval",
                        n.name
                    )));
                }
            }
            NodeKindSpec::Buffer { capacity } | NodeKindSpec::Store { capacity } => {
                if *capacity == 0 {
                    return Err(BuildError::BadConfig(format!(
                        "'{}' has zero capacity",
                        n.name
                    )));
                }
            }
            NodeKindSpec::Conveyor { length, speed, .. } => {
                if *length <= 0.0 || *speed <= 0.0 {
                    return Err(BuildError::BadConfig(format!(
                        "'{}' needs positive length and speed",
                        n.name
                    )));
                }
            }
            NodeKindSpec::Parallel {
                count,
                synchronize_entries,
                entry_timeout,
                ..
            } => {
                if *count == 0 {
                    return Err(BuildError::BadConfig(format!(
                        "'{}' has no internal operations",
                        n.name
                    )));
                }
                if *synchronize_entries && entry_timeout.is_none() {
                    return Err(BuildError::BadConfig(format!(
                        "'{}' synchronizes entries but has no entry timeout",
                        n.name
                    )));
                }
            }
            NodeKindSpec::Assembly { parts, .. } => {
                if parts.is_empty() {
                    return Err(BuildError::BadConfig(format!(
                        "'{}' assembles nothing",
                        n.name
                    )));
                }
            }
            _ => {}
        }
    }
    for f in &spec.failures {
        if let FailureKindSpec::Percent { availability, .. } = &f.kind {
            if !(*availability > 0.0 && *availability <= 1.0) {
                return Err(BuildError::BadConfig(format!(
                    "failure '{}' needs availability in (0, 1]",
                    f.name
                )));
            }
        }
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_spec() -> ModelSpec {
        ModelSpec {
            name: "line".into(),
            seed: 7,
            horizon: 10.0,
            warmup: 0.0,
            replications: 1,
            shifting_bottleneck_detection: false,
            skills: vec![],
            variants: vec![VariantSpec {
                name: "plate".into(),
                length: 400,
                width: 300,
                units: 1,
            }],
            nodes: vec![
                NodeSpec {
                    name: "source".into(),
                    kind: NodeKindSpec::Source {
                        variant: "plate".into(),
                        limit: Some(10),
                    },
                    process_time: Some(GenSpec::Constant { value: 1.0 }),
                    setup_time: None,
                    requires: vec![],
                },
                NodeSpec {
                    name: "buffer".into(),
                    kind: NodeKindSpec::Buffer { capacity: 2 },
                    process_time: None,
                    setup_time: None,
                    requires: vec![],
                },
                NodeSpec {
                    name: "sink".into(),
                    kind: NodeKindSpec::Sink,
                    process_time: None,
                    setup_time: None,
                    requires: vec![],
                },
            ],
            links: vec![
                LinkSpec {
                    from: "source".into(),
                    to: "buffer".into(),
                    weight: 1,
                },
                LinkSpec {
                    from: "buffer".into(),
                    to: "sink".into(),
                    weight: 1,
                },
            ],
            logics: vec![],
            attachments: vec![],
            failures: vec![],
            calendars: vec![],
            managers: vec![],
        }
    }

    #[test]
    fn builds_and_runs_a_minimal_line() {
        let mut sim = build(&minimal_spec()).unwrap();
        sim.run();
        assert_eq!(sim.outputs.last("sink.exits"), Some(10.0));
    }

    #[test]
    fn unknown_references_are_rejected() {
        let mut spec = minimal_spec();
        spec.links.push(LinkSpec {
            from: "buffer".into(),
            to: "nowhere".into(),
            weight: 1,
        });
        assert!(matches!(build(&spec), Err(BuildError::UnknownNode(_))));
    }

    #[test]
    fn zero_capacity_is_a_build_error() {
        let mut spec = minimal_spec();
        spec.nodes[1].kind = NodeKindSpec::Buffer { capacity: 0 };
        assert!(matches!(build(&spec), Err(BuildError::BadConfig(_))));
    }

    #[test]
    fn bad_availability_is_a_build_error() {
        let mut spec = minimal_spec();
        spec.failures.push(FailureSpec {
            name: "wear".into(),
            node: "buffer".into(),
            reference: ReferenceSpec::Simulation,
            kind: FailureKindSpec::Percent {
                availability: 1.5,
                mttr: 10.0,
            },
        });
        assert!(matches!(build(&spec), Err(BuildError::BadConfig(_))));
    }
}
