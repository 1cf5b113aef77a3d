//! Model descriptions round-trip losslessly through serde.

use flowline_model::*;

fn full_spec() -> ModelSpec {
    ModelSpec {
        name: "paint line".into(),
        seed: 42,
        horizon: 3600.0,
        warmup: 600.0,
        replications: 5,
        shifting_bottleneck_detection: true,
        skills: vec!["weld".into(), "paint".into()],
        variants: vec![
            VariantSpec {
                name: "body".into(),
                length: 4200,
                width: 1800,
                units: 1,
            },
            VariantSpec {
                name: "door".into(),
                length: 1200,
                width: 900,
                units: 1,
            },
        ],
        nodes: vec![
            NodeSpec {
                name: "press".into(),
                kind: NodeKindSpec::Source {
                    variant: "body".into(),
                    limit: None,
                },
                process_time: Some(GenSpec::Exponential { mean: 90.0 }),
                setup_time: None,
                requires: vec![],
            },
            NodeSpec {
                name: "weld_cell".into(),
                kind: NodeKindSpec::Parallel {
                    count: 3,
                    mixed_processing: false,
                    synchronize_entries: true,
                    synchronize_exits: true,
                    failure_zone: true,
                    entry_timeout: Some(GenSpec::Constant { value: 120.0 }),
                },
                process_time: Some(GenSpec::Triangle {
                    min: 60.0,
                    mode: 80.0,
                    max: 120.0,
                }),
                setup_time: Some(GenSpec::Constant { value: 30.0 }),
                requires: vec![SkillRequirementSpec {
                    purpose: PurposeSpec::Processing,
                    skills: vec!["weld".into()],
                    priority: 0,
                }],
            },
            NodeSpec {
                name: "belt".into(),
                kind: NodeKindSpec::Conveyor {
                    length: 12_000.0,
                    speed: 250.0,
                    accumulating: true,
                },
                process_time: None,
                setup_time: None,
                requires: vec![],
            },
            NodeSpec {
                name: "dispatch".into(),
                kind: NodeKindSpec::Sink,
                process_time: None,
                setup_time: None,
                requires: vec![],
            },
        ],
        links: vec![
            LinkSpec {
                from: "press".into(),
                to: "weld_cell".into(),
                weight: 1,
            },
            LinkSpec {
                from: "weld_cell".into(),
                to: "belt".into(),
                weight: 1,
            },
            LinkSpec {
                from: "belt".into(),
                to: "dispatch".into(),
                weight: 1,
            },
        ],
        logics: vec![LogicSpec::Kanban {
            name: "body cards".into(),
            limits: vec![("body".into(), 6)],
        }],
        attachments: vec![AttachmentSpec {
            node: "weld_cell".into(),
            logic: "body cards".into(),
            role: AttachmentRole::Enter,
            variant: Some("body".into()),
        }],
        failures: vec![FailureSpec {
            name: "torch wear".into(),
            node: "weld_cell".into(),
            reference: ReferenceSpec::Processing,
            kind: FailureKindSpec::Percent {
                availability: 0.92,
                mttr: 300.0,
            },
        }],
        calendars: vec![CalendarSpec {
            name: "two shifts".into(),
            nodes: vec!["weld_cell".into()],
            shifts: vec![ShiftSpec {
                name: "early".into(),
                start: 6.0 * 3600.0,
                end: 14.0 * 3600.0,
                days: [true, true, true, true, true, false, false],
                breaks: vec![BreakSpec {
                    start: 9.0 * 3600.0,
                    end: 9.25 * 3600.0,
                }],
            }],
        }],
        managers: vec![ManagerSpec {
            name: "welders".into(),
            response_time: Some(GenSpec::Constant { value: 15.0 }),
            resources: vec![ResourceSpec {
                name: "senior".into(),
                skills: vec!["weld".into()],
                execution_factor: 0.8,
            }],
            nodes: vec!["weld_cell".into()],
        }],
    }
}

#[test]
fn json_round_trip_is_lossless() {
    let spec = full_spec();
    let json = serde_json::to_string_pretty(&spec).unwrap();
    let restored: ModelSpec = serde_json::from_str(&json).unwrap();
    assert_eq!(spec, restored);

    // Saving the restored description again yields identical text.
    let json2 = serde_json::to_string_pretty(&restored).unwrap();
    assert_eq!(json, json2);
}

#[test]
fn defaults_fill_omitted_fields() {
    let json = r#"{
        "name": "tiny",
        "seed": 1,
        "horizon": 100.0,
        "variants": [{"name": "p", "length": 10, "width": 10}],
        "nodes": [
            {
                "name": "in",
                "kind": {"kind": "source", "variant": "p"},
                "process_time": {"family": "constant", "value": 5.0}
            },
            {"name": "out", "kind": {"kind": "sink"}}
        ],
        "links": [{"from": "in", "to": "out"}]
    }"#;
    let spec: ModelSpec = serde_json::from_str(json).unwrap();
    assert_eq!(spec.replications, 1);
    assert_eq!(spec.links[0].weight, 1);
    assert_eq!(spec.variants[0].units, 1);

    let mut sim = flowline_model::build(&spec).unwrap();
    sim.run();
    assert!(sim.outputs.last("out.exits").unwrap() > 0.0);
}

#[test]
fn built_model_runs_from_description() {
    let mut spec = full_spec();
    // A deterministic and quick variant of the full model.
    spec.replications = 1;
    spec.horizon = 1000.0;
    spec.warmup = 0.0;
    spec.calendars.clear();
    spec.failures.clear();
    let mut sim = flowline_model::build(&spec).unwrap();
    sim.run();
    assert!(sim.outputs.last("press.exits").is_some());
}
