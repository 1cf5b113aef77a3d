//! The serializable model description types.
//!
//! Everything references other objects by name, so a description is fully
//! self-contained and order-independent. The types derive `PartialEq`
//! alongside serde so round-trip tests can compare loaded and saved
//! descriptions structurally.

use serde::{Deserialize, Serialize};

/// A complete model description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub seed: u64,
    pub horizon: f64,
    #[serde(default)]
    pub warmup: f64,
    #[serde(default = "one")]
    pub replications: u32,
    #[serde(default)]
    pub shifting_bottleneck_detection: bool,
    #[serde(default)]
    pub skills: Vec<String>,
    pub variants: Vec<VariantSpec>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
    #[serde(default)]
    pub logics: Vec<LogicSpec>,
    #[serde(default)]
    pub attachments: Vec<AttachmentSpec>,
    #[serde(default)]
    pub failures: Vec<FailureSpec>,
    #[serde(default)]
    pub calendars: Vec<CalendarSpec>,
    #[serde(default)]
    pub managers: Vec<ManagerSpec>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSpec {
    pub name: String,
    /// Physical length in mm.
    pub length: u32,
    /// Physical width in mm.
    pub width: u32,
    #[serde(default = "one")]
    pub units: u32,
}

/// A number-generator description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum GenSpec {
    Constant { value: f64 },
    Uniform { min: f64, max: f64 },
    Exponential { mean: f64 },
    Normal { mean: f64, std_dev: f64 },
    Triangle { min: f64, mode: f64, max: f64 },
    Erlang { k: u32, rate: f64 },
    Weibull { scale: f64, shape: f64 },
    Sequence { values: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub kind: NodeKindSpec,
    #[serde(default)]
    pub process_time: Option<GenSpec>,
    #[serde(default)]
    pub setup_time: Option<GenSpec>,
    #[serde(default)]
    pub requires: Vec<SkillRequirementSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKindSpec {
    Source {
        variant: String,
        #[serde(default)]
        limit: Option<u32>,
    },
    Sink,
    Buffer {
        capacity: usize,
    },
    Store {
        capacity: usize,
    },
    Operation,
    Assembly {
        #[serde(default)]
        container: Option<String>,
        parts: Vec<AssemblyPartSpec>,
        #[serde(default)]
        container_first: bool,
    },
    Disassembly {
        #[serde(default)]
        recursive: bool,
    },
    Conveyor {
        /// Belt length in mm.
        length: f64,
        /// Belt speed in mm/s.
        speed: f64,
        #[serde(default = "yes")]
        accumulating: bool,
    },
    Facade,
    Parallel {
        count: usize,
        #[serde(default = "yes")]
        mixed_processing: bool,
        #[serde(default)]
        synchronize_entries: bool,
        #[serde(default)]
        synchronize_exits: bool,
        #[serde(default)]
        failure_zone: bool,
        #[serde(default)]
        entry_timeout: Option<GenSpec>,
    },
    FailureZone {
        #[serde(default)]
        propagation_steps: Option<u32>,
    },
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyPartSpec {
    pub variant: String,
    pub count: u32,
    #[serde(default)]
    pub delete_on_assemble: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub from: String,
    pub to: String,
    #[serde(default = "one_weight")]
    pub weight: i32,
}

fn one_weight() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "logic", rename_all = "snake_case")]
pub enum LogicSpec {
    Kanban {
        name: String,
        /// (variant, cap) pairs.
        limits: Vec<(String, u32)>,
    },
    MaxWip {
        name: String,
        max: usize,
    },
    CriticalWip {
        name: String,
        percent: f64,
        storage: String,
    },
    Order {
        name: String,
        variants: Vec<String>,
    },
    Takt {
        name: String,
        takt_time: f64,
        nodes: Vec<String>,
    },
    Batch {
        name: String,
        /// (variant, batch size) pairs.
        batches: Vec<(String, u32)>,
        #[serde(default)]
        start_incomplete: bool,
        #[serde(default)]
        incomplete_timeout: Option<GenSpec>,
    },
    Demand {
        name: String,
        store: String,
        variant: String,
        interval: GenSpec,
        #[serde(default)]
        use_units: bool,
        #[serde(default = "yes")]
        delete_entity: bool,
    },
}

/// How a logic attaches to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentRole {
    /// Consulted on admission; may veto.
    Enter,
    /// Consulted on exit; may hold.
    Exit,
    /// Counts entries and exits without gating.
    Observe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentSpec {
    pub node: String,
    pub logic: String,
    pub role: AttachmentRole,
    /// Restrict an enter attachment to one variant.
    #[serde(default)]
    pub variant: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSpec {
    Simulation,
    Processing,
    Operational,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKindSpec {
    Percent { availability: f64, mttr: f64 },
    Distributions { interval: GenSpec, duration: GenSpec },
    Cycles { interval: GenSpec, duration: GenSpec },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSpec {
    pub name: String,
    pub node: String,
    pub reference: ReferenceSpec,
    pub kind: FailureKindSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakSpec {
    /// Seconds of day.
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftSpec {
    pub name: String,
    /// Seconds of day; an end at or before the start rolls overnight.
    pub start: f64,
    pub end: f64,
    /// Monday first.
    pub days: [bool; 7],
    #[serde(default)]
    pub breaks: Vec<BreakSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarSpec {
    pub name: String,
    pub nodes: Vec<String>,
    pub shifts: Vec<ShiftSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    pub skills: Vec<String>,
    #[serde(default = "unit_factor")]
    pub execution_factor: f64,
}

fn unit_factor() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRequirementSpec {
    pub purpose: PurposeSpec,
    pub skills: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurposeSpec {
    Processing,
    Repair,
    Setup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSpec {
    pub name: String,
    #[serde(default)]
    pub response_time: Option<GenSpec>,
    pub resources: Vec<ResourceSpec>,
    /// Nodes drawing from this pool.
    #[serde(default)]
    pub nodes: Vec<String>,
}
