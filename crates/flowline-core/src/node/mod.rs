//! Flow nodes: the base state machine and the concrete node kinds.
//!
//! A node is the unit of the material-flow graph. The base owns the
//! ten-state machine with its time accounting, the enter and exit ports,
//! attached failures and resources, and the process and setup time
//! generators. Kind-specific state lives in [`NodeKind`]; the movement
//! protocol that drives nodes is implemented on the simulation in
//! `protocol`.

pub mod assembly;
pub mod buffer;
pub mod conveyor;
pub mod disassembly;
pub mod facade;
pub mod operation;
pub mod parallel;
pub mod protocol;
pub mod sink;
pub mod source;
pub mod store;
pub mod zone;

use crate::bottleneck::BottleneckShare;
use crate::gen::Generator;
use crate::id::{BatchId, FailureKey, LogicKey, ManagerKey, NodeKey, VariantKey};
use crate::movestrategy::{MoveController, MoveStrategy};
use crate::port::{EnterPort, ExitPort};
use crate::resource::NodeResource;
use crate::time::SimTime;

pub use assembly::{Assembly, AssemblySpec, PartSpec};
pub use buffer::Buffer;
pub use conveyor::Conveyor;
pub use disassembly::Disassembly;
pub use facade::{Facade, FacadeOrderItem};
pub use operation::Operation;
pub use parallel::ParallelOperation;
pub use sink::Sink;
pub use source::{Source, VariantCreator};
pub use store::Store;
pub use zone::FailureZone;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The displayed state of a node. Exactly one at any time; the declaration
/// order is the display priority when several underlying conditions hold
/// (an unplanned node shows Unplanned even while a failure is active).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Unplanned,
    Paused,
    Failed,
    Waiting,
    Working,
    Travelling,
    Blocked,
    Setup,
    WaitingForResource,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Unplanned => "Unplanned",
            State::Paused => "Paused",
            State::Failed => "Failed",
            State::Waiting => "Waiting",
            State::Working => "Working",
            State::Travelling => "Travelling",
            State::Blocked => "Blocked",
            State::Setup => "Setup",
            State::WaitingForResource => "WaitingForResource",
        }
    }
}

/// Why a node left (or will re-enter) the operational condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonOpCause {
    Failure,
    Unplanned,
    Paused,
}

// ---------------------------------------------------------------------------
// NodeBase
// ---------------------------------------------------------------------------

/// State shared by every node kind.
#[derive(Debug)]
pub struct NodeBase {
    pub enter: EnterPort,
    pub exit: ExitPort,

    // -- Activity flags: at most one is set --
    waiting: bool,
    working: bool,
    travelling: bool,
    blocked: bool,
    setup: bool,
    waiting_for_resource: bool,

    // -- Overriding conditions --
    failed: bool,
    unplanned: bool,
    paused: bool,
    disruption_refs: i32,
    unplanned_refs: i32,

    /// Orthogonal to the state machine.
    pub empty: bool,
    last_empty: SimTime,
    pub empty_time: SimTime,

    /// When the current displayed state began.
    start_period: SimTime,

    // -- Time per displayed state --
    pub waiting_time: SimTime,
    pub working_time: SimTime,
    pub travelling_time: SimTime,
    pub blocked_time: SimTime,
    pub setup_time: SimTime,
    pub waiting_for_resource_time: SimTime,
    pub failed_time: SimTime,
    pub unplanned_time: SimTime,
    pub paused_time: SimTime,

    // -- Helper flags feeding WaitingForResource --
    pub wfr_processing: bool,
    pub wfr_repair: bool,
    pub wfr_setup: bool,

    // -- Occupation statistics --
    occupied: f64,
    occupation_mark: SimTime,
    pub min_occupied: usize,
    pub max_occupied: usize,

    // -- Failures --
    pub failures: Vec<FailureKey>,
    /// Nodes that fail when this node fails.
    pub failure_nodes: Vec<NodeKey>,

    // -- Resources --
    pub managers: Vec<ManagerKey>,
    pub processing_resource: Option<NodeResource>,
    pub repair_resource: Option<NodeResource>,
    pub setup_resource: Option<NodeResource>,
    pub processing_interrupted: bool,
    pub repair_interrupted: bool,
    pub setup_interrupted: bool,
    pub start_interrupted_processing: SimTime,
    pub start_interrupted_repair: SimTime,
    pub start_interrupted_setup: SimTime,

    // -- Time generators --
    pub process_time: Option<Generator>,
    pub setup_time_gen: Option<Generator>,
    /// Variant of the last entity processed; setups trigger on change.
    pub last_variant: Option<VariantKey>,

    /// Restricts which batch may be processed here.
    pub batch_id: Option<BatchId>,

    /// Logics observing entries and exits on this node.
    pub observers: Vec<LogicKey>,

    /// Last observed working state, for processing-referenced failures.
    pub(crate) was_working: bool,

    // -- Bottleneck detection --
    pub active: bool,
    pub start_active_period: SimTime,
    pub end_operational: SimTime,
    pub bottleneck: BottleneckShare,
    pub tmp_bottleneck: BottleneckShare,

    pub reserved: bool,
}

impl NodeBase {
    pub fn new() -> Self {
        Self {
            enter: EnterPort::new(),
            exit: ExitPort::new(MoveController::new(MoveStrategy::successor())),
            waiting: true,
            working: false,
            travelling: false,
            blocked: false,
            setup: false,
            waiting_for_resource: false,
            failed: false,
            unplanned: false,
            paused: false,
            disruption_refs: 0,
            unplanned_refs: 0,
            empty: true,
            last_empty: 0.0,
            empty_time: 0.0,
            start_period: 0.0,
            waiting_time: 0.0,
            working_time: 0.0,
            travelling_time: 0.0,
            blocked_time: 0.0,
            setup_time: 0.0,
            waiting_for_resource_time: 0.0,
            failed_time: 0.0,
            unplanned_time: 0.0,
            paused_time: 0.0,
            wfr_processing: false,
            wfr_repair: false,
            wfr_setup: false,
            occupied: 0.0,
            occupation_mark: 0.0,
            min_occupied: usize::MAX,
            max_occupied: 0,
            failures: Vec::new(),
            failure_nodes: Vec::new(),
            managers: Vec::new(),
            processing_resource: None,
            repair_resource: None,
            setup_resource: None,
            processing_interrupted: false,
            repair_interrupted: false,
            setup_interrupted: false,
            start_interrupted_processing: 0.0,
            start_interrupted_repair: 0.0,
            start_interrupted_setup: 0.0,
            process_time: None,
            setup_time_gen: None,
            last_variant: None,
            batch_id: None,
            observers: Vec::new(),
            was_working: false,
            active: false,
            start_active_period: 0.0,
            end_operational: 0.0,
            bottleneck: BottleneckShare::default(),
            tmp_bottleneck: BottleneckShare::default(),
            reserved: false,
        }
    }

    /// The displayed state.
    pub fn state(&self) -> State {
        if self.unplanned {
            State::Unplanned
        } else if self.paused {
            State::Paused
        } else if self.failed {
            State::Failed
        } else if self.setup {
            State::Setup
        } else if self.waiting_for_resource {
            State::WaitingForResource
        } else if self.blocked {
            State::Blocked
        } else if self.working {
            State::Working
        } else if self.travelling {
            State::Travelling
        } else {
            State::Waiting
        }
    }

    /// Operational means neither failed, unplanned nor paused.
    pub fn is_operational(&self) -> bool {
        !self.failed && !self.unplanned && !self.paused
    }

    /// Active states feed shifting-bottleneck detection: the node is doing
    /// or being worked on (processing, setup, repair, transport).
    pub fn is_active(&self) -> bool {
        !self.unplanned
            && !self.paused
            && (self.working || self.setup || self.travelling || self.failed)
    }

    pub fn waiting(&self) -> bool {
        self.state() == State::Waiting
    }

    pub fn working(&self) -> bool {
        self.state() == State::Working
    }

    pub fn travelling(&self) -> bool {
        self.state() == State::Travelling
    }

    pub fn blocked(&self) -> bool {
        self.state() == State::Blocked
    }

    pub fn setup(&self) -> bool {
        self.state() == State::Setup
    }

    pub fn waiting_for_resource(&self) -> bool {
        self.state() == State::WaitingForResource
    }

    /// With `by_state` the display priority applies; without it the call
    /// answers whether any failure is active at all.
    pub fn failed(&self, by_state: bool) -> bool {
        if by_state {
            self.state() == State::Failed
        } else {
            self.disruption_refs > 0
        }
    }

    pub fn unplanned(&self) -> bool {
        self.unplanned
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn disruption_refs(&self) -> i32 {
        self.disruption_refs
    }

    /// Account the elapsed period to the current displayed state. Must be
    /// called before every state mutation.
    pub fn observe_state(&mut self, now: SimTime) {
        let elapsed = now - self.start_period;
        if elapsed <= 0.0 {
            self.start_period = now;
            return;
        }
        match self.state() {
            State::Unplanned => self.unplanned_time += elapsed,
            State::Paused => self.paused_time += elapsed,
            State::Failed => self.failed_time += elapsed,
            State::Waiting => self.waiting_time += elapsed,
            State::Working => self.working_time += elapsed,
            State::Travelling => self.travelling_time += elapsed,
            State::Blocked => self.blocked_time += elapsed,
            State::Setup => self.setup_time += elapsed,
            State::WaitingForResource => self.waiting_for_resource_time += elapsed,
        }
        self.start_period = now;
    }

    fn clear_activity(&mut self) {
        self.waiting = false;
        self.working = false;
        self.travelling = false;
        self.blocked = false;
        self.setup = false;
        self.waiting_for_resource = false;
    }

    pub fn set_waiting(&mut self, now: SimTime) {
        self.observe_state(now);
        self.clear_activity();
        self.waiting = true;
    }

    pub fn set_working(&mut self, now: SimTime) {
        self.observe_state(now);
        self.clear_activity();
        self.working = true;
        self.set_end_empty(now);
    }

    pub fn set_travelling(&mut self, now: SimTime) {
        self.observe_state(now);
        self.clear_activity();
        self.travelling = true;
    }

    pub fn set_blocked(&mut self, now: SimTime) {
        self.observe_state(now);
        self.clear_activity();
        self.blocked = true;
    }

    pub fn set_setup_state(&mut self, now: SimTime) {
        self.observe_state(now);
        self.clear_activity();
        self.setup = true;
        self.set_end_empty(now);
    }

    /// Recompute the WaitingForResource flag from the per-purpose helper
    /// flags.
    pub fn update_waiting_for_resource(&mut self, now: SimTime) {
        let value = self.wfr_processing || self.wfr_repair || self.wfr_setup;
        if value != self.waiting_for_resource {
            self.observe_state(now);
            if value {
                self.clear_activity();
                self.waiting_for_resource = true;
            } else {
                self.clear_activity();
                self.waiting = true;
            }
        }
    }

    /// A disruption begins. Returns true when the node just became failed
    /// (reference count went 0 to 1).
    pub fn disruption_ref_begin(&mut self, now: SimTime) -> bool {
        self.observe_state(now);
        self.disruption_refs += 1;
        if self.disruption_refs == 1 {
            self.failed = true;
            true
        } else {
            false
        }
    }

    /// A disruption ends. Returns true when the node just recovered.
    /// A negative reference count is a broken engine invariant.
    pub fn disruption_ref_end(&mut self, now: SimTime) -> bool {
        self.observe_state(now);
        self.disruption_refs -= 1;
        assert!(
            self.disruption_refs >= 0,
            "disruption reference count went negative"
        );
        if self.disruption_refs == 0 {
            self.failed = false;
            true
        } else {
            false
        }
    }

    /// Returns true when the node just became unplanned.
    pub fn unplanned_ref_begin(&mut self, now: SimTime) -> bool {
        self.observe_state(now);
        self.unplanned_refs += 1;
        if self.unplanned_refs == 1 {
            self.unplanned = true;
            true
        } else {
            false
        }
    }

    /// Returns true when the node just left the unplanned condition.
    pub fn unplanned_ref_end(&mut self, now: SimTime) -> bool {
        self.observe_state(now);
        self.unplanned_refs -= 1;
        assert!(
            self.unplanned_refs >= 0,
            "unplanned reference count went negative"
        );
        if self.unplanned_refs == 0 {
            self.unplanned = false;
            true
        } else {
            false
        }
    }

    /// Toggle the paused condition. Returns true if it changed.
    pub fn set_paused(&mut self, now: SimTime, value: bool) -> bool {
        if self.paused == value {
            return false;
        }
        self.observe_state(now);
        self.paused = value;
        true
    }

    pub fn set_start_empty(&mut self, now: SimTime) {
        if !self.empty {
            self.empty = true;
            self.last_empty = now;
        }
    }

    pub fn set_end_empty(&mut self, now: SimTime) {
        if self.empty {
            self.empty = false;
            self.empty_time += now - self.last_empty;
        }
    }

    /// Accumulated empty time including a currently running interval.
    pub fn empty_time_at(&self, now: SimTime) -> SimTime {
        if self.empty {
            self.empty_time + (now - self.last_empty)
        } else {
            self.empty_time
        }
    }

    /// Fold the time-weighted content into the occupation integral. Call
    /// before every content change and at finalize.
    pub fn touch_occupation(&mut self, now: SimTime, content: usize) {
        self.occupied += content as f64 * (now - self.occupation_mark);
        self.occupation_mark = now;
    }

    /// Record extreme occupations. Call after every content change.
    pub fn note_occupation(&mut self, content: usize) {
        self.min_occupied = self.min_occupied.min(content);
        self.max_occupied = self.max_occupied.max(content);
    }

    /// Share of capacity occupied over `elapsed`, in [0, 1].
    pub fn relative_occupation(&self, elapsed: SimTime, capacity: usize) -> f64 {
        if elapsed <= 0.0 || capacity == 0 {
            return 0.0;
        }
        self.occupied / (elapsed * capacity as f64)
    }

    pub fn occupied_integral(&self) -> f64 {
        self.occupied
    }

    /// Reset all runtime state for a new replication. Structural
    /// configuration (ports, logics, generators, resources, failures)
    /// survives; only per-run state clears.
    pub fn init(&mut self) {
        self.enter.init();
        self.exit.init();
        self.waiting = true;
        self.working = false;
        self.travelling = false;
        self.blocked = false;
        self.setup = false;
        self.waiting_for_resource = false;
        self.failed = false;
        self.unplanned = false;
        self.paused = false;
        self.disruption_refs = 0;
        self.unplanned_refs = 0;
        self.empty = true;
        self.wfr_processing = false;
        self.wfr_repair = false;
        self.wfr_setup = false;
        self.last_variant = None;
        self.processing_interrupted = false;
        self.repair_interrupted = false;
        self.setup_interrupted = false;
        self.was_working = false;
        self.active = false;
        self.start_active_period = 0.0;
        self.end_operational = 0.0;
        if let Some(g) = &mut self.process_time {
            g.init();
        }
        if let Some(g) = &mut self.setup_time_gen {
            g.init();
        }
        for nr in [
            &mut self.processing_resource,
            &mut self.repair_resource,
            &mut self.setup_resource,
        ]
        .into_iter()
        .flatten()
        {
            nr.clear_allocation();
        }
        self.reset_stats(0.0);
    }

    /// Reset statistics at the end of the warmup period. The current state
    /// is kept; its running period restarts now.
    pub fn reset_stats(&mut self, now: SimTime) {
        self.start_period = now;
        self.waiting_time = 0.0;
        self.working_time = 0.0;
        self.travelling_time = 0.0;
        self.blocked_time = 0.0;
        self.setup_time = 0.0;
        self.waiting_for_resource_time = 0.0;
        self.failed_time = 0.0;
        self.unplanned_time = 0.0;
        self.paused_time = 0.0;
        self.empty_time = 0.0;
        self.last_empty = now;
        self.occupied = 0.0;
        self.occupation_mark = now;
        self.min_occupied = usize::MAX;
        self.max_occupied = 0;
        self.enter.reset_stats();
        self.exit.reset_stats();
        self.bottleneck = BottleneckShare::default();
        self.tmp_bottleneck = BottleneckShare::default();
    }

    /// Total time attributed to states since the last reset.
    pub fn state_time_sum(&self) -> SimTime {
        self.waiting_time
            + self.working_time
            + self.travelling_time
            + self.blocked_time
            + self.setup_time
            + self.waiting_for_resource_time
            + self.failed_time
            + self.unplanned_time
            + self.paused_time
    }
}

impl Default for NodeBase {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Kind-specific node state.
#[derive(Debug)]
pub enum NodeKind {
    Source(Source),
    Sink(Sink),
    Buffer(Buffer),
    Store(Store),
    Operation(Operation),
    Assembly(Assembly),
    Disassembly(Disassembly),
    Conveyor(Conveyor),
    Facade(Facade),
    Parallel(ParallelOperation),
    FailureZone(FailureZone),
}

impl NodeKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Source(_) => "Source",
            NodeKind::Sink(_) => "Sink",
            NodeKind::Buffer(_) => "Buffer",
            NodeKind::Store(_) => "Store",
            NodeKind::Operation(_) => "Operation",
            NodeKind::Assembly(_) => "Assembly",
            NodeKind::Disassembly(_) => "Disassembly",
            NodeKind::Conveyor(_) => "Conveyor",
            NodeKind::Facade(_) => "Facade",
            NodeKind::Parallel(_) => "ParallelOperation",
            NodeKind::FailureZone(_) => "FailureZone",
        }
    }
}

/// A node in the material-flow graph.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub enabled: bool,
    pub base: NodeBase,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            base: NodeBase::new(),
            kind,
        }
    }

    pub fn state(&self) -> State {
        self.base.state()
    }

    pub fn is_operational(&self) -> bool {
        self.base.is_operational()
    }

    /// Entities currently on the node.
    pub fn content_size(&self) -> usize {
        match &self.kind {
            NodeKind::Source(s) => s.content_size(),
            NodeKind::Sink(s) => s.content_size(),
            NodeKind::Buffer(b) => b.content_size(),
            NodeKind::Store(s) => s.content_size(),
            NodeKind::Operation(o) => o.content_size(),
            NodeKind::Assembly(a) => a.content_size(),
            NodeKind::Disassembly(d) => d.content_size(),
            NodeKind::Conveyor(c) => c.content_size(),
            NodeKind::Facade(f) => f.content_size(),
            NodeKind::Parallel(p) => p.content_size(),
            NodeKind::FailureZone(_) => 0,
        }
    }

    /// The capacity bound on content size.
    pub fn max_occupation(&self) -> usize {
        match &self.kind {
            NodeKind::Source(_) => 1,
            NodeKind::Sink(_) => 1,
            NodeKind::Buffer(b) => b.max_size,
            NodeKind::Store(s) => s.max_size,
            NodeKind::Operation(_) => 1,
            NodeKind::Assembly(a) => a.max_occupation(),
            NodeKind::Disassembly(d) => d.max_occupation(),
            NodeKind::Conveyor(c) => c.max_occupation(),
            NodeKind::Facade(_) => usize::MAX,
            NodeKind::Parallel(p) => p.operations.len(),
            NodeKind::FailureZone(_) => 0,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_node_waits_and_is_empty() {
        let base = NodeBase::new();
        assert_eq!(base.state(), State::Waiting);
        assert!(base.is_operational());
        assert!(base.empty);
        assert!(!base.is_active());
    }

    #[test]
    fn observe_state_accounts_elapsed_time_to_prior_state() {
        let mut base = NodeBase::new();
        base.set_working(5.0); // waiting 0..5
        assert_eq!(base.waiting_time, 5.0);
        base.set_blocked(8.0); // working 5..8
        assert_eq!(base.working_time, 3.0);
        base.set_waiting(10.0); // blocked 8..10
        assert_eq!(base.blocked_time, 2.0);
    }

    #[test]
    fn state_times_sum_to_elapsed() {
        let mut base = NodeBase::new();
        base.set_working(2.0);
        base.set_setup_state(3.5);
        base.set_working(7.25);
        base.set_blocked(11.0);
        base.observe_state(20.0);
        assert!((base.state_time_sum() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn display_priority_unplanned_over_paused_over_failed() {
        let mut base = NodeBase::new();
        base.disruption_ref_begin(1.0);
        assert_eq!(base.state(), State::Failed);
        base.set_paused(2.0, true);
        assert_eq!(base.state(), State::Paused);
        base.unplanned_ref_begin(3.0);
        assert_eq!(base.state(), State::Unplanned);
        // Accounting follows display: 2..3 was shown as Paused.
        assert_eq!(base.paused_time, 1.0);
        base.unplanned_ref_end(5.0);
        assert_eq!(base.unplanned_time, 2.0);
        assert_eq!(base.state(), State::Paused);
        base.set_paused(6.0, false);
        assert_eq!(base.state(), State::Failed);
        base.disruption_ref_end(7.0);
        assert_eq!(base.state(), State::Waiting);
        assert!(base.is_operational());
    }

    #[test]
    fn nested_disruptions_need_matching_ends() {
        let mut base = NodeBase::new();
        assert!(base.disruption_ref_begin(0.0));
        assert!(!base.disruption_ref_begin(1.0));
        assert!(!base.disruption_ref_end(2.0));
        assert!(base.failed(false));
        assert!(base.disruption_ref_end(3.0));
        assert!(!base.failed(false));
    }

    #[test]
    #[should_panic(expected = "disruption reference count went negative")]
    fn unbalanced_disruption_end_panics() {
        let mut base = NodeBase::new();
        base.disruption_ref_end(0.0);
    }

    #[test]
    fn failed_by_state_vs_by_refs() {
        let mut base = NodeBase::new();
        base.disruption_ref_begin(0.0);
        base.unplanned_ref_begin(1.0);
        assert_eq!(base.state(), State::Unplanned);
        assert!(!base.failed(true));
        assert!(base.failed(false));
    }

    #[test]
    fn empty_interval_accounting() {
        let mut base = NodeBase::new();
        base.set_working(4.0); // empty 0..4 ends
        assert_eq!(base.empty_time, 4.0);
        base.set_waiting(6.0);
        base.set_start_empty(6.0);
        assert_eq!(base.empty_time_at(9.0), 7.0);
    }

    #[test]
    fn occupation_integral_and_extremes() {
        let mut base = NodeBase::new();
        base.touch_occupation(0.0, 0);
        base.note_occupation(0);
        base.touch_occupation(2.0, 0); // 0 entities for 2s
        base.note_occupation(1);
        base.touch_occupation(6.0, 1); // 1 entity for 4s
        base.note_occupation(2);
        assert_eq!(base.occupied_integral(), 4.0);
        assert_eq!(base.max_occupied, 2);
        assert_eq!(base.min_occupied, 0);
        assert!((base.relative_occupation(6.0, 2) - 4.0 / 12.0).abs() < 1e-12);
    }

    #[test]
    fn waiting_for_resource_follows_helper_flags() {
        let mut base = NodeBase::new();
        base.wfr_processing = true;
        base.update_waiting_for_resource(1.0);
        assert_eq!(base.state(), State::WaitingForResource);
        base.wfr_processing = false;
        base.update_waiting_for_resource(3.0);
        assert_eq!(base.state(), State::Waiting);
        assert_eq!(base.waiting_for_resource_time, 2.0);
    }

    #[test]
    fn reset_stats_keeps_state_but_zeroes_timers() {
        let mut base = NodeBase::new();
        base.set_working(5.0);
        base.reset_stats(5.0);
        assert_eq!(base.state(), State::Working);
        assert_eq!(base.state_time_sum(), 0.0);
        base.observe_state(8.0);
        assert_eq!(base.working_time, 3.0);
    }
}
