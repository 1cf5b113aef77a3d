//! The simulation: arenas, clock, event loop and replications.
//!
//! The engine is strictly single-threaded and event-driven. All model
//! objects live in typed arenas owned here; behavior modules add their
//! `impl Simulation` blocks next to the state they drive. One
//! `simulate_step` pops one event and runs its effect to completion; a
//! replication drains the queue up to the horizon, captures outputs at
//! `finalize`, and resets.

use crate::bottleneck::BottleneckLedger;
use crate::breakpoint::Breakpoint;
use crate::entity::{collect_parts, Entity};
use crate::event::{priority, EventKind, EventQueue};
use crate::failure::{Failure, FailureType, TimeReference};
use crate::gen::Generator;
use crate::id::{
    BatchId, CalendarKey, EntityKey, EventKey, FailureKey, LogicKey, ManagerKey, NodeKey,
    ResourceKey, SkillId, VariantKey,
};
use crate::logic::{Logic, LogicKind};
use crate::node::source::VariantCreator;
use crate::node::{
    Assembly, AssemblySpec, Buffer, Conveyor, Disassembly, Facade, FailureZone, Node, NodeKind,
    Operation, ParallelOperation, Sink, Source, Store,
};
use crate::port::EnterPort;
use crate::resource::{LogicResource, ResourceManager, ResourcePurpose};
use crate::shift::ShiftCalendar;
use crate::signal::PrioritySignal;
use crate::stats::Outputs;
use crate::time::{SimTime, TOLERANCE};
use crate::variant::Variant;
use crate::SimRng;
use rand::SeedableRng;
use slotmap::SlotMap;

// ---------------------------------------------------------------------------
// Step result and signals
// ---------------------------------------------------------------------------

/// Outcome of one `simulate_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The event ran; more are pending.
    More,
    /// A breakpoint matched; the event was not processed.
    Breakpoint,
    /// The stop event was reached or the simulation was canceled.
    Stopped,
    /// The queue is empty.
    End,
}

/// Observer signals fired at replication milestones. Payload: the
/// replication index, or the reset time for `statistics_reset`.
#[derive(Debug, Default)]
pub struct SimSignals {
    pub replication_initialized: PrioritySignal<u32>,
    pub replication_finalized: PrioritySignal<u32>,
    pub statistics_reset: PrioritySignal<SimTime>,
}

type TimeCallbackFn = Box<dyn FnMut(&mut Simulation)>;

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// The simulation manager: owns every model object and performs the
/// event processing.
pub struct Simulation {
    pub clock: SimTime,
    pub queue: EventQueue,

    pub nodes: SlotMap<NodeKey, Node>,
    pub entities: SlotMap<EntityKey, Entity>,
    pub variants: SlotMap<VariantKey, Variant>,
    pub failures: SlotMap<FailureKey, Failure>,
    pub logics: SlotMap<LogicKey, Logic>,
    pub managers: SlotMap<ManagerKey, ResourceManager>,
    pub resources: SlotMap<ResourceKey, LogicResource>,
    pub calendars: SlotMap<CalendarKey, ShiftCalendar>,

    pub rng: SimRng,
    pub seed: u64,

    pub horizon: SimTime,
    pub warmup: SimTime,
    pub replications: u32,
    replication: u32,

    pub outputs: Outputs,
    pub signals: SimSignals,

    /// Model-global skill registry; `SkillId` indexes into it.
    pub skills: Vec<String>,

    pub shifting_bottleneck_detection: bool,
    pub bottleneck_ledger: BottleneckLedger,
    reported_bottleneck: Option<NodeKey>,

    breakpoints: Vec<Breakpoint>,
    breakpoints_enabled: bool,
    stop_event: Option<EventKey>,
    current_event: Option<EventKey>,
    canceled: bool,

    reset_stats_time: SimTime,
    time_callbacks: Vec<Option<TimeCallbackFn>>,
    next_batch: u32,
    next_entity_serial: u32,
    total_exits: u32,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("clock", &self.clock)
            .field("nodes", &self.nodes.len())
            .field("entities", &self.entities.len())
            .field("pending_events", &self.queue.len())
            .field("replication", &self.replication)
            .finish()
    }
}

impl Simulation {
    pub fn new(seed: u64) -> Self {
        Self {
            clock: 0.0,
            queue: EventQueue::new(),
            nodes: SlotMap::with_key(),
            entities: SlotMap::with_key(),
            variants: SlotMap::with_key(),
            failures: SlotMap::with_key(),
            logics: SlotMap::with_key(),
            managers: SlotMap::with_key(),
            resources: SlotMap::with_key(),
            calendars: SlotMap::with_key(),
            rng: SimRng::seed_from_u64(seed),
            seed,
            horizon: f64::INFINITY,
            warmup: 0.0,
            replications: 1,
            replication: 0,
            outputs: Outputs::new(),
            signals: SimSignals::default(),
            skills: Vec::new(),
            shifting_bottleneck_detection: false,
            bottleneck_ledger: BottleneckLedger::new(),
            reported_bottleneck: None,
            breakpoints: Vec::new(),
            breakpoints_enabled: false,
            stop_event: None,
            current_event: None,
            canceled: false,
            reset_stats_time: 0.0,
            time_callbacks: Vec::new(),
            next_batch: 0,
            next_entity_serial: 0,
            total_exits: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    pub fn set_horizon(&mut self, horizon: SimTime) {
        self.horizon = horizon;
    }

    pub fn set_warmup(&mut self, warmup: SimTime) {
        self.warmup = warmup;
    }

    pub fn set_replications(&mut self, replications: u32) {
        self.replications = replications.max(1);
    }

    pub fn set_shifting_bottleneck_detection(&mut self, value: bool) {
        self.shifting_bottleneck_detection = value;
    }

    pub fn replication(&self) -> u32 {
        self.replication
    }

    // -----------------------------------------------------------------------
    // Clock and scheduling
    // -----------------------------------------------------------------------

    pub fn now(&self) -> SimTime {
        self.clock
    }

    /// Elapsed time since statistics gathering (re)started.
    pub fn elapsed_time(&self) -> SimTime {
        self.clock - self.reset_stats_time
    }

    pub fn schedule(&mut self, evt: EventKey, dt: SimTime) {
        let now = self.clock;
        self.queue.schedule(evt, now, dt);
    }

    pub fn schedule_now(&mut self, evt: EventKey) {
        let now = self.clock;
        self.queue.schedule_now(evt, now);
    }

    pub fn schedule_before(&mut self, evt: EventKey, insert: EventKey, dt: SimTime) {
        self.queue.schedule_before(evt, insert, dt);
    }

    pub fn cancel_event(&mut self, evt: EventKey) {
        self.queue.cancel(evt);
    }

    pub fn remove_event(&mut self, evt: EventKey) {
        self.queue.remove(evt);
    }

    pub fn current_event(&self) -> Option<EventKey> {
        self.current_event
    }

    pub(crate) fn next_batch_id(&mut self) -> BatchId {
        let id = BatchId(self.next_batch);
        self.next_batch += 1;
        id
    }

    // -----------------------------------------------------------------------
    // Model building
    // -----------------------------------------------------------------------

    pub fn add_variant(
        &mut self,
        name: impl Into<String>,
        length: u32,
        width: u32,
        units: u32,
    ) -> VariantKey {
        self.variants.insert(Variant::new(name, length, width, units))
    }

    pub fn add_skill(&mut self, name: impl Into<String>) -> SkillId {
        let name = name.into();
        if let Some(index) = self.skills.iter().position(|s| *s == name) {
            return SkillId(index as u32);
        }
        self.skills.push(name);
        SkillId((self.skills.len() - 1) as u32)
    }

    pub fn get_skill_id(&self, name: &str) -> Option<SkillId> {
        self.skills
            .iter()
            .position(|s| s == name)
            .map(|i| SkillId(i as u32))
    }

    pub fn add_source(&mut self, name: impl Into<String>, creator: VariantCreator) -> NodeKey {
        self.nodes
            .insert(Node::new(name, NodeKind::Source(Source::new(creator))))
    }

    pub fn add_sink(&mut self, name: impl Into<String>) -> NodeKey {
        self.nodes.insert(Node::new(name, NodeKind::Sink(Sink::new())))
    }

    pub fn add_buffer(&mut self, name: impl Into<String>, max_size: usize) -> NodeKey {
        assert!(max_size > 0, "buffer capacity must be positive");
        self.nodes
            .insert(Node::new(name, NodeKind::Buffer(Buffer::new(max_size))))
    }

    pub fn add_store(&mut self, name: impl Into<String>, max_size: usize) -> NodeKey {
        assert!(max_size > 0, "store capacity must be positive");
        self.nodes
            .insert(Node::new(name, NodeKind::Store(Store::new(max_size))))
    }

    pub fn add_operation(&mut self, name: impl Into<String>) -> NodeKey {
        self.nodes
            .insert(Node::new(name, NodeKind::Operation(Operation::new())))
    }

    pub fn add_assembly(
        &mut self,
        name: impl Into<String>,
        spec: AssemblySpec,
        container_first: bool,
    ) -> NodeKey {
        self.nodes.insert(Node::new(
            name,
            NodeKind::Assembly(Assembly::new(spec, container_first)),
        ))
    }

    pub fn add_disassembly(&mut self, name: impl Into<String>, recursive: bool) -> NodeKey {
        let node = self.nodes.insert(Node::new(
            name,
            NodeKind::Disassembly(Disassembly::new(recursive)),
        ));
        // Disassembly output routing spreads parts per entity.
        self.nodes[node].base.exit.controller.default =
            crate::movestrategy::MoveStrategy::sequence_entity();
        node
    }

    pub fn add_conveyor(&mut self, name: impl Into<String>, length: f64, speed: f64) -> NodeKey {
        assert!(length > 0.0 && speed > 0.0, "conveyor needs positive length and speed");
        self.nodes.insert(Node::new(
            name,
            NodeKind::Conveyor(Conveyor::new(length, speed)),
        ))
    }

    pub fn add_facade(&mut self, name: impl Into<String>) -> NodeKey {
        self.nodes
            .insert(Node::new(name, NodeKind::Facade(Facade::new())))
    }

    pub fn add_failure_zone(
        &mut self,
        name: impl Into<String>,
        propagation_steps: Option<u32>,
    ) -> NodeKey {
        self.nodes.insert(Node::new(
            name,
            NodeKind::FailureZone(FailureZone::new(propagation_steps)),
        ))
    }

    /// Create a parallel operation with `count` internal operations.
    pub fn add_parallel_operation(&mut self, name: impl Into<String>, count: usize) -> NodeKey {
        assert!(count > 0, "a parallel operation needs at least one internal operation");
        let name = name.into();
        let parent = self.nodes.insert(Node::new(
            name.clone(),
            NodeKind::Parallel(ParallelOperation::new()),
        ));
        for index in 0..count {
            let mut op = Operation::new();
            op.parallel_parent = Some(parent);
            op.parallel_index = index;
            let child = self
                .nodes
                .insert(Node::new(format!("{name}[{index}]"), NodeKind::Operation(op)));
            self.parallel_mut(parent).operations.push(child);
        }
        parent
    }

    /// Tie the internal operations' failures together as one zone.
    pub fn set_parallel_failure_zone(&mut self, parent: NodeKey, value: bool) {
        self.parallel_mut(parent).failure_zone = value;
        let ops = self.parallel_ref(parent).operations.clone();
        for &op in &ops {
            let siblings: Vec<NodeKey> = ops.iter().copied().filter(|&s| s != op).collect();
            self.nodes[op].base.failure_nodes = if value { siblings } else { Vec::new() };
        }
    }

    /// Connect `from` to `to` with the given routing weight, registering
    /// the predecessor on the destination's enter port.
    pub fn connect(&mut self, from: NodeKey, to: NodeKey, weight: i32) {
        self.nodes[from]
            .base
            .exit
            .controller
            .add_destination(to, weight);
        self.nodes[to].base.enter.add_predecessor(from, None);
    }

    pub fn set_process_time(&mut self, node: NodeKey, gen: Generator) {
        self.nodes[node].base.process_time = Some(gen);
    }

    pub fn set_setup_time(&mut self, node: NodeKey, gen: Generator) {
        self.nodes[node].base.setup_time_gen = Some(gen);
    }

    pub fn add_logic(&mut self, name: impl Into<String>, kind: LogicKind) -> LogicKey {
        self.logics.insert(Logic::new(name, kind))
    }

    /// Gate `node`'s admission with `logic` (for one variant, or all).
    pub fn attach_enter_logic(
        &mut self,
        node: NodeKey,
        logic: LogicKey,
        variant: Option<VariantKey>,
    ) {
        self.nodes[node].base.enter.add_enter_logic(logic, variant);
        self.register_logic_entrance(logic, node);
    }

    /// Hold exits from `node` behind `logic`.
    pub fn attach_exit_logic(&mut self, node: NodeKey, logic: LogicKey) {
        self.nodes[node].base.exit.add_exit_logic(logic);
    }

    /// Let `logic` observe entries and exits on `node`.
    pub fn observe_node(&mut self, node: NodeKey, logic: LogicKey) {
        if !self.nodes[node].base.observers.contains(&logic) {
            self.nodes[node].base.observers.push(logic);
        }
    }

    fn register_logic_entrance(&mut self, logic: LogicKey, node: NodeKey) {
        match &mut self.logics[logic].kind {
            LogicKind::Kanban(k) => {
                if !k.entrances.contains(&node) {
                    k.entrances.push(node);
                }
            }
            LogicKind::MaxWip(m) => {
                if !m.entrances.contains(&node) {
                    m.entrances.push(node);
                }
            }
            LogicKind::CriticalWip(c) => {
                if !c.entrances.contains(&node) {
                    c.entrances.push(node);
                }
            }
            LogicKind::Order(o) => {
                if !o.entrances.contains(&node) {
                    o.entrances.push(node);
                }
            }
            LogicKind::Batch(b) => b.node = Some(node),
            _ => {}
        }
    }

    pub fn add_calendar(&mut self, name: impl Into<String>) -> CalendarKey {
        self.calendars.insert(ShiftCalendar::new(name))
    }

    pub fn add_manager(&mut self, name: impl Into<String>) -> ManagerKey {
        self.managers.insert(ResourceManager::new(name))
    }

    /// Add a pool resource to a manager.
    pub fn add_resource(
        &mut self,
        manager: ManagerKey,
        name: impl Into<String>,
        skills: Vec<SkillId>,
        execution_factor: f64,
    ) -> ResourceKey {
        let mut resource = LogicResource::new(name, manager, skills);
        resource.execution_factor = execution_factor;
        let key = self.resources.insert(resource);
        self.managers[manager].resources.push(key);
        key
    }

    /// Connect a node to a resource manager's pool.
    pub fn connect_manager(&mut self, node: NodeKey, manager: ManagerKey) {
        if !self.nodes[node].base.managers.contains(&manager) {
            self.nodes[node].base.managers.push(manager);
        }
    }

    pub fn add_failure(
        &mut self,
        node: NodeKey,
        name: impl Into<String>,
        ftype: FailureType,
        reference: TimeReference,
    ) -> FailureKey {
        if let FailureType::Percent { availability, .. } = ftype {
            assert!(
                availability > 0.0 && availability <= 1.0,
                "availability must be in (0, 1]"
            );
        }
        let fk = self.failures.insert(Failure::new(name, node, ftype, reference));
        self.nodes[node].base.failures.push(fk);
        fk
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    /// Create an entity of `variant` located at `node`.
    pub fn create_entity(&mut self, variant: VariantKey, node: NodeKey) -> EntityKey {
        let now = self.clock;
        let serial = {
            let v = &mut self.variants[variant];
            let id = v.next_entity_id;
            v.next_entity_id += 1;
            id
        };
        self.next_entity_serial += 1;
        let units = self.variants[variant].units as i32;
        let mut entity = Entity::new(serial, variant, now, units.max(1));
        entity.departure = Some(node);
        self.entities.insert(entity)
    }

    /// Record a model exit for `entity` and destroy it, parts included.
    pub fn model_exit(&mut self, entity: EntityKey) {
        let now = self.clock;
        let (variant, entered) = {
            let e = &self.entities[entity];
            (e.variant, e.model_enter_time)
        };
        {
            let v = &mut self.variants[variant];
            v.add_exit(now - entered);
            v.add_wip_time(now - entered);
        }
        self.total_exits += 1;
        let mut parts = Vec::new();
        collect_parts(&self.entities, entity, true, &mut parts);
        for part in parts {
            self.destroy_entity(part);
        }
        self.destroy_entity(entity);
    }

    /// Remove an entity from the model, clearing every reference to it.
    /// A destroyed entity must be off all block lists.
    pub fn destroy_entity(&mut self, entity: EntityKey) {
        if !self.entities.contains_key(entity) {
            return;
        }
        // An unblock round waiting on this entity must not stall.
        let stalled_round = self.entities[entity].destination.and_then(|dest| {
            self.nodes[dest]
                .base
                .enter
                .block_list_out
                .map(|evt| (dest, evt))
        });
        self.clear_forward_blocking(entity);
        if let Some((dest, evt)) = stalled_round {
            self.nodes[dest].base.enter.block_list_out = None;
            self.queue.cancel(evt);
            self.schedule_from_block_list(dest);
        }
        let logic_keys: Vec<LogicKey> = self.logics.keys().collect();
        for logic in logic_keys {
            self.logic_entity_deleted(logic, entity);
        }
        let node_keys: Vec<NodeKey> = self.nodes.keys().collect();
        for node in node_keys {
            let controller = &mut self.nodes[node].base.exit.controller;
            controller.default.forget_entity(entity);
            for (_, s) in &mut controller.per_variant {
                s.forget_entity(entity);
            }
            for (_, s) in &mut controller.per_flow {
                s.forget_entity(entity);
            }
            self.nodes[node].base.exit.remove_exit_blocking(entity);
        }
        let removed = self.entities.remove(entity).expect("entity exists");
        assert!(
            removed.forward_blocking.is_empty(),
            "destroyed entity still sits on a forward-block list"
        );
    }

    /// Every entity and its current node.
    pub fn entity_locations(&self) -> Vec<(NodeKey, EntityKey)> {
        self.entities
            .iter()
            .filter_map(|(key, e)| e.departure.map(|node| (node, key)))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Breakpoints and stepping
    // -----------------------------------------------------------------------

    pub fn add_breakpoint(&mut self) -> usize {
        self.breakpoints.push(Breakpoint::new());
        self.breakpoints.len() - 1
    }

    pub fn breakpoint_mut(&mut self, index: usize) -> &mut Breakpoint {
        &mut self.breakpoints[index]
    }

    pub fn delete_breakpoint(&mut self, index: usize) {
        self.breakpoints.remove(index);
    }

    pub fn set_breakpoints_enabled(&mut self, value: bool) {
        self.breakpoints_enabled = value;
    }

    /// Halt before this specific event instance (single stepping only).
    pub fn set_stop_event(&mut self, evt: EventKey) {
        self.stop_event = Some(evt);
    }

    pub fn clear_stop_event(&mut self) {
        self.stop_event = None;
    }

    /// Toggle the per-event breakpoint flag on a queued event.
    pub fn set_event_breakpoint(&mut self, evt: EventKey, value: bool) {
        if let Some(record) = self.queue.get_mut(evt) {
            record.breakpoint = value;
        }
    }

    /// The queued events in execution order: (key, time, type name).
    pub fn event_list(&self) -> Vec<(EventKey, SimTime, &'static str)> {
        self.queue
            .iter()
            .map(|(key, record)| (key, record.time, record.kind.name()))
            .collect()
    }

    pub fn cancel_simulation(&mut self) {
        self.canceled = true;
    }

    pub fn simulation_canceled(&self) -> bool {
        self.canceled
    }

    /// Sender and receiver names of an event, for breakpoint filters.
    fn event_endpoints(&self, kind: &EventKind) -> (Option<String>, Option<String>) {
        let node_name = |key: NodeKey| self.nodes.get(key).map(|n| n.name.clone());
        match kind {
            EventKind::Out { node, entity, .. } => {
                let receiver = self
                    .entities
                    .get(*entity)
                    .and_then(|e| e.destination)
                    .and_then(node_name);
                (node_name(*node), receiver)
            }
            EventKind::CreateEntity { source } => (None, node_name(*source)),
            EventKind::SetupEnd { node, .. }
            | EventKind::Assemble { node, .. }
            | EventKind::Disassemble { node, .. }
            | EventKind::UpdateConveyor { node, .. }
            | EventKind::OpenConveyor { node }
            | EventKind::AnimateConveyor { node }
            | EventKind::EntryTimeout { node }
            | EventKind::TriggerSynchronizedExits { node } => (None, node_name(*node)),
            EventKind::DisruptionBegin { failure } | EventKind::DisruptionEnd { failure } => {
                let f = &self.failures[*failure];
                (Some(f.name.clone()), node_name(f.node))
            }
            EventKind::RequestResources { node, .. } | EventKind::ResourceReady { node, .. } => {
                (node_name(*node), None)
            }
            EventKind::ShiftCalendarStart { calendar }
            | EventKind::ShiftBegin { calendar }
            | EventKind::ShiftEnd { calendar }
            | EventKind::BreakBegin { calendar }
            | EventKind::BreakEnd { calendar } => {
                (self.calendars.get(*calendar).map(|c| c.name.clone()), None)
            }
            EventKind::CreateDemand { logic }
            | EventKind::StartNewBatch { logic, .. }
            | EventKind::BatchTimeout { logic, .. }
            | EventKind::TaktComplete { logic } => {
                (self.logics.get(*logic).map(|l| l.name.clone()), None)
            }
            EventKind::ResetStats | EventKind::TimeCallback { .. } => (None, None),
        }
    }

    fn breakpoint_matches(&self, evt: EventKey) -> bool {
        let Some(record) = self.queue.get(evt) else {
            return false;
        };
        if record.breakpoint {
            return true;
        }
        if self.breakpoints.is_empty() {
            return false;
        }
        let (sender, receiver) = self.event_endpoints(&record.kind);
        self.breakpoints.iter().any(|bp| {
            bp.matches(
                record.kind.name(),
                record.time,
                sender.as_deref(),
                receiver.as_deref(),
            )
        })
    }

    // -----------------------------------------------------------------------
    // The event loop
    // -----------------------------------------------------------------------

    /// Execute one event. Breakpoints and the stop event are checked
    /// before processing.
    pub fn simulate_step(&mut self) -> Step {
        if self.canceled {
            return Step::Stopped;
        }
        let Some(next) = self.queue.peek() else {
            return Step::End;
        };
        if self.stop_event == Some(next) {
            self.stop_event = None;
            return Step::Stopped;
        }
        if self.breakpoints_enabled {
            let stopped_already = self
                .queue
                .get(next)
                .map(|r| r.breakpoint_stopped)
                .unwrap_or(false);
            if !stopped_already && self.breakpoint_matches(next) {
                self.queue.get_mut(next).unwrap().breakpoint_stopped = true;
                return Step::Breakpoint;
            }
        }

        let evt = self.queue.pop().expect("peeked event exists");
        let (time, canceled) = {
            let record = self.queue.get(evt).expect("popped event exists");
            (record.time, record.canceled)
        };
        assert!(
            time + TOLERANCE >= self.clock,
            "event popped with time {time} before the clock {}",
            self.clock
        );
        self.clock = self.clock.max(time);
        self.current_event = Some(evt);
        if canceled {
            self.cleanup_canceled(evt);
        } else {
            self.dispatch(evt);
        }
        self.current_event = None;
        self.queue.free(evt);
        if self.queue.is_empty() {
            Step::End
        } else {
            Step::More
        }
    }

    /// Bookkeeping for a canceled event that reached the front without
    /// being rescheduled.
    fn cleanup_canceled(&mut self, evt: EventKey) {
        let kind = self.queue.get(evt).map(|r| r.kind.clone());
        if let Some(EventKind::Out { node, entity, .. }) = kind {
            if self.nodes.contains_key(node) {
                self.nodes[node].base.exit.remove_event_out(evt);
            }
            if self.entities.contains_key(entity) {
                self.entities[entity].out_events =
                    self.entities[entity].out_events.saturating_sub(1);
                // If this was the in-flight event of an unblock round, the
                // round must continue without it.
                if let Some(dest) = self.entities[entity].destination {
                    if self.nodes[dest].base.enter.block_list_out == Some(evt) {
                        self.entities[entity].destination = None;
                        self.nodes[dest].base.enter.block_list_out = None;
                        self.schedule_from_block_list(dest);
                    }
                }
            }
        }
    }

    /// Run the effect of one event.
    fn dispatch(&mut self, evt: EventKey) {
        let kind = self
            .queue
            .get(evt)
            .expect("dispatched event exists")
            .kind
            .clone();
        tracing::trace!(time = self.clock, kind = kind.name(), "event");
        match kind {
            EventKind::ResetStats => self.reset_stats(),
            EventKind::ShiftCalendarStart { calendar } => {
                self.process_shift_calendar_start(calendar)
            }
            EventKind::ShiftBegin { calendar } => self.process_shift_begin(calendar),
            EventKind::ShiftEnd { calendar } => self.process_shift_end(calendar),
            EventKind::BreakBegin { calendar } => self.process_break_begin(calendar),
            EventKind::BreakEnd { calendar } => self.process_break_end(calendar),
            EventKind::CreateEntity { source } => self.process_create_entity(source),
            EventKind::CreateDemand { logic } => self.process_create_demand(logic),
            EventKind::StartNewBatch { logic, node } => self.process_start_new_batch(logic, node),
            EventKind::BatchTimeout { logic, node } => self.process_batch_timeout(logic, node),
            EventKind::Out {
                node,
                entity,
                block_list_call,
            } => self.process_out(evt, node, entity, block_list_call),
            EventKind::SetupEnd { node, entity } => self.process_setup_end(node, entity),
            EventKind::Assemble { node, entity } => self.process_assemble(node, entity),
            EventKind::Disassemble { node, entity } => self.process_disassemble(node, entity),
            EventKind::DisruptionBegin { failure } => self.process_disruption_begin(failure),
            EventKind::DisruptionEnd { failure } => self.process_disruption_end(failure),
            EventKind::RequestResources {
                node,
                purpose,
                entity,
                failure,
            } => self.process_request_resources(node, purpose, entity, failure),
            EventKind::ResourceReady {
                node,
                purpose,
                resource,
                entity,
                failure,
            } => self.process_resource_ready(node, purpose, resource, entity, failure),
            EventKind::TaktComplete { logic } => self.process_takt_complete(logic),
            EventKind::EntryTimeout { node } => self.process_entry_timeout(node),
            EventKind::TriggerSynchronizedExits { node } => {
                self.process_trigger_synchronized_exits(node)
            }
            EventKind::UpdateConveyor { node, entity } => {
                self.process_update_conveyor(node, entity)
            }
            EventKind::OpenConveyor { node } => self.process_open_conveyor(node),
            EventKind::AnimateConveyor { node } => self.process_animate_conveyor(node),
            EventKind::TimeCallback { callback } => self.process_time_callback(callback),
        }
    }

    /// Register a callback invoked at an absolute simulation time.
    pub fn add_time_callback(
        &mut self,
        time: SimTime,
        callback: impl FnMut(&mut Simulation) + 'static,
    ) -> EventKey {
        self.time_callbacks.push(Some(Box::new(callback)));
        let index = self.time_callbacks.len() - 1;
        let evt = self.queue.create(
            EventKind::TimeCallback { callback: index },
            priority::TIME_CALLBACK,
        );
        let dt = (time - self.clock).max(0.0);
        self.schedule(evt, dt);
        evt
    }

    fn process_time_callback(&mut self, index: usize) {
        // Take the callback out so it may borrow the simulation freely.
        let Some(slot) = self.time_callbacks.get_mut(index) else {
            return;
        };
        let Some(mut callback) = slot.take() else {
            return;
        };
        callback(self);
        if let Some(slot) = self.time_callbacks.get_mut(index) {
            *slot = Some(callback);
        }
    }

    // -----------------------------------------------------------------------
    // Replications
    // -----------------------------------------------------------------------

    /// Initialize the objects for a replication. Must run before the
    /// first `simulate_step`.
    pub fn init(&mut self) {
        self.clock = 0.0;
        self.queue.clear();
        self.entities.clear();
        self.reset_stats_time = 0.0;
        self.total_exits = 0;
        self.next_entity_serial = 0;
        self.canceled = false;
        self.current_event = None;
        self.stop_event = None;
        self.bottleneck_ledger.clear();
        self.reported_bottleneck = None;
        self.rng = SimRng::seed_from_u64(self.seed.wrapping_add(self.replication as u64));

        let node_keys: Vec<NodeKey> = self.nodes.keys().collect();
        for node in node_keys.iter().copied() {
            self.nodes[node].base.init();
            match &mut self.nodes[node].kind {
                NodeKind::Source(s) => s.init(),
                NodeKind::Sink(s) => s.init(),
                NodeKind::Buffer(b) => b.init(),
                NodeKind::Store(s) => s.init(),
                NodeKind::Operation(o) => o.init(),
                NodeKind::Assembly(a) => a.init(),
                NodeKind::Disassembly(d) => d.init(),
                NodeKind::Conveyor(c) => c.init(),
                NodeKind::Facade(f) => f.init(),
                NodeKind::Parallel(p) => p.init(),
                NodeKind::FailureZone(_) => {}
            }
        }
        for (_, variant) in self.variants.iter_mut() {
            variant.init();
        }
        let failure_keys: Vec<FailureKey> = self.failures.keys().collect();
        for fk in failure_keys.iter().copied() {
            self.failures[fk].init();
        }
        let logic_keys: Vec<LogicKey> = self.logics.keys().collect();
        for logic in logic_keys.iter().copied() {
            self.logic_init(logic);
        }
        let manager_keys: Vec<ManagerKey> = self.managers.keys().collect();
        for manager in manager_keys {
            self.managers[manager].init();
        }
        let resource_keys: Vec<ResourceKey> = self.resources.keys().collect();
        for resource in resource_keys {
            self.resources[resource].init();
        }

        // Initial events: sources, demands, takts, failures, calendars,
        // and the warmup statistics reset.
        for node in node_keys {
            if matches!(self.nodes[node].kind, NodeKind::Source(_)) && self.nodes[node].enabled {
                self.init_source(node);
            }
        }
        for logic in logic_keys {
            if !self.logics[logic].enabled {
                continue;
            }
            match &self.logics[logic].kind {
                LogicKind::Demand(_) => self.init_demand(logic),
                LogicKind::Takt(_) => self.init_takt(logic),
                _ => {}
            }
        }
        for fk in failure_keys {
            self.init_failure(fk);
        }
        let calendar_keys: Vec<CalendarKey> = self.calendars.keys().collect();
        for calendar in calendar_keys {
            let evt = self.queue.create(
                EventKind::ShiftCalendarStart { calendar },
                priority::SHIFT_CALENDAR_START,
            );
            self.schedule(evt, 0.0);
        }
        if self.warmup > 0.0 {
            let evt = self
                .queue
                .create(EventKind::ResetStats, priority::RESET_STATS);
            let warmup = self.warmup;
            self.schedule(evt, warmup);
        }
        let replication = self.replication;
        self.signals.replication_initialized.fire(&replication);
        tracing::debug!(replication, "replication initialized");
    }

    /// Discard statistics gathered so far (the warmup reset).
    pub fn reset_stats(&mut self) {
        let now = self.clock;
        let node_keys: Vec<NodeKey> = self.nodes.keys().collect();
        for node in node_keys {
            self.nodes[node].base.reset_stats(now);
        }
        for (_, variant) in self.variants.iter_mut() {
            variant.reset_stats();
        }
        let failure_keys: Vec<FailureKey> = self.failures.keys().collect();
        for fk in failure_keys {
            self.failures[fk].reset_stats(now);
        }
        self.total_exits = 0;
        self.bottleneck_ledger.clear();
        self.reset_stats_time = now;
        self.signals.statistics_reset.fire(&now);
    }

    /// Capture this replication's outputs.
    pub fn finalize(&mut self) {
        if self.horizon.is_finite() && self.clock < self.horizon {
            self.clock = self.horizon;
        }
        let now = self.clock;
        let elapsed = self.elapsed_time().max(0.0);

        // Close the books on every node.
        let node_keys: Vec<NodeKey> = self.nodes.keys().collect();
        for node in node_keys.iter().copied() {
            self.touch_content(node);
            self.nodes[node].base.observe_state(now);
            if self.nodes[node].base.active {
                let start = self.nodes[node].base.start_active_period;
                self.bottleneck_ledger.add(node, start, now, true);
            }
        }
        // Entities still in the model contribute to WIP.
        let entity_keys: Vec<EntityKey> = self.entities.keys().collect();
        for entity in entity_keys {
            let (variant, entered) = {
                let e = &self.entities[entity];
                (e.variant, e.model_enter_time)
            };
            let since = entered.max(self.reset_stats_time);
            self.variants[variant].add_wip_time((now - since).max(0.0));
        }

        if self.shifting_bottleneck_detection {
            self.apply_bottleneck_totals();
        }

        for node in node_keys {
            self.flush_node_outputs(node, elapsed);
        }
        let variant_keys: Vec<VariantKey> = self.variants.keys().collect();
        for variant in variant_keys.iter().copied() {
            let name = self.variants[variant].name.clone();
            self.variants[variant].finalize(elapsed);
            let v = &self.variants[variant];
            let exits = *v.exit_replications().last().unwrap_or(&0.0);
            let cycle = *v.cycle_time_replications().last().unwrap_or(&0.0);
            let throughput = *v.throughput_replications().last().unwrap_or(&0.0);
            let wip = *v.wip_replications().last().unwrap_or(&0.0);
            self.outputs.record(format!("{name}.exits"), exits);
            self.outputs.record(format!("{name}.cycle_time"), cycle);
            self.outputs.record(format!("{name}.throughput"), throughput);
            self.outputs.record(format!("{name}.wip"), wip);
        }
        let logic_keys: Vec<LogicKey> = self.logics.keys().collect();
        for logic in logic_keys {
            self.logic_finalize(logic);
        }
        let resource_keys: Vec<ResourceKey> = self.resources.keys().collect();
        for key in resource_keys {
            let (name, manager, utilization) = {
                let r = &self.resources[key];
                let busy = if r.allocated_to.is_some() {
                    r.busy_time + (now - r.busy_since)
                } else {
                    r.busy_time
                };
                let utilization = if elapsed > 0.0 { busy / elapsed } else { 0.0 };
                (r.name.clone(), r.manager, utilization)
            };
            let manager_name = self.managers[manager].name.clone();
            self.outputs
                .record(format!("{manager_name}.{name}.utilization"), utilization);
        }

        // Model-level aggregates.
        let total_exits = self.total_exits as f64;
        self.outputs.record("model.total_exits", total_exits);
        let throughput = if elapsed > 0.0 { total_exits / elapsed } else { 0.0 };
        self.outputs.record("model.throughput", throughput);
        let cycle: f64 = {
            let mut weighted = 0.0;
            let mut exits = 0.0;
            for (_, v) in self.variants.iter() {
                let e = *v.exit_replications().last().unwrap_or(&0.0);
                let c = *v.cycle_time_replications().last().unwrap_or(&0.0);
                weighted += e * c;
                exits += e;
            }
            if exits > 0.0 {
                weighted / exits
            } else {
                0.0
            }
        };
        self.outputs.record("model.cycle_time", cycle);
        let wip: f64 = self
            .variants
            .iter()
            .map(|(_, v)| *v.wip_replications().last().unwrap_or(&0.0))
            .sum();
        self.outputs.record("model.wip", wip);

        let replication = self.replication;
        self.signals.replication_finalized.fire(&replication);
        tracing::debug!(replication, "replication finalized");
    }

    fn flush_node_outputs(&mut self, node: NodeKey, elapsed: SimTime) {
        let now = self.clock;
        let name = self.nodes[node].name.clone();
        let capacity = self.nodes[node].max_occupation();
        let n = &self.nodes[node];
        let base = &n.base;
        let mut values: Vec<(&'static str, f64)> = vec![
            ("entries", base.enter.entries as f64),
            ("exits", base.exit.exits as f64),
            ("throughput", base.exit.throughput(elapsed)),
            ("cycle_time", base.exit.cycle_time_per_exit()),
            ("waiting_time", base.waiting_time),
            ("working_time", base.working_time),
            ("travelling_time", base.travelling_time),
            ("blocked_time", base.blocked_time),
            ("setup_time", base.setup_time),
            ("waiting_for_resource_time", base.waiting_for_resource_time),
            ("failed_time", base.failed_time),
            ("unplanned_time", base.unplanned_time),
            ("paused_time", base.paused_time),
            ("empty_time", base.empty_time_at(now)),
        ];
        if capacity != usize::MAX && capacity > 0 {
            values.push(("relative_occupation", base.relative_occupation(elapsed, capacity)));
        }
        if base.max_occupied > 0 || base.min_occupied != usize::MAX {
            let min = if base.min_occupied == usize::MAX {
                0
            } else {
                base.min_occupied
            };
            values.push(("min_occupation", min as f64));
            values.push(("max_occupation", base.max_occupied as f64));
        }
        if self.shifting_bottleneck_detection {
            values.push(("sole_bottleneck", base.bottleneck.sole));
            values.push(("shifting_bottleneck", base.bottleneck.shifting));
            values.push(("total_bottleneck", base.bottleneck.total()));
        }
        for (metric, value) in values {
            self.outputs.record(format!("{name}.{metric}"), value);
        }
    }

    // -----------------------------------------------------------------------
    // Shifting bottlenecks
    // -----------------------------------------------------------------------

    /// End-of-run attribution into the nodes' permanent totals.
    fn apply_bottleneck_totals(&mut self) {
        let totals = self.bottleneck_ledger.calculate_final();
        let mut best: Option<(NodeKey, f64)> = None;
        for (node, share) in totals {
            let base = &mut self.nodes[node].base;
            base.bottleneck.sole += share.sole;
            base.bottleneck.shifting += share.shifting;
            let total = base.bottleneck.total();
            if best.map_or(true, |(_, t)| total > t) {
                best = Some((node, total));
            }
        }
        self.reported_bottleneck = best.map(|(node, _)| node);
    }

    /// Online recomputation; callable mid-run for intermediate results.
    pub fn calculate_shifting_bottlenecks(&mut self) {
        let now = self.clock;
        let node_keys: Vec<NodeKey> = self.nodes.keys().collect();
        for node in node_keys.iter().copied() {
            if self.nodes[node].base.active {
                let start = self.nodes[node].base.start_active_period;
                self.bottleneck_ledger.add(node, start, now, true);
            }
        }
        let (permanent, provisional) = self.bottleneck_ledger.calculate_online();
        for (node, share) in permanent {
            let base = &mut self.nodes[node].base;
            base.bottleneck.sole += share.sole;
            base.bottleneck.shifting += share.shifting;
        }
        let mut best: Option<(NodeKey, f64)> = None;
        for node in node_keys {
            let base = &mut self.nodes[node].base;
            let extra = provisional
                .get(&node)
                .copied()
                .unwrap_or_default();
            base.tmp_bottleneck.sole = extra.sole;
            base.tmp_bottleneck.shifting = extra.shifting;
            let total = base.bottleneck.total() + extra.total();
            if total > 0.0 && best.map_or(true, |(_, t)| total > t) {
                best = Some((node, total));
            }
        }
        self.reported_bottleneck = best.map(|(node, _)| node);
    }

    /// The node with the largest sole + shifting bottleneck total.
    pub fn bottleneck(&self) -> Option<NodeKey> {
        self.reported_bottleneck
    }

    // -----------------------------------------------------------------------
    // Run
    // -----------------------------------------------------------------------

    /// Run every configured replication to the horizon.
    pub fn run(&mut self) {
        for replication in 0..self.replications {
            self.replication = replication;
            self.init();
            loop {
                let Some(next) = self.queue.peek() else {
                    break;
                };
                let time = self.queue.get(next).expect("peeked event exists").time;
                if time > self.horizon {
                    break;
                }
                match self.simulate_step() {
                    Step::More => continue,
                    Step::End | Step::Stopped => break,
                    Step::Breakpoint => continue,
                }
            }
            self.finalize();
            if self.canceled {
                break;
            }
        }
    }

    /// The enter port of a node, for inspection in tests and tools.
    pub fn enter_port(&self, node: NodeKey) -> &EnterPort {
        &self.nodes[node].base.enter
    }
}

/// Convenience constructors used across the crate's tests.
impl Simulation {
    /// A fixed-variant source shorthand.
    pub fn add_fixed_source(&mut self, name: impl Into<String>, variant: VariantKey) -> NodeKey {
        self.add_source(name, VariantCreator::Fixed(variant))
    }

    /// Require skills on a node for a purpose.
    pub fn require_skills(
        &mut self,
        node: NodeKey,
        purpose: ResourcePurpose,
        priority: i32,
        skills: Vec<SkillId>,
    ) {
        let nr = crate::resource::NodeResource::new(purpose, priority, skills);
        let base = &mut self.nodes[node].base;
        match purpose {
            ResourcePurpose::Processing => base.processing_resource = Some(nr),
            ResourcePurpose::Repair => base.repair_resource = Some(nr),
            ResourcePurpose::Setup => base.setup_resource = Some(nr),
        }
    }
}
