//! Parallel operations: N internal operations behind one boundary.
//!
//! Entities are admitted through the parallel operation's enter port and
//! routed to a reserved internal operation; the reservation is made at
//! admission-check time so it survives the delay until the entity actually
//! arrives. Options gate the cycle: synchronized entries hold processing
//! until the cell is full or an entry timeout expires, synchronized exits
//! hold finished entities until every internal operation is done and
//! operational and then release them at the same instant, and the failure
//! zone option ties the internal operations' failures together.

use crate::event::{priority, EventKind};
use crate::gen::Generator;
use crate::id::{EntityKey, EventKey, NodeKey, VariantKey};
use crate::node::NodeKind;
use crate::sim::Simulation;

/// The coordinating boundary node.
#[derive(Debug)]
pub struct ParallelOperation {
    /// Internal operations, addressable by position.
    pub operations: Vec<NodeKey>,
    /// Entity -> reserved internal operation.
    pub reservations: Vec<(EntityKey, NodeKey)>,
    /// Allow different variants to process simultaneously.
    pub mixed_processing: bool,
    pub synchronize_entries: bool,
    pub synchronize_exits: bool,
    /// Propagate a failure on one internal operation to all of them.
    pub failure_zone: bool,
    pub entry_timeout: Option<Generator>,
    pub timeout_event: Option<EventKey>,
    /// True while a synchronized-entry cycle is processing.
    pub cycle_running: bool,
    /// The variant of the running cycle when mixed processing is off.
    pub current_variant: Option<VariantKey>,
    /// Entities released together by the synchronized-exit trigger.
    pub released: Vec<EntityKey>,
    pub trigger_event: Option<EventKey>,
}

impl ParallelOperation {
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
            reservations: Vec::new(),
            mixed_processing: true,
            synchronize_entries: false,
            synchronize_exits: false,
            failure_zone: false,
            entry_timeout: None,
            timeout_event: None,
            cycle_running: false,
            current_variant: None,
            released: Vec::new(),
            trigger_event: None,
        }
    }

    pub fn content_size(&self) -> usize {
        // Contents live on the internal operations; the coordinator only
        // tracks reservations not yet redeemed.
        self.reservations.len()
    }

    pub fn reserved_for(&self, entity: EntityKey) -> Option<NodeKey> {
        self.reservations
            .iter()
            .find(|(e, _)| *e == entity)
            .map(|(_, op)| *op)
    }

    pub fn init(&mut self) {
        self.reservations.clear();
        self.timeout_event = None;
        self.cycle_running = false;
        self.current_variant = None;
        self.released.clear();
        self.trigger_event = None;
        if let Some(g) = &mut self.entry_timeout {
            g.init();
        }
    }
}

impl Default for ParallelOperation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    pub(crate) fn parallel_mut(&mut self, node: NodeKey) -> &mut ParallelOperation {
        match &mut self.nodes[node].kind {
            NodeKind::Parallel(p) => p,
            other => panic!("node is not a ParallelOperation: {}", other.kind_name()),
        }
    }

    pub(crate) fn parallel_ref(&self, node: NodeKey) -> &ParallelOperation {
        match &self.nodes[node].kind {
            NodeKind::Parallel(p) => p,
            other => panic!("node is not a ParallelOperation: {}", other.kind_name()),
        }
    }

    /// Entities currently on the internal operations.
    pub(crate) fn parallel_content(&self, node: NodeKey) -> Vec<EntityKey> {
        self.parallel_ref(node)
            .operations
            .iter()
            .filter_map(|&op| self.operation_ref(op).current)
            .collect()
    }

    /// Whether admitted entities must hold until the cycle starts.
    pub(crate) fn parallel_holds_entries(&self, node: NodeKey) -> bool {
        let p = self.parallel_ref(node);
        p.synchronize_entries && !p.cycle_running
    }

    /// Kind openness: reserve a free internal operation, honoring the
    /// single-variant rule when mixed processing is off.
    pub(crate) fn parallel_is_open(&mut self, node: NodeKey, entity: EntityKey) -> bool {
        let variant = self.entities[entity].variant;
        if let Some(op) = self.parallel_ref(node).reserved_for(entity) {
            return self.operation_ref(op).current.is_none();
        }
        {
            let p = self.parallel_ref(node);
            if !p.mixed_processing {
                if let Some(current) = p.current_variant {
                    if current != variant {
                        return false;
                    }
                }
            }
            if p.synchronize_entries && p.cycle_running {
                // A running synchronized cycle admits nobody.
                return false;
            }
        }
        let free = {
            let ops = self.parallel_ref(node).operations.clone();
            ops.into_iter().find(|&op| {
                self.operation_ref(op).current.is_none()
                    && self.nodes[op].is_operational()
                    && !self
                        .parallel_ref(node)
                        .reservations
                        .iter()
                        .any(|(_, r)| *r == op)
            })
        };
        match free {
            Some(op) => {
                self.parallel_mut(node).reservations.push((entity, op));
                true
            }
            None => false,
        }
    }

    /// Kind hook: an admitted entity arrives and moves onto its reserved
    /// internal operation.
    pub(crate) fn parallel_enter(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        let variant = self.entities[entity].variant;
        let op = {
            let p = self.parallel_mut(node);
            let reserved = p
                .reservations
                .iter()
                .position(|(e, _)| *e == entity)
                .map(|i| p.reservations.remove(i).1);
            reserved
        }
        .or_else(|| {
            let ops = self.parallel_ref(node).operations.clone();
            ops.into_iter()
                .find(|&op| self.operation_ref(op).current.is_none())
        })
        .expect("parallel operation admitted an entity without a free internal operation");

        if !self.parallel_ref(node).mixed_processing {
            self.parallel_mut(node).current_variant = Some(variant);
        }
        self.nodes[node].base.set_end_empty(now);

        // The entity is located on the internal operation from here on.
        self.entities[entity].departure = Some(op);
        self.entities[entity].node_enter_time = now;
        self.touch_content(op);
        self.operation_enter(op, entity);
        self.note_content(op);

        if self.parallel_ref(node).synchronize_entries && !self.parallel_ref(node).cycle_running {
            let full = self
                .parallel_ref(node)
                .operations
                .iter()
                .all(|&op| self.operation_ref(op).current.is_some());
            if full {
                self.parallel_start_cycle(node);
            } else if self.parallel_ref(node).timeout_event.is_none() {
                // First entry opens the timeout window.
                let dt = {
                    let NodeKind::Parallel(p) = &mut self.nodes[node].kind else {
                        unreachable!()
                    };
                    match &mut p.entry_timeout {
                        Some(g) => g.next(&mut self.rng),
                        None => 0.0,
                    }
                };
                let evt = self
                    .queue
                    .create(EventKind::EntryTimeout { node }, priority::ENTRY_TIMEOUT);
                self.schedule(evt, dt);
                self.parallel_mut(node).timeout_event = Some(evt);
            }
        }
    }

    /// Start the processing cycle: every held entity begins work.
    pub(crate) fn parallel_start_cycle(&mut self, node: NodeKey) {
        if let Some(evt) = self.parallel_mut(node).timeout_event.take() {
            self.queue.cancel(evt);
        }
        self.parallel_mut(node).cycle_running = true;
        let ops = self.parallel_ref(node).operations.clone();
        for op in ops {
            if let Some(entity) = self.operation_ref(op).current {
                if !self.entities[entity].is_out_event_scheduled()
                    && !self.operation_ref(op).finished
                {
                    self.operation_begin(op, entity);
                }
            }
        }
    }

    /// Handle an `EntryTimeout` event: the cycle starts even if not full.
    pub(crate) fn process_entry_timeout(&mut self, node: NodeKey) {
        self.parallel_mut(node).timeout_event = None;
        if !self.parallel_ref(node).cycle_running {
            self.parallel_start_cycle(node);
        }
    }

    /// Exit gate for internal operations under synchronized exits.
    pub(crate) fn parallel_allow_leave(&mut self, parent: NodeKey, entity: EntityKey) -> bool {
        let p = self.parallel_ref(parent);
        if !p.synchronize_exits {
            return true;
        }
        if p.released.contains(&entity) {
            return true;
        }
        // Mark this entity finished; release happens via the trigger.
        if let Some(op) = self.entities[entity].departure {
            self.operation_mut(op).finished = true;
        }
        self.parallel_try_trigger_exits(parent);
        false
    }

    /// Schedule the synchronized release when every occupied internal
    /// operation has finished and all are operational.
    pub(crate) fn parallel_try_trigger_exits(&mut self, node: NodeKey) {
        if self.parallel_ref(node).trigger_event.is_some() {
            return;
        }
        let ops = self.parallel_ref(node).operations.clone();
        let mut any = false;
        for &op in &ops {
            if !self.nodes[op].is_operational() {
                return;
            }
            if let Some(_entity) = self.operation_ref(op).current {
                any = true;
                if !self.operation_ref(op).finished {
                    return;
                }
            }
        }
        if !any {
            return;
        }
        let evt = self.queue.create(
            EventKind::TriggerSynchronizedExits { node },
            priority::TRIGGER_SYNCHRONIZED_EXITS,
        );
        self.schedule(evt, 0.0);
        self.parallel_mut(node).trigger_event = Some(evt);
    }

    /// Handle the trigger: release all finished entities at this instant.
    pub(crate) fn process_trigger_synchronized_exits(&mut self, node: NodeKey) {
        self.parallel_mut(node).trigger_event = None;
        let ops = self.parallel_ref(node).operations.clone();
        let mut released = Vec::new();
        for op in ops {
            if let Some(entity) = self.operation_ref(op).current {
                if self.operation_ref(op).finished {
                    released.push((op, entity));
                }
            }
        }
        for &(_, entity) in &released {
            self.parallel_mut(node).released.push(entity);
        }
        for (op, entity) in released {
            self.schedule_event_out(op, entity, 0.0, priority::OUT_UNBLOCKED);
        }
    }

    /// An internal operation released its entity back into the flow.
    pub(crate) fn parallel_child_left(&mut self, node: NodeKey, _op: NodeKey, entity: EntityKey) {
        {
            let p = self.parallel_mut(node);
            p.released.retain(|&e| e != entity);
        }
        let busy = self
            .parallel_ref(node)
            .operations
            .iter()
            .any(|&op| self.operation_ref(op).current.is_some());
        if !busy {
            let now = self.clock;
            {
                let p = self.parallel_mut(node);
                p.cycle_running = false;
                p.current_variant = None;
            }
            self.set_waiting(node);
            self.nodes[node].base.set_start_empty(now);
        }
        // Freed capacity: blocked entities at the boundary may enter.
        self.check_forward_blocking(node);
    }
}
