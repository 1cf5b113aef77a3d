//! Operations: single-entity processing stations.
//!
//! An operation admits one entity, optionally performs a setup when the
//! variant changed since the last entity, acquires any required resources,
//! works for its process time and then releases the entity. Setups are
//! cancelable: when the node turns non-operational mid-setup the remaining
//! setup time is captured and restored on resume.

use crate::event::{priority, EventKind};
use crate::id::{EntityKey, EventKey, NodeKey};
use crate::node::NodeKind;
use crate::resource::ResourcePurpose;
use crate::sim::Simulation;
use crate::time::SimTime;

/// A single-capacity processing station.
#[derive(Debug, Default)]
pub struct Operation {
    pub current: Option<EntityKey>,
    pub enter_time: SimTime,
    pub setup_event: Option<EventKey>,
    pub setup_canceled: bool,
    pub remaining_setup: SimTime,
    /// True once processing finished and the entity only waits to exit.
    pub finished: bool,
    /// Set when this operation is internal to a parallel operation.
    pub parallel_parent: Option<NodeKey>,
    /// Position within the parent's internal operations.
    pub parallel_index: usize,
}

impl Operation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_size(&self) -> usize {
        usize::from(self.current.is_some())
    }

    pub fn init(&mut self) {
        self.current = None;
        self.enter_time = 0.0;
        self.setup_event = None;
        self.setup_canceled = false;
        self.remaining_setup = 0.0;
        self.finished = false;
    }
}

impl Simulation {
    pub(crate) fn operation_mut(&mut self, node: NodeKey) -> &mut Operation {
        match &mut self.nodes[node].kind {
            NodeKind::Operation(o) => o,
            other => panic!("node is not an Operation: {}", other.kind_name()),
        }
    }

    pub(crate) fn operation_ref(&self, node: NodeKey) -> &Operation {
        match &self.nodes[node].kind {
            NodeKind::Operation(o) => o,
            other => panic!("node is not an Operation: {}", other.kind_name()),
        }
    }

    /// Kind hook: an entity entered the operation.
    pub(crate) fn operation_enter(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        {
            let op = self.operation_mut(node);
            op.current = Some(entity);
            op.enter_time = now;
            op.finished = false;
        }
        self.nodes[node].base.set_end_empty(now);

        // Internal operations of a synchronizing parallel operation hold
        // until their parent starts the cycle.
        if let Some(parent) = self.operation_ref(node).parallel_parent {
            if self.parallel_holds_entries(parent) {
                self.set_waiting(node);
                return;
            }
        }
        self.operation_begin(node, entity);
    }

    /// Start setup or processing for the admitted entity.
    pub(crate) fn operation_begin(&mut self, node: NodeKey, entity: EntityKey) {
        if self.require_setup(node, entity) {
            if self.needs_resources(node, ResourcePurpose::Setup, entity) {
                self.schedule_request_resources(node, ResourcePurpose::Setup, Some(entity), None);
                return;
            }
            let time = self.draw_setup_time(node, entity);
            self.operation_do_setup(node, entity, time);
            return;
        }
        self.operation_start_processing(node, entity);
    }

    /// Begin the setup interval.
    pub(crate) fn operation_do_setup(&mut self, node: NodeKey, entity: EntityKey, time: SimTime) {
        self.set_setup_state(node);
        let evt = self
            .queue
            .create(EventKind::SetupEnd { node, entity }, priority::SETUP);
        self.schedule(evt, time);
        self.operation_mut(node).setup_event = Some(evt);
    }

    /// Handle a `SetupEnd` event.
    pub(crate) fn process_setup_end(&mut self, node: NodeKey, entity: EntityKey) {
        self.operation_mut(node).setup_event = None;
        self.release_resources(node, ResourcePurpose::Setup, Some(entity));
        self.nodes[node].base.last_variant = Some(self.entities[entity].variant);
        self.operation_start_processing(node, entity);
    }

    /// Acquire processing resources if needed, then work.
    pub(crate) fn operation_start_processing(&mut self, node: NodeKey, entity: EntityKey) {
        if self.needs_resources(node, ResourcePurpose::Processing, entity) {
            self.schedule_request_resources(node, ResourcePurpose::Processing, Some(entity), None);
            return;
        }
        self.operation_work(node, entity);
    }

    /// Schedule the out event after the effective process time.
    pub(crate) fn operation_work(&mut self, node: NodeKey, entity: EntityKey) {
        self.set_working(node);
        let dt = self.draw_process_time(node, entity);
        self.schedule_event_out(node, entity, dt, priority::OUT);
    }

    /// Kind hook: an entity left the operation.
    pub(crate) fn operation_leave(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        {
            let op = self.operation_mut(node);
            op.current = None;
            op.finished = false;
        }
        self.release_resources(node, ResourcePurpose::Processing, Some(entity));
        self.nodes[node].base.last_variant = Some(self.entities[entity].variant);
        self.set_waiting(node);
        self.nodes[node].base.set_start_empty(now);
        if let Some(parent) = self.operation_ref(node).parallel_parent {
            self.parallel_child_left(parent, node, entity);
        }
    }

    /// True when processing the entity requires a setup first: a setup
    /// generator exists and the variant differs from the last one handled.
    pub(crate) fn require_setup(&self, node: NodeKey, entity: EntityKey) -> bool {
        let base = &self.nodes[node].base;
        if base.setup_time_gen.is_none() {
            return false;
        }
        let variant = self.entities[entity].variant;
        base.last_variant != Some(variant)
    }

    /// Cancel a running setup, capturing the remaining time.
    pub(crate) fn operation_cancel_setup(&mut self, node: NodeKey) {
        let now = self.clock;
        let Some(evt) = self.operation_ref(node).setup_event else {
            return;
        };
        if self.operation_ref(node).setup_canceled {
            return;
        }
        let remaining = (self.queue.get(evt).map(|r| r.time).unwrap_or(now) - now).max(0.0);
        self.queue.cancel(evt);
        let op = self.operation_mut(node);
        op.setup_canceled = true;
        op.remaining_setup = remaining;
    }

    /// Resume a canceled setup with its captured remaining time.
    pub(crate) fn operation_resume_setup(&mut self, node: NodeKey) {
        if !self.operation_ref(node).setup_canceled {
            return;
        }
        let (evt, remaining) = {
            let op = self.operation_mut(node);
            op.setup_canceled = false;
            (op.setup_event, op.remaining_setup)
        };
        if let Some(evt) = evt {
            let now = self.clock;
            self.queue.reschedule(evt, now, remaining);
            self.set_setup_state(node);
        }
    }
}
