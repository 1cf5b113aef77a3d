//! Sinks: entity consumption.
//!
//! A sink admits one entity at a time, holds it for its process time (zero
//! by default) and then removes it from the model, crediting the variant's
//! exit statistics.

use crate::event::priority;
use crate::id::{EntityKey, NodeKey};
use crate::node::NodeKind;
use crate::sim::Simulation;

/// The entity-consuming node.
#[derive(Debug, Default)]
pub struct Sink {
    pub current: Option<EntityKey>,
}

impl Sink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_size(&self) -> usize {
        usize::from(self.current.is_some())
    }

    pub fn init(&mut self) {
        self.current = None;
    }
}

impl Simulation {
    pub(crate) fn sink_mut(&mut self, node: NodeKey) -> &mut Sink {
        match &mut self.nodes[node].kind {
            NodeKind::Sink(s) => s,
            other => panic!("node is not a Sink: {}", other.kind_name()),
        }
    }

    /// Kind hook: an entity entered the sink.
    pub(crate) fn sink_enter(&mut self, node: NodeKey, entity: EntityKey) {
        self.sink_mut(node).current = Some(entity);
        self.set_working(node);
        let dt = self.draw_process_time(node, entity);
        self.schedule_event_out(node, entity, dt, priority::OUT);
    }

    /// Kind hook: the sink's out event fired; the entity leaves the model.
    pub(crate) fn sink_consume(&mut self, node: NodeKey, entity: EntityKey) {
        self.touch_content(node);
        self.sink_mut(node).current = None;
        let now = self.clock;
        {
            let base = &mut self.nodes[node].base;
            let time_on_node = now - self.entities[entity].node_enter_time;
            base.exit.exit(time_on_node);
        }
        self.note_content(node);
        self.set_waiting(node);
        self.nodes[node].base.set_start_empty(now);
        self.notify_exited(node, None, entity);
        self.model_exit(entity);
        // Space freed: predecessors blocked on the sink may retry.
        self.check_forward_blocking(node);
    }
}
