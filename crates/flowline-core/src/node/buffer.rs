//! Buffers: bounded FIFO storage.
//!
//! Every stored entity holds its own out event after the optional dwell
//! time. FIFO order is not enforced by the buffer itself: blocked peers
//! queue on the successors' forward-block lists, which are sorted by
//! blocked time and sequence, so earlier arrivals are always offered a
//! freed slot first.

use crate::event::priority;
use crate::id::{EntityKey, NodeKey};
use crate::node::NodeKind;
use crate::sim::Simulation;
use crate::time::SimTime;
use std::collections::VecDeque;

/// A FIFO queue node with bounded capacity.
#[derive(Debug)]
pub struct Buffer {
    pub max_size: usize,
    /// Contents in arrival order, with entry times.
    pub contents: VecDeque<(EntityKey, SimTime)>,
}

impl Buffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            contents: VecDeque::new(),
        }
    }

    pub fn content_size(&self) -> usize {
        self.contents.len()
    }

    pub fn is_full(&self) -> bool {
        self.contents.len() >= self.max_size
    }

    pub fn init(&mut self) {
        self.contents.clear();
    }
}

impl Simulation {
    pub(crate) fn buffer_mut(&mut self, node: NodeKey) -> &mut Buffer {
        match &mut self.nodes[node].kind {
            NodeKind::Buffer(b) => b,
            other => panic!("node is not a Buffer: {}", other.kind_name()),
        }
    }

    /// Kind hook: an entity entered the buffer.
    pub(crate) fn buffer_enter(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        self.buffer_mut(node).contents.push_back((entity, now));
        self.nodes[node].base.set_end_empty(now);
        let dt = self.draw_process_time(node, entity);
        self.schedule_event_out(node, entity, dt, priority::OUT);
    }

    /// Kind hook: an entity left the buffer.
    pub(crate) fn buffer_leave(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        let empty = {
            let buffer = self.buffer_mut(node);
            buffer.contents.retain(|(e, _)| *e != entity);
            buffer.contents.is_empty()
        };
        if empty {
            self.nodes[node].base.set_start_empty(now);
            self.set_waiting(node);
        }
    }
}
