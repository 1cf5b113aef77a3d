//! Disassembly stations: splitting composites back into parts.
//!
//! The station admits one composite, holds it for its process time, then
//! detaches the parts (one level or recursively) and routes every released
//! entity out individually. Output routing normally uses the per-entity
//! sequence strategy so consecutive parts spread over the successors.

use crate::entity::collect_parts;
use crate::event::{priority, EventKind};
use crate::id::{EntityKey, EventKey, NodeKey};
use crate::node::NodeKind;
use crate::sim::Simulation;

/// The composite-splitting node.
#[derive(Debug, Default)]
pub struct Disassembly {
    /// Detach nested composites too.
    pub recursive: bool,
    /// Process entities without parts instead of passing them through.
    pub process_empty: bool,
    /// The composite currently being taken apart.
    pub entered: Option<EntityKey>,
    /// Released entities awaiting their exit.
    pub pending_exit: Vec<EntityKey>,
    pub disassemble_event: Option<EventKey>,
}

impl Disassembly {
    pub fn new(recursive: bool) -> Self {
        Self {
            recursive,
            ..Self::default()
        }
    }

    pub fn content_size(&self) -> usize {
        usize::from(self.entered.is_some()) + self.pending_exit.len()
    }

    pub fn max_occupation(&self) -> usize {
        self.content_size().max(1)
    }

    pub fn init(&mut self) {
        self.entered = None;
        self.pending_exit.clear();
        self.disassemble_event = None;
    }
}

impl Simulation {
    pub(crate) fn disassembly_mut(&mut self, node: NodeKey) -> &mut Disassembly {
        match &mut self.nodes[node].kind {
            NodeKind::Disassembly(d) => d,
            other => panic!("node is not a Disassembly: {}", other.kind_name()),
        }
    }

    /// Kind openness: one composite at a time, and nothing may still be
    /// draining.
    pub(crate) fn disassembly_is_open(&self, node: NodeKey) -> bool {
        let NodeKind::Disassembly(d) = &self.nodes[node].kind else {
            panic!("node is not a Disassembly");
        };
        d.entered.is_none() && d.pending_exit.is_empty()
    }

    /// Kind hook: a composite entered.
    pub(crate) fn disassembly_enter(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        self.disassembly_mut(node).entered = Some(entity);
        self.nodes[node].base.set_end_empty(now);

        if self.entities[entity].parts.is_empty() && !self.disassembly_ref(node).process_empty {
            // Nothing to split: pass straight through.
            self.set_working(node);
            let dt = self.draw_process_time(node, entity);
            self.disassembly_mut(node).entered = None;
            self.disassembly_mut(node).pending_exit.push(entity);
            self.schedule_event_out(node, entity, dt, priority::OUT);
            return;
        }

        self.set_working(node);
        let dt = self.draw_process_time(node, entity);
        let evt = self
            .queue
            .create(EventKind::Disassemble { node, entity }, priority::DISASSEMBLY);
        self.schedule(evt, dt);
        self.disassembly_mut(node).disassemble_event = Some(evt);
    }

    fn disassembly_ref(&self, node: NodeKey) -> &Disassembly {
        match &self.nodes[node].kind {
            NodeKind::Disassembly(d) => d,
            other => panic!("node is not a Disassembly: {}", other.kind_name()),
        }
    }

    /// Handle a `Disassemble` event: detach the parts and schedule every
    /// released entity's exit.
    pub(crate) fn process_disassemble(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        self.disassembly_mut(node).disassemble_event = None;

        let recursive = self.disassembly_ref(node).recursive;
        let mut parts = Vec::new();
        collect_parts(&self.entities, entity, recursive, &mut parts);
        if recursive {
            for &part in &parts {
                self.entities[part].parts.clear();
            }
        }
        self.entities[entity].parts.retain(|p| !parts.contains(p));

        // Released parts become located entities again.
        for &part in &parts {
            let e = &mut self.entities[part];
            e.departure = Some(node);
            e.node_enter_time = now;
            e.assembly_identity = None;
        }

        self.touch_content(node);
        {
            let d = self.disassembly_mut(node);
            d.entered = None;
            d.pending_exit = parts.clone();
            d.pending_exit.push(entity);
        }
        self.note_content(node);

        // The container keeps its routing identity; parts spread per the
        // per-entity sequence strategy.
        self.schedule_event_out(node, entity, 0.0, priority::OUT);
        for part in parts {
            self.schedule_event_out(node, part, 0.0, priority::OUT);
        }
    }

    /// Kind hook: a released entity left the disassembly.
    pub(crate) fn disassembly_leave(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        let drained = {
            let d = self.disassembly_mut(node);
            d.pending_exit.retain(|&e| e != entity);
            d.pending_exit.is_empty() && d.entered.is_none()
        };
        if drained {
            self.set_waiting(node);
            self.nodes[node].base.set_start_empty(now);
        }
    }
}
