//! Stores: random-access storage with per-variant capacity limits.
//!
//! Unlike a buffer, every stored entity gets its own out event, so any
//! entity may leave as soon as a successor accepts it. Capacity limits can
//! additionally cap the count per variant.

use crate::event::priority;
use crate::id::{EntityKey, NodeKey, VariantKey};
use crate::node::NodeKind;
use crate::sim::Simulation;
use crate::time::SimTime;

/// A per-variant cap on store occupancy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityLimit {
    pub variant: VariantKey,
    pub limit: usize,
}

/// A random-access storage node.
#[derive(Debug)]
pub struct Store {
    pub max_size: usize,
    pub contents: Vec<(EntityKey, SimTime)>,
    pub capacity_limits: Vec<CapacityLimit>,
}

impl Store {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            contents: Vec::new(),
            capacity_limits: Vec::new(),
        }
    }

    pub fn content_size(&self) -> usize {
        self.contents.len()
    }

    pub fn is_full(&self) -> bool {
        self.contents.len() >= self.max_size
    }

    pub fn add_capacity_limit(&mut self, variant: VariantKey, limit: usize) {
        self.capacity_limits.push(CapacityLimit { variant, limit });
    }

    pub fn init(&mut self) {
        self.contents.clear();
    }
}

impl Simulation {
    pub(crate) fn store_mut(&mut self, node: NodeKey) -> &mut Store {
        match &mut self.nodes[node].kind {
            NodeKind::Store(s) => s,
            other => panic!("node is not a Store: {}", other.kind_name()),
        }
    }

    /// Kind openness: full store or exhausted per-variant limit denies.
    pub(crate) fn store_is_open(
        &mut self,
        node: NodeKey,
        entity: EntityKey,
        ignore_full: bool,
    ) -> bool {
        let variant = self.entities[entity].variant;
        let NodeKind::Store(store) = &self.nodes[node].kind else {
            panic!("node is not a Store");
        };
        if !ignore_full && store.is_full() {
            return false;
        }
        if let Some(limit) = store
            .capacity_limits
            .iter()
            .find(|l| l.variant == variant)
            .map(|l| l.limit)
        {
            let held = store
                .contents
                .iter()
                .filter(|(e, _)| self.entities[*e].variant == variant)
                .count();
            if held >= limit {
                return false;
            }
        }
        true
    }

    /// Kind hook: an entity entered the store.
    pub(crate) fn store_enter(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        self.store_mut(node).contents.push((entity, now));
        self.nodes[node].base.set_end_empty(now);
        let dt = self.draw_process_time(node, entity);
        self.schedule_event_out(node, entity, dt, priority::OUT);
        // Stores provide supply to demand logics observing them.
        self.notify_store_supply(node);
    }

    /// Kind hook: an entity left the store.
    pub(crate) fn store_leave(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        let empty = {
            let store = self.store_mut(node);
            store.contents.retain(|(e, _)| *e != entity);
            store.contents.is_empty()
        };
        if empty {
            self.nodes[node].base.set_start_empty(now);
            self.set_waiting(node);
        }
    }

    /// Number of stored entities of `variant` (supply answering demand
    /// queries).
    pub fn store_count(&self, node: NodeKey, variant: VariantKey) -> usize {
        let NodeKind::Store(store) = &self.nodes[node].kind else {
            return 0;
        };
        store
            .contents
            .iter()
            .filter(|(e, _)| self.entities[*e].variant == variant)
            .count()
    }
}
