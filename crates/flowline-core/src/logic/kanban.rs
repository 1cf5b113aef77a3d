//! Kanban logic: per-variant WIP caps over a region.
//!
//! The logic gates the region's entrance nodes and observes its exit
//! nodes. Admission is denied for a variant once its cap is reached;
//! every exit frees a card and retries the entrances' block lists.

use crate::id::{EntityKey, LogicKey, NodeKey, VariantKey};
use crate::logic::LogicKind;
use crate::sim::Simulation;
use crate::time::SimTime;

/// Cap and count for one variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KanbanItem {
    pub variant: VariantKey,
    pub limit: u32,
    pub count: u32,
    /// Integral of count over time, for the WIP output.
    pub wip_integral: f64,
    pub last_change: SimTime,
}

/// The kanban enter logic.
#[derive(Debug, Default)]
pub struct Kanban {
    pub items: Vec<KanbanItem>,
    /// Nodes whose admission this logic gates.
    pub entrances: Vec<NodeKey>,
    /// Entities currently inside the region.
    pub inside: Vec<EntityKey>,
}

impl Kanban {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_variant_limit(&mut self, variant: VariantKey, limit: u32) {
        self.items.push(KanbanItem {
            variant,
            limit,
            count: 0,
            wip_integral: 0.0,
            last_change: 0.0,
        });
    }

    fn item_mut(&mut self, variant: VariantKey) -> Option<&mut KanbanItem> {
        self.items.iter_mut().find(|i| i.variant == variant)
    }

    pub fn init(&mut self) {
        self.inside.clear();
        for item in &mut self.items {
            item.count = 0;
            item.wip_integral = 0.0;
            item.last_change = 0.0;
        }
    }
}

impl Simulation {
    pub(crate) fn kanban_mut(&mut self, logic: LogicKey) -> &mut Kanban {
        match &mut self.logics[logic].kind {
            LogicKind::Kanban(k) => k,
            other => panic!("logic is not a Kanban: {}", other.kind_name()),
        }
    }

    pub(crate) fn kanban_ref(&self, logic: LogicKey) -> &Kanban {
        match &self.logics[logic].kind {
            LogicKind::Kanban(k) => k,
            other => panic!("logic is not a Kanban: {}", other.kind_name()),
        }
    }

    pub(crate) fn kanban_allow_enter(&mut self, logic: LogicKey, entity: EntityKey) -> bool {
        let variant = self.entities[entity].variant;
        match self
            .kanban_ref(logic)
            .items
            .iter()
            .find(|i| i.variant == variant)
        {
            Some(item) => item.count < item.limit,
            // Variants without a cap are not kanban-controlled.
            None => true,
        }
    }

    pub(crate) fn kanban_on_entered(&mut self, logic: LogicKey, node: NodeKey, entity: EntityKey) {
        if !self.kanban_ref(logic).entrances.contains(&node) {
            return;
        }
        let now = self.clock;
        let variant = self.entities[entity].variant;
        let kanban = self.kanban_mut(logic);
        if kanban.inside.contains(&entity) {
            return;
        }
        kanban.inside.push(entity);
        if let Some(item) = kanban.item_mut(variant) {
            item.wip_integral += item.count as f64 * (now - item.last_change);
            item.last_change = now;
            item.count += 1;
        }
    }

    pub(crate) fn kanban_on_exited(&mut self, logic: LogicKey, _node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        let variant = self.entities[entity].variant;
        let freed = {
            let kanban = self.kanban_mut(logic);
            let was_inside = kanban.inside.contains(&entity);
            kanban.inside.retain(|&e| e != entity);
            if was_inside {
                if let Some(item) = kanban.item_mut(variant) {
                    item.wip_integral += item.count as f64 * (now - item.last_change);
                    item.last_change = now;
                    item.count = item.count.saturating_sub(1);
                }
            }
            was_inside
        };
        if freed {
            // A card came free: blocked entities at the entrances retry.
            let entrances = self.kanban_ref(logic).entrances.clone();
            for entrance in entrances {
                self.check_forward_blocking(entrance);
            }
        }
    }

    pub(crate) fn kanban_entity_deleted(&mut self, logic: LogicKey, entity: EntityKey) {
        if !self.kanban_ref(logic).inside.contains(&entity) {
            return;
        }
        match self.kanban_ref(logic).entrances.first().copied() {
            Some(node) => self.kanban_on_exited(logic, node, entity),
            None => self.kanban_mut(logic).inside.retain(|&e| e != entity),
        }
    }

    /// Average WIP of the region over the elapsed statistics window.
    pub fn kanban_wip(&self, logic: LogicKey, variant: Option<VariantKey>) -> f64 {
        let elapsed = self.elapsed_time();
        if elapsed <= 0.0 {
            return 0.0;
        }
        let now = self.clock;
        self.kanban_ref(logic)
            .items
            .iter()
            .filter(|i| variant.is_none() || variant == Some(i.variant))
            .map(|i| (i.wip_integral + i.count as f64 * (now - i.last_change)) / elapsed)
            .sum()
    }

    pub(crate) fn kanban_finalize(&mut self, logic: LogicKey, name: &str) {
        let wip = self.kanban_wip(logic, None);
        self.outputs.record(format!("{name}.wip"), wip);
    }
}
