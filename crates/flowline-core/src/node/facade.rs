//! Facades: sub-model boundary nodes that place re-orders.
//!
//! A facade passes entities through unbounded and tracks a per-variant
//! stock level. When an exit pushes the inventory position (stock plus
//! outstanding orders) to or below the order point, the facade places a
//! replenishment order of `order_quantity` with the attached order logic;
//! an arriving entity both raises the stock and retires one outstanding
//! unit, so one shortfall places exactly one order.

use crate::event::priority;
use crate::id::{EntityKey, LogicKey, NodeKey, VariantKey};
use crate::node::NodeKind;
use crate::sim::Simulation;

/// One re-order rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FacadeOrderItem {
    pub variant: VariantKey,
    pub order_point: i32,
    pub order_quantity: u32,
    /// Entities of the variant currently at or past the facade.
    pub level: i32,
    /// Replenishment placed but not yet arrived.
    pub on_order: i32,
}

/// The boundary node.
#[derive(Debug, Default)]
pub struct Facade {
    pub contents: Vec<EntityKey>,
    pub orders: Vec<FacadeOrderItem>,
    /// The order logic that receives placed orders.
    pub order_logic: Option<LogicKey>,
    pub max_occupied: usize,
}

impl Facade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_size(&self) -> usize {
        self.contents.len()
    }

    pub fn add_order(&mut self, variant: VariantKey, order_point: i32, order_quantity: u32) {
        self.orders.push(FacadeOrderItem {
            variant,
            order_point,
            order_quantity,
            level: 0,
            on_order: 0,
        });
    }

    pub fn init(&mut self) {
        self.contents.clear();
        self.max_occupied = 0;
        for item in &mut self.orders {
            item.level = 0;
            item.on_order = 0;
        }
    }
}

impl Simulation {
    pub(crate) fn facade_mut(&mut self, node: NodeKey) -> &mut Facade {
        match &mut self.nodes[node].kind {
            NodeKind::Facade(f) => f,
            other => panic!("node is not a Facade: {}", other.kind_name()),
        }
    }

    /// Kind hook: an entity entered the facade.
    pub(crate) fn facade_enter(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        let variant = self.entities[entity].variant;
        {
            let facade = self.facade_mut(node);
            facade.contents.push(entity);
            facade.max_occupied = facade.max_occupied.max(facade.contents.len());
            if let Some(item) = facade.orders.iter_mut().find(|o| o.variant == variant) {
                item.level += 1;
                // An arrival retires one outstanding unit.
                item.on_order = (item.on_order - 1).max(0);
            }
        }
        self.nodes[node].base.set_end_empty(now);
        let dt = self.draw_process_time(node, entity);
        self.schedule_event_out(node, entity, dt, priority::OUT);
    }

    /// Kind hook: an entity left; re-order when the level dips to the
    /// order point.
    pub(crate) fn facade_leave(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        let variant = self.entities[entity].variant;
        let (reorder, logic) = {
            let facade = self.facade_mut(node);
            facade.contents.retain(|&e| e != entity);
            let logic = facade.order_logic;
            let mut reorder = None;
            if let Some(item) = facade.orders.iter_mut().find(|o| o.variant == variant) {
                item.level -= 1;
                if item.level + item.on_order <= item.order_point {
                    reorder = Some((item.variant, item.order_quantity));
                    item.on_order += item.order_quantity as i32;
                }
            }
            (reorder, logic)
        };
        if let (Some((variant, quantity)), Some(logic)) = (reorder, logic) {
            self.place_order(logic, node, variant, quantity);
        }
        if self.facade_mut(node).contents.is_empty() {
            self.set_waiting(node);
            self.nodes[node].base.set_start_empty(now);
        }
    }
}
