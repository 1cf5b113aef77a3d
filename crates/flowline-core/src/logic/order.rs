//! Order logic: admission by pending orders.
//!
//! Registered variants may only enter gated nodes while an order for them
//! is open; every admission consumes one unit of the order. Orders are
//! placed by facade re-order rules (or directly). The order position also
//! provides the priority used by the Order dispatch rule.

use crate::id::{EntityKey, LogicKey, NodeKey, VariantKey};
use crate::logic::LogicKind;
use crate::sim::Simulation;

/// One open order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderItem {
    /// The node the ordered material is destined for.
    pub node: NodeKey,
    pub variant: VariantKey,
    pub quantity: u32,
    pub filled: u32,
}

/// The order enter logic.
#[derive(Debug, Default)]
pub struct Order {
    pub registered: Vec<VariantKey>,
    pub orders: Vec<OrderItem>,
    pub entrances: Vec<NodeKey>,
    pub placed: u32,
    pub consumed: u32,
}

impl Order {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_variant(&mut self, variant: VariantKey) {
        if !self.registered.contains(&variant) {
            self.registered.push(variant);
        }
    }

    pub fn init(&mut self) {
        self.orders.clear();
        self.placed = 0;
        self.consumed = 0;
    }
}

impl Simulation {
    pub(crate) fn order_mut(&mut self, logic: LogicKey) -> &mut Order {
        match &mut self.logics[logic].kind {
            LogicKind::Order(o) => o,
            other => panic!("logic is not an Order: {}", other.kind_name()),
        }
    }

    pub(crate) fn order_ref(&self, logic: LogicKey) -> &Order {
        match &self.logics[logic].kind {
            LogicKind::Order(o) => o,
            other => panic!("logic is not an Order: {}", other.kind_name()),
        }
    }

    /// Place an order; blocked material at the entrances may now enter.
    pub fn place_order(
        &mut self,
        logic: LogicKey,
        node: NodeKey,
        variant: VariantKey,
        quantity: u32,
    ) {
        if quantity == 0 {
            return;
        }
        {
            let order = self.order_mut(logic);
            order.orders.push(OrderItem {
                node,
                variant,
                quantity,
                filled: 0,
            });
            order.placed += 1;
        }
        tracing::debug!(variant = ?variant, quantity, "order placed");
        let entrances = self.order_ref(logic).entrances.clone();
        for entrance in entrances {
            self.check_forward_blocking(entrance);
        }
    }

    pub(crate) fn order_allow_enter(
        &mut self,
        logic: LogicKey,
        _node: NodeKey,
        entity: EntityKey,
    ) -> bool {
        let variant = self.entities[entity].variant;
        let order = self.order_ref(logic);
        if !order.registered.contains(&variant) {
            return true;
        }
        order
            .orders
            .iter()
            .any(|o| o.variant == variant && o.filled < o.quantity)
    }

    pub(crate) fn order_on_entered(&mut self, logic: LogicKey, _node: NodeKey, entity: EntityKey) {
        let variant = self.entities[entity].variant;
        let order = self.order_mut(logic);
        if !order.registered.contains(&variant) {
            return;
        }
        if let Some(open) = order
            .orders
            .iter_mut()
            .find(|o| o.variant == variant && o.filled < o.quantity)
        {
            open.filled += 1;
            order.consumed += 1;
        }
        order.orders.retain(|o| o.filled < o.quantity);
    }

    /// The priority the Order dispatch rule sorts by: the position of the
    /// oldest open order for the entity's variant; entities without an
    /// open order sort last.
    pub(crate) fn order_priority(&self, logic: LogicKey, entity: EntityKey) -> f64 {
        let variant = self.entities[entity].variant;
        let order = self.order_ref(logic);
        if !order.registered.contains(&variant) {
            return f64::MAX;
        }
        order
            .orders
            .iter()
            .position(|o| o.variant == variant && o.filled < o.quantity)
            .map(|p| p as f64)
            .unwrap_or(f64::MAX)
    }
}
