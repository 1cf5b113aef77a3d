//! Enter and exit ports: per-node admission and dispatch endpoints.
//!
//! The port structs own the block lists and out-event bookkeeping; the
//! admission and movement protocol that ties them together runs on the
//! simulation (see `sim`), which owns every arena the protocol touches.

use crate::dispatch::DispatchRule;
use crate::id::{EntityKey, EventKey, LogicKey, NodeKey, VariantKey};
use crate::movestrategy::MoveController;
use crate::time::SimTime;

/// An entry on a forward-block list. The sort key fields are captured when
/// the item is created; a later change of successor order does not re-sort
/// existing items.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockItem {
    pub entity: EntityKey,
    /// Time the entity was first denied admission.
    pub time: SimTime,
    /// Position of this port's node among the entity's candidates.
    pub successor_order: i32,
    /// Insertion sequence; the final tie-break.
    pub seq: u64,
}

/// Admission endpoint of a node.
#[derive(Debug)]
pub struct EnterPort {
    /// False closes the node to new entities regardless of capacity.
    pub open: bool,
    /// True admits entities even when the node is full.
    pub ignore_full: bool,
    /// Entities admitted since the last statistics reset.
    pub entries: u32,
    /// Entities waiting for admission, in blocked order.
    pub forward_blocking: Vec<BlockItem>,
    next_block_seq: u64,
    /// Enter logics consulted on admission; a variant of `None` applies to
    /// every variant.
    pub logics: Vec<(LogicKey, Option<VariantKey>)>,
    /// Rule ordering the block list before unblock scheduling.
    pub dispatcher: DispatchRule,
    /// Order logic used by the Order dispatch rule.
    pub order: Option<LogicKey>,
    /// The unblocked out event currently in flight from this port's block
    /// list, if any. Only one is scheduled per variant at a time.
    pub block_list_out: Option<EventKey>,
    /// Sorted snapshot being drained by unblock scheduling.
    pub block_list: Vec<EntityKey>,
    /// Resume position within the snapshot.
    pub block_list_pos: usize,
    /// Variants already given their one out event this round.
    pub attempted_variants: Vec<VariantKey>,
    /// Variant of the last admitted entity.
    pub last_variant: Option<VariantKey>,
    /// Assembly identity of the last admitted entity.
    pub last_assembly_identity: Option<EntityKey>,
    /// Declared predecessors per variant (`None` = any variant).
    pub predecessors: Vec<(Option<VariantKey>, NodeKey)>,
}

impl Default for EnterPort {
    fn default() -> Self {
        Self::new()
    }
}

impl EnterPort {
    pub fn new() -> Self {
        Self {
            open: true,
            ignore_full: false,
            entries: 0,
            forward_blocking: Vec::new(),
            next_block_seq: 0,
            logics: Vec::new(),
            dispatcher: DispatchRule::Fifo,
            order: None,
            block_list_out: None,
            block_list: Vec::new(),
            block_list_pos: 0,
            attempted_variants: Vec::new(),
            last_variant: None,
            last_assembly_identity: None,
            predecessors: Vec::new(),
        }
    }

    /// Append an entity to the forward-block list, keeping the list sorted
    /// by (blocked time, successor order, sequence).
    pub fn add_forward_blocking(
        &mut self,
        entity: EntityKey,
        time: SimTime,
        successor_order: i32,
    ) {
        if self.forward_blocking.iter().any(|i| i.entity == entity) {
            return;
        }
        let item = BlockItem {
            entity,
            time,
            successor_order,
            seq: self.next_block_seq,
        };
        self.next_block_seq += 1;
        let at = self
            .forward_blocking
            .partition_point(|other| block_item_le(other, &item));
        self.forward_blocking.insert(at, item);
    }

    pub fn remove_forward_blocking(&mut self, entity: EntityKey) {
        self.forward_blocking.retain(|i| i.entity != entity);
        self.block_list.retain(|&e| e != entity);
    }

    pub fn num_entities_on_block_list(&self) -> usize {
        self.forward_blocking.len()
    }

    pub fn add_enter_logic(&mut self, logic: LogicKey, variant: Option<VariantKey>) {
        self.logics.push((logic, variant));
    }

    pub fn add_predecessor(&mut self, node: NodeKey, variant: Option<VariantKey>) {
        self.predecessors.push((variant, node));
    }

    pub fn predecessors_for(&self, variant: VariantKey) -> Vec<NodeKey> {
        self.predecessors
            .iter()
            .filter(|(v, _)| v.is_none() || *v == Some(variant))
            .map(|(_, n)| *n)
            .collect()
    }

    pub fn entry(&mut self) {
        self.entries += 1;
    }

    pub fn reset_stats(&mut self) {
        self.entries = 0;
    }

    pub fn init(&mut self) {
        self.entries = 0;
        self.forward_blocking.clear();
        self.next_block_seq = 0;
        self.block_list_out = None;
        self.block_list.clear();
        self.block_list_pos = 0;
        self.attempted_variants.clear();
        self.last_variant = None;
        self.last_assembly_identity = None;
        self.open = true;
    }
}

fn block_item_le(a: &BlockItem, b: &BlockItem) -> bool {
    if a.time != b.time {
        return a.time < b.time;
    }
    (a.successor_order, a.seq) <= (b.successor_order, b.seq)
}

/// A canceled out event awaiting resume, with the processing time that was
/// still outstanding when it was canceled.
#[derive(Debug, Clone, Copy)]
pub struct CanceledOut {
    pub event: EventKey,
    pub remaining: SimTime,
}

/// Dispatch endpoint of a node.
#[derive(Debug)]
pub struct ExitPort {
    /// Picks the next destination for exiting entities.
    pub controller: MoveController,
    /// Entities that have left since the last statistics reset.
    pub exits: u32,
    /// Total time exited entities spent on the node.
    pub cycle_time: SimTime,
    /// Out events currently scheduled from this node.
    pub out_events: Vec<EventKey>,
    /// Out events canceled while the node was not operational.
    pub canceled_out: Vec<CanceledOut>,
    /// Entities denied exit by an exit logic.
    pub exit_blocking: Vec<EntityKey>,
    /// Exit logics that can hold entities on the node.
    pub logics: Vec<LogicKey>,
    /// Whether a resumed out event is delayed by the elapsed downtime.
    pub add_elapsed_time: bool,
}

impl ExitPort {
    pub fn new(controller: MoveController) -> Self {
        Self {
            controller,
            exits: 0,
            cycle_time: 0.0,
            out_events: Vec::new(),
            canceled_out: Vec::new(),
            exit_blocking: Vec::new(),
            logics: Vec::new(),
            add_elapsed_time: true,
        }
    }

    /// Record an exit and the entity's time on the node.
    pub fn exit(&mut self, time_on_node: SimTime) {
        self.exits += 1;
        self.cycle_time += time_on_node;
    }

    /// Exits per second over `elapsed`; zero for an empty window.
    pub fn throughput(&self, elapsed: SimTime) -> f64 {
        if elapsed <= 0.0 {
            0.0
        } else {
            self.exits as f64 / elapsed
        }
    }

    /// Average time on node per exit; zero before the first exit.
    pub fn cycle_time_per_exit(&self) -> SimTime {
        if self.exits == 0 {
            0.0
        } else {
            self.cycle_time / self.exits as f64
        }
    }

    pub fn add_exit_logic(&mut self, logic: LogicKey) {
        self.logics.push(logic);
    }

    pub fn add_exit_blocking(&mut self, entity: EntityKey) {
        if !self.exit_blocking.contains(&entity) {
            self.exit_blocking.push(entity);
        }
    }

    pub fn remove_exit_blocking(&mut self, entity: EntityKey) {
        self.exit_blocking.retain(|&e| e != entity);
    }

    pub fn remove_event_out(&mut self, event: EventKey) {
        self.out_events.retain(|&e| e != event);
        self.canceled_out.retain(|c| c.event != event);
    }

    pub fn have_scheduled_out_events(&self) -> bool {
        !self.out_events.is_empty()
    }

    pub fn reset_stats(&mut self) {
        self.exits = 0;
        self.cycle_time = 0.0;
    }

    pub fn init(&mut self) {
        self.exits = 0;
        self.cycle_time = 0.0;
        self.out_events.clear();
        self.canceled_out.clear();
        self.exit_blocking.clear();
        self.controller.init();
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movestrategy::MoveStrategy;
    use slotmap::SlotMap;

    fn entity_keys(n: usize) -> Vec<EntityKey> {
        let mut arena: SlotMap<EntityKey, ()> = SlotMap::with_key();
        (0..n).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn block_list_sorted_by_time_then_order_then_seq() {
        let e = entity_keys(4);
        let mut port = EnterPort::new();
        port.add_forward_blocking(e[0], 5.0, 0);
        port.add_forward_blocking(e[1], 2.0, 7);
        port.add_forward_blocking(e[2], 5.0, 0);
        port.add_forward_blocking(e[3], 5.0, -1);
        let order: Vec<EntityKey> = port.forward_blocking.iter().map(|i| i.entity).collect();
        assert_eq!(order, vec![e[1], e[3], e[0], e[2]]);
    }

    #[test]
    fn duplicate_block_entries_are_ignored() {
        let e = entity_keys(1);
        let mut port = EnterPort::new();
        port.add_forward_blocking(e[0], 1.0, 0);
        port.add_forward_blocking(e[0], 2.0, 0);
        assert_eq!(port.num_entities_on_block_list(), 1);
    }

    #[test]
    fn remove_clears_both_lists() {
        let e = entity_keys(2);
        let mut port = EnterPort::new();
        port.add_forward_blocking(e[0], 1.0, 0);
        port.add_forward_blocking(e[1], 1.0, 1);
        port.block_list = vec![e[0], e[1]];
        port.remove_forward_blocking(e[0]);
        assert_eq!(port.num_entities_on_block_list(), 1);
        assert_eq!(port.block_list, vec![e[1]]);
    }

    #[test]
    fn predecessors_filter_by_variant() {
        let mut variants: SlotMap<VariantKey, ()> = SlotMap::with_key();
        let v1 = variants.insert(());
        let v2 = variants.insert(());
        let mut nodes: SlotMap<NodeKey, ()> = SlotMap::with_key();
        let a = nodes.insert(());
        let b = nodes.insert(());
        let mut port = EnterPort::new();
        port.add_predecessor(a, None);
        port.add_predecessor(b, Some(v1));
        assert_eq!(port.predecessors_for(v1), vec![a, b]);
        assert_eq!(port.predecessors_for(v2), vec![a]);
    }

    #[test]
    fn exit_port_statistics() {
        let mut port = ExitPort::new(MoveController::new(MoveStrategy::successor()));
        port.exit(4.0);
        port.exit(6.0);
        assert_eq!(port.exits, 2);
        assert_eq!(port.cycle_time_per_exit(), 5.0);
        assert_eq!(port.throughput(10.0), 0.2);
        port.reset_stats();
        assert_eq!(port.exits, 0);
        assert_eq!(port.throughput(10.0), 0.0);
    }
}
