//! Conveyors: length- and speed-based transport.
//!
//! Entities occupy belt length according to their variant's length (or
//! width, when not length oriented) and travel at the belt speed toward
//! the front. An accumulating belt lets trailing entities close up behind
//! a blocked head; a non-accumulating belt stops entirely. Positions are
//! held in millimeters and advanced lazily at every event touching the
//! belt, so stopping the belt freezes the remaining distances and resuming
//! converts them back to times at the current speed.

use crate::event::{priority, EventKind};
use crate::id::{EntityKey, EventKey, NodeKey};
use crate::node::NodeKind;
use crate::sim::Simulation;
use crate::time::SimTime;
use std::collections::VecDeque;

/// One entity on the belt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConveyorItem {
    pub entity: EntityKey,
    /// Head position in mm from the entry end.
    pub pos: f64,
    /// Occupied belt length in mm.
    pub len: f64,
    /// The head reached the front and could not exit.
    pub blocked: bool,
}

/// The transport node.
#[derive(Debug)]
pub struct Conveyor {
    /// Belt length in mm.
    pub length: f64,
    /// Belt speed in mm/s.
    pub speed: f64,
    pub accumulating: bool,
    /// Whether variant length (true) or width contributes to occupancy.
    pub length_oriented: bool,
    pub use_max_size: bool,
    pub max_size: usize,
    /// Items front (exit side) to back (entry side).
    pub items: VecDeque<ConveyorItem>,
    /// False while the whole belt is stopped (non-accumulating block or
    /// non-operational node).
    pub moving: bool,
    pub last_update: SimTime,
    pub update_event: Option<EventKey>,
    pub open_event: Option<EventKey>,
    /// Snapshot interval for animation events; `None` disables them.
    pub animation_interval: Option<f64>,
}

impl Conveyor {
    pub fn new(length: f64, speed: f64) -> Self {
        Self {
            length,
            speed,
            accumulating: true,
            length_oriented: true,
            use_max_size: false,
            max_size: 0,
            items: VecDeque::new(),
            moving: true,
            last_update: 0.0,
            update_event: None,
            open_event: None,
            animation_interval: None,
        }
    }

    pub fn content_size(&self) -> usize {
        self.items.len()
    }

    pub fn max_occupation(&self) -> usize {
        if self.use_max_size {
            self.max_size
        } else {
            usize::MAX
        }
    }

    /// Free belt behind the last item, in mm.
    pub fn entry_gap(&self) -> f64 {
        match self.items.back() {
            Some(last) => (last.pos - last.len).max(0.0),
            None => self.length,
        }
    }

    /// Occupied belt length in mm.
    pub fn occupied_length(&self) -> f64 {
        self.items.iter().map(|i| i.len).sum()
    }

    /// Advance item positions to `now`. The front item stops at the belt
    /// end; trailing items stop at their predecessor's tail when the belt
    /// accumulates.
    pub fn advance(&mut self, now: SimTime) {
        let dt = now - self.last_update;
        self.last_update = now;
        if dt <= 0.0 || !self.moving {
            return;
        }
        let dx = self.speed * dt;
        let mut limit = self.length;
        for item in self.items.iter_mut() {
            if !(item.blocked && !self.accumulating) {
                item.pos = (item.pos + dx).min(limit);
            }
            limit = item.pos - item.len;
        }
    }

    /// Time until the front item reaches the belt end, if it is moving.
    pub fn head_arrival(&self) -> Option<SimTime> {
        let head = self.items.front()?;
        if head.blocked || !self.moving || self.speed <= 0.0 {
            return None;
        }
        Some(((self.length - head.pos) / self.speed).max(0.0))
    }

    pub fn init(&mut self) {
        self.items.clear();
        self.moving = true;
        self.last_update = 0.0;
        self.update_event = None;
        self.open_event = None;
    }
}

impl Simulation {
    pub(crate) fn conveyor_mut(&mut self, node: NodeKey) -> &mut Conveyor {
        match &mut self.nodes[node].kind {
            NodeKind::Conveyor(c) => c,
            other => panic!("node is not a Conveyor: {}", other.kind_name()),
        }
    }

    pub(crate) fn conveyor_ref(&self, node: NodeKey) -> &Conveyor {
        match &self.nodes[node].kind {
            NodeKind::Conveyor(c) => c,
            other => panic!("node is not a Conveyor: {}", other.kind_name()),
        }
    }

    fn entity_belt_length(&self, node: NodeKey, entity: EntityKey) -> f64 {
        let variant = &self.variants[self.entities[entity].variant];
        if self.conveyor_ref(node).length_oriented {
            variant.length as f64
        } else {
            variant.width as f64
        }
    }

    /// Kind openness: the entry gap must fit the entity.
    pub(crate) fn conveyor_is_open(
        &mut self,
        node: NodeKey,
        entity: EntityKey,
        ignore_full: bool,
    ) -> bool {
        let now = self.clock;
        let len = self.entity_belt_length(node, entity);
        let (over_count, gap, moving, speed, open_pending) = {
            let conveyor = self.conveyor_mut(node);
            conveyor.advance(now);
            (
                conveyor.use_max_size && conveyor.items.len() >= conveyor.max_size,
                conveyor.entry_gap(),
                conveyor.moving,
                conveyor.speed,
                conveyor.open_event.is_some(),
            )
        };
        if over_count && !ignore_full {
            return false;
        }
        if gap + crate::time::TOLERANCE < len {
            // Let the belt report when the gap has grown enough.
            if moving && speed > 0.0 && !open_pending {
                let dt = (len - gap) / speed;
                let evt = self
                    .queue
                    .create(EventKind::OpenConveyor { node }, priority::CONVEYOR_OPEN);
                self.schedule(evt, dt);
                self.conveyor_mut(node).open_event = Some(evt);
            }
            return false;
        }
        true
    }

    /// Kind hook: an entity entered at the back of the belt.
    pub(crate) fn conveyor_enter(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        let len = self.entity_belt_length(node, entity);
        {
            let conveyor = self.conveyor_mut(node);
            conveyor.advance(now);
            conveyor.items.push_back(ConveyorItem {
                entity,
                pos: len,
                len,
                blocked: false,
            });
        }
        self.nodes[node].base.set_end_empty(now);
        self.set_travelling(node);
        self.conveyor_reschedule_update(node);
    }

    /// Keep exactly one update event: the front item's arrival at the
    /// belt end.
    pub(crate) fn conveyor_reschedule_update(&mut self, node: NodeKey) {
        if let Some(evt) = self.conveyor_mut(node).update_event.take() {
            self.queue.cancel(evt);
        }
        let Some((dt, head)) = ({
            let conveyor = self.conveyor_ref(node);
            conveyor
                .head_arrival()
                .map(|dt| (dt, conveyor.items.front().map(|i| i.entity)))
        }) else {
            return;
        };
        let Some(head) = head else { return };
        let evt = self.queue.create(
            EventKind::UpdateConveyor { node, entity: head },
            priority::UPDATE_CONVEYOR,
        );
        self.schedule(evt, dt);
        self.conveyor_mut(node).update_event = Some(evt);
    }

    /// Handle an `UpdateConveyor` event: the head reached the front and
    /// attempts to exit.
    pub(crate) fn process_update_conveyor(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        self.conveyor_mut(node).update_event = None;
        {
            let conveyor = self.conveyor_mut(node);
            conveyor.advance(now);
            if conveyor.items.front().map(|i| i.entity) != Some(entity) {
                return;
            }
        }
        self.schedule_event_out(node, entity, 0.0, priority::OUT);
    }

    /// Handle an `OpenConveyor` event: the entry gap may fit a blocked
    /// entity again.
    pub(crate) fn process_open_conveyor(&mut self, node: NodeKey) {
        let now = self.clock;
        {
            let conveyor = self.conveyor_mut(node);
            conveyor.open_event = None;
            conveyor.advance(now);
        }
        self.check_forward_blocking(node);
    }

    /// Kind hook: the head could not leave.
    pub(crate) fn conveyor_head_blocked(&mut self, node: NodeKey, entity: EntityKey) {
        let conveyor = self.conveyor_mut(node);
        if let Some(head) = conveyor.items.front_mut() {
            if head.entity == entity {
                head.blocked = true;
            }
        }
        if !conveyor.accumulating {
            // Any block stops the whole belt.
            let now = self.clock;
            let conveyor = self.conveyor_mut(node);
            conveyor.advance(now);
            conveyor.moving = false;
        }
        self.set_blocked(node);
    }

    /// Kind hook: an entity left the front of the belt.
    pub(crate) fn conveyor_leave(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        let empty = {
            let conveyor = self.conveyor_mut(node);
            conveyor.advance(now);
            conveyor.items.retain(|i| i.entity != entity);
            if !conveyor.accumulating && conveyor.items.iter().all(|i| !i.blocked) {
                conveyor.moving = true;
                conveyor.last_update = now;
            }
            conveyor.items.is_empty()
        };
        if empty {
            self.set_waiting(node);
            self.nodes[node].base.set_start_empty(now);
        } else {
            self.set_travelling(node);
        }
        self.conveyor_reschedule_update(node);
        // The tail moved up: entry space may have cleared.
        self.check_forward_blocking(node);
    }

    /// Stop the belt while non-operational; positions freeze, events are
    /// withdrawn with their remaining distances implicit in the frozen
    /// positions.
    pub(crate) fn conveyor_interrupt(&mut self, node: NodeKey) {
        let now = self.clock;
        let (update, open) = {
            let conveyor = self.conveyor_mut(node);
            conveyor.advance(now);
            conveyor.moving = false;
            (conveyor.update_event.take(), conveyor.open_event.take())
        };
        if let Some(evt) = update {
            self.queue.cancel(evt);
        }
        if let Some(evt) = open {
            self.queue.cancel(evt);
        }
    }

    /// Restart the belt; remaining distances become times at the current
    /// speed.
    pub(crate) fn conveyor_resume(&mut self, node: NodeKey) {
        let now = self.clock;
        {
            let conveyor = self.conveyor_mut(node);
            let any_hard_block = !conveyor.accumulating
                && conveyor.items.iter().any(|i| i.blocked);
            conveyor.moving = !any_hard_block;
            conveyor.last_update = now;
        }
        self.conveyor_reschedule_update(node);
        self.check_forward_blocking(node);
    }

    /// Periodic animation snapshot; reschedules itself.
    pub(crate) fn process_animate_conveyor(&mut self, node: NodeKey) {
        let now = self.clock;
        let Some(interval) = self.conveyor_ref(node).animation_interval else {
            return;
        };
        self.conveyor_mut(node).advance(now);
        let evt = self
            .queue
            .create(EventKind::AnimateConveyor { node }, priority::ANIMATE_CONVEYOR);
        self.schedule(evt, interval);
    }

    /// Content snapshot for observers: (entity, head position in mm).
    pub fn conveyor_state(&self, node: NodeKey) -> Vec<(EntityKey, f64)> {
        self.conveyor_ref(node)
            .items
            .iter()
            .map(|i| (i.entity, i.pos))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn items(n: usize) -> Vec<EntityKey> {
        let mut arena: SlotMap<EntityKey, ()> = SlotMap::with_key();
        (0..n).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn advance_moves_items_toward_front() {
        let e = items(1);
        let mut belt = Conveyor::new(1000.0, 100.0);
        belt.items.push_back(ConveyorItem {
            entity: e[0],
            pos: 200.0,
            len: 200.0,
            blocked: false,
        });
        belt.advance(3.0);
        assert_eq!(belt.items[0].pos, 500.0);
        assert_eq!(belt.head_arrival(), Some(5.0));
    }

    #[test]
    fn trailing_items_close_up_behind_blocked_head() {
        let e = items(2);
        let mut belt = Conveyor::new(1000.0, 100.0);
        belt.items.push_back(ConveyorItem {
            entity: e[0],
            pos: 1000.0,
            len: 300.0,
            blocked: true,
        });
        belt.items.push_back(ConveyorItem {
            entity: e[1],
            pos: 200.0,
            len: 200.0,
            blocked: false,
        });
        belt.advance(100.0);
        // The follower stops at the head's tail.
        assert_eq!(belt.items[1].pos, 700.0);
        assert_eq!(belt.entry_gap(), 500.0);
    }

    #[test]
    fn stopped_belt_freezes_positions() {
        let e = items(1);
        let mut belt = Conveyor::new(1000.0, 100.0);
        belt.items.push_back(ConveyorItem {
            entity: e[0],
            pos: 100.0,
            len: 100.0,
            blocked: false,
        });
        belt.advance(1.0);
        belt.moving = false;
        belt.advance(5.0);
        assert_eq!(belt.items[0].pos, 200.0);
        assert_eq!(belt.head_arrival(), None);
    }

    #[test]
    fn entry_gap_of_empty_belt_is_full_length() {
        let belt = Conveyor::new(800.0, 50.0);
        assert_eq!(belt.entry_gap(), 800.0);
        assert_eq!(belt.occupied_length(), 0.0);
    }
}
