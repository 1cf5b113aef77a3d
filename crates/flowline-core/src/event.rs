//! Events and the time-priority event queue.
//!
//! Pending events live in an arena and are threaded onto one intrusive
//! doubly linked list sorted by `(time, priority, sub_priority, seq)`, all
//! ascending. Insertion scans from the tail, since most scheduling appends
//! at or near the end of the list.
//!
//! Owners cancel pending work by flagging the event, not by unlinking it; a
//! flagged event is a no-op when popped. Rescheduling clears the flag,
//! re-times the record and re-inserts it. `remove` unlinks and frees the
//! slot for events whose owner is going away entirely.

use crate::id::{CalendarKey, EntityKey, EventKey, FailureKey, LogicKey, NodeKey};
use crate::resource::ResourcePurpose;
use crate::time::SimTime;
use slotmap::SlotMap;

// ---------------------------------------------------------------------------
// Priorities
// ---------------------------------------------------------------------------

/// The normative priority table. Lower values execute first among events
/// scheduled for the same time.
pub mod priority {
    pub const NOW: i32 = -1;
    pub const RESET_STATS: i32 = 0;
    pub const ANIMATE_CONVEYOR: i32 = 0;
    pub const SHIFT_CALENDAR_START: i32 = 1;
    pub const OUT_UNBLOCKED: i32 = 2;
    pub const UPDATE_CONVEYOR: i32 = 2;
    pub const SHIFT: i32 = 3;
    pub const CREATE_DEMAND: i32 = 3;
    pub const START_NEW_BATCH: i32 = 4;
    pub const TAKT_COMPLETE_UNBLOCKED: i32 = 4;
    pub const DISRUPTION_BEGIN_PROCESSING: i32 = 4;
    pub const BREAK: i32 = 4;
    pub const DISRUPTION_BEGIN: i32 = 5;
    pub const OUT: i32 = 5;
    pub const CREATE_ENTITY: i32 = 5;
    pub const SETUP: i32 = 5;
    pub const DISASSEMBLY: i32 = 5;
    pub const ASSEMBLY: i32 = 5;
    pub const CONVEYOR_OPEN: i32 = 6;
    pub const REQUEST_RESOURCES: i32 = 6;
    pub const RESOURCE_READY: i32 = 6;
    pub const DISRUPTION_END: i32 = 6;
    pub const TAKT_COMPLETE: i32 = 7;
    pub const ENTRY_TIMEOUT: i32 = 7;
    pub const TRIGGER_SYNCHRONIZED_EXITS: i32 = 7;
    pub const TIME_CALLBACK: i32 = 8;
}

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// What happens when an event is processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Discard statistics gathered during the warmup period.
    ResetStats,
    /// Roll a shift calendar forward from the start of the replication.
    ShiftCalendarStart { calendar: CalendarKey },
    ShiftBegin { calendar: CalendarKey },
    ShiftEnd { calendar: CalendarKey },
    BreakBegin { calendar: CalendarKey },
    BreakEnd { calendar: CalendarKey },
    /// A source creates its next entity.
    CreateEntity { source: NodeKey },
    /// A demand logic places its next demand.
    CreateDemand { logic: LogicKey },
    /// A batch logic releases a formed batch to its node.
    StartNewBatch { logic: LogicKey, node: NodeKey },
    /// An incomplete batch is forced to start.
    BatchTimeout { logic: LogicKey, node: NodeKey },
    /// An entity attempts to leave its node.
    Out {
        node: NodeKey,
        entity: EntityKey,
        /// True when scheduled from a block list after an unblock.
        block_list_call: bool,
    },
    /// A setup completes on a node.
    SetupEnd { node: NodeKey, entity: EntityKey },
    /// An assembly station joins its collected parts onto the container.
    Assemble { node: NodeKey, entity: EntityKey },
    /// A disassembly station splits an entity into its parts.
    Disassemble { node: NodeKey, entity: EntityKey },
    DisruptionBegin { failure: FailureKey },
    DisruptionEnd { failure: FailureKey },
    /// A node asks connected resource managers for required skills.
    RequestResources {
        node: NodeKey,
        purpose: ResourcePurpose,
        entity: Option<EntityKey>,
        failure: Option<FailureKey>,
    },
    /// An allocated resource finishes its response time.
    ResourceReady {
        node: NodeKey,
        purpose: ResourcePurpose,
        resource: crate::id::ResourceKey,
        entity: Option<EntityKey>,
        failure: Option<FailureKey>,
    },
    /// A takt period completes and gated entities advance together.
    TaktComplete { logic: LogicKey },
    /// A synchronized-entry window on a parallel operation expires.
    EntryTimeout { node: NodeKey },
    /// All internal operations finished; release exits as one batch.
    TriggerSynchronizedExits { node: NodeKey },
    /// An entity on a conveyor reaches a decision point.
    UpdateConveyor { node: NodeKey, entity: EntityKey },
    /// The head gap of a conveyor permits a new entry.
    OpenConveyor { node: NodeKey },
    /// Periodic conveyor animation snapshot.
    AnimateConveyor { node: NodeKey },
    /// A registered callback fires at its requested time.
    TimeCallback { callback: usize },
}

impl EventKind {
    /// Stable name used by breakpoint filters and event listings.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ResetStats => "ResetStats",
            EventKind::ShiftCalendarStart { .. } => "ShiftCalendarStart",
            EventKind::ShiftBegin { .. } => "ShiftBegin",
            EventKind::ShiftEnd { .. } => "ShiftEnd",
            EventKind::BreakBegin { .. } => "BreakBegin",
            EventKind::BreakEnd { .. } => "BreakEnd",
            EventKind::CreateEntity { .. } => "CreateEntity",
            EventKind::CreateDemand { .. } => "CreateDemand",
            EventKind::StartNewBatch { .. } => "StartNewBatch",
            EventKind::BatchTimeout { .. } => "BatchTimeout",
            EventKind::Out { .. } => "Out",
            EventKind::SetupEnd { .. } => "SetupEnd",
            EventKind::Assemble { .. } => "Assemble",
            EventKind::Disassemble { .. } => "Disassemble",
            EventKind::DisruptionBegin { .. } => "DisruptionBegin",
            EventKind::DisruptionEnd { .. } => "DisruptionEnd",
            EventKind::RequestResources { .. } => "RequestResources",
            EventKind::ResourceReady { .. } => "ResourceReady",
            EventKind::TaktComplete { .. } => "TaktComplete",
            EventKind::EntryTimeout { .. } => "EntryTimeout",
            EventKind::TriggerSynchronizedExits { .. } => "TriggerSynchronizedExits",
            EventKind::UpdateConveyor { .. } => "UpdateConveyor",
            EventKind::OpenConveyor { .. } => "OpenConveyor",
            EventKind::AnimateConveyor { .. } => "AnimateConveyor",
            EventKind::TimeCallback { .. } => "TimeCallback",
        }
    }
}

// ---------------------------------------------------------------------------
// Event records
// ---------------------------------------------------------------------------

/// A pending (or just-popped) event.
#[derive(Debug)]
pub struct EventRecord {
    pub time: SimTime,
    pub priority: i32,
    pub sub_priority: i32,
    /// Insertion order; the final tie-break of the sort key.
    pub seq: u64,
    pub kind: EventKind,
    /// Flagged by the owner; a canceled event is a no-op when popped.
    pub canceled: bool,
    pub breakpoint: bool,
    pub breakpoint_stopped: bool,
    pub in_queue: bool,
    next: Option<EventKey>,
    prev: Option<EventKey>,
}

impl EventRecord {
    fn sort_key(&self) -> (SimTime, i32, i32, u64) {
        (self.time, self.priority, self.sub_priority, self.seq)
    }
}

fn key_less(a: (SimTime, i32, i32, u64), b: (SimTime, i32, i32, u64)) -> bool {
    if a.0 != b.0 {
        return a.0 < b.0;
    }
    (a.1, a.2, a.3) < (b.1, b.2, b.3)
}

// ---------------------------------------------------------------------------
// Event queue
// ---------------------------------------------------------------------------

/// The ordered store of pending events.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: SlotMap<EventKey, EventRecord>,
    head: Option<EventKey>,
    tail: Option<EventKey>,
    queued: usize,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an event record without scheduling it.
    pub fn create(&mut self, kind: EventKind, priority: i32) -> EventKey {
        self.create_sub(kind, priority, 0)
    }

    /// Create an event record with an explicit sub-priority.
    pub fn create_sub(&mut self, kind: EventKind, priority: i32, sub_priority: i32) -> EventKey {
        self.events.insert(EventRecord {
            time: 0.0,
            priority,
            sub_priority,
            seq: 0,
            kind,
            canceled: false,
            breakpoint: false,
            breakpoint_stopped: false,
            in_queue: false,
            next: None,
            prev: None,
        })
    }

    /// Schedule `evt` at `now + dt`.
    pub fn schedule(&mut self, evt: EventKey, now: SimTime, dt: SimTime) {
        assert!(dt >= 0.0, "cannot schedule an event in the past: dt={dt}");
        if self.events[evt].in_queue {
            self.unlink(evt);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        {
            let record = &mut self.events[evt];
            record.time = now + dt;
            record.seq = seq;
        }
        self.link_sorted(evt);
    }

    /// Schedule `evt` for immediate execution, directly after the event
    /// currently being processed: time `now`, priority band `Now`.
    pub fn schedule_now(&mut self, evt: EventKey, now: SimTime) {
        self.events[evt].priority = priority::NOW;
        self.schedule(evt, now, 0.0);
    }

    /// Insert `evt` immediately before `insert`, inheriting its time.
    pub fn schedule_before(&mut self, evt: EventKey, insert: EventKey, dt: SimTime) {
        assert!(dt >= 0.0, "schedule_before requires dt >= 0, got {dt}");
        assert!(
            self.events[insert].in_queue,
            "schedule_before target is not queued"
        );
        if self.events[evt].in_queue {
            self.unlink(evt);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let (time, prev) = {
            let target = &self.events[insert];
            (target.time, target.prev)
        };
        {
            let record = &mut self.events[evt];
            record.time = time;
            record.seq = seq;
            record.in_queue = true;
            record.prev = prev;
            record.next = Some(insert);
        }
        match prev {
            Some(p) => self.events[p].next = Some(evt),
            None => self.head = Some(evt),
        }
        self.events[insert].prev = Some(evt);
        self.queued += 1;
    }

    /// Flag an event as canceled. It stays queued and is a no-op when
    /// popped. Rescheduling clears the flag.
    pub fn cancel(&mut self, evt: EventKey) {
        if let Some(record) = self.events.get_mut(evt) {
            record.canceled = true;
        }
    }

    /// Clear the canceled flag and re-insert at `now + dt`. The breakpoint
    /// flag survives the round trip.
    pub fn reschedule(&mut self, evt: EventKey, now: SimTime, dt: SimTime) {
        self.events[evt].canceled = false;
        self.schedule(evt, now, dt);
    }

    /// Unlink an event and free its slot.
    pub fn remove(&mut self, evt: EventKey) {
        if self.events.contains_key(evt) {
            if self.events[evt].in_queue {
                self.unlink(evt);
            }
            self.events.remove(evt);
        }
    }

    /// Free a record that has already been popped.
    pub fn free(&mut self, evt: EventKey) {
        if let Some(record) = self.events.get(evt) {
            assert!(!record.in_queue, "freeing an event that is still queued");
            self.events.remove(evt);
        }
    }

    /// Unlink and return the front event. The record stays alive until
    /// [`EventQueue::free`].
    pub fn pop(&mut self) -> Option<EventKey> {
        let head = self.head?;
        self.unlink(head);
        Some(head)
    }

    /// The next event to be processed.
    pub fn peek(&self) -> Option<EventKey> {
        self.head
    }

    pub fn get(&self, evt: EventKey) -> Option<&EventRecord> {
        self.events.get(evt)
    }

    pub fn get_mut(&mut self, evt: EventKey) -> Option<&mut EventRecord> {
        self.events.get_mut(evt)
    }

    pub fn contains(&self, evt: EventKey) -> bool {
        self.events.contains_key(evt)
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.queued
    }

    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    /// Iterate over queued events in execution order.
    pub fn iter(&self) -> QueueIter<'_> {
        QueueIter {
            queue: self,
            cursor: self.head,
        }
    }

    /// Drop every record and reset the sequence counter.
    pub fn clear(&mut self) {
        self.events.clear();
        self.head = None;
        self.tail = None;
        self.queued = 0;
        self.next_seq = 0;
    }

    fn link_sorted(&mut self, evt: EventKey) {
        let key = self.events[evt].sort_key();
        // Scan from the tail: most schedules land at or near the end.
        let mut after = self.tail;
        while let Some(cur) = after {
            if key_less(key, self.events[cur].sort_key()) {
                after = self.events[cur].prev;
            } else {
                break;
            }
        }
        match after {
            None => {
                let old_head = self.head;
                {
                    let record = &mut self.events[evt];
                    record.prev = None;
                    record.next = old_head;
                    record.in_queue = true;
                }
                match old_head {
                    Some(h) => self.events[h].prev = Some(evt),
                    None => self.tail = Some(evt),
                }
                self.head = Some(evt);
            }
            Some(after) => {
                let next = self.events[after].next;
                {
                    let record = &mut self.events[evt];
                    record.prev = Some(after);
                    record.next = next;
                    record.in_queue = true;
                }
                self.events[after].next = Some(evt);
                match next {
                    Some(n) => self.events[n].prev = Some(evt),
                    None => self.tail = Some(evt),
                }
            }
        }
        self.queued += 1;
    }

    fn unlink(&mut self, evt: EventKey) {
        let (prev, next) = {
            let record = &mut self.events[evt];
            assert!(record.in_queue, "unlinking an event that is not queued");
            record.in_queue = false;
            (record.prev.take(), record.next.take())
        };
        match prev {
            Some(p) => self.events[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.events[n].prev = prev,
            None => self.tail = prev,
        }
        self.queued -= 1;
    }
}

/// Iterator over queued events in execution order.
pub struct QueueIter<'a> {
    queue: &'a EventQueue,
    cursor: Option<EventKey>,
}

impl<'a> Iterator for QueueIter<'a> {
    type Item = (EventKey, &'a EventRecord);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.cursor?;
        let record = self.queue.get(key)?;
        self.cursor = record.next;
        Some((key, record))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn node_key() -> NodeKey {
        let mut arena: SlotMap<NodeKey, ()> = SlotMap::with_key();
        arena.insert(())
    }

    fn out_event(queue: &mut EventQueue, priority: i32) -> EventKey {
        let node = node_key();
        let mut entities: SlotMap<EntityKey, ()> = SlotMap::with_key();
        let entity = entities.insert(());
        queue.create(
            EventKind::Out {
                node,
                entity,
                block_list_call: false,
            },
            priority,
        )
    }

    fn drain(queue: &mut EventQueue) -> Vec<EventKey> {
        let mut order = Vec::new();
        while let Some(evt) = queue.pop() {
            order.push(evt);
        }
        order
    }

    #[test]
    fn pops_in_time_order() {
        let mut queue = EventQueue::new();
        let a = out_event(&mut queue, priority::OUT);
        let b = out_event(&mut queue, priority::OUT);
        let c = out_event(&mut queue, priority::OUT);
        queue.schedule(a, 0.0, 5.0);
        queue.schedule(b, 0.0, 1.0);
        queue.schedule(c, 0.0, 3.0);
        assert_eq!(drain(&mut queue), vec![b, c, a]);
    }

    #[test]
    fn ties_break_by_priority_then_seq() {
        let mut queue = EventQueue::new();
        let out = out_event(&mut queue, priority::OUT);
        let unblocked = out_event(&mut queue, priority::OUT_UNBLOCKED);
        let out2 = out_event(&mut queue, priority::OUT);
        queue.schedule(out, 0.0, 1.0);
        queue.schedule(unblocked, 0.0, 1.0);
        queue.schedule(out2, 0.0, 1.0);
        // Same time: the unblocked (priority 2) precedes both outs
        // (priority 5); the outs keep insertion order.
        assert_eq!(drain(&mut queue), vec![unblocked, out, out2]);
    }

    #[test]
    fn sub_priority_breaks_ties_within_priority() {
        let mut queue = EventQueue::new();
        let node = node_key();
        let late = queue.create_sub(EventKind::OpenConveyor { node }, priority::OUT, 2);
        let early = queue.create_sub(EventKind::OpenConveyor { node }, priority::OUT, 1);
        queue.schedule(late, 0.0, 1.0);
        queue.schedule(early, 0.0, 1.0);
        assert_eq!(drain(&mut queue), vec![early, late]);
    }

    #[test]
    fn schedule_now_precedes_same_time_events() {
        let mut queue = EventQueue::new();
        let normal = out_event(&mut queue, priority::OUT);
        queue.schedule(normal, 0.0, 0.0);
        let urgent = out_event(&mut queue, priority::OUT);
        queue.schedule_now(urgent, 0.0);
        assert_eq!(drain(&mut queue), vec![urgent, normal]);
    }

    #[test]
    fn schedule_before_lands_directly_before_target() {
        let mut queue = EventQueue::new();
        let a = out_event(&mut queue, priority::OUT);
        let b = out_event(&mut queue, priority::OUT);
        queue.schedule(a, 0.0, 2.0);
        queue.schedule(b, 0.0, 2.0);
        let inserted = out_event(&mut queue, priority::OUT);
        queue.schedule_before(inserted, b, 0.0);
        assert_eq!(queue.get(inserted).unwrap().time, 2.0);
        assert_eq!(drain(&mut queue), vec![a, inserted, b]);
    }

    #[test]
    fn canceled_events_stay_queued() {
        let mut queue = EventQueue::new();
        let a = out_event(&mut queue, priority::OUT);
        queue.schedule(a, 0.0, 1.0);
        queue.cancel(a);
        assert_eq!(queue.len(), 1);
        let popped = queue.pop().unwrap();
        assert!(queue.get(popped).unwrap().canceled);
    }

    #[test]
    fn reschedule_clears_cancel_and_reorders() {
        let mut queue = EventQueue::new();
        let a = out_event(&mut queue, priority::OUT);
        let b = out_event(&mut queue, priority::OUT);
        queue.schedule(a, 0.0, 1.0);
        queue.schedule(b, 0.0, 2.0);
        queue.cancel(a);
        queue.reschedule(a, 0.0, 3.0);
        assert!(!queue.get(a).unwrap().canceled);
        assert_eq!(drain(&mut queue), vec![b, a]);
    }

    #[test]
    fn reschedule_keeps_breakpoint_flag() {
        let mut queue = EventQueue::new();
        let a = out_event(&mut queue, priority::OUT);
        queue.schedule(a, 0.0, 1.0);
        queue.get_mut(a).unwrap().breakpoint = true;
        queue.cancel(a);
        queue.reschedule(a, 0.0, 4.0);
        assert!(queue.get(a).unwrap().breakpoint);
    }

    #[test]
    fn remove_unlinks_and_frees() {
        let mut queue = EventQueue::new();
        let a = out_event(&mut queue, priority::OUT);
        let b = out_event(&mut queue, priority::OUT);
        queue.schedule(a, 0.0, 1.0);
        queue.schedule(b, 0.0, 2.0);
        queue.remove(a);
        assert!(!queue.contains(a));
        assert_eq!(drain(&mut queue), vec![b]);
    }

    #[test]
    fn iter_walks_execution_order() {
        let mut queue = EventQueue::new();
        let a = out_event(&mut queue, priority::OUT);
        let b = out_event(&mut queue, priority::OUT);
        queue.schedule(a, 0.0, 2.0);
        queue.schedule(b, 0.0, 1.0);
        let order: Vec<EventKey> = queue.iter().map(|(k, _)| k).collect();
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    #[should_panic(expected = "cannot schedule an event in the past")]
    fn scheduling_into_the_past_panics() {
        let mut queue = EventQueue::new();
        let a = out_event(&mut queue, priority::OUT);
        queue.schedule(a, 10.0, -1.0);
    }
}
