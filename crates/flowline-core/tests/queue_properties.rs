//! Property tests for the event queue's ordering contract.

use flowline_core::event::{EventKind, EventQueue};
use flowline_core::id::NodeKey;
use proptest::prelude::*;
use slotmap::SlotMap;

fn node_key() -> NodeKey {
    let mut arena: SlotMap<NodeKey, ()> = SlotMap::with_key();
    arena.insert(())
}

proptest! {
    /// For any schedule of events, pops are lexicographically ordered by
    /// (time, priority, sub_priority, insertion sequence).
    #[test]
    fn pops_are_lexicographically_ordered(
        entries in prop::collection::vec(
            (0u32..50, -1i32..9, 0i32..3),
            1..80,
        )
    ) {
        let node = node_key();
        let mut queue = EventQueue::new();
        for (time, priority, sub) in entries {
            let evt = queue.create_sub(
                EventKind::OpenConveyor { node },
                priority,
                sub,
            );
            queue.schedule(evt, 0.0, time as f64);
        }

        let mut last: Option<(f64, i32, i32, u64)> = None;
        while let Some(evt) = queue.pop() {
            let record = queue.get(evt).unwrap();
            let key = (record.time, record.priority, record.sub_priority, record.seq);
            if let Some(prev) = last {
                prop_assert!(
                    prev.0 < key.0
                        || (prev.0 == key.0 && (prev.1, prev.2, prev.3) < (key.1, key.2, key.3)),
                    "popped {key:?} after {prev:?}"
                );
            }
            last = Some(key);
            queue.free(evt);
        }
    }

    /// Canceling then rescheduling preserves the queue's integrity: every
    /// event is popped exactly once and order still holds.
    #[test]
    fn cancel_and_reschedule_keeps_integrity(
        times in prop::collection::vec(0u32..50, 2..40),
        cancel_index in 0usize..40,
        extra in 0u32..20,
    ) {
        let node = node_key();
        let mut queue = EventQueue::new();
        let mut keys = Vec::new();
        for time in &times {
            let evt = queue.create(EventKind::OpenConveyor { node }, 5);
            queue.schedule(evt, 0.0, *time as f64);
            keys.push(evt);
        }
        let victim = keys[cancel_index % keys.len()];
        queue.cancel(victim);
        queue.reschedule(victim, 0.0, extra as f64);

        let mut popped = 0;
        let mut last_time = f64::NEG_INFINITY;
        while let Some(evt) = queue.pop() {
            let record = queue.get(evt).unwrap();
            prop_assert!(!record.canceled);
            prop_assert!(record.time >= last_time);
            last_time = record.time;
            popped += 1;
            queue.free(evt);
        }
        prop_assert_eq!(popped, times.len());
    }
}
