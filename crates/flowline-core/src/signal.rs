//! Priority-bucketed observer signals.
//!
//! A [`PrioritySignal`] fires its handlers bucket by bucket, lower priority
//! values first. Handlers may connect or disconnect other handlers while a
//! fire is in progress; a connection made during a fire for a priority that
//! has already started (or finished) firing stays invisible until the next
//! fire. Slots are index-stable with generation counters so a
//! [`Connection`] handle stays valid across unrelated connects and
//! disconnects.
//!
//! All methods take `&self`: handlers routinely connect further handlers
//! from inside a fire, so the registry lives behind interior mutability.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Handle returned by [`PrioritySignal::connect`]; pass to
/// [`PrioritySignal::disconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    slot: usize,
    generation: u64,
}

type Handler<P> = Rc<RefCell<dyn FnMut(&P)>>;

struct Slot<P> {
    generation: u64,
    priority: i32,
    handler: Option<Handler<P>>,
}

struct Inner<P> {
    slots: Vec<Slot<P>>,
    /// Slot indices per priority, in connection order.
    buckets: BTreeMap<i32, Vec<usize>>,
    /// Connections made while firing, applied when the fire completes.
    pending: Vec<(usize, i32)>,
    firing: bool,
    current_priority: i32,
    next_generation: u64,
}

/// An observer list fired in ascending priority order.
pub struct PrioritySignal<P> {
    inner: RefCell<Inner<P>>,
}

impl<P> Default for PrioritySignal<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PrioritySignal<P> {
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(Inner {
                slots: Vec::new(),
                buckets: BTreeMap::new(),
                pending: Vec::new(),
                firing: false,
                current_priority: i32::MIN,
                next_generation: 0,
            }),
        }
    }

    /// Connect a handler at the given priority.
    pub fn connect<F>(&self, priority: i32, handler: F) -> Connection
    where
        F: FnMut(&P) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let handler: Handler<P> = Rc::new(RefCell::new(handler));
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let slot = match inner.slots.iter().position(|s| s.handler.is_none()) {
            Some(index) => {
                inner.slots[index] = Slot {
                    generation,
                    priority,
                    handler: Some(handler),
                };
                index
            }
            None => {
                inner.slots.push(Slot {
                    generation,
                    priority,
                    handler: Some(handler),
                });
                inner.slots.len() - 1
            }
        };

        if inner.firing && priority <= inner.current_priority {
            // Invisible to the ongoing fire.
            inner.pending.push((slot, priority));
        } else {
            inner.buckets.entry(priority).or_default().push(slot);
        }

        Connection { slot, generation }
    }

    /// Disconnect a handler. A stale handle (already disconnected, or the
    /// slot since reused) is ignored.
    pub fn disconnect(&self, connection: Connection) {
        let mut inner = self.inner.borrow_mut();
        let Some(slot) = inner.slots.get_mut(connection.slot) else {
            return;
        };
        if slot.generation != connection.generation {
            return;
        }
        slot.handler = None;
        let priority = slot.priority;
        if let Some(bucket) = inner.buckets.get_mut(&priority) {
            bucket.retain(|&i| i != connection.slot);
        }
        inner.pending.retain(|&(i, _)| i != connection.slot);
    }

    /// Fire the signal. Handlers run in ascending priority order; within a
    /// bucket, in connection order. The registry is not borrowed while a
    /// handler runs, so handlers may connect and disconnect freely.
    pub fn fire(&self, payload: &P) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.firing = true;
        }
        let priorities: Vec<i32> = self.inner.borrow().buckets.keys().copied().collect();
        for priority in priorities {
            let indices = {
                let mut inner = self.inner.borrow_mut();
                inner.current_priority = priority;
                match inner.buckets.get(&priority) {
                    Some(bucket) => bucket.clone(),
                    None => continue,
                }
            };
            for index in indices {
                let handler = {
                    let inner = self.inner.borrow();
                    inner.slots.get(index).and_then(|s| s.handler.clone())
                };
                if let Some(handler) = handler {
                    (handler.borrow_mut())(payload);
                }
            }
        }
        let mut inner = self.inner.borrow_mut();
        inner.firing = false;
        inner.current_priority = i32::MIN;
        let pending = std::mem::take(&mut inner.pending);
        for (slot, priority) in pending {
            if inner.slots[slot].handler.is_some() {
                inner.buckets.entry(priority).or_default().push(slot);
            }
        }
    }

    /// Number of connected handlers.
    pub fn len(&self) -> usize {
        self.inner
            .borrow()
            .slots
            .iter()
            .filter(|s| s.handler.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P> std::fmt::Debug for PrioritySignal<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrioritySignal")
            .field("handlers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<i32>>>, impl Fn(i32) -> Box<dyn FnMut(&())>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log2 = log.clone();
        let make = move |tag: i32| -> Box<dyn FnMut(&())> {
            let log = log2.clone();
            Box::new(move |_: &()| log.borrow_mut().push(tag))
        };
        (log, make)
    }

    #[test]
    fn fires_in_priority_order() {
        let (log, make) = recorder();
        let signal = PrioritySignal::new();
        signal.connect(5, make(5));
        signal.connect(1, make(1));
        signal.connect(3, make(3));
        signal.fire(&());
        assert_eq!(*log.borrow(), vec![1, 3, 5]);
    }

    #[test]
    fn connection_order_within_bucket() {
        let (log, make) = recorder();
        let signal = PrioritySignal::new();
        signal.connect(1, make(10));
        signal.connect(1, make(11));
        signal.fire(&());
        assert_eq!(*log.borrow(), vec![10, 11]);
    }

    #[test]
    fn disconnect_removes_handler() {
        let (log, make) = recorder();
        let signal = PrioritySignal::new();
        let c = signal.connect(1, make(1));
        signal.connect(2, make(2));
        signal.disconnect(c);
        signal.fire(&());
        assert_eq!(*log.borrow(), vec![2]);
        assert_eq!(signal.len(), 1);
    }

    #[test]
    fn stale_handle_after_slot_reuse_is_ignored() {
        let (log, make) = recorder();
        let signal = PrioritySignal::new();
        let c = signal.connect(1, make(1));
        signal.disconnect(c);
        signal.connect(1, make(2)); // reuses slot 0 with a new generation
        signal.disconnect(c); // stale
        signal.fire(&());
        assert_eq!(*log.borrow(), vec![2]);
    }

    #[test]
    fn connect_during_fire_for_fired_priority_is_deferred() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let signal = Rc::new(PrioritySignal::<()>::new());

        let sig = signal.clone();
        let l = log.clone();
        signal.connect(2, move |_| {
            l.borrow_mut().push(2);
            let l2 = l.clone();
            // Priority 1 has already fired; must wait for the next fire.
            sig.connect(1, move |_| l2.borrow_mut().push(1));
        });

        signal.fire(&());
        assert_eq!(*log.borrow(), vec![2]);

        log.borrow_mut().clear();
        signal.fire(&());
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn connect_during_fire_for_later_priority_fires_same_round() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let signal = Rc::new(PrioritySignal::<()>::new());

        let sig = signal.clone();
        let l = log.clone();
        signal.connect(1, move |_| {
            l.borrow_mut().push(1);
            let l2 = l.clone();
            sig.connect(5, move |_| l2.borrow_mut().push(5));
        });

        signal.fire(&());
        assert_eq!(*log.borrow(), vec![1, 5]);
    }
}
