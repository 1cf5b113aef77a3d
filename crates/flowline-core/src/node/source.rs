//! Sources: entity creation.
//!
//! A source holds at most one entity. Its process-time generator is the
//! creation interval; a creation that falls due while the previous entity
//! still occupies the source is deferred and re-fires the moment the
//! entity leaves. Start/stop offsets and a creation limit bound the stream.

use crate::event::{priority, EventKind};
use crate::gen::Generator;
use crate::id::{EntityKey, EventKey, NodeKey, VariantKey};
use crate::node::NodeKind;
use crate::sim::Simulation;
use crate::time::SimTime;
use crate::SimRng;
use rand::Rng;

// ---------------------------------------------------------------------------
// Variant creators
// ---------------------------------------------------------------------------

/// Decides which variant the next created entity gets.
#[derive(Debug)]
pub enum VariantCreator {
    /// Always the same variant.
    Fixed(VariantKey),
    /// Weighted random choice.
    Random { choices: Vec<(VariantKey, i32)> },
    /// Counted round-robin: each entry repeats `count` times.
    Sequence {
        items: Vec<(VariantKey, u32)>,
        index: usize,
        used: u32,
    },
    /// Timetabled batches: `amount` entities of a variant become available
    /// at each listed time.
    Delivery {
        timetable: Vec<DeliveryItem>,
        index: usize,
        delivered: u32,
    },
}

/// One delivery window of a [`VariantCreator::Delivery`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliveryItem {
    pub time: SimTime,
    pub variant: VariantKey,
    pub amount: u32,
}

impl VariantCreator {
    /// The next variant to create, advancing internal cursors. `None`
    /// means the creator is exhausted.
    pub fn next(&mut self, rng: &mut SimRng) -> Option<VariantKey> {
        match self {
            VariantCreator::Fixed(variant) => Some(*variant),
            VariantCreator::Random { choices } => {
                let total: i64 = choices.iter().map(|(_, w)| (*w).max(0) as i64).sum();
                if total <= 0 {
                    return choices.first().map(|(v, _)| *v);
                }
                let mut roll = rng.gen_range(0..total);
                for (variant, weight) in choices.iter() {
                    let w = (*weight).max(0) as i64;
                    if roll < w {
                        return Some(*variant);
                    }
                    roll -= w;
                }
                choices.last().map(|(v, _)| *v)
            }
            VariantCreator::Sequence { items, index, used } => {
                if items.is_empty() {
                    return None;
                }
                let (variant, count) = items[*index % items.len()];
                *used += 1;
                if *used >= count.max(1) {
                    *used = 0;
                    *index = (*index + 1) % items.len();
                }
                Some(variant)
            }
            VariantCreator::Delivery {
                timetable,
                index,
                delivered,
            } => {
                while *index < timetable.len() {
                    let item = timetable[*index];
                    if *delivered < item.amount {
                        *delivered += 1;
                        return Some(item.variant);
                    }
                    *index += 1;
                    *delivered = 0;
                }
                None
            }
        }
    }

    /// The earliest time the next entity may be created, for timetabled
    /// creators.
    pub fn next_available(&self) -> Option<SimTime> {
        match self {
            VariantCreator::Delivery { timetable, index, .. } => {
                timetable.get(*index).map(|item| item.time)
            }
            _ => None,
        }
    }

    pub fn is_stochastic(&self) -> bool {
        matches!(self, VariantCreator::Random { .. })
    }

    pub fn init(&mut self) {
        match self {
            VariantCreator::Sequence { index, used, .. } => {
                *index = 0;
                *used = 0;
            }
            VariantCreator::Delivery {
                index, delivered, ..
            } => {
                *index = 0;
                *delivered = 0;
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// The entity-creating node.
#[derive(Debug)]
pub struct Source {
    pub creator: VariantCreator,
    /// Stop after this many creations.
    pub limit: Option<u32>,
    pub created: u32,
    /// Offset of the first creation from replication start.
    pub start_gen: Option<Generator>,
    /// No creations at or after this time.
    pub stop_gen: Option<Generator>,
    pub stop_time: Option<SimTime>,
    pub current: Option<EntityKey>,
    pub create_event: Option<EventKey>,
    /// A creation fell due while the source was occupied; fire it the
    /// moment the entity leaves.
    pub creation_pending: bool,
    /// Interval outstanding when the creation event was canceled.
    pub create_canceled: Option<SimTime>,
}

impl Source {
    pub fn new(creator: VariantCreator) -> Self {
        Self {
            creator,
            limit: None,
            created: 0,
            start_gen: None,
            stop_gen: None,
            stop_time: None,
            current: None,
            create_event: None,
            creation_pending: false,
            create_canceled: None,
        }
    }

    pub fn content_size(&self) -> usize {
        usize::from(self.current.is_some())
    }

    pub fn init(&mut self) {
        self.created = 0;
        self.current = None;
        self.create_event = None;
        self.creation_pending = false;
        self.create_canceled = None;
        self.stop_time = None;
        self.creator.init();
        if let Some(g) = &mut self.start_gen {
            g.init();
        }
        if let Some(g) = &mut self.stop_gen {
            g.init();
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

impl Simulation {
    pub(crate) fn source_mut(&mut self, node: NodeKey) -> &mut Source {
        match &mut self.nodes[node].kind {
            NodeKind::Source(s) => s,
            other => panic!("node is not a Source: {}", other.kind_name()),
        }
    }

    /// Schedule the first creation of a replication.
    pub(crate) fn init_source(&mut self, node: NodeKey) {
        let start = {
            let NodeKind::Source(source) = &mut self.nodes[node].kind else {
                panic!("node is not a Source");
            };
            let rng = &mut self.rng;
            let start = match &mut source.start_gen {
                Some(g) => g.next(rng).max(0.0),
                None => 0.0,
            };
            source.stop_time = source.stop_gen.as_mut().map(|g| g.next(rng));
            source.creator.init();
            start
        };
        let first = match self.source_mut(node).creator.next_available() {
            Some(available) => available.max(start),
            None => start,
        };
        let evt = self
            .queue
            .create(EventKind::CreateEntity { source: node }, priority::CREATE_ENTITY);
        self.schedule(evt, first);
        self.source_mut(node).create_event = Some(evt);
    }

    /// Handle a `CreateEntity` event.
    pub(crate) fn process_create_entity(&mut self, node: NodeKey) {
        self.source_mut(node).create_event = None;
        if !self.nodes[node].is_operational() || !self.nodes[node].enabled {
            // The resume path reschedules the creation.
            self.source_mut(node).creation_pending = true;
            return;
        }
        if self.source_mut(node).current.is_some() {
            // Occupied: defer until the entity leaves.
            self.source_mut(node).creation_pending = true;
            return;
        }
        self.source_create(node);
    }

    /// Create one entity and schedule its departure plus the next
    /// creation.
    pub(crate) fn source_create(&mut self, node: NodeKey) {
        let now = self.clock;
        {
            let source = self.source_mut(node);
            if let Some(limit) = source.limit {
                if source.created >= limit {
                    return;
                }
            }
            if let Some(stop) = source.stop_time {
                if now >= stop {
                    return;
                }
            }
        }
        let variant = {
            let NodeKind::Source(source) = &mut self.nodes[node].kind else {
                panic!("node is not a Source");
            };
            match source.creator.next(&mut self.rng) {
                Some(v) => v,
                None => return,
            }
        };

        self.touch_content(node);
        let entity = self.create_entity(variant, node);
        {
            let source = self.source_mut(node);
            source.current = Some(entity);
            source.created += 1;
        }
        tracing::trace!(node = %self.nodes[node].name, entity = self.entities[entity].id, "source created entity");
        self.note_content(node);
        self.set_working(node);

        // Next creation after one interval; the creation interval is the
        // source's process time.
        let interval = self.draw_process_time(node, entity);
        let evt = self
            .queue
            .create(EventKind::CreateEntity { source: node }, priority::CREATE_ENTITY);
        self.schedule(evt, interval);
        self.source_mut(node).create_event = Some(evt);

        // The entity attempts to leave immediately.
        self.schedule_event_out(node, entity, 0.0, priority::OUT);
    }

    /// Kind hook: an entity left the source.
    pub(crate) fn source_leave(&mut self, node: NodeKey, _entity: EntityKey) {
        self.source_mut(node).current = None;
        self.set_waiting(node);
        let now = self.clock;
        self.nodes[node].base.set_start_empty(now);
        if self.source_mut(node).creation_pending {
            self.source_mut(node).creation_pending = false;
            // Deferred creation fires as soon as the source frees up.
            self.source_create(node);
        }
    }

    /// Cancel a pending creation while non-operational.
    pub(crate) fn source_interrupt(&mut self, node: NodeKey) {
        let now = self.clock;
        let Some(evt) = self.source_mut(node).create_event else {
            return;
        };
        let remaining = (self.queue.get(evt).map(|r| r.time).unwrap_or(now) - now).max(0.0);
        self.queue.cancel(evt);
        self.source_mut(node).create_canceled = Some(remaining);
    }

    /// Resume a canceled creation when operational again.
    pub(crate) fn source_resume(&mut self, node: NodeKey) {
        let Some(remaining) = self.source_mut(node).create_canceled.take() else {
            if self.source_mut(node).creation_pending && self.source_mut(node).current.is_none() {
                self.source_mut(node).creation_pending = false;
                self.source_create(node);
            }
            return;
        };
        if let Some(evt) = self.source_mut(node).create_event {
            let now = self.clock;
            self.queue.reschedule(evt, now, remaining);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use slotmap::SlotMap;

    fn variants(n: usize) -> Vec<VariantKey> {
        let mut arena: SlotMap<VariantKey, ()> = SlotMap::with_key();
        (0..n).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn fixed_creator_repeats() {
        let v = variants(1);
        let mut rng = SimRng::seed_from_u64(1);
        let mut creator = VariantCreator::Fixed(v[0]);
        assert_eq!(creator.next(&mut rng), Some(v[0]));
        assert_eq!(creator.next(&mut rng), Some(v[0]));
        assert!(!creator.is_stochastic());
    }

    #[test]
    fn sequence_creator_respects_counts() {
        let v = variants(2);
        let mut rng = SimRng::seed_from_u64(1);
        let mut creator = VariantCreator::Sequence {
            items: vec![(v[0], 2), (v[1], 1)],
            index: 0,
            used: 0,
        };
        assert_eq!(creator.next(&mut rng), Some(v[0]));
        assert_eq!(creator.next(&mut rng), Some(v[0]));
        assert_eq!(creator.next(&mut rng), Some(v[1]));
        assert_eq!(creator.next(&mut rng), Some(v[0]));
    }

    #[test]
    fn delivery_creator_exhausts_timetable() {
        let v = variants(2);
        let mut rng = SimRng::seed_from_u64(1);
        let mut creator = VariantCreator::Delivery {
            timetable: vec![
                DeliveryItem {
                    time: 0.0,
                    variant: v[0],
                    amount: 2,
                },
                DeliveryItem {
                    time: 50.0,
                    variant: v[1],
                    amount: 1,
                },
            ],
            index: 0,
            delivered: 0,
        };
        assert_eq!(creator.next_available(), Some(0.0));
        assert_eq!(creator.next(&mut rng), Some(v[0]));
        assert_eq!(creator.next(&mut rng), Some(v[0]));
        assert_eq!(creator.next(&mut rng), Some(v[1]));
        assert_eq!(creator.next_available(), Some(50.0));
        assert_eq!(creator.next(&mut rng), None);
    }

    #[test]
    fn random_creator_honors_zero_weights() {
        let v = variants(2);
        let mut rng = SimRng::seed_from_u64(42);
        let mut creator = VariantCreator::Random {
            choices: vec![(v[0], 0), (v[1], 3)],
        };
        for _ in 0..32 {
            assert_eq!(creator.next(&mut rng), Some(v[1]));
        }
        assert!(creator.is_stochastic());
    }
}
