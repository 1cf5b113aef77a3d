//! Demand logic: scheduled consumption from a store.
//!
//! Demand events fire on their own schedule and consume from an observed
//! store: either units off an entity (optionally destroying it at zero) or
//! a whole entity. Unserved demands accumulate as backlog per variant;
//! when supply arrives, the backlog drains oldest first and the waiting
//! time is booked as tardiness.

use crate::event::{priority, EventKind};
use crate::gen::Generator;
use crate::id::{EntityKey, LogicKey, NodeKey, VariantKey};
use crate::logic::LogicKind;
use crate::node::source::VariantCreator;
use crate::sim::Simulation;
use crate::time::SimTime;
use std::collections::VecDeque;

/// Per-variant backlog and tardiness records.
#[derive(Debug, Default, Clone)]
pub struct DemandRecord {
    /// Times of still-unserved demands, oldest first.
    pub waiting: VecDeque<SimTime>,
    pub served: u32,
    pub served_late: u32,
    pub tardiness: SimTime,
}

/// The consuming logic.
#[derive(Debug)]
pub struct Demand {
    /// The store supplying this demand.
    pub store: Option<NodeKey>,
    /// Which variant each demand asks for.
    pub creator: VariantCreator,
    /// Time between demands.
    pub interval: Option<Generator>,
    pub start_gen: Option<Generator>,
    pub stop_gen: Option<Generator>,
    pub stop_time: Option<SimTime>,
    pub limit: Option<u32>,
    pub created: u32,
    /// Consume units off entities instead of whole entities.
    pub use_units: bool,
    /// Destroy an entity when its units reach zero.
    pub delete_entity: bool,
    pub records: Vec<(VariantKey, DemandRecord)>,
}

impl Demand {
    pub fn new(creator: VariantCreator) -> Self {
        Self {
            store: None,
            creator,
            interval: None,
            start_gen: None,
            stop_gen: None,
            stop_time: None,
            limit: None,
            created: 0,
            use_units: false,
            delete_entity: true,
            records: Vec::new(),
        }
    }

    pub fn record_mut(&mut self, variant: VariantKey) -> &mut DemandRecord {
        if let Some(index) = self.records.iter().position(|(v, _)| *v == variant) {
            &mut self.records[index].1
        } else {
            self.records.push((variant, DemandRecord::default()));
            &mut self.records.last_mut().unwrap().1
        }
    }

    pub fn backlog(&self, variant: VariantKey) -> usize {
        self.records
            .iter()
            .find(|(v, _)| *v == variant)
            .map(|(_, r)| r.waiting.len())
            .unwrap_or(0)
    }

    pub fn total_backlog(&self) -> usize {
        self.records.iter().map(|(_, r)| r.waiting.len()).sum()
    }

    pub fn init(&mut self) {
        self.created = 0;
        self.stop_time = None;
        self.records.clear();
        self.creator.init();
        for g in [&mut self.interval, &mut self.start_gen, &mut self.stop_gen]
            .into_iter()
            .flatten()
        {
            g.init();
        }
    }
}

impl Simulation {
    pub(crate) fn demand_mut(&mut self, logic: LogicKey) -> &mut Demand {
        match &mut self.logics[logic].kind {
            LogicKind::Demand(d) => d,
            other => panic!("logic is not a Demand: {}", other.kind_name()),
        }
    }

    pub(crate) fn demand_ref(&self, logic: LogicKey) -> &Demand {
        match &self.logics[logic].kind {
            LogicKind::Demand(d) => d,
            other => panic!("logic is not a Demand: {}", other.kind_name()),
        }
    }

    /// Schedule the first demand of a replication.
    pub(crate) fn init_demand(&mut self, logic: LogicKey) {
        let start = {
            let LogicKind::Demand(demand) = &mut self.logics[logic].kind else {
                panic!("logic is not a Demand");
            };
            let rng = &mut self.rng;
            demand.stop_time = demand.stop_gen.as_mut().map(|g| g.next(rng));
            match &mut demand.start_gen {
                Some(g) => g.next(rng).max(0.0),
                None => 0.0,
            }
        };
        let evt = self
            .queue
            .create(EventKind::CreateDemand { logic }, priority::CREATE_DEMAND);
        self.schedule(evt, start);
    }

    /// Handle a `CreateDemand` event.
    pub(crate) fn process_create_demand(&mut self, logic: LogicKey) {
        let now = self.clock;
        {
            let demand = self.demand_ref(logic);
            if let Some(limit) = demand.limit {
                if demand.created >= limit {
                    return;
                }
            }
            if let Some(stop) = demand.stop_time {
                if now >= stop {
                    return;
                }
            }
        }
        let variant = {
            let LogicKind::Demand(demand) = &mut self.logics[logic].kind else {
                unreachable!()
            };
            demand.creator.next(&mut self.rng)
        };
        if let Some(variant) = variant {
            self.demand_mut(logic).created += 1;
            if !self.demand_try_serve(logic, variant, now) {
                self.demand_mut(logic).record_mut(variant).waiting.push_back(now);
            }
        }

        // Next demand.
        let dt = {
            let LogicKind::Demand(demand) = &mut self.logics[logic].kind else {
                unreachable!()
            };
            match &mut demand.interval {
                Some(g) => g.next(&mut self.rng),
                None => return,
            }
        };
        let evt = self
            .queue
            .create(EventKind::CreateDemand { logic }, priority::CREATE_DEMAND);
        self.schedule(evt, dt);
    }

    /// Try to satisfy one demand for `variant` placed at `placed_at`.
    fn demand_try_serve(&mut self, logic: LogicKey, variant: VariantKey, placed_at: SimTime) -> bool {
        let now = self.clock;
        let Some(store) = self.demand_ref(logic).store else {
            return false;
        };
        let supply = {
            let crate::node::NodeKind::Store(s) = &self.nodes[store].kind else {
                return false;
            };
            s.contents
                .iter()
                .map(|&(e, _)| e)
                .find(|&e| self.entities[e].variant == variant)
        };
        let Some(entity) = supply else {
            return false;
        };

        let (use_units, delete_entity) = {
            let d = self.demand_ref(logic);
            (d.use_units, d.delete_entity)
        };
        let consumed_entity = if use_units && self.entities[entity].units > 1 {
            self.entities[entity].units -= 1;
            false
        } else if use_units && !delete_entity {
            self.entities[entity].units = (self.entities[entity].units - 1).max(0);
            false
        } else {
            true
        };
        if consumed_entity {
            let time_on_node = now - self.entities[entity].node_enter_time;
            self.touch_content(store);
            self.store_leave(store, entity);
            self.note_content(store);
            self.nodes[store].base.exit.exit(time_on_node);
            self.notify_exited(store, None, entity);
            self.model_exit(entity);
            self.check_forward_blocking(store);
        }

        let record = self.demand_mut(logic).record_mut(variant);
        record.served += 1;
        let waited = now - placed_at;
        if waited > crate::time::TOLERANCE {
            record.served_late += 1;
            record.tardiness += waited;
        }
        true
    }

    /// A store received supply: drain matching backlog, oldest first.
    pub(crate) fn demand_store_supplied(&mut self, logic: LogicKey, store: NodeKey) {
        if self.demand_ref(logic).store != Some(store) {
            return;
        }
        loop {
            let next = {
                let demand = self.demand_ref(logic);
                demand
                    .records
                    .iter()
                    .filter(|(_, r)| !r.waiting.is_empty())
                    .min_by(|a, b| {
                        a.1.waiting[0]
                            .partial_cmp(&b.1.waiting[0])
                            .expect("demand times are not NaN")
                    })
                    .map(|(v, r)| (*v, r.waiting[0]))
            };
            let Some((variant, placed_at)) = next else {
                return;
            };
            if !self.demand_try_serve(logic, variant, placed_at) {
                return;
            }
            self.demand_mut(logic)
                .record_mut(variant)
                .waiting
                .pop_front();
        }
    }

    /// Observed store received an entity; any demand logic watching it may
    /// serve backlog.
    pub(crate) fn notify_store_supply(&mut self, store: NodeKey) {
        let demands: Vec<LogicKey> = self
            .logics
            .iter()
            .filter(|(_, l)| matches!(&l.kind, LogicKind::Demand(d) if d.store == Some(store)))
            .map(|(k, _)| k)
            .collect();
        for logic in demands {
            self.demand_store_supplied(logic, store);
        }
    }

    pub(crate) fn demand_finalize(&mut self, logic: LogicKey, name: &str) {
        let (backlog, served, tardiness, late) = {
            let d = self.demand_ref(logic);
            let served: u32 = d.records.iter().map(|(_, r)| r.served).sum();
            let tardiness: f64 = d.records.iter().map(|(_, r)| r.tardiness).sum();
            let late: u32 = d.records.iter().map(|(_, r)| r.served_late).sum();
            (d.total_backlog(), served, tardiness, late)
        };
        self.outputs.record(format!("{name}.backlog"), backlog as f64);
        self.outputs.record(format!("{name}.served"), served as f64);
        self.outputs.record(format!("{name}.tardiness"), tardiness);
        let avg = if late == 0 { 0.0 } else { tardiness / late as f64 };
        self.outputs.record(format!("{name}.average_tardiness"), avg);
    }
}
