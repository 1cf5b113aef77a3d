//! Takt logic: lockstep advancement across a set of nodes.
//!
//! Exits from the takted nodes are held until the takt period completes.
//! A period completes at `cycle_start + takt_time` if every occupied node
//! has finished by then (the idle stretch is recorded as deceed time);
//! otherwise it completes when the last node finishes, and the overrun is
//! recorded as exceed time. All held entities then advance at the same
//! instant, after which the next period begins.

use crate::event::{priority, EventKind};
use crate::id::{EntityKey, EventKey, LogicKey, NodeKey};
use crate::logic::LogicKind;
use crate::sim::Simulation;
use crate::time::SimTime;

/// Per-node activity counters across takt cycles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaktNodeCount {
    pub node: NodeKey,
    /// Cycles in which the node processed an entity.
    pub active: u32,
    /// Cycles in which the node stood empty.
    pub inactive: u32,
}

/// The lockstep exit logic.
#[derive(Debug)]
pub struct Takt {
    pub nodes: Vec<NodeKey>,
    pub takt_time: SimTime,
    pub cycle_start: SimTime,
    /// True while the held entities advance.
    pub move_allowed: bool,
    /// The period end passed before every node finished.
    pub overdue: bool,
    /// Nodes that finished this cycle, with their finish times.
    pub finished: Vec<(NodeKey, SimTime)>,
    /// Entities held at their exits until the period completes.
    pub held: Vec<EntityKey>,
    pub complete_event: Option<EventKey>,
    pub exceed_time: SimTime,
    pub deceed_time: SimTime,
    pub cycles: u32,
    pub node_counts: Vec<TaktNodeCount>,
}

impl Takt {
    pub fn new(takt_time: SimTime) -> Self {
        Self {
            nodes: Vec::new(),
            takt_time,
            cycle_start: 0.0,
            move_allowed: false,
            overdue: false,
            finished: Vec::new(),
            held: Vec::new(),
            complete_event: None,
            exceed_time: 0.0,
            deceed_time: 0.0,
            cycles: 0,
            node_counts: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: NodeKey) {
        self.nodes.push(node);
        self.node_counts.push(TaktNodeCount {
            node,
            active: 0,
            inactive: 0,
        });
    }

    pub fn is_finished(&self, node: NodeKey) -> bool {
        self.finished.iter().any(|(n, _)| *n == node)
    }

    pub fn last_finish(&self) -> Option<SimTime> {
        self.finished
            .iter()
            .map(|(_, t)| *t)
            .fold(None, |acc, t| Some(acc.map_or(t, |a: f64| a.max(t))))
    }

    pub fn init(&mut self) {
        self.cycle_start = 0.0;
        self.move_allowed = false;
        self.overdue = false;
        self.finished.clear();
        self.held.clear();
        self.complete_event = None;
        self.exceed_time = 0.0;
        self.deceed_time = 0.0;
        self.cycles = 0;
        for count in &mut self.node_counts {
            count.active = 0;
            count.inactive = 0;
        }
    }
}

impl Simulation {
    pub(crate) fn takt_mut(&mut self, logic: LogicKey) -> &mut Takt {
        match &mut self.logics[logic].kind {
            LogicKind::Takt(t) => t,
            other => panic!("logic is not a Takt: {}", other.kind_name()),
        }
    }

    pub(crate) fn takt_ref(&self, logic: LogicKey) -> &Takt {
        match &self.logics[logic].kind {
            LogicKind::Takt(t) => t,
            other => panic!("logic is not a Takt: {}", other.kind_name()),
        }
    }

    /// Begin the first takt period of a replication.
    pub(crate) fn init_takt(&mut self, logic: LogicKey) {
        self.takt_start_cycle(logic);
    }

    fn takt_start_cycle(&mut self, logic: LogicKey) {
        let now = self.clock;
        let takt_time = {
            let takt = self.takt_mut(logic);
            takt.cycle_start = now;
            takt.move_allowed = false;
            takt.overdue = false;
            takt.finished.clear();
            takt.held.clear();
            takt.takt_time
        };
        let evt = self
            .queue
            .create(EventKind::TaktComplete { logic }, priority::TAKT_COMPLETE);
        self.schedule(evt, takt_time);
        self.takt_mut(logic).complete_event = Some(evt);
    }

    /// Exit gate: hold entities until the period completes.
    pub(crate) fn takt_allow_leave(
        &mut self,
        logic: LogicKey,
        node: NodeKey,
        entity: EntityKey,
    ) -> bool {
        if !self.takt_ref(logic).nodes.contains(&node) {
            return true;
        }
        if self.takt_ref(logic).move_allowed {
            return true;
        }
        let now = self.clock;
        {
            let takt = self.takt_mut(logic);
            if !takt.is_finished(node) {
                takt.finished.push((node, now));
            }
            if !takt.held.contains(&entity) {
                takt.held.push(entity);
            }
        }
        if self.takt_ref(logic).overdue && self.takt_all_finished(logic) {
            // The last straggler finished after the period end.
            let takt_end = {
                let takt = self.takt_ref(logic);
                takt.cycle_start + takt.takt_time
            };
            self.takt_mut(logic).exceed_time += (now - takt_end).max(0.0);
            self.takt_move(logic);
        }
        false
    }

    /// Every takted node is either empty or has finished its entity.
    pub(crate) fn takt_all_finished(&self, logic: LogicKey) -> bool {
        let takt = self.takt_ref(logic);
        takt.nodes.iter().all(|&node| {
            self.nodes[node].content_size() == 0 || takt.is_finished(node)
        })
    }

    /// Handle a `TaktComplete` event: either the period end or the cycle
    /// boundary after a move.
    pub(crate) fn process_takt_complete(&mut self, logic: LogicKey) {
        self.takt_mut(logic).complete_event = None;
        if self.takt_ref(logic).move_allowed {
            // The move finished; the next period begins now.
            self.takt_start_cycle(logic);
            return;
        }
        if self.takt_all_finished(logic) {
            let now = self.clock;
            if let Some(last) = self.takt_ref(logic).last_finish() {
                self.takt_mut(logic).deceed_time += (now - last).max(0.0);
            }
            self.takt_move(logic);
        } else {
            // Wait for the stragglers; the last finish triggers the move.
            self.takt_mut(logic).overdue = true;
        }
    }

    /// Release every held entity at this instant and schedule the cycle
    /// boundary behind their moves.
    fn takt_move(&mut self, logic: LogicKey) {
        let held = {
            let takt = self.takt_mut(logic);
            takt.move_allowed = true;
            takt.cycles += 1;
            takt.held.clone()
        };
        // Activity bookkeeping for the completed cycle.
        let nodes = self.takt_ref(logic).nodes.clone();
        for node in nodes {
            let active = self.takt_ref(logic).is_finished(node);
            let takt = self.takt_mut(logic);
            if let Some(count) = takt.node_counts.iter_mut().find(|c| c.node == node) {
                if active {
                    count.active += 1;
                } else {
                    count.inactive += 1;
                }
            }
        }
        for entity in held {
            if let Some(node) = self.entities[entity].departure {
                self.nodes[node].base.exit.remove_exit_blocking(entity);
                self.entities[entity].exit_blocked = false;
                self.schedule_event_out(node, entity, 0.0, priority::TAKT_COMPLETE_UNBLOCKED);
            }
        }
        // The boundary runs after the released outs (same time, priority
        // ordering TaktCompleteUnblocked < TaktComplete).
        let evt = self
            .queue
            .create(EventKind::TaktComplete { logic }, priority::TAKT_COMPLETE);
        self.schedule(evt, 0.0);
        self.takt_mut(logic).complete_event = Some(evt);
    }

    pub(crate) fn takt_on_entered(
        &mut self,
        _logic: LogicKey,
        _departure: Option<NodeKey>,
        _node: NodeKey,
        _entity: EntityKey,
    ) {
    }

    pub(crate) fn takt_on_exited(
        &mut self,
        logic: LogicKey,
        _node: NodeKey,
        _destination: Option<NodeKey>,
        entity: EntityKey,
    ) {
        self.takt_mut(logic).held.retain(|&e| e != entity);
    }

    pub(crate) fn takt_entity_deleted(&mut self, logic: LogicKey, entity: EntityKey) {
        self.takt_mut(logic).held.retain(|&e| e != entity);
    }

    pub(crate) fn takt_finalize(&mut self, logic: LogicKey, name: &str) {
        let (exceed, deceed, cycles) = {
            let takt = self.takt_ref(logic);
            (takt.exceed_time, takt.deceed_time, takt.cycles)
        };
        self.outputs.record(format!("{name}.exceed_time"), exceed);
        self.outputs.record(format!("{name}.deceed_time"), deceed);
        self.outputs.record(format!("{name}.cycles"), cycles as f64);
        let counts = self.takt_ref(logic).node_counts.clone();
        for count in counts {
            let node_name = self.nodes[count.node].name.clone();
            self.outputs
                .record(format!("{name}.{node_name}.active"), count.active as f64);
            self.outputs
                .record(format!("{name}.{node_name}.inactive"), count.inactive as f64);
        }
    }
}
