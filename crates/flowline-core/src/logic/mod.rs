//! Cross-cutting logics: rules that veto admission or drive their own
//! events.
//!
//! A logic attaches to nodes in two roles: as an *enter logic* on a node's
//! enter port (consulted by `is_open`, any veto denies admission) and as an
//! *observer* on nodes whose entries and exits it needs to count. The
//! dispatch here fans a role call out to the concrete logic.

pub mod batch;
pub mod demand;
pub mod kanban;
pub mod maxwip;
pub mod order;
pub mod takt;

pub use batch::{ActiveBatch, Batch, BatchItem};
pub use demand::Demand;
pub use kanban::{Kanban, KanbanItem};
pub use maxwip::{CriticalWip, MaxWip};
pub use order::{Order, OrderItem};
pub use takt::Takt;

use crate::id::{EntityKey, LogicKey, NodeKey};
use crate::sim::Simulation;

/// Concrete logic state.
#[derive(Debug)]
pub enum LogicKind {
    Batch(Batch),
    Kanban(Kanban),
    MaxWip(MaxWip),
    CriticalWip(CriticalWip),
    Order(Order),
    Demand(Demand),
    Takt(Takt),
}

impl LogicKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            LogicKind::Batch(_) => "Batch",
            LogicKind::Kanban(_) => "Kanban",
            LogicKind::MaxWip(_) => "MaxWip",
            LogicKind::CriticalWip(_) => "CriticalWip",
            LogicKind::Order(_) => "Order",
            LogicKind::Demand(_) => "Demand",
            LogicKind::Takt(_) => "Takt",
        }
    }
}

/// A named, switchable logic.
#[derive(Debug)]
pub struct Logic {
    pub name: String,
    pub enabled: bool,
    pub kind: LogicKind,
}

impl Logic {
    pub fn new(name: impl Into<String>, kind: LogicKind) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            kind,
        }
    }
}

impl Simulation {
    /// Enter-logic role: may `entity` enter `node`?
    pub(crate) fn logic_allow_enter(
        &mut self,
        logic: LogicKey,
        node: NodeKey,
        entity: EntityKey,
    ) -> bool {
        if !self.logics[logic].enabled {
            return true;
        }
        match &self.logics[logic].kind {
            LogicKind::Batch(_) => self.batch_allow_enter(logic, node, entity),
            LogicKind::Kanban(_) => self.kanban_allow_enter(logic, entity),
            LogicKind::MaxWip(_) => self.maxwip_allow_enter(logic, entity),
            LogicKind::CriticalWip(_) => self.criticalwip_allow_enter(logic, entity),
            LogicKind::Order(_) => self.order_allow_enter(logic, node, entity),
            LogicKind::Demand(_) => true,
            LogicKind::Takt(_) => true,
        }
    }

    /// Exit-logic role: may `entity` leave `node` now?
    pub(crate) fn logic_allow_leave(
        &mut self,
        logic: LogicKey,
        node: NodeKey,
        entity: EntityKey,
    ) -> bool {
        if !self.logics[logic].enabled {
            return true;
        }
        match &self.logics[logic].kind {
            LogicKind::Takt(_) => self.takt_allow_leave(logic, node, entity),
            _ => true,
        }
    }

    /// Observer role: an entity entered an observed node.
    pub(crate) fn logic_on_entered(
        &mut self,
        logic: LogicKey,
        departure: Option<NodeKey>,
        node: NodeKey,
        entity: EntityKey,
    ) {
        if !self.logics[logic].enabled {
            return;
        }
        match &self.logics[logic].kind {
            LogicKind::Batch(_) => self.batch_on_entered(logic, node, entity),
            LogicKind::Kanban(_) => self.kanban_on_entered(logic, node, entity),
            LogicKind::MaxWip(_) => self.maxwip_on_entered(logic, node, entity),
            LogicKind::CriticalWip(_) => self.criticalwip_on_entered(logic, node, entity),
            LogicKind::Order(_) => self.order_on_entered(logic, node, entity),
            LogicKind::Takt(_) => self.takt_on_entered(logic, departure, node, entity),
            LogicKind::Demand(_) => {}
        }
    }

    /// Observer role: an entity exited an observed node.
    pub(crate) fn logic_on_exited(
        &mut self,
        logic: LogicKey,
        node: NodeKey,
        destination: Option<NodeKey>,
        entity: EntityKey,
    ) {
        if !self.logics[logic].enabled {
            return;
        }
        match &self.logics[logic].kind {
            LogicKind::Kanban(_) => self.kanban_on_exited(logic, node, entity),
            LogicKind::MaxWip(_) => self.maxwip_on_exited(logic, node, entity),
            LogicKind::CriticalWip(_) => self.criticalwip_on_exited(logic, node, entity),
            LogicKind::Batch(_) => self.batch_on_exited(logic, node, entity),
            LogicKind::Takt(_) => self.takt_on_exited(logic, node, destination, entity),
            _ => {}
        }
    }

    /// An entity is being destroyed; logics drop their references.
    pub(crate) fn logic_entity_deleted(&mut self, logic: LogicKey, entity: EntityKey) {
        match &self.logics[logic].kind {
            LogicKind::Kanban(_) => self.kanban_entity_deleted(logic, entity),
            LogicKind::MaxWip(_) => self.maxwip_entity_deleted(logic, entity),
            LogicKind::CriticalWip(_) => self.criticalwip_entity_deleted(logic, entity),
            LogicKind::Batch(_) => self.batch_entity_deleted(logic, entity),
            LogicKind::Takt(_) => self.takt_entity_deleted(logic, entity),
            _ => {}
        }
    }

    /// Per-replication initialization.
    pub(crate) fn logic_init(&mut self, logic: LogicKey) {
        match &mut self.logics[logic].kind {
            LogicKind::Batch(b) => b.init(),
            LogicKind::Kanban(k) => k.init(),
            LogicKind::MaxWip(m) => m.init(),
            LogicKind::CriticalWip(c) => c.init(),
            LogicKind::Order(o) => o.init(),
            LogicKind::Demand(d) => d.init(),
            LogicKind::Takt(t) => t.init(),
        }
    }

    /// Flush per-replication outputs.
    pub(crate) fn logic_finalize(&mut self, logic: LogicKey) {
        let name = self.logics[logic].name.clone();
        match &self.logics[logic].kind {
            LogicKind::Takt(_) => self.takt_finalize(logic, &name),
            LogicKind::Demand(_) => self.demand_finalize(logic, &name),
            LogicKind::Kanban(_) => self.kanban_finalize(logic, &name),
            LogicKind::MaxWip(_) => self.maxwip_finalize(logic, &name),
            LogicKind::Batch(_) => self.batch_finalize(logic, &name),
            _ => {}
        }
    }
}
