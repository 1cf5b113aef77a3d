//! MaxWip and CriticalWip: global caps on entities in an area.
//!
//! MaxWip denies admission at its entrances once the area holds the
//! configured number of entities (optionally tightened per variant).
//! CriticalWip derives its cap from a linked store or buffer: a percentage
//! of that node's capacity.

use crate::id::{EntityKey, LogicKey, NodeKey, VariantKey};
use crate::logic::LogicKind;
use crate::sim::Simulation;

/// Fixed cap on the entity count in an area.
#[derive(Debug, Default)]
pub struct MaxWip {
    pub max: usize,
    pub variant_limits: Vec<(VariantKey, usize)>,
    pub entrances: Vec<NodeKey>,
    pub inside: Vec<EntityKey>,
    /// Largest count observed, for outputs.
    pub peak: usize,
}

impl MaxWip {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            ..Self::default()
        }
    }

    pub fn add_variant_limit(&mut self, variant: VariantKey, limit: usize) {
        self.variant_limits.push((variant, limit));
    }

    pub fn current(&self) -> usize {
        self.inside.len()
    }

    pub fn init(&mut self) {
        self.inside.clear();
        self.peak = 0;
    }
}

/// Cap derived from a linked storage node's capacity.
#[derive(Debug)]
pub struct CriticalWip {
    /// Fraction of the linked node's capacity, in (0, 1].
    pub percent: f64,
    pub storage: NodeKey,
    pub entrances: Vec<NodeKey>,
    pub inside: Vec<EntityKey>,
}

impl CriticalWip {
    pub fn new(percent: f64, storage: NodeKey) -> Self {
        Self {
            percent,
            storage,
            entrances: Vec::new(),
            inside: Vec::new(),
        }
    }

    pub fn init(&mut self) {
        self.inside.clear();
    }
}

impl Simulation {
    pub(crate) fn maxwip_mut(&mut self, logic: LogicKey) -> &mut MaxWip {
        match &mut self.logics[logic].kind {
            LogicKind::MaxWip(m) => m,
            other => panic!("logic is not a MaxWip: {}", other.kind_name()),
        }
    }

    pub(crate) fn maxwip_ref(&self, logic: LogicKey) -> &MaxWip {
        match &self.logics[logic].kind {
            LogicKind::MaxWip(m) => m,
            other => panic!("logic is not a MaxWip: {}", other.kind_name()),
        }
    }

    pub(crate) fn maxwip_allow_enter(&mut self, logic: LogicKey, entity: EntityKey) -> bool {
        let variant = self.entities[entity].variant;
        let m = self.maxwip_ref(logic);
        if m.inside.len() >= m.max {
            return false;
        }
        if let Some(&(_, limit)) = m.variant_limits.iter().find(|(v, _)| *v == variant) {
            let held = m
                .inside
                .iter()
                .filter(|&&e| self.entities[e].variant == variant)
                .count();
            if held >= limit {
                return false;
            }
        }
        true
    }

    pub(crate) fn maxwip_on_entered(&mut self, logic: LogicKey, node: NodeKey, entity: EntityKey) {
        if !self.maxwip_ref(logic).entrances.contains(&node) {
            return;
        }
        let m = self.maxwip_mut(logic);
        if !m.inside.contains(&entity) {
            m.inside.push(entity);
            m.peak = m.peak.max(m.inside.len());
        }
    }

    pub(crate) fn maxwip_on_exited(&mut self, logic: LogicKey, _node: NodeKey, entity: EntityKey) {
        let was_inside = {
            let m = self.maxwip_mut(logic);
            let was = m.inside.contains(&entity);
            m.inside.retain(|&e| e != entity);
            was
        };
        if was_inside {
            let entrances = self.maxwip_ref(logic).entrances.clone();
            for entrance in entrances {
                self.check_forward_blocking(entrance);
            }
        }
    }

    pub(crate) fn maxwip_entity_deleted(&mut self, logic: LogicKey, entity: EntityKey) {
        if self.maxwip_ref(logic).inside.contains(&entity) {
            match self.maxwip_ref(logic).entrances.first().copied() {
                Some(node) => self.maxwip_on_exited(logic, node, entity),
                None => self.maxwip_mut(logic).inside.retain(|&e| e != entity),
            }
        }
    }

    pub(crate) fn maxwip_finalize(&mut self, logic: LogicKey, name: &str) {
        let (current, peak) = {
            let m = self.maxwip_ref(logic);
            (m.inside.len(), m.peak)
        };
        self.outputs.record(format!("{name}.wip"), current as f64);
        self.outputs.record(format!("{name}.peak_wip"), peak as f64);
    }

    // -- CriticalWip ------------------------------------------------------

    pub(crate) fn criticalwip_mut(&mut self, logic: LogicKey) -> &mut CriticalWip {
        match &mut self.logics[logic].kind {
            LogicKind::CriticalWip(c) => c,
            other => panic!("logic is not a CriticalWip: {}", other.kind_name()),
        }
    }

    pub(crate) fn criticalwip_ref(&self, logic: LogicKey) -> &CriticalWip {
        match &self.logics[logic].kind {
            LogicKind::CriticalWip(c) => c,
            other => panic!("logic is not a CriticalWip: {}", other.kind_name()),
        }
    }

    /// The derived cap: percent of the linked node's capacity, at least 1.
    pub(crate) fn criticalwip_cap(&self, logic: LogicKey) -> usize {
        let c = self.criticalwip_ref(logic);
        let capacity = self.nodes[c.storage].max_occupation();
        if capacity == usize::MAX {
            return usize::MAX;
        }
        ((capacity as f64 * c.percent).floor() as usize).max(1)
    }

    pub(crate) fn criticalwip_allow_enter(&mut self, logic: LogicKey, _entity: EntityKey) -> bool {
        self.criticalwip_ref(logic).inside.len() < self.criticalwip_cap(logic)
    }

    pub(crate) fn criticalwip_on_entered(
        &mut self,
        logic: LogicKey,
        node: NodeKey,
        entity: EntityKey,
    ) {
        if !self.criticalwip_ref(logic).entrances.contains(&node) {
            return;
        }
        let c = self.criticalwip_mut(logic);
        if !c.inside.contains(&entity) {
            c.inside.push(entity);
        }
    }

    pub(crate) fn criticalwip_on_exited(
        &mut self,
        logic: LogicKey,
        _node: NodeKey,
        entity: EntityKey,
    ) {
        let was_inside = {
            let c = self.criticalwip_mut(logic);
            let was = c.inside.contains(&entity);
            c.inside.retain(|&e| e != entity);
            was
        };
        if was_inside {
            let entrances = self.criticalwip_ref(logic).entrances.clone();
            for entrance in entrances {
                self.check_forward_blocking(entrance);
            }
        }
    }

    pub(crate) fn criticalwip_entity_deleted(&mut self, logic: LogicKey, entity: EntityKey) {
        if self.criticalwip_ref(logic).inside.contains(&entity) {
            match self.criticalwip_ref(logic).entrances.first().copied() {
                Some(node) => self.criticalwip_on_exited(logic, node, entity),
                None => self.criticalwip_mut(logic).inside.retain(|&e| e != entity),
            }
        }
    }
}
