//! Move strategies: the policy that picks an entity's next destination.
//!
//! A strategy owns the ordered successor links of its node and answers two
//! questions: in which order should destinations be tried for a given
//! entity, and which position does a destination hold (the successor order
//! used to break ties on forward-block lists). Strategies with memory
//! (cyclic, weighted, sequences) update it through [`MoveStrategy::chosen`]
//! and [`MoveStrategy::entity_exited`].

use crate::id::{EntityKey, NodeKey, VariantKey};
use crate::SimRng;
use rand::Rng;
use std::collections::HashMap;

/// A successor link with its configured weight. For the sequence strategy
/// the weight doubles as the per-link repetition count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub node: NodeKey,
    pub weight: i32,
}

/// Per-variant cursor of the sequence strategy.
#[derive(Debug, Clone, Copy, Default)]
struct SequenceCursor {
    index: usize,
    used: i32,
}

/// Strategy-specific state.
#[derive(Debug)]
pub enum StrategyKind {
    /// Try successors in declared order.
    Successor,
    /// Round-robin with memory of the last choice.
    Cyclic { next: usize },
    /// Uniformly random order.
    Random,
    /// Discrete distribution over the link weights. In blocking mode only
    /// the sampled successor is tried.
    Weighted { blocking: bool, selected: Option<usize> },
    /// Per-variant round-robin; each link is used `weight` times before
    /// the cursor advances. The entity waits if its link is closed.
    Sequence { cursors: HashMap<VariantKey, SequenceCursor> },
    /// Per-entity round-robin; each routed entity advances its own cursor.
    /// Required for disassembly output routing.
    SequenceEntity { cursors: HashMap<EntityKey, usize> },
}

/// A move strategy: successor links plus the selection policy.
#[derive(Debug)]
pub struct MoveStrategy {
    pub links: Vec<Link>,
    pub kind: StrategyKind,
}

impl MoveStrategy {
    pub fn successor() -> Self {
        Self::with_kind(StrategyKind::Successor)
    }

    pub fn cyclic() -> Self {
        Self::with_kind(StrategyKind::Cyclic { next: 0 })
    }

    pub fn random() -> Self {
        Self::with_kind(StrategyKind::Random)
    }

    pub fn weighted(blocking: bool) -> Self {
        Self::with_kind(StrategyKind::Weighted {
            blocking,
            selected: None,
        })
    }

    pub fn sequence() -> Self {
        Self::with_kind(StrategyKind::Sequence {
            cursors: HashMap::new(),
        })
    }

    pub fn sequence_entity() -> Self {
        Self::with_kind(StrategyKind::SequenceEntity {
            cursors: HashMap::new(),
        })
    }

    fn with_kind(kind: StrategyKind) -> Self {
        Self {
            links: Vec::new(),
            kind,
        }
    }

    pub fn add_destination(&mut self, node: NodeKey, weight: i32) {
        self.links.push(Link { node, weight });
    }

    pub fn remove_destination(&mut self, node: NodeKey) {
        self.links.retain(|l| l.node != node);
    }

    pub fn has_destination(&self, node: NodeKey) -> bool {
        self.links.iter().any(|l| l.node == node)
    }

    pub fn successors(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.links.iter().map(|l| l.node)
    }

    /// Link indices in the order they should be tried for this entity.
    /// An empty result means the entity has no candidate right now.
    pub fn candidates(
        &mut self,
        rng: &mut SimRng,
        entity: EntityKey,
        variant: VariantKey,
    ) -> Vec<usize> {
        let n = self.links.len();
        if n == 0 {
            return Vec::new();
        }
        match &mut self.kind {
            StrategyKind::Successor => (0..n).collect(),
            StrategyKind::Cyclic { next } => {
                let start = *next % n;
                (0..n).map(|i| (start + i) % n).collect()
            }
            StrategyKind::Random => {
                let mut order: Vec<usize> = (0..n).collect();
                // Fisher-Yates off the simulation RNG.
                for i in (1..n).rev() {
                    let j = rng.gen_range(0..=i);
                    order.swap(i, j);
                }
                order
            }
            StrategyKind::Weighted { blocking, selected } => {
                let total: i64 = self.links.iter().map(|l| l.weight.max(0) as i64).sum();
                let pick = if total <= 0 {
                    0
                } else {
                    let mut roll = rng.gen_range(0..total);
                    let mut index = 0;
                    for (i, link) in self.links.iter().enumerate() {
                        let w = link.weight.max(0) as i64;
                        if roll < w {
                            index = i;
                            break;
                        }
                        roll -= w;
                    }
                    index
                };
                *selected = Some(pick);
                if *blocking {
                    vec![pick]
                } else {
                    let mut order = vec![pick];
                    order.extend((0..n).filter(|&i| i != pick));
                    order
                }
            }
            StrategyKind::Sequence { cursors } => {
                let cursor = cursors.entry(variant).or_default();
                vec![cursor.index % n]
            }
            StrategyKind::SequenceEntity { cursors } => {
                let index = *cursors.entry(entity).or_insert(0);
                vec![index % n]
            }
        }
    }

    /// Record that the entity was accepted by the link at `index`.
    pub fn chosen(&mut self, index: usize, variant: VariantKey) {
        let n = self.links.len();
        if n == 0 {
            return;
        }
        match &mut self.kind {
            StrategyKind::Cyclic { next } => *next = (index + 1) % n,
            StrategyKind::Sequence { cursors } => {
                let count = self.links[index].weight.max(1);
                let cursor = cursors.entry(variant).or_default();
                cursor.used += 1;
                if cursor.used >= count {
                    cursor.used = 0;
                    cursor.index = (cursor.index + 1) % n;
                }
            }
            _ => {}
        }
    }

    /// Update per-entity memory when the entity exits its node.
    pub fn entity_exited(&mut self, entity: EntityKey) {
        let n = self.links.len();
        if let StrategyKind::SequenceEntity { cursors } = &mut self.kind {
            if n > 0 {
                let index = cursors.entry(entity).or_insert(0);
                *index = (*index + 1) % n;
            }
        }
    }

    /// Drop per-entity memory when the entity is destroyed.
    pub fn forget_entity(&mut self, entity: EntityKey) {
        if let StrategyKind::SequenceEntity { cursors } = &mut self.kind {
            cursors.remove(&entity);
        }
    }

    /// Position of `node` among this strategy's successors, used to break
    /// ties when sorting forward-block lists. Unknown nodes sort last.
    pub fn successor_order(&self, node: NodeKey) -> i32 {
        match &self.kind {
            StrategyKind::Weighted {
                blocking: true,
                selected: Some(index),
            } => {
                if self.links.get(*index).map(|l| l.node) == Some(node) {
                    0
                } else {
                    i32::MAX
                }
            }
            _ => self
                .links
                .iter()
                .position(|l| l.node == node)
                .map(|i| i as i32)
                .unwrap_or(i32::MAX),
        }
    }

    /// Reset per-replication memory.
    pub fn init(&mut self) {
        match &mut self.kind {
            StrategyKind::Cyclic { next } => *next = 0,
            StrategyKind::Weighted { selected, .. } => *selected = None,
            StrategyKind::Sequence { cursors } => cursors.clear(),
            StrategyKind::SequenceEntity { cursors } => cursors.clear(),
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Flows and the move controller
// ---------------------------------------------------------------------------

/// A declared set of connections admitting a set of variants.
#[derive(Debug)]
pub struct Flow {
    pub name: String,
    pub variants: Vec<VariantKey>,
    pub any_variant: bool,
}

impl Flow {
    pub fn admits(&self, variant: VariantKey) -> bool {
        self.any_variant || self.variants.contains(&variant)
    }
}

/// How the controller selects a strategy for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerMode {
    /// One strategy per variant (with a shared default).
    Variant,
    /// One strategy per flow; the first flow admitting the variant wins.
    Flow,
}

/// Selects the move strategy that routes a given entity.
#[derive(Debug)]
pub struct MoveController {
    pub mode: ControllerMode,
    pub default: MoveStrategy,
    pub per_variant: Vec<(VariantKey, MoveStrategy)>,
    pub per_flow: Vec<(Flow, MoveStrategy)>,
}

impl MoveController {
    pub fn new(default: MoveStrategy) -> Self {
        Self {
            mode: ControllerMode::Variant,
            default,
            per_variant: Vec::new(),
            per_flow: Vec::new(),
        }
    }

    pub fn set_variant_strategy(&mut self, variant: VariantKey, strategy: MoveStrategy) {
        match self.per_variant.iter_mut().find(|(v, _)| *v == variant) {
            Some((_, s)) => *s = strategy,
            None => self.per_variant.push((variant, strategy)),
        }
    }

    pub fn add_flow(&mut self, flow: Flow, strategy: MoveStrategy) {
        self.mode = ControllerMode::Flow;
        self.per_flow.push((flow, strategy));
    }

    /// The strategy responsible for `variant`.
    pub fn strategy_for(&mut self, variant: VariantKey) -> &mut MoveStrategy {
        match self.mode {
            ControllerMode::Variant => {
                match self.per_variant.iter().position(|(v, _)| *v == variant) {
                    Some(index) => &mut self.per_variant[index].1,
                    None => &mut self.default,
                }
            }
            ControllerMode::Flow => {
                match self.per_flow.iter().position(|(f, _)| f.admits(variant)) {
                    Some(index) => &mut self.per_flow[index].1,
                    None => &mut self.default,
                }
            }
        }
    }

    pub fn strategy_for_ref(&self, variant: VariantKey) -> &MoveStrategy {
        match self.mode {
            ControllerMode::Variant => self
                .per_variant
                .iter()
                .find(|(v, _)| *v == variant)
                .map(|(_, s)| s)
                .unwrap_or(&self.default),
            ControllerMode::Flow => self
                .per_flow
                .iter()
                .find(|(f, _)| f.admits(variant))
                .map(|(_, s)| s)
                .unwrap_or(&self.default),
        }
    }

    /// Add a destination to the default strategy (the plain connection
    /// form used by simple models).
    pub fn add_destination(&mut self, node: NodeKey, weight: i32) {
        self.default.add_destination(node, weight);
    }

    /// Every distinct successor over all strategies.
    pub fn all_successors(&self) -> Vec<NodeKey> {
        let mut nodes: Vec<NodeKey> = Vec::new();
        let mut push_all = |strategy: &MoveStrategy| {
            for link in &strategy.links {
                if !nodes.contains(&link.node) {
                    nodes.push(link.node);
                }
            }
        };
        push_all(&self.default);
        for (_, s) in &self.per_variant {
            push_all(s);
        }
        for (_, s) in &self.per_flow {
            push_all(s);
        }
        nodes
    }

    pub fn init(&mut self) {
        self.default.init();
        for (_, s) in &mut self.per_variant {
            s.init();
        }
        for (_, s) in &mut self.per_flow {
            s.init();
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

    fn keys<K: slotmap::Key>(n: usize) -> Vec<K> {
        let mut arena: SlotMap<K, ()> = SlotMap::with_key();
        (0..n).map(|_| arena.insert(())).collect()
    }

    fn rng() -> SimRng {
        SimRng::seed_from_u64(7)
    }

    fn strategy_with(kind: MoveStrategy, nodes: &[NodeKey]) -> MoveStrategy {
        let mut s = kind;
        for &n in nodes {
            s.add_destination(n, 1);
        }
        s
    }

    #[test]
    fn successor_tries_in_declared_order() {
        let nodes: Vec<NodeKey> = keys(3);
        let entities: Vec<EntityKey> = keys(1);
        let variants: Vec<VariantKey> = keys(1);
        let mut s = strategy_with(MoveStrategy::successor(), &nodes);
        assert_eq!(s.candidates(&mut rng(), entities[0], variants[0]), vec![0, 1, 2]);
        assert_eq!(s.successor_order(nodes[1]), 1);
    }

    #[test]
    fn cyclic_remembers_last_choice() {
        let nodes: Vec<NodeKey> = keys(3);
        let entities: Vec<EntityKey> = keys(1);
        let variants: Vec<VariantKey> = keys(1);
        let mut s = strategy_with(MoveStrategy::cyclic(), &nodes);
        assert_eq!(s.candidates(&mut rng(), entities[0], variants[0])[0], 0);
        s.chosen(0, variants[0]);
        assert_eq!(s.candidates(&mut rng(), entities[0], variants[0])[0], 1);
        s.chosen(2, variants[0]);
        assert_eq!(s.candidates(&mut rng(), entities[0], variants[0])[0], 0);
    }

    #[test]
    fn weighted_blocking_tries_only_the_sample() {
        let nodes: Vec<NodeKey> = keys(2);
        let entities: Vec<EntityKey> = keys(1);
        let variants: Vec<VariantKey> = keys(1);
        let mut s = MoveStrategy::weighted(true);
        s.add_destination(nodes[0], 0);
        s.add_destination(nodes[1], 5);
        let order = s.candidates(&mut rng(), entities[0], variants[0]);
        // Weight 0 never gets sampled.
        assert_eq!(order, vec![1]);
        assert_eq!(s.successor_order(nodes[1]), 0);
        assert_eq!(s.successor_order(nodes[0]), i32::MAX);
    }

    #[test]
    fn sequence_advances_after_count_uses() {
        let nodes: Vec<NodeKey> = keys(2);
        let entities: Vec<EntityKey> = keys(1);
        let variants: Vec<VariantKey> = keys(1);
        let mut s = MoveStrategy::sequence();
        s.add_destination(nodes[0], 2); // use twice
        s.add_destination(nodes[1], 1);
        let v = variants[0];
        let e = entities[0];
        assert_eq!(s.candidates(&mut rng(), e, v), vec![0]);
        s.chosen(0, v);
        assert_eq!(s.candidates(&mut rng(), e, v), vec![0]);
        s.chosen(0, v);
        assert_eq!(s.candidates(&mut rng(), e, v), vec![1]);
        s.chosen(1, v);
        assert_eq!(s.candidates(&mut rng(), e, v), vec![0]);
    }

    #[test]
    fn sequence_entity_is_per_entity() {
        let nodes: Vec<NodeKey> = keys(2);
        let entities: Vec<EntityKey> = keys(2);
        let variants: Vec<VariantKey> = keys(1);
        let mut s = strategy_with(MoveStrategy::sequence_entity(), &nodes);
        let v = variants[0];
        assert_eq!(s.candidates(&mut rng(), entities[0], v), vec![0]);
        s.entity_exited(entities[0]);
        assert_eq!(s.candidates(&mut rng(), entities[0], v), vec![1]);
        // The second entity still starts at the first link.
        assert_eq!(s.candidates(&mut rng(), entities[1], v), vec![0]);
    }

    #[test]
    fn random_is_a_permutation() {
        let nodes: Vec<NodeKey> = keys(4);
        let entities: Vec<EntityKey> = keys(1);
        let variants: Vec<VariantKey> = keys(1);
        let mut s = strategy_with(MoveStrategy::random(), &nodes);
        let mut order = s.candidates(&mut rng(), entities[0], variants[0]);
        order.sort_unstable();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn controller_selects_per_variant_strategy() {
        let nodes: Vec<NodeKey> = keys(2);
        let variants: Vec<VariantKey> = keys(2);
        let mut controller = MoveController::new(strategy_with(
            MoveStrategy::successor(),
            &nodes[..1],
        ));
        controller
            .set_variant_strategy(variants[1], strategy_with(MoveStrategy::successor(), &nodes[1..]));

        assert_eq!(
            controller.strategy_for(variants[0]).links[0].node,
            nodes[0]
        );
        assert_eq!(
            controller.strategy_for(variants[1]).links[0].node,
            nodes[1]
        );
        assert_eq!(controller.all_successors().len(), 2);
    }

    #[test]
    fn controller_flow_mode_matches_admitting_flow() {
        let nodes: Vec<NodeKey> = keys(2);
        let variants: Vec<VariantKey> = keys(2);
        let mut controller = MoveController::new(MoveStrategy::successor());
        controller.add_flow(
            Flow {
                name: "painted".into(),
                variants: vec![variants[0]],
                any_variant: false,
            },
            strategy_with(MoveStrategy::successor(), &nodes[..1]),
        );
        controller.add_flow(
            Flow {
                name: "raw".into(),
                variants: Vec::new(),
                any_variant: true,
            },
            strategy_with(MoveStrategy::successor(), &nodes[1..]),
        );

        assert_eq!(controller.strategy_for(variants[0]).links[0].node, nodes[0]);
        assert_eq!(controller.strategy_for(variants[1]).links[0].node, nodes[1]);
    }
}
