//! Dispatch rules: ordering of a forward-block list before unblocking.
//!
//! The enter port sorts its blocked entities with the attached rule before
//! scheduling the next unblocked out event. The rules needing model context
//! (order priority, processing and setup time estimates) receive the key
//! per entity from the simulation; the sort itself is stable, so FIFO order
//! is preserved within ties.

use crate::id::EntityKey;

/// The rule ordering a block list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchRule {
    /// Blocked order (the list's natural sort).
    #[default]
    Fifo,
    /// Ascending order priority.
    Order,
    /// Shortest processing time first.
    Spt,
    /// Shortest setup time from the node's last entity first.
    Sst,
}

/// Stable sort of `entities` by ascending `key`. Ties keep their current
/// (FIFO) order.
pub fn sort_by_key(entities: &mut [EntityKey], key: impl Fn(EntityKey) -> f64) {
    entities.sort_by(|&a, &b| {
        key(a)
            .partial_cmp(&key(b))
            .expect("dispatch keys are not NaN")
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;
    use std::collections::HashMap;

    #[test]
    fn sort_is_stable_within_ties() {
        let mut arena: SlotMap<EntityKey, ()> = SlotMap::with_key();
        let a = arena.insert(());
        let b = arena.insert(());
        let c = arena.insert(());
        let mut keys = HashMap::new();
        keys.insert(a, 2.0);
        keys.insert(b, 1.0);
        keys.insert(c, 2.0);
        let mut list = vec![a, b, c];
        sort_by_key(&mut list, |e| keys[&e]);
        assert_eq!(list, vec![b, a, c]);
    }

    #[test]
    fn default_rule_is_fifo() {
        assert_eq!(DispatchRule::default(), DispatchRule::Fifo);
    }
}
