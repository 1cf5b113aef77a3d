use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a flow node in the model.
    pub struct NodeKey;

    /// Identifies a mobile entity.
    pub struct EntityKey;

    /// Identifies an event record in the event queue arena.
    pub struct EventKey;

    /// Identifies a variant (entity type descriptor).
    pub struct VariantKey;

    /// Identifies a failure attached to a node.
    pub struct FailureKey;

    /// Identifies a cross-cutting logic (batch, kanban, takt, ...).
    pub struct LogicKey;

    /// Identifies a resource manager (pool owner).
    pub struct ManagerKey;

    /// Identifies a pool resource owned by a resource manager.
    pub struct ResourceKey;

    /// Identifies a shift calendar.
    pub struct CalendarKey;
}

/// Identifies a skill in the model-global skill registry. Cheap to copy
/// and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SkillId(pub u32);

/// Identifies a batch. Unique across the whole simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub u32);

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn keys_are_distinct_per_slot() {
        let mut nodes: SlotMap<NodeKey, &str> = SlotMap::with_key();
        let a = nodes.insert("a");
        let b = nodes.insert("b");
        assert_ne!(a, b);
        assert_eq!(nodes[a], "a");
    }

    #[test]
    fn skill_ids_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(SkillId(0), "weld");
        map.insert(SkillId(1), "paint");
        assert_eq!(map[&SkillId(0)], "weld");
    }
}
