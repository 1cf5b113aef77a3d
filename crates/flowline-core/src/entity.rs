//! Mobile entities.
//!
//! An entity has exactly one current location (its departure node) unless it
//! is held as an assembled part of another entity. Block-list membership is
//! mirrored on the entity so that clearing it from every list is O(lists).

use crate::id::{BatchId, EntityKey, LogicKey, NodeKey, VariantKey};
use crate::time::SimTime;

/// A unit of material moving through the model.
#[derive(Debug)]
pub struct Entity {
    /// Unique per replication, assigned by the creating variant.
    pub id: u32,
    pub variant: VariantKey,
    /// The node the entity is currently on. `None` while held as an
    /// assembled part or after removal from the model.
    pub departure: Option<NodeKey>,
    /// Destination chosen when an out event was scheduled from a block
    /// list; cleared when consumed.
    pub destination: Option<NodeKey>,
    /// Simulation time the entity entered the model.
    pub model_enter_time: SimTime,
    /// Simulation time the entity entered its current node.
    pub node_enter_time: SimTime,
    /// Units carried, for consumable material.
    pub units: i32,
    /// The entity whose variant is used for routing and time lookups when
    /// this entity is a composite. Follows the chain on resolution.
    pub assembly_identity: Option<EntityKey>,
    /// Assembled parts owned by this entity.
    pub parts: Vec<EntityKey>,
    pub batch: Option<BatchId>,
    /// Enter ports whose forward-block list currently holds this entity.
    pub forward_blocking: Vec<NodeKey>,
    /// Enter logics whose block list currently holds this entity.
    pub logic_blocking: Vec<LogicKey>,
    /// Time this entity was first denied admission (sort key on block
    /// lists).
    pub start_blocked: SimTime,
    pub exit_blocked: bool,
    /// Number of out events currently scheduled for this entity.
    pub out_events: u32,
    /// Nodes holding a skills-first resource request made for this entity.
    pub resource_requests: Vec<NodeKey>,
    pub overtake: bool,
    pub require_disassembly: bool,
}

impl Entity {
    pub fn new(id: u32, variant: VariantKey, now: SimTime, units: i32) -> Self {
        Self {
            id,
            variant,
            departure: None,
            destination: None,
            model_enter_time: now,
            node_enter_time: now,
            units,
            assembly_identity: None,
            parts: Vec::new(),
            batch: None,
            forward_blocking: Vec::new(),
            logic_blocking: Vec::new(),
            start_blocked: 0.0,
            exit_blocked: false,
            out_events: 0,
            resource_requests: Vec::new(),
            overtake: false,
            require_disassembly: false,
        }
    }

    /// True if this entity sits on at least one forward-block list.
    pub fn is_forward_blocked(&self) -> bool {
        !self.forward_blocking.is_empty()
    }

    pub fn is_out_event_scheduled(&self) -> bool {
        self.out_events > 0
    }

    pub fn add_part(&mut self, part: EntityKey) {
        self.parts.push(part);
    }

    pub fn remove_part(&mut self, part: EntityKey) -> bool {
        match self.parts.iter().position(|&p| p == part) {
            Some(index) => {
                self.parts.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn add_units(&mut self, value: i32) {
        self.units += value;
    }

    pub fn decrement_units(&mut self, value: i32) {
        self.units -= value;
    }
}

/// Resolve the assembly identity of `entity` by following identity links
/// until an entity without one is found.
pub fn assembly_identity(
    entities: &slotmap::SlotMap<EntityKey, Entity>,
    entity: EntityKey,
) -> EntityKey {
    let mut current = entity;
    let mut hops = 0;
    while let Some(next) = entities[current].assembly_identity {
        current = next;
        hops += 1;
        assert!(hops < 10_000, "assembly identity chain forms a cycle");
    }
    current
}

/// Collect all assembled parts of `entity`, optionally recursing into
/// parts that are themselves composites.
pub fn collect_parts(
    entities: &slotmap::SlotMap<EntityKey, Entity>,
    entity: EntityKey,
    recursive: bool,
    into: &mut Vec<EntityKey>,
) {
    for &part in &entities[entity].parts {
        into.push(part);
        if recursive {
            collect_parts(entities, part, true, into);
        }
    }
}

/// Total number of parts assembled onto `entity`, recursively.
pub fn total_parts(entities: &slotmap::SlotMap<EntityKey, Entity>, entity: EntityKey) -> u32 {
    let mut all = Vec::new();
    collect_parts(entities, entity, true, &mut all);
    all.len() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn variant_key() -> VariantKey {
        let mut arena: SlotMap<VariantKey, ()> = SlotMap::with_key();
        arena.insert(())
    }

    #[test]
    fn new_entity_is_unblocked() {
        let e = Entity::new(1, variant_key(), 0.0, 1);
        assert!(!e.is_forward_blocked());
        assert!(!e.is_out_event_scheduled());
        assert!(e.parts.is_empty());
    }

    #[test]
    fn parts_add_and_remove() {
        let variant = variant_key();
        let mut entities: SlotMap<EntityKey, Entity> = SlotMap::with_key();
        let container = entities.insert(Entity::new(1, variant, 0.0, 1));
        let part = entities.insert(Entity::new(2, variant, 0.0, 1));
        entities[container].add_part(part);
        assert_eq!(entities[container].parts.len(), 1);
        assert!(entities[container].remove_part(part));
        assert!(!entities[container].remove_part(part));
    }

    #[test]
    fn identity_chain_resolves_to_root() {
        let variant = variant_key();
        let mut entities: SlotMap<EntityKey, Entity> = SlotMap::with_key();
        let root = entities.insert(Entity::new(1, variant, 0.0, 1));
        let mid = entities.insert(Entity::new(2, variant, 0.0, 1));
        let leaf = entities.insert(Entity::new(3, variant, 0.0, 1));
        entities[mid].assembly_identity = Some(root);
        entities[leaf].assembly_identity = Some(mid);
        assert_eq!(assembly_identity(&entities, leaf), root);
        assert_eq!(assembly_identity(&entities, root), root);
    }

    #[test]
    fn recursive_part_collection() {
        let variant = variant_key();
        let mut entities: SlotMap<EntityKey, Entity> = SlotMap::with_key();
        let container = entities.insert(Entity::new(1, variant, 0.0, 1));
        let sub = entities.insert(Entity::new(2, variant, 0.0, 1));
        let nested = entities.insert(Entity::new(3, variant, 0.0, 1));
        entities[container].add_part(sub);
        entities[sub].add_part(nested);

        let mut direct = Vec::new();
        collect_parts(&entities, container, false, &mut direct);
        assert_eq!(direct, vec![sub]);

        assert_eq!(total_parts(&entities, container), 2);
    }
}
