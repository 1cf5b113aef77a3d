//! Assembly stations: collecting parts onto a container.
//!
//! The specification names a container variant and the part variants with
//! their counts. With `container_first` the container must be admitted
//! before any part. Once the collection is complete the station works for
//! its process time and the assemble event attaches every collected part
//! to the container (or destroys it, for parts marked delete-on-assemble);
//! the assembled composite then exits as one entity.

use crate::event::{priority, EventKind};
use crate::id::{EntityKey, EventKey, NodeKey, VariantKey};
use crate::node::NodeKind;
use crate::sim::Simulation;
use crate::time::SimTime;

/// One required part variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartSpec {
    pub variant: VariantKey,
    pub count: u32,
    /// Destroy the part on assemble instead of attaching it.
    pub delete_on_assemble: bool,
    /// Count received units instead of whole entities.
    pub use_units: bool,
}

/// What one assembled composite is made of.
#[derive(Debug, Clone, Default)]
pub struct AssemblySpec {
    pub container: Option<VariantKey>,
    pub parts: Vec<PartSpec>,
}

impl AssemblySpec {
    /// Total entities a complete collection holds (container included).
    pub fn total_needed(&self) -> usize {
        let parts: u32 = self.parts.iter().map(|p| p.count).sum();
        parts as usize + usize::from(self.container.is_some())
    }
}

/// The part-collecting node.
#[derive(Debug)]
pub struct Assembly {
    pub spec: AssemblySpec,
    /// Deny parts until the container has arrived.
    pub container_first: bool,
    pub container: Option<EntityKey>,
    pub collected: Vec<EntityKey>,
    pub assemble_event: Option<EventKey>,
    /// The assembled composite awaiting exit.
    pub assembled: Option<EntityKey>,
    pub enter_time: SimTime,
}

impl Assembly {
    pub fn new(spec: AssemblySpec, container_first: bool) -> Self {
        Self {
            spec,
            container_first,
            container: None,
            collected: Vec::new(),
            assemble_event: None,
            assembled: None,
            enter_time: 0.0,
        }
    }

    pub fn content_size(&self) -> usize {
        usize::from(self.container.is_some())
            + self.collected.len()
            + usize::from(self.assembled.is_some())
    }

    pub fn max_occupation(&self) -> usize {
        self.spec.total_needed().max(1)
    }

    pub fn init(&mut self) {
        self.container = None;
        self.collected.clear();
        self.assemble_event = None;
        self.assembled = None;
        self.enter_time = 0.0;
    }
}

impl Simulation {
    pub(crate) fn assembly_mut(&mut self, node: NodeKey) -> &mut Assembly {
        match &mut self.nodes[node].kind {
            NodeKind::Assembly(a) => a,
            other => panic!("node is not an Assembly: {}", other.kind_name()),
        }
    }

    pub(crate) fn assembly_ref(&self, node: NodeKey) -> &Assembly {
        match &self.nodes[node].kind {
            NodeKind::Assembly(a) => a,
            other => panic!("node is not an Assembly: {}", other.kind_name()),
        }
    }

    /// How many more entities of `variant` the current collection needs.
    pub(crate) fn assembly_variant_needed(&self, node: NodeKey, variant: VariantKey) -> u32 {
        let a = self.assembly_ref(node);
        if a.assembled.is_some() {
            // Busy assembling; nothing is admitted.
            return 0;
        }
        if a.spec.container == Some(variant) && a.container.is_none() {
            return 1;
        }
        let Some(part) = a.spec.parts.iter().find(|p| p.variant == variant) else {
            return 0;
        };
        if a.container_first && a.container.is_none() && a.spec.container.is_some() {
            return 0;
        }
        let held = a
            .collected
            .iter()
            .filter(|&&e| self.entities[e].variant == variant)
            .count() as u32;
        part.count.saturating_sub(held)
    }

    /// Kind openness: only entities the collection still needs.
    pub(crate) fn assembly_is_open(&self, node: NodeKey, entity: EntityKey) -> bool {
        let variant = self.entities[entity].variant;
        self.assembly_variant_needed(node, variant) > 0
    }

    /// Kind hook: an entity joined the collection.
    pub(crate) fn assembly_enter(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        let variant = self.entities[entity].variant;
        let is_container = {
            let a = self.assembly_ref(node);
            a.spec.container == Some(variant) && a.container.is_none()
        };
        {
            let a = self.assembly_mut(node);
            if is_container {
                a.container = Some(entity);
                a.enter_time = now;
            } else {
                a.collected.push(entity);
            }
        }
        self.nodes[node].base.set_end_empty(now);

        if self.assembly_is_complete(node) {
            let work_for = self.assembly_ref(node).container.unwrap_or(entity);
            self.set_working(node);
            let dt = self.draw_process_time(node, work_for);
            let evt = self.queue.create(
                EventKind::Assemble {
                    node,
                    entity: work_for,
                },
                priority::ASSEMBLY,
            );
            self.schedule(evt, dt);
            self.assembly_mut(node).assemble_event = Some(evt);
        } else if is_container {
            // The container's arrival may unblock waiting parts.
            self.check_forward_blocking(node);
        }
    }

    /// True when the container is present and every part count is met.
    pub(crate) fn assembly_is_complete(&self, node: NodeKey) -> bool {
        let a = self.assembly_ref(node);
        if a.spec.container.is_some() && a.container.is_none() {
            return false;
        }
        a.spec.parts.iter().all(|part| {
            let held = a
                .collected
                .iter()
                .filter(|&&e| self.entities[e].variant == part.variant)
                .count() as u32;
            held >= part.count
        })
    }

    /// Handle an `Assemble` event: attach or consume the parts and send
    /// the composite on its way.
    pub(crate) fn process_assemble(&mut self, node: NodeKey, container: EntityKey) {
        self.assembly_mut(node).assemble_event = None;
        let mut collected = std::mem::take(&mut self.assembly_mut(node).collected);
        // In a container-less specification the composite is one of the
        // collected parts; it must not be attached to itself.
        collected.retain(|&p| p != container);
        let delete_variants: Vec<(VariantKey, bool)> = self
            .assembly_ref(node)
            .spec
            .parts
            .iter()
            .map(|p| (p.variant, p.delete_on_assemble))
            .collect();

        for part in collected {
            let variant = self.entities[part].variant;
            let delete = delete_variants
                .iter()
                .find(|(v, _)| *v == variant)
                .map(|(_, d)| *d)
                .unwrap_or(false);
            if delete {
                self.destroy_entity(part);
            } else {
                // Ownership transfers to the container.
                self.entities[part].departure = None;
                self.entities[part].assembly_identity = Some(container);
                self.entities[container].add_part(part);
            }
        }

        {
            let a = self.assembly_mut(node);
            a.container = None;
            a.assembled = Some(container);
        }
        self.schedule_event_out(node, container, 0.0, priority::OUT);
    }

    /// Kind hook: the assembled composite left.
    pub(crate) fn assembly_leave(&mut self, node: NodeKey, entity: EntityKey) {
        let now = self.clock;
        let empty = {
            let a = self.assembly_mut(node);
            if a.assembled == Some(entity) {
                a.assembled = None;
            }
            a.container.is_none() && a.collected.is_empty() && a.assembled.is_none()
        };
        if empty {
            self.set_waiting(node);
            self.nodes[node].base.set_start_empty(now);
        }
    }
}
