//! Batch logic: grouping incoming entities into batches.
//!
//! The logic gates one node's enter port. Arriving entities of a batched
//! variant wait on the block list until enough of them have gathered to
//! fill the configured batch size; the whole group is then stamped with a
//! fresh batch id and released together. An incomplete batch can start on
//! a timeout, and `finish_batch` forces one closed.

use crate::event::{priority, EventKind};
use crate::gen::Generator;
use crate::id::{BatchId, EntityKey, EventKey, LogicKey, NodeKey, VariantKey};
use crate::logic::LogicKind;
use crate::sim::Simulation;

/// Configured batch size for one variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchItem {
    pub variant: VariantKey,
    pub size: u32,
}

/// A batch that has been released and is entering/processing.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveBatch {
    pub id: BatchId,
    pub variant: VariantKey,
    pub size: u32,
    /// Members that have not yet entered the gated node.
    pub outstanding: Vec<EntityKey>,
}

/// The batching enter logic.
#[derive(Debug)]
pub struct Batch {
    pub items: Vec<BatchItem>,
    /// Allow several batches to form/process concurrently.
    pub multiple_batches: bool,
    /// Batch members may process on parallel stations simultaneously.
    pub parallel_processing: bool,
    /// Start an incomplete batch after the timeout.
    pub start_incomplete: bool,
    /// Prefer complete batches when sorting the block list.
    pub prioritize_complete: bool,
    pub incomplete_timeout: Option<Generator>,
    /// The node whose enter port this logic gates.
    pub node: Option<NodeKey>,

    /// Entities waiting to fill a batch, per variant.
    pub forming: Vec<(VariantKey, Vec<EntityKey>)>,
    pub active: Vec<ActiveBatch>,
    pub timeout_event: Option<EventKey>,

    pub started_batches: u32,
    pub completed_batches: u32,
    pub batched_entities: u32,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            multiple_batches: false,
            parallel_processing: false,
            start_incomplete: false,
            prioritize_complete: false,
            incomplete_timeout: None,
            node: None,
            forming: Vec::new(),
            active: Vec::new(),
            timeout_event: None,
            started_batches: 0,
            completed_batches: 0,
            batched_entities: 0,
        }
    }

    pub fn add_batch(&mut self, variant: VariantKey, size: u32) {
        self.items.push(BatchItem { variant, size });
    }

    pub fn size_for(&self, variant: VariantKey) -> Option<u32> {
        self.items
            .iter()
            .find(|i| i.variant == variant)
            .map(|i| i.size)
    }

    fn forming_for(&mut self, variant: VariantKey) -> &mut Vec<EntityKey> {
        if let Some(index) = self.forming.iter().position(|(v, _)| *v == variant) {
            &mut self.forming[index].1
        } else {
            self.forming.push((variant, Vec::new()));
            &mut self.forming.last_mut().unwrap().1
        }
    }

    pub fn init(&mut self) {
        self.forming.clear();
        self.active.clear();
        self.timeout_event = None;
        self.started_batches = 0;
        self.completed_batches = 0;
        self.batched_entities = 0;
        if let Some(g) = &mut self.incomplete_timeout {
            g.init();
        }
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    pub(crate) fn batch_mut(&mut self, logic: LogicKey) -> &mut Batch {
        match &mut self.logics[logic].kind {
            LogicKind::Batch(b) => b,
            other => panic!("logic is not a Batch: {}", other.kind_name()),
        }
    }

    pub(crate) fn batch_ref(&self, logic: LogicKey) -> &Batch {
        match &self.logics[logic].kind {
            LogicKind::Batch(b) => b,
            other => panic!("logic is not a Batch: {}", other.kind_name()),
        }
    }

    /// Enter gate. Members of a released batch pass; everything else joins
    /// the forming group and waits.
    pub(crate) fn batch_allow_enter(
        &mut self,
        logic: LogicKey,
        node: NodeKey,
        entity: EntityKey,
    ) -> bool {
        let variant = self.entities[entity].variant;
        if let Some(batch) = self.entities[entity].batch {
            let member = self
                .batch_ref(logic)
                .active
                .iter()
                .any(|b| b.id == batch && b.outstanding.contains(&entity));
            if member {
                return true;
            }
        }
        let Some(size) = self.batch_ref(logic).size_for(variant) else {
            // Unbatched variants pass through untouched.
            return true;
        };
        {
            let batch = self.batch_mut(logic);
            batch.node = Some(node);
            let forming = batch.forming_for(variant);
            if !forming.contains(&entity) {
                forming.push(entity);
            }
        }
        let formed = self.batch_ref(logic).forming_for_len(variant) >= size as usize;
        if formed {
            self.batch_release(logic, node, variant);
            return true;
        }
        if self.batch_ref(logic).start_incomplete
            && self.batch_ref(logic).timeout_event.is_none()
        {
            let dt = {
                let LogicKind::Batch(batch) = &mut self.logics[logic].kind else {
                    unreachable!()
                };
                match &mut batch.incomplete_timeout {
                    Some(g) => g.next(&mut self.rng),
                    None => 0.0,
                }
            };
            let evt = self.queue.create(
                EventKind::BatchTimeout { logic, node },
                priority::START_NEW_BATCH,
            );
            self.schedule(evt, dt);
            self.batch_mut(logic).timeout_event = Some(evt);
        }
        false
    }

    /// Stamp the forming group with a fresh id and let the block list
    /// release it.
    pub(crate) fn batch_release(&mut self, logic: LogicKey, node: NodeKey, variant: VariantKey) {
        let id = self.next_batch_id();
        if let Some(evt) = self.batch_mut(logic).timeout_event.take() {
            self.queue.cancel(evt);
        }
        let members = std::mem::take(self.batch_mut(logic).forming_for(variant));
        if members.is_empty() {
            return;
        }
        for &member in &members {
            self.entities[member].batch = Some(id);
        }
        {
            let size = members.len() as u32;
            let batch = self.batch_mut(logic);
            batch.active.push(ActiveBatch {
                id,
                variant,
                size,
                outstanding: members,
            });
            batch.started_batches += 1;
        }
        // Release blocked members through the enter port.
        let evt = self
            .queue
            .create(EventKind::StartNewBatch { logic, node }, priority::START_NEW_BATCH);
        self.schedule(evt, 0.0);
    }

    /// Handle `StartNewBatch`: retry the gated node's block list.
    pub(crate) fn process_start_new_batch(&mut self, _logic: LogicKey, node: NodeKey) {
        self.check_forward_blocking(node);
    }

    /// Handle `BatchTimeout`: start the incomplete batch.
    pub(crate) fn process_batch_timeout(&mut self, logic: LogicKey, node: NodeKey) {
        self.batch_mut(logic).timeout_event = None;
        let variants: Vec<VariantKey> = self
            .batch_ref(logic)
            .forming
            .iter()
            .filter(|(_, members)| !members.is_empty())
            .map(|(v, _)| *v)
            .collect();
        for variant in variants {
            self.batch_release(logic, node, variant);
        }
    }

    /// Force the batch with `id` to completion.
    pub fn finish_batch(&mut self, logic: LogicKey, id: BatchId) {
        let node = self.batch_ref(logic).node;
        let variant = self
            .batch_ref(logic)
            .active
            .iter()
            .find(|b| b.id == id)
            .map(|b| b.variant);
        if let (Some(node), Some(variant)) = (node, variant) {
            self.batch_release(logic, node, variant);
        }
    }

    pub(crate) fn batch_on_entered(&mut self, logic: LogicKey, _node: NodeKey, entity: EntityKey) {
        let Some(id) = self.entities[entity].batch else {
            return;
        };
        let batch = self.batch_mut(logic);
        let mut completed = false;
        if let Some(active) = batch.active.iter_mut().find(|b| b.id == id) {
            active.outstanding.retain(|&e| e != entity);
            batch.batched_entities += 1;
            completed = batch
                .active
                .iter()
                .find(|b| b.id == id)
                .map(|b| b.outstanding.is_empty())
                .unwrap_or(false);
        }
        if completed {
            batch.completed_batches += 1;
        }
    }

    pub(crate) fn batch_on_exited(&mut self, logic: LogicKey, _node: NodeKey, entity: EntityKey) {
        let Some(id) = self.entities[entity].batch else {
            return;
        };
        let batch = self.batch_mut(logic);
        if let Some(index) = batch
            .active
            .iter()
            .position(|b| b.id == id && b.outstanding.is_empty())
        {
            // Retire fully-entered batches once members start leaving.
            batch.active.remove(index);
        }
    }

    pub(crate) fn batch_entity_deleted(&mut self, logic: LogicKey, entity: EntityKey) {
        let batch = self.batch_mut(logic);
        for (_, members) in &mut batch.forming {
            members.retain(|&e| e != entity);
        }
        for active in &mut batch.active {
            active.outstanding.retain(|&e| e != entity);
        }
    }

    pub(crate) fn batch_finalize(&mut self, logic: LogicKey, name: &str) {
        let (started, completed, entities) = {
            let b = self.batch_ref(logic);
            (b.started_batches, b.completed_batches, b.batched_entities)
        };
        self.outputs.record(format!("{name}.started_batches"), started as f64);
        self.outputs
            .record(format!("{name}.completed_batches"), completed as f64);
        self.outputs
            .record(format!("{name}.batched_entities"), entities as f64);
    }
}

impl Batch {
    fn forming_for_len(&self, variant: VariantKey) -> usize {
        self.forming
            .iter()
            .find(|(v, _)| *v == variant)
            .map(|(_, m)| m.len())
            .unwrap_or(0)
    }
}
