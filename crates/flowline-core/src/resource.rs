//! The resource and skill subsystem.
//!
//! A node that needs resources holds a [`NodeResource`] per purpose
//! (processing, repair, setup) listing required skills. A
//! [`ResourceManager`] owns a pool of [`LogicResource`]s, each providing a
//! skill set and a single execution factor applied to durations. Allocation
//! assigns one distinct pool resource per required skill, picked by the
//! node resource's sorting; unsatisfied requests queue on the manager's
//! block list and are retried in priority order on every release.

use crate::gen::Generator;
use crate::id::{EntityKey, EventKey, FailureKey, ManagerKey, NodeKey, ResourceKey, SkillId};
use crate::time::SimTime;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

/// What a node needs resources for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourcePurpose {
    Processing,
    Repair,
    Setup,
}

/// Candidate ordering during allocation. The first axis is the primary
/// sort key; "fast" means a lower execution factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sorting {
    FewSkillsFastExecution,
    FewSkillsSlowExecution,
    ManySkillsFastExecution,
    ManySkillsSlowExecution,
    FastExecutionFewSkills,
    FastExecutionManySkills,
    SlowExecutionFewSkills,
    SlowExecutionManySkills,
}

impl Default for Sorting {
    fn default() -> Self {
        Sorting::FewSkillsFastExecution
    }
}

// ---------------------------------------------------------------------------
// NodeResource: a required skill set attached to a node
// ---------------------------------------------------------------------------

/// The skills a node requires for one purpose, plus allocation state.
#[derive(Debug)]
pub struct NodeResource {
    pub purpose: ResourcePurpose,
    /// Orders competing requests across the pool; lower first.
    pub priority: i32,
    /// Allocate before entity entry and schedule the out event on
    /// readiness.
    pub skills_first: bool,
    /// Whether resource-holding activities may be interrupted when the
    /// owner becomes non-operational.
    pub interruptible: bool,
    /// Whether interrupted work is delayed by the elapsed downtime on
    /// resume.
    pub add_elapsed_time: bool,
    pub sorting: Sorting,
    pub skills: Vec<SkillId>,
    pub enabled: bool,

    /// Pool resources currently allocated, one per satisfied skill.
    pub allocated: Vec<ResourceKey>,
    /// Subset of `allocated` that has finished its response time.
    pub ready: Vec<ResourceKey>,
    /// The entity this allocation serves (none for repair).
    pub entity: Option<EntityKey>,
}

impl NodeResource {
    pub fn new(purpose: ResourcePurpose, priority: i32, skills: Vec<SkillId>) -> Self {
        Self {
            purpose,
            priority,
            skills_first: false,
            interruptible: false,
            add_elapsed_time: true,
            sorting: Sorting::default(),
            skills,
            enabled: true,
            allocated: Vec::new(),
            ready: Vec::new(),
            entity: None,
        }
    }

    pub fn is_allocated(&self) -> bool {
        !self.skills.is_empty() && self.allocated.len() == self.skills.len()
    }

    pub fn is_allocated_and_ready(&self) -> bool {
        self.is_allocated() && self.ready.len() == self.allocated.len()
    }

    pub fn skills_count(&self) -> usize {
        self.skills.len()
    }

    pub fn clear_allocation(&mut self) {
        self.allocated.clear();
        self.ready.clear();
        self.entity = None;
    }
}

// ---------------------------------------------------------------------------
// LogicResource: a pool member
// ---------------------------------------------------------------------------

/// A pool member providing skills at one execution factor.
#[derive(Debug)]
pub struct LogicResource {
    pub name: String,
    pub manager: ManagerKey,
    pub skills: Vec<SkillId>,
    /// Duration multiplier; below one executes faster than base.
    pub execution_factor: f64,

    /// Which node and purpose holds this resource, if any.
    pub allocated_to: Option<(NodeKey, ResourcePurpose)>,
    /// True once the response time has elapsed.
    pub ready: bool,
    pub ready_event: Option<EventKey>,
    pub ready_event_canceled: bool,
    /// Response time outstanding when the ready event was canceled.
    pub remaining_response: SimTime,

    /// Time this resource has been held, for utilization outputs.
    pub busy_time: SimTime,
    pub busy_since: SimTime,
}

impl LogicResource {
    pub fn new(name: impl Into<String>, manager: ManagerKey, skills: Vec<SkillId>) -> Self {
        Self {
            name: name.into(),
            manager,
            skills,
            execution_factor: 1.0,
            allocated_to: None,
            ready: false,
            ready_event: None,
            ready_event_canceled: false,
            remaining_response: 0.0,
            busy_time: 0.0,
            busy_since: 0.0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.allocated_to.is_none()
    }

    pub fn provides(&self, skill: SkillId) -> bool {
        self.skills.contains(&skill)
    }

    pub fn init(&mut self) {
        self.allocated_to = None;
        self.ready = false;
        self.ready_event = None;
        self.ready_event_canceled = false;
        self.remaining_response = 0.0;
        self.busy_time = 0.0;
        self.busy_since = 0.0;
    }
}

// ---------------------------------------------------------------------------
// ResourceManager: the pool owner
// ---------------------------------------------------------------------------

/// A queued request that could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockRequest {
    pub node: NodeKey,
    pub purpose: ResourcePurpose,
    pub entity: Option<EntityKey>,
    pub failure: Option<FailureKey>,
    pub priority: i32,
}

/// Owner of a resource pool and its block list.
#[derive(Debug)]
pub struct ResourceManager {
    pub name: String,
    pub resources: Vec<ResourceKey>,
    pub block_list: Vec<BlockRequest>,
    /// Delay between allocation and readiness, drawn per resource.
    pub response_time: Option<Generator>,
}

impl ResourceManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            block_list: Vec::new(),
            response_time: None,
        }
    }

    /// Queue an unsatisfied request, keeping the list sorted by priority
    /// (stable for equal priorities).
    pub fn add_to_block_list(&mut self, request: BlockRequest) {
        if self
            .block_list
            .iter()
            .any(|r| r.node == request.node && r.purpose == request.purpose && r.entity == request.entity)
        {
            return;
        }
        let at = self
            .block_list
            .partition_point(|r| r.priority <= request.priority);
        self.block_list.insert(at, request);
    }

    pub fn remove_from_block_list(
        &mut self,
        node: NodeKey,
        purpose: ResourcePurpose,
        entity: Option<EntityKey>,
    ) {
        self.block_list
            .retain(|r| !(r.node == node && r.purpose == purpose && r.entity == entity));
    }

    pub fn init(&mut self) {
        self.block_list.clear();
        if let Some(g) = &mut self.response_time {
            g.init();
        }
    }
}

// ---------------------------------------------------------------------------
// Allocation selection
// ---------------------------------------------------------------------------

/// Pick one distinct free resource per required skill from `pool`,
/// following `sorting`. Returns `None` when any skill cannot be satisfied;
/// nothing is marked allocated either way.
pub fn select_resources(
    resources: &SlotMap<ResourceKey, LogicResource>,
    pool: &[ResourceKey],
    required: &[SkillId],
    sorting: Sorting,
) -> Option<Vec<ResourceKey>> {
    let mut chosen: Vec<ResourceKey> = Vec::with_capacity(required.len());
    for &skill in required {
        let mut candidates: Vec<ResourceKey> = pool
            .iter()
            .copied()
            .filter(|&key| {
                let r = &resources[key];
                r.is_free() && r.provides(skill) && !chosen.contains(&key)
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by(|&a, &b| compare_candidates(&resources[a], &resources[b], sorting));
        chosen.push(candidates[0]);
    }
    Some(chosen)
}

fn compare_candidates(
    a: &LogicResource,
    b: &LogicResource,
    sorting: Sorting,
) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    let skills = |r: &LogicResource| r.skills.len();
    let factor = |r: &LogicResource| r.execution_factor;

    let by_skills_asc = skills(a).cmp(&skills(b));
    let by_skills_desc = skills(b).cmp(&skills(a));
    let by_factor_asc = factor(a).partial_cmp(&factor(b)).unwrap_or(Ordering::Equal);
    let by_factor_desc = factor(b).partial_cmp(&factor(a)).unwrap_or(Ordering::Equal);

    match sorting {
        Sorting::FewSkillsFastExecution => by_skills_asc.then(by_factor_asc),
        Sorting::FewSkillsSlowExecution => by_skills_asc.then(by_factor_desc),
        Sorting::ManySkillsFastExecution => by_skills_desc.then(by_factor_asc),
        Sorting::ManySkillsSlowExecution => by_skills_desc.then(by_factor_desc),
        Sorting::FastExecutionFewSkills => by_factor_asc.then(by_skills_asc),
        Sorting::FastExecutionManySkills => by_factor_asc.then(by_skills_desc),
        Sorting::SlowExecutionFewSkills => by_factor_desc.then(by_skills_asc),
        Sorting::SlowExecutionManySkills => by_factor_desc.then(by_skills_desc),
    }
}

/// Effective duration multiplier over an allocated set: the geometric mean
/// of the execution factors.
pub fn execution_factor(
    resources: &SlotMap<ResourceKey, LogicResource>,
    allocated: &[ResourceKey],
) -> f64 {
    if allocated.is_empty() {
        return 1.0;
    }
    let product: f64 = allocated
        .iter()
        .map(|&key| resources[key].execution_factor)
        .product();
    product.powf(1.0 / allocated.len() as f64)
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

use crate::event::{priority, EventKind};
use crate::sim::Simulation;

impl Simulation {
    fn node_resource(&self, node: NodeKey, purpose: ResourcePurpose) -> Option<&NodeResource> {
        let base = &self.nodes[node].base;
        let nr = match purpose {
            ResourcePurpose::Processing => base.processing_resource.as_ref(),
            ResourcePurpose::Repair => base.repair_resource.as_ref(),
            ResourcePurpose::Setup => base.setup_resource.as_ref(),
        };
        nr.filter(|r| r.enabled && !r.skills.is_empty())
    }

    fn node_resource_mut(
        &mut self,
        node: NodeKey,
        purpose: ResourcePurpose,
    ) -> Option<&mut NodeResource> {
        let base = &mut self.nodes[node].base;
        let nr = match purpose {
            ResourcePurpose::Processing => base.processing_resource.as_mut(),
            ResourcePurpose::Repair => base.repair_resource.as_mut(),
            ResourcePurpose::Setup => base.setup_resource.as_mut(),
        };
        nr.filter(|r| r.enabled && !r.skills.is_empty())
    }

    /// Does the node still need resources for `purpose` before it can
    /// proceed with `entity`?
    pub(crate) fn needs_resources(
        &self,
        node: NodeKey,
        purpose: ResourcePurpose,
        entity: EntityKey,
    ) -> bool {
        match self.node_resource(node, purpose) {
            Some(nr) => !(nr.is_allocated_and_ready() && nr.entity == Some(entity)),
            None => false,
        }
    }

    pub(crate) fn needs_repair_resources(&self, node: NodeKey) -> bool {
        self.node_resource(node, ResourcePurpose::Repair)
            .map(|nr| !nr.is_allocated_and_ready())
            .unwrap_or(false)
    }

    /// True when any node resource of this node allocates before entry.
    pub(crate) fn skills_first_used(&self, node: NodeKey) -> bool {
        self.node_resource(node, ResourcePurpose::Processing)
            .map(|nr| nr.skills_first)
            .unwrap_or(false)
    }

    /// Enqueue a resource request and flag the waiting state.
    pub(crate) fn schedule_request_resources(
        &mut self,
        node: NodeKey,
        purpose: ResourcePurpose,
        entity: Option<EntityKey>,
        failure: Option<FailureKey>,
    ) {
        let now = self.clock;
        {
            let base = &mut self.nodes[node].base;
            match purpose {
                ResourcePurpose::Processing => base.wfr_processing = true,
                ResourcePurpose::Repair => base.wfr_repair = true,
                ResourcePurpose::Setup => base.wfr_setup = true,
            }
            base.update_waiting_for_resource(now);
        }
        self.after_state_change(node);
        if let Some(entity) = entity {
            if !self.entities[entity].resource_requests.contains(&node) {
                self.entities[entity].resource_requests.push(node);
            }
        }
        let evt = self.queue.create(
            EventKind::RequestResources {
                node,
                purpose,
                entity,
                failure,
            },
            priority::REQUEST_RESOURCES,
        );
        self.schedule(evt, 0.0);
    }

    /// Handle a `RequestResources` event: allocate or queue on the block
    /// lists.
    pub(crate) fn process_request_resources(
        &mut self,
        node: NodeKey,
        purpose: ResourcePurpose,
        entity: Option<EntityKey>,
        failure: Option<FailureKey>,
    ) {
        if !self.try_allocate(node, purpose, entity, failure) {
            let priority = self
                .node_resource(node, purpose)
                .map(|nr| nr.priority)
                .unwrap_or(0);
            let request = BlockRequest {
                node,
                purpose,
                entity,
                failure,
                priority,
            };
            let managers = self.nodes[node].base.managers.clone();
            for manager in managers {
                self.managers[manager].add_to_block_list(request);
            }
        }
    }

    /// Try to satisfy every required skill from the pools of the node's
    /// connected managers. Allocation is all-or-nothing; each allocated
    /// resource becomes ready after its manager's response time.
    pub(crate) fn try_allocate(
        &mut self,
        node: NodeKey,
        purpose: ResourcePurpose,
        entity: Option<EntityKey>,
        failure: Option<FailureKey>,
    ) -> bool {
        let Some((required, sorting)) = self
            .node_resource(node, purpose)
            .map(|nr| (nr.skills.clone(), nr.sorting))
        else {
            return true;
        };
        if self
            .node_resource(node, purpose)
            .map(|nr| nr.is_allocated())
            .unwrap_or(false)
        {
            return true;
        }
        let pool: Vec<ResourceKey> = self.nodes[node]
            .base
            .managers
            .iter()
            .flat_map(|&m| self.managers[m].resources.iter().copied())
            .collect();
        let Some(chosen) = select_resources(&self.resources, &pool, &required, sorting) else {
            return false;
        };

        let now = self.clock;
        for &key in &chosen {
            let manager = self.resources[key].manager;
            let delay = {
                let rng = &mut self.rng;
                match &mut self.managers[manager].response_time {
                    Some(g) => g.next(rng).max(0.0),
                    None => 0.0,
                }
            };
            {
                let resource = &mut self.resources[key];
                resource.allocated_to = Some((node, purpose));
                resource.ready = false;
                resource.busy_since = now;
            }
            let evt = self.queue.create(
                EventKind::ResourceReady {
                    node,
                    purpose,
                    resource: key,
                    entity,
                    failure,
                },
                priority::RESOURCE_READY,
            );
            self.schedule(evt, delay);
            self.resources[key].ready_event = Some(evt);
            // The pool request is satisfied; leave the block lists.
            let manager = self.resources[key].manager;
            self.managers[manager].remove_from_block_list(node, purpose, entity);
        }
        if let Some(nr) = self.node_resource_mut(node, purpose) {
            nr.allocated = chosen;
            nr.ready.clear();
            nr.entity = entity;
        }
        tracing::trace!(node = %self.nodes[node].name, ?purpose, "resources allocated");
        true
    }

    /// Handle a `ResourceReady` event.
    pub(crate) fn process_resource_ready(
        &mut self,
        node: NodeKey,
        purpose: ResourcePurpose,
        resource: ResourceKey,
        entity: Option<EntityKey>,
        failure: Option<FailureKey>,
    ) {
        {
            let r = &mut self.resources[resource];
            r.ready = true;
            r.ready_event = None;
        }
        let all_ready = {
            match self.node_resource_mut(node, purpose) {
                Some(nr) => {
                    if !nr.ready.contains(&resource) {
                        nr.ready.push(resource);
                    }
                    nr.is_allocated_and_ready()
                }
                None => false,
            }
        };
        if all_ready {
            self.resources_ready(node, purpose, entity, failure);
        }
    }

    /// Every required resource is allocated and ready: proceed with the
    /// waiting activity.
    fn resources_ready(
        &mut self,
        node: NodeKey,
        purpose: ResourcePurpose,
        entity: Option<EntityKey>,
        failure: Option<FailureKey>,
    ) {
        let now = self.clock;
        {
            let base = &mut self.nodes[node].base;
            match purpose {
                ResourcePurpose::Processing => base.wfr_processing = false,
                ResourcePurpose::Repair => base.wfr_repair = false,
                ResourcePurpose::Setup => base.wfr_setup = false,
            }
            base.update_waiting_for_resource(now);
        }
        self.after_state_change(node);
        match purpose {
            ResourcePurpose::Processing => {
                if let Some(entity) = entity {
                    // Skills-first allocations complete before the entity
                    // arrives; work starts when it does.
                    if self.entities[entity].departure == Some(node) {
                        self.operation_work(node, entity);
                    }
                }
            }
            ResourcePurpose::Setup => {
                if let Some(entity) = entity {
                    if self.entities[entity].departure == Some(node) {
                        let time = self.draw_setup_time(node, entity);
                        self.operation_do_setup(node, entity, time);
                    }
                }
            }
            ResourcePurpose::Repair => {
                if let Some(fk) = failure {
                    self.schedule_failure_end(fk);
                }
            }
        }
    }

    /// Return every resource allocated for `purpose` to its pool and walk
    /// the managers' block lists in priority order.
    pub(crate) fn release_resources(
        &mut self,
        node: NodeKey,
        purpose: ResourcePurpose,
        entity: Option<EntityKey>,
    ) {
        let allocated = {
            let base = &mut self.nodes[node].base;
            let nr = match purpose {
                ResourcePurpose::Processing => base.processing_resource.as_mut(),
                ResourcePurpose::Repair => base.repair_resource.as_mut(),
                ResourcePurpose::Setup => base.setup_resource.as_mut(),
            };
            match nr {
                Some(nr) => {
                    if entity.is_some() && nr.entity != entity {
                        return;
                    }
                    let allocated = std::mem::take(&mut nr.allocated);
                    nr.ready.clear();
                    nr.entity = None;
                    allocated
                }
                None => return,
            }
        };
        if allocated.is_empty() {
            return;
        }
        let now = self.clock;
        let mut managers = Vec::new();
        for key in allocated {
            let resource = &mut self.resources[key];
            assert!(
                resource.allocated_to == Some((node, purpose)),
                "released a resource that was not allocated to this node"
            );
            resource.allocated_to = None;
            resource.ready = false;
            resource.busy_time += now - resource.busy_since;
            if let Some(evt) = resource.ready_event.take() {
                self.queue.cancel(evt);
            }
            if !managers.contains(&resource.manager) {
                managers.push(resource.manager);
            }
        }
        for manager in managers {
            self.trigger_manager_block_list(manager);
        }
    }

    /// Retry queued requests, highest priority first, until one fails.
    pub(crate) fn trigger_manager_block_list(&mut self, manager: ManagerKey) {
        loop {
            let Some(request) = self.managers[manager].block_list.first().copied() else {
                return;
            };
            if !self.try_allocate(request.node, request.purpose, request.entity, request.failure) {
                return;
            }
            // `try_allocate` removed the satisfied request from every
            // connected manager's list, this one included.
        }
    }

    /// Effective execution factor of the allocated processing resources.
    pub(crate) fn processing_execution_factor(&self, node: NodeKey) -> f64 {
        self.node_resource(node, ResourcePurpose::Processing)
            .map(|nr| execution_factor(&self.resources, &nr.allocated))
            .unwrap_or(1.0)
    }

    pub(crate) fn repair_execution_factor(&self, node: NodeKey) -> f64 {
        self.node_resource(node, ResourcePurpose::Repair)
            .map(|nr| execution_factor(&self.resources, &nr.allocated))
            .unwrap_or(1.0)
    }

    pub(crate) fn setup_execution_factor(&self, node: NodeKey) -> f64 {
        self.node_resource(node, ResourcePurpose::Setup)
            .map(|nr| execution_factor(&self.resources, &nr.allocated))
            .unwrap_or(1.0)
    }

    /// Undo speculative skills-first requests the entity made on nodes it
    /// did not enter.
    pub(crate) fn resource_undo_control(&mut self, entity: EntityKey, entered: NodeKey) {
        let requests = std::mem::take(&mut self.entities[entity].resource_requests);
        for node in requests {
            if node == entered {
                continue;
            }
            for purpose in [ResourcePurpose::Processing, ResourcePurpose::Setup] {
                let matches = self
                    .node_resource(node, purpose)
                    .map(|nr| nr.entity == Some(entity))
                    .unwrap_or(false);
                if matches {
                    self.release_resources(node, purpose, Some(entity));
                }
                let managers = self.nodes[node].base.managers.clone();
                for manager in managers {
                    self.managers[manager].remove_from_block_list(node, purpose, Some(entity));
                }
            }
            let now = self.clock;
            let base = &mut self.nodes[node].base;
            base.wfr_processing = false;
            base.wfr_setup = false;
            base.update_waiting_for_resource(now);
        }
    }

    /// Interrupt resource-holding activities when the node goes down.
    /// The resources stay allocated but idle.
    pub(crate) fn interrupt_resource_activities(&mut self, node: NodeKey) {
        let now = self.clock;
        for purpose in [
            ResourcePurpose::Processing,
            ResourcePurpose::Setup,
            ResourcePurpose::Repair,
        ] {
            let interruptible = self
                .node_resource(node, purpose)
                .map(|nr| nr.interruptible && nr.is_allocated())
                .unwrap_or(false);
            if !interruptible {
                continue;
            }
            let base = &mut self.nodes[node].base;
            match purpose {
                ResourcePurpose::Processing => {
                    if !base.processing_interrupted {
                        base.processing_interrupted = true;
                        base.start_interrupted_processing = now;
                    }
                }
                ResourcePurpose::Setup => {
                    if !base.setup_interrupted {
                        base.setup_interrupted = true;
                        base.start_interrupted_setup = now;
                    }
                }
                ResourcePurpose::Repair => {
                    if !base.repair_interrupted {
                        base.repair_interrupted = true;
                        base.start_interrupted_repair = now;
                    }
                }
            }
        }
    }

    /// Resume interrupted activities when the node comes back up.
    pub(crate) fn resume_resource_activities(&mut self, node: NodeKey) {
        let base = &mut self.nodes[node].base;
        base.processing_interrupted = false;
        base.setup_interrupted = false;
        base.repair_interrupted = false;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> (
        SlotMap<ResourceKey, LogicResource>,
        ManagerKey,
        Vec<ResourceKey>,
    ) {
        let mut managers: SlotMap<ManagerKey, ()> = SlotMap::with_key();
        let manager = managers.insert(());
        let resources: SlotMap<ResourceKey, LogicResource> = SlotMap::with_key();
        (resources, manager, Vec::new())
    }

    fn add(
        resources: &mut SlotMap<ResourceKey, LogicResource>,
        keys: &mut Vec<ResourceKey>,
        manager: ManagerKey,
        name: &str,
        skills: Vec<SkillId>,
        factor: f64,
    ) -> ResourceKey {
        let mut r = LogicResource::new(name, manager, skills);
        r.execution_factor = factor;
        let key = resources.insert(r);
        keys.push(key);
        key
    }

    #[test]
    fn selection_prefers_few_skills_fast_execution() {
        let (mut resources, manager, mut keys) = pool();
        let weld = SkillId(0);
        let generalist =
            add(&mut resources, &mut keys, manager, "gen", vec![weld, SkillId(1)], 0.5);
        let specialist = add(&mut resources, &mut keys, manager, "spec", vec![weld], 1.2);
        let fast_specialist = add(&mut resources, &mut keys, manager, "fspec", vec![weld], 0.9);

        let chosen = select_resources(
            &resources,
            &keys,
            &[weld],
            Sorting::FewSkillsFastExecution,
        )
        .unwrap();
        assert_eq!(chosen, vec![fast_specialist]);

        let chosen = select_resources(&resources, &keys, &[weld], Sorting::ManySkillsFastExecution)
            .unwrap();
        assert_eq!(chosen, vec![generalist]);

        let chosen = select_resources(&resources, &keys, &[weld], Sorting::SlowExecutionFewSkills)
            .unwrap();
        assert_eq!(chosen, vec![specialist]);
    }

    #[test]
    fn selection_is_injective() {
        let (mut resources, manager, mut keys) = pool();
        let weld = SkillId(0);
        add(&mut resources, &mut keys, manager, "only", vec![weld], 1.0);
        // Two weld skills required but only one welder.
        assert!(select_resources(
            &resources,
            &keys,
            &[weld, weld],
            Sorting::FewSkillsFastExecution
        )
        .is_none());
    }

    #[test]
    fn allocated_resources_are_skipped() {
        let (mut resources, manager, mut keys) = pool();
        let weld = SkillId(0);
        let busy = add(&mut resources, &mut keys, manager, "busy", vec![weld], 1.0);
        let mut nodes: SlotMap<NodeKey, ()> = SlotMap::with_key();
        let node = nodes.insert(());
        resources[busy].allocated_to = Some((node, ResourcePurpose::Processing));
        assert!(select_resources(
            &resources,
            &keys,
            &[weld],
            Sorting::FewSkillsFastExecution
        )
        .is_none());
    }

    #[test]
    fn geometric_mean_execution_factor() {
        let (mut resources, manager, mut keys) = pool();
        add(&mut resources, &mut keys, manager, "a", vec![SkillId(0)], 4.0);
        add(&mut resources, &mut keys, manager, "b", vec![SkillId(1)], 1.0);
        let factor = execution_factor(&resources, &keys);
        assert!((factor - 2.0).abs() < 1e-12);
        assert_eq!(execution_factor(&resources, &[]), 1.0);
    }

    #[test]
    fn block_list_is_priority_ordered_and_deduplicated() {
        let mut manager = ResourceManager::new("crew");
        let mut nodes: SlotMap<NodeKey, ()> = SlotMap::with_key();
        let a = nodes.insert(());
        let b = nodes.insert(());
        let req = |node, priority| BlockRequest {
            node,
            purpose: ResourcePurpose::Processing,
            entity: None,
            failure: None,
            priority,
        };
        manager.add_to_block_list(req(a, 5));
        manager.add_to_block_list(req(b, 1));
        manager.add_to_block_list(req(a, 5));
        assert_eq!(manager.block_list.len(), 2);
        assert_eq!(manager.block_list[0].node, b);
    }

    #[test]
    fn node_resource_readiness() {
        let mut nr = NodeResource::new(ResourcePurpose::Processing, 0, vec![SkillId(0)]);
        assert!(!nr.is_allocated());
        let (mut resources, manager, mut keys) = pool();
        let r = add(&mut resources, &mut keys, manager, "r", vec![SkillId(0)], 1.0);
        nr.allocated.push(r);
        assert!(nr.is_allocated());
        assert!(!nr.is_allocated_and_ready());
        nr.ready.push(r);
        assert!(nr.is_allocated_and_ready());
    }
}
