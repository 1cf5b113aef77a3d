//! The entity-movement protocol and node state orchestration.
//!
//! Everything here runs on the simulation because a single move touches
//! several arenas at once: the exiting node, the admitting node, the
//! entity, enter logics, failures and resources. The flow of one move:
//! an out event fires, exit logics may hold the entity, the move strategy
//! proposes destinations, `is_open` checks each (capacity, enter logics,
//! kind rules), and either the entity transfers or it joins the forward-
//! block lists of every candidate. Unblocking schedules at most one
//! speculative out event per distinct variant from the sorted block list.

use crate::dispatch::DispatchRule;
use crate::entity::assembly_identity;
use crate::event::{priority, EventKind};
use crate::id::{EntityKey, EventKey, LogicKey, NodeKey};
use crate::node::{NodeKind, NonOpCause};
use crate::port::CanceledOut;
use crate::sim::Simulation;
use crate::time::SimTime;

impl Simulation {
    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    pub(crate) fn set_waiting(&mut self, node: NodeKey) {
        let now = self.clock;
        self.nodes[node].base.set_waiting(now);
        self.after_state_change(node);
    }

    pub(crate) fn set_working(&mut self, node: NodeKey) {
        let now = self.clock;
        self.nodes[node].base.set_working(now);
        self.after_state_change(node);
    }

    pub(crate) fn set_travelling(&mut self, node: NodeKey) {
        let now = self.clock;
        self.nodes[node].base.set_travelling(now);
        self.after_state_change(node);
    }

    pub(crate) fn set_blocked(&mut self, node: NodeKey) {
        let now = self.clock;
        self.nodes[node].base.set_blocked(now);
        self.after_state_change(node);
    }

    pub(crate) fn set_setup_state(&mut self, node: NodeKey) {
        let now = self.clock;
        self.nodes[node].base.set_setup_state(now);
        self.after_state_change(node);
    }

    /// Post-transition hooks: processing-referenced failure countdowns and
    /// active-period tracking for bottleneck detection.
    pub(crate) fn after_state_change(&mut self, node: NodeKey) {
        let now = self.clock;
        let is_working = self.nodes[node].base.working();
        if is_working != self.nodes[node].base.was_working {
            self.nodes[node].base.was_working = is_working;
            self.failure_working_changed(node, is_working);
        }
        if self.shifting_bottleneck_detection {
            let is_active = self.nodes[node].base.is_active();
            let was_active = self.nodes[node].base.active;
            if is_active && !was_active {
                let base = &mut self.nodes[node].base;
                base.active = true;
                base.start_active_period = now;
            } else if !is_active && was_active {
                let start = {
                    let base = &mut self.nodes[node].base;
                    base.active = false;
                    base.start_active_period
                };
                self.bottleneck_ledger.add(node, start, now, false);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Operationality
    // -----------------------------------------------------------------------

    pub(crate) fn unplanned_begin(&mut self, node: NodeKey) {
        let now = self.clock;
        let became = self.nodes[node].base.unplanned_ref_begin(now);
        self.after_state_change(node);
        if became {
            self.node_non_operational(node, NonOpCause::Unplanned);
        }
    }

    pub(crate) fn unplanned_end(&mut self, node: NodeKey) {
        let now = self.clock;
        let recovered = self.nodes[node].base.unplanned_ref_end(now);
        self.after_state_change(node);
        if recovered {
            self.node_operational(node, NonOpCause::Unplanned);
        }
    }

    pub(crate) fn paused_begin(&mut self, node: NodeKey) {
        let now = self.clock;
        if self.nodes[node].base.set_paused(now, true) {
            self.after_state_change(node);
            self.node_non_operational(node, NonOpCause::Paused);
        }
    }

    pub(crate) fn paused_end(&mut self, node: NodeKey) {
        let now = self.clock;
        if self.nodes[node].base.set_paused(now, false) {
            self.after_state_change(node);
            self.node_operational(node, NonOpCause::Paused);
        }
    }

    /// The node just left the operational condition: withdraw its pending
    /// work with remaining times captured.
    pub(crate) fn node_non_operational(&mut self, node: NodeKey, cause: NonOpCause) {
        let now = self.clock;
        self.nodes[node].base.end_operational = now;
        self.cancel_out_events(node);
        match &self.nodes[node].kind {
            NodeKind::Source(_) => self.source_interrupt(node),
            NodeKind::Operation(_) => self.operation_cancel_setup(node),
            NodeKind::Conveyor(_) => self.conveyor_interrupt(node),
            _ => {}
        }
        self.failure_operational_changed(node, false, cause);
        self.interrupt_resource_activities(node);
    }

    /// The node is operational again (no remaining cause): resume the
    /// withdrawn work.
    pub(crate) fn node_operational(&mut self, node: NodeKey, cause: NonOpCause) {
        if !self.nodes[node].is_operational() {
            // Another cause still holds the node down.
            return;
        }
        self.resume_out_events(node);
        match &self.nodes[node].kind {
            NodeKind::Source(_) => self.source_resume(node),
            NodeKind::Operation(_) => self.operation_resume_setup(node),
            NodeKind::Conveyor(_) => self.conveyor_resume(node),
            _ => {}
        }
        self.failure_operational_changed(node, true, cause);
        self.resume_resource_activities(node);
        self.check_exit_blocking(node);
        self.check_forward_blocking(node);
    }

    /// Cancel every scheduled out event, capturing remaining times.
    pub(crate) fn cancel_out_events(&mut self, node: NodeKey) {
        let now = self.clock;
        let events = self.nodes[node].base.exit.out_events.clone();
        for evt in events {
            let Some(record) = self.queue.get(evt) else {
                continue;
            };
            if record.canceled || !record.in_queue {
                continue;
            }
            let remaining = (record.time - now).max(0.0);
            self.queue.cancel(evt);
            self.nodes[node]
                .base
                .exit
                .canceled_out
                .push(CanceledOut {
                    event: evt,
                    remaining,
                });
        }
    }

    /// Reschedule canceled out events. With `add_elapsed_time` the event
    /// moves by exactly the downtime; otherwise it keeps its original
    /// time (or fires immediately when that has passed).
    pub(crate) fn resume_out_events(&mut self, node: NodeKey) {
        let now = self.clock;
        let add_elapsed = self.nodes[node].base.exit.add_elapsed_time;
        let canceled = std::mem::take(&mut self.nodes[node].base.exit.canceled_out);
        for item in canceled {
            let Some(record) = self.queue.get(item.event) else {
                continue;
            };
            let dt = if add_elapsed {
                item.remaining
            } else {
                (record.time - now).max(0.0)
            };
            self.queue.reschedule(item.event, now, dt);
        }
    }

    /// Retry entities held on the exit-block list.
    pub(crate) fn check_exit_blocking(&mut self, node: NodeKey) {
        let blocked = self.nodes[node].base.exit.exit_blocking.clone();
        for entity in blocked {
            if !self.entities.contains_key(entity) {
                continue;
            }
            self.nodes[node].base.exit.remove_exit_blocking(entity);
            self.entities[entity].exit_blocked = false;
            self.schedule_event_out(node, entity, 0.0, priority::OUT_UNBLOCKED);
        }
    }

    // -----------------------------------------------------------------------
    // Occupation bookkeeping
    // -----------------------------------------------------------------------

    /// Fold the occupation integral before a content change.
    pub(crate) fn touch_content(&mut self, node: NodeKey) {
        let now = self.clock;
        let content = self.nodes[node].content_size();
        self.nodes[node].base.touch_occupation(now, content);
    }

    /// Record extreme occupations after a content change, and check the
    /// capacity invariant.
    pub(crate) fn note_content(&mut self, node: NodeKey) {
        let content = self.nodes[node].content_size();
        let max = self.nodes[node].max_occupation();
        assert!(
            content <= max,
            "node '{}' holds {} entities, over its capacity of {}",
            self.nodes[node].name,
            content,
            max
        );
        self.nodes[node].base.note_occupation(content);
    }

    // -----------------------------------------------------------------------
    // Time draws
    // -----------------------------------------------------------------------

    /// Effective process time: the generator draw for the entity's
    /// assembly identity, scaled by the processing execution factor.
    /// Internal operations without their own generator use their parallel
    /// parent's.
    pub(crate) fn draw_process_time(&mut self, node: NodeKey, entity: EntityKey) -> SimTime {
        let identity = assembly_identity(&self.entities, entity);
        let variant = self.entities[identity].variant;
        let gen_node = match &self.nodes[node].kind {
            NodeKind::Operation(op) if self.nodes[node].base.process_time.is_none() => {
                op.parallel_parent.unwrap_or(node)
            }
            _ => node,
        };
        let base_time = {
            let rng = &mut self.rng;
            match &mut self.nodes[gen_node].base.process_time {
                Some(g) => g.next_for_variant(rng, Some(variant)),
                None => 0.0,
            }
        };
        let factor = self.processing_execution_factor(node);
        (base_time * factor).max(0.0)
    }

    /// Effective setup time for changing over to `entity`.
    pub(crate) fn draw_setup_time(&mut self, node: NodeKey, entity: EntityKey) -> SimTime {
        let identity = assembly_identity(&self.entities, entity);
        let to = Some(self.entities[identity].variant);
        let from = self.nodes[node].base.last_variant;
        let base_time = {
            let rng = &mut self.rng;
            match &mut self.nodes[node].base.setup_time_gen {
                Some(g) => g.next_setup(rng, to, from),
                None => 0.0,
            }
        };
        let factor = self.setup_execution_factor(node);
        (base_time * factor).max(0.0)
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// May `entity` enter `node` now? Checks openness, operationality,
    /// kind-specific capacity and every applicable enter logic, in order.
    /// A denying logic records the entity on its own list; skills-first
    /// nodes pre-request their processing resources on a successful check.
    pub fn is_open(&mut self, node: NodeKey, entity: EntityKey, ignore_full: bool) -> bool {
        let ignore_full = ignore_full || self.nodes[node].base.enter.ignore_full;
        {
            let n = &self.nodes[node];
            if !n.enabled || !n.base.enter.open || !n.is_operational() {
                return false;
            }
            if let (Some(node_batch), entity_batch) = (n.base.batch_id, self.entities[entity].batch)
            {
                if entity_batch != Some(node_batch) {
                    return false;
                }
            }
        }
        let kind_open = match &self.nodes[node].kind {
            NodeKind::Source(_) | NodeKind::FailureZone(_) => false,
            NodeKind::Sink(s) => s.current.is_none() || ignore_full,
            NodeKind::Buffer(b) => ignore_full || !b.is_full(),
            NodeKind::Store(_) => self.store_is_open(node, entity, ignore_full),
            NodeKind::Operation(o) => ignore_full || o.current.is_none(),
            NodeKind::Assembly(_) => self.assembly_is_open(node, entity),
            NodeKind::Disassembly(_) => self.disassembly_is_open(node),
            NodeKind::Conveyor(_) => self.conveyor_is_open(node, entity, ignore_full),
            NodeKind::Facade(_) => true,
            NodeKind::Parallel(_) => self.parallel_is_open(node, entity),
        };
        if !kind_open {
            return false;
        }
        let variant = self.entities[entity].variant;
        let logics = self.nodes[node].base.enter.logics.clone();
        for (logic, applies_to) in logics {
            if applies_to.is_some() && applies_to != Some(variant) {
                continue;
            }
            if !self.logic_allow_enter(logic, node, entity) {
                if !self.entities[entity].logic_blocking.contains(&logic) {
                    self.entities[entity].logic_blocking.push(logic);
                }
                return false;
            }
        }
        if self.skills_first_used(node)
            && self.needs_resources(node, crate::resource::ResourcePurpose::Processing, entity)
            && !self.entities[entity].resource_requests.contains(&node)
        {
            self.schedule_request_resources(
                node,
                crate::resource::ResourcePurpose::Processing,
                Some(entity),
                None,
            );
        }
        true
    }

    /// May `entity` leave its node now? Exit logics and the parallel
    /// synchronized-exit gate are consulted.
    pub fn allow_leaving(&mut self, node: NodeKey, entity: EntityKey) -> bool {
        let logics = self.nodes[node].base.exit.logics.clone();
        for logic in logics {
            if !self.logic_allow_leave(logic, node, entity) {
                return false;
            }
        }
        if let NodeKind::Operation(op) = &self.nodes[node].kind {
            if let Some(parent) = op.parallel_parent {
                if !self.parallel_allow_leave(parent, entity) {
                    return false;
                }
            }
        }
        true
    }

    // -----------------------------------------------------------------------
    // Out events
    // -----------------------------------------------------------------------

    /// Create and schedule an out event for `entity` leaving `node`.
    pub fn schedule_event_out(
        &mut self,
        node: NodeKey,
        entity: EntityKey,
        dt: SimTime,
        event_priority: i32,
    ) -> EventKey {
        let evt = self.queue.create(
            EventKind::Out {
                node,
                entity,
                block_list_call: false,
            },
            event_priority,
        );
        self.schedule(evt, dt);
        self.nodes[node].base.exit.out_events.push(evt);
        self.entities[entity].out_events += 1;
        evt
    }

    /// Handle an `Out` event: the entity attempts to move on.
    pub(crate) fn process_out(
        &mut self,
        evt: EventKey,
        node: NodeKey,
        entity: EntityKey,
        block_list_call: bool,
    ) {
        self.nodes[node].base.exit.remove_event_out(evt);
        if !self.entities.contains_key(entity) {
            return;
        }
        self.entities[entity].out_events = self.entities[entity].out_events.saturating_sub(1);
        let blocked_dest = self.entities[entity].destination.take();

        if self.entities[entity].departure != Some(node) {
            // Stale: the entity moved through another path.
            if let Some(dest) = blocked_dest {
                self.block_list_event_done(dest, evt, false);
            }
            return;
        }
        if !self.nodes[node].is_operational() {
            // Withdrawn late: hold the entity for the recovery path.
            self.nodes[node].base.exit.add_exit_blocking(entity);
            self.entities[entity].exit_blocked = true;
            if let Some(dest) = blocked_dest {
                self.block_list_event_done(dest, evt, false);
            }
            return;
        }
        if !self.allow_leaving(node, entity) {
            self.nodes[node].base.exit.add_exit_blocking(entity);
            self.entities[entity].exit_blocked = true;
            if !matches!(self.nodes[node].kind, NodeKind::Conveyor(_)) {
                self.set_blocked(node);
            }
            if let Some(dest) = blocked_dest {
                self.block_list_event_done(dest, evt, false);
            }
            return;
        }

        // A sink consumes instead of forwarding.
        if matches!(self.nodes[node].kind, NodeKind::Sink(_)) {
            self.sink_consume(node, entity);
            return;
        }

        // Preferred destination from block-list scheduling, then the move
        // strategy's candidates in order.
        if let Some(dest) = blocked_dest {
            if self.is_open(dest, entity, false) {
                self.transfer(entity, Some(node), dest);
                self.block_list_event_done(dest, evt, true);
                return;
            }
            // Fall through to the strategy; the block-list round resumes
            // with other variants.
            self.block_list_event_done(dest, evt, false);
        }

        let identity = assembly_identity(&self.entities, entity);
        let variant = self.entities[identity].variant;
        let router = self.routing_node(node);
        let candidates: Vec<(usize, NodeKey)> = {
            let rng = &mut self.rng;
            let controller = &mut self.nodes[router].base.exit.controller;
            let strategy = controller.strategy_for(variant);
            let order = strategy.candidates(rng, entity, variant);
            order
                .into_iter()
                .map(|i| (i, strategy.links[i].node))
                .collect()
        };
        for &(index, dest) in &candidates {
            if self.is_open(dest, entity, false) {
                {
                    let controller = &mut self.nodes[router].base.exit.controller;
                    controller.strategy_for(variant).chosen(index, variant);
                }
                self.transfer(entity, Some(node), dest);
                return;
            }
        }

        // No destination: join every candidate's forward-block list.
        self.add_forward_blocking(node, entity, &candidates);
    }

    /// Register the entity on the forward-block lists of its candidate
    /// destinations and show the node as blocked.
    pub(crate) fn add_forward_blocking(
        &mut self,
        node: NodeKey,
        entity: EntityKey,
        candidates: &[(usize, NodeKey)],
    ) {
        let now = self.clock;
        if !self.entities[entity].is_forward_blocked() {
            self.entities[entity].start_blocked = now;
        }
        let time = self.entities[entity].start_blocked;
        let identity = assembly_identity(&self.entities, entity);
        let variant = self.entities[identity].variant;
        let router = self.routing_node(node);
        for &(_, dest) in candidates {
            let order = {
                let controller = &self.nodes[router].base.exit.controller;
                controller.strategy_for_ref(variant).successor_order(dest)
            };
            if !self.entities[entity].forward_blocking.contains(&dest) {
                self.nodes[dest]
                    .base
                    .enter
                    .add_forward_blocking(entity, time, order);
                self.entities[entity].forward_blocking.push(dest);
            }
        }
        match self.nodes[node].kind {
            NodeKind::Conveyor(_) => self.conveyor_head_blocked(node, entity),
            NodeKind::Sink(_) => {}
            _ => {
                if self.nodes[node].content_size() > 0 {
                    self.set_blocked(node);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Transfer
    // -----------------------------------------------------------------------

    /// Move `entity` from `departure` into `dest`: all bookkeeping of one
    /// completed move.
    pub(crate) fn transfer(
        &mut self,
        entity: EntityKey,
        departure: Option<NodeKey>,
        dest: NodeKey,
    ) {
        let now = self.clock;
        let identity = assembly_identity(&self.entities, entity);
        let variant = self.entities[identity].variant;
        self.clear_forward_blocking(entity);

        if let Some(dep) = departure {
            self.touch_content(dep);
            self.nodes[dep].base.exit.remove_exit_blocking(entity);
            self.entities[entity].exit_blocked = false;
            let time_on_node = now - self.entities[entity].node_enter_time;
            self.nodes[dep].base.exit.exit(time_on_node);
            {
                let router = self.routing_node(dep);
                let controller = &mut self.nodes[router].base.exit.controller;
                controller.strategy_for(variant).entity_exited(entity);
            }
            self.kind_leave(dep, entity, Some(dest));
            self.note_content(dep);
            self.notify_exited(dep, Some(dest), entity);
            self.failure_entity_exited(dep, entity);
        }

        self.touch_content(dest);
        self.entities[entity].departure = Some(dest);
        self.entities[entity].node_enter_time = now;
        {
            let port = &mut self.nodes[dest].base.enter;
            port.entry();
            port.last_variant = Some(variant);
            port.last_assembly_identity = Some(identity);
        }
        self.kind_enter(dest, entity);
        self.note_content(dest);
        self.notify_entered(departure, dest, entity);
        self.failure_entity_entered(dest, entity);
        self.resource_undo_control(entity, dest);

        if let Some(dep) = departure {
            // Freed capacity upstream: blocked entities may follow.
            self.check_forward_blocking(dep);
        }
        // The admission may itself have changed what the destination can
        // accept next (a buffer head moved up, an assembly progressed).
        self.check_forward_blocking(dest);
        tracing::trace!(
            entity = self.entities[entity].id,
            to = %self.nodes[dest].name,
            "entity moved"
        );
    }

    /// Kind dispatch for an admission.
    pub(crate) fn kind_enter(&mut self, node: NodeKey, entity: EntityKey) {
        match self.nodes[node].kind {
            NodeKind::Sink(_) => self.sink_enter(node, entity),
            NodeKind::Buffer(_) => self.buffer_enter(node, entity),
            NodeKind::Store(_) => self.store_enter(node, entity),
            NodeKind::Operation(_) => self.operation_enter(node, entity),
            NodeKind::Assembly(_) => self.assembly_enter(node, entity),
            NodeKind::Disassembly(_) => self.disassembly_enter(node, entity),
            NodeKind::Conveyor(_) => self.conveyor_enter(node, entity),
            NodeKind::Facade(_) => self.facade_enter(node, entity),
            NodeKind::Parallel(_) => self.parallel_enter(node, entity),
            NodeKind::Source(_) | NodeKind::FailureZone(_) => {
                panic!("entity admitted into a node kind that cannot hold it")
            }
        }
    }

    /// Kind dispatch for a departure.
    pub(crate) fn kind_leave(&mut self, node: NodeKey, entity: EntityKey, dest: Option<NodeKey>) {
        let _ = dest;
        match self.nodes[node].kind {
            NodeKind::Source(_) => self.source_leave(node, entity),
            NodeKind::Buffer(_) => self.buffer_leave(node, entity),
            NodeKind::Store(_) => self.store_leave(node, entity),
            NodeKind::Operation(_) => self.operation_leave(node, entity),
            NodeKind::Assembly(_) => self.assembly_leave(node, entity),
            NodeKind::Disassembly(_) => self.disassembly_leave(node, entity),
            NodeKind::Conveyor(_) => self.conveyor_leave(node, entity),
            NodeKind::Facade(_) => self.facade_leave(node, entity),
            NodeKind::Sink(_) | NodeKind::Parallel(_) | NodeKind::FailureZone(_) => {}
        }
    }

    /// Remove the entity from every forward-block list it sits on, both
    /// port lists and logic lists.
    pub(crate) fn clear_forward_blocking(&mut self, entity: EntityKey) {
        let ports = std::mem::take(&mut self.entities[entity].forward_blocking);
        for node in ports {
            self.nodes[node].base.enter.remove_forward_blocking(entity);
        }
        let logics = std::mem::take(&mut self.entities[entity].logic_blocking);
        for logic in logics {
            if let crate::logic::LogicKind::Batch(_) = self.logics[logic].kind {
                self.batch_entity_deleted(logic, entity);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    pub(crate) fn notify_entered(
        &mut self,
        departure: Option<NodeKey>,
        dest: NodeKey,
        entity: EntityKey,
    ) {
        let mut logics: Vec<LogicKey> = self.nodes[dest]
            .base
            .enter
            .logics
            .iter()
            .map(|(l, _)| *l)
            .collect();
        for &observer in &self.nodes[dest].base.observers {
            if !logics.contains(&observer) {
                logics.push(observer);
            }
        }
        for logic in logics {
            self.logic_on_entered(logic, departure, dest, entity);
        }
    }

    pub(crate) fn notify_exited(
        &mut self,
        departure: NodeKey,
        dest: Option<NodeKey>,
        entity: EntityKey,
    ) {
        let mut logics: Vec<LogicKey> = self.nodes[departure].base.exit.logics.clone();
        for &observer in &self.nodes[departure].base.observers {
            if !logics.contains(&observer) {
                logics.push(observer);
            }
        }
        for logic in logics {
            self.logic_on_exited(logic, departure, dest, entity);
        }
    }

    // -----------------------------------------------------------------------
    // Forward-block scheduling
    // -----------------------------------------------------------------------

    /// A condition changed on `node`: start a new unblock round over its
    /// sorted forward-block list.
    pub fn check_forward_blocking(&mut self, node: NodeKey) {
        if !self.nodes[node].enabled || !self.nodes[node].is_operational() {
            return;
        }
        if self.nodes[node].base.enter.block_list_out.is_some() {
            // A round is already in flight; it resumes on its own.
            return;
        }
        if self.nodes[node].base.enter.forward_blocking.is_empty() {
            return;
        }
        let sorted = self.sort_block_list(node);
        {
            let port = &mut self.nodes[node].base.enter;
            port.block_list = sorted;
            port.block_list_pos = 0;
            port.attempted_variants.clear();
        }
        self.schedule_from_block_list(node);
    }

    /// Schedule the next unblocked out event from the snapshot: one per
    /// distinct variant, one in flight at a time.
    pub(crate) fn schedule_from_block_list(&mut self, node: NodeKey) {
        loop {
            let picked = {
                let port = &self.nodes[node].base.enter;
                let mut pos = port.block_list_pos;
                let mut found = None;
                while pos < port.block_list.len() {
                    let entity = port.block_list[pos];
                    if self.entities.contains_key(entity) {
                        let variant = self.entities[entity].variant;
                        if !port.attempted_variants.contains(&variant) {
                            found = Some((entity, variant, pos));
                            break;
                        }
                    }
                    pos += 1;
                }
                found
            };
            let Some((entity, variant, pos)) = picked else {
                let port = &mut self.nodes[node].base.enter;
                port.block_list.clear();
                port.block_list_pos = 0;
                return;
            };
            self.nodes[node].base.enter.block_list_pos = pos + 1;
            let Some(departure) = self.entities[entity].departure else {
                continue;
            };
            if self.entities[entity].destination.is_some() {
                // Another port's round already has this entity in flight.
                continue;
            }
            self.nodes[node]
                .base
                .enter
                .attempted_variants
                .push(variant);
            self.entities[entity].destination = Some(node);
            let evt = self.queue.create(
                EventKind::Out {
                    node: departure,
                    entity,
                    block_list_call: true,
                },
                priority::OUT_UNBLOCKED,
            );
            self.schedule(evt, 0.0);
            self.nodes[departure].base.exit.out_events.push(evt);
            self.entities[entity].out_events += 1;
            self.nodes[node].base.enter.block_list_out = Some(evt);
            return;
        }
    }

    /// The unblocked out event for `dest`'s round finished; continue the
    /// round. A successful entry re-opens its variant for the next peer.
    pub(crate) fn block_list_event_done(&mut self, dest: NodeKey, evt: EventKey, entered: bool) {
        let port = &mut self.nodes[dest].base.enter;
        if port.block_list_out != Some(evt) {
            return;
        }
        port.block_list_out = None;
        if entered {
            if let Some(entity_variant) = port.last_variant {
                port.attempted_variants.retain(|&v| v != entity_variant);
            }
        }
        self.schedule_from_block_list(dest);
    }

    /// Sort the forward-block list per the attached dispatch rule. The
    /// list's natural order is FIFO (blocked time, successor order,
    /// sequence); the rules re-key it stably.
    pub(crate) fn sort_block_list(&mut self, node: NodeKey) -> Vec<EntityKey> {
        let mut entities: Vec<EntityKey> = self.nodes[node]
            .base
            .enter
            .forward_blocking
            .iter()
            .map(|i| i.entity)
            .collect();
        let rule = self.nodes[node].base.enter.dispatcher;
        match rule {
            DispatchRule::Fifo => {}
            DispatchRule::Order => {
                if let Some(order_logic) = self.nodes[node].base.enter.order {
                    let keys: Vec<(EntityKey, f64)> = entities
                        .iter()
                        .map(|&e| (e, self.order_priority(order_logic, e)))
                        .collect();
                    crate::dispatch::sort_by_key(&mut entities, |e| {
                        keys.iter().find(|(k, _)| *k == e).map(|(_, v)| *v).unwrap()
                    });
                }
            }
            DispatchRule::Spt => {
                let keys: Vec<(EntityKey, f64)> = entities
                    .iter()
                    .map(|&e| {
                        let identity = assembly_identity(&self.entities, e);
                        let variant = self.entities[identity].variant;
                        let mean = self.nodes[node]
                            .base
                            .process_time
                            .as_ref()
                            .map(|g| g.mean_for_variant(Some(variant)))
                            .unwrap_or(0.0);
                        (e, mean)
                    })
                    .collect();
                crate::dispatch::sort_by_key(&mut entities, |e| {
                    keys.iter().find(|(k, _)| *k == e).map(|(_, v)| *v).unwrap()
                });
            }
            DispatchRule::Sst => {
                let from = self.nodes[node].base.last_variant;
                let keys: Vec<(EntityKey, f64)> = entities
                    .iter()
                    .map(|&e| {
                        let identity = assembly_identity(&self.entities, e);
                        let variant = self.entities[identity].variant;
                        let mean = self.nodes[node]
                            .base
                            .setup_time_gen
                            .as_ref()
                            .map(|g| g.mean_setup(Some(variant), from))
                            .unwrap_or(0.0);
                        (e, mean)
                    })
                    .collect();
                crate::dispatch::sort_by_key(&mut entities, |e| {
                    keys.iter().find(|(k, _)| *k == e).map(|(_, v)| *v).unwrap()
                });
            }
        }
        entities
    }

    /// The node whose exit controller routes entities leaving `node`:
    /// internal operations defer to their parallel parent.
    pub(crate) fn routing_node(&self, node: NodeKey) -> NodeKey {
        match &self.nodes[node].kind {
            NodeKind::Operation(op) => op.parallel_parent.unwrap_or(node),
            _ => node,
        }
    }
}
