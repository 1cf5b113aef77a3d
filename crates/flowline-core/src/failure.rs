//! Failures: scheduled disruptions on nodes.
//!
//! A failure alternates between an interval (time or cycles to the next
//! disruption) and a duration (repair time). Three time references decide
//! what the interval counts: wall-clock simulation time, only time spent
//! processing, or only operational time. A disruption whose owner needs
//! repair resources does not end until they are allocated and ready.
//!
//! Pending disruption events are canceled, with their remaining time
//! captured, whenever their reference stops counting; resuming reschedules
//! them at `now + remaining`.

use crate::entity::assembly_identity;
use crate::event::{priority, EventKind};
use crate::gen::Generator;
use crate::id::{EntityKey, EventKey, FailureKey, NodeKey};
use crate::node::{NodeKind, NonOpCause};
use crate::resource::ResourcePurpose;
use crate::sim::Simulation;
use crate::time::SimTime;
use crate::SimRng;
use rand::Rng;
use std::collections::HashSet;

/// How interval and duration are determined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailureType {
    /// Availability and mean time to repair; interval and duration are
    /// exponential with the implied means.
    Percent { availability: f64, mttr: f64 },
    /// Interval and duration from explicit generators.
    Distributions,
    /// The interval counts entity exits instead of time.
    Cycles,
}

/// What the interval counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeReference {
    /// Wall-clock simulation time.
    Simulation,
    /// Only time the owner spends processing.
    Processing,
    /// Only time the owner is operational.
    Operational,
}

/// A disruption scheduler owned by one node.
#[derive(Debug)]
pub struct Failure {
    pub name: String,
    pub node: NodeKey,
    pub ftype: FailureType,
    pub reference: TimeReference,
    pub interval: Option<Generator>,
    pub duration: Option<Generator>,

    pub begin_event: Option<EventKey>,
    pub end_event: Option<EventKey>,
    pub begin_canceled: bool,
    pub end_canceled: bool,
    pub remaining_begin: SimTime,
    pub remaining_end: SimTime,
    pub is_failed: bool,

    /// Exits until the next disruption (Cycles type).
    pub cycle_count: u32,
    /// Assembly identity of the last entity to enter a disassembly owner;
    /// only its exit counts a cycle.
    pub entered_entity: Option<EntityKey>,

    pub stats_failed_time: SimTime,
    stats_log_time: SimTime,
    /// Disruptions begun since the last statistics reset.
    pub activations: u32,
}

impl Failure {
    pub fn new(
        name: impl Into<String>,
        node: NodeKey,
        ftype: FailureType,
        reference: TimeReference,
    ) -> Self {
        Self {
            name: name.into(),
            node,
            ftype,
            reference,
            interval: None,
            duration: None,
            begin_event: None,
            end_event: None,
            begin_canceled: false,
            end_canceled: false,
            remaining_begin: 0.0,
            remaining_end: 0.0,
            is_failed: false,
            cycle_count: 0,
            entered_entity: None,
            stats_failed_time: 0.0,
            stats_log_time: 0.0,
            activations: 0,
        }
    }

    /// Mean time between failures implied by availability and MTTR:
    /// `mttr / (mttr + mtbf) = 1 - availability`.
    pub fn mtbf(availability: f64, mttr: f64) -> SimTime {
        assert!(
            availability > 0.0 && availability <= 1.0,
            "availability must be in (0, 1]"
        );
        if availability >= 1.0 {
            return f64::INFINITY;
        }
        mttr * availability / (1.0 - availability)
    }

    pub fn draw_interval(&mut self, rng: &mut SimRng) -> SimTime {
        match self.ftype {
            FailureType::Percent { availability, mttr } => {
                exponential(rng, Self::mtbf(availability, mttr))
            }
            _ => match &mut self.interval {
                Some(g) => g.next(rng),
                None => f64::INFINITY,
            },
        }
    }

    pub fn draw_duration(&mut self, rng: &mut SimRng) -> SimTime {
        match self.ftype {
            FailureType::Percent { mttr, .. } => exponential(rng, mttr),
            _ => match &mut self.duration {
                Some(g) => g.next(rng),
                None => 0.0,
            },
        }
    }

    /// The mean exit count between disruptions (Cycles type).
    pub fn mean_cycles(&self) -> u32 {
        self.interval
            .as_ref()
            .map(|g| g.mean().round().max(1.0) as u32)
            .unwrap_or(1)
    }

    pub fn init(&mut self) {
        self.begin_event = None;
        self.end_event = None;
        self.begin_canceled = false;
        self.end_canceled = false;
        self.remaining_begin = 0.0;
        self.remaining_end = 0.0;
        self.is_failed = false;
        self.entered_entity = None;
        self.stats_failed_time = 0.0;
        self.stats_log_time = 0.0;
        self.activations = 0;
        for g in [&mut self.interval, &mut self.duration].into_iter().flatten() {
            g.init();
        }
    }

    pub fn reset_stats(&mut self, now: SimTime) {
        self.stats_failed_time = 0.0;
        self.stats_log_time = now;
        self.activations = 0;
    }

    fn log_stats(&mut self, now: SimTime) {
        if self.is_failed && !self.end_canceled {
            self.stats_failed_time += now - self.stats_log_time;
        }
        self.stats_log_time = now;
    }
}

/// Inverse-CDF exponential draw with the given mean.
fn exponential(rng: &mut SimRng, mean: SimTime) -> SimTime {
    if !mean.is_finite() {
        return f64::INFINITY;
    }
    let u: f64 = rng.gen();
    -mean * (1.0 - u).ln()
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

impl Simulation {
    /// Initialize a failure at replication start: seed the cycle counter
    /// or schedule the first disruption begin.
    pub(crate) fn init_failure(&mut self, fk: FailureKey) {
        match self.failures[fk].ftype {
            FailureType::Cycles => {
                let mean = self.failures[fk].mean_cycles().max(1);
                self.failures[fk].cycle_count = self.rng.gen_range(1..=mean);
            }
            _ => {
                self.schedule_failure_begin(fk);
            }
        }
    }

    /// Schedule the next disruption begin one interval out. With the
    /// Processing reference the countdown only runs while the owner
    /// works, so the event starts canceled when it is idle.
    pub(crate) fn schedule_failure_begin(&mut self, fk: FailureKey) {
        let dt = {
            let failure = &mut self.failures[fk];
            failure.draw_interval(&mut self.rng)
        };
        if !dt.is_finite() {
            return;
        }
        let prio = match self.failures[fk].reference {
            TimeReference::Processing => priority::DISRUPTION_BEGIN_PROCESSING,
            _ => priority::DISRUPTION_BEGIN,
        };
        let evt = self
            .queue
            .create(EventKind::DisruptionBegin { failure: fk }, prio);
        self.schedule(evt, dt);
        {
            let failure = &mut self.failures[fk];
            failure.begin_event = Some(evt);
            failure.begin_canceled = false;
        }
        let node = self.failures[fk].node;
        let gate_now = match self.failures[fk].reference {
            TimeReference::Processing => !self.nodes[node].base.working(),
            TimeReference::Operational => !self.nodes[node].is_operational(),
            TimeReference::Simulation => false,
        };
        if gate_now {
            self.pause_failure_begin(fk);
        }
    }

    /// Cancel the pending begin, capturing the remaining interval.
    pub(crate) fn pause_failure_begin(&mut self, fk: FailureKey) {
        let now = self.clock;
        let Some(evt) = self.failures[fk].begin_event else {
            return;
        };
        if self.failures[fk].begin_canceled {
            return;
        }
        let remaining = (self.queue.get(evt).map(|r| r.time).unwrap_or(now) - now).max(0.0);
        self.queue.cancel(evt);
        let failure = &mut self.failures[fk];
        failure.begin_canceled = true;
        failure.remaining_begin = remaining;
    }

    /// Resume a paused begin at `now + remaining`.
    pub(crate) fn resume_failure_begin(&mut self, fk: FailureKey) {
        if !self.failures[fk].begin_canceled {
            return;
        }
        let (evt, remaining) = {
            let failure = &mut self.failures[fk];
            failure.begin_canceled = false;
            (failure.begin_event, failure.remaining_begin)
        };
        if let Some(evt) = evt {
            let now = self.clock;
            self.queue.reschedule(evt, now, remaining);
        }
    }

    /// Handle a `DisruptionBegin` event.
    pub(crate) fn process_disruption_begin(&mut self, fk: FailureKey) {
        let now = self.clock;
        let node = self.failures[fk].node;
        {
            let failure = &mut self.failures[fk];
            failure.begin_event = None;
            failure.is_failed = true;
            failure.stats_log_time = now;
            failure.activations += 1;
        }
        tracing::debug!(failure = %self.failures[fk].name, node = %self.nodes[node].name, "disruption begins");

        let mut visited = HashSet::new();
        self.disruption_begin_node(node, fk, &mut visited, 0);

        // Repair resources gate the disruption end.
        if self.needs_repair_resources(node) {
            self.schedule_request_resources(node, ResourcePurpose::Repair, None, Some(fk));
        } else {
            self.schedule_failure_end(fk);
        }
    }

    /// Schedule the disruption end one duration out.
    pub(crate) fn schedule_failure_end(&mut self, fk: FailureKey) {
        let node = self.failures[fk].node;
        let duration = {
            let failure = &mut self.failures[fk];
            failure.draw_duration(&mut self.rng)
        };
        let factor = self.repair_execution_factor(node);
        let evt = self
            .queue
            .create(EventKind::DisruptionEnd { failure: fk }, priority::DISRUPTION_END);
        self.schedule(evt, duration * factor);
        let failure = &mut self.failures[fk];
        failure.end_event = Some(evt);
        failure.end_canceled = false;
    }

    /// Handle a `DisruptionEnd` event.
    pub(crate) fn process_disruption_end(&mut self, fk: FailureKey) {
        let now = self.clock;
        let node = self.failures[fk].node;
        {
            let failure = &mut self.failures[fk];
            failure.end_event = None;
            failure.log_stats(now);
            failure.is_failed = false;
        }
        tracing::debug!(failure = %self.failures[fk].name, "disruption ends");
        self.release_resources(node, ResourcePurpose::Repair, None);

        let mut visited = HashSet::new();
        self.disruption_end_node(node, fk, &mut visited, 0);

        match self.failures[fk].ftype {
            FailureType::Cycles => {
                let mean = self.failures[fk].mean_cycles().max(1);
                self.failures[fk].cycle_count = mean;
            }
            _ => self.schedule_failure_begin(fk),
        }
    }

    /// Propagate a disruption begin through failure links and zones.
    pub(crate) fn disruption_begin_node(
        &mut self,
        node: NodeKey,
        fk: FailureKey,
        visited: &mut HashSet<NodeKey>,
        level: u32,
    ) {
        if !visited.insert(node) {
            return;
        }
        let now = self.clock;
        let became_failed = self.nodes[node].base.disruption_ref_begin(now);
        self.after_state_change(node);
        if became_failed {
            self.node_non_operational(node, NonOpCause::Failure);
        }
        let mut targets = self.nodes[node].base.failure_nodes.clone();
        if let NodeKind::FailureZone(zone) = &self.nodes[node].kind {
            let within = zone.propagation_steps.map_or(true, |steps| level < steps);
            if within {
                targets.extend(zone.nodes.iter().copied());
                targets.extend(zone.zones.iter().copied());
            }
        }
        for target in targets {
            self.disruption_begin_node(target, fk, visited, level + 1);
        }
    }

    /// Propagate a disruption end along the same links.
    pub(crate) fn disruption_end_node(
        &mut self,
        node: NodeKey,
        fk: FailureKey,
        visited: &mut HashSet<NodeKey>,
        level: u32,
    ) {
        if !visited.insert(node) {
            return;
        }
        let now = self.clock;
        let recovered = self.nodes[node].base.disruption_ref_end(now);
        self.after_state_change(node);
        if recovered {
            self.node_operational(node, NonOpCause::Failure);
        }
        let mut targets = self.nodes[node].base.failure_nodes.clone();
        if let NodeKind::FailureZone(zone) = &self.nodes[node].kind {
            let within = zone.propagation_steps.map_or(true, |steps| level < steps);
            if within {
                targets.extend(zone.nodes.iter().copied());
                targets.extend(zone.zones.iter().copied());
            }
        }
        for target in targets {
            self.disruption_end_node(target, fk, visited, level + 1);
        }
    }

    /// Working-state hook for Processing-referenced failures.
    pub(crate) fn failure_working_changed(&mut self, node: NodeKey, is_working: bool) {
        let failures = self.nodes[node].base.failures.clone();
        for fk in failures {
            if self.failures[fk].reference != TimeReference::Processing {
                continue;
            }
            if self.failures[fk].is_failed {
                continue;
            }
            if is_working {
                self.resume_failure_begin(fk);
            } else {
                self.pause_failure_begin(fk);
            }
        }
    }

    /// Operationality hook: pause and resume failure timers whose
    /// reference stops counting while the node is down.
    pub(crate) fn failure_operational_changed(
        &mut self,
        node: NodeKey,
        operational: bool,
        cause: NonOpCause,
    ) {
        let failures = self.nodes[node].base.failures.clone();
        for fk in failures {
            let reference = self.failures[fk].reference;
            let is_failed = self.failures[fk].is_failed;
            if !is_failed && reference == TimeReference::Operational {
                if operational {
                    self.resume_failure_begin(fk);
                } else {
                    self.pause_failure_begin(fk);
                }
            }
            // A repair pauses while the node is off-shift or on break, not
            // while it is failed (the repair is what ends that).
            if is_failed && reference == TimeReference::Operational && cause != NonOpCause::Failure
            {
                if operational {
                    self.resume_failure_end(fk);
                } else {
                    self.pause_failure_end(fk);
                }
            }
        }
    }

    pub(crate) fn pause_failure_end(&mut self, fk: FailureKey) {
        let now = self.clock;
        let Some(evt) = self.failures[fk].end_event else {
            return;
        };
        if self.failures[fk].end_canceled {
            return;
        }
        let remaining = (self.queue.get(evt).map(|r| r.time).unwrap_or(now) - now).max(0.0);
        self.failures[fk].log_stats(now);
        self.queue.cancel(evt);
        let failure = &mut self.failures[fk];
        failure.end_canceled = true;
        failure.remaining_end = remaining;
    }

    pub(crate) fn resume_failure_end(&mut self, fk: FailureKey) {
        if !self.failures[fk].end_canceled {
            return;
        }
        let now = self.clock;
        let (evt, remaining) = {
            let failure = &mut self.failures[fk];
            failure.end_canceled = false;
            failure.stats_log_time = now;
            (failure.end_event, failure.remaining_end)
        };
        if let Some(evt) = evt {
            self.queue.reschedule(evt, now, remaining);
        }
    }

    /// Entry hook for cycle counting on disassembly owners.
    pub(crate) fn failure_entity_entered(&mut self, node: NodeKey, entity: EntityKey) {
        if !matches!(self.nodes[node].kind, NodeKind::Disassembly(_)) {
            return;
        }
        let identity = assembly_identity(&self.entities, entity);
        let failures = self.nodes[node].base.failures.clone();
        for fk in failures {
            if self.failures[fk].ftype == FailureType::Cycles {
                self.failures[fk].entered_entity = Some(identity);
            }
        }
    }

    /// Exit hook: count a cycle and trigger the disruption at zero.
    pub(crate) fn failure_entity_exited(&mut self, node: NodeKey, entity: EntityKey) {
        let failures = self.nodes[node].base.failures.clone();
        for fk in failures {
            if self.failures[fk].ftype != FailureType::Cycles || self.failures[fk].is_failed {
                continue;
            }
            if matches!(self.nodes[node].kind, NodeKind::Disassembly(_)) {
                if self.failures[fk].entered_entity != Some(entity) {
                    continue;
                }
            }
            let count = {
                let failure = &mut self.failures[fk];
                failure.cycle_count = failure.cycle_count.saturating_sub(1);
                failure.cycle_count
            };
            if count == 0 {
                let evt = self.queue.create(
                    EventKind::DisruptionBegin { failure: fk },
                    priority::DISRUPTION_BEGIN,
                );
                let now = self.clock;
                self.queue.schedule_now(evt, now);
                self.failures[fk].begin_event = Some(evt);
            }
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

    #[test]
    fn mtbf_from_availability() {
        // 90% availability with a one-minute repair: the failure-free
        // stretch averages nine minutes.
        let mtbf = Failure::mtbf(0.9, 60.0);
        assert!((mtbf - 540.0).abs() < 1e-9);
    }

    #[test]
    fn exponential_mean_is_close() {
        let mut rng = SimRng::seed_from_u64(11);
        let n = 20_000;
        let mean = 60.0;
        let total: f64 = (0..n).map(|_| exponential(&mut rng, mean)).sum();
        let observed = total / n as f64;
        assert!(
            (observed - mean).abs() / mean < 0.05,
            "observed mean {observed} too far from {mean}"
        );
    }

    #[test]
    fn infinite_mean_never_fires() {
        let mut rng = SimRng::seed_from_u64(3);
        assert!(exponential(&mut rng, f64::INFINITY).is_infinite());
    }
}
