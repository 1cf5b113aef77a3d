//! Shifting-bottleneck detection from active periods.
//!
//! Every node records its active periods: maximal intervals during which it
//! is continuously in an active state. At any instant the node owning the
//! longest active period covering that instant is the momentary bottleneck:
//! where no other node is active at the same time the duration counts as
//! *sole* bottleneck time, where other active periods overlap it counts as
//! *shifting* time for every node active there. The reported bottleneck is
//! the node with the largest sole + shifting total.
//!
//! Two modes: the end-of-run mode attributes everything once; the online
//! mode can be called repeatedly mid-run, rolls fully-closed history into
//! permanent totals, discards the consumed periods and reports provisional
//! totals for the still-open tail.

use crate::id::NodeKey;
use crate::time::SimTime;
use std::collections::BTreeMap;

/// An interval of continuous activity on one node.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivePeriod {
    pub node: NodeKey,
    pub start: SimTime,
    pub end: SimTime,
    /// True while the period may still grow.
    pub open_end: bool,
    /// Time up to which this period has been rolled into permanent totals
    /// by a previous online calculation.
    attributed_until: SimTime,
}

impl ActivePeriod {
    fn length(&self) -> SimTime {
        self.end - self.start
    }
}

/// Sole and shifting bottleneck time for one node.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BottleneckShare {
    pub sole: SimTime,
    pub shifting: SimTime,
}

impl BottleneckShare {
    pub fn total(&self) -> SimTime {
        self.sole + self.shifting
    }
}

/// The collected active periods of one replication.
#[derive(Debug, Default)]
pub struct BottleneckLedger {
    periods: Vec<ActivePeriod>,
}

impl BottleneckLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an active period. An open-ended period previously recorded
    /// for the same node and start is replaced, so a node may extend or
    /// close its current period by re-reporting it.
    pub fn add(&mut self, node: NodeKey, start: SimTime, end: SimTime, open_end: bool) {
        if end <= start {
            return;
        }
        if let Some(existing) = self
            .periods
            .iter_mut()
            .find(|p| p.node == node && p.open_end && p.start == start)
        {
            existing.end = end;
            existing.open_end = open_end;
            return;
        }
        self.periods.push(ActivePeriod {
            node,
            start,
            end,
            open_end,
            attributed_until: start,
        });
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn clear(&mut self) {
        self.periods.clear();
    }

    /// End-of-run attribution over every recorded period. Consumes the
    /// ledger's contents.
    pub fn calculate_final(&mut self) -> BTreeMap<NodeKey, BottleneckShare> {
        let totals = attribute(&self.periods, f64::INFINITY);
        self.periods.clear();
        totals
    }

    /// Online attribution: history before the earliest still-open period is
    /// rolled into the first map (permanent) and the consumed periods are
    /// discarded; the remainder is reported in the second map
    /// (provisional, recomputed on the next call).
    pub fn calculate_online(
        &mut self,
    ) -> (BTreeMap<NodeKey, BottleneckShare>, BTreeMap<NodeKey, BottleneckShare>) {
        let cutoff = self
            .periods
            .iter()
            .filter(|p| p.open_end)
            .map(|p| p.start)
            .fold(f64::INFINITY, f64::min);

        let permanent = attribute(&self.periods, cutoff);

        let mut provisional_periods: Vec<ActivePeriod> = Vec::new();
        for period in &self.periods {
            if period.end > cutoff || period.open_end {
                let mut kept = period.clone();
                kept.attributed_until = kept.attributed_until.max(cutoff.min(kept.end));
                provisional_periods.push(kept);
            }
        }
        let provisional = attribute_from(&provisional_periods, f64::INFINITY);
        self.periods = provisional_periods;
        (permanent, provisional)
    }
}

/// Attribute bottleneck time for all sub-intervals that end at or before
/// `cutoff`, skipping per-period stretches already attributed.
fn attribute(periods: &[ActivePeriod], cutoff: SimTime) -> BTreeMap<NodeKey, BottleneckShare> {
    attribute_clamped(periods, cutoff, true)
}

/// Attribution that ignores the `attributed_until` marks (used for
/// provisional totals, which are recomputed from scratch each call).
fn attribute_from(
    periods: &[ActivePeriod],
    cutoff: SimTime,
) -> BTreeMap<NodeKey, BottleneckShare> {
    attribute_clamped(periods, cutoff, false)
}

fn attribute_clamped(
    periods: &[ActivePeriod],
    cutoff: SimTime,
    honor_marks: bool,
) -> BTreeMap<NodeKey, BottleneckShare> {
    let mut totals: BTreeMap<NodeKey, BottleneckShare> = BTreeMap::new();
    if periods.is_empty() {
        return totals;
    }

    let mut boundaries: Vec<SimTime> = Vec::with_capacity(periods.len() * 2);
    for p in periods {
        boundaries.push(p.start);
        boundaries.push(p.end.min(cutoff));
        if honor_marks {
            boundaries.push(p.attributed_until.min(cutoff));
        }
    }
    boundaries.retain(|t| t.is_finite());
    boundaries.sort_by(|a, b| a.partial_cmp(b).expect("active period times are not NaN"));
    boundaries.dedup();

    for pair in boundaries.windows(2) {
        let (t1, t2) = (pair[0], pair[1]);
        if t2 > cutoff {
            break;
        }
        let covering: Vec<&ActivePeriod> = periods
            .iter()
            .filter(|p| p.start <= t1 && p.end >= t2)
            .collect();
        if covering.is_empty() {
            continue;
        }
        // Momentary bottleneck: the longest covering period; earlier start
        // wins ties.
        let bottleneck = covering
            .iter()
            .max_by(|a, b| {
                a.length()
                    .partial_cmp(&b.length())
                    .unwrap()
                    .then(b.start.partial_cmp(&a.start).unwrap())
            })
            .expect("non-empty covering set");

        let dt = t2 - t1;
        if covering.len() == 1 {
            if !honor_marks || t1 >= bottleneck.attributed_until {
                totals.entry(bottleneck.node).or_default().sole += dt;
            }
        } else {
            for p in &covering {
                if !honor_marks || t1 >= p.attributed_until {
                    totals.entry(p.node).or_default().shifting += dt;
                }
            }
        }
    }
    totals
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn nodes(n: usize) -> Vec<NodeKey> {
        let mut arena: SlotMap<NodeKey, ()> = SlotMap::with_key();
        (0..n).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn single_period_is_all_sole() {
        let keys = nodes(1);
        let mut ledger = BottleneckLedger::new();
        ledger.add(keys[0], 0.0, 10.0, false);
        let totals = ledger.calculate_final();
        assert_eq!(totals[&keys[0]].sole, 10.0);
        assert_eq!(totals[&keys[0]].shifting, 0.0);
    }

    #[test]
    fn overlap_is_shifting_for_both() {
        let keys = nodes(2);
        let mut ledger = BottleneckLedger::new();
        ledger.add(keys[0], 0.0, 10.0, false);
        ledger.add(keys[1], 6.0, 8.0, false);
        let totals = ledger.calculate_final();
        // [0,6) and [8,10): only node 0 active -> sole. [6,8): overlap.
        assert_eq!(totals[&keys[0]].sole, 8.0);
        assert_eq!(totals[&keys[0]].shifting, 2.0);
        assert_eq!(totals[&keys[1]].shifting, 2.0);
        assert_eq!(totals[&keys[1]].sole, 0.0);
    }

    #[test]
    fn reported_bottleneck_is_max_total() {
        let keys = nodes(2);
        let mut ledger = BottleneckLedger::new();
        ledger.add(keys[0], 0.0, 10.0, false);
        ledger.add(keys[1], 2.0, 5.0, false);
        let totals = ledger.calculate_final();
        let best = totals
            .iter()
            .max_by(|a, b| a.1.total().partial_cmp(&b.1.total()).unwrap())
            .map(|(k, _)| *k);
        assert_eq!(best, Some(keys[0]));
    }

    #[test]
    fn open_period_extension_replaces_previous_record() {
        let keys = nodes(1);
        let mut ledger = BottleneckLedger::new();
        ledger.add(keys[0], 0.0, 4.0, true);
        ledger.add(keys[0], 0.0, 9.0, false);
        assert_eq!(ledger.len(), 1);
        let totals = ledger.calculate_final();
        assert_eq!(totals[&keys[0]].sole, 9.0);
    }

    #[test]
    fn online_mode_rolls_closed_history_and_keeps_open_tail() {
        let keys = nodes(2);
        let mut ledger = BottleneckLedger::new();
        ledger.add(keys[0], 0.0, 10.0, false);
        ledger.add(keys[1], 12.0, 20.0, true);

        let (permanent, provisional) = ledger.calculate_online();
        // Everything before the open period's start (12.0) is settled.
        assert_eq!(permanent[&keys[0]].sole, 10.0);
        assert_eq!(provisional[&keys[1]].sole, 8.0);
        // The closed period was consumed; the open one is retained.
        assert_eq!(ledger.len(), 1);

        // Closing the open period later must not double-count history.
        ledger.add(keys[1], 12.0, 25.0, false);
        let (permanent2, _) = ledger.calculate_online();
        assert_eq!(permanent2.get(&keys[0]), None);
        assert_eq!(permanent2[&keys[1]].sole, 13.0);
    }

    #[test]
    fn zero_length_periods_are_ignored() {
        let keys = nodes(1);
        let mut ledger = BottleneckLedger::new();
        ledger.add(keys[0], 5.0, 5.0, false);
        assert!(ledger.is_empty());
    }
}
