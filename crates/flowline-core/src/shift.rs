//! Shift calendars: weekly work schedules driving node operationality.
//!
//! A calendar declares shifts as seconds-of-day intervals on weekdays,
//! with optional breaks inside. Outside any shift its nodes are Unplanned;
//! during a break they are Paused. The calendar-start event evaluates the
//! position within the week at replication start and from then on each
//! boundary event applies its effect and schedules the next boundary,
//! rolling forward indefinitely. The week is anchored so that time zero is
//! Monday 00:00.

use crate::event::{priority, EventKind};
use crate::id::{CalendarKey, NodeKey};
use crate::sim::Simulation;
use crate::time::{SimTime, TOLERANCE};

pub const DAY: SimTime = 86_400.0;
pub const WEEK: SimTime = 604_800.0;

/// A break within a shift, in seconds of day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakItem {
    pub start: SimTime,
    pub end: SimTime,
}

/// One declared shift: a daily interval on selected weekdays.
#[derive(Debug, Clone)]
pub struct ShiftItem {
    pub name: String,
    /// Start and end in seconds of day; an end at or before the start
    /// rolls into the next day.
    pub start: SimTime,
    pub end: SimTime,
    /// Monday first.
    pub days: [bool; 7],
    pub breaks: Vec<BreakItem>,
}

/// What happens at a schedule boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    ShiftBegin,
    ShiftEnd,
    BreakBegin,
    BreakEnd,
}

/// A weekly schedule attached to a set of nodes.
#[derive(Debug)]
pub struct ShiftCalendar {
    pub name: String,
    pub nodes: Vec<NodeKey>,
    pub shifts: Vec<ShiftItem>,
    /// (second of week, effect), sorted. Computed from `shifts`.
    boundaries: Vec<(SimTime, Boundary)>,
}

impl ShiftCalendar {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            shifts: Vec::new(),
            boundaries: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: NodeKey) {
        if !self.nodes.contains(&node) {
            self.nodes.push(node);
        }
    }

    pub fn remove_node(&mut self, node: NodeKey) {
        self.nodes.retain(|&n| n != node);
    }

    pub fn add_shift(
        &mut self,
        name: impl Into<String>,
        start: SimTime,
        end: SimTime,
        days: [bool; 7],
    ) -> &mut ShiftItem {
        self.shifts.push(ShiftItem {
            name: name.into(),
            start,
            end,
            days,
            breaks: Vec::new(),
        });
        self.boundaries.clear();
        self.shifts.last_mut().unwrap()
    }

    /// Flatten the declared shifts into a sorted week of boundaries.
    pub fn compile(&mut self) {
        self.boundaries.clear();
        for shift in &self.shifts {
            for (day, &on) in shift.days.iter().enumerate() {
                if !on {
                    continue;
                }
                let base = day as SimTime * DAY;
                let start = base + shift.start;
                let end = if shift.end > shift.start {
                    base + shift.end
                } else {
                    base + shift.end + DAY
                };
                self.boundaries.push((start % WEEK, Boundary::ShiftBegin));
                self.boundaries.push((end % WEEK, Boundary::ShiftEnd));
                for brk in &shift.breaks {
                    self.boundaries
                        .push(((base + brk.start) % WEEK, Boundary::BreakBegin));
                    self.boundaries
                        .push(((base + brk.end) % WEEK, Boundary::BreakEnd));
                }
            }
        }
        self.boundaries
            .sort_by(|a, b| a.0.partial_cmp(&b.0).expect("boundaries are not NaN"));
    }

    /// Is `time_of_week` inside any shift?
    pub fn in_shift(&self, time_of_week: SimTime) -> bool {
        self.covered(time_of_week, Boundary::ShiftBegin, Boundary::ShiftEnd)
    }

    /// Is `time_of_week` inside any break?
    pub fn in_break(&self, time_of_week: SimTime) -> bool {
        self.covered(time_of_week, Boundary::BreakBegin, Boundary::BreakEnd)
    }

    fn covered(&self, t: SimTime, begin: Boundary, end: Boundary) -> bool {
        // Walk the sorted week: the most recent boundary of the pair
        // decides; a week wrapping interval is handled by starting from
        // the last boundary of the week.
        let mut inside = self
            .boundaries
            .iter()
            .rev()
            .find(|(_, b)| *b == begin || *b == end)
            .map(|(_, b)| *b == begin)
            .unwrap_or(false);
        for &(time, boundary) in &self.boundaries {
            if time > t + TOLERANCE {
                break;
            }
            if boundary == begin {
                inside = true;
            } else if boundary == end {
                inside = false;
            }
        }
        inside
    }

    /// The next boundary strictly after `time_of_week`, and the delay to
    /// it. Returns `None` for an empty schedule.
    pub fn next_boundary(&self, time_of_week: SimTime) -> Option<(SimTime, Boundary)> {
        if self.boundaries.is_empty() {
            return None;
        }
        for &(time, boundary) in &self.boundaries {
            if time > time_of_week + TOLERANCE {
                return Some((time - time_of_week, boundary));
            }
        }
        // Wrap into the next week.
        let &(time, boundary) = self.boundaries.first().unwrap();
        Some((WEEK - time_of_week + time, boundary))
    }
}

impl Simulation {
    /// Handle the calendar-start event at replication begin.
    pub(crate) fn process_shift_calendar_start(&mut self, calendar: CalendarKey) {
        self.calendars[calendar].compile();
        let tow = self.clock % WEEK;
        let (in_shift, in_break) = {
            let cal = &self.calendars[calendar];
            (cal.in_shift(tow), cal.in_break(tow))
        };
        let nodes = self.calendars[calendar].nodes.clone();
        if !in_shift {
            for node in nodes {
                self.unplanned_begin(node);
            }
        } else if in_break {
            for node in nodes {
                self.paused_begin(node);
            }
        }
        self.schedule_next_shift_boundary(calendar);
    }

    /// Schedule the next boundary of the calendar's week.
    pub(crate) fn schedule_next_shift_boundary(&mut self, calendar: CalendarKey) {
        let tow = self.clock % WEEK;
        let Some((dt, boundary)) = self.calendars[calendar].next_boundary(tow) else {
            return;
        };
        let (kind, prio) = match boundary {
            Boundary::ShiftBegin => (EventKind::ShiftBegin { calendar }, priority::SHIFT),
            Boundary::ShiftEnd => (EventKind::ShiftEnd { calendar }, priority::SHIFT),
            Boundary::BreakBegin => (EventKind::BreakBegin { calendar }, priority::BREAK),
            Boundary::BreakEnd => (EventKind::BreakEnd { calendar }, priority::BREAK),
        };
        let evt = self.queue.create(kind, prio);
        self.schedule(evt, dt);
    }

    pub(crate) fn process_shift_begin(&mut self, calendar: CalendarKey) {
        let nodes = self.calendars[calendar].nodes.clone();
        tracing::debug!(calendar = %self.calendars[calendar].name, "shift begins");
        for node in nodes {
            self.unplanned_end(node);
        }
        self.schedule_next_shift_boundary(calendar);
    }

    pub(crate) fn process_shift_end(&mut self, calendar: CalendarKey) {
        let nodes = self.calendars[calendar].nodes.clone();
        tracing::debug!(calendar = %self.calendars[calendar].name, "shift ends");
        for node in nodes {
            self.unplanned_begin(node);
        }
        self.schedule_next_shift_boundary(calendar);
    }

    pub(crate) fn process_break_begin(&mut self, calendar: CalendarKey) {
        let nodes = self.calendars[calendar].nodes.clone();
        for node in nodes {
            self.paused_begin(node);
        }
        self.schedule_next_shift_boundary(calendar);
    }

    pub(crate) fn process_break_end(&mut self, calendar: CalendarKey) {
        let nodes = self.calendars[calendar].nodes.clone();
        for node in nodes {
            self.paused_end(node);
        }
        self.schedule_next_shift_boundary(calendar);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn weekday_shift() -> ShiftCalendar {
        let mut cal = ShiftCalendar::new("day shift");
        let days = [true, true, true, true, true, false, false];
        cal.add_shift("day", 8.0 * 3600.0, 16.0 * 3600.0, days)
            .breaks
            .push(BreakItem {
                start: 12.0 * 3600.0,
                end: 12.5 * 3600.0,
            });
        cal.compile();
        cal
    }

    #[test]
    fn shift_membership() {
        let cal = weekday_shift();
        assert!(!cal.in_shift(7.0 * 3600.0)); // Monday 07:00
        assert!(cal.in_shift(9.0 * 3600.0)); // Monday 09:00
        assert!(!cal.in_shift(17.0 * 3600.0)); // Monday 17:00
        assert!(!cal.in_shift(5.0 * DAY + 9.0 * 3600.0)); // Saturday 09:00
    }

    #[test]
    fn break_membership() {
        let cal = weekday_shift();
        assert!(cal.in_break(12.25 * 3600.0));
        assert!(!cal.in_break(11.0 * 3600.0));
    }

    #[test]
    fn next_boundary_from_monday_morning() {
        let cal = weekday_shift();
        let (dt, boundary) = cal.next_boundary(7.0 * 3600.0).unwrap();
        assert_eq!(boundary, Boundary::ShiftBegin);
        assert!((dt - 3600.0).abs() < 1e-9);
    }

    #[test]
    fn next_boundary_wraps_the_week() {
        let cal = weekday_shift();
        // Sunday evening: the next boundary is Monday's shift begin.
        let sunday_evening = 6.0 * DAY + 20.0 * 3600.0;
        let (dt, boundary) = cal.next_boundary(sunday_evening).unwrap();
        assert_eq!(boundary, Boundary::ShiftBegin);
        assert!((dt - (4.0 + 8.0) * 3600.0).abs() < 1e-9);
    }

    #[test]
    fn overnight_shift_rolls_into_next_day() {
        let mut cal = ShiftCalendar::new("night");
        let days = [true, false, false, false, false, false, false];
        cal.add_shift("night", 22.0 * 3600.0, 6.0 * 3600.0, days);
        cal.compile();
        assert!(cal.in_shift(23.0 * 3600.0)); // Monday 23:00
        assert!(cal.in_shift(DAY + 5.0 * 3600.0)); // Tuesday 05:00
        assert!(!cal.in_shift(DAY + 7.0 * 3600.0)); // Tuesday 07:00
    }
}
