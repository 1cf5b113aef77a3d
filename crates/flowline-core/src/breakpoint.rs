//! Breakpoint filters for single-stepped simulation.
//!
//! A breakpoint matches an event iff every constraint that is set matches;
//! an empty breakpoint matches everything. Breakpoints are only consulted
//! while single-stepping with breakpoints enabled.

use crate::time::SimTime;

/// Filter describing which events to stop on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Breakpoint {
    event_type: Option<String>,
    start: Option<SimTime>,
    stop: Option<SimTime>,
    sender: Option<String>,
    receiver: Option<String>,
}

impl Breakpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_event_type(&mut self, name: impl Into<String>) {
        self.event_type = Some(name.into());
    }

    pub fn clear_event_type(&mut self) {
        self.event_type = None;
    }

    pub fn set_start(&mut self, time: SimTime) {
        self.start = Some(time);
    }

    pub fn clear_start(&mut self) {
        self.start = None;
    }

    pub fn set_stop(&mut self, time: SimTime) {
        self.stop = Some(time);
    }

    pub fn clear_stop(&mut self) {
        self.stop = None;
    }

    pub fn set_sender(&mut self, name: impl Into<String>) {
        self.sender = Some(name.into());
    }

    pub fn clear_sender(&mut self) {
        self.sender = None;
    }

    pub fn set_receiver(&mut self, name: impl Into<String>) {
        self.receiver = Some(name.into());
    }

    pub fn clear_receiver(&mut self) {
        self.receiver = None;
    }

    /// Check an event against this filter. All set constraints must hold.
    pub fn matches(
        &self,
        event_type: &str,
        time: SimTime,
        sender: Option<&str>,
        receiver: Option<&str>,
    ) -> bool {
        if let Some(wanted) = &self.event_type {
            if wanted != event_type {
                return false;
            }
        }
        if let Some(start) = self.start {
            if time < start {
                return false;
            }
        }
        if let Some(stop) = self.stop {
            if time > stop {
                return false;
            }
        }
        if let Some(wanted) = &self.sender {
            if sender != Some(wanted.as_str()) {
                return false;
            }
        }
        if let Some(wanted) = &self.receiver {
            if receiver != Some(wanted.as_str()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_breakpoint_matches_everything() {
        let bp = Breakpoint::new();
        assert!(bp.matches("Out", 12.0, None, None));
    }

    #[test]
    fn type_constraint() {
        let mut bp = Breakpoint::new();
        bp.set_event_type("Out");
        assert!(bp.matches("Out", 0.0, None, None));
        assert!(!bp.matches("SetupEnd", 0.0, None, None));
    }

    #[test]
    fn time_window() {
        let mut bp = Breakpoint::new();
        bp.set_start(10.0);
        bp.set_stop(20.0);
        assert!(!bp.matches("Out", 9.0, None, None));
        assert!(bp.matches("Out", 10.0, None, None));
        assert!(bp.matches("Out", 20.0, None, None));
        assert!(!bp.matches("Out", 21.0, None, None));
    }

    #[test]
    fn all_set_constraints_must_hold() {
        let mut bp = Breakpoint::new();
        bp.set_event_type("Out");
        bp.set_receiver("mill");
        assert!(bp.matches("Out", 5.0, None, Some("mill")));
        assert!(!bp.matches("Out", 5.0, None, Some("lathe")));
        assert!(!bp.matches("Out", 5.0, None, None));
    }

    #[test]
    fn cleared_constraint_no_longer_applies() {
        let mut bp = Breakpoint::new();
        bp.set_sender("buffer");
        assert!(!bp.matches("Out", 0.0, None, None));
        bp.clear_sender();
        assert!(bp.matches("Out", 0.0, None, None));
    }
}
