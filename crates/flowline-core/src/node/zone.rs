//! Failure zones: failure propagation groups.
//!
//! A failure zone is a content-less node whose failures propagate to its
//! member nodes (and nested zones), bounded by the configured number of
//! propagation steps.

use crate::id::NodeKey;

/// A propagation group for failures.
#[derive(Debug, Default)]
pub struct FailureZone {
    /// Member nodes that fail with the zone.
    pub nodes: Vec<NodeKey>,
    /// Nested zones the failure continues into.
    pub zones: Vec<NodeKey>,
    /// Maximum number of propagation steps; `None` is unbounded.
    pub propagation_steps: Option<u32>,
}

impl FailureZone {
    pub fn new(propagation_steps: Option<u32>) -> Self {
        Self {
            nodes: Vec::new(),
            zones: Vec::new(),
            propagation_steps,
        }
    }

    pub fn add_node(&mut self, node: NodeKey) {
        self.nodes.push(node);
    }

    pub fn add_zone(&mut self, zone: NodeKey) {
        self.zones.push(zone);
    }
}
