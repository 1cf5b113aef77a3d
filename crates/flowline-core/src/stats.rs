//! Per-replication simulation outputs.
//!
//! Every object flushes its named outputs at `finalize()`; each name
//! accumulates one value per replication, keyed by the object's path
//! (`"<object>.<metric>"`).

use crate::time::{confidence_interval, mean, std_dev};
use std::collections::BTreeMap;

/// The output store: one value vector per named output.
#[derive(Debug, Default)]
pub struct Outputs {
    values: BTreeMap<String, Vec<f64>>,
}

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a replication value for `name`.
    pub fn record(&mut self, name: impl Into<String>, value: f64) {
        self.values.entry(name.into()).or_default().push(value);
    }

    /// All values recorded for `name`, one per replication.
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.values.get(name).map(Vec::as_slice)
    }

    /// The most recent replication value for `name`.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(|v| v.last().copied())
    }

    /// Mean across replications. Zero for an unknown name.
    pub fn mean(&self, name: &str) -> f64 {
        self.values.get(name).map(|v| mean(v)).unwrap_or(0.0)
    }

    /// Summary across replications: (mean, standard deviation, 95%
    /// confidence half-width).
    pub fn summary(&self, name: &str) -> (f64, f64, f64) {
        let Some(values) = self.values.get(name) else {
            return (0.0, 0.0, 0.0);
        };
        let m = mean(values);
        let sd = std_dev(values, m);
        (m, sd, confidence_interval(values.len() as f64, sd))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_one_value_per_replication() {
        let mut outputs = Outputs::new();
        outputs.record("mill.exits", 10.0);
        outputs.record("mill.exits", 12.0);
        assert_eq!(outputs.get("mill.exits"), Some(&[10.0, 12.0][..]));
        assert_eq!(outputs.last("mill.exits"), Some(12.0));
        assert_eq!(outputs.mean("mill.exits"), 11.0);
    }

    #[test]
    fn unknown_name_is_zero() {
        let outputs = Outputs::new();
        assert_eq!(outputs.mean("nope"), 0.0);
        assert_eq!(outputs.get("nope"), None);
        assert_eq!(outputs.summary("nope"), (0.0, 0.0, 0.0));
    }

    #[test]
    fn summary_has_spread() {
        let mut outputs = Outputs::new();
        for v in [8.0, 10.0, 12.0] {
            outputs.record("sink.throughput", v);
        }
        let (m, sd, ci) = outputs.summary("sink.throughput");
        assert_eq!(m, 10.0);
        assert!(sd > 0.0);
        assert!(ci > 0.0);
    }
}
