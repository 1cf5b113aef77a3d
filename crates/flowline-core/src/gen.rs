//! The number-generator capability consumed by the kernel.
//!
//! The kernel never knows which distribution family produced a duration; it
//! only draws through this trait. Concrete families (uniform, exponential,
//! tables, ...) live in the `flowline-gen` crate. The core ships [`Constant`]
//! because a deterministic zero-or-fixed duration is needed everywhere, test
//! models included.

use crate::id::VariantKey;
use crate::SimRng;

/// A black-box source of durations and counts.
///
/// Implementations draw from the single simulation RNG passed in; they must
/// not own generators of their own, so that a seed fully determines a run.
pub trait NumberGenerator: std::fmt::Debug {
    /// Draw the next value.
    fn next(&mut self, rng: &mut SimRng) -> f64;

    /// Draw the next value for a specific variant. Families without
    /// per-variant structure fall back to [`NumberGenerator::next`].
    fn next_for_variant(&mut self, rng: &mut SimRng, _variant: Option<VariantKey>) -> f64 {
        self.next(rng)
    }

    /// Draw a setup duration for a change from `from` to `to`. Only the
    /// setup-table family distinguishes the pair.
    fn next_setup(
        &mut self,
        rng: &mut SimRng,
        to: Option<VariantKey>,
        from: Option<VariantKey>,
    ) -> f64 {
        let _ = (to, from);
        self.next(rng)
    }

    /// The mean of the distribution.
    fn mean(&self) -> f64;

    /// The mean for a specific variant.
    fn mean_for_variant(&self, _variant: Option<VariantKey>) -> f64 {
        self.mean()
    }

    /// The mean setup duration for a change from `from` to `to`.
    fn mean_setup(&self, _to: Option<VariantKey>, _from: Option<VariantKey>) -> f64 {
        self.mean()
    }

    /// True if every draw returns the same value.
    fn is_deterministic(&self) -> bool;

    /// True if the generator can only ever produce zero.
    fn is_always_zero(&self) -> bool {
        self.is_deterministic() && self.mean() == 0.0
    }

    /// Reset per-replication state (sequences, tables with cursors).
    fn init(&mut self) {}
}

/// Boxed generator as stored on nodes, failures and logics.
pub type Generator = Box<dyn NumberGenerator>;

/// Always returns the same value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant(pub f64);

impl NumberGenerator for Constant {
    fn next(&mut self, _rng: &mut SimRng) -> f64 {
        self.0
    }

    fn mean(&self) -> f64 {
        self.0
    }

    fn is_deterministic(&self) -> bool {
        true
    }
}

/// Shorthand for a boxed [`Constant`].
pub fn constant(value: f64) -> Generator {
    Box::new(Constant(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn constant_draws_its_value() {
        let mut rng = SimRng::seed_from_u64(1);
        let mut c = Constant(3.5);
        assert_eq!(c.next(&mut rng), 3.5);
        assert_eq!(c.mean(), 3.5);
        assert!(c.is_deterministic());
        assert!(!c.is_always_zero());
    }

    #[test]
    fn constant_zero_is_always_zero() {
        assert!(Constant(0.0).is_always_zero());
    }
}
